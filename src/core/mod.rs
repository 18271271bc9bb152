mod engine;
mod error;
mod export;
mod household;
mod types;

pub use engine::{
    OccupationalProjection, SavingsProjection, adjust_for_inflation, estimate_annuity,
    inflation_erosion_factor, monthly_rate, project, project_indexed_investment,
    project_occupational, project_personal_savings, run_projection,
};
pub use error::{ExportError, ValidationError};
pub use export::{write_yearly_csv, yearly_csv_string};
pub use household::{HouseholdProjection, HouseholdTotals, run_household};
pub use types::{
    ANNUITY_CONVERSION_RATE, AgeBand, AnnuityEstimate, BandRates, DEFAULT_EMPLOYEE_RATES,
    DEFAULT_EMPLOYER_RATES, OccupationalYear, ProjectionResult, SavingsYear, SimulationParameters,
    YearlyRecord,
};
