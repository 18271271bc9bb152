use tracing::debug;

use super::error::ValidationError;
use super::types::{
    ANNUITY_CONVERSION_RATE, AnnuityEstimate, OccupationalYear, ProjectionResult, SavingsYear,
    SimulationParameters, YearlyRecord,
};

const MONTHS_PER_YEAR: u32 = 12;

#[derive(Debug, Clone)]
pub struct OccupationalProjection {
    pub final_capital: f64,
    pub total_contributions: f64,
    pub employee_contributions: f64,
    pub employer_contributions: f64,
    pub years: Vec<OccupationalYear>,
}

#[derive(Debug, Clone)]
pub struct SavingsProjection {
    pub final_capital: f64,
    pub total_contributions: f64,
    pub years: Vec<SavingsYear>,
}

#[derive(Debug, Clone, Copy)]
struct MonthlyPlan {
    current_age: u32,
    horizon: u32,
    monthly_contribution: f64,
    annual_rate: f64,
}

/// Validates the parameters and the withdrawal year, then runs the projection.
pub fn project(
    params: &SimulationParameters,
    withdrawal_year: Option<u32>,
) -> Result<ProjectionResult, ValidationError> {
    params.validate()?;
    params.validate_withdrawal_year(withdrawal_year)?;
    Ok(run_projection(params, withdrawal_year))
}

/// Runs all three schemes over the horizon. Assumes `params` were validated.
pub fn run_projection(
    params: &SimulationParameters,
    withdrawal_year: Option<u32>,
) -> ProjectionResult {
    let horizon = params.horizon();
    debug!(
        current_age = params.current_age,
        retirement_age = params.retirement_age,
        horizon,
        ?withdrawal_year,
        "running projection"
    );

    let occupational = project_occupational(params, withdrawal_year);
    let personal_savings = project_personal_savings(params, withdrawal_year);
    let indexed = project_indexed_investment(params);

    let total_nominal =
        occupational.final_capital + personal_savings.final_capital + indexed.final_capital;

    let (yearly, withdrawal_total) = merge_years(
        &occupational.years,
        &personal_savings.years,
        &indexed.years,
        withdrawal_year,
    );

    let result = ProjectionResult {
        occupational_nominal: occupational.final_capital,
        personal_savings_nominal: personal_savings.final_capital,
        indexed_nominal: indexed.final_capital,
        total_nominal,
        occupational_real: adjust_for_inflation(occupational.final_capital, params),
        personal_savings_real: adjust_for_inflation(personal_savings.final_capital, params),
        indexed_real: adjust_for_inflation(indexed.final_capital, params),
        total_real: adjust_for_inflation(total_nominal, params),
        personal_savings_contributions: personal_savings.total_contributions,
        indexed_contributions: indexed.total_contributions,
        occupational_contributions: occupational.total_contributions,
        occupational_employee_contributions: occupational.employee_contributions,
        occupational_employer_contributions: occupational.employer_contributions,
        yearly,
        withdrawal_year,
        withdrawal_total,
    };

    debug!(
        total_nominal = result.total_nominal,
        total_real = result.total_real,
        withdrawal_total = result.withdrawal_total,
        "projection complete"
    );
    result
}

/// Projects the occupational scheme year by year with annual compounding.
pub fn project_occupational(
    params: &SimulationParameters,
    withdrawal_year: Option<u32>,
) -> OccupationalProjection {
    let horizon = params.horizon();
    if horizon == 0 {
        return OccupationalProjection {
            final_capital: 0.0,
            total_contributions: 0.0,
            employee_contributions: 0.0,
            employer_contributions: 0.0,
            years: Vec::new(),
        };
    }

    let mut capital = params.initial_occupational_capital;
    let mut total_contributions = 0.0;
    let mut employee_contributions = 0.0;
    let mut employer_contributions = 0.0;
    let mut years = Vec::with_capacity(horizon as usize);

    for year in 1..=horizon {
        let age = params.current_age + year;
        let gross_salary =
            params.initial_salary * (1.0 + params.salary_growth_rate).powi(year as i32);
        let coordinated_salary = (gross_salary - params.coordination_deduction).max(0.0);
        let insured_salary = insured_salary(params, coordinated_salary);

        let employee_rate = params.employee_rates.rate_for_age(age);
        let employer_rate = params.employer_rates.rate_for_age(age);
        let employee_contribution = insured_salary * employee_rate;
        let employer_contribution = insured_salary * employer_rate;
        let total_contribution = employee_contribution + employer_contribution;

        capital = capital * (1.0 + params.occupational_rate) + total_contribution;
        let withdrawal = drain_if_withdrawal_year(&mut capital, year, withdrawal_year);

        total_contributions += total_contribution;
        employee_contributions += employee_contribution;
        employer_contributions += employer_contribution;

        years.push(OccupationalYear {
            year,
            age,
            gross_salary,
            coordinated_salary,
            insured_salary,
            employee_rate,
            employer_rate,
            employee_contribution,
            employer_contribution,
            total_contribution,
            capital,
            withdrawal,
        });
    }

    OccupationalProjection {
        final_capital: capital,
        total_contributions,
        employee_contributions,
        employer_contributions,
        years,
    }
}

fn insured_salary(params: &SimulationParameters, coordinated_salary: f64) -> f64 {
    if params.supplementary_coverage {
        coordinated_salary
    } else {
        coordinated_salary.min(params.insured_salary_ceiling)
    }
}

/// Projects the personal savings account with monthly compounding.
pub fn project_personal_savings(
    params: &SimulationParameters,
    withdrawal_year: Option<u32>,
) -> SavingsProjection {
    let plan = MonthlyPlan {
        current_age: params.current_age,
        horizon: params.horizon(),
        monthly_contribution: params.personal_savings_monthly,
        annual_rate: params.personal_savings_rate,
    };
    project_monthly(plan, withdrawal_year)
}

/// Projects the indexed account at its after-tax rate. It is never drained by a withdrawal.
pub fn project_indexed_investment(params: &SimulationParameters) -> SavingsProjection {
    let plan = MonthlyPlan {
        current_age: params.current_age,
        horizon: params.horizon(),
        monthly_contribution: params.indexed_monthly,
        annual_rate: params.indexed_net_rate(),
    };
    project_monthly(plan, None)
}

fn project_monthly(plan: MonthlyPlan, withdrawal_year: Option<u32>) -> SavingsProjection {
    let rate = monthly_rate(plan.annual_rate);
    let mut capital = 0.0;
    let mut total_contributions = 0.0;
    let mut years = Vec::with_capacity(plan.horizon as usize);

    for year in 1..=plan.horizon {
        for _ in 0..MONTHS_PER_YEAR {
            capital = capital * (1.0 + rate) + plan.monthly_contribution;
            total_contributions += plan.monthly_contribution;
        }
        let withdrawal = drain_if_withdrawal_year(&mut capital, year, withdrawal_year);

        years.push(SavingsYear {
            year,
            age: plan.current_age + year,
            capital,
            contribution: plan.monthly_contribution * MONTHS_PER_YEAR as f64,
            withdrawal,
        });
    }

    SavingsProjection {
        final_capital: capital,
        total_contributions,
        years,
    }
}

fn drain_if_withdrawal_year(
    capital: &mut f64,
    year: u32,
    withdrawal_year: Option<u32>,
) -> Option<f64> {
    if withdrawal_year != Some(year) {
        return None;
    }
    let withdrawn = *capital;
    *capital = 0.0;
    Some(withdrawn)
}

/// Equivalent monthly rate for an annual rate compounded twelve times.
pub fn monthly_rate(annual_rate: f64) -> f64 {
    (1.0 + annual_rate).powf(1.0 / MONTHS_PER_YEAR as f64) - 1.0
}

/// Cumulative price growth over `horizon` years.
pub fn inflation_erosion_factor(inflation_rate: f64, horizon: u32) -> f64 {
    (1.0 + inflation_rate).powi(horizon as i32)
}

/// Deflates a final nominal amount by the erosion over the whole horizon.
pub fn adjust_for_inflation(amount: f64, params: &SimulationParameters) -> f64 {
    amount / inflation_erosion_factor(params.inflation_rate, params.horizon())
}

/// Annual and monthly annuity from the final occupational capital.
pub fn estimate_annuity(result: &ProjectionResult) -> AnnuityEstimate {
    let annual = result.occupational_nominal * ANNUITY_CONVERSION_RATE;
    AnnuityEstimate {
        conversion_rate: ANNUITY_CONVERSION_RATE,
        annual,
        monthly: annual / MONTHS_PER_YEAR as f64,
    }
}

fn merge_years(
    occupational: &[OccupationalYear],
    personal_savings: &[SavingsYear],
    indexed: &[SavingsYear],
    withdrawal_year: Option<u32>,
) -> (Vec<YearlyRecord>, f64) {
    let mut withdrawal_total = 0.0;
    let mut records = Vec::with_capacity(occupational.len());

    for ((occ, savings), idx) in occupational.iter().zip(personal_savings).zip(indexed) {
        let withdrawal = if withdrawal_year == Some(occ.year) {
            let amount = occ.withdrawal.unwrap_or(0.0) + savings.withdrawal.unwrap_or(0.0);
            withdrawal_total = amount;
            Some(amount)
        } else {
            None
        };

        records.push(YearlyRecord {
            year: occ.year,
            age: occ.age,
            gross_salary: occ.gross_salary,
            coordinated_salary: occ.coordinated_salary,
            insured_salary: occ.insured_salary,
            employee_rate: occ.employee_rate,
            employer_rate: occ.employer_rate,
            employee_contribution: occ.employee_contribution,
            employer_contribution: occ.employer_contribution,
            total_contribution: occ.total_contribution,
            occupational_capital: occ.capital,
            personal_savings_capital: savings.capital,
            personal_savings_contribution: savings.contribution,
            indexed_capital: idx.capital,
            indexed_contribution: idx.contribution,
            total_capital: occ.capital + savings.capital + idx.capital,
            withdrawal,
        });
    }

    (records, withdrawal_total)
}
