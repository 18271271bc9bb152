use serde::Serialize;

use super::error::ValidationError;

/// Conversion rate applied to the final occupational capital to estimate an annuity.
pub const ANNUITY_CONVERSION_RATE: f64 = 0.055;

pub const DEFAULT_EMPLOYEE_RATES: BandRates = BandRates {
    under_30: 0.07,
    from_30_to_39: 0.10,
    from_40_to_49: 0.15,
    from_50: 0.18,
};

pub const DEFAULT_EMPLOYER_RATES: BandRates = BandRates {
    under_30: 0.08,
    from_30_to_39: 0.11,
    from_40_to_49: 0.16,
    from_50: 0.19,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AgeBand {
    Under30,
    From30To39,
    From40To49,
    From50,
}

impl AgeBand {
    pub const ALL: [AgeBand; 4] = [
        AgeBand::Under30,
        AgeBand::From30To39,
        AgeBand::From40To49,
        AgeBand::From50,
    ];

    pub fn for_age(age: u32) -> Self {
        if age < 30 {
            AgeBand::Under30
        } else if age < 40 {
            AgeBand::From30To39
        } else if age < 50 {
            AgeBand::From40To49
        } else {
            AgeBand::From50
        }
    }
}

/// Contribution rates (fractions) keyed by age band.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandRates {
    pub under_30: f64,
    pub from_30_to_39: f64,
    pub from_40_to_49: f64,
    pub from_50: f64,
}

impl BandRates {
    pub fn rate_for_band(&self, band: AgeBand) -> f64 {
        match band {
            AgeBand::Under30 => self.under_30,
            AgeBand::From30To39 => self.from_30_to_39,
            AgeBand::From40To49 => self.from_40_to_49,
            AgeBand::From50 => self.from_50,
        }
    }

    pub fn rate_for_age(&self, age: u32) -> f64 {
        self.rate_for_band(AgeBand::for_age(age))
    }
}

/// Assumptions for one person's projection. Rates are fractions, not percentages.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParameters {
    pub current_age: u32,
    pub retirement_age: u32,
    pub initial_salary: f64,
    pub initial_occupational_capital: f64,
    pub salary_growth_rate: f64,
    pub personal_savings_monthly: f64,
    pub personal_savings_rate: f64,
    pub indexed_monthly: f64,
    pub indexed_gross_rate: f64,
    pub dividend_yield: f64,
    pub dividend_tax_rate: f64,
    pub occupational_rate: f64,
    pub inflation_rate: f64,
    pub coordination_deduction: f64,
    pub insured_salary_ceiling: f64,
    pub supplementary_coverage: bool,
    pub employee_rates: BandRates,
    pub employer_rates: BandRates,
}

impl SimulationParameters {
    /// Number of simulated years. Zero when the ages are inverted.
    pub fn horizon(&self) -> u32 {
        self.retirement_age.saturating_sub(self.current_age)
    }

    /// Return on the indexed account after tax on its dividend share.
    pub fn indexed_net_rate(&self) -> f64 {
        self.indexed_gross_rate - self.dividend_yield * self.dividend_tax_rate
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.retirement_age <= self.current_age {
            return Err(ValidationError::RetirementNotAfterCurrent {
                current_age: self.current_age,
                retirement_age: self.retirement_age,
            });
        }
        Ok(())
    }

    pub fn validate_withdrawal_year(
        &self,
        withdrawal_year: Option<u32>,
    ) -> Result<(), ValidationError> {
        validate_withdrawal_year(withdrawal_year, self.horizon())
    }
}

pub(crate) fn validate_withdrawal_year(
    withdrawal_year: Option<u32>,
    max_year: u32,
) -> Result<(), ValidationError> {
    match withdrawal_year {
        Some(year) if year == 0 || year > max_year => {
            Err(ValidationError::WithdrawalYearOutOfRange {
                year,
                max: max_year,
            })
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupationalYear {
    pub year: u32,
    pub age: u32,
    pub gross_salary: f64,
    pub coordinated_salary: f64,
    pub insured_salary: f64,
    pub employee_rate: f64,
    pub employer_rate: f64,
    pub employee_contribution: f64,
    pub employer_contribution: f64,
    pub total_contribution: f64,
    pub capital: f64,
    pub withdrawal: Option<f64>,
}

/// Year-end state of a monthly-compounded account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsYear {
    pub year: u32,
    pub age: u32,
    pub capital: f64,
    pub contribution: f64,
    pub withdrawal: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyRecord {
    pub year: u32,
    pub age: u32,
    pub gross_salary: f64,
    pub coordinated_salary: f64,
    pub insured_salary: f64,
    pub employee_rate: f64,
    pub employer_rate: f64,
    pub employee_contribution: f64,
    pub employer_contribution: f64,
    pub total_contribution: f64,
    pub occupational_capital: f64,
    pub personal_savings_capital: f64,
    pub personal_savings_contribution: f64,
    pub indexed_capital: f64,
    pub indexed_contribution: f64,
    pub total_capital: f64,
    pub withdrawal: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub occupational_nominal: f64,
    pub personal_savings_nominal: f64,
    pub indexed_nominal: f64,
    pub total_nominal: f64,
    pub occupational_real: f64,
    pub personal_savings_real: f64,
    pub indexed_real: f64,
    pub total_real: f64,
    pub personal_savings_contributions: f64,
    pub indexed_contributions: f64,
    pub occupational_contributions: f64,
    pub occupational_employee_contributions: f64,
    pub occupational_employer_contributions: f64,
    pub yearly: Vec<YearlyRecord>,
    pub withdrawal_year: Option<u32>,
    pub withdrawal_total: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnuityEstimate {
    pub conversion_rate: f64,
    pub annual: f64,
    pub monthly: f64,
}
