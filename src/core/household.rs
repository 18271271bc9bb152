use serde::Serialize;
use tracing::debug;

use super::engine::run_projection;
use super::error::ValidationError;
use super::types::{ProjectionResult, SimulationParameters, validate_withdrawal_year};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdTotals {
    pub total_nominal: f64,
    pub total_real: f64,
    pub withdrawal_total: f64,
}

#[derive(Debug, Clone)]
pub struct HouseholdProjection {
    pub primary: ProjectionResult,
    pub partner: Option<ProjectionResult>,
    pub totals: HouseholdTotals,
}

/// Projects one or two people independently against the same withdrawal year.
///
/// Every profile and the withdrawal year are validated before any projection
/// runs; the withdrawal year must fit inside the shorter of the two horizons.
pub fn run_household(
    primary: &SimulationParameters,
    partner: Option<&SimulationParameters>,
    withdrawal_year: Option<u32>,
) -> Result<HouseholdProjection, ValidationError> {
    primary.validate()?;
    if let Some(partner) = partner {
        partner
            .validate()
            .map_err(|e| ValidationError::Partner(Box::new(e)))?;
    }

    let min_horizon = partner
        .map(|p| p.horizon().min(primary.horizon()))
        .unwrap_or_else(|| primary.horizon());
    validate_withdrawal_year(withdrawal_year, min_horizon)?;

    debug!(
        with_partner = partner.is_some(),
        min_horizon, "running household projection"
    );

    let primary_result = run_projection(primary, withdrawal_year);
    let partner_result = partner.map(|p| run_projection(p, withdrawal_year));

    let mut totals = HouseholdTotals {
        total_nominal: primary_result.total_nominal,
        total_real: primary_result.total_real,
        withdrawal_total: primary_result.withdrawal_total,
    };
    if let Some(result) = &partner_result {
        totals.total_nominal += result.total_nominal;
        totals.total_real += result.total_real;
        totals.withdrawal_total += result.withdrawal_total;
    }

    Ok(HouseholdProjection {
        primary: primary_result,
        partner: partner_result,
        totals,
    })
}
