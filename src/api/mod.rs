use std::ffi::OsString;
use std::net::SocketAddr;

use axum::{
    Router,
    extract::{
        Json, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    AgeBand, AnnuityEstimate, BandRates, ExportError, HouseholdProjection, HouseholdTotals,
    ProjectionResult, SimulationParameters, ValidationError, estimate_annuity, project,
    run_household, yearly_csv_string,
};

const CSV_FILENAME: &str = "projection.csv";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliOutputFormat {
    Summary,
    Csv,
    Json,
}

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(
    name = "pillars",
    about = "Retirement capital projection (occupational scheme + personal savings + indexed investment)"
)]
struct Cli {
    #[arg(long, default_value_t = 40)]
    current_age: u32,
    #[arg(long, default_value_t = 65)]
    retirement_age: u32,
    #[arg(long, default_value_t = 2.0, help = "Annual inflation in percent")]
    inflation_rate: f64,
    #[arg(long, default_value_t = 78_000.0, help = "Gross annual salary")]
    gross_salary: f64,
    #[arg(long, default_value_t = 2.0, help = "Annual salary growth in percent")]
    salary_growth_rate: f64,
    #[arg(
        long,
        default_value_t = 2_000.0,
        help = "Capital already held in the occupational scheme"
    )]
    occupational_capital: f64,
    #[arg(
        long,
        default_value_t = 2.5,
        help = "Occupational scheme net annual return in percent"
    )]
    occupational_rate: f64,
    #[arg(
        long,
        default_value_t = 25_725.0,
        help = "Amount deducted from gross salary before contributions apply"
    )]
    coordination_deduction: f64,
    #[arg(
        long,
        default_value_t = 88_200.0,
        help = "Maximum insured (coordinated) salary"
    )]
    insured_salary_ceiling: f64,
    #[arg(
        long,
        help = "Insure the full coordinated salary, ignoring the ceiling"
    )]
    supplementary_coverage: bool,
    #[arg(long, default_value_t = 250.0)]
    personal_savings_monthly: f64,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Personal savings net annual return in percent"
    )]
    personal_savings_rate: f64,
    #[arg(long, default_value_t = 250.0)]
    indexed_monthly: f64,
    #[arg(
        long,
        default_value_t = 8.0,
        help = "Indexed investment gross annual return in percent"
    )]
    indexed_gross_rate: f64,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Dividend share of the indexed return in percent"
    )]
    dividend_yield: f64,
    #[arg(
        long,
        default_value_t = 25.0,
        help = "Marginal tax rate on dividends in percent"
    )]
    dividend_tax_rate: f64,
    #[arg(long, default_value_t = 7.0)]
    employee_rate_under_30: f64,
    #[arg(long, default_value_t = 10.0)]
    employee_rate_30_to_39: f64,
    #[arg(long, default_value_t = 15.0)]
    employee_rate_40_to_49: f64,
    #[arg(long, default_value_t = 18.0)]
    employee_rate_50_plus: f64,
    #[arg(long, default_value_t = 8.0)]
    employer_rate_under_30: f64,
    #[arg(long, default_value_t = 11.0)]
    employer_rate_30_to_39: f64,
    #[arg(long, default_value_t = 16.0)]
    employer_rate_40_to_49: f64,
    #[arg(long, default_value_t = 19.0)]
    employer_rate_50_plus: f64,
    #[arg(
        long,
        help = "Simulation year (1-based) in which occupational and personal savings are withdrawn"
    )]
    withdrawal_year: Option<u32>,
    #[arg(long, value_enum, default_value_t = CliOutputFormat::Summary)]
    output: CliOutputFormat,
}

impl Cli {
    fn employee_rates(&self) -> BandRates {
        BandRates {
            under_30: self.employee_rate_under_30,
            from_30_to_39: self.employee_rate_30_to_39,
            from_40_to_49: self.employee_rate_40_to_49,
            from_50: self.employee_rate_50_plus,
        }
    }

    fn employer_rates(&self) -> BandRates {
        BandRates {
            under_30: self.employer_rate_under_30,
            from_30_to_39: self.employer_rate_30_to_39,
            from_40_to_49: self.employer_rate_40_to_49,
            from_50: self.employer_rate_50_plus,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BandRatesPayload {
    under_30: Option<f64>,
    from_30_to_39: Option<f64>,
    from_40_to_49: Option<f64>,
    from_50: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProfilePayload {
    current_age: Option<u32>,
    retirement_age: Option<u32>,
    inflation_rate: Option<f64>,
    gross_salary: Option<f64>,
    salary_growth: Option<f64>,
    occupational_capital: Option<f64>,
    occupational_rate: Option<f64>,
    coordination_deduction: Option<f64>,
    insured_salary_ceiling: Option<f64>,
    supplementary_coverage: Option<bool>,
    savings_monthly: Option<f64>,
    savings_rate: Option<f64>,
    indexed_monthly: Option<f64>,
    indexed_rate: Option<f64>,
    dividend_yield: Option<f64>,
    dividend_tax_rate: Option<f64>,
    employee_rates: Option<BandRatesPayload>,
    employer_rates: Option<BandRatesPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectPayload {
    #[serde(flatten)]
    primary: ProfilePayload,
    withdrawal_year: Option<u32>,
    partner: Option<ProfilePayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct QueryOptions {
    withdrawal_year: Option<u32>,
}

#[derive(Debug)]
struct ProjectRequest {
    primary: SimulationParameters,
    partner: Option<SimulationParameters>,
    withdrawal_year: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    annuity: AnnuityEstimate,
    projection: ProjectionResult,
}

impl From<ProjectionResult> for ProfileResponse {
    fn from(projection: ProjectionResult) -> Self {
        Self {
            annuity: estimate_annuity(&projection),
            projection,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    withdrawal_year: Option<u32>,
    primary: ProfileResponse,
    partner: Option<ProfileResponse>,
    household: HouseholdTotals,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Args(#[from] clap::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

struct BandBounds {
    employee_flag: &'static str,
    employee: (f64, f64),
    employer_flag: &'static str,
    employer: (f64, f64),
}

fn band_bounds(band: AgeBand) -> BandBounds {
    match band {
        AgeBand::Under30 => BandBounds {
            employee_flag: "--employee-rate-under-30",
            employee: (4.0, 12.0),
            employer_flag: "--employer-rate-under-30",
            employer: (4.0, 15.0),
        },
        AgeBand::From30To39 => BandBounds {
            employee_flag: "--employee-rate-30-to-39",
            employee: (5.0, 15.0),
            employer_flag: "--employer-rate-30-to-39",
            employer: (5.0, 18.0),
        },
        AgeBand::From40To49 => BandBounds {
            employee_flag: "--employee-rate-40-to-49",
            employee: (6.0, 18.0),
            employer_flag: "--employer-rate-40-to-49",
            employer: (6.0, 20.0),
        },
        AgeBand::From50 => BandBounds {
            employee_flag: "--employee-rate-50-plus",
            employee: (8.0, 20.0),
            employer_flag: "--employer-rate-50-plus",
            employer: (8.0, 22.0),
        },
    }
}

fn ensure_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn percent_rates(rates: BandRates) -> BandRates {
    BandRates {
        under_30: rates.under_30 / 100.0,
        from_30_to_39: rates.from_30_to_39 / 100.0,
        from_40_to_49: rates.from_40_to_49 / 100.0,
        from_50: rates.from_50 / 100.0,
    }
}

fn build_parameters(cli: Cli) -> Result<SimulationParameters, ValidationError> {
    if cli.retirement_age <= cli.current_age {
        return Err(ValidationError::RetirementNotAfterCurrent {
            current_age: cli.current_age,
            retirement_age: cli.retirement_age,
        });
    }

    ensure_range("--current-age", cli.current_age as f64, 18.0, 64.0)?;
    ensure_range(
        "--retirement-age",
        cli.retirement_age as f64,
        (cli.current_age + 1) as f64,
        70.0,
    )?;
    ensure_range("--inflation-rate", cli.inflation_rate, 0.0, 4.0)?;
    ensure_range("--gross-salary", cli.gross_salary, 30_000.0, 300_000.0)?;
    ensure_range("--salary-growth-rate", cli.salary_growth_rate, -2.0, 5.0)?;
    ensure_range("--occupational-capital", cli.occupational_capital, 0.0, 2_000_000.0)?;
    ensure_range("--occupational-rate", cli.occupational_rate, 0.5, 3.5)?;
    ensure_range("--coordination-deduction", cli.coordination_deduction, 0.0, 40_000.0)?;
    ensure_range("--insured-salary-ceiling", cli.insured_salary_ceiling, 0.0, 120_000.0)?;
    ensure_range("--personal-savings-monthly", cli.personal_savings_monthly, 0.0, 600.0)?;
    ensure_range("--personal-savings-rate", cli.personal_savings_rate, 0.5, 4.0)?;
    ensure_range("--indexed-monthly", cli.indexed_monthly, 0.0, 2_000.0)?;
    ensure_range("--indexed-gross-rate", cli.indexed_gross_rate, 4.0, 12.0)?;
    ensure_range("--dividend-yield", cli.dividend_yield, 1.0, 3.0)?;
    ensure_range("--dividend-tax-rate", cli.dividend_tax_rate, 0.0, 40.0)?;

    let employee_rates = cli.employee_rates();
    let employer_rates = cli.employer_rates();
    for band in AgeBand::ALL {
        let bounds = band_bounds(band);
        ensure_range(
            bounds.employee_flag,
            employee_rates.rate_for_band(band),
            bounds.employee.0,
            bounds.employee.1,
        )?;
        ensure_range(
            bounds.employer_flag,
            employer_rates.rate_for_band(band),
            bounds.employer.0,
            bounds.employer.1,
        )?;
    }

    let params = SimulationParameters {
        current_age: cli.current_age,
        retirement_age: cli.retirement_age,
        initial_salary: cli.gross_salary,
        initial_occupational_capital: cli.occupational_capital,
        salary_growth_rate: cli.salary_growth_rate / 100.0,
        personal_savings_monthly: cli.personal_savings_monthly,
        personal_savings_rate: cli.personal_savings_rate / 100.0,
        indexed_monthly: cli.indexed_monthly,
        indexed_gross_rate: cli.indexed_gross_rate / 100.0,
        dividend_yield: cli.dividend_yield / 100.0,
        dividend_tax_rate: cli.dividend_tax_rate / 100.0,
        occupational_rate: cli.occupational_rate / 100.0,
        inflation_rate: cli.inflation_rate / 100.0,
        coordination_deduction: cli.coordination_deduction,
        insured_salary_ceiling: cli.insured_salary_ceiling,
        supplementary_coverage: cli.supplementary_coverage,
        employee_rates: percent_rates(employee_rates),
        employer_rates: percent_rates(employer_rates),
    };
    params.validate()?;
    Ok(params)
}

/// Parses command-line arguments, runs the projection and renders it.
pub fn run_cli<I, T>(args: I) -> Result<String, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args)?;
    let output = cli.output;
    let withdrawal_year = cli.withdrawal_year;
    let params = build_parameters(cli)?;
    let result = project(&params, withdrawal_year)?;

    match output {
        CliOutputFormat::Summary => Ok(render_summary(&params, &result)),
        CliOutputFormat::Csv => Ok(yearly_csv_string(&result)?),
        CliOutputFormat::Json => {
            let body = ProfileResponse::from(result);
            Ok(format!("{}\n", serde_json::to_string_pretty(&body)?))
        }
    }
}

fn render_summary(params: &SimulationParameters, result: &ProjectionResult) -> String {
    let annuity = estimate_annuity(result);
    let mut lines = vec![
        format!(
            "Horizon: {} years (age {} -> {})",
            params.horizon(),
            params.current_age,
            params.retirement_age
        ),
        format!(
            "Occupational scheme:  {:>14.0} nominal {:>14.0} real",
            result.occupational_nominal, result.occupational_real
        ),
        format!(
            "Personal savings:     {:>14.0} nominal {:>14.0} real",
            result.personal_savings_nominal, result.personal_savings_real
        ),
        format!(
            "Indexed investment:   {:>14.0} nominal {:>14.0} real",
            result.indexed_nominal, result.indexed_real
        ),
        format!(
            "Total:                {:>14.0} nominal {:>14.0} real",
            result.total_nominal, result.total_real
        ),
        format!(
            "Occupational contributions: {:.0} (employee {:.0}, employer {:.0})",
            result.occupational_contributions,
            result.occupational_employee_contributions,
            result.occupational_employer_contributions
        ),
        format!(
            "Personal savings contributions: {:.0}",
            result.personal_savings_contributions
        ),
        format!(
            "Indexed investment contributions: {:.0}",
            result.indexed_contributions
        ),
        format!(
            "Estimated annuity at {:.1}%: {:.0} per year, {:.0} per month",
            annuity.conversion_rate * 100.0,
            annuity.annual,
            annuity.monthly
        ),
    ];
    if let Some(year) = result.withdrawal_year {
        lines.push(format!(
            "Withdrawal in year {year}: {:.0}",
            result.withdrawal_total
        ));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("projection HTTP API listening on http://{addr}");
    info!("local access: http://127.0.0.1:{port}/api/project");

    axum::serve(listener, router()).await
}

fn router() -> Router {
    Router::new()
        .route(
            "/api/project",
            get(project_get_handler).post(project_post_handler),
        )
        .route(
            "/api/project.csv",
            get(project_csv_get_handler).post(project_csv_post_handler),
        )
        .fallback(not_found_handler)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_get_handler(
    primary: Result<Query<ProfilePayload>, QueryRejection>,
    options: Result<Query<QueryOptions>, QueryRejection>,
) -> Response {
    match query_payload(primary, options) {
        Ok(payload) => project_handler_impl(payload).await,
        Err(response) => response,
    }
}

async fn project_post_handler(payload: Result<Json<ProjectPayload>, JsonRejection>) -> Response {
    match payload {
        Ok(Json(payload)) => project_handler_impl(payload).await,
        Err(err) => malformed_request(err.status(), &err.body_text()),
    }
}

async fn project_csv_get_handler(
    primary: Result<Query<ProfilePayload>, QueryRejection>,
    options: Result<Query<QueryOptions>, QueryRejection>,
) -> Response {
    match query_payload(primary, options) {
        Ok(payload) => project_csv_handler_impl(payload).await,
        Err(response) => response,
    }
}

async fn project_csv_post_handler(
    payload: Result<Json<ProjectPayload>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(payload)) => project_csv_handler_impl(payload).await,
        Err(err) => malformed_request(err.status(), &err.body_text()),
    }
}

/// Query strings only carry flat profile keys; band rate tables need a JSON body.
fn query_payload(
    primary: Result<Query<ProfilePayload>, QueryRejection>,
    options: Result<Query<QueryOptions>, QueryRejection>,
) -> Result<ProjectPayload, Response> {
    let Query(primary) = primary.map_err(|e| malformed_request(e.status(), &e.body_text()))?;
    let Query(options) = options.map_err(|e| malformed_request(e.status(), &e.body_text()))?;
    Ok(ProjectPayload {
        primary,
        withdrawal_year: options.withdrawal_year,
        partner: None,
    })
}

fn malformed_request(status: StatusCode, reason: &str) -> Response {
    warn!(%status, reason, "malformed projection request");
    error_response(status, reason)
}

async fn project_handler_impl(payload: ProjectPayload) -> Response {
    let household = match household_from_payload(payload) {
        Ok(household) => household,
        Err(err) => return rejected(&err),
    };
    json_response(StatusCode::OK, build_project_response(household))
}

async fn project_csv_handler_impl(payload: ProjectPayload) -> Response {
    let household = match household_from_payload(payload) {
        Ok(household) => household,
        Err(err) => return rejected(&err),
    };
    match yearly_csv_string(&household.primary) {
        Ok(body) => with_cache_control((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{CSV_FILENAME}\""),
                ),
            ],
            body,
        )),
        Err(err) => {
            warn!(%err, "CSV export failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "CSV export failed")
        }
    }
}

fn household_from_payload(
    payload: ProjectPayload,
) -> Result<HouseholdProjection, ValidationError> {
    let request = api_request_from_payload(payload)?;
    run_household(
        &request.primary,
        request.partner.as_ref(),
        request.withdrawal_year,
    )
}

fn rejected(err: &ValidationError) -> Response {
    warn!(%err, "rejected projection request");
    error_response(StatusCode::BAD_REQUEST, &err.to_string())
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ProjectRequest, String> {
    let payload = serde_json::from_str::<ProjectPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload).map_err(|e| e.to_string())
}

fn api_request_from_payload(
    payload: ProjectPayload,
) -> Result<ProjectRequest, ValidationError> {
    let mut primary_cli = default_cli_for_api();
    apply_profile_overrides(&mut primary_cli, &payload.primary);

    let partner_cli = payload.partner.as_ref().map(|partner| {
        let mut cli = primary_cli.clone();
        apply_profile_overrides(&mut cli, partner);
        cli
    });

    let primary = build_parameters(primary_cli)?;
    let partner = partner_cli
        .map(build_parameters)
        .transpose()
        .map_err(|e| ValidationError::Partner(Box::new(e)))?;

    Ok(ProjectRequest {
        primary,
        partner,
        withdrawal_year: payload.withdrawal_year,
    })
}

fn apply_profile_overrides(cli: &mut Cli, payload: &ProfilePayload) {
    if let Some(v) = payload.current_age {
        cli.current_age = v;
    }
    if let Some(v) = payload.retirement_age {
        cli.retirement_age = v;
    }
    if let Some(v) = payload.inflation_rate {
        cli.inflation_rate = v;
    }

    if let Some(v) = payload.gross_salary {
        cli.gross_salary = v;
    }
    if let Some(v) = payload.salary_growth {
        cli.salary_growth_rate = v;
    }
    if let Some(v) = payload.occupational_capital {
        cli.occupational_capital = v;
    }
    if let Some(v) = payload.occupational_rate {
        cli.occupational_rate = v;
    }
    if let Some(v) = payload.coordination_deduction {
        cli.coordination_deduction = v;
    }
    if let Some(v) = payload.insured_salary_ceiling {
        cli.insured_salary_ceiling = v;
    }
    if let Some(v) = payload.supplementary_coverage {
        cli.supplementary_coverage = v;
    }

    if let Some(v) = payload.savings_monthly {
        cli.personal_savings_monthly = v;
    }
    if let Some(v) = payload.savings_rate {
        cli.personal_savings_rate = v;
    }
    if let Some(v) = payload.indexed_monthly {
        cli.indexed_monthly = v;
    }
    if let Some(v) = payload.indexed_rate {
        cli.indexed_gross_rate = v;
    }
    if let Some(v) = payload.dividend_yield {
        cli.dividend_yield = v;
    }
    if let Some(v) = payload.dividend_tax_rate {
        cli.dividend_tax_rate = v;
    }

    if let Some(rates) = payload.employee_rates {
        if let Some(v) = rates.under_30 {
            cli.employee_rate_under_30 = v;
        }
        if let Some(v) = rates.from_30_to_39 {
            cli.employee_rate_30_to_39 = v;
        }
        if let Some(v) = rates.from_40_to_49 {
            cli.employee_rate_40_to_49 = v;
        }
        if let Some(v) = rates.from_50 {
            cli.employee_rate_50_plus = v;
        }
    }
    if let Some(rates) = payload.employer_rates {
        if let Some(v) = rates.under_30 {
            cli.employer_rate_under_30 = v;
        }
        if let Some(v) = rates.from_30_to_39 {
            cli.employer_rate_30_to_39 = v;
        }
        if let Some(v) = rates.from_40_to_49 {
            cli.employer_rate_40_to_49 = v;
        }
        if let Some(v) = rates.from_50 {
            cli.employer_rate_50_plus = v;
        }
    }
}

fn default_cli_for_api() -> Cli {
    Cli {
        current_age: 40,
        retirement_age: 65,
        inflation_rate: 2.0,
        gross_salary: 78_000.0,
        salary_growth_rate: 2.0,
        occupational_capital: 2_000.0,
        occupational_rate: 2.5,
        coordination_deduction: 25_725.0,
        insured_salary_ceiling: 88_200.0,
        supplementary_coverage: false,
        personal_savings_monthly: 250.0,
        personal_savings_rate: 2.0,
        indexed_monthly: 250.0,
        indexed_gross_rate: 8.0,
        dividend_yield: 2.0,
        dividend_tax_rate: 25.0,
        employee_rate_under_30: 7.0,
        employee_rate_30_to_39: 10.0,
        employee_rate_40_to_49: 15.0,
        employee_rate_50_plus: 18.0,
        employer_rate_under_30: 8.0,
        employer_rate_30_to_39: 11.0,
        employer_rate_40_to_49: 16.0,
        employer_rate_50_plus: 19.0,
        withdrawal_year: None,
        output: CliOutputFormat::Summary,
    }
}

fn build_project_response(household: HouseholdProjection) -> ProjectResponse {
    ProjectResponse {
        withdrawal_year: household.primary.withdrawal_year,
        primary: household.primary.into(),
        partner: household.partner.map(ProfileResponse::from),
        household: household.totals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DEFAULT_EMPLOYEE_RATES, DEFAULT_EMPLOYER_RATES};
    use axum::body::{Body, to_bytes};
    use axum::http::{HeaderMap, Request};
    use tower::ServiceExt;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_cli() -> Cli {
        default_cli_for_api()
    }

    #[test]
    fn default_cli_matches_command_line_defaults() {
        let parsed = Cli::try_parse_from(["pillars"]).expect("defaults should parse");
        assert_eq!(parsed, default_cli_for_api());
    }

    #[test]
    fn build_parameters_converts_percentages_to_fractions() {
        let params = build_parameters(sample_cli()).expect("valid inputs");

        assert_eq!(params.horizon(), 25);
        assert_approx(params.inflation_rate, 0.02);
        assert_approx(params.salary_growth_rate, 0.02);
        assert_approx(params.occupational_rate, 0.025);
        assert_approx(params.personal_savings_rate, 0.02);
        assert_approx(params.indexed_gross_rate, 0.08);
        assert_approx(params.dividend_yield, 0.02);
        assert_approx(params.dividend_tax_rate, 0.25);
        assert_approx(params.indexed_net_rate(), 0.075);
        assert_approx(params.initial_occupational_capital, 2_000.0);
        assert_eq!(params.employee_rates, DEFAULT_EMPLOYEE_RATES);
        assert_eq!(params.employer_rates, DEFAULT_EMPLOYER_RATES);
    }

    #[test]
    fn build_parameters_rejects_retirement_not_after_current_age() {
        let mut cli = sample_cli();
        cli.current_age = 50;
        cli.retirement_age = 50;

        let err = build_parameters(cli).expect_err("must reject equal ages");
        assert_eq!(
            err,
            ValidationError::RetirementNotAfterCurrent {
                current_age: 50,
                retirement_age: 50,
            }
        );
    }

    #[test]
    fn build_parameters_rejects_out_of_range_fields() {
        let cases: [(&str, fn(&mut Cli)); 7] = [
            ("--current-age", |cli| cli.current_age = 17),
            ("--retirement-age", |cli| cli.retirement_age = 71),
            ("--inflation-rate", |cli| cli.inflation_rate = 4.5),
            ("--gross-salary", |cli| cli.gross_salary = 29_999.0),
            ("--salary-growth-rate", |cli| cli.salary_growth_rate = -2.5),
            ("--personal-savings-monthly", |cli| {
                cli.personal_savings_monthly = 601.0
            }),
            ("--dividend-tax-rate", |cli| cli.dividend_tax_rate = f64::NAN),
        ];

        for (field, mutate) in cases {
            let mut cli = sample_cli();
            mutate(&mut cli);
            let err = build_parameters(cli).expect_err("must reject out of range value");
            assert!(
                matches!(err, ValidationError::OutOfRange { field: f, .. } if f == field),
                "expected {field} to be rejected, got {err}"
            );
        }
    }

    #[test]
    fn build_parameters_checks_each_band_against_its_own_bounds() {
        let mut cli = sample_cli();
        cli.employee_rate_50_plus = 7.5;
        let err = build_parameters(cli).expect_err("below 50+ employee minimum");
        assert!(err.to_string().contains("--employee-rate-50-plus"));

        let mut cli = sample_cli();
        cli.employer_rate_40_to_49 = 20.0;
        cli.employee_rate_under_30 = 12.0;
        assert!(build_parameters(cli).is_ok());

        let mut cli = sample_cli();
        cli.employer_rate_under_30 = 15.5;
        let err = build_parameters(cli).expect_err("above under-30 employer maximum");
        assert!(err.to_string().contains("--employer-rate-under-30"));
    }

    #[test]
    fn api_request_from_json_parses_web_keys() {
        let json = r#"{
          "currentAge": 35,
          "retirementAge": 64,
          "inflationRate": 1.5,
          "grossSalary": 95000,
          "salaryGrowth": 1,
          "occupationalCapital": 40000,
          "occupationalRate": 2,
          "coordinationDeduction": 26000,
          "insuredSalaryCeiling": 90000,
          "supplementaryCoverage": true,
          "savingsMonthly": 588,
          "savingsRate": 1.5,
          "indexedMonthly": 500,
          "indexedRate": 9,
          "dividendYield": 1.8,
          "dividendTaxRate": 30,
          "employeeRates": { "under30": 8, "from30To39": 11 },
          "employerRates": { "from50": 20 },
          "withdrawalYear": 12
        }"#;
        let request = api_request_from_json(json).expect("json should parse");
        let params = request.primary;

        assert_eq!(params.current_age, 35);
        assert_eq!(params.retirement_age, 64);
        assert_approx(params.inflation_rate, 0.015);
        assert_approx(params.initial_salary, 95_000.0);
        assert_approx(params.salary_growth_rate, 0.01);
        assert_approx(params.initial_occupational_capital, 40_000.0);
        assert_approx(params.occupational_rate, 0.02);
        assert_approx(params.coordination_deduction, 26_000.0);
        assert_approx(params.insured_salary_ceiling, 90_000.0);
        assert!(params.supplementary_coverage);
        assert_approx(params.personal_savings_monthly, 588.0);
        assert_approx(params.personal_savings_rate, 0.015);
        assert_approx(params.indexed_monthly, 500.0);
        assert_approx(params.indexed_gross_rate, 0.09);
        assert_approx(params.dividend_yield, 0.018);
        assert_approx(params.dividend_tax_rate, 0.30);
        assert_approx(params.employee_rates.under_30, 0.08);
        assert_approx(params.employee_rates.from_30_to_39, 0.11);
        assert_approx(params.employee_rates.from_40_to_49, 0.15);
        assert_approx(params.employer_rates.from_50, 0.20);
        assert_approx(params.employer_rates.under_30, 0.08);
        assert_eq!(request.withdrawal_year, Some(12));
        assert!(request.partner.is_none());
    }

    #[test]
    fn partner_inherits_unspecified_fields_from_primary() {
        let json = r#"{
          "currentAge": 45,
          "grossSalary": 120000,
          "savingsMonthly": 500,
          "partner": { "currentAge": 38, "retirementAge": 64 }
        }"#;
        let request = api_request_from_json(json).expect("json should parse");
        let partner = request.partner.expect("partner expected");

        assert_eq!(partner.current_age, 38);
        assert_eq!(partner.retirement_age, 64);
        assert_approx(partner.initial_salary, 120_000.0);
        assert_approx(partner.personal_savings_monthly, 500.0);
        assert_eq!(request.primary.current_age, 45);
        assert_eq!(request.primary.retirement_age, 65);
    }

    #[test]
    fn invalid_partner_is_reported_separately() {
        let json = r#"{ "partner": { "currentAge": 60, "retirementAge": 60 } }"#;
        let err = api_request_from_json(json).expect_err("partner ages are invalid");
        assert!(err.starts_with("partner profile:"), "{err}");
    }

    #[test]
    fn household_rejects_withdrawal_beyond_shorter_horizon() {
        let json = r#"{
          "withdrawalYear": 8,
          "partner": { "currentAge": 58, "retirementAge": 65 }
        }"#;
        let payload = serde_json::from_str::<ProjectPayload>(json).expect("json should parse");
        let err = household_from_payload(payload).expect_err("partner horizon is 7 years");
        assert_eq!(
            err,
            ValidationError::WithdrawalYearOutOfRange { year: 8, max: 7 }
        );
    }

    #[test]
    fn project_response_serialization_contains_expected_fields() {
        let json = r#"{
          "withdrawalYear": 5,
          "partner": { "currentAge": 42 }
        }"#;
        let payload = serde_json::from_str::<ProjectPayload>(json).expect("json should parse");
        let household = household_from_payload(payload).expect("valid household");
        let response = build_project_response(household);
        let json = serde_json::to_string(&response).expect("response should serialize");

        assert!(json.contains("\"withdrawalYear\":5"));
        assert!(json.contains("\"primary\""));
        assert!(json.contains("\"partner\""));
        assert!(json.contains("\"household\""));
        assert!(json.contains("\"annuity\""));
        assert!(json.contains("\"conversionRate\":0.055"));
        assert!(json.contains("\"totalNominal\""));
        assert!(json.contains("\"totalReal\""));
        assert!(json.contains("\"yearly\""));
        assert!(json.contains("\"coordinatedSalary\""));
        assert!(json.contains("\"withdrawalTotal\""));
    }

    async fn send(request: Request<Body>) -> (StatusCode, HeaderMap, String) {
        let response = router()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        let body = String::from_utf8(bytes.to_vec()).expect("utf-8 body");
        (status, headers, body)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("valid request")
    }

    #[tokio::test]
    async fn get_project_reads_query_keys_and_withdrawal_year() {
        let (status, headers, body) = send(get_request(
            "/api/project?currentAge=50&retirementAge=60&inflationRate=1&savingsMonthly=400&withdrawalYear=4",
        ))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
        let value: serde_json::Value = serde_json::from_str(&body).expect("json body");
        let projection = &value["primary"]["projection"];

        assert_eq!(value["withdrawalYear"], 4);
        assert_eq!(projection["withdrawalYear"], 4);
        assert_eq!(projection["yearly"].as_array().map(Vec::len), Some(10));
        assert_eq!(projection["yearly"][0]["age"], 51);
        assert_approx(
            projection["personalSavingsContributions"]
                .as_f64()
                .expect("contributions"),
            400.0 * 12.0 * 10.0,
        );
        let nominal = projection["totalNominal"].as_f64().expect("nominal");
        let real = projection["totalReal"].as_f64().expect("real");
        assert!((real - nominal / 1.01_f64.powi(10)).abs() < 1e-6);
        assert!(value["partner"].is_null());
    }

    #[tokio::test]
    async fn get_project_csv_downloads_primary_table() {
        let (status, headers, body) =
            send(get_request("/api/project.csv?currentAge=60&withdrawalYear=2")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"projection.csv\""
        );
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].ends_with(",withdrawal_total"));
    }

    #[tokio::test]
    async fn malformed_query_is_rejected_as_json() {
        for uri in [
            "/api/project?employeeRates=5",
            "/api/project?currentAge=forty",
            "/api/project.csv?withdrawalYear=-1",
        ] {
            let (status, _, body) = send(get_request(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            let value: serde_json::Value = serde_json::from_str(&body).expect("json error body");
            assert!(value["error"].is_string(), "{uri}: {body}");
        }
    }

    #[tokio::test]
    async fn invalid_ages_in_query_return_validation_message() {
        let (status, _, body) =
            send(get_request("/api/project?currentAge=45&retirementAge=45")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let value: serde_json::Value = serde_json::from_str(&body).expect("json error body");
        assert_eq!(
            value["error"],
            "retirement age (45) must be greater than current age (45)"
        );
    }

    #[tokio::test]
    async fn post_project_accepts_partner_and_rejects_bad_json() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/project")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"withdrawalYear":3,"partner":{"currentAge":45}}"#))
            .expect("valid request");
        let (status, _, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(
            value["partner"]["projection"]["yearly"]
                .as_array()
                .map(Vec::len),
            Some(20)
        );

        let request = Request::builder()
            .method("POST")
            .uri("/api/project")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .expect("valid request");
        let (status, _, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let value: serde_json::Value = serde_json::from_str(&body).expect("json error body");
        assert!(value["error"].is_string());
    }

    #[tokio::test]
    async fn unknown_route_returns_json_not_found() {
        let (status, _, body) = send(get_request("/api/unknown")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, r#"{"error":"Not found"}"#);
    }

    #[test]
    fn run_cli_prints_csv_with_one_row_per_year() {
        let output = run_cli([
            "pillars",
            "--current-age",
            "60",
            "--retirement-age",
            "65",
            "--output",
            "csv",
        ])
        .expect("cli should run");
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("year,age,gross_salary"));
        assert!(lines[5].starts_with("5,65,"));
    }

    #[test]
    fn run_cli_summary_reports_withdrawal() {
        let output = run_cli(["pillars", "--withdrawal-year", "3"]).expect("cli should run");
        assert!(output.contains("Horizon: 25 years (age 40 -> 65)"));
        assert!(output.contains("Estimated annuity at 5.5%"));
        assert!(output.contains("Withdrawal in year 3:"));
    }

    #[test]
    fn run_cli_rejects_invalid_inputs() {
        let err = run_cli(["pillars", "--current-age", "64", "--retirement-age", "64"])
            .expect_err("must reject equal ages");
        assert!(matches!(
            err,
            CliError::Validation(ValidationError::RetirementNotAfterCurrent { .. })
        ));

        let err = run_cli(["pillars", "--withdrawal-year", "26"]).expect_err("beyond horizon");
        assert!(matches!(
            err,
            CliError::Validation(ValidationError::WithdrawalYearOutOfRange { year: 26, max: 25 })
        ));

        let err = run_cli(["pillars", "--current-age", "forty"]).expect_err("not a number");
        assert!(matches!(err, CliError::Args(_)));
    }

    #[test]
    fn run_cli_json_includes_annuity_and_projection() {
        let output = run_cli(["pillars", "--output", "json"]).expect("cli should run");
        let value: serde_json::Value = serde_json::from_str(&output).expect("valid json");

        let annual = value["annuity"]["annual"].as_f64().expect("annual annuity");
        let occupational = value["projection"]["occupationalNominal"]
            .as_f64()
            .expect("occupational capital");
        assert_approx(annual, occupational * 0.055);
        assert_eq!(
            value["projection"]["yearly"].as_array().map(Vec::len),
            Some(25)
        );
    }
}
