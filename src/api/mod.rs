use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    extract::{Json, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::core::{
    AssetAllocation, CancelFlag, Deposit, DepositMatching, Projection, RecurringDepositChange,
    SimulationRequest, SimulationResult, SummaryOptions, combine, parse_date, simulate,
    simulate_with_cancel,
};
use crate::error::{SimError, SimResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiDepositMatching {
    Exact,
    #[serde(
        alias = "calendar-month",
        alias = "calendarMonth",
        alias = "calendar_month"
    )]
    Month,
}

impl From<ApiDepositMatching> for DepositMatching {
    fn from(value: ApiDepositMatching) -> Self {
        match value {
            ApiDepositMatching::Exact => DepositMatching::Exact,
            ApiDepositMatching::Month => DepositMatching::CalendarMonth,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AllocationPayload {
    allocation: f64,
    cagr: f64,
    volatility: f64,
}

impl From<&AllocationPayload> for AssetAllocation {
    fn from(value: &AllocationPayload) -> Self {
        AssetAllocation {
            weight_percent: value.allocation,
            annual_return: value.cagr,
            annual_volatility: value.volatility,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DatedAmountPayload {
    date: String,
    amount: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    allocations: Option<Vec<AllocationPayload>>,
    one_time_deposits: Vec<DatedAmountPayload>,
    #[serde(alias = "recurringChanges")]
    monthly_changes: Vec<DatedAmountPayload>,
    cycles: Option<i64>,
    years: Option<i64>,
    seed: Option<u64>,
    start_date: Option<String>,
    deposit_matching: Option<ApiDepositMatching>,
    include_dates: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryPayload {
    #[serde(default)]
    projections: Vec<Projection>,
    pension_tax_rate: Option<f64>,
    safe_withdrawal_rate: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Parses a JSON request body and runs it to completion on the calling thread.
pub fn simulate_json(json: &str, config: &AppConfig) -> SimResult<SimulationResult> {
    let payload = serde_json::from_str::<SimulatePayload>(json)?;
    let request = request_from_payload(payload, config)?;
    simulate(&request)
}

fn request_from_payload(payload: SimulatePayload, config: &AppConfig) -> SimResult<SimulationRequest> {
    let allocations = match payload.allocations {
        Some(list) if !list.is_empty() => list.iter().map(AssetAllocation::from).collect(),
        _ => return Err(SimError::invalid("No allocations provided")),
    };

    let one_time_deposits = payload
        .one_time_deposits
        .iter()
        .enumerate()
        .map(|(idx, d)| {
            Ok(Deposit {
                date: field_date("oneTimeDeposits", idx, &d.date)?,
                amount: d.amount,
            })
        })
        .collect::<SimResult<Vec<_>>>()?;

    let recurring_changes = payload
        .monthly_changes
        .iter()
        .enumerate()
        .map(|(idx, c)| {
            Ok(RecurringDepositChange {
                effective_date: field_date("monthlyChanges", idx, &c.date)?,
                monthly_amount: c.amount,
            })
        })
        .collect::<SimResult<Vec<_>>>()?;

    let start_date = payload
        .start_date
        .as_deref()
        .map(parse_date)
        .transpose()
        .map_err(|e| SimError::invalid(format!("startDate: {e}")))?;

    Ok(SimulationRequest {
        allocations,
        one_time_deposits,
        recurring_changes,
        cycles: resolve_count("cycles", payload.cycles, config.default_cycles, config.max_cycles)?,
        years: resolve_count("years", payload.years, config.default_years, config.max_years)?,
        seed: payload.seed,
        start_date,
        fallback_start_date: config.fallback_start_date,
        deposit_matching: payload
            .deposit_matching
            .map(DepositMatching::from)
            .unwrap_or_default(),
        include_dates: payload.include_dates,
    })
}

fn field_date(list: &str, idx: usize, raw: &str) -> SimResult<chrono::NaiveDate> {
    parse_date(raw).map_err(|e| SimError::invalid(format!("{list}[{idx}].date: {e}")))
}

// Negative counts clamp to zero; only the configured ceiling is enforced.
fn resolve_count(field: &str, value: Option<i64>, default: u32, max: u32) -> SimResult<u32> {
    let value = value.map(|v| v.max(0)).unwrap_or(default as i64);
    if value > max as i64 {
        return Err(SimError::invalid(format!("{field} must be <= {max}")));
    }
    Ok(value as u32)
}

/// Runs a simulation off the async executor. On timeout the in-flight path
/// workers are told to stop and `SimError::Timeout` is returned.
pub async fn run_simulation(request: SimulationRequest, limit: Duration) -> SimResult<SimulationResult> {
    let cancel = CancelFlag::new();
    let worker_cancel = cancel.clone();
    let task = tokio::task::spawn_blocking(move || simulate_with_cancel(&request, &worker_cancel));

    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(SimError::Internal(format!("simulation task failed: {join_err}"))),
        Err(_) => {
            cancel.cancel();
            Err(SimError::Timeout(limit))
        }
    }
}

pub fn router(config: AppConfig) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/simulate", post(simulate_handler))
        .route("/api/summary", post(summary_handler))
        .fallback(not_found_handler)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::new(config))
}

pub async fn run_http_server(config: AppConfig) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router(config);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("portfolio projection API listening on http://{addr}");

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found", None)
}

async fn simulate_handler(
    State(config): State<Arc<AppConfig>>,
    payload: Result<Json<SimulatePayload>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid JSON payload",
                Some(rejection.body_text()),
            );
        }
    };

    let request = match request_from_payload(payload, &config) {
        Ok(request) => request,
        Err(err) => return simulation_error_response(err),
    };

    tracing::info!(
        allocations = request.allocations.len(),
        one_time_deposits = request.one_time_deposits.len(),
        monthly_changes = request.recurring_changes.len(),
        cycles = request.cycles,
        years = request.years,
        "simulation request received"
    );

    let started = Instant::now();
    match run_simulation(request, config.timeout).await {
        Ok(result) => {
            tracing::info!(
                start_date = %result.start_date,
                months = result.len(),
                first_median = result.median.first().copied().unwrap_or_default(),
                last_median = result.median.last().copied().unwrap_or_default(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "simulation completed"
            );
            json_response(StatusCode::OK, result)
        }
        Err(err) => simulation_error_response(err),
    }
}

async fn summary_handler(
    State(config): State<Arc<AppConfig>>,
    payload: Result<Json<SummaryPayload>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid JSON payload",
                Some(rejection.body_text()),
            );
        }
    };

    let defaults = config.summary_options();
    let options = SummaryOptions {
        pension_tax_rate: payload.pension_tax_rate.unwrap_or(defaults.pension_tax_rate),
        safe_withdrawal_rate: payload
            .safe_withdrawal_rate
            .unwrap_or(defaults.safe_withdrawal_rate),
    };

    match combine(&payload.projections, options) {
        Ok(summary) => json_response(StatusCode::OK, summary),
        Err(err) => simulation_error_response(err),
    }
}

fn simulation_error_response(err: SimError) -> Response {
    match err {
        SimError::InvalidInput(msg) => {
            tracing::debug!(error = %msg, "rejected request");
            error_response(StatusCode::BAD_REQUEST, &msg, None)
        }
        SimError::Timeout(limit) => {
            tracing::warn!(limit_secs = limit.as_secs(), "simulation timed out");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Simulation timed out",
                Some(format!("exceeded {}s", limit.as_secs())),
            )
        }
        SimError::Cancelled => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Simulation cancelled", None)
        }
        other => {
            tracing::error!(error = %other, "simulation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation error", None)
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str, details: Option<String>) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
            details,
        },
    )
}
