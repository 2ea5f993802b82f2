pub mod cli;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;

use crate::core::{
    FundBucket, Plan, PlanError, Projection, RebalancingRule, RuleTrigger, TaxCategory, TaxRegime,
    TransferAmount, YearResult, current_year, run_projection_with_tax,
};
use crate::store::{PlanStore, SavedPlan, StoreError};

const DEFAULT_START_AGE: u32 = 60;
const DEFAULT_END_AGE: u32 = 100;
const DEFAULT_INFLATION_RATE: f64 = 6.0;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidPayload(_) | ApiError::Plan(_) => {
                warn!("rejected request: {self}");
                StatusCode::BAD_REQUEST
            }
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(err) => {
                error!("plan store failure: {err}");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
            }
        };
        error_response(status, &self.to_string())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
enum ApiTaxCategory {
    #[serde(alias = "equity", alias = "EQUITY")]
    Equity,
    #[serde(alias = "debt", alias = "DEBT")]
    Debt,
    #[serde(alias = "other", alias = "OTHER")]
    Other,
}

impl From<ApiTaxCategory> for TaxCategory {
    fn from(value: ApiTaxCategory) -> Self {
        match value {
            ApiTaxCategory::Equity => TaxCategory::Equity,
            ApiTaxCategory::Debt => TaxCategory::Debt,
            ApiTaxCategory::Other => TaxCategory::Other,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundPayload {
    #[serde(default)]
    name: Option<String>,
    allocation_amount: f64,
    #[serde(default)]
    expected_growth_rate: f64,
    #[serde(default)]
    withdrawal_rate: f64,
    #[serde(default)]
    tax_category: Option<ApiTaxCategory>,
}

/// Rule in the shape the web form submits: a flat record whose
/// `isShortfallBased` flag decides which fields matter.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RulePayload {
    #[serde(alias = "sourceIndex")]
    source_fund_index: usize,
    #[serde(alias = "destinationIndex")]
    destination_fund_index: usize,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    percentage_amount: Option<f64>,
    #[serde(default)]
    frequency: Option<u32>,
    #[serde(default)]
    is_shortfall_based: Option<bool>,
    #[serde(default)]
    shortfall_years: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlanPayload {
    name: Option<String>,
    #[serde(alias = "start_year")]
    start_year: Option<i32>,
    #[serde(alias = "start_age")]
    start_age: Option<u32>,
    #[serde(alias = "end_age")]
    end_age: Option<u32>,
    #[serde(alias = "inflation_rate")]
    inflation_rate: Option<f64>,
    /// Accepted for compatibility; the corpus is always the sum of allocations.
    #[serde(alias = "total_corpus")]
    total_corpus: Option<f64>,
    funds: Option<Vec<FundPayload>>,
    #[serde(alias = "rebalancing_rules")]
    rebalancing_rules: Option<Vec<RulePayload>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    total_corpus: f64,
    initial_annual_withdrawal: f64,
    initial_monthly_withdrawal: f64,
    total_withdrawal: f64,
    total_tax: f64,
    total_net_income: f64,
    final_balance: f64,
    depletion_age: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    plan_id: Option<u64>,
    summary: PlanSummary,
    years: Vec<YearResult>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn PlanStore>,
    tax: Arc<TaxRegime>,
}

impl AppState {
    pub fn new(store: Arc<dyn PlanStore>, tax: TaxRegime) -> Self {
        Self {
            store,
            tax: Arc::new(tax),
        }
    }
}

fn default_funds() -> Vec<FundBucket> {
    vec![
        FundBucket {
            name: "Equity Fund".to_string(),
            allocation_amount: 6_000_000.0,
            expected_growth_rate: 12.0,
            withdrawal_rate: 4.0,
            tax_category: TaxCategory::Equity,
        },
        FundBucket {
            name: "Debt Fund".to_string(),
            allocation_amount: 4_000_000.0,
            expected_growth_rate: 7.0,
            withdrawal_rate: 5.0,
            tax_category: TaxCategory::Debt,
        },
    ]
}

fn rule_from_payload(idx: usize, rule: RulePayload) -> Result<RebalancingRule, ApiError> {
    let trigger = if rule.is_shortfall_based.unwrap_or(false) {
        let years = rule.shortfall_years.ok_or_else(|| {
            ApiError::InvalidPayload(format!(
                "rebalancingRules[{idx}].shortfallYears is required when isShortfallBased is set"
            ))
        })?;
        RuleTrigger::Shortfall { years }
    } else {
        let amount = match rule.percentage_amount {
            Some(pct) if pct > 0.0 => TransferAmount::Percentage(pct),
            _ => TransferAmount::Fixed(rule.amount.unwrap_or(0.0)),
        };
        RuleTrigger::Scheduled {
            frequency: rule.frequency.unwrap_or(1),
            amount,
        }
    };

    Ok(RebalancingRule {
        source_index: rule.source_fund_index,
        destination_index: rule.destination_fund_index,
        trigger,
    })
}

pub fn plan_from_payload(payload: PlanPayload) -> ApiResult<Plan> {
    let funds = match payload.funds {
        Some(funds) => funds
            .into_iter()
            .enumerate()
            .map(|(idx, fund)| FundBucket {
                name: fund.name.unwrap_or_else(|| format!("Fund {}", idx + 1)),
                allocation_amount: fund.allocation_amount,
                expected_growth_rate: fund.expected_growth_rate,
                withdrawal_rate: fund.withdrawal_rate,
                tax_category: fund.tax_category.map_or(TaxCategory::Other, Into::into),
            })
            .collect(),
        None => default_funds(),
    };

    let rebalancing_rules = payload
        .rebalancing_rules
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(idx, rule)| rule_from_payload(idx, rule))
        .collect::<Result<Vec<_>, _>>()?;

    let plan = Plan {
        name: payload.name.unwrap_or_default(),
        start_year: payload.start_year.unwrap_or_else(current_year),
        start_age: payload.start_age.unwrap_or(DEFAULT_START_AGE),
        end_age: payload.end_age.unwrap_or(DEFAULT_END_AGE),
        inflation_rate: payload.inflation_rate.unwrap_or(DEFAULT_INFLATION_RATE),
        funds,
        rebalancing_rules,
    };

    if let Some(corpus) = payload.total_corpus {
        let allocated = plan.total_allocation();
        if (corpus - allocated).abs() > 0.5 {
            info!("ignoring totalCorpus {corpus:.2}; funds allocate {allocated:.2}");
        }
    }

    plan.validate()?;
    Ok(plan)
}

pub fn plan_from_json(json: &str) -> ApiResult<Plan> {
    let payload = serde_json::from_str::<PlanPayload>(json)
        .map_err(|e| ApiError::InvalidPayload(format!("Invalid plan JSON: {e}")))?;
    plan_from_payload(payload)
}

pub fn build_simulate_response(
    plan: &Plan,
    plan_id: Option<u64>,
    projection: Projection,
) -> SimulateResponse {
    SimulateResponse {
        plan_id,
        summary: PlanSummary {
            total_corpus: plan.total_allocation(),
            initial_annual_withdrawal: plan.initial_annual_withdrawal(),
            initial_monthly_withdrawal: plan.initial_monthly_withdrawal(),
            total_withdrawal: projection.total_withdrawal(),
            total_tax: projection.total_tax(),
            total_net_income: projection.total_net_income(),
            final_balance: projection.final_balance(),
            depletion_age: projection.depletion_age(),
        },
        years: projection.years,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/simulate", post(simulate_handler))
        .route("/api/plans", get(list_plans_handler).post(create_plan_handler))
        .route(
            "/api/plans/:id",
            get(get_plan_handler)
                .put(update_plan_handler)
                .delete(delete_plan_handler),
        )
        .route("/api/plans/:id/projection", get(plan_projection_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(port: u16, state: AppState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("drawdown HTTP API listening on http://{addr}");
    info!("local access: http://127.0.0.1:{port}/api/plans");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(
    State(state): State<AppState>,
    Json(payload): Json<PlanPayload>,
) -> ApiResult<Response> {
    let plan = plan_from_payload(payload)?;
    let projection = run_projection_with_tax(&plan, &state.tax)?;
    Ok(json_response(
        StatusCode::OK,
        build_simulate_response(&plan, None, projection),
    ))
}

async fn list_plans_handler(State(state): State<AppState>) -> ApiResult<Response> {
    let plans = state.store.list_plans()?;
    Ok(json_response(StatusCode::OK, plans))
}

async fn create_plan_handler(
    State(state): State<AppState>,
    Json(payload): Json<PlanPayload>,
) -> ApiResult<Response> {
    let plan = plan_from_payload(payload)?;
    let saved = state.store.save_plan(plan, None)?;
    info!("saved plan {} '{}'", saved.id, saved.plan.name);
    Ok(json_response(StatusCode::CREATED, saved))
}

async fn get_plan_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Response> {
    let saved = state.store.get_plan(id)?;
    Ok(json_response(StatusCode::OK, saved))
}

async fn update_plan_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(payload): Json<PlanPayload>,
) -> ApiResult<Response> {
    let plan = plan_from_payload(payload)?;
    let saved = state.store.save_plan(plan, Some(id))?;
    Ok(json_response(StatusCode::OK, saved))
}

async fn delete_plan_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Response> {
    let deleted = state.store.delete_plan(id)?;
    info!("deleted plan {id}");
    Ok(json_response(StatusCode::OK, deleted))
}

async fn plan_projection_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Response> {
    let SavedPlan { id, plan } = state.store.get_plan(id)?;
    let projection = run_projection_with_tax(&plan, &state.tax)?;
    Ok(json_response(
        StatusCode::OK,
        build_simulate_response(&plan, Some(id), projection),
    ))
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
