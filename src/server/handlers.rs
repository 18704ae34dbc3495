//! HTTP route handlers
//!
//! Ledger calls take locks and may fsync, so every handler runs its ledger
//! work on the blocking pool.

use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::error::Error;
use crate::ledger::{
    parse_range, BatchId, IssuanceRequest, OrgId, RetirementRequest, SerialLedger,
    TransferRequest,
};
use crate::server::AppState;

/// Ledger error rendered as a JSON response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub code: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<u64>,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            Error::InsufficientUnits { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_units"),
            Error::NoContiguousRangeAvailable { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "no_contiguous_range")
            }
            Error::InvalidRange { .. } => (StatusCode::BAD_REQUEST, "invalid_range"),
            Error::InvalidQuantity(_) => (StatusCode::BAD_REQUEST, "invalid_quantity"),
            Error::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::IntervalNotFound(_) => (StatusCode::CONFLICT, "conflict"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed with internal error");
            "internal error".to_string()
        } else {
            warn!(error = %self.0, status = status.as_u16(), "Request rejected");
            self.0.to_string()
        };

        (
            status,
            Json(ErrorBody {
                success: false,
                code: code.to_string(),
                error: message,
                shortfall: self.0.shortfall(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Runs a ledger call on the blocking pool.
async fn blocking<T, F>(state: &AppState, call: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&SerialLedger) -> crate::error::Result<T> + Send + 'static,
{
    let ledger = Arc::clone(&state.ledger);
    tokio::task::spawn_blocking(move || call(&ledger))
        .await
        .map_err(|e| ApiError(Error::Storage(format!("ledger task failed: {}", e))))?
        .map_err(ApiError)
}

fn batch_id(raw: &str) -> ApiResult<BatchId> {
    raw.parse().map_err(ApiError)
}

fn org_id(raw: &str) -> ApiResult<OrgId> {
    raw.parse().map_err(ApiError)
}

/// Issue a new credit batch
#[instrument(skip(state))]
pub async fn issue_batch(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<IssuanceRequest>,
) -> ApiResult<Response> {
    info!(issuer = %request.issuer, quantity = request.quantity, "Issuing batch");
    let receipt = blocking(&state, move |ledger| ledger.issue(request)).await?;
    Ok((StatusCode::CREATED, Json(receipt)).into_response())
}

#[instrument(skip(state))]
pub async fn list_batches(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Response> {
    let batches = blocking(&state, |ledger| Ok(ledger.batches())).await?;
    Ok(Json(batches).into_response())
}

/// Batch summary with its current holdings
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchDetails {
    pub batch: crate::ledger::CreditBatch,
    pub holdings: Vec<crate::ledger::CreditHolding>,
}

#[instrument(skip(state))]
pub async fn get_batch(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = batch_id(&id)?;
    let details = blocking(&state, move |ledger| {
        Ok(BatchDetails {
            batch: ledger.batch(&id)?,
            holdings: ledger.holdings(&id)?,
        })
    })
    .await?;
    Ok(Json(details).into_response())
}

/// Serial ranges held by one organization
#[derive(Debug, Serialize, Deserialize)]
pub struct RangeView {
    pub start: u64,
    pub end: u64,
    pub quantity: u64,
    pub formatted: String,
}

#[instrument(skip(state))]
pub async fn get_ranges(
    Extension(state): Extension<Arc<AppState>>,
    Path((id, org)): Path<(String, String)>,
) -> ApiResult<Response> {
    let id = batch_id(&id)?;
    let org = org_id(&org)?;
    let ranges = blocking(&state, move |ledger| {
        let formatter = &ledger.options().formatter;
        ledger
            .ranges_for(&id, &org)?
            .into_iter()
            .map(|interval| {
                Ok(RangeView {
                    start: interval.start,
                    end: interval.end,
                    quantity: interval.len(),
                    formatted: formatter.range(interval.start, interval.end)?,
                })
            })
            .collect::<crate::error::Result<Vec<_>>>()
    })
    .await?;
    Ok(Json(ranges).into_response())
}

/// Transfer by quantity, or of an explicit serial range
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferBody {
    pub from: OrgId,
    pub to: OrgId,
    #[serde(default)]
    pub quantity: Option<u64>,
    /// `N` or `N-M`
    #[serde(default)]
    pub range: Option<String>,
}

#[instrument(skip(state))]
pub async fn create_transfer(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TransferBody>,
) -> ApiResult<Response> {
    let id = batch_id(&id)?;
    let record = match (body.quantity, body.range.as_deref()) {
        (Some(quantity), None) => {
            let request = TransferRequest {
                batch_id: id,
                from: body.from,
                to: body.to,
                quantity,
            };
            blocking(&state, move |ledger| ledger.transfer(request)).await?
        }
        (None, Some(range)) => {
            let range = parse_range(range)?;
            blocking(&state, move |ledger| {
                ledger.transfer_subrange(&id, &body.from, &body.to, range)
            })
            .await?
        }
        _ => {
            return Err(ApiError(Error::InvalidArgument(
                "exactly one of quantity or range is required".to_string(),
            )))
        }
    };
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

#[instrument(skip(state))]
pub async fn list_transfers(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = batch_id(&id)?;
    let transfers = blocking(&state, move |ledger| ledger.transfers(&id)).await?;
    Ok(Json(transfers).into_response())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetirementBody {
    pub org_id: OrgId,
    pub quantity: u64,
    pub purpose: String,
    #[serde(default)]
    pub beneficiary: Option<String>,
}

#[instrument(skip(state))]
pub async fn create_retirement(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RetirementBody>,
) -> ApiResult<Response> {
    let request = RetirementRequest {
        batch_id: batch_id(&id)?,
        org_id: body.org_id,
        quantity: body.quantity,
        purpose: body.purpose,
        beneficiary: body.beneficiary,
    };
    let record = blocking(&state, move |ledger| ledger.retire(request)).await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

#[instrument(skip(state))]
pub async fn list_retirements(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = batch_id(&id)?;
    let retirements = blocking(&state, move |ledger| ledger.retirements(&id)).await?;
    Ok(Json(retirements).into_response())
}

#[instrument(skip(state))]
pub async fn get_certificate(
    Extension(state): Extension<Arc<AppState>>,
    Path(certificate_id): Path<String>,
) -> ApiResult<Response> {
    let record = blocking(&state, move |ledger| ledger.certificate(&certificate_id)).await?;
    Ok(Json(record).into_response())
}

#[instrument(skip(state))]
pub async fn org_holdings(
    Extension(state): Extension<Arc<AppState>>,
    Path(org): Path<String>,
) -> ApiResult<Response> {
    let org = org_id(&org)?;
    let holdings = blocking(&state, move |ledger| Ok(ledger.holdings_for_org(&org))).await?;
    Ok(Json(holdings).into_response())
}

/// Full invariant audit
///
/// A dirty audit is an internal error; the violations themselves only reach
/// the log.
#[instrument(skip(state))]
pub async fn verify(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Response> {
    let report = blocking(&state, |ledger| Ok(ledger.verify())).await?;
    if !report.is_clean() {
        return Err(ApiError(Error::InvariantViolation(format!(
            "ledger audit found {} violation(s)",
            report.violations.len()
        ))));
    }
    Ok(Json(report).into_response())
}

/// Health check
pub async fn health_check(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Response> {
    let stats = blocking(&state, |ledger| Ok(ledger.stats())).await?;
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "batches": stats.batches,
        "intervals": stats.intervals,
        "counter": stats.counter,
    }))
    .into_response())
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics() -> String {
    crate::metrics::export_metrics()
}
