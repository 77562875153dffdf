//! HTTP front end: one proof request per POST.

use crate::canonicalizer::EmailMessage;
use crate::checkpoint::RequestId;
use crate::config::{RouteStyle, UploadMode};
use crate::error::{PipelineError, PipelineFailure};
use crate::pipeline::{EmailPipeline, PipelineRequest};
use crate::predicate::MatchPredicate;
use crate::strings::*;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ethers::types::Address;
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub const GENERATE_PROOF_PATH: &str = "/generate-proof";

#[derive(Clone)]
struct AppState {
    pipeline: EmailPipeline,
}

pub fn router(pipeline: EmailPipeline, max_upload_bytes: usize) -> Router {
    let options = pipeline.options();
    let path = match options.route_style {
        RouteStyle::PathParam => format!("{GENERATE_PROOF_PATH}/:email"),
        RouteStyle::BodyField => GENERATE_PROOF_PATH.to_string(),
    };
    let handler = match options.upload_mode {
        UploadMode::Multipart => post(generate_proof_multipart),
        UploadMode::InlineJson => post(generate_proof_inline),
    };
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(&path, handler)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(AppState { pipeline })
}

/// Request fields shared by both upload modes.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineUpload {
    eml: Option<String>,
    eml_base64: Option<String>,
    email: Option<String>,
    pattern: Option<String>,
    date: Option<String>,
    start: Option<String>,
    end: Option<String>,
    request_id: Option<String>,
    prover_address: Option<String>,
    verifier_address: Option<String>,
}

async fn generate_proof_multipart(
    State(state): State<AppState>,
    path_email: Option<Path<String>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut upload = InlineUpload::default();
    let mut eml = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "emlFile" {
            let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
            eml = Some(bytes.to_vec());
            continue;
        }
        let value = field.text().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let slot = match name.as_str() {
            "email" => &mut upload.email,
            "pattern" => &mut upload.pattern,
            "date" => &mut upload.date,
            "start" => &mut upload.start,
            "end" => &mut upload.end,
            "requestId" => &mut upload.request_id,
            "proverAddress" => &mut upload.prover_address,
            "verifierAddress" => &mut upload.verifier_address,
            _ => continue,
        };
        *slot = Some(value);
    }
    let eml = eml.ok_or_else(|| ApiError::BadRequest(missing_field("emlFile")))?;
    run(&state, eml, upload, path_email.map(|Path(email)| email)).await
}

async fn generate_proof_inline(
    State(state): State<AppState>,
    path_email: Option<Path<String>>,
    Json(upload): Json<InlineUpload>,
) -> Result<Response, ApiError> {
    let eml = match (&upload.eml, &upload.eml_base64) {
        (Some(text), _) => text.clone().into_bytes(),
        (None, Some(encoded)) => BASE64
            .decode(encoded.trim())
            .map_err(|e| ApiError::BadRequest(format!("emlBase64: {e}")))?,
        (None, None) => return Err(ApiError::BadRequest(missing_field("eml"))),
    };
    run(&state, eml, upload, path_email.map(|Path(email)| email)).await
}

async fn run(
    state: &AppState,
    eml: Vec<u8>,
    upload: InlineUpload,
    path_email: Option<String>,
) -> Result<Response, ApiError> {
    let email = match state.pipeline.options().route_style {
        RouteStyle::PathParam => path_email,
        RouteStyle::BodyField => upload.email,
    };
    let predicate = match (upload.pattern, email) {
        (Some(pattern), _) => MatchPredicate::new(pattern),
        (None, Some(email)) => MatchPredicate::for_address(email.trim()),
        (None, None) => return Err(ApiError::BadRequest(missing_field("email"))),
    }
    .map_err(ApiError::Predicate)?;
    let predicate = match upload.date {
        Some(date) => predicate.with_date(date).map_err(ApiError::Predicate)?,
        None => predicate,
    };
    let predicate = match (upload.start, upload.end) {
        (Some(start), Some(end)) => predicate.with_window(start, end).map_err(ApiError::Predicate)?,
        (None, None) => predicate,
        _ => {
            return Err(ApiError::BadRequest(
                "start and end must be given together".to_string(),
            ))
        }
    };

    let prover = parse_address("proverAddress", upload.prover_address)?;
    let verifier = parse_address("verifierAddress", upload.verifier_address)?;
    let mut request = PipelineRequest::new(EmailMessage::new(eml), predicate)
        .with_contracts(prover, verifier);
    if let Some(id) = upload.request_id.filter(|id| !id.trim().is_empty()) {
        request = request.with_request_id(RequestId::new(id.trim()));
    }
    let verified = state.pipeline.run(request).await.map_err(ApiError::Pipeline)?;
    info!(request_id = %verified.request_id, "proof request served");
    Ok(Json(json!({
        "message": VERIFICATION_SUCCESSFUL,
        "requestId": verified.request_id,
        "proofResult": verified.proof_result,
        "txHash": verified.receipt.tx_hash,
        "receipt": verified.receipt,
        "resumed": verified.resumed,
    }))
    .into_response())
}

fn parse_address(field: &str, value: Option<String>) -> Result<Option<Address>, ApiError> {
    match value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e| ApiError::BadRequest(format!("{field}: {e}"))),
        None => Ok(None),
    }
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Predicate(PipelineError),
    Pipeline(PipelineFailure),
}

pub fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::MalformedEmail(_) | PipelineError::InvalidPredicate(_) => {
            StatusCode::BAD_REQUEST
        }
        PipelineError::DkimKeyLookup(_)
        | PipelineError::Submission(_)
        | PipelineError::Broadcast(_) => StatusCode::BAD_GATEWAY,
        PipelineError::ProvingFailed(_)
        | PipelineError::TransactionReverted { .. }
        | PipelineError::UnsupportedProofSchema { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::ProvingTimedOut { .. } | PipelineError::ConfirmationTimeout { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
        PipelineError::Checkpoint(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "BadRequest", "message": message, "resumable": false }),
            ),
            ApiError::Predicate(error) => (
                status_for(&error),
                json!({ "error": error.kind(), "message": error.to_string(), "resumable": false }),
            ),
            ApiError::Pipeline(failure) => {
                let resumable = failure.resumable();
                let stage = failure.stage.to_string();
                (
                    status_for(&failure.error),
                    json!({
                        "error": failure.error.kind(),
                        "stage": failure.stage,
                        "message": failure_message(&stage, &failure.error.to_string(), resumable),
                        "resumable": resumable,
                    }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
