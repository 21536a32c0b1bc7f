//! API route definitions.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::Instrument;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::compress::{CompressionRequest, CompressionStats, Rate, DEFAULT_ANALYSIS_PROMPT};
use crate::detect::{DetectionResult, Finding};

/// Affected resources shown per finding in the `/analyze` view.
const ANALYZE_AFFECTED_LIMIT: usize = 3;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/detect", post(detect))
        .route("/detect/health", get(detect_health))
        .route("/compress", post(compress))
        .route("/compress/health", get(compress_health))
        .route("/analyze", post(analyze))
        .route("/analyze/health", get(analyze_health))
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DetectRequest {
    logs: String,
    #[serde(default)]
    compressed_context: Option<String>,
    #[serde(default)]
    ai_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct CompressBody {
    logs: String,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    target_model: Option<String>,
    #[serde(default)]
    rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    logs: String,
    #[serde(default = "default_true")]
    enable_compression: bool,
    #[serde(default)]
    enable_ai_detection: bool,
    #[serde(default)]
    target_model: Option<String>,
}

fn default_true() -> bool {
    true
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn detect_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "detection",
        "version": env!("CARGO_PKG_VERSION"),
        "patterns_loaded": state.detector.patterns_loaded(),
        "ai_available": state.detector.ai_available()
    }))
}

async fn compress_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "compression",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.compressor.name()
    }))
}

async fn analyze_health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "analysis",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn detect(
    State(state): State<AppState>,
    payload: Result<Json<DetectRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = body(payload)?;
    let request_id = Uuid::new_v4();
    let result = state
        .detector
        .detect(&req.logs, req.compressed_context.as_deref(), req.ai_enabled)
        .instrument(tracing::info_span!("detect", %request_id))
        .await?;
    Ok(Json(detect_view(&result, request_id)))
}

async fn compress(
    State(state): State<AppState>,
    payload: Result<Json<CompressBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = body(payload)?;
    let defaults = &state.config.compression;
    let target_model = req.target_model.as_deref().unwrap_or(&defaults.target_model);
    let rate = Rate::parse(req.rate.as_deref().unwrap_or(&defaults.rate))?;

    let result = state
        .compressor
        .compress(&CompressionRequest {
            logs: &req.logs,
            prompt: req.prompt.as_deref().unwrap_or(DEFAULT_ANALYSIS_PROMPT),
            target_model,
            rate,
        })
        .await?;
    let stats = CompressionStats::from_result(&result, target_model);

    Ok(Json(json!({
        "success": true,
        "compressed_content": result.content,
        "stats": stats,
        "error": null
    })))
}

/// Compression followed by detection, with presentation-formatted output.
async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = body(payload)?;
    if req.logs.trim().is_empty() {
        return Err(ApiError::BadRequest("logs must not be empty".into()));
    }

    let mut compressed = None;
    let mut stats = None;
    if req.enable_compression {
        let defaults = &state.config.compression;
        let target_model = req.target_model.as_deref().unwrap_or(&defaults.target_model);
        let result = state
            .compressor
            .compress(&CompressionRequest {
                logs: &req.logs,
                prompt: "Analyze for security threats and anomalies",
                target_model,
                rate: Rate::parse(&defaults.rate)?,
            })
            .await?;
        stats = Some(CompressionStats::from_result(&result, target_model));
        compressed = Some(result.content);
    }

    let request_id = Uuid::new_v4();
    let result = state
        .detector
        .detect(&req.logs, compressed.as_deref(), req.enable_ai_detection)
        .instrument(tracing::info_span!("analyze", %request_id))
        .await?;

    let anomalies: Vec<Value> = result.findings.iter().map(analyze_view).collect();
    let mut summary = json!({
        "total_anomalies": result.findings.len(),
        "threat_level": result.overall_threat_level,
        "compression_enabled": req.enable_compression,
        "ai_detection_enabled": req.enable_ai_detection
    });
    if let Some(s) = &stats {
        summary["tokens_saved"] = json!(s.tokens_saved);
        summary["savings_percent"] = json!(format!("{:.1}%", s.savings_percent));
        summary["cost_saved"] = json!(format!("${:.6}", s.estimated_cost_saved));
    }

    Ok(Json(json!({
        "success": true,
        "request_id": request_id,
        "compression": stats,
        "detection": {
            "anomalies": anomalies,
            "anomaly_count": result.findings.len(),
            "overall_threat_level": result.overall_threat_level,
            "ai_augmentation": result.ai_augmentation
        },
        "summary": summary,
        "error": null
    })))
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

fn detect_view(result: &DetectionResult, request_id: Uuid) -> Value {
    json!({
        "success": true,
        "request_id": request_id,
        "anomalies": result.findings,
        "anomaly_count": result.findings.len(),
        "overall_threat_level": result.overall_threat_level,
        "threat_summary": result.summary(),
        "ai_augmentation": result.ai_augmentation,
        "error": null
    })
}

fn analyze_view(finding: &Finding) -> Value {
    let affected: Vec<&String> = finding
        .affected_resources
        .iter()
        .take(ANALYZE_AFFECTED_LIMIT)
        .collect();
    json!({
        "type": finding.kind,
        "severity": finding.severity,
        "description": finding.description,
        "recommendation": finding.recommendation,
        "confidence": format!("{:.0}%", finding.confidence * 100.0),
        "affected": affected,
        "source": finding.source
    })
}
