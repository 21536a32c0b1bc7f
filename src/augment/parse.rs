//! Tolerant parser for upstream finding payloads.
//!
//! Accepts `{"anomalies": [...]}`, `{"findings": [...]}` or a bare array,
//! optionally wrapped in a Markdown code fence. Each entry is validated on
//! its own; a bad entry is logged and skipped, the rest are kept.

use serde_json::Value;
use tracing::warn;

use super::ServiceError;
use crate::detect::{clamp_confidence, AnomalyType, Finding, Provenance, ThreatLevel};

/// Confidence assumed when an entry omits it.
const DEFAULT_AI_CONFIDENCE: f64 = 0.5;

/// Parse a raw payload into AI findings.
///
/// Fails only when the payload is not JSON or has no finding list.
pub fn parse_findings(raw: &str) -> Result<Vec<Finding>, ServiceError> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ServiceError::MalformedPayload(format!("not JSON: {e}")))?;

    let entries = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("anomalies").or_else(|| map.get("findings")) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(ServiceError::MalformedPayload(
                    "finding list is not an array".into(),
                ))
            }
            None => return Err(ServiceError::MalformedPayload("no finding list".into())),
        },
        _ => {
            return Err(ServiceError::MalformedPayload(
                "expected an object or array".into(),
            ))
        }
    };

    let mut findings = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match parse_entry(entry) {
            Ok(finding) => findings.push(finding),
            Err(reason) => warn!(index, %reason, "discarding malformed AI finding"),
        }
    }
    Ok(findings)
}

fn parse_entry(entry: &Value) -> Result<Finding, String> {
    let obj = entry.as_object().ok_or("entry is not an object")?;

    let raw_type = obj
        .get("type")
        .or_else(|| obj.get("anomaly_type"))
        .and_then(Value::as_str)
        .ok_or("missing type")?;
    let kind =
        AnomalyType::parse_loose(raw_type).ok_or_else(|| format!("unknown type {raw_type:?}"))?;

    let raw_severity = obj
        .get("severity")
        .and_then(Value::as_str)
        .ok_or("missing severity")?;
    let severity = ThreatLevel::parse_loose(raw_severity)
        .ok_or_else(|| format!("unknown severity {raw_severity:?}"))?;

    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or("missing description")?;

    let recommendation = obj
        .get("recommendation")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim();

    let confidence = match obj.get("confidence") {
        None | Some(Value::Null) => DEFAULT_AI_CONFIDENCE,
        Some(v) => parse_confidence(v).ok_or_else(|| format!("bad confidence {v}"))?,
    };

    let resources = obj
        .get("affected_resources")
        .or_else(|| obj.get("affected"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(Finding::new(
        kind,
        severity,
        description,
        recommendation,
        confidence,
        resources,
        Provenance::Ai,
    ))
}

/// Accepts `0.85`, `85` (read as percent), `"0.85"` or `"85%"`.
fn parse_confidence(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            match s.strip_suffix('%') {
                Some(pct) => pct.trim().parse::<f64>().ok()? / 100.0,
                None => s.parse::<f64>().ok()?,
            }
        }
        _ => return None,
    };
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    let fraction = if number > 1.0 && number <= 100.0 {
        number / 100.0
    } else {
        number
    };
    if fraction > 1.0 {
        return None;
    }
    Some(clamp_confidence(fraction))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the optional language tag on the opening fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
