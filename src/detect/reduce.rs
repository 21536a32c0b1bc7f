//! Threat level reduction.
//!
//! The overall verdict is the highest severity among findings whose
//! confidence reaches the acceptance threshold, or `INFO` when none do.
//! Findings below the threshold still appear in the severity summary.

use crate::detect::types::{Finding, ThreatLevel, ThreatSummary};

/// Minimum confidence a finding needs to influence the overall verdict.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.5;

/// Reduce findings to one verdict using [`DEFAULT_ACCEPTANCE_THRESHOLD`].
pub fn reduce_threat_level(findings: &[Finding]) -> ThreatLevel {
    reduce_with_threshold(findings, DEFAULT_ACCEPTANCE_THRESHOLD)
}

/// Reduce findings to one verdict. Monotonic: adding a qualifying finding
/// can raise the result or leave it unchanged, never lower it.
pub fn reduce_with_threshold(findings: &[Finding], acceptance_threshold: f64) -> ThreatLevel {
    findings
        .iter()
        .filter(|f| f.confidence >= acceptance_threshold)
        .map(|f| f.severity)
        .max()
        .unwrap_or(ThreatLevel::Info)
}

/// Count findings per severity, regardless of confidence.
pub fn summarize(findings: &[Finding]) -> ThreatSummary {
    let mut summary = ThreatSummary::default();
    for finding in findings {
        summary.bump(finding.severity);
    }
    summary
}
