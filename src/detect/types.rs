//! Finding and verdict types shared by the rule set, the AI adapter,
//! the aggregator and the reducer. No logic beyond ordering and parsing.

use serde::{Deserialize, Serialize};

// ============================================================================
// ANOMALY CATEGORIES
// ============================================================================

/// Closed catalog of finding categories. Each variant has exactly one
/// entry in the rule catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    BruteForce,
    PrivilegeEscalation,
    SqlInjection,
    Xss,
    DataExfiltration,
    Malware,
    PortScan,
    UnauthorizedAccess,
}

impl AnomalyType {
    pub const ALL: [AnomalyType; 8] = [
        AnomalyType::BruteForce,
        AnomalyType::PrivilegeEscalation,
        AnomalyType::SqlInjection,
        AnomalyType::Xss,
        AnomalyType::DataExfiltration,
        AnomalyType::Malware,
        AnomalyType::PortScan,
        AnomalyType::UnauthorizedAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::BruteForce => "brute_force",
            AnomalyType::PrivilegeEscalation => "privilege_escalation",
            AnomalyType::SqlInjection => "sql_injection",
            AnomalyType::Xss => "xss",
            AnomalyType::DataExfiltration => "data_exfiltration",
            AnomalyType::Malware => "malware",
            AnomalyType::PortScan => "port_scan",
            AnomalyType::UnauthorizedAccess => "unauthorized_access",
        }
    }

    /// Lenient lookup used for upstream payloads: accepts `brute_force`,
    /// `Brute Force`, `brute-force`, and the `cross_site_scripting` alias.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let key: String = raw
            .trim()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_lowercase() })
            .collect();
        match key.as_str() {
            "brute_force" | "bruteforce" => Some(AnomalyType::BruteForce),
            "privilege_escalation" => Some(AnomalyType::PrivilegeEscalation),
            "sql_injection" | "sqli" => Some(AnomalyType::SqlInjection),
            "xss" | "cross_site_scripting" => Some(AnomalyType::Xss),
            "data_exfiltration" | "exfiltration" => Some(AnomalyType::DataExfiltration),
            "malware" | "malware_indicator" => Some(AnomalyType::Malware),
            "port_scan" | "portscan" => Some(AnomalyType::PortScan),
            "unauthorized_access" | "unauthorised_access" => Some(AnomalyType::UnauthorizedAccess),
            _ => None,
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// THREAT LEVEL
// ============================================================================

/// Ordered severity scale. Variant order is the ordering: `Info < ... < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Most severe first, the order used for summaries.
    pub const DESCENDING: [ThreatLevel; 5] = [
        ThreatLevel::Critical,
        ThreatLevel::High,
        ThreatLevel::Medium,
        ThreatLevel::Low,
        ThreatLevel::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Critical => "CRITICAL",
            ThreatLevel::High => "HIGH",
            ThreatLevel::Medium => "MEDIUM",
            ThreatLevel::Low => "LOW",
            ThreatLevel::Info => "INFO",
        }
    }

    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(ThreatLevel::Critical),
            "HIGH" => Some(ThreatLevel::High),
            "MEDIUM" | "MODERATE" => Some(ThreatLevel::Medium),
            "LOW" => Some(ThreatLevel::Low),
            "INFO" | "INFORMATIONAL" => Some(ThreatLevel::Info),
            _ => None,
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// FINDING
// ============================================================================

/// Where a finding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Rule,
    Ai,
}

/// One typed, severity-scored detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: AnomalyType,
    pub severity: ThreatLevel,
    pub description: String,
    pub recommendation: String,
    /// Fraction in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Implicated entities in first-seen order.
    pub affected_resources: Vec<String>,
    pub source: Provenance,
    /// Set by the aggregator when a rule finding absorbed an AI finding.
    #[serde(default)]
    pub corroborated: bool,
}

impl Finding {
    pub fn new(
        kind: AnomalyType,
        severity: ThreatLevel,
        description: impl Into<String>,
        recommendation: impl Into<String>,
        confidence: f64,
        affected_resources: Vec<String>,
        source: Provenance,
    ) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            recommendation: recommendation.into(),
            confidence: clamp_confidence(confidence),
            affected_resources,
            source,
            corroborated: false,
        }
    }
}

/// Clamp into `[0, 1]`; NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// What happened to the AI augmentation step of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AiStatus {
    NotRequested,
    Completed { accepted: usize },
    Failed { reason: String },
}

impl AiStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, AiStatus::Failed { .. })
    }
}

/// Count of findings per severity, most severe first when serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatSummary {
    #[serde(rename = "CRITICAL")]
    pub critical: usize,
    #[serde(rename = "HIGH")]
    pub high: usize,
    #[serde(rename = "MEDIUM")]
    pub medium: usize,
    #[serde(rename = "LOW")]
    pub low: usize,
    #[serde(rename = "INFO")]
    pub info: usize,
}

impl ThreatSummary {
    pub fn count(&self, level: ThreatLevel) -> usize {
        match level {
            ThreatLevel::Critical => self.critical,
            ThreatLevel::High => self.high,
            ThreatLevel::Medium => self.medium,
            ThreatLevel::Low => self.low,
            ThreatLevel::Info => self.info,
        }
    }

    pub(crate) fn bump(&mut self, level: ThreatLevel) {
        match level {
            ThreatLevel::Critical => self.critical += 1,
            ThreatLevel::High => self.high += 1,
            ThreatLevel::Medium => self.medium += 1,
            ThreatLevel::Low => self.low += 1,
            ThreatLevel::Info => self.info += 1,
        }
    }
}

/// The sole externally visible output of one detection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub findings: Vec<Finding>,
    pub overall_threat_level: ThreatLevel,
    pub ai_augmentation: AiStatus,
}

impl DetectionResult {
    pub fn empty(ai_augmentation: AiStatus) -> Self {
        Self {
            findings: Vec::new(),
            overall_threat_level: ThreatLevel::Info,
            ai_augmentation,
        }
    }

    pub fn summary(&self) -> ThreatSummary {
        crate::detect::reduce::summarize(&self.findings)
    }
}
