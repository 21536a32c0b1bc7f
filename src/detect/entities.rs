//! Entity extraction from unstructured log lines.
//!
//! Pulls IPv4 addresses, usernames, hostnames, ports and timestamps out of
//! free text. Extraction never fails: a line without a recognizable pattern
//! simply contributes nothing. Every list keeps first-seen order so that
//! affected-resource lists built from it are stable.
//!
//! Usernames are only captured next to login/auth keywords (`for user`,
//! `login <name> from`, `password for`, `sudo: <name> :`), never from
//! arbitrary words.

use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Compiled regexes
// ---------------------------------------------------------------------------

static RE_IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").expect("regex"));

/// `port 22`, `port=22`, `DPT=22`, `dst_port=22`
static RE_PORT_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bports?\s*[=:]?\s*|\bdpt=|\bdst_?port=|\bdport=)(\d{1,5})\b").expect("regex")
});

/// `10.0.0.1:4444`
static RE_IP_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}:(\d{1,5})\b").expect("regex"));

static RE_USER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)\b(?:for(?:\s+invalid)?\s+user|user(?:name)?|account|uid)\s*[=:]?\s*['"]?([a-z_][a-z0-9._-]{0,31})"#,
        r#"(?i)\blog(?:in|on)(?:\s+attempt)?(?:\s+for)?(?:\s+user)?\s+['"]?([a-z_][a-z0-9._-]{0,31})['"]?\s+from\b"#,
        r"(?i)\b(?:password|publickey|keyboard-interactive)\s+for\s+(?:invalid\s+user\s+)?([a-z_][a-z0-9._-]{0,31})",
        r"(?i)\bsudo:\s+([a-z_][a-z0-9._-]{0,31})\s*:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("regex"))
    .collect()
});

/// Words that follow auth keywords but are not account names.
const USERNAME_STOPWORDS: &[&str] = &[
    "a", "an", "at", "attempt", "attempts", "authentication", "by", "created", "deleted",
    "disabled", "does", "enabled", "failed", "for", "from", "id", "in", "invalid", "is", "locked",
    "logged", "login", "name", "not", "on", "password", "session", "the", "to", "unknown",
    "unlocked", "was", "with",
];

static RE_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\b(?:host(?:name)?|server|domain|dst|destination|to|from)\b\s*[=:]?\s*|https?://)([a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*\.[a-z]{2,24})\b",
    )
    .expect("regex")
});

/// An IP in the source role: `from 1.2.3.4`, `src=1.2.3.4`, `rhost=1.2.3.4`.
static RE_SOURCE_IP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:from|src|rhost|source|client)\s*[=:]?\s*(\d{1,3}(?:\.\d{1,3}){3})\b")
        .expect("regex")
});

static RE_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?|\b[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\b|\b\d{2}:\d{2}:\d{2}\b",
    )
    .expect("regex")
});

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Structured tokens found in a piece of log text, each in first-seen order
/// without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Entities {
    pub ip_addresses: Vec<String>,
    pub usernames: Vec<String>,
    pub hosts: Vec<String>,
    pub ports: Vec<u16>,
    pub timestamps: Vec<String>,
}

impl Entities {
    pub fn is_empty(&self) -> bool {
        self.ip_addresses.is_empty()
            && self.usernames.is_empty()
            && self.hosts.is_empty()
            && self.ports.is_empty()
            && self.timestamps.is_empty()
    }

    /// Append everything from `other` that is not already present.
    fn absorb(&mut self, other: &Entities) {
        push_all(&mut self.ip_addresses, &other.ip_addresses);
        push_all(&mut self.usernames, &other.usernames);
        push_all(&mut self.hosts, &other.hosts);
        push_all(&mut self.ports, &other.ports);
        push_all(&mut self.timestamps, &other.timestamps);
    }
}

fn push_all<T: PartialEq + Clone>(into: &mut Vec<T>, from: &[T]) {
    for item in from {
        push_unique(into, item.clone());
    }
}

fn push_unique<T: PartialEq>(into: &mut Vec<T>, item: T) {
    if !into.contains(&item) {
        into.push(item);
    }
}

/// Extract entities from a whole batch, preserving first-seen order.
pub fn extract(text: &str) -> Entities {
    let mut all = Entities::default();
    for line in text.lines() {
        all.absorb(&extract_line(line));
    }
    all
}

/// Extract entities from a single line.
pub fn extract_line(line: &str) -> Entities {
    let mut out = Entities::default();

    for ip in ipv4_addresses(line) {
        push_unique(&mut out.ip_addresses, ip);
    }

    for caps in RE_PORT_KEYWORD
        .captures_iter(line)
        .chain(RE_IP_PORT.captures_iter(line))
    {
        if let Some(port) = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) {
            if port > 0 {
                push_unique(&mut out.ports, port);
            }
        }
    }

    for re in RE_USER_PATTERNS.iter() {
        for caps in re.captures_iter(line) {
            let Some(name) = caps.get(1).map(|m| m.as_str()) else {
                continue;
            };
            let name = name.trim_end_matches(['.', '-']);
            if name.is_empty() || USERNAME_STOPWORDS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            push_unique(&mut out.usernames, name.to_string());
        }
    }

    for caps in RE_HOST.captures_iter(line) {
        if let Some(host) = caps.get(1) {
            push_unique(&mut out.hosts, host.as_str().to_ascii_lowercase());
        }
    }

    for m in RE_TIMESTAMP.find_iter(line) {
        push_unique(&mut out.timestamps, m.as_str().to_string());
    }

    out
}

/// IPv4 literals with every octet in range, in order of appearance.
/// Dotted runs longer than four groups (`1.2.3.4.5`) are rejected.
pub fn ipv4_addresses(line: &str) -> Vec<String> {
    let bytes = line.as_bytes();
    let mut found = Vec::new();
    for m in RE_IPV4.find_iter(line) {
        let before_dot = m.start() > 0 && bytes[m.start() - 1] == b'.';
        let after_dot = bytes.get(m.end()) == Some(&b'.')
            && bytes.get(m.end() + 1).is_some_and(|b| b.is_ascii_digit());
        if before_dot || after_dot {
            continue;
        }
        if m.as_str().parse::<Ipv4Addr>().is_ok() {
            found.push(m.as_str().to_string());
        }
    }
    found
}

/// True for RFC 1918, loopback, link-local and unspecified addresses.
pub fn is_internal_ip(ip: &str) -> bool {
    match ip.parse::<Ipv4Addr>() {
        Ok(addr) => {
            addr.is_private() || addr.is_loopback() || addr.is_link_local() || addr.is_unspecified()
        }
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Per-batch index
// ---------------------------------------------------------------------------

/// One non-blank line of the batch with its pre-extracted entities.
#[derive(Debug)]
pub struct LineRecord<'a> {
    /// 1-based line number in the original text.
    pub number: usize,
    pub raw: &'a str,
    pub entities: Entities,
}

impl LineRecord<'_> {
    /// The IP acting as the source of the line: the one after `from`, `src=`
    /// or `rhost=` when present, else the first IP on the line.
    pub fn source_ip(&self) -> Option<&str> {
        RE_SOURCE_IP
            .captures_iter(self.raw)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .find(|ip| ip.parse::<Ipv4Addr>().is_ok())
            .or_else(|| self.entities.ip_addresses.first().map(String::as_str))
    }

    /// First timestamp on the line, if any.
    pub fn timestamp(&self) -> Option<&str> {
        self.entities.timestamps.first().map(String::as_str)
    }
}

/// Transient index over one batch, built once per detection call and
/// dropped with it. Rules read it; nothing writes to it after `build`.
#[derive(Debug)]
pub struct BatchIndex<'a> {
    pub lines: Vec<LineRecord<'a>>,
    ip_counts: HashMap<String, usize>,
}

impl<'a> BatchIndex<'a> {
    pub fn build(text: &'a str) -> Self {
        let mut lines = Vec::new();
        let mut ip_counts: HashMap<String, usize> = HashMap::new();

        for (i, raw) in text.lines().enumerate() {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let line_entities = extract_line(trimmed);
            let mut counted = HashSet::new();
            for ip in &line_entities.ip_addresses {
                if counted.insert(ip.as_str()) {
                    *ip_counts.entry(ip.clone()).or_default() += 1;
                }
            }
            lines.push(LineRecord {
                number: i + 1,
                raw: trimmed,
                entities: line_entities,
            });
        }

        Self { lines, ip_counts }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of lines mentioning `ip`.
    pub fn ip_line_count(&self, ip: &str) -> usize {
        self.ip_counts.get(ip).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range_octets() {
        let e = extract("conn from 256.1.1.1 and 10.0.0.300 and 192.168.1.20");
        assert_eq!(e.ip_addresses, vec!["192.168.1.20"]);
    }

    #[test]
    fn test_rejects_longer_dotted_runs() {
        assert!(ipv4_addresses("version 1.2.3.4.5 installed").is_empty());
        assert_eq!(ipv4_addresses("peer 8.8.8.8."), vec!["8.8.8.8"]);
    }

    #[test]
    fn test_usernames_only_near_auth_keywords() {
        let e = extract("2026-02-01 10:24:12 WARN Failed login attempt for user root from 203.0.113.45");
        assert_eq!(e.usernames, vec!["root"]);

        let e = extract("Failed login root from 203.0.113.45");
        assert_eq!(e.usernames, vec!["root"]);

        let e = extract("backup job finished for volume data");
        assert!(e.usernames.is_empty());
    }

    #[test]
    fn test_account_locked_is_not_a_username() {
        let e = extract("ERROR Failed login root from 203.0.113.45 - Account locked");
        assert_eq!(e.usernames, vec!["root"]);
    }

    #[test]
    fn test_ports_and_hosts() {
        let e = extract("Unusual outbound traffic detected to 198.51.100.77:4444\nSYN to host=db.internal.example.com port 5432");
        assert_eq!(e.ports, vec![4444, 5432]);
        assert_eq!(e.hosts, vec!["db.internal.example.com"]);
        assert_eq!(e.ip_addresses, vec!["198.51.100.77"]);
    }

    #[test]
    fn test_timestamps_first_seen_order() {
        let e = extract("2026-02-01 10:23:45 INFO ok\nFeb  1 10:24:01 host sshd[1]: x\n10:25:00 tail");
        assert_eq!(
            e.timestamps,
            vec!["2026-02-01 10:23:45", "Feb  1 10:24:01", "10:25:00"]
        );
    }

    #[test]
    fn test_malformed_text_yields_empty() {
        let e = extract("\u{0}\u{1}  ::: ...  \t");
        assert!(e.is_empty());
    }

    #[test]
    fn test_batch_index_counts_lines_per_ip() {
        let text = "a 10.0.0.1 b 10.0.0.1\n\n c 10.0.0.1\n d 10.0.0.2";
        let idx = BatchIndex::build(text);
        assert_eq!(idx.lines.len(), 3);
        assert_eq!(idx.lines[1].number, 3);
        assert_eq!(idx.ip_line_count("10.0.0.1"), 2);
        assert_eq!(idx.ip_line_count("10.0.0.9"), 0);
    }

    #[test]
    fn test_source_ip_prefers_source_role() {
        let idx = BatchIndex::build(
            "Failed login for admin on 10.0.0.5 from 203.0.113.9\n\
             DROP SRC=45.33.32.156 DST=10.0.0.5 DPT=22\n\
             pam_unix(sshd:auth): authentication failure; tty=ssh ruser= rhost=198.51.100.4 user=alice\n\
             conn 10.0.0.7 -> 10.0.0.8\n\
             no addresses here",
        );
        let sources: Vec<Option<&str>> = idx.lines.iter().map(|l| l.source_ip()).collect();
        assert_eq!(
            sources,
            vec![
                Some("203.0.113.9"),
                Some("45.33.32.156"),
                Some("198.51.100.4"),
                Some("10.0.0.7"),
                None
            ]
        );
    }

    #[test]
    fn test_source_ip_skips_out_of_range_candidates() {
        let idx = BatchIndex::build("peer 10.0.0.5 from 999.1.1.1");
        assert_eq!(idx.lines[0].source_ip(), Some("10.0.0.5"));
    }

    #[test]
    fn test_internal_ip_classification() {
        assert!(is_internal_ip("192.168.1.100"));
        assert!(is_internal_ip("127.0.0.1"));
        assert!(!is_internal_ip("203.0.113.45"));
        assert!(!is_internal_ip("not-an-ip"));
    }
}
