//! Finding aggregation.
//!
//! Merges rule findings with AI findings. Two findings merge when they share
//! an [`AnomalyType`] and their affected resources overlap (case-insensitive).
//! A finding that names no resource never merges. A merge keeps the higher
//! severity and confidence, unions the resources, and keeps rule text as the
//! authoritative description, appending AI text only when it says something
//! materially different.
//!
//! Inputs are put in a canonical order before merging and merging runs to a
//! fixpoint, so the output depends only on the input sets.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::detect::types::{Finding, Provenance};

/// Word-set similarity below which two texts count as different.
const TEXT_SIMILARITY_FLOOR: f64 = 0.5;

/// Merge rule-sourced and AI-sourced findings into one deduplicated list,
/// most severe first, with each resource list cut to `max_resources`.
pub fn aggregate(
    rule_findings: Vec<Finding>,
    ai_findings: Vec<Finding>,
    max_resources: usize,
) -> Vec<Finding> {
    let mut rules = rule_findings;
    let mut ai = ai_findings;
    rules.sort_by(canonical_order);
    ai.sort_by(canonical_order);

    let mut merged: Vec<Finding> = Vec::with_capacity(rules.len() + ai.len());
    for finding in rules.into_iter().chain(ai) {
        match merged.iter_mut().find(|m| overlaps(m, &finding)) {
            Some(existing) => absorb(existing, finding),
            None => merged.push(finding),
        }
    }

    // A later merge can make two earlier entries overlap.
    while let Some((i, j)) = first_overlapping_pair(&merged) {
        let other = merged.remove(j);
        absorb(&mut merged[i], other);
    }

    merged.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.source.cmp(&b.source))
    });
    for finding in &mut merged {
        finding.affected_resources.truncate(max_resources);
    }
    merged
}

fn canonical_order(a: &Finding, b: &Finding) -> Ordering {
    a.kind
        .cmp(&b.kind)
        .then_with(|| b.severity.cmp(&a.severity))
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.affected_resources.cmp(&b.affected_resources))
        .then_with(|| a.description.cmp(&b.description))
        .then_with(|| a.recommendation.cmp(&b.recommendation))
}

fn first_overlapping_pair(findings: &[Finding]) -> Option<(usize, usize)> {
    for i in 0..findings.len() {
        for j in (i + 1)..findings.len() {
            if overlaps(&findings[i], &findings[j]) {
                return Some((i, j));
            }
        }
    }
    None
}

/// Merge key: same type and overlapping resources.
pub fn overlaps(a: &Finding, b: &Finding) -> bool {
    if a.kind != b.kind {
        return false;
    }
    let left: HashSet<String> = a.affected_resources.iter().map(|r| normalize(r)).collect();
    b.affected_resources.iter().any(|r| left.contains(&normalize(r)))
}

fn normalize(resource: &str) -> String {
    resource.trim().to_lowercase()
}

fn absorb(into: &mut Finding, mut other: Finding) {
    // Rule text is authoritative regardless of which side arrived first.
    if into.source == Provenance::Ai && other.source == Provenance::Rule {
        std::mem::swap(&mut into.description, &mut other.description);
        std::mem::swap(&mut into.recommendation, &mut other.recommendation);
    }

    let mixed = into.source != other.source;
    into.severity = into.severity.max(other.severity);
    into.confidence = into.confidence.max(other.confidence);

    let mut seen: HashSet<String> = into.affected_resources.iter().map(|r| normalize(r)).collect();
    for resource in other.affected_resources {
        if seen.insert(normalize(&resource)) {
            into.affected_resources.push(resource);
        }
    }

    if into.description.trim().is_empty() {
        into.description = other.description;
    } else if materially_different(&into.description, &other.description) {
        into.description = format!("{} | {}", into.description, other.description);
    }
    if materially_different(&into.recommendation, &other.recommendation) {
        into.recommendation = format!("{} | {}", into.recommendation, other.recommendation);
    }

    if other.source == Provenance::Rule {
        into.source = Provenance::Rule;
    }
    into.corroborated = into.corroborated || other.corroborated || mixed;
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// True unless one text's words contain the other's, or the two share most words.
pub fn materially_different(a: &str, b: &str) -> bool {
    let (wa, wb) = (words(a), words(b));
    if wb.is_empty() || wb.is_subset(&wa) || (!wa.is_empty() && wa.is_subset(&wb)) {
        return false;
    }
    let shared = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    shared / union < TEXT_SIMILARITY_FLOOR
}
