//! Column reconciliation: maps canonical field names onto whatever spelling
//! an export happens to use.

use std::collections::{BTreeMap, HashSet};
use tracing::warn;

pub const ACTIVITY_SEQ: &str = "Activity Seq";
pub const PROJECT: &str = "Project";
pub const PROJECT_DESCRIPTION: &str = "Project Description";
pub const ACTIVITY: &str = "Activity";
pub const ACTIVITY_DESCRIPTION: &str = "Activity Description";
pub const ESTIMATED_REVENUE: &str = "Estimated Revenue";
pub const ESTIMATED_COST: &str = "Estimated Cost";
pub const ESTIMATED_HOURS: &str = "Estimated Hours";
pub const ESTIMATED_COST_TO_COMPLETE: &str = "Estimated Cost To Complete";
pub const MANAGER_DESCRIPTION: &str = "Manager Description";
pub const ACTUAL_COST: &str = "Actual Cost";
pub const BUDGET_REMAINING: &str = "Budget Remaining";
pub const INTERNAL_QUANTITY: &str = "Internal Quantity";
pub const REPORT_CODE_DESCRIPTION: &str = "Report Code Description";
pub const EMPLOYEE_DESCRIPTION: &str = "Employee Description";

/// Fields read from the AE (activities/estimates) family.
pub const AE_SCHEMA: &[&str] = &[
    ACTIVITY_SEQ,
    PROJECT,
    PROJECT_DESCRIPTION,
    ACTIVITY,
    ACTIVITY_DESCRIPTION,
    ESTIMATED_REVENUE,
    ESTIMATED_COST,
    ESTIMATED_HOURS,
    ESTIMATED_COST_TO_COMPLETE,
];

/// Estimate fields that duplicate AE rows may fill in for each other.
pub const ESTIMATE_FIELDS: &[&str] = &[
    ESTIMATED_REVENUE,
    ESTIMATED_COST,
    ESTIMATED_HOURS,
    ESTIMATED_COST_TO_COMPLETE,
];

/// Whitespace removed, case folded.
pub fn normalize(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_lowercase).collect()
}

/// Every header that matches `target`, best first.
///
/// An exact normalized match is returned alone. Otherwise headers whose
/// normalized form contains, or is contained in, the normalized target are
/// candidates, ordered by how close their length is to the target's and then
/// by header order.
pub fn candidates(headers: &[String], target: &str) -> Vec<String> {
    if let Some(h) = exact_match(headers, target) { return vec![h]; }
    let norm_target = normalize(target);
    if norm_target.is_empty() { return Vec::new(); }

    let mut partial: Vec<(usize, usize, &String)> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (i, normalize(h), h))
        .filter(|(_, n, _)| !n.is_empty() && (n.contains(&norm_target) || norm_target.contains(n.as_str())))
        .map(|(i, n, h)| (n.len().abs_diff(norm_target.len()), i, h))
        .collect();
    partial.sort();
    partial.into_iter().map(|(_, _, h)| h.clone()).collect()
}

pub fn exact_match(headers: &[String], target: &str) -> Option<String> {
    let norm_target = normalize(target);
    if norm_target.is_empty() { return None; }
    headers.iter().find(|h| normalize(h) == norm_target).cloned()
}

/// Best-matching actual header for `target`, warning when the choice was ambiguous.
pub fn find_column(headers: &[String], target: &str) -> Option<String> {
    let mut found = candidates(headers, target);
    if found.len() > 1 {
        warn!(field = target, candidates = ?found, chosen = %found[0], "ambiguous column match");
    }
    if found.is_empty() { None } else { Some(found.swap_remove(0)) }
}

/// First of `targets` (priority order) that resolves against `headers`.
pub fn first_match(headers: &[String], targets: &[impl AsRef<str>]) -> Option<String> {
    targets.iter().find_map(|t| find_column(headers, t.as_ref()))
}

/// Outcome of resolving a canonical schema against one table's headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub mapping: BTreeMap<String, String>,
    pub unresolved: Vec<String>,
    pub ambiguous: Vec<(String, Vec<String>)>,
}

impl Resolution {
    pub fn get(&self, field: &str) -> Option<&str> { self.mapping.get(field).map(String::as_str) }

    pub fn is_complete(&self) -> bool { self.unresolved.is_empty() }
}

/// Resolves every field of a schema. A header that is the exact match of one
/// field is not offered to the others as a substring candidate, so
/// `Project Description` never stands in for `Project`.
pub fn resolve(headers: &[String], fields: &[&str]) -> Resolution {
    let claimed: HashSet<String> = fields.iter().filter_map(|f| exact_match(headers, f)).collect();
    let mut out = Resolution::default();
    for &field in fields {
        let found: Vec<String> = match exact_match(headers, field) {
            Some(h) => vec![h],
            None => candidates(headers, field).into_iter().filter(|h| !claimed.contains(h)).collect(),
        };
        match found.first() {
            Some(actual) => {
                out.mapping.insert(field.to_string(), actual.clone());
                if found.len() > 1 { out.ambiguous.push((field.to_string(), found.clone())); }
            }
            None => out.unresolved.push(field.to_string()),
        }
    }
    out
}
