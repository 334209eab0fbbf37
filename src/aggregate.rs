//! AE consolidation, PT cost aggregation and the merge into report rows.

use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::HashMap,
};
use tracing::{debug, info, warn};

use crate::reconcile::{
    self, ACTIVITY, ACTIVITY_DESCRIPTION, ACTIVITY_SEQ, AE_SCHEMA, EMPLOYEE_DESCRIPTION, ESTIMATED_COST,
    ESTIMATED_COST_TO_COMPLETE, ESTIMATED_HOURS, ESTIMATED_REVENUE, ESTIMATE_FIELDS, INTERNAL_QUANTITY,
    MANAGER_DESCRIPTION, PROJECT, PROJECT_DESCRIPTION, REPORT_CODE_DESCRIPTION,
};
use crate::table::{canonical_key, parse_amount, Record, Table};
use crate::{Family, ReportError, Result};

pub const UNKNOWN_MANAGER: &str = "Unknown Manager";

/// One line of the activity report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub activity_seq: String,
    pub project: Option<String>,
    pub project_description: Option<String>,
    pub manager: String,
    pub activity: Option<String>,
    pub activity_description: Option<String>,
    pub estimated_cost: Option<f64>,
    pub estimated_revenue: Option<f64>,
    pub estimated_hours: Option<f64>,
    pub estimated_cost_to_complete: Option<f64>,
    pub actual_cost: f64,
    pub budget_remaining: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmployeeHoursRow {
    pub internal_quantity: Option<f64>,
    pub report_code_description: Option<String>,
    pub project_description: Option<String>,
    pub activity_seq: Option<String>,
    pub employee_description: Option<String>,
}

/// Actual cost summed per `Activity Seq`, keys kept in first-seen order.
/// Keys are stored in [`canonical_key`] form, so `1`, `1.0` and `001` meet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Actuals {
    order: Vec<String>,
    totals: HashMap<String, f64>,
}

impl Actuals {
    pub fn add(&mut self, key: &str, amount: f64) {
        let key = canonical_key(key);
        match self.totals.get_mut(&key) {
            Some(t) => *t += amount,
            None => {
                self.order.push(key.clone());
                self.totals.insert(key, amount);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> { self.totals.get(&canonical_key(key)).copied() }

    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    pub fn len(&self) -> usize { self.order.len() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.order.iter().map(|k| (k.as_str(), self.totals[k]))
    }
}

fn owned(v: Option<&str>) -> Option<String> { v.map(str::to_string) }

fn missing(field: &str, family: Family) -> ReportError {
    ReportError::MissingColumn { field: field.to_string(), source_name: family.to_string() }
}

/// Collapses rows sharing `key`: the first row of each group is the base and
/// later rows only fill `fill_fields` the base still has null. Keys are
/// compared in [`canonical_key`] form. Rows with a null key pass through
/// untouched. Group order follows first appearance.
pub fn consolidate(table: Table, key: &str, fill_fields: &[&str]) -> Table {
    let Table { headers, rows } = table;
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Record> = Vec::with_capacity(rows.len());
    for r in rows {
        let Some(k) = r.get(key).map(canonical_key) else {
            out.push(r);
            continue;
        };
        match index.get(&k) {
            Some(&i) => {
                let base = &mut out[i];
                for &f in fill_fields {
                    if base.is_null(f) {
                        if let Some(v) = r.get(f) { base.values.insert(f.to_string(), v.to_string()); }
                    }
                }
            }
            None => {
                index.insert(k, out.len());
                out.push(r);
            }
        }
    }
    Table { headers, rows: out }
}

/// Projects the AE export onto the canonical AE fields and consolidates
/// duplicate keys. Unresolved fields become null columns.
pub fn extract_ae(table: &Table) -> Result<Table> {
    let res = reconcile::resolve(&table.headers, AE_SCHEMA);
    let key_col = res.get(ACTIVITY_SEQ).ok_or_else(|| missing(ACTIVITY_SEQ, Family::Ae))?;
    for field in &res.unresolved {
        warn!(field = %field, "no match in AE data, column left empty");
    }
    for (field, found) in &res.ambiguous {
        warn!(field = %field, candidates = ?found, chosen = %found[0], "ambiguous AE column match");
    }
    for (field, actual) in &res.mapping {
        debug!(field = %field, actual = %actual, "AE column matched");
    }

    let mut rows = Vec::with_capacity(table.len());
    let mut dropped = 0usize;
    for r in &table.rows {
        if r.is_null(key_col) {
            dropped += 1;
            continue;
        }
        let values = res
            .mapping
            .iter()
            .filter_map(|(field, actual)| r.get(actual).map(|v| (field.clone(), v.to_string())))
            .collect();
        rows.push(Record { values });
    }
    if dropped > 0 { debug!(dropped, "AE rows without an Activity Seq dropped"); }

    let headers = AE_SCHEMA.iter().map(|s| s.to_string()).collect();
    let out = consolidate(Table { headers, rows }, ACTIVITY_SEQ, ESTIMATE_FIELDS);
    info!(records = out.len(), "unique Activity Seq records extracted from AE data");
    Ok(out)
}

/// Sums the first cost column found (in `cost_columns` priority order) per
/// `Activity Seq`. Blank or unparsable amounts count as zero.
pub fn aggregate_actuals(table: &Table, cost_columns: &[String]) -> Result<Actuals> {
    let key_col = reconcile::find_column(&table.headers, ACTIVITY_SEQ).ok_or_else(|| missing(ACTIVITY_SEQ, Family::Pt))?;
    let cost_col = reconcile::first_match(&table.headers, cost_columns)
        .ok_or_else(|| missing(&cost_columns.join(" | "), Family::Pt))?;
    info!(key = %key_col, cost = %cost_col, "aggregating PT actual costs");

    let mut actuals = Actuals::default();
    for r in &table.rows {
        let Some(k) = r.get(&key_col) else { continue };
        actuals.add(k, r.get(&cost_col).map(parse_amount).unwrap_or(0.0));
    }
    info!(records = actuals.len(), "actual costs aggregated");
    Ok(actuals)
}

/// `Project → Manager Description` from the P export. Rows missing either
/// side are skipped; a later row for the same project wins.
pub fn manager_map(table: &Table) -> Result<HashMap<String, String>> {
    let project_col = reconcile::find_column(&table.headers, PROJECT).ok_or_else(|| missing(PROJECT, Family::P))?;
    let manager_col = reconcile::find_column(&table.headers, MANAGER_DESCRIPTION)
        .ok_or_else(|| missing(MANAGER_DESCRIPTION, Family::P))?;
    let map: HashMap<String, String> = table
        .rows
        .iter()
        .filter_map(|r| Some((r.get(&project_col)?.to_string(), r.get(&manager_col)?.to_string())))
        .collect();
    info!(projects = map.len(), "project to manager mapping built");
    Ok(map)
}

fn manager_for(project: Option<&str>, managers: &HashMap<String, String>) -> String {
    project
        .and_then(|p| managers.get(p.trim()))
        .cloned()
        .unwrap_or_else(|| UNKNOWN_MANAGER.to_string())
}

fn cmp_project(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Report order: project (nulls last), then budget remaining ascending, then key.
pub fn sort_rows(rows: &mut [ReportRow]) {
    rows.sort_by(|a, b| {
        cmp_project(&a.project, &b.project)
            .then(a.budget_remaining.total_cmp(&b.budget_remaining))
            .then_with(|| a.activity_seq.cmp(&b.activity_seq))
    });
}

/// Left-joins consolidated AE rows with the PT actuals, derives
/// `Budget Remaining` and attaches the manager. With no AE rows the report is
/// built from the actuals alone, estimates left null.
pub fn merge(ae: &Table, actuals: &Actuals, managers: &HashMap<String, String>) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = if !ae.is_empty() {
        ae.rows
            .iter()
            .filter_map(|r| {
                let key = r.get(ACTIVITY_SEQ)?;
                let project = owned(r.get(PROJECT));
                let estimated_cost = r.number(ESTIMATED_COST);
                let actual_cost = actuals.get(key).unwrap_or(0.0);
                Some(ReportRow {
                    activity_seq: canonical_key(key),
                    manager: manager_for(project.as_deref(), managers),
                    project,
                    project_description: owned(r.get(PROJECT_DESCRIPTION)),
                    activity: owned(r.get(ACTIVITY)),
                    activity_description: owned(r.get(ACTIVITY_DESCRIPTION)),
                    estimated_cost,
                    estimated_revenue: r.number(ESTIMATED_REVENUE),
                    estimated_hours: r.number(ESTIMATED_HOURS),
                    estimated_cost_to_complete: r.number(ESTIMATED_COST_TO_COMPLETE),
                    actual_cost,
                    budget_remaining: estimated_cost.unwrap_or(0.0) - actual_cost,
                })
            })
            .collect()
    } else {
        if !actuals.is_empty() { warn!("AE data is empty, report built from PT actuals only"); }
        actuals
            .iter()
            .map(|(key, actual_cost)| ReportRow {
                activity_seq: key.to_string(),
                project: None,
                project_description: None,
                manager: UNKNOWN_MANAGER.to_string(),
                activity: None,
                activity_description: None,
                estimated_cost: None,
                estimated_revenue: None,
                estimated_hours: None,
                estimated_cost_to_complete: None,
                actual_cost,
                budget_remaining: -actual_cost,
            })
            .collect()
    };
    sort_rows(&mut rows);
    info!(records = rows.len(), "report rows merged");
    rows
}

/// Per-transaction hours with the activity's project description looked up
/// from the consolidated AE rows. Empty when PT carries no hours column.
pub fn employee_hours(pt: &Table, ae: &Table) -> Vec<EmployeeHoursRow> {
    let res = reconcile::resolve(
        &pt.headers,
        &[INTERNAL_QUANTITY, REPORT_CODE_DESCRIPTION, ACTIVITY_SEQ, EMPLOYEE_DESCRIPTION],
    );
    let Some(qty_col) = res.get(INTERNAL_QUANTITY) else {
        debug!("PT data has no hours column, employee hours skipped");
        return Vec::new();
    };
    for field in &res.unresolved {
        warn!(field = %field, "employee hours: no match in PT data");
    }

    let descriptions: HashMap<String, &str> = ae
        .rows
        .iter()
        .filter_map(|r| Some((canonical_key(r.get(ACTIVITY_SEQ)?), r.get(PROJECT_DESCRIPTION)?)))
        .collect();
    let cell = |r: &Record, field: &str| res.get(field).and_then(|c| r.get(c)).map(str::to_string);

    pt.rows
        .iter()
        .map(|r| {
            let seq = cell(r, ACTIVITY_SEQ);
            EmployeeHoursRow {
                internal_quantity: r.number(qty_col),
                report_code_description: cell(r, REPORT_CODE_DESCRIPTION),
                project_description: seq.as_deref().and_then(|s| descriptions.get(&canonical_key(s))).map(|d| d.to_string()),
                activity_seq: seq,
                employee_description: cell(r, EMPLOYEE_DESCRIPTION),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn table(headers: &[&str], rows: &[&[&str]]) -> Table {
        let headers: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
        let rows = rows
            .iter()
            .map(|cells| Record::from_pairs(headers.iter().cloned().zip(cells.iter().map(|c| c.to_string()))))
            .collect();
        Table::new(headers, rows)
    }

    fn costs() -> Vec<String> { crate::config::Config::default().cost_columns }

    #[test]
    fn consolidation_never_overwrites_populated_fields() {
        let t = table(
            &["Activity Seq", "Estimated Cost", "Estimated Revenue"],
            &[&["1", "100", ""], &["1", "200", "50"]],
        );
        let out = consolidate(t, ACTIVITY_SEQ, ESTIMATE_FIELDS);
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].get(ESTIMATED_COST), Some("100"));
        assert_eq!(out.rows[0].get(ESTIMATED_REVENUE), Some("50"));
    }

    #[test]
    fn consolidation_is_idempotent() {
        let t = table(
            &["Activity Seq", "Estimated Cost", "Estimated Hours"],
            &[&["2", "", "8"], &["1", "10", ""], &["2", "30", "9"], &["1", "", "4"], &["", "5", ""]],
        );
        let once = consolidate(t, ACTIVITY_SEQ, ESTIMATE_FIELDS);
        let twice = consolidate(once.clone(), ACTIVITY_SEQ, ESTIMATE_FIELDS);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
        assert_eq!(once.rows[0].get(ACTIVITY_SEQ), Some("2"));
        assert_eq!(once.rows[0].get(ESTIMATED_COST), Some("30"));
        assert_eq!(once.rows[0].get(ESTIMATED_HOURS), Some("8"));
        assert_eq!(once.rows[1].get(ESTIMATED_HOURS), Some("4"));
    }

    #[test]
    fn consolidation_leaves_non_estimate_fields_alone() {
        let t = table(&["Activity Seq", "Project"], &[&["1", ""], &["1", "P9"]]);
        let out = consolidate(t, ACTIVITY_SEQ, ESTIMATE_FIELDS);
        assert_eq!(out.rows[0].get(PROJECT), None);
    }

    #[test]
    fn extract_ae_maps_spellings_and_fills_missing() {
        let t = table(&["activity seq", "Project ID", "Est Cost"], &[&["1", "P1", "10"], &["", "P2", "3"]]);
        let out = extract_ae(&t).unwrap();
        assert_eq!(out.headers.len(), AE_SCHEMA.len());
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].get(PROJECT), Some("P1"));
        assert!(out.rows[0].is_null(ESTIMATED_REVENUE));
    }

    #[test]
    fn extract_ae_requires_key() {
        let t = table(&["Project", "Estimated Cost"], &[&["P1", "10"]]);
        assert!(matches!(extract_ae(&t), Err(ReportError::MissingColumn { .. })));
    }

    #[test]
    fn actuals_sum_per_key() {
        let t = table(
            &["Activity Seq", "Internal Price"],
            &[&["7", "10"], &["7", "20"], &["8", "1"], &["7", "5"], &["", "99"]],
        );
        let a = aggregate_actuals(&t, &costs()).unwrap();
        assert_abs_diff_eq!(a.get("7").unwrap(), 35.0);
        assert_abs_diff_eq!(a.get("8").unwrap(), 1.0);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn actuals_use_first_available_candidate() {
        let t = table(&["Activity Seq", "Sales Price", "Internal Amount"], &[&["1", "5", "100"]]);
        let a = aggregate_actuals(&t, &costs()).unwrap();
        assert_abs_diff_eq!(a.get("1").unwrap(), 5.0);
    }

    #[test]
    fn actuals_without_cost_column_fail() {
        let t = table(&["Activity Seq", "Hours"], &[&["1", "5"]]);
        assert!(aggregate_actuals(&t, &costs()).is_err());
    }

    #[test]
    fn manager_map_skips_incomplete_rows() {
        let t = table(&["Project ID", "Manager Description"], &[&["P1", " Alice "], &["P2", ""], &["", "Bob"]]);
        let m = manager_map(&t).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m["P1"], "Alice");
    }

    #[test]
    fn budget_remaining_and_unmatched_activities() {
        let ae = extract_ae(&table(
            &["Activity Seq", "Project", "Estimated Cost"],
            &[&["1", "P1", "500"], &["2", "P1", "80"], &["3", "P2", ""]],
        ))
        .unwrap();
        let mut actuals = Actuals::default();
        actuals.add("1", 150.0);
        actuals.add("3", 10.0);
        let managers = HashMap::from([("P1".to_string(), "Alice".to_string())]);
        let rows = merge(&ae, &actuals, &managers);
        let by_key = |k: &str| rows.iter().find(|r| r.activity_seq == k).unwrap();

        assert_abs_diff_eq!(by_key("1").budget_remaining, 350.0);
        assert_abs_diff_eq!(by_key("2").actual_cost, 0.0);
        assert_abs_diff_eq!(by_key("2").budget_remaining, 80.0);
        assert_abs_diff_eq!(by_key("3").budget_remaining, -10.0);
        assert_eq!(by_key("3").manager, UNKNOWN_MANAGER);
        for r in &rows {
            assert_abs_diff_eq!(r.budget_remaining, r.estimated_cost.unwrap_or(0.0) - r.actual_cost);
        }
        // P1 rows first, ordered by budget remaining.
        let keys: Vec<_> = rows.iter().map(|r| r.activity_seq.as_str()).collect();
        assert_eq!(keys, vec!["2", "1", "3"]);
    }

    #[test]
    fn numeric_keys_join_by_value() {
        let ae = extract_ae(&table(&["Activity Seq", "Project", "Estimated Cost"], &[&["1", "P1", "500"]])).unwrap();
        let pt = table(
            &["Activity Seq", "Internal Price", "Internal Quantity"],
            &[&["1.0", "100", "3"], &["0001", "50", "1"]],
        );
        let actuals = aggregate_actuals(&pt, &costs()).unwrap();
        assert_eq!(actuals.len(), 1);

        let rows = merge(&ae, &actuals, &HashMap::new());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].activity_seq, "1");
        assert_abs_diff_eq!(rows[0].actual_cost, 150.0);
        assert_abs_diff_eq!(rows[0].budget_remaining, 350.0);

        let ae = extract_ae(&table(&["Activity Seq", "Project Description"], &[&["1", "Roof repair"]])).unwrap();
        let hours = employee_hours(&pt, &ae);
        assert!(hours.iter().all(|h| h.project_description.as_deref() == Some("Roof repair")));
    }

    #[test]
    fn consolidation_groups_equivalent_keys() {
        let t = table(&["Activity Seq", "Estimated Cost", "Estimated Revenue"], &[&["7", "10", ""], &["7.0", "", "20"]]);
        let out = consolidate(t, ACTIVITY_SEQ, ESTIMATE_FIELDS);
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].get(ESTIMATED_REVENUE), Some("20"));
    }

    #[test]
    fn pt_only_report_when_ae_is_empty() {
        let mut actuals = Actuals::default();
        actuals.add("9", 40.0);
        let rows = merge(&Table::default(), &actuals, &HashMap::new());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].estimated_cost, None);
        assert_abs_diff_eq!(rows[0].budget_remaining, -40.0);
    }

    #[test]
    fn employee_hours_link_project_description() {
        let pt = table(
            &["Project Activity Sequence", "Internal Quantity", "Employee Description"],
            &[&["1", "7.5", "Dana"], &["4", "2", "Eli"]],
        );
        let ae = extract_ae(&table(&["Activity Seq", "Project Description"], &[&["1", "Roof repair"]])).unwrap();
        let rows = employee_hours(&pt, &ae);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].project_description.as_deref(), Some("Roof repair"));
        assert_eq!(rows[0].internal_quantity, Some(7.5));
        assert_eq!(rows[1].project_description, None);
        assert_eq!(rows[1].report_code_description, None);
    }
}
