//! Filtering and summarising a report that has already been written.

use chrono::NaiveDate;
use std::{collections::HashMap, fmt, path::Path};
use tracing::{debug, info};

use crate::reconcile::{self, ACTUAL_COST, BUDGET_REMAINING, ESTIMATED_COST, PROJECT};
use crate::report;
use crate::sink::{commit, FileDestination, WriteOutcome};
use crate::table::{load_sheet, parse_date_flex, parse_number, Record, Table};
use crate::{ReportError, Result};

pub const DEFAULT_TOP_N: usize = 30;
pub const EXPORT_SHEET: &str = "Filtered";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Date,
    Categorical,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Date => "date",
            ColumnKind::Categorical => "categorical",
        })
    }
}

/// Numeric when every non-null cell parses as a number, date when every one
/// parses as a date, categorical otherwise (including all-null columns).
pub fn infer_kind(table: &Table, column: &str) -> ColumnKind {
    let mut values = table.rows.iter().filter_map(|r| r.get(column)).peekable();
    if values.peek().is_none() { return ColumnKind::Categorical; }
    let values: Vec<&str> = values.collect();
    if values.iter().all(|v| parse_number(v).is_some()) {
        ColumnKind::Numeric
    } else if values.iter().all(|v| parse_date_flex(v).is_some()) {
        ColumnKind::Date
    } else {
        ColumnKind::Categorical
    }
}

/// A row filter. Bounds are inclusive; an absent bound is open.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Range { column: String, lo: Option<f64>, hi: Option<f64> },
    Dates { column: String, start: Option<NaiveDate>, end: Option<NaiveDate> },
    Select { column: String, values: Vec<String> },
}

fn split_column<'a>(spec: &'a str, form: &str) -> Result<(&'a str, &'a str)> {
    let (col, rest) = spec
        .split_once('=')
        .ok_or_else(|| ReportError::InvalidFilter(format!("'{spec}' is not of the form {form}")))?;
    let col = col.trim();
    if col.is_empty() { return Err(ReportError::InvalidFilter(format!("'{spec}' names no column"))); }
    Ok((col, rest.trim()))
}

fn split_bounds<'a>(spec: &str, rest: &'a str) -> Result<(&'a str, &'a str)> {
    let (lo, hi) = rest
        .split_once("..")
        .ok_or_else(|| ReportError::InvalidFilter(format!("'{spec}' has no '..' between the bounds")))?;
    Ok((lo.trim(), hi.trim()))
}

fn bound<T>(spec: &str, s: &str, parse: impl Fn(&str) -> Option<T>) -> Result<Option<T>> {
    if s.is_empty() { return Ok(None); }
    parse(s).map(Some).ok_or_else(|| ReportError::InvalidFilter(format!("'{s}' in '{spec}' is not a valid bound")))
}

impl Filter {
    /// `COL=LO..HI`; either bound may be left out.
    pub fn parse_range(spec: &str) -> Result<Self> {
        let (col, rest) = split_column(spec, "COL=LO..HI")?;
        let (lo, hi) = split_bounds(spec, rest)?;
        let (lo, hi) = (bound(spec, lo, parse_number)?, bound(spec, hi, parse_number)?);
        if let (Some(l), Some(h)) = (lo, hi) {
            if l > h { return Err(ReportError::InvalidFilter(format!("'{spec}': lower bound above upper bound"))); }
        }
        Ok(Filter::Range { column: col.to_string(), lo, hi })
    }

    /// `COL=START..END` with dates in any accepted format.
    pub fn parse_dates(spec: &str) -> Result<Self> {
        let (col, rest) = split_column(spec, "COL=START..END")?;
        let (start, end) = split_bounds(spec, rest)?;
        let (start, end) = (bound(spec, start, parse_date_flex)?, bound(spec, end, parse_date_flex)?);
        if let (Some(s), Some(e)) = (start, end) {
            if s > e { return Err(ReportError::InvalidFilter(format!("'{spec}': start date after end date"))); }
        }
        Ok(Filter::Dates { column: col.to_string(), start, end })
    }

    /// `COL=V1,V2,...`
    pub fn parse_select(spec: &str) -> Result<Self> {
        let (col, rest) = split_column(spec, "COL=V1,V2")?;
        let values: Vec<String> = rest.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect();
        if values.is_empty() { return Err(ReportError::InvalidFilter(format!("'{spec}' selects no values"))); }
        Ok(Filter::Select { column: col.to_string(), values })
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Range { column, .. } | Filter::Dates { column, .. } | Filter::Select { column, .. } => column,
        }
    }

    fn expected_kind(&self) -> Option<ColumnKind> {
        match self {
            Filter::Range { .. } => Some(ColumnKind::Numeric),
            Filter::Dates { .. } => Some(ColumnKind::Date),
            Filter::Select { .. } => None,
        }
    }

    fn keeps(&self, actual: &str, r: &Record) -> bool {
        match self {
            Filter::Range { lo, hi, .. } => match r.number(actual) {
                Some(v) => lo.is_none_or(|l| v >= l) && hi.is_none_or(|h| v <= h),
                None => false,
            },
            Filter::Dates { start, end, .. } => match r.get(actual).and_then(parse_date_flex) {
                Some(d) => start.is_none_or(|s| d >= s) && end.is_none_or(|e| d <= e),
                None => false,
            },
            Filter::Select { values, .. } => r.get(actual).is_some_and(|v| values.iter().any(|s| s == v)),
        }
    }
}

/// Rows passing every filter. Filter columns resolve like source columns do;
/// a range or date filter on a column of another kind is rejected.
pub fn apply_filters(table: &Table, filters: &[Filter]) -> Result<Table> {
    let mut resolved = Vec::with_capacity(filters.len());
    for f in filters {
        let actual = reconcile::find_column(&table.headers, f.column())
            .ok_or_else(|| ReportError::InvalidFilter(format!("no column matching '{}'", f.column())))?;
        if let Some(expected) = f.expected_kind() {
            let kind = infer_kind(table, &actual);
            if kind != expected {
                return Err(ReportError::InvalidFilter(format!(
                    "'{actual}' is a {kind} column, a {expected} filter does not apply"
                )));
            }
        }
        debug!(column = %actual, filter = ?f, "filter resolved");
        resolved.push((f, actual));
    }
    let rows: Vec<Record> = table
        .rows
        .iter()
        .filter(|r| resolved.iter().all(|(f, actual)| f.keeps(actual, r)))
        .cloned()
        .collect();
    info!(before = table.len(), after = rows.len(), filters = filters.len(), "filters applied");
    Ok(Table::new(table.headers.clone(), rows))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    pub rows: usize,
    pub estimated_cost: Option<f64>,
    pub actual_cost: Option<f64>,
    pub budget_remaining: Option<f64>,
}

fn column_sum(table: &Table, field: &str) -> Option<f64> {
    let col = reconcile::exact_match(&table.headers, field)?;
    Some(table.rows.iter().filter_map(|r| r.number(&col)).sum())
}

/// Row count plus the money sums, each present only when its column exists.
pub fn metrics(table: &Table) -> Metrics {
    Metrics {
        rows: table.len(),
        estimated_cost: column_sum(table, ESTIMATED_COST),
        actual_cost: column_sum(table, ACTUAL_COST),
        budget_remaining: column_sum(table, BUDGET_REMAINING),
    }
}

/// `Budget Remaining` summed per project, largest first, at most `n` entries.
/// Empty when either column is missing.
pub fn top_projects(table: &Table, n: usize) -> Vec<(String, f64)> {
    let (Some(project), Some(budget)) = (
        reconcile::exact_match(&table.headers, PROJECT),
        reconcile::exact_match(&table.headers, BUDGET_REMAINING),
    ) else {
        return Vec::new();
    };
    let mut totals: HashMap<&str, f64> = HashMap::new();
    for r in &table.rows {
        let Some(p) = r.get(&project) else { continue };
        *totals.entry(p).or_insert(0.0) += r.number(&budget).unwrap_or(0.0);
    }
    let mut out: Vec<(String, f64)> = totals.into_iter().map(|(p, v)| (p.to_string(), v)).collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out.truncate(n);
    out
}

/// Reads a written report; `sheet` defaults to the first worksheet.
pub fn load_report(path: &Path, sheet: Option<&str>) -> Result<Table> {
    let t = load_sheet(path, sheet)?;
    info!(report = %path.display(), sheet = sheet.unwrap_or(report::MAIN_SHEET), rows = t.len(), "report loaded");
    Ok(t)
}

pub fn export(table: &Table, path: &Path) -> Result<WriteOutcome> {
    let bytes = report::render_table(EXPORT_SHEET, table)?;
    commit(&FileDestination::new(path), &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample() -> Table {
        let headers: Vec<String> = ["Project", "Manager Description", "Estimated Cost", "Actual Cost", "Budget Remaining", "Start"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = [
            ["P1", "Alice", "500", "150", "350", "2024-01-15"],
            ["P1", "Alice", "80", "0", "80", "2024-02-01"],
            ["P2", "Bob", "", "10", "-10", "2024-03-31"],
            ["P3", "Carol", "1000", "100", "900", "2024-05-01"],
        ]
        .iter()
        .map(|cells| Record::from_pairs(headers.iter().cloned().zip(cells.iter().map(|c| c.to_string()))))
        .collect();
        Table::new(headers, rows)
    }

    #[test]
    fn kinds_are_inferred() {
        let t = sample();
        assert_eq!(infer_kind(&t, "Budget Remaining"), ColumnKind::Numeric);
        assert_eq!(infer_kind(&t, "Start"), ColumnKind::Date);
        assert_eq!(infer_kind(&t, "Manager Description"), ColumnKind::Categorical);
        assert_eq!(infer_kind(&t, "Missing"), ColumnKind::Categorical);
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let t = sample();
        let out = apply_filters(&t, &[Filter::parse_range("Budget Remaining=80..350").unwrap()]).unwrap();
        assert_eq!(out.len(), 2);
        let open = apply_filters(&t, &[Filter::parse_range("Budget Remaining=..0").unwrap()]).unwrap();
        assert_eq!(open.len(), 1);
    }

    #[test]
    fn date_and_select_filters_combine() {
        let t = sample();
        let filters = [
            Filter::parse_dates("Start=2024-02-01..2024-03-31").unwrap(),
            Filter::parse_select("Manager Description=Alice, Bob").unwrap(),
        ];
        let out = apply_filters(&t, &filters).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.rows.iter().all(|r| r.get("Start") != Some("2024-01-15")));
    }

    #[test]
    fn filter_on_wrong_kind_is_rejected() {
        let t = sample();
        let err = apply_filters(&t, &[Filter::parse_range("Manager Description=1..2").unwrap()]);
        assert!(matches!(err, Err(ReportError::InvalidFilter(_))));
        assert!(apply_filters(&t, &[Filter::parse_select("Nowhere=x").unwrap()]).is_err());
    }

    #[test]
    fn malformed_filters_fail_to_parse() {
        assert!(Filter::parse_range("Budget Remaining").is_err());
        assert!(Filter::parse_range("Budget Remaining=5..1").is_err());
        assert!(Filter::parse_range("=1..2").is_err());
        assert!(Filter::parse_dates("Start=soon..later").is_err());
        assert!(Filter::parse_select("Project=").is_err());
    }

    #[test]
    fn metrics_sum_filtered_rows() {
        let t = sample();
        let m = metrics(&apply_filters(&t, &[Filter::parse_select("Project=P1").unwrap()]).unwrap());
        assert_eq!(m.rows, 2);
        assert_abs_diff_eq!(m.estimated_cost.unwrap(), 580.0);
        assert_abs_diff_eq!(m.actual_cost.unwrap(), 150.0);
        assert_abs_diff_eq!(m.budget_remaining.unwrap(), 430.0);

        let bare = Table::new(vec!["Project".into()], vec![]);
        assert_eq!(metrics(&bare).estimated_cost, None);
    }

    #[test]
    fn top_projects_by_budget_remaining() {
        let top = top_projects(&sample(), DEFAULT_TOP_N);
        let names: Vec<&str> = top.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(names, vec!["P3", "P1", "P2"]);
        assert_abs_diff_eq!(top[1].1, 430.0);
        assert_eq!(top_projects(&sample(), 1).len(), 1);
    }
}
