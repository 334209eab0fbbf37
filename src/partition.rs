use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::aggregate::ReportRow;

/// Excel's limit on worksheet name length, in characters.
pub const MAX_SHEET_NAME_CHARS: usize = 31;
const INVALID_SHEET_CHARS: [char; 7] = ['\\', '/', '*', '?', ':', '[', ']'];

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub manager: String,
    pub sheet_name: String,
    pub rows: Vec<ReportRow>,
}

fn truncate_chars(s: &str, max_chars: usize) -> String { s.chars().take(max_chars).collect() }

pub fn sanitize_sheet_name(name: &str) -> String {
    let s: String = name.chars().map(|c| if INVALID_SHEET_CHARS.contains(&c) { '_' } else { c }).collect();
    // Excel rejects names that start or end with an apostrophe.
    let s = s.trim().trim_matches('\'').trim();
    let t = truncate_chars(s, MAX_SHEET_NAME_CHARS);
    let t = t.trim_end();
    if t.is_empty() { "Sheet".to_string() } else { t.to_string() }
}

/// Hands out sheet names that are valid and unique within one workbook.
/// Excel compares sheet names case-insensitively, so does this.
#[derive(Debug, Default)]
pub struct SheetNamer {
    used: HashSet<String>,
}

impl SheetNamer {
    pub fn with_reserved(reserved: &[&str]) -> Self {
        Self { used: reserved.iter().map(|r| r.to_lowercase()).collect() }
    }

    pub fn unique(&mut self, base: &str) -> String {
        let candidate = sanitize_sheet_name(base);
        if self.used.insert(candidate.to_lowercase()) { return candidate; }
        // Append "_1", "_2" ... while keeping within the length limit
        let mut idx: u32 = 1;
        loop {
            let suffix = format!("_{idx}");
            let max_base = MAX_SHEET_NAME_CHARS.saturating_sub(suffix.chars().count());
            let cand = format!("{}{suffix}", truncate_chars(&candidate, max_base).trim_end());
            if self.used.insert(cand.to_lowercase()) { return cand; }
            idx += 1;
        }
    }
}

/// Groups rows by manager in first-appearance order, dropping `excluded`
/// managers (compared trimmed), and names a sheet for each group.
pub fn partition_by_manager(rows: &[ReportRow], excluded: &[String], namer: &mut SheetNamer) -> Vec<Partition> {
    let excluded: HashSet<&str> = excluded.iter().map(|e| e.trim()).collect();
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<ReportRow>)> = Vec::new();
    for r in rows {
        let m = r.manager.trim();
        if excluded.contains(m) { continue; }
        match index.get(m) {
            Some(&i) => groups[i].1.push(r.clone()),
            None => {
                index.insert(m, groups.len());
                groups.push((m.to_string(), vec![r.clone()]));
            }
        }
    }

    let parts: Vec<Partition> = groups
        .into_iter()
        .map(|(manager, rows)| {
            let sheet_name = namer.unique(&manager);
            debug!(manager = %manager, sheet = %sheet_name, rows = rows.len(), "manager partition");
            Partition { manager, sheet_name, rows }
        })
        .collect();
    info!(partitions = parts.len(), excluded = excluded.len(), "rows partitioned by manager");
    parts
}
