use calamine::{open_workbook_auto, Reader};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use encoding_rs::{UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};
use tracing::debug;

use crate::{ReportError, Result};

/// Delimiters tried, in order, for `.txt` / `.dat` exports.
pub const TEXT_DELIMITERS: &[u8] = b"\t,;|";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub values: HashMap<String, String>,
}

impl Record {
    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self { values: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }

    /// Cell text, or `None` when the cell is absent or blank.
    pub fn get(&self, col: &str) -> Option<&str> {
        self.values.get(col).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    pub fn is_null(&self, col: &str) -> bool { self.get(col).is_none() }

    pub fn number(&self, col: &str) -> Option<f64> { self.get(col).and_then(parse_number) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Record>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Record>) -> Self { Self { headers, rows } }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    pub fn len(&self) -> usize { self.rows.len() }

    /// Stacks tables; the header list is the union in first-seen order and
    /// cells missing from a source table stay null.
    pub fn concat(tables: impl IntoIterator<Item = Table>) -> Table {
        let mut out = Table::default();
        for t in tables {
            for h in t.headers {
                if !out.headers.contains(&h) { out.headers.push(h); }
            }
            out.rows.extend(t.rows);
        }
        out
    }
}

fn normalize_header(h: &str) -> String { h.trim().to_string() }

fn header_names<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    raw.enumerate()
        .map(|(i, h)| {
            let h = normalize_header(h);
            if h.is_empty() { format!("Column {}", i + 1) } else { h }
        })
        .collect()
}

fn xlsx_to_string<T: calamine::DataType>(cell: &T) -> String {
    // Only cells flagged as dates are rendered as dates; plain numbers stay numbers.
    if cell.is_datetime() || cell.is_datetime_iso() {
        if let Some(dt) = cell.as_date() { return dt.format("%Y-%m-%d").to_string(); }
    }
    if let Some(f) = cell.get_float() {
        // Integral floats print without ".0"; outside i64 range the cast would saturate.
        if f.fract() == 0.0 && f.abs() < i64::MAX as f64 { return format!("{}", f as i64); }
        return f.to_string();
    }
    if let Some(i) = cell.get_int() { return i.to_string(); }
    if let Some(s) = cell.as_string() { return s; }
    if let Some(b) = cell.get_bool() { return b.to_string(); }
    String::new()
}

fn push_row(rows: &mut Vec<Record>, headers: &[String], cells: impl Iterator<Item = String>) {
    let mut map: HashMap<String, String> = HashMap::new();
    for (i, v) in cells.enumerate() {
        if let Some(h) = headers.get(i) { map.insert(h.clone(), v.trim().to_string()); }
    }
    // Skip completely empty rows
    if map.values().all(|v| v.is_empty()) { return; }
    rows.push(Record { values: map });
}

/// One worksheet as a table, the first row being the header. `sheet` defaults
/// to the first worksheet in the workbook.
pub fn load_sheet(path: &Path, sheet: Option<&str>) -> Result<Table> {
    let mut wb = open_workbook_auto(path)?;
    let name = match sheet {
        Some(s) => s.to_string(),
        None => wb
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ReportError::NoWorksheet(path.to_path_buf()))?,
    };
    let range = wb.worksheet_range(&name)?;

    let mut rows_iter = range.rows();
    let Some(header_row) = rows_iter.next() else { return Ok(Table::default()) };
    let cells: Vec<String> = header_row.iter().map(xlsx_to_string).collect();
    let headers = header_names(cells.iter().map(String::as_str));

    let mut rows = Vec::new();
    for r in rows_iter {
        push_row(&mut rows, &headers, r.iter().map(xlsx_to_string));
    }
    Ok(Table { headers, rows })
}

/// UTF-8 first (a BOM is dropped), Windows-1252 when the bytes are not valid UTF-8.
pub fn decode_text(bytes: &[u8]) -> String {
    let (text, _, had_errors) = UTF_8.decode(bytes);
    if !had_errors { return text.into_owned(); }
    debug!("input is not valid UTF-8, decoding as Windows-1252");
    WINDOWS_1252.decode(bytes).0.into_owned()
}

pub fn parse_delimited(text: &str, delimiter: u8) -> Result<Table> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());
    let headers = header_names(rdr.headers()?.iter());
    let mut rows = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        push_row(&mut rows, &headers, rec.iter().map(str::to_string));
    }
    Ok(Table { headers, rows })
}

/// Tries each candidate delimiter and keeps the first parse with more than one column.
pub fn infer_delimited(text: &str, candidates: &[u8]) -> Option<(u8, Table)> {
    candidates.iter().find_map(|&d| match parse_delimited(text, d) {
        Ok(t) if t.headers.len() > 1 => Some((d, t)),
        _ => None,
    })
}

fn load_csv(path: &Path) -> Result<Table> {
    let bytes = fs::read(path)?;
    parse_delimited(&decode_text(&bytes), b',')
}

fn load_text(path: &Path) -> Result<Table> {
    let bytes = fs::read(path)?;
    let text = decode_text(&bytes);
    let (d, table) = infer_delimited(&text, TEXT_DELIMITERS)
        .ok_or_else(|| ReportError::NoDelimiter(path.to_path_buf()))?;
    debug!(file = %path.display(), delimiter = ?(d as char), "delimiter inferred");
    Ok(table)
}

pub fn load_table(path: &Path) -> Result<Table> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "xlsx" | "xlsm" | "xls" => load_sheet(path, None),
        "csv" => load_csv(path),
        "txt" | "dat" => load_text(path),
        _ => Err(ReportError::UnsupportedFile(path.to_path_buf())),
    }
}

/// Lenient amount parsing: thousands separators, currency prefixes and
/// `(123)` negatives. Unparsable text yields `None`.
pub fn parse_number(s: &str) -> Option<f64> {
    let mut t = s.trim().replace(',', "");
    if t.is_empty() { return None; }
    let has_paren = t.starts_with('(') && t.ends_with(')');
    if has_paren {
        t = t.trim_matches(|c: char| c == '(' || c == ')').to_string();
    }
    let neg_prefix = t.starts_with('-');
    let body = t
        .trim_start_matches('-')
        .trim_start_matches(|c: char| c == '$' || c == '€' || c == '£')
        .trim();
    let v = body.parse::<f64>().ok().filter(|v| v.is_finite())?;
    let v = if neg_prefix { -v } else { v };
    Some(if has_paren { -v } else { v })
}

/// Join-key form of an identifier: integer-valued numeric text (`1.0`, `001`,
/// `+7`) becomes its plain integer digits, anything else is only trimmed.
/// Works on the digits so long identifiers never pass through a float.
pub fn canonical_key(s: &str) -> String {
    let t = s.trim();
    let (neg, body) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let (int, frac) = body.split_once('.').unwrap_or((body, ""));
    let numeric = !int.is_empty() && int.bytes().all(|b| b.is_ascii_digit()) && frac.bytes().all(|b| b == b'0');
    if !numeric { return t.to_string(); }
    let digits = int.trim_start_matches('0');
    match (digits.is_empty(), neg) {
        (true, _) => "0".to_string(),
        (false, true) => format!("-{digits}"),
        (false, false) => digits.to_string(),
    }
}

/// Numeric coercion with null → 0.
pub fn parse_amount(s: &str) -> f64 { parse_number(s).unwrap_or(0.0) }

pub fn parse_date_flex(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() { return None; }
    const FORMATS: &[&str] = &[
        "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%d/%m/%Y", "%m/%d/%Y",
        "%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f",
    ];
    for f in FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, f) { return Some(d); }
    }
    None
}
