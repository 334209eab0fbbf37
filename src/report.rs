use rust_xlsxwriter::{Color, ConditionalFormatDataBar, Format, Workbook, Worksheet, XlsxError};
use tracing::{debug, info};

use crate::aggregate::{EmployeeHoursRow, ReportRow};
use crate::partition::Partition;
use crate::reconcile::{
    ACTIVITY, ACTIVITY_DESCRIPTION, ACTIVITY_SEQ, ACTUAL_COST, BUDGET_REMAINING, EMPLOYEE_DESCRIPTION, ESTIMATED_COST,
    ESTIMATED_COST_TO_COMPLETE, ESTIMATED_HOURS, ESTIMATED_REVENUE, INTERNAL_QUANTITY, MANAGER_DESCRIPTION, PROJECT,
    PROJECT_DESCRIPTION, REPORT_CODE_DESCRIPTION,
};
use crate::table::Table;
use crate::Result;

pub const MAIN_SHEET: &str = "Activity Report";
pub const TOTALS_SHEET: &str = "Totals";
pub const EMPLOYEE_HOURS_SHEET: &str = "Employee Hours";
pub const RESERVED_SHEETS: &[&str] = &[MAIN_SHEET, TOTALS_SHEET, EMPLOYEE_HOURS_SHEET];

pub const REPORT_COLUMNS: &[&str] = &[
    ACTIVITY_SEQ,
    PROJECT,
    PROJECT_DESCRIPTION,
    MANAGER_DESCRIPTION,
    ACTIVITY,
    ACTIVITY_DESCRIPTION,
    ESTIMATED_COST,
    ESTIMATED_REVENUE,
    ESTIMATED_HOURS,
    ESTIMATED_COST_TO_COMPLETE,
    ACTUAL_COST,
    BUDGET_REMAINING,
];

pub const MONEY_COLUMNS: &[&str] = &[
    ESTIMATED_COST,
    ESTIMATED_REVENUE,
    ESTIMATED_COST_TO_COMPLETE,
    ACTUAL_COST,
    BUDGET_REMAINING,
];

const EMPLOYEE_HOURS_COLUMNS: &[&str] = &[
    INTERNAL_QUANTITY,
    REPORT_CODE_DESCRIPTION,
    PROJECT_DESCRIPTION,
    ACTIVITY_SEQ,
    EMPLOYEE_DESCRIPTION,
];

const TOTALS_COLUMNS: &[&str] = &[
    MANAGER_DESCRIPTION,
    "Activities",
    ESTIMATED_COST,
    ESTIMATED_REVENUE,
    ACTUAL_COST,
    BUDGET_REMAINING,
];

const MAX_CELL_CHARS: usize = 32_767;
const MAX_COLUMN_WIDTH: usize = 50;
const HEADER_FILL: u32 = 0x4F81BD;
const DATA_BAR_FILL: u32 = 0x00B050;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell<'a> {
    Text(&'a str),
    Number(f64),
    Empty,
}

impl<'a> Cell<'a> {
    fn text(v: &'a Option<String>) -> Self { v.as_deref().map_or(Cell::Empty, Cell::Text) }

    fn number(v: Option<f64>) -> Self { v.map_or(Cell::Empty, Cell::Number) }

    fn width(&self) -> usize {
        match self {
            Cell::Text(s) => s.chars().count(),
            Cell::Number(n) => format!("{n:.2}").len() + 1,
            Cell::Empty => 0,
        }
    }
}

pub fn report_cells(r: &ReportRow) -> Vec<Cell<'_>> {
    vec![
        Cell::Text(&r.activity_seq),
        Cell::text(&r.project),
        Cell::text(&r.project_description),
        Cell::Text(&r.manager),
        Cell::text(&r.activity),
        Cell::text(&r.activity_description),
        Cell::number(r.estimated_cost),
        Cell::number(r.estimated_revenue),
        Cell::number(r.estimated_hours),
        Cell::number(r.estimated_cost_to_complete),
        Cell::Number(r.actual_cost),
        Cell::Number(r.budget_remaining),
    ]
}

fn hours_cells(r: &EmployeeHoursRow) -> Vec<Cell<'_>> {
    vec![
        Cell::number(r.internal_quantity),
        Cell::text(&r.report_code_description),
        Cell::text(&r.project_description),
        Cell::text(&r.activity_seq),
        Cell::text(&r.employee_description),
    ]
}

/// Per-manager sums shown on the totals sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerTotals {
    pub manager: String,
    pub activities: usize,
    pub estimated_cost: f64,
    pub estimated_revenue: f64,
    pub actual_cost: f64,
    pub budget_remaining: f64,
}

impl ManagerTotals {
    pub fn of(manager: &str, rows: &[ReportRow]) -> Self {
        Self {
            manager: manager.to_string(),
            activities: rows.len(),
            estimated_cost: rows.iter().filter_map(|r| r.estimated_cost).sum(),
            estimated_revenue: rows.iter().filter_map(|r| r.estimated_revenue).sum(),
            actual_cost: rows.iter().map(|r| r.actual_cost).sum(),
            budget_remaining: rows.iter().map(|r| r.budget_remaining).sum(),
        }
    }
}

pub fn manager_totals(partitions: &[Partition]) -> Vec<ManagerTotals> {
    partitions.iter().map(|p| ManagerTotals::of(&p.manager, &p.rows)).collect()
}

struct Formats {
    header: Format,
    money: Format,
    number: Format,
}

impl Formats {
    fn new() -> Self {
        Self {
            header: Format::new()
                .set_bold()
                .set_font_color(Color::White)
                .set_background_color(Color::RGB(HEADER_FILL)),
            money: Format::new().set_num_format("$#,##0.00"),
            number: Format::new().set_num_format("#,##0.00"),
        }
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String { s.chars().take(max_chars).collect() }

/// Header row, data rows, fitted column widths and a frozen header.
fn write_grid<'a>(
    ws: &mut Worksheet,
    headers: &[&str],
    rows: impl IntoIterator<Item = Vec<Cell<'a>>>,
    fmt: &Formats,
) -> std::result::Result<u32, XlsxError> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for (c, h) in headers.iter().enumerate() {
        ws.write_string_with_format(0, c as u16, *h, &fmt.header)?;
    }
    let mut written = 0u32;
    for (i, cells) in rows.into_iter().enumerate() {
        let row = (i + 1) as u32;
        for (c, cell) in cells.iter().enumerate() {
            let col = c as u16;
            let money = headers.get(c).is_some_and(|h| MONEY_COLUMNS.contains(h));
            match cell {
                Cell::Text(s) => {
                    ws.write_string(row, col, truncate_chars(s, MAX_CELL_CHARS))?;
                }
                Cell::Number(n) => {
                    ws.write_number_with_format(row, col, *n, if money { &fmt.money } else { &fmt.number })?;
                }
                Cell::Empty => {}
            }
            if let Some(w) = widths.get_mut(c) { *w = (*w).max(cell.width()); }
        }
        written = row;
    }
    for (c, w) in widths.iter().enumerate() {
        ws.set_column_width(c as u16, ((*w + 2).min(MAX_COLUMN_WIDTH)) as f64)?;
    }
    ws.set_freeze_panes(1, 0)?;
    Ok(written)
}

/// Inclusive 0-based row ranges of consecutive rows sharing a project.
pub fn project_blocks(rows: &[ReportRow]) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    let mut start = 0usize;
    for i in 1..=rows.len() {
        if i == rows.len() || rows[i].project != rows[start].project {
            blocks.push((start, i - 1));
            start = i;
        }
    }
    blocks
}

fn add_budget_bars(ws: &mut Worksheet, rows: &[ReportRow]) -> std::result::Result<(), XlsxError> {
    let Some(col) = REPORT_COLUMNS.iter().position(|c| *c == BUDGET_REMAINING) else { return Ok(()) };
    let bar = ConditionalFormatDataBar::new().set_fill_color(Color::RGB(DATA_BAR_FILL));
    for (first, last) in project_blocks(rows) {
        ws.add_conditional_format((first + 1) as u32, col as u16, (last + 1) as u32, col as u16, &bar)?;
    }
    Ok(())
}

fn write_report_sheet(wb: &mut Workbook, name: &str, rows: &[ReportRow], fmt: &Formats) -> Result<()> {
    let ws = wb.add_worksheet().set_name(name)?;
    write_grid(ws, REPORT_COLUMNS, rows.iter().map(report_cells), fmt)?;
    add_budget_bars(ws, rows)?;
    debug!(sheet = name, rows = rows.len(), "report sheet written");
    Ok(())
}

fn totals_cells(t: &ManagerTotals) -> Vec<Cell<'_>> {
    vec![
        Cell::Text(t.manager.as_str()),
        Cell::Number(t.activities as f64),
        Cell::Number(t.estimated_cost),
        Cell::Number(t.estimated_revenue),
        Cell::Number(t.actual_cost),
        Cell::Number(t.budget_remaining),
    ]
}

fn write_totals_sheet(wb: &mut Workbook, totals: &[ManagerTotals], grand: &ManagerTotals, fmt: &Formats) -> Result<()> {
    let ws = wb.add_worksheet().set_name(TOTALS_SHEET)?;
    let last = write_grid(ws, TOTALS_COLUMNS, totals.iter().map(totals_cells), fmt)?;

    // Grand total, one blank row below the managers
    let row = last + 2;
    ws.write_string_with_format(row, 0, grand.manager.as_str(), &fmt.header)?;
    ws.write_number(row, 1, grand.activities as f64)?;
    for (c, v) in [grand.estimated_cost, grand.estimated_revenue, grand.actual_cost, grand.budget_remaining]
        .into_iter()
        .enumerate()
    {
        ws.write_number_with_format(row, (c + 2) as u16, v, &fmt.money)?;
    }
    Ok(())
}

pub const GRAND_TOTAL_LABEL: &str = "Grand Total";

/// Builds the full report workbook: main sheet, one sheet per partition,
/// totals, and employee hours when there are any.
pub fn build_workbook(rows: &[ReportRow], partitions: &[Partition], hours: &[EmployeeHoursRow]) -> Result<Workbook> {
    let fmt = Formats::new();
    let mut wb = Workbook::new();
    write_report_sheet(&mut wb, MAIN_SHEET, rows, &fmt)?;
    for p in partitions {
        write_report_sheet(&mut wb, &p.sheet_name, &p.rows, &fmt)?;
    }
    let grand = ManagerTotals::of(GRAND_TOTAL_LABEL, rows);
    write_totals_sheet(&mut wb, &manager_totals(partitions), &grand, &fmt)?;
    if !hours.is_empty() {
        let ws = wb.add_worksheet().set_name(EMPLOYEE_HOURS_SHEET)?;
        write_grid(ws, EMPLOYEE_HOURS_COLUMNS, hours.iter().map(hours_cells), &fmt)?;
    }
    info!(rows = rows.len(), manager_sheets = partitions.len(), hours = hours.len(), "report workbook built");
    Ok(wb)
}

pub fn render_report(rows: &[ReportRow], partitions: &[Partition], hours: &[EmployeeHoursRow]) -> Result<Vec<u8>> {
    let mut wb = build_workbook(rows, partitions, hours)?;
    Ok(wb.save_to_buffer()?)
}

/// Numeric text becomes a number cell; identifiers with leading zeros stay text.
fn table_cell(v: &str) -> Cell<'_> {
    let t = v.trim();
    if t.is_empty() { return Cell::Empty; }
    let leading_zero = t.len() > 1 && t.starts_with('0') && !t.starts_with("0.");
    match t.parse::<f64>() {
        Ok(n) if n.is_finite() && !leading_zero => Cell::Number(n),
        _ => Cell::Text(v),
    }
}

/// A single-sheet workbook holding `table` as-is, headers in table order.
pub fn render_table(sheet_name: &str, table: &Table) -> Result<Vec<u8>> {
    let fmt = Formats::new();
    let mut wb = Workbook::new();
    let ws = wb.add_worksheet().set_name(sheet_name)?;
    let headers: Vec<&str> = table.headers.iter().map(String::as_str).collect();
    let rows = table
        .rows
        .iter()
        .map(|r| headers.iter().map(|h| r.values.get(*h).map_or(Cell::Empty, |v| table_cell(v))).collect::<Vec<_>>());
    write_grid(ws, &headers, rows, &fmt)?;
    Ok(wb.save_to_buffer()?)
}
