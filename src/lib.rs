//! Activity report builder.
//!
//! Reconciles project-accounting exports (AE activities/estimates, PT project
//! transactions, P projects) into one report keyed by `Activity Seq` and writes
//! it as an Excel workbook with one sheet per manager.
//!
//! Stages, in pipeline order: [`locate`] → [`table`] → [`reconcile`] →
//! [`aggregate`] → [`partition`] → [`report`] → [`sink`]. [`pipeline`] wires
//! them together; [`explore`] works on a report that was already written.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod explore;
pub mod locate;
pub mod partition;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod sink;
pub mod table;

use std::path::PathBuf;

pub use aggregate::ReportRow;
pub use config::{CachePolicy, Config};
pub use locate::Family;
pub use table::{Record, Table};

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::Error),

    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A column the stage cannot work without did not resolve against the headers.
    #[error("no column matching '{field}' in {source_name} data")]
    MissingColumn { field: String, source_name: String },

    #[error("could not determine a delimiter for {0}")]
    NoDelimiter(PathBuf),

    #[error("unsupported file type: {0}")]
    UnsupportedFile(PathBuf),

    #[error("workbook has no readable worksheet: {0}")]
    NoWorksheet(PathBuf),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
