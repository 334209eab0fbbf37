use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

use crate::{ReportError, Result};

pub const DEFAULT_OUTPUT_NAME: &str = "reportX.xlsx";
pub const DEFAULT_CACHE_NAME: &str = ".activity_report_cache.json";

/// PT columns tried in order when looking for the actual-cost amount.
pub const DEFAULT_COST_COLUMNS: &[&str] = &[
    "Total Internal Price",
    "Internal Price",
    "Sales Amount",
    "Sales Price",
    "Internal Amount",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Reuse the snapshot while its sources are unchanged.
    #[default]
    Use,
    /// Ignore any snapshot and write a fresh one.
    Refresh,
    /// Never read or write a snapshot.
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output: Option<PathBuf>, // None => <input_dir>/reportX.xlsx
    pub excluded_managers: Vec<String>,
    pub latest_only: bool,
    pub cache: CachePolicy,
    pub cache_file: Option<PathBuf>, // None => <input_dir>/.activity_report_cache.json
    pub cost_columns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            output: None,
            excluded_managers: Vec::new(),
            latest_only: false,
            cache: CachePolicy::default(),
            cache_file: None,
            cost_columns: DEFAULT_COST_COLUMNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| self.input_dir.join(DEFAULT_OUTPUT_NAME))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_file.clone().unwrap_or_else(|| self.input_dir.join(DEFAULT_CACHE_NAME))
    }

    pub fn is_excluded(&self, manager: &str) -> bool {
        let m = manager.trim();
        self.excluded_managers.iter().any(|e| e.trim() == m)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cost_columns.iter().all(|c| c.trim().is_empty()) {
            return Err(ReportError::InvalidConfig("cost_columns must name at least one column".into()));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)?;
    let cfg: Config = serde_json::from_str(&text)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: Config = serde_json::from_str(r#"{ "input_dir": "data", "excluded_managers": ["Admin"] }"#).unwrap();
        assert_eq!(cfg.input_dir, PathBuf::from("data"));
        assert_eq!(cfg.output_path(), PathBuf::from("data").join(DEFAULT_OUTPUT_NAME));
        assert_eq!(cfg.cache, CachePolicy::Use);
        assert_eq!(cfg.cost_columns.len(), DEFAULT_COST_COLUMNS.len());
        assert!(cfg.is_excluded(" Admin "));
        assert!(!cfg.is_excluded("Alice"));
    }

    #[test]
    fn cache_policy_parses_lowercase() {
        let cfg: Config = serde_json::from_str(r#"{ "cache": "refresh" }"#).unwrap();
        assert_eq!(cfg.cache, CachePolicy::Refresh);
    }

    #[test]
    fn empty_cost_columns_are_rejected() {
        let cfg = Config { cost_columns: vec![" ".into()], ..Config::default() };
        assert!(matches!(cfg.validate(), Err(ReportError::InvalidConfig(_))));
    }
}
