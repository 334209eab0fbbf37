//! End-to-end runs: locate → load → reconcile/aggregate → partition → write.
//!
//! Every stage degrades instead of aborting: a failure is logged with its
//! stage and the stage contributes an empty result.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tracing::{error, info, warn};

use crate::aggregate::{self, Actuals, EmployeeHoursRow, ReportRow};
use crate::cache::{self, Snapshot, SourceTables};
use crate::config::{CachePolicy, Config};
use crate::locate::{locate_files, Family};
use crate::partition::{partition_by_manager, Partition, SheetNamer};
use crate::reconcile::{self, ACTIVITY_SEQ, AE_SCHEMA, ESTIMATE_FIELDS};
use crate::report::{self, RESERVED_SHEETS};
use crate::sink::{commit, FileDestination, WriteOutcome};
use crate::table::{load_table, Table};
use crate::{ReportError, Result};

/// Everything that goes into the output workbook.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub rows: Vec<ReportRow>,
    pub partitions: Vec<Partition>,
    pub hours: Vec<EmployeeHoursRow>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub output: PathBuf,
    pub rows: usize,
    pub partitions: usize,
    pub from_cache: bool,
    /// `None` when there was nothing to write.
    pub outcome: Option<WriteOutcome>,
}

fn degrade<T: Default>(stage: &str, result: Result<T>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            error!(stage, error = %e, "stage failed, continuing with an empty result");
            T::default()
        }
    }
}

/// Source files per family. A family whose lookup fails is simply absent.
pub fn locate_sources(cfg: &Config) -> Vec<(Family, PathBuf)> {
    let output = cfg.output_path();
    let mut files = Vec::new();
    for family in Family::ALL {
        let found = degrade("locate", locate_files(&cfg.input_dir, family, cfg.latest_only, Some(&output)));
        if found.is_empty() { warn!(family = %family, dir = %cfg.input_dir.display(), "no source files found"); }
        files.extend(found.into_iter().map(|p| (family, p)));
    }
    files
}

/// Loads and stacks the files of one family; unreadable or empty files are skipped.
pub fn load_family(family: Family, paths: &[PathBuf]) -> Table {
    let mut tables = Vec::with_capacity(paths.len());
    for path in paths {
        match load_table(path) {
            Ok(t) if t.is_empty() => warn!(family = %family, file = %path.display(), "file has no data rows, skipped"),
            Ok(t) => {
                info!(family = %family, file = %path.display(), rows = t.len(), "loaded");
                tables.push(t);
            }
            Err(e) => warn!(family = %family, file = %path.display(), error = %e, "could not read file, skipped"),
        }
    }
    Table::concat(tables)
}

fn load_fresh(files: &[(Family, PathBuf)]) -> SourceTables {
    let mut tables = SourceTables::default();
    for family in Family::ALL {
        let paths: Vec<PathBuf> = files.iter().filter(|(f, _)| *f == family).map(|(_, p)| p.clone()).collect();
        *tables.get_mut(family) = load_family(family, &paths);
    }
    tables
}

/// Loads the three families, reusing the snapshot cache when the policy and
/// the source files allow it. Returns the tables and whether they came from cache.
pub fn load_sources(cfg: &Config, files: &[(Family, PathBuf)]) -> (SourceTables, bool) {
    if cfg.cache == CachePolicy::Off { return (load_fresh(files), false); }

    let cache_path = cfg.cache_path();
    let stamps = match cache::stamp_sources(files) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "could not read source modification times, cache bypassed");
            None
        }
    };

    if cfg.cache == CachePolicy::Use {
        if let Some(stamps) = &stamps {
            match cache::load_snapshot(&cache_path) {
                Ok(Some(snap)) if snap.is_fresh(stamps) => {
                    info!(cache = %cache_path.display(), "sources unchanged, using cached tables");
                    return (snap.tables, true);
                }
                Ok(Some(_)) => info!("sources changed since the last run, reloading"),
                Ok(None) => {}
                Err(e) => warn!(cache = %cache_path.display(), error = %e, "unreadable cache ignored"),
            }
        }
    }

    let tables = load_fresh(files);
    if let Some(stamps) = stamps {
        let snap = Snapshot::new(stamps, tables.clone());
        if let Err(e) = cache::save_snapshot(&cache_path, &snap) {
            warn!(cache = %cache_path.display(), error = %e, "could not write cache");
        }
    }
    (tables, false)
}

/// Reconciles the loaded tables into report rows, manager partitions and
/// employee hours.
pub fn build_report(cfg: &Config, sources: &SourceTables) -> Report {
    let ae = if sources.ae.is_empty() {
        warn!("no AE data loaded");
        Table::default()
    } else {
        degrade("AE extract", aggregate::extract_ae(&sources.ae))
    };
    let actuals = if sources.pt.is_empty() {
        warn!("no PT data loaded, actual costs default to zero");
        Actuals::default()
    } else {
        degrade("PT aggregation", aggregate::aggregate_actuals(&sources.pt, &cfg.cost_columns))
    };
    let managers: HashMap<String, String> = if sources.p.is_empty() {
        warn!("no P data loaded, every activity falls under the unknown manager");
        HashMap::new()
    } else {
        degrade("manager mapping", aggregate::manager_map(&sources.p))
    };

    let rows = aggregate::merge(&ae, &actuals, &managers);
    let hours = aggregate::employee_hours(&sources.pt, &ae);
    let mut namer = SheetNamer::with_reserved(RESERVED_SHEETS);
    let partitions = partition_by_manager(&rows, &cfg.excluded_managers, &mut namer);
    Report { rows, partitions, hours }
}

/// The `build` command.
pub fn run(cfg: &Config) -> Result<RunSummary> {
    cfg.validate()?;
    let output = cfg.output_path();
    info!(input = %cfg.input_dir.display(), output = %output.display(), "building activity report");

    let files = locate_sources(cfg);
    let (sources, from_cache) = load_sources(cfg, &files);
    let report = build_report(cfg, &sources);

    let mut summary = RunSummary {
        output: output.clone(),
        rows: report.rows.len(),
        partitions: report.partitions.len(),
        from_cache,
        outcome: None,
    };
    if report.rows.is_empty() {
        warn!("no report rows, nothing written");
        return Ok(summary);
    }

    let bytes = report::render_report(&report.rows, &report.partitions, &report.hours)?;
    summary.outcome = Some(commit(&FileDestination::new(&output), &bytes)?);
    info!(output = %output.display(), rows = summary.rows, sheets = summary.partitions, "report written");
    Ok(summary)
}

/// Collapses duplicate `Activity Seq` rows in a single AE export, keeping
/// every column. Estimates present on later rows fill the first row's blanks.
pub fn consolidate_table(table: Table) -> Result<Table> {
    let key = reconcile::find_column(&table.headers, ACTIVITY_SEQ)
        .ok_or_else(|| ReportError::MissingColumn { field: ACTIVITY_SEQ.to_string(), source_name: Family::Ae.to_string() })?;
    let fill: Vec<String> = ESTIMATE_FIELDS
        .iter()
        .filter_map(|f| reconcile::find_column(&table.headers, f))
        .filter(|c| *c != key)
        .collect();
    let fill: Vec<&str> = fill.iter().map(String::as_str).collect();
    let before = table.len();
    let out = aggregate::consolidate(table, &key, &fill);
    info!(before, after = out.len(), key = %key, "AE rows consolidated");
    Ok(out)
}

/// The `consolidate` command: one AE file in, one consolidated workbook out.
pub fn consolidate_file(input: &Path, output: &Path) -> Result<WriteOutcome> {
    let table = load_table(input)?;
    let unresolved = reconcile::resolve(&table.headers, AE_SCHEMA).unresolved;
    if !unresolved.is_empty() { warn!(file = %input.display(), missing = ?unresolved, "AE file lacks expected columns"); }
    let out = consolidate_table(table)?;
    let bytes = report::render_table("Consolidated", &out)?;
    commit(&FileDestination::new(output), &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Record;
    use std::fs;
    use tempfile::tempdir;

    fn cfg_for(dir: &Path) -> Config {
        Config { input_dir: dir.to_path_buf(), ..Config::default() }
    }

    #[test]
    fn missing_families_degrade_to_empty() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("PT.csv"), "Activity Seq,Internal Price\n1,10\n1,5\n").unwrap();
        let cfg = Config { cache: CachePolicy::Off, ..cfg_for(dir.path()) };
        let files = locate_sources(&cfg);
        let (sources, _) = load_sources(&cfg, &files);
        assert!(sources.ae.is_empty());
        let report = build_report(&cfg, &sources);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].actual_cost, 15.0);
        assert_eq!(report.partitions.len(), 1);
    }

    #[test]
    fn broken_source_is_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("AE_1.txt"), "single column only\nx\n").unwrap();
        fs::write(dir.path().join("AE_2.csv"), "Activity Seq,Estimated Cost\n4,10\n").unwrap();
        let paths = locate_files(dir.path(), Family::Ae, false, None).unwrap();
        let t = load_family(Family::Ae, &paths);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn failing_stage_yields_empty_result() {
        let sources = SourceTables {
            ae: Table::new(vec!["Notes".into()], vec![Record::from_pairs([("Notes", "n/a")])]),
            ..SourceTables::default()
        };
        let report = build_report(&Config::default(), &sources);
        assert!(report.rows.is_empty());
        assert!(report.partitions.is_empty());
    }

    #[test]
    fn cache_is_reused_until_sources_change() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("AE.csv"), "Activity Seq,Estimated Cost\n1,10\n").unwrap();
        let cfg = cfg_for(dir.path());
        let files = locate_sources(&cfg);

        let (first, hit) = load_sources(&cfg, &files);
        assert!(!hit);
        assert!(cfg.cache_path().exists());
        let (second, hit) = load_sources(&cfg, &files);
        assert!(hit);
        assert_eq!(first, second);

        let refresh = Config { cache: CachePolicy::Refresh, ..cfg.clone() };
        assert!(!load_sources(&refresh, &files).1);
    }

    #[test]
    fn consolidate_keeps_every_column() {
        let headers: Vec<String> = ["Activity Seq", "Estimated Cost (USD)", "Notes"].iter().map(|s| s.to_string()).collect();
        let rows = vec![
            Record::from_pairs([("Activity Seq", "1"), ("Estimated Cost (USD)", ""), ("Notes", "first")]),
            Record::from_pairs([("Activity Seq", "1"), ("Estimated Cost (USD)", "42"), ("Notes", "second")]),
        ];
        let out = consolidate_table(Table::new(headers.clone(), rows)).unwrap();
        assert_eq!(out.headers, headers);
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].get("Estimated Cost (USD)"), Some("42"));
        assert_eq!(out.rows[0].get("Notes"), Some("first"));
    }
}
