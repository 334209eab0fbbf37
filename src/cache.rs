//! On-disk JSON snapshot of the loaded source tables.
//!
//! The snapshot is only trusted while the located source files are exactly the
//! ones it was built from, with the same modification times.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::locate::Family;
use crate::table::Table;
use crate::Result;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceStamp {
    pub family: Family,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

/// The three family tables as loaded from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceTables {
    pub ae: Table,
    pub pt: Table,
    pub p: Table,
}

impl SourceTables {
    pub fn get_mut(&mut self, family: Family) -> &mut Table {
        match family {
            Family::Ae => &mut self.ae,
            Family::Pt => &mut self.pt,
            Family::P => &mut self.p,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub created: DateTime<Utc>,
    pub sources: Vec<SourceStamp>,
    pub tables: SourceTables,
}

impl Snapshot {
    pub fn new(mut sources: Vec<SourceStamp>, tables: SourceTables) -> Self {
        sources.sort();
        Self { version: SNAPSHOT_VERSION, created: Utc::now(), sources, tables }
    }

    pub fn is_fresh(&self, current: &[SourceStamp]) -> bool {
        let mut current = current.to_vec();
        current.sort();
        self.version == SNAPSHOT_VERSION && self.sources == current
    }
}

pub fn stamp_sources(files: &[(Family, PathBuf)]) -> Result<Vec<SourceStamp>> {
    files
        .iter()
        .map(|(family, path)| {
            let modified = fs::metadata(path)?.modified()?;
            Ok(SourceStamp { family: *family, path: path.clone(), modified: DateTime::<Utc>::from(modified) })
        })
        .collect()
}

/// `Ok(None)` when no snapshot exists yet.
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    if !path.exists() { return Ok(None); }
    let text = fs::read_to_string(path)?;
    let snap: Snapshot = serde_json::from_str(&text)?;
    debug!(path = %path.display(), created = %snap.created, "snapshot read");
    Ok(Some(snap))
}

pub fn save_snapshot(path: &Path, snap: &Snapshot) -> Result<()> {
    fs::write(path, serde_json::to_vec(snap)?)?;
    debug!(path = %path.display(), sources = snap.sources.len(), "snapshot written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Record;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    #[test]
    fn snapshot_is_stale_after_source_change() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("AE.csv");
        fs::write(&src, "Activity Seq\n1\n").unwrap();
        let files = vec![(Family::Ae, src.clone())];
        let stamps = stamp_sources(&files).unwrap();

        let mut tables = SourceTables::default();
        tables.ae = Table::new(vec!["Activity Seq".into()], vec![Record::from_pairs([("Activity Seq", "1")])]);
        let cache = dir.path().join("cache.json");
        save_snapshot(&cache, &Snapshot::new(stamps.clone(), tables.clone())).unwrap();

        let snap = load_snapshot(&cache).unwrap().unwrap();
        assert!(snap.is_fresh(&stamps));
        assert_eq!(snap.tables, tables);

        let later = SystemTime::now() + Duration::from_secs(120);
        fs::File::options().write(true).open(&src).unwrap().set_modified(later).unwrap();
        assert!(!snap.is_fresh(&stamp_sources(&files).unwrap()));
        // A new source file also invalidates it.
        let mut more = stamps.clone();
        more.push(SourceStamp { family: Family::P, path: dir.path().join("P.csv"), modified: Utc::now() });
        assert!(!snap.is_fresh(&more));
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempdir().unwrap();
        assert!(load_snapshot(&dir.path().join("nope.json")).unwrap().is_none());
    }
}
