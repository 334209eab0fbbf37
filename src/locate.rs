use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::debug;

use crate::config::DEFAULT_OUTPUT_NAME;
use crate::Result;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls", "txt", "dat"];

/// The three export families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Family {
    /// Activities and their estimates.
    Ae,
    /// Project transactions (actual costs and hours).
    Pt,
    /// Projects, carrying the owning manager.
    P,
}

impl Family {
    pub const ALL: [Family; 3] = [Family::Ae, Family::Pt, Family::P];

    pub fn tag(self) -> &'static str {
        match self {
            Family::Ae => "AE",
            Family::Pt => "PT",
            Family::P => "P",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.tag()) }
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// A file name belongs to a family when its stem contains the tag,
/// case-insensitively. The bare `P` tag also occurs inside `PT` and in most
/// words, so a name that already belongs to a longer tag is never P, nor is
/// the default report name.
pub fn matches_family(file_name: &str, family: Family) -> bool {
    let stem = Path::new(file_name).file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let contains = |f: Family| stem.to_ascii_lowercase().contains(&f.tag().to_ascii_lowercase());
    match family {
        Family::Ae | Family::Pt => contains(family),
        Family::P => {
            contains(Family::P)
                && !contains(Family::Pt)
                && !contains(Family::Ae)
                && !file_name.eq_ignore_ascii_case(DEFAULT_OUTPUT_NAME)
        }
    }
}

/// Same file on disk; falls back to comparing the paths as given when either
/// side cannot be resolved.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

fn modified(path: &Path) -> SystemTime {
    fs::metadata(path).and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Files in `dir` belonging to `family`, sorted by name. `ignore` (usually the
/// report being written) and Excel lock files (`~$…`) are never returned.
pub fn locate_files(dir: &Path, family: Family, latest_only: bool, ignore: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !has_supported_extension(&path) { continue; }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if name.starts_with("~$") { continue; }
        if ignore.is_some_and(|ig| same_file(&path, ig)) { continue; }
        if matches_family(name, family) { found.push(path); }
    }
    found.sort();

    if latest_only && found.len() > 1 {
        let latest = found.iter().max_by_key(|p| modified(p)).cloned();
        found = latest.into_iter().collect();
    }
    debug!(family = %family, files = ?found, "located source files");
    Ok(found)
}
