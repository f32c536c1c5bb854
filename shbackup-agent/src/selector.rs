use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

const ARCHIVE_EXTENSION: &str = ".zip";

/// The archive picked for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedArchive {
    pub path: PathBuf,
    pub size: u64,
}

/// Picks the newest `<prefix>DDMMYYYY.zip` under a folder, falling back to
/// the first other `.zip` found when no dated archive exists.
pub struct ArchiveSelector {
    pattern: Regex,
}

impl ArchiveSelector {
    pub fn new(prefix: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            r"^{}([0-9]{{2}})([0-9]{{2}})([0-9]{{4}})\.zip$",
            regex::escape(prefix)
        ))?;
        Ok(Self { pattern })
    }

    /// Whether `name` follows the dated naming scheme, with its date when the
    /// date is a real calendar day.
    pub fn parse_name(&self, name: &str) -> Option<Option<NaiveDate>> {
        let caps = self.pattern.captures(name)?;
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let date = match (number(1), number(2), number(3)) {
            (Some(day), Some(month), Some(year)) => NaiveDate::from_ymd_opt(year as i32, month, day),
            _ => None,
        };
        Some(date)
    }

    pub fn select_latest(&self, root: &Path) -> Option<SelectedArchive> {
        if !root.exists() {
            warn!(path = %root.display(), "Backup folder does not exist");
            return None;
        }

        let candidates = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.file_name().to_string_lossy().ends_with(ARCHIVE_EXTENSION)
            })
            .filter_map(|entry| match entry.metadata() {
                Ok(m) => Some(SelectedArchive { path: entry.into_path(), size: m.len() }),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Failed to stat file");
                    None
                }
            });
        self.pick(candidates)
    }

    /// Reduce archives, in the order they were found, to the one to upload.
    /// Equal dates keep the first seen.
    pub fn pick<I>(&self, candidates: I) -> Option<SelectedArchive>
    where
        I: IntoIterator<Item = SelectedArchive>,
    {
        let mut latest: Option<(NaiveDate, SelectedArchive)> = None;
        let mut fallback: Option<SelectedArchive> = None;

        for candidate in candidates {
            let name = candidate
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match self.parse_name(&name) {
                Some(Some(date)) if after_first_day(date) => {
                    if latest.as_ref().map_or(true, |(best, _)| date > *best) {
                        latest = Some((date, candidate));
                    }
                }
                Some(_) => {
                    debug!(path = %candidate.path.display(), "Skipping archive with invalid date");
                }
                None => {
                    if fallback.is_none() {
                        fallback = Some(candidate);
                    }
                }
            }
        }

        latest.map(|(_, archive)| archive).or(fallback)
    }
}

/// Dates on or before 0001-01-01 never count as dated.
fn after_first_day(date: NaiveDate) -> bool {
    (date.year(), date.ordinal()) > (1, 1)
}
