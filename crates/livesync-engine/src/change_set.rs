//! Change sets and their classification
//!
//! A [`ChangeSet`] is built fresh for every request from the paths the
//! watcher reported, filtered against the device's hash manifest so files
//! whose content the device already has are not pushed again.
//! [`classify`] then decides whether the set can be applied to the running
//! application or needs a restart.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use livesync_core::prelude::*;
use livesync_core::{ChangeEntry, ChangeKind, DeviceAppData};
use livesync_device::{file_digest, HashManifest};
use serde::Serialize;

/// Ordered, de-duplicated changes for one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    entries: Vec<ChangeEntry>,
}

impl ChangeSet {
    /// Build a change set from reported paths.
    ///
    /// Changed paths whose digest matches `baseline` are dropped. Without a
    /// baseline every changed file is kept. A changed path that no longer
    /// exists is recorded as removed; directories are skipped.
    pub async fn build(
        app: &DeviceAppData,
        changed: &[PathBuf],
        removed: &[PathBuf],
        baseline: Option<&HashManifest>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for path in changed {
            if !seen.insert(path.clone()) {
                continue;
            }

            let metadata = match tokio::fs::metadata(path).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    trace!("{} vanished before sync, removing", path.display());
                    entries.push(ChangeEntry::removed(path, app.device_path_for(path)));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }

            if let Some(manifest) = baseline {
                match file_digest(path).await {
                    Ok(digest) if manifest.is_current(path, &digest) => {
                        trace!("{} unchanged on device, skipping", path.display());
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Could not hash {}, syncing it: {}", path.display(), e),
                }
            }

            entries.push(ChangeEntry::modified(path, app.device_path_for(path)));
        }

        for path in removed {
            if seen.insert(path.clone()) {
                entries.push(ChangeEntry::removed(path, app.device_path_for(path)));
            }
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ChangeEntry> {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn modified(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.iter().filter(|e| e.kind == ChangeKind::Modified)
    }

    pub fn removed(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.iter().filter(|e| e.kind == ChangeKind::Removed)
    }

    /// Local paths of modified entries
    pub fn modified_paths(&self) -> Vec<PathBuf> {
        self.modified().map(|e| e.local_path.clone()).collect()
    }

    /// Local paths of removed entries
    pub fn removed_paths(&self) -> Vec<PathBuf> {
        self.removed().map(|e| e.local_path.clone()).collect()
    }
}

/// Matches device paths against the configured structural patterns
#[derive(Debug, Clone, Default)]
pub struct StructuralMatcher {
    patterns: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl StructuralMatcher {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| Error::config(format!("Invalid structural pattern {:?}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// True if a change to `device_path` cannot be applied in-process
    pub fn is_structural(&self, device_path: &str) -> bool {
        let candidate = Path::new(device_path.trim_start_matches('/'));
        self.patterns
            .iter()
            .any(|p| p.matches_path_with(candidate, MATCH_OPTIONS))
    }
}

/// Why a request goes straight to a restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartReason {
    /// The caller asked for a full sync
    Requested,
    /// First sync of a session, or the runtime changed underneath it
    Forced,
    /// The device strategy has no in-process path
    NoFastPath,
    /// At least one entry matched a structural pattern
    StructuralChange,
    /// Pushing or deleting files on the device failed
    TransferFailed,
    /// The live sync socket was unavailable or failed mid-reload
    TransportFailed,
}

/// Outcome of classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    FastApply,
    FullRestart(RestartReason),
}

/// A change set partitioned into fast and structural entries
#[derive(Debug, Clone)]
pub struct Classification {
    pub decision: SyncDecision,
    pub fast: Vec<ChangeEntry>,
    pub structural: Vec<ChangeEntry>,
}

impl Classification {
    pub fn is_restart(&self) -> bool {
        matches!(self.decision, SyncDecision::FullRestart(_))
    }
}

/// Partition `change_set` and decide how to apply it.
///
/// `forced` short-circuits to a restart with the given reason; so does a
/// strategy without a fast path. Otherwise a single structural entry forces a
/// restart for the whole request.
pub fn classify(
    change_set: &ChangeSet,
    matcher: &StructuralMatcher,
    forced: Option<RestartReason>,
    supports_fast_apply: bool,
) -> Classification {
    let (structural, fast): (Vec<ChangeEntry>, Vec<ChangeEntry>) = change_set
        .entries()
        .iter()
        .cloned()
        .partition(|entry| matcher.is_structural(&entry.device_path));

    let decision = if let Some(reason) = forced {
        SyncDecision::FullRestart(reason)
    } else if !supports_fast_apply {
        SyncDecision::FullRestart(RestartReason::NoFastPath)
    } else if !structural.is_empty() {
        SyncDecision::FullRestart(RestartReason::StructuralChange)
    } else {
        SyncDecision::FastApply
    };

    Classification {
        decision,
        fast,
        structural,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_core::Platform;
    use tempfile::tempdir;

    fn app(root: &Path) -> DeviceAppData {
        DeviceAppData::new(
            "org.example.app",
            Platform::Android,
            root,
            "/data/local/tmp/org.example.app/sync",
        )
    }

    fn matcher() -> StructuralMatcher {
        StructuralMatcher::new(&["**/*.so".to_string(), "**/App_Resources/**".to_string()])
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_without_baseline_keeps_every_file() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("main.js");
        let b = dir.path().join("app.css");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();

        let set = ChangeSet::build(&app(dir.path()), &[a.clone(), b.clone(), a.clone()], &[], None)
            .await
            .unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.modified_paths(), vec![a, b]);
        assert_eq!(
            set.entries()[0].device_path,
            "/data/local/tmp/org.example.app/sync/main.js"
        );
    }

    #[tokio::test]
    async fn test_build_skips_files_current_in_baseline() {
        let dir = tempdir().unwrap();
        let same = dir.path().join("same.js");
        let changed = dir.path().join("changed.js");
        std::fs::write(&same, "same").unwrap();
        std::fs::write(&changed, "new").unwrap();

        let mut baseline = HashManifest::new();
        baseline.insert(
            same.to_string_lossy(),
            file_digest(&same).await.unwrap(),
        );
        baseline.insert(changed.to_string_lossy(), "0".repeat(64));

        let set = ChangeSet::build(
            &app(dir.path()),
            &[same, changed.clone()],
            &[],
            Some(&baseline),
        )
        .await
        .unwrap();

        assert_eq!(set.modified_paths(), vec![changed]);
    }

    #[tokio::test]
    async fn test_build_records_missing_and_removed_paths() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("gone.js");
        let deleted = dir.path().join("deleted.xml");
        std::fs::create_dir(dir.path().join("views")).unwrap();

        let set = ChangeSet::build(
            &app(dir.path()),
            &[gone.clone(), dir.path().join("views")],
            &[deleted.clone(), gone.clone()],
            None,
        )
        .await
        .unwrap();

        assert_eq!(set.removed_paths(), vec![gone, deleted]);
        assert_eq!(set.modified().count(), 0);
    }

    #[test]
    fn test_structural_match_is_case_insensitive() {
        let matcher = matcher();
        assert!(matcher.is_structural("/data/local/tmp/app/sync/lib/libNative.SO"));
        assert!(matcher.is_structural("/data/local/tmp/app/sync/app_resources/Android/x.xml"));
        assert!(!matcher.is_structural("/data/local/tmp/app/sync/main.js"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = StructuralMatcher::new(&["[".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    fn set_of(paths: &[&str]) -> ChangeSet {
        ChangeSet {
            entries: paths
                .iter()
                .map(|p| ChangeEntry::modified(PathBuf::from(p), format!("/sync/{}", p)))
                .collect(),
        }
    }

    #[test]
    fn test_script_only_set_is_fast() {
        let result = classify(&set_of(&["main.js", "app.css"]), &matcher(), None, true);
        assert_eq!(result.decision, SyncDecision::FastApply);
        assert_eq!(result.fast.len(), 2);
        assert!(result.structural.is_empty());
    }

    #[test]
    fn test_one_structural_entry_forces_restart() {
        let result = classify(&set_of(&["main.js", "lib/x.so"]), &matcher(), None, true);
        assert_eq!(
            result.decision,
            SyncDecision::FullRestart(RestartReason::StructuralChange)
        );
        assert_eq!(result.fast.len(), 1);
        assert_eq!(result.structural.len(), 1);
    }

    #[test]
    fn test_forced_and_no_fast_path_short_circuit() {
        let set = set_of(&["main.js"]);
        assert_eq!(
            classify(&set, &matcher(), Some(RestartReason::Requested), true).decision,
            SyncDecision::FullRestart(RestartReason::Requested)
        );
        assert_eq!(
            classify(&set, &matcher(), None, false).decision,
            SyncDecision::FullRestart(RestartReason::NoFastPath)
        );
    }
}
