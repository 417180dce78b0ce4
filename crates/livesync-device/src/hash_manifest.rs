//! Device-side hash manifest
//!
//! Every application that has been synced carries a JSON document on the
//! device mapping local file paths to content digests. It records what the
//! device last received and lets the engine skip files whose content did not
//! change. The device copy is the source of truth; the local copy is only a
//! staging file inside a scratch directory.
//!
//! The document is always written whole, in a single push, so there is no
//! partially written state to observe.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::device::Device;
use livesync_core::prelude::*;

/// File name of the manifest, both on device and in the scratch directory
pub const HASH_FILE_NAME: &str = "hashes";

/// Default device directory under which per-app manifests live
pub const DEFAULT_DEVICE_ROOT: &str = "/data/local/tmp";

/// Mapping from local file path to hex-encoded SHA-256 digest.
///
/// Backed by a `BTreeMap` so the serialized document is byte-for-byte stable
/// for equal contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashManifest(BTreeMap<String, String>);

impl HashManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest from local files, skipping anything that is not a
    /// regular file.
    pub async fn from_files(paths: &[PathBuf]) -> Result<Self> {
        let mut manifest = Self::new();
        manifest.merge_files(paths).await?;
        Ok(manifest)
    }

    pub fn insert(&mut self, path: impl Into<String>, digest: impl Into<String>) {
        self.0.insert(path.into(), digest.into());
    }

    pub fn get(&self, path: &Path) -> Option<&str> {
        self.0.get(&manifest_key(path)).map(String::as_str)
    }

    pub fn remove(&mut self, path: &Path) -> Option<String> {
        self.0.remove(&manifest_key(path))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.0.contains_key(&manifest_key(path))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// True if `digest` matches what the device last received for `path`
    pub fn is_current(&self, path: &Path, digest: &str) -> bool {
        self.get(path) == Some(digest)
    }

    /// Re-digest every path that is still a regular file and record it
    async fn merge_files(&mut self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            let is_file = tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !is_file {
                trace!("Skipping non-file path {}", path.display());
                continue;
            }
            let digest = file_digest(path).await?;
            self.0.insert(manifest_key(path), digest);
        }
        Ok(())
    }
}

/// Manifest key for a local path
fn manifest_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Hex-encoded SHA-256 of a file's bytes
pub async fn file_digest(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Reads and writes the hash manifest of one application on one device.
///
/// Holds the scratch directory used for staging; it is created on first use
/// and removed when the store is dropped.
#[derive(Debug)]
pub struct HashManifestStore {
    app_identifier: String,
    device_path: String,
    scratch: Option<TempDir>,
}

impl HashManifestStore {
    pub fn new(device_root: &str, app_identifier: impl Into<String>) -> Self {
        let app_identifier = app_identifier.into();
        let device_path = format!(
            "{}/{}/{}",
            device_root.trim_end_matches('/'),
            app_identifier,
            HASH_FILE_NAME
        );
        Self {
            app_identifier,
            device_path,
            scratch: None,
        }
    }

    /// Location of the manifest on the device
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn app_identifier(&self) -> &str {
        &self.app_identifier
    }

    fn scratch_dir(&mut self) -> Result<PathBuf> {
        if self.scratch.is_none() {
            let dir = tempfile::Builder::new()
                .prefix(&format!("livesync-hashes-{}-", self.app_identifier))
                .tempdir()?;
            debug!(
                "Created manifest scratch dir {} for {}",
                dir.path().display(),
                self.app_identifier
            );
            self.scratch = Some(dir);
        }
        match &self.scratch {
            Some(dir) => Ok(dir.path().to_path_buf()),
            None => Err(Error::manifest_unavailable(&self.app_identifier)),
        }
    }

    /// Check whether the manifest is present on the device.
    ///
    /// Only an exact echo of the manifest path counts; error text or a listing
    /// of some other entry does not.
    pub async fn exists<D: Device + Sync>(&self, device: &D) -> Result<bool> {
        let listing = device.list_remote_file(&self.device_path).await?;
        Ok(listing
            .map(|out| out.trim() == self.device_path)
            .unwrap_or(false))
    }

    /// Pull and parse the manifest.
    ///
    /// Returns `None` when the device has no manifest or the document cannot
    /// be parsed; both mean "no baseline".
    pub async fn read<D: Device + Sync>(&mut self, device: &D) -> Result<Option<HashManifest>> {
        if !self.exists(device).await? {
            debug!("No hash manifest on {} for {}", device.identifier(), self.app_identifier);
            return Ok(None);
        }

        let scratch = self.scratch_dir()?;
        let local_path = scratch.join(HASH_FILE_NAME);
        if local_path.exists() {
            tokio::fs::remove_file(&local_path).await?;
        }

        device.pull_file(&self.device_path, &scratch).await?;

        let bytes = match tokio::fs::read(&local_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Pulled hash manifest is not readable: {}", e);
                return Ok(None);
            }
        };

        match serde_json::from_slice::<HashManifest>(&bytes) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                warn!(
                    "Discarding unparsable hash manifest for {}: {}",
                    self.app_identifier, e
                );
                Ok(None)
            }
        }
    }

    /// Replace the device manifest with `manifest`.
    pub async fn write<D: Device + Sync>(
        &mut self,
        device: &D,
        manifest: &HashManifest,
    ) -> Result<()> {
        let scratch = self.scratch_dir()?;
        let local_path = scratch.join(HASH_FILE_NAME);
        let bytes = serde_json::to_vec(manifest)?;
        tokio::fs::write(&local_path, bytes).await?;

        device.push_file(&local_path, &self.device_path).await?;
        debug!(
            "Wrote hash manifest with {} entries to {}",
            manifest.len(),
            self.device_path
        );
        Ok(())
    }

    /// Refresh digests for `changed` and write the manifest back.
    ///
    /// Returns `false` without writing anything when the device has no
    /// manifest to update.
    pub async fn update<D: Device + Sync>(
        &mut self,
        device: &D,
        changed: &[PathBuf],
    ) -> Result<bool> {
        let Some(mut manifest) = self.read(device).await? else {
            return Ok(false);
        };

        manifest.merge_files(changed).await?;
        self.write(device, &manifest).await?;
        Ok(true)
    }

    /// Drop `removed` from the manifest and write it back.
    ///
    /// Returns `false` without writing anything when the device has no
    /// manifest.
    pub async fn remove<D: Device + Sync>(
        &mut self,
        device: &D,
        removed: &[PathBuf],
    ) -> Result<bool> {
        let Some(mut manifest) = self.read(device).await? else {
            return Ok(false);
        };

        for path in removed {
            manifest.remove(path);
        }
        self.write(device, &manifest).await?;
        Ok(true)
    }
}
