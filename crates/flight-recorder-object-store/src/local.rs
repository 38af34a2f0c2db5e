// crates/flight-recorder-object-store/src/local.rs
// ============================================================================
// Module: Local Artifact Store
// Description: Filesystem-backed content-addressed blob sink.
// Purpose: Persist artifact bytes under a base directory with deterministic
//          keys.
// Dependencies: flight-recorder-core, tempfile
// ============================================================================

//! ## Overview
//! Objects live at `<base_dir>/<hash[0:2]>/<hash>`. Writes go through a
//! temp file in the destination directory followed by a rename, so
//! concurrent writers of the same hash converge on identical content
//! without partial files becoming visible.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use flight_recorder_core::ArtifactHash;
use flight_recorder_core::ArtifactStore;
use flight_recorder_core::ArtifactStoreError;
use flight_recorder_core::StoredArtifact;
use tempfile::NamedTempFile;

// ============================================================================
// SECTION: Store
// ============================================================================

/// Local filesystem artifact store.
///
/// # Invariants
/// - Object paths derive only from the artifact hash.
/// - Existing objects are never rewritten.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    /// Base directory holding the object tree.
    base_dir: PathBuf,
    /// Bucket name reported in stored locations.
    bucket: String,
}

impl LocalArtifactStore {
    /// Builds a local artifact store, creating the base directory.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactStoreError::Io`] when the base directory cannot be
    /// created.
    pub fn new(base_dir: PathBuf, bucket: String) -> Result<Self, ArtifactStoreError> {
        fs::create_dir_all(&base_dir).map_err(|err| ArtifactStoreError::Io(err.to_string()))?;
        Ok(Self {
            base_dir,
            bucket,
        })
    }

    /// Returns the object path for a hash, creating the prefix directory.
    fn path_for(&self, hash: &ArtifactHash) -> Result<PathBuf, ArtifactStoreError> {
        let key = hash.object_key();
        let path = self.base_dir.join(&key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| ArtifactStoreError::Io(err.to_string()))?;
        }
        Ok(path)
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn store(
        &self,
        hash: &ArtifactHash,
        bytes: &[u8],
    ) -> Result<StoredArtifact, ArtifactStoreError> {
        let path = self.path_for(hash)?;
        if !path.exists() {
            let parent = path
                .parent()
                .ok_or_else(|| ArtifactStoreError::Io("object path has no parent".to_string()))?;
            let mut temp = NamedTempFile::new_in(parent)
                .map_err(|err| ArtifactStoreError::Io(err.to_string()))?;
            temp.write_all(bytes).map_err(|err| ArtifactStoreError::Io(err.to_string()))?;
            temp.persist(&path).map_err(|err| ArtifactStoreError::Io(err.to_string()))?;
        }
        Ok(StoredArtifact {
            bucket: self.bucket.clone(),
            object_key: hash.object_key(),
        })
    }

    fn exists(&self, hash: &ArtifactHash) -> Result<bool, ArtifactStoreError> {
        Ok(self.path_for(hash)?.exists())
    }
}
