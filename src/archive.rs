//! Copy-then-delete relocation of a sent batch into the processed folder.
//!
//! The store has no move primitive, so a move is four remote steps:
//! re-read the original, write the copy, read the copy back, delete the
//! original with the sha read in step one. The re-read must still carry the
//! sha of the version that was dispatched, otherwise nothing is touched.
//! Anything failing after the copy exists leaves both files in place and is
//! reported as partial.
use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::model::{ArchiveStage, MoveError};
use crate::store::{ContentStore, StoreError};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{path} is gone or has no content/sha")]
    SourceMissing { path: String },
    #[error("failed to re-read {path}: {source}")]
    Fetch { path: String, source: StoreError },
    #[error("{path} changed since it was dispatched (sha {expected}, now {found})")]
    Changed {
        path: String,
        expected: String,
        found: String,
    },
    #[error("failed to write copy {path}: {source}")]
    Copy { path: String, source: StoreError },
    #[error("copy {copy} does not match {path}: {detail}")]
    Verify {
        path: String,
        copy: String,
        detail: String,
    },
    #[error("copied to {copy} but failed to delete {path}: {source}")]
    Delete {
        path: String,
        copy: String,
        source: StoreError,
    },
}

impl ArchiveError {
    pub fn stage(&self) -> ArchiveStage {
        match self {
            ArchiveError::SourceMissing { .. }
            | ArchiveError::Fetch { .. }
            | ArchiveError::Changed { .. } => ArchiveStage::Fetch,
            ArchiveError::Copy { .. } => ArchiveStage::Copy,
            ArchiveError::Verify { .. } => ArchiveStage::Verify,
            ArchiveError::Delete { .. } => ArchiveStage::Delete,
        }
    }

    /// Original and copy both exist.
    pub fn is_partial(&self) -> bool {
        matches!(self, ArchiveError::Verify { .. } | ArchiveError::Delete { .. })
    }

    pub fn to_move_error(&self) -> MoveError {
        MoveError {
            stage: self.stage(),
            partial: self.is_partial(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReceipt {
    pub from: String,
    pub to: String,
    pub copy_sha: String,
}

/// Move `source_path` to `processed_path`, provided it is still the version
/// identified by `dispatched_sha`.
#[instrument(skip(store))]
pub async fn archive(
    store: &dyn ContentStore,
    source_path: &str,
    processed_path: &str,
    dispatched_sha: &str,
) -> Result<ArchiveReceipt, ArchiveError> {
    // Fetch: fresh content and sha, nothing touched yet.
    let original = match store.get_file(source_path).await {
        Ok(Some(file)) if !file.sha.is_empty() => file,
        Ok(_) => {
            return Err(ArchiveError::SourceMissing {
                path: source_path.to_string(),
            })
        }
        Err(source) => {
            return Err(ArchiveError::Fetch {
                path: source_path.to_string(),
                source,
            })
        }
    };
    if original.sha != dispatched_sha {
        warn!(
            path = source_path,
            expected = dispatched_sha,
            found = %original.sha,
            "batch changed during dispatch; leaving it pending"
        );
        return Err(ArchiveError::Changed {
            path: source_path.to_string(),
            expected: dispatched_sha.to_string(),
            found: original.sha,
        });
    }

    // Copy: overwrite a leftover copy from an earlier partial run if present.
    let copy_err = |source| ArchiveError::Copy {
        path: processed_path.to_string(),
        source,
    };
    let existing_sha = store
        .get_file(processed_path)
        .await
        .map_err(copy_err)?
        .map(|f| f.sha);
    if existing_sha.is_some() {
        warn!(path = processed_path, "processed copy already exists; overwriting");
    }
    let message = format!(
        "Archive {source_path} to {processed_path} ({})",
        Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    );
    let copy_sha = store
        .put_file(
            processed_path,
            &original.content,
            &message,
            existing_sha.as_deref(),
        )
        .await
        .map_err(copy_err)?;

    // Verify: the copy must be byte-identical before the original goes.
    let verify_err = |detail: String| ArchiveError::Verify {
        path: source_path.to_string(),
        copy: processed_path.to_string(),
        detail,
    };
    match store.get_file(processed_path).await {
        Ok(Some(copy)) if copy.content == original.content => {}
        Ok(Some(copy)) => {
            return Err(verify_err(format!(
                "{} bytes written, {} bytes read back",
                original.content.len(),
                copy.content.len()
            )))
        }
        Ok(None) => return Err(verify_err("copy not found after write".into())),
        Err(e) => return Err(verify_err(e.to_string())),
    }

    // Delete: guarded by the sha from the fetch step.
    let message = format!("Remove {source_path} after archiving to {processed_path}");
    store
        .delete_file(source_path, &original.sha, &message)
        .await
        .map_err(|source| ArchiveError::Delete {
            path: source_path.to_string(),
            copy: processed_path.to_string(),
            source,
        })?;

    info!(from = source_path, to = processed_path, "batch archived");
    Ok(ArchiveReceipt {
        from: source_path.to_string(),
        to: processed_path.to_string(),
        copy_sha,
    })
}
