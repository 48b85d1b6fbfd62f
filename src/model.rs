use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// One CSV record keyed by (trimmed) header name.
pub type RawRow = BTreeMap<String, String>;

/// Kind of a remote directory entry, as reported by the content store.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Submodule,
    Other,
}

impl EntryKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "file" => EntryKind::File,
            "dir" => EntryKind::Dir,
            "symlink" => EntryKind::Symlink,
            "submodule" => EntryKind::Submodule,
            _ => EntryKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    pub sha: String,
}

/// A file read from the store together with its integrity token (blob sha).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub sha: String,
    pub content: Vec<u8>,
}

/// A pending batch file picked for the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkBatch {
    pub name: String,
    pub path: String,
    pub sha: String,
    pub content: Vec<u8>,
}

/// A validated row, ready to be published.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublishItem {
    pub title: String,
    pub description: String,
    pub alt_text: String,
    pub link: Option<String>,
    pub image_url: String,
    pub board_id: String,
}

/// A rejected row. `line` counts data rows from 1, header excluded.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationError {
    pub line: usize,
    pub reason: String,
    pub row: RawRow,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublishOutcome {
    pub index: usize,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// Every valid item was attempted.
    Done,
    /// There was nothing to dispatch.
    Empty,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchRunResult {
    pub status: DispatchStatus,
    pub rows_total: usize,
    pub rows_valid: usize,
    pub rows_attempted: usize,
    /// Items the publishing endpoint accepted.
    pub rows_sent: usize,
    pub results: Vec<PublishOutcome>,
    pub errors: Vec<ValidationError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchRunResult {
    /// A batch only counts as delivered when at least one item went out.
    pub fn is_success(&self) -> bool {
        self.status == DispatchStatus::Done && self.rows_sent > 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStage {
    Fetch,
    Copy,
    Verify,
    Delete,
}

/// Where and how relocating a batch into the processed folder broke off.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MoveError {
    pub stage: ArchiveStage,
    /// Original and processed copy both exist.
    pub partial: bool,
    pub message: String,
}

/// Business outcome of one run. Serialized with a `status` tag.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunReport {
    Idle {
        message: String,
    },
    Ok {
        rows: usize,
        message: String,
    },
    Preview {
        file: String,
        rows_total: usize,
        rows_valid: usize,
        preview: Vec<PublishItem>,
        errors: Vec<ValidationError>,
    },
    Done {
        file: String,
        run: BatchRunResult,
    },
    DoneAndMoved {
        file: String,
        moved_to: String,
        run: BatchRunResult,
    },
    PartialSuccess {
        file: String,
        run: BatchRunResult,
        move_error: MoveError,
    },
    RunFailed {
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        run: Option<BatchRunResult>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl RunReport {
    pub fn status(&self) -> &'static str {
        match self {
            RunReport::Idle { .. } => "idle",
            RunReport::Ok { .. } => "ok",
            RunReport::Preview { .. } => "preview",
            RunReport::Done { .. } => "done",
            RunReport::DoneAndMoved { .. } => "done_and_moved",
            RunReport::PartialSuccess { .. } => "partial_success",
            RunReport::RunFailed { .. } => "run_failed",
        }
    }

    /// True when an operator has something to look at.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            RunReport::PartialSuccess { .. } | RunReport::RunFailed { .. }
        )
    }

    pub(crate) fn failed(file: Option<String>, error: impl Into<String>) -> Self {
        RunReport::RunFailed {
            file,
            run: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunResponse {
    pub run_id: Uuid,
    #[serde(flatten)]
    pub report: RunReport,
}
