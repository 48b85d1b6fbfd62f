use tracing::debug;

use crate::config::Config;
use crate::model::{EntryKind, RemoteEntry};
use crate::store::{ContentStore, StoreError};

/// Where pending batches live, how they are named, and where they go once sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLayout {
    pub pending_dir: String,
    pub processed_dir: String,
    pub prefix: String,
    pub suffix: String,
}

impl Default for BatchLayout {
    fn default() -> Self {
        Self {
            pending_dir: String::new(),
            processed_dir: "processed".into(),
            prefix: "pins_bulk_".into(),
            suffix: ".csv".into(),
        }
    }
}

impl BatchLayout {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            pending_dir: cfg.store.pending_dir.clone(),
            processed_dir: cfg.store.processed_dir.clone(),
            prefix: cfg.store.batch_prefix.clone(),
            suffix: cfg.store.batch_suffix.clone(),
        }
    }

    pub fn is_candidate(&self, entry: &RemoteEntry) -> bool {
        entry.kind == EntryKind::File
            && entry.name.starts_with(&self.prefix)
            && entry.name.ends_with(&self.suffix)
            && entry.name.len() >= self.prefix.len() + self.suffix.len()
    }

    pub fn source_path(&self, name: &str) -> String {
        join(&self.pending_dir, name)
    }

    pub fn processed_path(&self, name: &str) -> String {
        join(&self.processed_dir, name)
    }
}

fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// All pending batch names, smallest first. An empty queue is not an error.
pub async fn list_candidates(
    store: &dyn ContentStore,
    layout: &BatchLayout,
) -> Result<Vec<String>, StoreError> {
    let entries = store.list_dir(&layout.pending_dir).await?;
    let mut names: Vec<String> = entries
        .into_iter()
        .filter(|e| layout.is_candidate(e))
        .map(|e| e.name)
        .collect();
    names.sort();
    debug!(count = names.len(), dir = %layout.pending_dir, "listed candidates");
    Ok(names)
}

pub async fn next_candidate(
    store: &dyn ContentStore,
    layout: &BatchLayout,
) -> Result<Option<String>, StoreError> {
    Ok(list_candidates(store, layout).await?.into_iter().next())
}
