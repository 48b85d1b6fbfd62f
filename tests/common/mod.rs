#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use pin_scheduler::model::{EntryKind, PublishItem, RemoteEntry, RemoteFile};
use pin_scheduler::orchestrator::Orchestrator;
use pin_scheduler::publisher::{PinPublisher, PinResponse, PublishError};
use pin_scheduler::source::BatchLayout;
use pin_scheduler::store::{ContentStore, RawFetcher, StoreError};

pub const SAMPLE_CSV: &str = "title,description,alt_text,link,image_url,board_id\n\
    Sunset,Warm evening,Orange sky,https://blog.test/sunset,https://img.test/1.jpg,board-1\n\
    Forest,,,,https://img.test/2.jpg,\n\
    Lake,Cool,,,https://img.test/3.jpg,board-2\n";

#[derive(Debug, Clone, Default)]
struct StoreState {
    files: BTreeMap<String, (Vec<u8>, String)>,
    next_sha: u64,
    calls: Vec<String>,
}

/// In-memory repository with GitHub-like sha guards and failure switches.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    pub fail_list: Arc<Mutex<bool>>,
    pub fail_get: Arc<Mutex<BTreeSet<String>>>,
    pub fail_put: Arc<Mutex<bool>>,
    pub fail_delete: Arc<Mutex<bool>>,
    pub corrupt_puts: Arc<Mutex<bool>>,
    /// Path rewritten by "someone else" right after our next put.
    pub touch_on_put: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub async fn with_files(files: &[(&str, &str)]) -> Self {
        let store = Self::default();
        for (path, content) in files {
            store.insert(path, content.as_bytes()).await;
        }
        store
    }

    pub async fn insert(&self, path: &str, content: &[u8]) -> String {
        let mut state = self.state.lock().await;
        state.next_sha += 1;
        let sha = format!("sha-{}", state.next_sha);
        state
            .files
            .insert(path.to_string(), (content.to_vec(), sha.clone()));
        sha
    }

    pub async fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().await.files.get(path).map(|(c, _)| c.clone())
    }

    pub async fn sha(&self, path: &str) -> Option<String> {
        self.state.lock().await.files.get(path).map(|(_, s)| s.clone())
    }

    pub async fn paths(&self) -> Vec<String> {
        self.state.lock().await.files.keys().cloned().collect()
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn writes(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| c.starts_with("put:") || c.starts_with("delete:"))
            .collect()
    }

    pub async fn set(&self, flag: &Arc<Mutex<bool>>, value: bool) {
        *flag.lock().await = value;
    }

    async fn record(&self, call: String) {
        self.state.lock().await.calls.push(call);
    }
}

fn status(status: u16, body: &str) -> StoreError {
    StoreError::Status {
        status,
        body: body.to_string(),
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn list_dir(&self, dir: &str) -> Result<Vec<RemoteEntry>, StoreError> {
        self.record(format!("list:{dir}")).await;
        if *self.fail_list.lock().await {
            return Err(status(503, "listing unavailable"));
        }
        let dir = dir.trim_matches('/');
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let state = self.state.lock().await;
        let mut entries = Vec::new();
        let mut seen_dirs = BTreeSet::new();
        for (path, (_, sha)) in &state.files {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((sub, _)) => {
                    if seen_dirs.insert(sub.to_string()) {
                        entries.push(RemoteEntry {
                            name: sub.to_string(),
                            path: format!("{prefix}{sub}"),
                            kind: EntryKind::Dir,
                            sha: "tree".into(),
                        });
                    }
                }
                None => entries.push(RemoteEntry {
                    name: rest.to_string(),
                    path: path.clone(),
                    kind: EntryKind::File,
                    sha: sha.clone(),
                }),
            }
        }
        // The real API does not promise any order.
        entries.reverse();
        Ok(entries)
    }

    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, StoreError> {
        self.record(format!("get:{path}")).await;
        if self.fail_get.lock().await.contains(path) {
            return Err(status(500, "read failed"));
        }
        let state = self.state.lock().await;
        Ok(state.files.get(path).map(|(content, sha)| RemoteFile {
            path: path.to_string(),
            sha: sha.clone(),
            content: content.clone(),
        }))
    }

    async fn put_file(
        &self,
        path: &str,
        content: &[u8],
        _message: &str,
        sha: Option<&str>,
    ) -> Result<String, StoreError> {
        self.record(format!("put:{path}")).await;
        if *self.fail_put.lock().await {
            return Err(status(500, "write failed"));
        }
        let corrupt = *self.corrupt_puts.lock().await;
        let mut state = self.state.lock().await;
        match (state.files.get(path), sha) {
            (Some(_), None) => return Err(status(422, "sha wasn't supplied")),
            (Some((_, current)), Some(given)) if current != given => {
                return Err(status(409, "does not match"))
            }
            (None, Some(_)) => return Err(status(404, "not found")),
            _ => {}
        }
        state.next_sha += 1;
        let new_sha = format!("sha-{}", state.next_sha);
        let mut stored = content.to_vec();
        if corrupt {
            stored.push(b'!');
        }
        state.files.insert(path.to_string(), (stored, new_sha.clone()));
        if let Some(other) = self.touch_on_put.lock().await.take() {
            state.next_sha += 1;
            let bumped = format!("sha-{}", state.next_sha);
            if let Some(entry) = state.files.get_mut(&other) {
                entry.0.extend_from_slice(b"edited\n");
                entry.1 = bumped;
            }
        }
        Ok(new_sha)
    }

    async fn delete_file(&self, path: &str, sha: &str, _message: &str) -> Result<(), StoreError> {
        self.record(format!("delete:{path}")).await;
        if *self.fail_delete.lock().await {
            return Err(status(500, "delete failed"));
        }
        let mut state = self.state.lock().await;
        let current = state.files.get(path).map(|(_, s)| s.clone());
        match current {
            None => Err(status(404, "not found")),
            Some(current) if current != sha => Err(status(409, "does not match")),
            Some(_) => {
                state.files.remove(path);
                Ok(())
            }
        }
    }
}

/// Publisher returning queued statuses; defaults to 201 once the queue is empty.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    responses: Arc<Mutex<VecDeque<Result<u16, String>>>>,
    calls: Arc<Mutex<Vec<PublishItem>>>,
    call_times: Arc<Mutex<Vec<tokio::time::Instant>>>,
    /// Rewrites a store file during the first publish call.
    edit: Arc<Mutex<Option<(MemoryStore, String, Vec<u8>)>>>,
}

impl RecordingPublisher {
    pub fn with_responses(responses: Vec<Result<u16, String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    /// Someone else rewrites `path` while the first pin is being sent.
    pub fn editing(store: &MemoryStore, path: &str, content: &str) -> Self {
        Self {
            edit: Arc::new(Mutex::new(Some((
                store.clone(),
                path.to_string(),
                content.as_bytes().to_vec(),
            )))),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<PublishItem> {
        self.calls.lock().await.clone()
    }

    pub async fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.call_times.lock().await.clone()
    }
}

#[async_trait]
impl PinPublisher for RecordingPublisher {
    async fn create_pin(&self, item: &PublishItem) -> Result<PinResponse, PublishError> {
        self.calls.lock().await.push(item.clone());
        self.call_times.lock().await.push(tokio::time::Instant::now());
        if let Some((store, path, content)) = self.edit.lock().await.take() {
            store.insert(&path, &content).await;
        }
        let next = self.responses.lock().await.pop_front().unwrap_or(Ok(201));
        match next {
            Ok(status) => Ok(PinResponse {
                status,
                body: format!("{{\"status\":{status}}}"),
                body_error: None,
            }),
            Err(msg) => Err(PublishError::Url(msg)),
        }
    }
}

/// Serves CSV bodies by URL.
#[derive(Clone, Default)]
pub struct StaticFetcher {
    bodies: Arc<Mutex<BTreeMap<String, String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StaticFetcher {
    pub async fn with_body(url: &str, body: &str) -> Self {
        let fetcher = Self::default();
        fetcher
            .bodies
            .lock()
            .await
            .insert(url.to_string(), body.to_string());
        fetcher
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl RawFetcher for StaticFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, StoreError> {
        self.calls.lock().await.push(url.to_string());
        self.bodies
            .lock()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| status(404, "no such CSV"))
    }
}

pub fn orchestrator(
    store: &MemoryStore,
    publisher: &RecordingPublisher,
    fetcher: &StaticFetcher,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(store.clone()),
        Arc::new(publisher.clone()),
        Arc::new(fetcher.clone()),
        BatchLayout::default(),
        Duration::ZERO,
    )
}
