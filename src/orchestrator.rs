//! Top-level run controller: pick the oldest pending batch, dispatch it,
//! archive it on success.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn, Span};
use uuid::Uuid;

use crate::archive;
use crate::config::{Config, ConfigError};
use crate::dispatch;
use crate::model::{RunReport, RunResponse, WorkBatch};
use crate::publisher::{PinPublisher, PinterestClient};
use crate::rows::{self, Validated};
use crate::source::{self, BatchLayout};
use crate::store::{ContentStore, GithubClient, HttpFetcher, RawFetcher};

const PREVIEW_LEN: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Fetch and validate only.
    pub dry_run: bool,
    /// Overrides the configured pacing delay.
    pub delay: Option<Duration>,
}

pub struct Orchestrator {
    store: Arc<dyn ContentStore>,
    publisher: Arc<dyn PinPublisher>,
    fetcher: Arc<dyn RawFetcher>,
    layout: BatchLayout,
    default_delay: Duration,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("layout", &self.layout)
            .field("default_delay", &self.default_delay)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        publisher: Arc<dyn PinPublisher>,
        fetcher: Arc<dyn RawFetcher>,
        layout: BatchLayout,
        default_delay: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            fetcher,
            layout,
            default_delay,
        }
    }

    /// Build production clients. Fails before any remote call if a required
    /// setting is missing.
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        cfg.require_run_settings()?;
        let store = GithubClient::from_config(cfg)
            .map_err(|e| ConfigError::Invalid(format!("store client: {e}")))?;
        let publisher = PinterestClient::from_config(cfg)
            .map_err(|e| ConfigError::Invalid(format!("publishing client: {e}")))?;
        let fetcher =
            HttpFetcher::new().map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
        Ok(Self::new(
            Arc::new(store),
            Arc::new(publisher),
            Arc::new(fetcher),
            BatchLayout::from_config(cfg),
            cfg.default_delay()?,
        ))
    }

    /// One scheduled run over the oldest pending batch.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty, dry_run = opts.dry_run))]
    pub async fn run_scheduled(&self, opts: RunOptions) -> RunResponse {
        let run_id = Uuid::new_v4();
        Span::current().record("run_id", tracing::field::display(run_id));
        let report = self.scheduled_report(opts).await;
        info!(status = report.status(), "scheduled run finished");
        RunResponse { run_id, report }
    }

    async fn scheduled_report(&self, opts: RunOptions) -> RunReport {
        let name = match source::next_candidate(self.store.as_ref(), &self.layout).await {
            Ok(Some(name)) => name,
            Ok(None) => {
                info!("no pending batch");
                return RunReport::Idle {
                    message: "no pending batch".into(),
                };
            }
            Err(err) => {
                error!(error = %err, "failed to list pending batches");
                return RunReport::failed(None, format!("failed to list pending batches: {err}"));
            }
        };

        let batch = match self.fetch_batch(&name).await {
            Ok(batch) => batch,
            Err(message) => {
                error!(file = %name, %message, "failed to fetch batch");
                return RunReport::failed(Some(name), message);
            }
        };
        info!(file = %batch.name, sha = %batch.sha, bytes = batch.content.len(), "picked batch");

        let validated = match rows::decode(&batch.content) {
            Ok(v) => v,
            Err(err) => {
                warn!(file = %batch.name, error = %err, "batch is not valid CSV");
                return RunReport::failed(Some(batch.name), err.to_string());
            }
        };

        if opts.dry_run {
            return preview(batch.name, validated);
        }

        let delay = opts.delay.unwrap_or(self.default_delay);
        let run = dispatch::run(validated, self.publisher.as_ref(), delay).await;
        if !run.is_success() {
            warn!(
                file = %batch.name,
                sent = run.rows_sent,
                "nothing was sent; batch stays pending"
            );
            return RunReport::RunFailed {
                file: Some(batch.name),
                run: Some(run),
                error: None,
            };
        }

        let processed_path = self.layout.processed_path(&batch.name);
        let moved =
            archive::archive(self.store.as_ref(), &batch.path, &processed_path, &batch.sha).await;
        match moved {
            Ok(receipt) => RunReport::DoneAndMoved {
                file: batch.name,
                moved_to: receipt.to,
                run,
            },
            Err(err) => {
                error!(
                    file = %batch.name,
                    stage = ?err.stage(),
                    partial = err.is_partial(),
                    error = %err,
                    "archive failed after dispatch"
                );
                RunReport::PartialSuccess {
                    file: batch.name,
                    run,
                    move_error: err.to_move_error(),
                }
            }
        }
    }

    async fn fetch_batch(&self, name: &str) -> Result<WorkBatch, String> {
        let path = self.layout.source_path(name);
        match self.store.get_file(&path).await {
            Ok(Some(file)) => Ok(WorkBatch {
                name: name.to_string(),
                path,
                sha: file.sha,
                content: file.content,
            }),
            Ok(None) => Err(format!("{path} disappeared before it could be read")),
            Err(err) => Err(format!("failed to fetch {path}: {err}")),
        }
    }

    /// Preview or dispatch a CSV from an arbitrary URL. Nothing is archived.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty, dry_run = opts.dry_run))]
    pub async fn run_adhoc(&self, raw_csv_url: &str, opts: RunOptions) -> RunResponse {
        let run_id = Uuid::new_v4();
        Span::current().record("run_id", tracing::field::display(run_id));
        let report = self.adhoc_report(raw_csv_url, opts).await;
        info!(status = report.status(), "ad-hoc run finished");
        RunResponse { run_id, report }
    }

    async fn adhoc_report(&self, url: &str, opts: RunOptions) -> RunReport {
        let text = match self.fetcher.fetch_text(url).await {
            Ok(text) => text,
            Err(err) => {
                error!(%url, error = %err, "failed to fetch CSV");
                return RunReport::failed(
                    Some(url.to_string()),
                    format!("failed to fetch CSV: {err}"),
                );
            }
        };
        let validated = match rows::decode(text.as_bytes()) {
            Ok(v) => v,
            Err(err) => return RunReport::failed(Some(url.to_string()), err.to_string()),
        };
        if validated.rows_total == 0 {
            return RunReport::Ok {
                rows: 0,
                message: "CSV is empty or only header".into(),
            };
        }
        if opts.dry_run {
            return preview(url.to_string(), validated);
        }

        let delay = opts.delay.unwrap_or(self.default_delay);
        let run = dispatch::run(validated, self.publisher.as_ref(), delay).await;
        RunReport::Done {
            file: url.to_string(),
            run,
        }
    }
}

fn preview(file: String, validated: Validated) -> RunReport {
    let rows_valid = validated.rows_valid();
    let Validated {
        rows_total,
        mut items,
        errors,
    } = validated;
    items.truncate(PREVIEW_LEN);
    RunReport::Preview {
        file,
        rows_total,
        rows_valid,
        preview: items,
        errors,
    }
}
