//! Upload, process, reprocess and delete commands

use super::open_pipeline;
use crate::config::{Config, DispatchMode};
use crate::error::{Error, Result};
use crate::meta::{Document, DocumentStatus, Registry, Stage};
use crate::pipeline::{HttpTrigger, Pipeline};
use crate::progress::add_spinner;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How a command follows a document after handing it to the pipeline
#[derive(Debug, Clone, Copy)]
pub struct FollowOptions {
    /// In http dispatch mode, poll until the document is ready or failed
    pub wait: bool,
    pub timeout: Duration,
    /// Hide spinners (JSON output)
    pub quiet: bool,
}

impl Default for FollowOptions {
    fn default() -> Self {
        Self {
            wait: false,
            timeout: Duration::from_secs(600),
            quiet: false,
        }
    }
}

/// Upload a local file and run (or trigger) its pipeline
pub async fn cmd_upload(config: &Config, path: &Path, follow: FollowOptions) -> Result<Document> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Validation(format!("Not a file path: {}", path.display())))?;
    let bytes = tokio::fs::read(path).await?;

    let pipeline = open_pipeline(config).await?;
    let uploaded = pipeline.upload(filename, None, &bytes).await?;
    info!("Uploaded {} as {}", filename, uploaded.id);

    advance(config, &pipeline, &uploaded.id, Stage::Ocr, follow).await
}

/// Run every remaining stage of a document
pub async fn cmd_process(config: &Config, id: &str, follow: FollowOptions) -> Result<Document> {
    let pipeline = open_pipeline(config).await?;
    let doc = pipeline.registry().require_document(id).await?;
    let stage = match doc.get_status()? {
        DocumentStatus::Ready => return Ok(doc),
        DocumentStatus::OcrDone => Stage::Extract,
        DocumentStatus::Extracted => Stage::Embed,
        _ => Stage::Ocr,
    };
    advance(config, &pipeline, id, stage, follow).await
}

/// Reset a document to the input of `stage` and run from there
pub async fn cmd_reprocess(
    config: &Config,
    id: &str,
    stage: Stage,
    follow: FollowOptions,
) -> Result<Document> {
    let pipeline = open_pipeline(config).await?;
    pipeline.reprocess(id, stage).await?;
    advance(config, &pipeline, id, stage, follow).await
}

/// Delete a document with its blob
pub async fn cmd_delete(config: &Config, id: &str) -> Result<Document> {
    let pipeline = open_pipeline(config).await?;
    pipeline.delete_document(id).await
}

/// Move a document on from `stage`, the way `pipeline.dispatch` says.
///
/// In-process mode runs the stages here; http mode hands `stage` to the
/// server, which chains the rest.
async fn advance(
    config: &Config,
    pipeline: &Pipeline,
    id: &str,
    stage: Stage,
    follow: FollowOptions,
) -> Result<Document> {
    match config.pipeline.dispatch {
        DispatchMode::InProcess => {
            let spinner = add_spinner(format!("Processing {}", id), follow.quiet);
            let result = pipeline.process(id).await;
            spinner.finish_and_clear();
            result
        }
        DispatchMode::Http => {
            let trigger = HttpTrigger::new(&config.server.public_url, &config.retry)?;
            if let Err(e) = trigger.trigger(stage, id).await {
                pipeline.registry().record_failure(id, &e.to_string()).await?;
                return Err(e);
            }
            if follow.wait {
                wait_for_pipeline(pipeline.registry(), id, follow).await
            } else {
                pipeline.registry().require_document(id).await
            }
        }
    }
}

/// Poll until a document is `ready` or `error`.
///
/// Gives up after `follow.timeout` and returns the row as it stands.
pub async fn wait_for_pipeline(
    registry: &Registry,
    id: &str,
    follow: FollowOptions,
) -> Result<Document> {
    let spinner = add_spinner(format!("Waiting for {}", id), follow.quiet);
    let started = Instant::now();

    let doc = loop {
        let doc = registry.require_document(id).await?;
        let status = doc.get_status()?;
        if status.is_terminal() {
            break doc;
        }
        if started.elapsed() >= follow.timeout {
            warn!(
                "Gave up waiting for {} after {}s; status is {}",
                id,
                follow.timeout.as_secs(),
                status
            );
            break doc;
        }
        spinner.set_message(format!("Waiting for {} ({})", id, status));
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    };

    spinner.finish_and_clear();
    Ok(doc)
}

/// Print the state a document ended up in
pub fn print_document_outcome(doc: &Document) {
    match doc.status.as_str() {
        "ready" => println!("✓ {} is ready: {}", doc.id, doc.display_title()),
        "error" => println!(
            "✗ {} failed: {}",
            doc.id,
            doc.error_message.as_deref().unwrap_or("unknown error")
        ),
        status => println!("• {} is {}", doc.id, status),
    }
}
