//! Hand-off from one stage to the next
//!
//! Triggering the next stage never blocks the stage that just finished. A
//! trigger that cannot be delivered is written back to the document as an
//! error, so a stalled pipeline always shows up in `error_message`.
//!
//! HTTP triggers ask for `Prefer: respond-async`. The receiving server
//! accepts the job with 202 and runs the stage detached, so delivery is
//! settled as soon as the job is accepted. How the stage itself went is
//! recorded by the stage.

use super::Pipeline;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::meta::{Registry, Stage};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Header value asking a stage endpoint to accept the job and run it detached
pub const RESPOND_ASYNC: &str = "respond-async";

/// A request to run one stage for one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub stage: Stage,
    pub document_id: String,
}

#[derive(Clone)]
pub enum Dispatcher {
    /// Stages do not chain; the caller drives them
    Manual,
    /// Jobs go to a worker task in this process
    Queue(mpsc::UnboundedSender<Job>),
    /// Jobs are POSTed to the stage endpoints of a running server
    Http(HttpTrigger),
}

impl Dispatcher {
    /// Queue dispatcher plus the receiving end for [`spawn_worker`]
    pub fn queue() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Dispatcher::Queue(tx), rx)
    }

    pub fn http(public_url: &str, retry: &RetryConfig) -> Result<Self> {
        Ok(Dispatcher::Http(HttpTrigger::new(public_url, retry)?))
    }

    /// Fire-and-forget hand-off of `stage` for `document_id`
    pub async fn dispatch(&self, stage: Stage, document_id: &str, registry: &Registry) {
        match self {
            Dispatcher::Manual => {
                debug!("Manual dispatch: {} for {} left to the caller", stage, document_id);
            }
            Dispatcher::Queue(tx) => {
                let job = Job {
                    stage,
                    document_id: document_id.to_string(),
                };
                if tx.send(job).is_err() {
                    let err = Error::PipelineTrigger("pipeline worker is not running".to_string());
                    record_trigger_failure(registry, document_id, &err).await;
                } else {
                    debug!("Queued {} for {}", stage, document_id);
                }
            }
            Dispatcher::Http(trigger) => {
                let trigger = trigger.clone();
                let registry = registry.clone();
                let document_id = document_id.to_string();
                tokio::spawn(async move {
                    if let Err(err) = trigger.trigger(stage, &document_id).await {
                        record_trigger_failure(&registry, &document_id, &err).await;
                    }
                });
            }
        }
    }
}

/// Write a failed hand-off back to the document
async fn record_trigger_failure(registry: &Registry, document_id: &str, err: &Error) {
    warn!("Trigger for {} failed: {}", document_id, err);
    match registry.record_failure(document_id, &err.to_string()).await {
        Ok(true) => {}
        Ok(false) => debug!("Document {} already terminal; trigger error not recorded", document_id),
        Err(e) => error!("Could not record trigger failure for {}: {}", document_id, e),
    }
}

/// POSTs `{documentId}` to `<public_url>/api/<stage endpoint>`
#[derive(Clone)]
pub struct HttpTrigger {
    client: Client,
    base_url: Url,
}

impl HttpTrigger {
    pub fn new(public_url: &str, retry: &RetryConfig) -> Result<Self> {
        let mut base = public_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(retry.request_timeout_secs))
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn stage_url(&self, stage: Stage) -> Result<Url> {
        Ok(self.base_url.join(&format!("api/{}", stage.endpoint()))?)
    }

    pub async fn trigger(&self, stage: Stage, document_id: &str) -> Result<()> {
        let url = self.stage_url(stage)?;
        debug!("Triggering {} at {}", stage, url);

        let response = self
            .client
            .post(url.clone())
            .header("prefer", RESPOND_ASYNC)
            .json(&json!({ "documentId": document_id }))
            .send()
            .await
            .map_err(|e| Error::PipelineTrigger(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::PipelineTrigger(format!(
                "{} responded with {}: {}",
                url, status, body
            )));
        }
        Ok(())
    }
}

/// Run one job on its own task, detached from whoever asked for it
pub fn spawn_job(pipeline: Arc<Pipeline>, job: Job) -> JoinHandle<()> {
    tokio::spawn(async move {
        match pipeline.run_stage(job.stage, &job.document_id).await {
            Ok(_) => {}
            Err(Error::Conflict(msg)) | Err(Error::InvalidTransition { from: msg, .. }) => {
                warn!("Skipped {} for {}: {}", job.stage, job.document_id, msg);
            }
            Err(e) => {
                // Stage failures are already on the document
                debug!("{} failed for {}: {}", job.stage, job.document_id, e);
            }
        }
    })
}

/// Run queued jobs until every sender is gone.
///
/// Each job gets its own task so documents progress independently.
pub fn spawn_worker(pipeline: Arc<Pipeline>, mut jobs: mpsc::UnboundedReceiver<Job>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            spawn_job(Arc::clone(&pipeline), job);
        }
        info!("Pipeline worker stopped");
    })
}
