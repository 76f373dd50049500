use std::sync::Arc;

use async_trait::async_trait;
use relay_channel::ChannelRegistry;
use reqwest::Client;
use secrecy::ExposeSecret;

use crate::{JobStatus, ReconcileError, TrackedJob};

/// Collaborator reporting the status of asynchronous jobs
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    /// Query the current status of a job
    async fn poll(&self, job: &TrackedJob) -> Result<JobStatus, ReconcileError>;
}

/// Polls `GET {base_url}/jobs/{job_id}` on the channel that accepted the job
pub struct HttpJobStatusSource {
    client: Client,
    registry: Arc<ChannelRegistry>,
}

impl HttpJobStatusSource {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self {
            client: Client::new(),
            registry,
        }
    }
}

#[async_trait]
impl JobStatusSource for HttpJobStatusSource {
    async fn poll(&self, job: &TrackedJob) -> Result<JobStatus, ReconcileError> {
        let channel = self
            .registry
            .get(job.channel_id)
            .ok_or(ReconcileError::UnknownChannel(job.channel_id))?;

        let url = format!("{}/jobs/{}", channel.base_url.as_str().trim_end_matches('/'), job.job_id);

        let mut request = self.client.get(&url);
        if let Some(credential) = &channel.credential {
            request = request.bearer_auth(credential.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ReconcileError::Poll(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReconcileError::Poll(format!("{status}: {body}")));
        }

        let mut status = response
            .json::<JobStatus>()
            .await
            .map_err(|e| ReconcileError::Poll(e.to_string()))?;

        if status.job_id.is_empty() {
            status.job_id.clone_from(&job.job_id);
        }

        Ok(status)
    }
}
