//! WaveSpeed driver, for HiDream I1.
//!
//! WaveSpeed is job-based: we submit a prompt, get back a request ID, and
//! poll `/predictions/{id}/result` until the job completes. The result is a
//! URL, which the artifact writer downloads later.

use crate::{config::ApiConfig, prelude::*};

use super::{
    Driver, GeneratedImage, GenerationOpts, ImageSize,
    jobs::{HttpReply, JobRunner, JobTransport, PollPolicy},
};

/// The model path for HiDream I1 (full).
const HIDREAM_MODEL_PATH: &str = "wavespeed-ai/hidream-i1-full";

/// HTTP transport for WaveSpeed's job API.
pub struct HttpJobTransport {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model_path: String,
}

// Hand-written so that the API key never ends up in logs.
impl std::fmt::Debug for HttpJobTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpJobTransport")
            .field("api_base", &self.api_base)
            .field("model_path", &self.model_path)
            .finish_non_exhaustive()
    }
}

impl HttpJobTransport {
    /// Convert a [`reqwest::Response`] into an [`HttpReply`].
    async fn reply(response: reqwest::Response) -> Result<HttpReply> {
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;
        Ok(HttpReply { status, body })
    }
}

#[async_trait]
impl JobTransport for HttpJobTransport {
    async fn submit(&self, payload: &Value) -> Result<HttpReply> {
        let url = format!("{}/api/v3/{}", self.api_base, self.model_path);
        trace!(%url, %payload, "Submitting job");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Failed to POST {url}"))?;
        Self::reply(response).await
    }

    async fn fetch_result(&self, job_id: &str) -> Result<HttpReply> {
        let url = format!("{}/api/v3/predictions/{}/result", self.api_base, job_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to GET {url}"))?;
        Self::reply(response).await
    }
}

/// WaveSpeed driver.
#[derive(Debug)]
pub struct WaveSpeedDriver<T = HttpJobTransport> {
    runner: JobRunner<T>,
    size: ImageSize,
    seed: i64,
}

impl WaveSpeedDriver {
    /// Create a new WaveSpeed driver.
    pub fn new(config: &ApiConfig, opts: &GenerationOpts) -> Result<Self> {
        let transport = HttpJobTransport {
            client: config.http_client()?,
            api_base: config.wavespeed.api_base.clone(),
            api_key: config
                .wavespeed
                .require_api_key("WAVESPEED_API_KEY")?
                .to_owned(),
            model_path: HIDREAM_MODEL_PATH.to_owned(),
        };
        let policy = PollPolicy {
            interval: opts.poll_interval(),
            max_attempts: opts.max_poll_attempts,
            ..PollPolicy::default()
        };
        Ok(Self::with_transport(transport, policy, opts.size, opts.seed))
    }
}

impl<T: JobTransport> WaveSpeedDriver<T> {
    /// Create a driver using an arbitrary transport.
    pub fn with_transport(transport: T, policy: PollPolicy, size: ImageSize, seed: i64) -> Self {
        Self {
            runner: JobRunner::new(transport, policy),
            size,
            seed,
        }
    }

    /// Build the JSON payload for a prompt.
    fn payload(&self, prompt: &str) -> Value {
        json!({
            "prompt": prompt,
            "size": self.size.to_string(),
            "seed": self.seed,
            "enable_base64_output": false,
            "enable_safety_checker": true,
        })
    }
}

#[async_trait]
impl<T> Driver for WaveSpeedDriver<T>
where
    T: JobTransport + std::fmt::Debug,
{
    #[instrument(level = "debug", skip_all)]
    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage> {
        let job = self.runner.run(&self.payload(prompt)).await?;
        let url = job
            .outputs
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Job {} completed without outputs", job.job_id))?;
        info!(%url, "Image URL");
        Ok(GeneratedImage::Remote {
            url,
            job_id: Some(job.job_id),
        })
    }
}
