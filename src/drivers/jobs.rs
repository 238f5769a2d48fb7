//! Submit-and-poll support for job-based image providers.
//!
//! A job moves through `submitted → processing* → completed | failed`. We
//! submit once, then check its status at a fixed interval until we see a
//! terminal status or run out of attempts. HTTP errors at either step end the
//! job immediately. We never retry.

use std::time::Duration;

use reqwest::StatusCode;
use tokio::time;

use crate::prelude::*;

use super::http_status_error;

/// A raw HTTP reply: just the status and the body text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpReply {
    /// The HTTP status.
    pub status: StatusCode,
    /// The response body.
    pub body: String,
}

impl HttpReply {
    /// Create a new reply.
    #[cfg(test)]
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Fail on non-2xx statuses, and otherwise return the `data` field of the
    /// JSON body.
    fn into_data(self, what: &str) -> Result<Value> {
        if !self.status.is_success() {
            return Err(http_status_error(what, self.status, &self.body));
        }
        let mut body = serde_json::from_str::<Value>(&self.body)
            .with_context(|| format!("{what} returned invalid JSON: {:?}", self.body))?;
        match body.get_mut("data") {
            Some(data) => Ok(data.take()),
            None => Err(anyhow!("{what} response has no \"data\": {}", self.body)),
        }
    }
}

/// Low-level transport for a job API.
#[async_trait]
pub trait JobTransport: Send + Sync + 'static {
    /// Submit a new job.
    async fn submit(&self, payload: &Value) -> Result<HttpReply>;

    /// Fetch the current state of a job.
    async fn fetch_result(&self, job_id: &str) -> Result<HttpReply>;
}

/// How we poll a job, and which statuses end it.
#[derive(Clone, Debug)]
pub struct PollPolicy {
    /// Time to wait between status checks.
    pub interval: Duration,

    /// Maximum number of status checks before giving up.
    pub max_attempts: usize,

    /// Statuses meaning the job finished successfully.
    pub completed_statuses: Vec<String>,

    /// Statuses meaning the job failed.
    pub failed_statuses: Vec<String>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 300,
            completed_statuses: vec!["completed".to_owned()],
            failed_statuses: vec!["failed".to_owned()],
        }
    }
}

/// What a status check told us.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Still working, with the provider's status string.
    Processing(String),
    /// Done, with output references (usually URLs).
    Completed(Vec<String>),
    /// The provider gave up, with its reason.
    Failed(String),
}

impl PollPolicy {
    /// Classify the `data` field of a status response.
    pub fn classify(&self, data: &Value) -> Result<JobState> {
        let status = data
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Job status response has no status: {data}"))?;
        if self.completed_statuses.iter().any(|s| s == status) {
            let outputs = data
                .get("outputs")
                .and_then(Value::as_array)
                .map(|outputs| {
                    outputs
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            Ok(JobState::Completed(outputs))
        } else if self.failed_statuses.iter().any(|s| s == status) {
            let reason = match data.get("error") {
                Some(Value::String(reason)) if !reason.is_empty() => reason.clone(),
                Some(Value::Null) | None => format!("job status {status:?}"),
                Some(other) => other.to_string(),
            };
            Ok(JobState::Failed(reason))
        } else {
            Ok(JobState::Processing(status.to_owned()))
        }
    }
}

/// A finished job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedJob {
    /// The provider's job ID.
    pub job_id: String,
    /// Output references.
    pub outputs: Vec<String>,
}

/// Runs jobs against a [`JobTransport`] using a [`PollPolicy`].
#[derive(Debug)]
pub struct JobRunner<T> {
    transport: T,
    policy: PollPolicy,
}

impl<T: JobTransport> JobRunner<T> {
    /// Create a new job runner.
    pub fn new(transport: T, policy: PollPolicy) -> Self {
        Self { transport, policy }
    }

    /// Our transport.
    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Submit a job and wait for it to finish.
    #[instrument(level = "debug", skip_all)]
    pub async fn run(&self, payload: &Value) -> Result<CompletedJob> {
        let data = self
            .transport
            .submit(payload)
            .await
            .context("Failed to submit job")?
            .into_data("Job submission")?;
        let job_id = match data.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(anyhow!("Job submission returned no job ID: {data}")),
        };
        info!(%job_id, "Job submitted");

        for attempt in 1..=self.policy.max_attempts {
            let data = self
                .transport
                .fetch_result(&job_id)
                .await
                .with_context(|| format!("Failed to check status of job {job_id}"))?
                .into_data("Job status check")?;
            match self.policy.classify(&data)? {
                JobState::Completed(outputs) => {
                    info!(%job_id, attempt, "Job completed");
                    return Ok(CompletedJob { job_id, outputs });
                }
                JobState::Failed(reason) => {
                    return Err(anyhow!("Job {job_id} failed: {reason}"));
                }
                JobState::Processing(status) => {
                    debug!(%job_id, %status, attempt, "Job still processing");
                }
            }
            if attempt < self.policy.max_attempts {
                time::sleep(self.policy.interval).await;
            }
        }
        Err(anyhow!(
            "Job {job_id} did not finish after {} status checks",
            self.policy.max_attempts
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use super::*;

    /// A transport which replays canned replies and records what it was asked.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        submit_reply: Mutex<Option<Result<HttpReply, String>>>,
        poll_replies: Mutex<VecDeque<Result<HttpReply, String>>>,
        pub submitted: Mutex<Vec<Value>>,
        pub polled: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new(submit: HttpReply, polls: Vec<HttpReply>) -> Self {
            Self {
                submit_reply: Mutex::new(Some(Ok(submit))),
                poll_replies: Mutex::new(polls.into_iter().map(Ok).collect()),
                ..Self::default()
            }
        }

        pub fn with_transport_error(message: &str) -> Self {
            Self {
                submit_reply: Mutex::new(Some(Err(message.to_owned()))),
                ..Self::default()
            }
        }

        pub fn poll_count(&self) -> usize {
            self.polled.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl JobTransport for ScriptedTransport {
        async fn submit(&self, payload: &Value) -> Result<HttpReply> {
            self.submitted.lock().unwrap().push(payload.clone());
            match self.submit_reply.lock().unwrap().take() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => Err(anyhow!(message)),
                None => Err(anyhow!("submitted twice")),
            }
        }

        async fn fetch_result(&self, job_id: &str) -> Result<HttpReply> {
            self.polled.lock().unwrap().push(job_id.to_owned());
            match self.poll_replies.lock().unwrap().pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => Err(anyhow!(message)),
                None => Err(anyhow!("no more scripted poll replies")),
            }
        }
    }

    pub fn submitted(id: &str) -> HttpReply {
        HttpReply::new(
            StatusCode::OK,
            json!({ "code": 200, "data": { "id": id, "status": "created" } }).to_string(),
        )
    }

    pub fn status(status: &str) -> HttpReply {
        HttpReply::new(
            StatusCode::OK,
            json!({ "data": { "status": status, "outputs": [] } }).to_string(),
        )
    }

    pub fn completed(url: &str) -> HttpReply {
        HttpReply::new(
            StatusCode::OK,
            json!({ "data": { "status": "completed", "outputs": [url] } }).to_string(),
        )
    }

    fn fast_policy(max_attempts: usize) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
            ..PollPolicy::default()
        }
    }

    #[tokio::test]
    async fn polls_until_first_completed() {
        let transport = ScriptedTransport::new(
            submitted("job-1"),
            vec![
                status("processing"),
                status("processing"),
                completed("https://example.com/1.png"),
                completed("https://example.com/unused.png"),
            ],
        );
        let runner = JobRunner::new(transport, fast_policy(10));
        let job = runner.run(&json!({ "prompt": "hi" })).await.unwrap();
        assert_eq!(
            job,
            CompletedJob {
                job_id: "job-1".to_owned(),
                outputs: vec!["https://example.com/1.png".to_owned()],
            }
        );
        assert_eq!(runner.transport().poll_count(), 3);
        assert_eq!(
            *runner.transport().submitted.lock().unwrap(),
            vec![json!({ "prompt": "hi" })]
        );
    }

    #[tokio::test]
    async fn submission_http_500_fails_without_polling() {
        let transport = ScriptedTransport::new(
            HttpReply::new(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            vec![completed("https://example.com/1.png")],
        );
        let runner = JobRunner::new(transport, fast_policy(10));
        let err = runner.run(&json!({})).await.unwrap_err();
        assert!(err.to_string().contains("500"), "{err:#}");
        assert_eq!(runner.transport().poll_count(), 0);
    }

    #[tokio::test]
    async fn poll_http_error_is_not_retried() {
        let transport = ScriptedTransport::new(
            submitted("job-2"),
            vec![
                status("processing"),
                HttpReply::new(StatusCode::BAD_GATEWAY, "upstream"),
                completed("https://example.com/1.png"),
            ],
        );
        let runner = JobRunner::new(transport, fast_policy(10));
        let err = runner.run(&json!({})).await.unwrap_err();
        assert!(err.to_string().contains("502"), "{err:#}");
        assert_eq!(runner.transport().poll_count(), 2);
    }

    #[tokio::test]
    async fn failed_job_reports_provider_reason() {
        let transport = ScriptedTransport::new(
            submitted("job-3"),
            vec![HttpReply::new(
                StatusCode::OK,
                json!({ "data": { "status": "failed", "error": "NSFW content" } })
                    .to_string(),
            )],
        );
        let runner = JobRunner::new(transport, fast_policy(10));
        let err = runner.run(&json!({})).await.unwrap_err();
        assert!(err.to_string().contains("NSFW content"), "{err:#}");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let transport = ScriptedTransport::new(
            submitted("job-4"),
            vec![status("processing"), status("processing"), status("processing")],
        );
        let runner = JobRunner::new(transport, fast_policy(2));
        let err = runner.run(&json!({})).await.unwrap_err();
        assert!(err.to_string().contains("did not finish"), "{err:#}");
        assert_eq!(runner.transport().poll_count(), 2);
    }

    #[tokio::test]
    async fn transport_errors_propagate_as_errors() {
        let runner = JobRunner::new(
            ScriptedTransport::with_transport_error("connection refused"),
            fast_policy(2),
        );
        let err = runner.run(&json!({})).await.unwrap_err();
        assert!(format!("{err:#}").contains("connection refused"));
    }

    #[test]
    fn classifies_custom_terminal_states() {
        let policy = PollPolicy {
            completed_statuses: vec!["succeeded".to_owned()],
            failed_statuses: vec!["failed".to_owned(), "canceled".to_owned()],
            ..PollPolicy::default()
        };
        assert_eq!(
            policy
                .classify(&json!({ "status": "succeeded", "outputs": ["u"] }))
                .unwrap(),
            JobState::Completed(vec!["u".to_owned()])
        );
        assert_eq!(
            policy.classify(&json!({ "status": "canceled" })).unwrap(),
            JobState::Failed("job status \"canceled\"".to_owned())
        );
        assert_eq!(
            policy.classify(&json!({ "status": "completed" })).unwrap(),
            JobState::Processing("completed".to_owned())
        );
        assert!(policy.classify(&json!({})).is_err());
    }
}
