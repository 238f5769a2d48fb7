//! The generation log: one [`GenerationResult`] per processed (record,
//! length) pair.
//!
//! We keep three files in the dataset directory:
//!
//! - `generation_log_temp.json`, rewritten after every unit, so that a crash
//!   loses at most one result.
//! - `generation_log.json`, written once at the end of a run.
//! - `generation_log.jsonl`, an append-only journal used by `--resume`.

use std::collections::{BTreeMap, HashMap};

use schemars::JsonSchema;

use crate::{async_utils::io, prelude::*};

/// Checkpoint file, rewritten after every unit.
pub const TEMP_LOG_NAME: &str = "generation_log_temp.json";

/// Final log file.
pub const FINAL_LOG_NAME: &str = "generation_log.json";

/// Append-only journal.
pub const JOURNAL_NAME: &str = "generation_log.jsonl";

/// Where a unit of work stands.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// Not finished yet. Never written once a unit is done.
    Pending,
    /// We saved both the text and the image.
    Success,
    /// We got an image, but couldn't save one of the artifacts.
    PartialSuccess,
    /// No image was generated.
    Failed,
}

impl GenerationStatus {
    /// Does this status mean we can skip the unit when resuming?
    pub fn is_done(self) -> bool {
        matches!(self, GenerationStatus::Success | GenerationStatus::PartialSuccess)
    }
}

/// The result of one generation attempt.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct GenerationResult {
    /// The source record's ID.
    pub rowid: i64,

    /// The requested text length, in characters. The actual text may be
    /// shorter.
    pub text_length: usize,

    /// The truncated text we asked the model to render.
    pub text: String,

    /// The full prompt sent to the model.
    pub prompt: String,

    /// The model we used.
    pub model: String,

    /// The prompt template we used.
    pub prompt_id: usize,

    /// Where this unit stands.
    pub status: GenerationStatus,

    /// The URL of the generated image, for providers that return one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// The provider's job ID, for job-based providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// Where we saved the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_text_path: Option<PathBuf>,

    /// Where we saved the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_image_path: Option<PathBuf>,

    /// Why generation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Identifies a unit of work across runs.
pub type UnitKey = (i64, usize);

impl GenerationResult {
    /// Create a new, pending result.
    pub fn new(
        rowid: i64,
        text_length: usize,
        text: &str,
        prompt: &str,
        model: &str,
        prompt_id: usize,
    ) -> Self {
        Self {
            rowid,
            text_length,
            text: text.to_owned(),
            prompt: prompt.to_owned(),
            model: model.to_owned(),
            prompt_id,
            status: GenerationStatus::Pending,
            image_url: None,
            job_id: None,
            local_text_path: None,
            local_image_path: None,
            error: None,
        }
    }

    /// The key used to match this result against earlier runs.
    pub fn key(&self) -> UnitKey {
        (self.rowid, self.text_length)
    }

    /// Mark this result as failed.
    pub fn mark_failed(&mut self, cause: impl Into<String>) {
        self.status = GenerationStatus::Failed;
        self.error = Some(cause.into());
    }

    /// Record which artifacts we managed to save, and set our final status.
    /// If we saved neither, the unit failed.
    pub fn mark_saved(&mut self, text_path: Option<PathBuf>, image_path: Option<PathBuf>) {
        self.status = match (&text_path, &image_path) {
            (Some(_), Some(_)) => GenerationStatus::Success,
            (None, None) => {
                self.error = Some("Failed to save text and image".to_owned());
                GenerationStatus::Failed
            }
            _ => GenerationStatus::PartialSuccess,
        };
        self.local_text_path = text_path;
        self.local_image_path = image_path;
    }
}

/// An ordered, checkpointed accumulator of results.
#[derive(Debug)]
pub struct RunLog {
    temp_path: PathBuf,
    final_path: PathBuf,
    journal_path: PathBuf,
    results: Vec<GenerationResult>,
}

impl RunLog {
    /// Create a run log stored in `dir`. Nothing is written until
    /// [`RunLog::start`].
    pub fn new(dir: &Path) -> Self {
        Self {
            temp_path: dir.join(TEMP_LOG_NAME),
            final_path: dir.join(FINAL_LOG_NAME),
            journal_path: dir.join(JOURNAL_NAME),
            results: vec![],
        }
    }

    /// Path to the final log.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Get ready to record results.
    ///
    /// Without `resume`, this truncates the journal. With `resume`, we return
    /// the finished units from the journal, so that the caller can skip them
    /// and add them back with [`RunLog::carry_over`] in source order.
    #[instrument(level = "debug", skip(self))]
    pub async fn start(&mut self, resume: bool) -> Result<HashMap<UnitKey, GenerationResult>> {
        self.results.clear();
        if !resume || !tokio::fs::try_exists(&self.journal_path).await.unwrap_or(false) {
            tokio::fs::write(&self.journal_path, "")
                .await
                .with_context(|| format!("Failed to truncate {:?}", self.journal_path))?;
            return Ok(HashMap::new());
        }

        // Later entries replace earlier ones.
        let entries = io::read_jsonl::<GenerationResult>(&self.journal_path).await?;
        let mut latest = HashMap::new();
        for entry in entries {
            latest.insert(entry.key(), entry);
        }
        latest.retain(|_, entry| entry.status.is_done());
        info!(
            finished = latest.len(),
            "Resuming from {:?}", self.journal_path
        );
        Ok(latest)
    }

    /// Add a result finished by an earlier run. It is already in the
    /// journal, so we only keep it in memory.
    pub fn carry_over(&mut self, result: GenerationResult) {
        self.results.push(result);
    }

    /// Record a finished result, and checkpoint to disk.
    pub async fn record(&mut self, result: GenerationResult) -> Result<()> {
        io::append_jsonl(&self.journal_path, &result).await?;
        self.results.push(result);
        io::write_json_pretty(&self.temp_path, &self.results).await?;
        debug!(count = self.results.len(), "Checkpointed {:?}", self.temp_path);
        Ok(())
    }

    /// Write our final log.
    pub async fn finish(&self) -> Result<()> {
        io::write_json_pretty(&self.final_path, &self.results).await?;
        info!("Generation log saved to {:?}", self.final_path);
        Ok(())
    }

    /// All results so far, in order.
    #[cfg(test)]
    pub fn results(&self) -> &[GenerationResult] {
        &self.results
    }

    /// Count results by status.
    pub fn counts(&self) -> BTreeMap<GenerationStatus, usize> {
        let mut counts = BTreeMap::new();
        for result in &self.results {
            *counts.entry(result.status).or_default() += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(rowid: i64, text_length: usize, status: GenerationStatus) -> GenerationResult {
        let mut result = GenerationResult::new(rowid, text_length, "text", "prompt text", "blank", 0);
        result.status = status;
        result
    }

    #[test]
    fn serializes_with_log_keys() {
        let mut result = GenerationResult::new(7, 1000, "hello", "Generate: hello", "hidream", 2);
        result.image_url = Some("https://cdn.example.com/7.png".to_owned());
        result.job_id = Some("job-7".to_owned());
        result.mark_saved(Some(PathBuf::from("dataset/7.txt")), None);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "rowid": 7,
                "text_length": 1000,
                "text": "hello",
                "prompt": "Generate: hello",
                "model": "hidream",
                "prompt_id": 2,
                "status": "partial_success",
                "image_url": "https://cdn.example.com/7.png",
                "job_id": "job-7",
                "local_text_path": "dataset/7.txt",
            })
        );
    }

    #[test]
    fn status_transitions() {
        let mut saved = result(1, 10, GenerationStatus::Pending);
        saved.mark_saved(Some(PathBuf::from("a.txt")), Some(PathBuf::from("a.png")));
        assert_eq!(saved.status, GenerationStatus::Success);

        let mut failed = result(1, 10, GenerationStatus::Pending);
        failed.mark_failed("HTTP 500");
        assert_eq!(failed.status, GenerationStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("HTTP 500"));

        let mut unsaved = result(1, 10, GenerationStatus::Pending);
        unsaved.mark_saved(None, None);
        assert_eq!(unsaved.status, GenerationStatus::Failed);
        assert!(unsaved.error.is_some());
    }

    #[tokio::test]
    async fn checkpoints_after_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new(dir.path());
        assert!(log.start(false).await.unwrap().is_empty());

        log.record(result(1, 10, GenerationStatus::Success)).await.unwrap();
        let temp: Vec<GenerationResult> =
            io::read_json(&dir.path().join(TEMP_LOG_NAME)).await.unwrap();
        assert_eq!(temp.len(), 1);

        log.record(result(2, 10, GenerationStatus::Failed)).await.unwrap();
        let temp: Vec<GenerationResult> =
            io::read_json(&dir.path().join(TEMP_LOG_NAME)).await.unwrap();
        assert_eq!(temp.iter().map(|r| r.rowid).collect::<Vec<_>>(), vec![1, 2]);
        assert!(!dir.path().join(FINAL_LOG_NAME).exists());

        log.finish().await.unwrap();
        let last: Vec<GenerationResult> = io::read_json(log.final_path()).await.unwrap();
        assert_eq!(last, temp);

        let journal: Vec<GenerationResult> =
            io::read_jsonl(&dir.path().join(JOURNAL_NAME)).await.unwrap();
        assert_eq!(journal, temp);

        let counts = log.counts();
        assert_eq!(counts.get(&GenerationStatus::Success), Some(&1));
        assert_eq!(counts.get(&GenerationStatus::Failed), Some(&1));
        assert_eq!(counts.get(&GenerationStatus::PartialSuccess), None);
    }

    #[tokio::test]
    async fn empty_run_writes_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new(dir.path());
        log.start(false).await.unwrap();
        log.finish().await.unwrap();
        let results: Vec<GenerationResult> = io::read_json(log.final_path()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn resume_skips_finished_units_and_last_entry_wins() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join(JOURNAL_NAME);
        for entry in [
            result(1, 10, GenerationStatus::Success),
            result(2, 10, GenerationStatus::Failed),
            result(3, 10, GenerationStatus::Success),
            result(3, 10, GenerationStatus::Failed),
            result(2, 10, GenerationStatus::PartialSuccess),
            result(1, 20, GenerationStatus::Failed),
        ] {
            io::append_jsonl(&journal, &entry).await.unwrap();
        }

        let mut log = RunLog::new(dir.path());
        let done = log.start(true).await.unwrap();
        let mut keys = done.keys().copied().collect::<Vec<_>>();
        keys.sort();
        assert_eq!(keys, vec![(1, 10), (2, 10)]);
        assert_eq!(done[&(2, 10)].status, GenerationStatus::PartialSuccess);

        // Nothing is carried over until the caller asks.
        assert!(log.results().is_empty());
        log.carry_over(done[&(2, 10)].clone());
        assert_eq!(log.results().len(), 1);
    }

    #[tokio::test]
    async fn without_resume_the_journal_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join(JOURNAL_NAME);
        io::append_jsonl(&journal, &result(1, 10, GenerationStatus::Success))
            .await
            .unwrap();

        let mut log = RunLog::new(dir.path());
        assert!(log.start(false).await.unwrap().is_empty());
        assert!(io::read_jsonl::<GenerationResult>(&journal).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_without_journal_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new(dir.path());
        assert!(log.start(true).await.unwrap().is_empty());
        assert!(dir.path().join(JOURNAL_NAME).exists());
    }
}
