//! The generation pipeline: records in, prompts out, images and logs on disk.
//!
//! This runs strictly one unit at a time. A "unit" is one (record, requested
//! length) pair.

use std::{collections::BTreeMap, fmt, time::Duration};

use futures::{Stream as _, StreamExt as _};

use crate::{
    artifacts::ArtifactWriter,
    async_utils::BoxedStream,
    drivers::{Driver, Generation, generate_or_fail},
    prelude::*,
    prompt::{PromptTemplates, build_prompt, prepare_text},
    records::Record,
    run_log::{GenerationResult, GenerationStatus, RunLog},
    ui::{ProgressConfig, Ui},
};

/// How many text lengths to generate per record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// One image per record.
    Single(usize),
    /// One image per record and length, named with a `_len{n}` suffix.
    Sweep(Vec<usize>),
}

impl RunMode {
    /// The lengths to generate for each record.
    pub fn lengths(&self) -> &[usize] {
        match self {
            RunMode::Single(length) => std::slice::from_ref(length),
            RunMode::Sweep(lengths) => lengths,
        }
    }

    /// Should artifact names include the length?
    pub fn suffix_length(&self) -> bool {
        matches!(self, RunMode::Sweep(_))
    }
}

/// Everything the pipeline needs to know besides its inputs.
#[derive(Debug)]
pub struct Pipeline {
    /// The model name to record in the log.
    pub model: String,
    /// Our prompt templates.
    pub templates: PromptTemplates,
    /// Which template to use.
    pub prompt_id: usize,
    /// Which lengths to generate.
    pub mode: RunMode,
    /// Where to write artifacts.
    pub artifacts: ArtifactWriter,
    /// Where to log results.
    pub run_log: RunLog,
    /// How long to wait after each unit.
    pub delay: Duration,
    /// Skip units that already succeeded in an earlier run.
    pub resume: bool,
}

/// What happened during a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// How many units we processed in this run.
    pub processed: usize,
    /// How many units we skipped because an earlier run finished them.
    pub skipped: usize,
    /// Results in the final log, by status.
    pub counts: BTreeMap<GenerationStatus, usize>,
    /// Where we wrote the final log.
    pub log_path: PathBuf,
}

impl RunSummary {
    fn count(&self, status: GenerationStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {} items ({} succeeded, {} partially succeeded, {} failed",
            self.processed,
            self.count(GenerationStatus::Success),
            self.count(GenerationStatus::PartialSuccess),
            self.count(GenerationStatus::Failed),
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        write!(f, "). Log saved to {:?}", self.log_path)
    }
}

impl Pipeline {
    /// Process every record in `records`.
    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    pub async fn run(
        mut self,
        ui: &Ui,
        driver: &dyn Driver,
        mut records: BoxedStream<Result<Record>>,
    ) -> Result<RunSummary> {
        self.artifacts.ensure_dir().await?;
        let mut finished = self.run_log.start(self.resume).await?;

        let pb = ui.new_from_size_hint(
            &ProgressConfig {
                emoji: "🖨️",
                msg: "Generating images",
                done_msg: "Generated images",
            },
            records.size_hint(),
        );

        let mut summary = RunSummary::default();
        while let Some(record) = records.next().await {
            let record = record?;
            for &length in self.mode.lengths() {
                if let Some(earlier) = finished.remove(&(record.rowid, length)) {
                    debug!(rowid = record.rowid, length, "Already generated, skipping");
                    self.run_log.carry_over(earlier);
                    summary.skipped += 1;
                    continue;
                }
                let result = self.process_unit(driver, &record, length).await;
                self.run_log.record(result).await?;
                summary.processed += 1;
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
            }
            pb.inc(1);
        }
        pb.finish_using_style();

        self.run_log.finish().await?;
        summary.counts = self.run_log.counts();
        summary.log_path = self.run_log.final_path().to_owned();
        Ok(summary)
    }

    /// Generate and save one unit. This never fails; problems are recorded in
    /// the returned result.
    #[instrument(level = "debug", skip_all, fields(rowid = record.rowid, length = length))]
    async fn process_unit(
        &self,
        driver: &dyn Driver,
        record: &Record,
        length: usize,
    ) -> GenerationResult {
        let text = prepare_text(&record.text, length);
        let prompt = build_prompt(self.templates.select(self.prompt_id), text);
        info!(
            rowid = record.rowid,
            chars = text.chars().count(),
            "Processing record"
        );

        let mut result = GenerationResult::new(
            record.rowid,
            length,
            text,
            &prompt,
            &self.model,
            self.prompt_id,
        );
        match generate_or_fail(driver, text, &prompt).await {
            Generation::Image(image) => {
                result.image_url = image.url().map(str::to_owned);
                result.job_id = image.job_id().map(str::to_owned);
                let paths = self.artifacts.paths(record.rowid, length);
                let text_saved = self.artifacts.save_text(text, &paths.text).await;
                let image_saved = self.artifacts.save_image(&image, &paths.image).await;
                result.mark_saved(
                    text_saved.then_some(paths.text),
                    image_saved.then_some(paths.image),
                );
            }
            Generation::Failed(cause) => result.mark_failed(cause),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::stream;

    use super::*;
    use crate::{
        async_utils::io::read_json,
        drivers::{GeneratedImage, ImageSize, blank::BlankDriver},
        run_log::FINAL_LOG_NAME,
    };

    /// Fails for prompts containing "fail", and renders blank pages otherwise.
    #[derive(Debug)]
    struct ScriptedDriver {
        blank: BlankDriver,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedDriver {
        fn new() -> Self {
            Self {
                blank: BlankDriver::new(ImageSize {
                    width: 8,
                    height: 8,
                }),
                prompts: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl Driver for ScriptedDriver {
        async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage> {
            self.prompts.lock().unwrap().push(prompt.to_owned());
            if prompt.contains("fail") {
                Err(anyhow!("HTTP 500"))
            } else {
                self.blank.generate_image(prompt).await
            }
        }
    }

    fn records(texts: &[(i64, &str)]) -> BoxedStream<Result<Record>> {
        let records = texts
            .iter()
            .map(|&(rowid, text)| {
                Ok(Record {
                    rowid,
                    text: text.to_owned(),
                })
            })
            .collect::<Vec<_>>();
        stream::iter(records).boxed()
    }

    fn pipeline(dir: &Path, mode: RunMode, resume: bool) -> Pipeline {
        Pipeline {
            model: "blank".to_owned(),
            templates: PromptTemplates::default(),
            prompt_id: 0,
            artifacts: ArtifactWriter::new(
                dir.to_owned(),
                mode.suffix_length(),
                reqwest::Client::new(),
            ),
            mode,
            run_log: RunLog::new(dir),
            delay: Duration::ZERO,
            resume,
        }
    }

    #[tokio::test]
    async fn two_records_give_two_ordered_terminal_entries() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Ui::init_for_tests();
        let driver = ScriptedDriver::new();
        let summary = pipeline(dir.path(), RunMode::Single(10), false)
            .run(&ui, &driver, records(&[(2, "second text"), (1, "first text")]))
            .await
            .unwrap();
        assert_eq!(summary.processed, 2);

        let log: Vec<GenerationResult> =
            read_json(&dir.path().join(FINAL_LOG_NAME)).await.unwrap();
        assert_eq!(log.iter().map(|r| r.rowid).collect::<Vec<_>>(), vec![2, 1]);
        for result in &log {
            assert_eq!(result.status, GenerationStatus::Success);
            assert!(result.local_image_path.as_ref().unwrap().exists());
        }
        assert_eq!(log[0].text, "second");
        assert!(log[0].prompt.ends_with(" second"));
        assert!(dir.path().join("2.txt").exists());
        assert!(dir.path().join("1.png").exists());
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Ui::init_for_tests();
        let driver = ScriptedDriver::new();
        let summary = pipeline(dir.path(), RunMode::Single(100), false)
            .run(
                &ui,
                &driver,
                records(&[(1, "ok"), (2, "please fail"), (3, "ok again")]),
            )
            .await
            .unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.counts.get(&GenerationStatus::Failed), Some(&1));
        assert_eq!(summary.counts.get(&GenerationStatus::Success), Some(&2));

        let log: Vec<GenerationResult> =
            read_json(&dir.path().join(FINAL_LOG_NAME)).await.unwrap();
        assert_eq!(log[1].status, GenerationStatus::Failed);
        assert!(log[1].error.as_deref().unwrap().contains("HTTP 500"));
        assert!(!dir.path().join("2.png").exists());
    }

    #[tokio::test]
    async fn sweep_mode_generates_every_length() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Ui::init_for_tests();
        let driver = ScriptedDriver::new();
        let text = "one two three four five six seven eight nine ten eleven twelve";
        pipeline(dir.path(), RunMode::Sweep(vec![20, 50, 80]), false)
            .run(&ui, &driver, records(&[(5, text)]))
            .await
            .unwrap();

        let log: Vec<GenerationResult> =
            read_json(&dir.path().join(FINAL_LOG_NAME)).await.unwrap();
        assert_eq!(
            log.iter().map(|r| r.text_length).collect::<Vec<_>>(),
            vec![20, 50, 80]
        );
        assert!(log[0].text.chars().count() <= 20);
        assert_eq!(log[2].text, text);
        for length in [20, 50, 80] {
            assert!(dir.path().join(format!("5_len{length}.png")).exists());
        }
    }

    #[tokio::test]
    async fn resume_only_retries_unfinished_units() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Ui::init_for_tests();

        let first = ScriptedDriver::new();
        pipeline(dir.path(), RunMode::Single(100), false)
            .run(&ui, &first, records(&[(1, "ok"), (2, "please fail")]))
            .await
            .unwrap();

        let second = ScriptedDriver::new();
        let summary = pipeline(dir.path(), RunMode::Single(100), true)
            .run(&ui, &second, records(&[(1, "ok"), (2, "no problem now")]))
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 1);
        assert_eq!(second.prompts.lock().unwrap().len(), 1);

        let log: Vec<GenerationResult> =
            read_json(&dir.path().join(FINAL_LOG_NAME)).await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|r| r.status == GenerationStatus::Success));
    }

    #[tokio::test]
    async fn resumed_log_keeps_source_order() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Ui::init_for_tests();

        pipeline(dir.path(), RunMode::Single(100), false)
            .run(
                &ui,
                &ScriptedDriver::new(),
                records(&[(1, "please fail"), (2, "ok")]),
            )
            .await
            .unwrap();

        let summary = pipeline(dir.path(), RunMode::Single(100), true)
            .run(
                &ui,
                &ScriptedDriver::new(),
                records(&[(1, "ok now"), (2, "ok")]),
            )
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);

        let log: Vec<GenerationResult> =
            read_json(&dir.path().join(FINAL_LOG_NAME)).await.unwrap();
        assert_eq!(log.iter().map(|r| r.rowid).collect::<Vec<_>>(), vec![1, 2]);
        assert!(log.iter().all(|r| r.status == GenerationStatus::Success));
    }
}
