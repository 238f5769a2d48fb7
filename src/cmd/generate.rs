//! The `generate` subcommand.

use std::time::Duration;

use clap::Args;

use crate::{
    artifacts::ArtifactWriter,
    cmd::RecordOpts,
    config::ApiConfig,
    drivers::{DriverType, GenerationOpts},
    pipeline::{Pipeline, RunMode},
    prelude::*,
    prompt::PromptTemplates,
    run_log::RunLog,
    ui::Ui,
};

/// Generate command line arguments.
#[derive(Debug, Args)]
pub struct GenerateOpts {
    /// The image model to use.
    #[clap(long, value_enum, default_value_t = DriverType::Imagen)]
    pub model: DriverType,

    /// How many characters of each record to render.
    #[clap(long, default_value = "1000")]
    pub content_length: usize,

    /// Render each record at several lengths, as a comma-separated list
    /// (e.g. "20,50,80"). Output files get a `_len{N}` suffix.
    #[clap(long, value_delimiter = ',', num_args = 1.., conflicts_with = "content_length")]
    pub lengths: Option<Vec<usize>>,

    /// Which prompt template to use.
    #[clap(long, default_value = "0")]
    pub prompt_id: usize,

    /// A TOML file with a `templates` array, replacing the built-in prompt
    /// templates.
    #[clap(long)]
    pub prompts: Option<PathBuf>,

    #[clap(flatten)]
    pub records: RecordOpts,

    /// Where to write text, images and logs.
    #[clap(long, default_value = "dataset")]
    pub dataset_dir: PathBuf,

    /// How long to wait after each request, in milliseconds.
    #[clap(long, default_value = "1000")]
    pub delay_ms: u64,

    #[clap(flatten)]
    pub generation: GenerationOpts,

    /// Skip items that already succeeded, according to the journal in
    /// `--dataset-dir`.
    #[clap(long)]
    pub resume: bool,
}

impl GenerateOpts {
    /// Which lengths should we generate?
    pub fn run_mode(&self) -> Result<RunMode> {
        match &self.lengths {
            Some(lengths) if lengths.is_empty() => Err(anyhow!("--lengths must not be empty")),
            Some(lengths) if lengths.contains(&0) => {
                Err(anyhow!("--lengths must all be positive"))
            }
            Some(lengths) => Ok(RunMode::Sweep(lengths.clone())),
            None if self.content_length == 0 => {
                Err(anyhow!("--content-length must be positive"))
            }
            None => Ok(RunMode::Single(self.content_length)),
        }
    }
}

/// The `generate` subcommand.
#[instrument(level = "debug", skip_all, fields(model = %opts.model))]
pub async fn cmd_generate(ui: Ui, opts: &GenerateOpts) -> Result<()> {
    let mode = opts.run_mode()?;
    let config = ApiConfig::from_env(opts.generation.request_timeout());
    let driver = opts.model.create_driver(&config, &opts.generation)?;
    let templates = PromptTemplates::load(opts.prompts.as_deref()).await?;

    let source = opts.records.to_source();
    let records = source.read_stream().await?;

    let pipeline = Pipeline {
        model: opts.model.model_name().to_owned(),
        templates,
        prompt_id: opts.prompt_id,
        artifacts: ArtifactWriter::new(
            opts.dataset_dir.clone(),
            mode.suffix_length(),
            config.http_client()?,
        ),
        mode,
        run_log: RunLog::new(&opts.dataset_dir),
        delay: Duration::from_millis(opts.delay_ms),
        resume: opts.resume,
    };
    let summary = pipeline.run(&ui, driver.as_ref(), records).await?;
    ui.display_message("✅", &summary.to_string());
    Ok(())
}
