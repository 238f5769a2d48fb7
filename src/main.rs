use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod artifacts;
mod async_utils;
mod cmd;
mod config;
mod drivers;
mod pipeline;
mod plot;
mod prelude;
mod prompt;
mod records;
mod run_log;
mod toml_utils;
mod ui;

/// Build synthetic scanned-document datasets for OCR evaluation.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - GEMINI_API_KEY: Key for Imagen and Gemini. GOOGLE_API_KEY is used as a
    fallback.
  - GEMINI_API_BASE (optional): Override the Generative Language API URL.
  - WAVESPEED_API_KEY: Key for WaveSpeed models like HiDream.
  - WAVESPEED_API_BASE (optional): Override the WaveSpeed API URL.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Generate document images from source records.
    Generate(cmd::generate::GenerateOpts),
    /// Plot OCR evaluation results against context length.
    Plot(cmd::plot::PlotOpts),
    /// Print schemas for input and output formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Generate(_) => false,
            Cmd::Plot(_) => true,
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive = Directive::from_str("info").context("invalid default log directive")?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide the progress bar if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Generate(generate_opts) => {
            cmd::generate::cmd_generate(ui, generate_opts).await?;
        }
        Cmd::Plot(plot_opts) => {
            cmd::plot::cmd_plot(ui, plot_opts).await?;
        }
        Cmd::Schema(schema_opts) => {
            cmd::schema::cmd_schema(schema_opts).await?;
        }
    }
    Ok(())
}
