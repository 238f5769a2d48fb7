//! The `plot` subcommand.

use clap::Args;

use crate::{
    plot::{DEFAULT_METRIC, ResultTable, list_result_files, metric_label},
    prelude::*,
    ui::Ui,
};

/// Plot command line arguments.
#[derive(Debug, Args)]
pub struct PlotOpts {
    /// Result files to plot. Defaults to every `*.json` file in
    /// `--result-dir`.
    #[clap(long, num_args = 1..)]
    pub input_files: Option<Vec<PathBuf>>,

    /// Where to save the chart. With several models, the model name is added
    /// before the extension.
    #[clap(long)]
    pub output: Option<PathBuf>,

    /// Only plot results for this model.
    #[clap(long)]
    pub model: Option<String>,

    /// Directory containing result files, and where charts go by default.
    #[clap(long, default_value = "result")]
    pub result_dir: PathBuf,

    /// JSON pointer to the metric to plot.
    #[clap(long, default_value = DEFAULT_METRIC)]
    pub metric: String,
}

/// The `plot` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_plot(ui: Ui, opts: &PlotOpts) -> Result<()> {
    let paths = match &opts.input_files {
        Some(paths) => paths.clone(),
        None => list_result_files(&opts.result_dir).await?,
    };

    let table = ResultTable::load(&paths, opts.model.as_deref(), &opts.metric).await;
    if table.is_empty() {
        ui.display_message("⚠️", "No results to plot");
        return Ok(());
    }

    let label = metric_label(&opts.metric);
    for path in table.render_charts(opts.output.as_deref(), &opts.result_dir, label)? {
        ui.display_message("📈", &format!("Saved plot to {}", path.display()));
    }
    print!("{}", table.to_text_table(label));
    Ok(())
}
