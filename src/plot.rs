//! Plotting OCR evaluation results against context length.
//!
//! Evaluation runs write one JSON file per (model, prompt, length), named
//! like `results_imagen_prompt0_1000.json` (or `results_imagen_1000.json`
//! for older runs without a prompt ID). We pull one metric out of each file
//! and draw one chart per model, with one line per prompt ID.

use std::{collections::BTreeMap, sync::LazyLock};

use plotters::prelude::{
    BLACK, ChartBuilder, Circle, Color as _, EmptyElement, IntoDrawingArea as _, IntoFont as _,
    LineSeries, PathElement, RGBColor, SVGBackend, Text, WHITE,
};
use regex::Regex;

use crate::{async_utils::io, prelude::*};

/// JSON pointer to the metric we plot by default.
pub const DEFAULT_METRIC: &str = "/aggregate_statistics/strict_sequence_similarity (Full)/mean";

/// Human-readable name of [`DEFAULT_METRIC`].
const DEFAULT_METRIC_LABEL: &str = "Strict Sequence Similarity (Full)";

/// Line colours, cycled per prompt ID.
const COLORS: &[RGBColor] = &[
    RGBColor(0x1f, 0x77, 0xb4),
    RGBColor(0xff, 0x7f, 0x0e),
    RGBColor(0x2c, 0xa0, 0x2c),
    RGBColor(0xd6, 0x27, 0x28),
    RGBColor(0x94, 0x67, 0xbd),
    RGBColor(0x8c, 0x56, 0x4b),
    RGBColor(0xe3, 0x77, 0xc2),
    RGBColor(0x7f, 0x7f, 0x7f),
    RGBColor(0xbc, 0xbd, 0x22),
    RGBColor(0x17, 0xbe, 0xcf),
];

/// Chart size in pixels.
const CHART_SIZE: (u32, u32) = (1200, 800);

static PROMPT_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"results_([a-z]+)_prompt(\d+)_(\d+)\.json").expect("failed to compile regex")
});

static LEGACY_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"results_([a-z]+)_(\d+)\.json").expect("failed to compile regex")
});

/// What we can learn from a result file's name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultFileInfo {
    pub model: String,
    pub prompt_id: Option<u32>,
    pub context_length: u64,
}

/// Parse a result file name. Returns `None` for names we don't recognize.
pub fn parse_result_filename(file_name: &str) -> Option<ResultFileInfo> {
    if let Some(caps) = PROMPT_FILENAME_RE.captures(file_name) {
        return Some(ResultFileInfo {
            model: caps[1].to_owned(),
            prompt_id: Some(caps[2].parse().ok()?),
            context_length: caps[3].parse().ok()?,
        });
    }
    let caps = LEGACY_FILENAME_RE.captures(file_name)?;
    Some(ResultFileInfo {
        model: caps[1].to_owned(),
        prompt_id: None,
        context_length: caps[2].parse().ok()?,
    })
}

/// Look up a numeric metric in a parsed result file.
pub fn extract_metric(results: &Value, pointer: &str) -> Result<f64> {
    results
        .pointer(pointer)
        .ok_or_else(|| anyhow!("No value at {pointer:?}"))?
        .as_f64()
        .ok_or_else(|| anyhow!("Value at {pointer:?} is not a number"))
}

/// A human-readable name for a metric pointer.
pub fn metric_label(pointer: &str) -> &str {
    if pointer == DEFAULT_METRIC {
        DEFAULT_METRIC_LABEL
    } else {
        pointer
    }
}

/// List all `*.json` files in `dir`, sorted by name.
pub async fn list_result_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read directory {:?}", dir))?;
    let mut paths = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("Failed to read directory {:?}", dir))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// (context length, metric) points for one line.
pub type Series = Vec<(u64, f64)>;

/// Metric values grouped by model, then prompt ID.
#[derive(Debug, Default)]
pub struct ResultTable {
    models: BTreeMap<String, BTreeMap<Option<u32>, Series>>,
}

impl ResultTable {
    /// Load metrics from `paths`. Files with unrecognized names or missing
    /// metrics are skipped with a warning.
    #[instrument(level = "debug", skip_all)]
    pub async fn load(paths: &[PathBuf], model_filter: Option<&str>, pointer: &str) -> Self {
        let mut table = ResultTable::default();
        for path in paths {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some(info) = parse_result_filename(&file_name) else {
                warn!("Skipping {file_name}: couldn't extract model and context length");
                continue;
            };
            if model_filter.is_some_and(|model| model != info.model) {
                continue;
            }
            let value = match io::read_json::<Value>(path).await {
                Ok(results) => extract_metric(&results, pointer),
                Err(err) => Err(err),
            };
            match value {
                Ok(value) => table.insert(info, value),
                Err(err) => warn!("Skipping {file_name}: {err:#}"),
            }
        }
        table
    }

    /// Add a single point, keeping each series sorted by context length.
    pub fn insert(&mut self, info: ResultFileInfo, value: f64) {
        let series = self
            .models
            .entry(info.model)
            .or_default()
            .entry(info.prompt_id)
            .or_default();
        let idx = series.partition_point(|&(len, _)| len <= info.context_length);
        series.insert(idx, (info.context_length, value));
    }

    /// Do we have any data at all?
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// The models we have data for.
    #[cfg(test)]
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Get the lines for `model`.
    #[cfg(test)]
    pub fn series(&self, model: &str) -> Option<&BTreeMap<Option<u32>, Series>> {
        self.models.get(model)
    }

    /// Where to save the chart for `model`.
    ///
    /// An explicit `output` is used as-is for a single model. With several
    /// models, we insert the model name before the extension so that charts
    /// don't overwrite each other.
    pub fn chart_path(&self, model: &str, output: Option<&Path>, result_dir: &Path) -> PathBuf {
        match output {
            Some(output) if self.models.len() > 1 => {
                let stem = output
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let file_name = match output.extension() {
                    Some(ext) => format!("{stem}_{model}.{}", ext.to_string_lossy()),
                    None => format!("{stem}_{model}"),
                };
                output.with_file_name(file_name)
            }
            Some(output) => output.to_owned(),
            None => result_dir.join(format!("sequence_similarity_{model}.svg")),
        }
    }

    /// Draw one SVG chart per model. Returns the paths we wrote.
    pub fn render_charts(
        &self,
        output: Option<&Path>,
        result_dir: &Path,
        label: &str,
    ) -> Result<Vec<PathBuf>> {
        let mut written = vec![];
        for (model, lines) in &self.models {
            let path = self.chart_path(model, output, result_dir);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
            render_chart(model, lines, label, &path)?;
            info!("Plot for {model} saved to {:?}", path);
            written.push(path);
        }
        Ok(written)
    }

    /// Format all our data as a flat text table.
    pub fn to_text_table(&self, label: &str) -> String {
        let mut lines = vec![
            format!("Model | Prompt ID | Context Length | {label}"),
            "-".repeat(65),
        ];
        for (model, by_prompt) in &self.models {
            for (prompt_id, series) in by_prompt {
                let prompt_id = prompt_id.map_or_else(|| "-".to_owned(), |id| id.to_string());
                lines.extend(series.iter().map(|(length, value)| {
                    format!("{model:10} | {prompt_id:>9} | {length:>14} | {value:.6}")
                }));
            }
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// Render a single chart to `path`, labelling every point with its value.
fn render_chart(
    model: &str,
    lines: &BTreeMap<Option<u32>, Series>,
    label: &str,
    path: &Path,
) -> Result<()> {
    let points = lines.values().flatten().copied().collect::<Vec<_>>();
    let (x_min, x_max) = padded_range(points.iter().map(|&(x, _)| x as f64));
    let (y_min, y_max) = padded_range(points.iter().map(|&(_, y)| y));

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)
        .with_context(|| format!("Failed to draw plot {:?}", path))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("{}: {label} vs Context Length", capitalize(model)),
            ("sans-serif", 24),
        )
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .with_context(|| format!("Failed to lay out plot {:?}", path))?;
    chart
        .configure_mesh()
        .x_desc("Context Length")
        .y_desc(label)
        .draw()
        .with_context(|| format!("Failed to draw axes for {:?}", path))?;

    for (idx, (prompt_id, series)) in lines.iter().enumerate() {
        let color = COLORS[idx % COLORS.len()];
        let name = match prompt_id {
            Some(id) => format!("Prompt ID {id}"),
            None => "No prompt ID".to_owned(),
        };
        chart
            .draw_series(LineSeries::new(
                series.iter().map(|&(x, y)| (x as f64, y)),
                color.stroke_width(2),
            ))
            .with_context(|| format!("Failed to draw {name} in {:?}", path))?
            .label(name.clone())
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2))
            });
        chart
            .draw_series(series.iter().map(|&(x, y)| {
                EmptyElement::at((x as f64, y))
                    + Circle::new((0, 0), 4, color.filled())
                    + Text::new(
                        format!("{y:.4}"),
                        (-18, -20),
                        ("sans-serif", 14).into_font().color(&color),
                    )
            }))
            .with_context(|| format!("Failed to label {name} in {:?}", path))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .with_context(|| format!("Failed to draw legend for {:?}", path))?;
    root.present()
        .with_context(|| format!("Failed to save plot to {:?}", path))
}

/// Compute a range covering `values`, with a little room on each side.
fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
        (min.min(v), max.max(v))
    });
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    let pad = if max > min {
        (max - min) * 0.1
    } else {
        (min.abs() * 0.1).max(0.01)
    };
    (min - pad, max + pad)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
