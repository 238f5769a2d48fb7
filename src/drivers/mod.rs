//! Image generation drivers.
//!
//! Each driver talks to one provider. Some providers return image data in
//! the response (see [`google`]), and some hand us a job ID that we need to
//! poll until the image is ready (see [`wavespeed`] and [`jobs`]). The
//! [`blank`] driver never touches the network, and is used for dry runs and
//! tests.

use std::{fmt, str::FromStr, time::Duration};

use clap::{Args, ValueEnum};

use crate::{config::ApiConfig, prelude::*};

pub mod blank;
pub mod google;
pub mod jobs;
pub mod wavespeed;

/// The image models we know how to call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum DriverType {
    /// Google Imagen 3, via the Generative Language API.
    #[default]
    Imagen,

    /// Gemini 2.0 Flash image generation, via the Generative Language API.
    Gemini,

    /// HiDream I1 (full), via WaveSpeed's job API.
    Hidream,

    /// Render blank pages locally, without calling any API.
    Blank,
}

impl DriverType {
    /// The name we use for this model in logs and file names.
    pub fn model_name(self) -> &'static str {
        match self {
            DriverType::Imagen => "imagen",
            DriverType::Gemini => "gemini",
            DriverType::Hidream => "hidream",
            DriverType::Blank => "blank",
        }
    }

    /// Instantiate an appropriate driver.
    pub fn create_driver(
        self,
        config: &ApiConfig,
        opts: &GenerationOpts,
    ) -> Result<Box<dyn Driver>> {
        match self {
            DriverType::Imagen => Ok(Box::new(google::GoogleDriver::new(
                google::GoogleModel::Imagen,
                config,
            )?)),
            DriverType::Gemini => Ok(Box::new(google::GoogleDriver::new(
                google::GoogleModel::Gemini,
                config,
            )?)),
            DriverType::Hidream => {
                Ok(Box::new(wavespeed::WaveSpeedDriver::new(config, opts)?))
            }
            DriverType::Blank => Ok(Box::new(blank::BlankDriver::new(opts.size))),
        }
    }
}

impl fmt::Display for DriverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_name())
    }
}

/// Options controlling image generation.
#[derive(Args, Clone, Debug)]
pub struct GenerationOpts {
    /// Image size to request, as "WIDTH*HEIGHT". Ignored by Google models.
    #[clap(long, default_value = "1024*1024")]
    pub size: ImageSize,

    /// Random seed to request. -1 lets the provider choose.
    #[clap(long, default_value = "-1", allow_hyphen_values = true)]
    pub seed: i64,

    /// How often to poll job-based providers for results, in milliseconds.
    #[clap(long, default_value = "2000")]
    pub poll_interval_ms: u64,

    /// Give up on a job after this many status checks.
    #[clap(long, default_value = "300")]
    pub max_poll_attempts: usize,

    /// A timeout, in seconds, for each individual HTTP request.
    #[clap(long)]
    pub timeout: Option<u64>,
}

impl GenerationOpts {
    /// The poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The HTTP request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

/// Width and height of a generated image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*{}", self.width, self.height)
    }
}

impl FromStr for ImageSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |s: &str| -> Result<_> {
            let (width, height) = s
                .split_once(['*', 'x'])
                .ok_or_else(|| anyhow!("Expected WIDTH*HEIGHT"))?;
            let width = width.trim().parse::<u32>()?;
            let height = height.trim().parse::<u32>()?;
            if width == 0 || height == 0 {
                return Err(anyhow!("Image dimensions must be positive"));
            }
            Ok(Self { width, height })
        };
        parse(s).with_context(|| format!("Failed to parse image size: {:?}", s))
    }
}

/// An image returned by a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeneratedImage {
    /// Image bytes returned directly in the response.
    Inline {
        /// The MIME type reported by the provider.
        mime_type: String,
        /// The decoded image data.
        data: Vec<u8>,
    },

    /// An image we still need to download.
    Remote {
        /// Where to download the image.
        url: String,
        /// The provider's job ID, if it used one.
        job_id: Option<String>,
    },
}

impl GeneratedImage {
    /// The URL of a remote image.
    pub fn url(&self) -> Option<&str> {
        match self {
            GeneratedImage::Remote { url, .. } => Some(url),
            GeneratedImage::Inline { .. } => None,
        }
    }

    /// The provider's job ID, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            GeneratedImage::Remote { job_id, .. } => job_id.as_deref(),
            GeneratedImage::Inline { .. } => None,
        }
    }
}

/// Interface trait for image generation drivers.
#[async_trait]
pub trait Driver: fmt::Debug + Send + Sync + 'static {
    /// Generate a single image for `prompt`.
    ///
    /// Drivers report every kind of failure as an error, including HTTP
    /// errors and provider-side job failures. Callers should normally go
    /// through [`generate_or_fail`] instead.
    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage>;
}

/// The outcome of asking a driver for an image.
#[derive(Debug)]
pub enum Generation {
    /// We got an image.
    Image(GeneratedImage),
    /// We didn't, and here's why.
    Failed(String),
}

/// Generate an image, converting any error into [`Generation::Failed`].
///
/// A single bad record must never abort a run, so nothing escapes from here.
#[instrument(level = "debug", skip_all, fields(text_length = text.chars().count()))]
pub async fn generate_or_fail(driver: &dyn Driver, text: &str, prompt: &str) -> Generation {
    let started = std::time::Instant::now();
    info!("Generating image");
    match driver.generate_image(prompt).await {
        Ok(image) => {
            info!(
                elapsed_secs = format!("{:.2}", started.elapsed().as_secs_f64()),
                "Image generated"
            );
            Generation::Image(image)
        }
        Err(err) => {
            let cause = format!("{err:#}");
            error!(%cause, "Image generation failed");
            Generation::Failed(cause)
        }
    }
}

/// Turn a non-2xx HTTP response into an error that includes the body.
pub(crate) fn http_status_error(
    what: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> anyhow::Error {
    anyhow!("{what} failed with HTTP {status}: {}", body.trim())
}
