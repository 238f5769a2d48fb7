//! Writing generated text and images to disk.
//!
//! Every save reports success as a plain `bool` and logs its own errors, so
//! that a text file can be saved even if the image can't be (and the other
//! way around). The caller turns that into `partial_success`.

use std::io::Cursor;

use image::ImageFormat;
use tokio::fs;

use crate::{drivers::GeneratedImage, prelude::*};

/// Paths for the artifacts of one (record, length) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Where to save the text.
    pub text: PathBuf,
    /// Where to save the image.
    pub image: PathBuf,
}

/// Saves text and images under a dataset directory.
#[derive(Clone, Debug)]
pub struct ArtifactWriter {
    /// The dataset directory.
    dir: PathBuf,

    /// Do file names include the requested length? Needed whenever we generate
    /// more than one length per record.
    suffix_length: bool,

    /// Used to download remote images.
    client: reqwest::Client,
}

impl ArtifactWriter {
    /// Create a new artifact writer.
    pub fn new(dir: PathBuf, suffix_length: bool, client: reqwest::Client) -> Self {
        Self {
            dir,
            suffix_length,
            client,
        }
    }

    /// Create our dataset directory if it doesn't exist.
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create directory {:?}", self.dir))?;
        info!("Using dataset directory {:?}", self.dir);
        Ok(())
    }

    /// Compute the paths for a record and requested length.
    pub fn paths(&self, rowid: i64, length: usize) -> ArtifactPaths {
        let stem = if self.suffix_length {
            format!("{rowid}_len{length}")
        } else {
            rowid.to_string()
        };
        ArtifactPaths {
            text: self.dir.join(format!("{stem}.txt")),
            image: self.dir.join(format!("{stem}.png")),
        }
    }

    /// Save `text` to `path`.
    pub async fn save_text(&self, text: &str, path: &Path) -> bool {
        let result = async {
            create_parent_dir(path).await?;
            fs::write(path, text)
                .await
                .with_context(|| format!("Failed to write {:?}", path))
        }
        .await;
        match result {
            Ok(()) => {
                info!("Text saved to {:?}", path);
                true
            }
            Err(err) => {
                error!("Failed to save text: {err:#}");
                false
            }
        }
    }

    /// Save an image to `path` as a PNG, downloading it first if needed.
    pub async fn save_image(&self, image: &GeneratedImage, path: &Path) -> bool {
        let result = async {
            let png = match image {
                GeneratedImage::Inline { mime_type, data } => {
                    to_png(data.clone(), Some(mime_type))?
                }
                GeneratedImage::Remote { url, .. } => to_png(self.download(url).await?, None)?,
            };
            create_parent_dir(path).await?;
            fs::write(path, png)
                .await
                .with_context(|| format!("Failed to write {:?}", path))
        }
        .await;
        match result {
            Ok(()) => {
                info!("Image saved to {:?}", path);
                true
            }
            Err(err) => {
                error!("Failed to save image: {err:#}");
                false
            }
        }
    }

    /// Download an image.
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {url}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Downloading {url} failed with HTTP {status}"));
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read image from {url}"))?;
        Ok(bytes.to_vec())
    }
}

/// Make sure the parent directory of `path` exists.
async fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    Ok(())
}

/// Convert image data to PNG. PNG data is passed through untouched.
///
/// We trust the data over the provider's `declared` MIME type, and only fall
/// back to the declared type when the data can't be identified.
fn to_png(data: Vec<u8>, declared: Option<&str>) -> Result<Vec<u8>> {
    let sniffed = infer::get(&data).map(|kind| kind.mime_type());
    if let Some(declared) = declared.filter(|&declared| sniffed != Some(declared)) {
        warn!(
            declared,
            sniffed = sniffed.unwrap_or("unknown"),
            "Image data does not match its declared MIME type"
        );
    }
    if sniffed == Some("image/png") {
        return Ok(data);
    }

    debug!(
        mime_type = sniffed.or(declared).unwrap_or("unknown"),
        "Converting image to PNG"
    );
    let fallback_format = match sniffed {
        Some(_) => None,
        None => declared.and_then(ImageFormat::from_mime_type),
    };
    let decoded = match fallback_format {
        Some(format) => image::load_from_memory_with_format(&data, format),
        None => image::load_from_memory(&data),
    }
    .context("Failed to decode image")?;
    let mut png = Cursor::new(vec![]);
    decoded
        .write_to(&mut png, ImageFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(png.into_inner())
}
