//! I/O utilities.
//!
//! This module is responsible for reading whole files, writing JSON documents
//! that get replaced wholesale (our run logs), and appending JSONL lines (our
//! journal). All paths end up in error messages, because "No such file or
//! directory" is useless without them.

use serde::de::DeserializeOwned;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWrite, AsyncWriteExt as _, BufWriter},
};

use crate::prelude::*;

/// Read a UTF-8 file into a string.
pub async fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))
}

/// Read a JSON file.
pub async fn read_json<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let data = read_to_string(path).await?;
    serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse JSON from file at path: {:?}", path))
}

/// Read a JSONL file, one value per non-blank line.
pub async fn read_jsonl<T>(path: &Path) -> Result<Vec<T>>
where
    T: DeserializeOwned,
{
    let data = read_to_string(path).await?;
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| {
                format!("Failed to parse JSON from line {} of {:?}", idx + 1, path)
            })
        })
        .collect()
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Replace the contents of `path` with pretty-printed JSON.
pub async fn write_json_pretty<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize JSON for {:?}", path))?;
    let mut writer = BufWriter::new(create_writer(Some(path)).await?);
    writer
        .write_all(json.as_bytes())
        .await
        .with_context(|| format!("Failed to write JSON to {:?}", path))?;
    writer
        .flush()
        .await
        .with_context(|| format!("Failed to flush {:?}", path))?;
    Ok(())
}

/// Append a single JSON value as one line of a JSONL file, creating the file
/// if needed.
pub async fn append_jsonl<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    let mut line = serde_json::to_string(value)
        .with_context(|| format!("Failed to serialize JSON for {:?}", path))?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {:?} for appending", path))?;
    file.write_all(line.as_bytes())
        .await
        .with_context(|| format!("Failed to append to {:?}", path))?;
    file.flush()
        .await
        .with_context(|| format!("Failed to flush {:?}", path))?;
    Ok(())
}
