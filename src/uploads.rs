//! On-disk storage for issue photos.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use uuid::Uuid;

/// URL prefix the upload directory is served under.
pub const PUBLIC_PREFIX: &str = "/uploads";

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` under a generated name and return its public path.
    ///
    /// The original file name only contributes its extension.
    pub fn save(&self, original_name: Option<&str>, bytes: &[u8]) -> Result<String> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create upload dir {}", self.dir.display()))?;

        let file_name = generate_file_name(original_name);
        let path = self.dir.join(&file_name);
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write upload {}", path.display()))?;

        tracing::debug!("Stored upload {} ({} bytes)", file_name, bytes.len());
        Ok(format!("{}/{}", PUBLIC_PREFIX, file_name))
    }

    /// Remove a file previously returned by [`save`](Self::save). Failures
    /// are logged, not returned.
    pub fn discard(&self, public_path: &str) {
        let Some(file_name) = public_path
            .strip_prefix(PUBLIC_PREFIX)
            .and_then(|p| p.strip_prefix('/'))
            .filter(|name| !name.is_empty() && !name.contains(['/', '\\']) && *name != "..")
        else {
            tracing::warn!("Refusing to discard unexpected upload path {:?}", public_path);
            return;
        };

        if let Err(e) = std::fs::remove_file(self.dir.join(file_name)) {
            tracing::warn!("Failed to discard upload {}: {}", file_name, e);
        }
    }
}

fn generate_file_name(original_name: Option<&str>) -> String {
    let stem = format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        &Uuid::new_v4().simple().to_string()[..8]
    );

    match original_name.and_then(extension) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

fn extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
