use crate::errors::{AppError, AppResult};
use crate::models::StoredAttachment;
use anyhow::Context;
use chrono::Local;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

const SUFFIX_LEN: usize = 8;
const MAX_NAME_ATTEMPTS: usize = 5;

/// Files attached to todos, kept under `<base_dir>/<resource_dir>`.
///
/// Paths handed out are `/<resource_dir>/...`, relative to `base_dir` and
/// always using `/`. Paths handed in may omit the leading `/`.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    base_dir: PathBuf,
    resource_dir: String,
}

impl AttachmentStore {
    pub fn new(base_dir: impl Into<PathBuf>, resource_dir: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            resource_dir: resource_dir.into(),
        }
    }

    pub fn resource_root(&self) -> PathBuf {
        self.base_dir.join(&self.resource_dir)
    }

    /// Writes `bytes` under a fresh `YYYYMMDD_HHMMSS_<suffix>[.ext]` name.
    pub async fn save(&self, sub_path: &str, original_name: &str, bytes: &[u8]) -> AppResult<StoredAttachment> {
        let relative_dir = self.relative_dir(sub_path)?;
        let dir = self.resolve(&relative_dir)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create attachment dir {}", dir.display()))?;

        let extension = file_extension(original_name);
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = generate_name(&extension);
            let target = dir.join(&name);
            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await
            {
                Ok(file) => file,
                Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(name = %name, "attachment name taken, retrying");
                    continue;
                }
                Err(error) => return Err(error.into()),
            };
            file.write_all(bytes).await?;
            file.flush().await?;

            let path = format!("/{}/{}", relative_dir, name);
            tracing::info!(path = %path, size = bytes.len(), "attachment saved");
            return Ok(StoredAttachment { name, path });
        }

        Err(AppError::Conflict(format!(
            "could not pick a free attachment name in {}",
            relative_dir
        )))
    }

    /// Files directly under `<resource_dir>/<sub_path>`, sorted by name.
    pub async fn list(&self, sub_path: &str) -> AppResult<Vec<StoredAttachment>> {
        let relative_dir = self.relative_dir(sub_path)?;
        let dir = self.resolve(&relative_dir)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            items.push(StoredAttachment {
                path: format!("/{}/{}", relative_dir, name),
                name,
            });
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    pub async fn delete(&self, relative_path: &str) -> AppResult<()> {
        let target = self.resolve(relative_path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("attachment {} not found", relative_path)))
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn exists(&self, relative_path: &str) -> AppResult<bool> {
        let target = self.resolve(relative_path)?;
        Ok(tokio::fs::try_exists(&target).await?)
    }

    fn relative_dir(&self, sub_path: &str) -> AppResult<String> {
        let joined = if sub_path.trim().is_empty() {
            self.resource_dir.clone()
        } else {
            format!("{}/{}", self.resource_dir, sub_path)
        };
        let normalized = normalize_separators(&joined);
        check_relative(&normalized)?;
        Ok(normalized)
    }

    fn resolve(&self, relative_path: &str) -> AppResult<PathBuf> {
        let normalized = normalize_separators(relative_path);
        check_relative(&normalized)?;
        Ok(self.base_dir.join(normalized.trim_start_matches('/')))
    }
}

fn generate_name(extension: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    let stem = format!("{}_{}", Local::now().format("%Y%m%d_%H%M%S"), suffix);
    if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    }
}

fn normalize_separators(path: &str) -> String {
    let forward = path.replace('\\', "/");
    let collapsed: Vec<&str> = forward.split('/').filter(|part| !part.is_empty()).collect();
    let joined = collapsed.join("/");
    if forward.starts_with('/') {
        format!("/{}", joined)
    } else {
        joined
    }
}

// Leading `/` is how saved paths are reported, so it is read as relative.
fn check_relative(path: &str) -> AppResult<()> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(AppError::Invalid("attachment path is empty".to_string()));
    }
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(AppError::Invalid(format!(
                    "attachment path must stay inside the resource dir: {}",
                    path
                )))
            }
        }
    }
    Ok(())
}

/// Lowercased extension without the dot; empty when the name has none.
pub fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub fn guess_mime_type(file_name: &str) -> String {
    let ext = file_extension(file_name);
    match ext.as_str() {
        "jpg" => "image/jpeg".to_string(),
        "png" | "jpeg" | "gif" | "bmp" | "webp" => format!("image/{}", ext),
        "svg" => "image/svg+xml".to_string(),
        "mp4" | "webm" | "ogg" | "mov" | "mkv" => format!("video/{}", ext),
        "mp3" | "wav" | "flac" | "aac" => format!("audio/{}", ext),
        "pdf" => "application/pdf".to_string(),
        "zip" | "rar" | "7z" => "application/zip".to_string(),
        "txt" | "md" | "log" => "text/plain".to_string(),
        "json" => "application/json".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

pub fn is_image(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

pub fn is_video(mime_type: &str) -> bool {
    mime_type.starts_with("video/")
}

pub fn is_audio(mime_type: &str) -> bool {
    mime_type.starts_with("audio/")
}

pub fn is_network_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

pub fn is_data_url(path: &str) -> bool {
    path.starts_with("data:")
}

pub fn is_local_path(path: &str) -> bool {
    !is_network_url(path) && !is_data_url(path)
}
