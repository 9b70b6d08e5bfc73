//! Clip store
//!
//! On-disk layout: one root directory holding one folder per recording, each
//! folder holding timestamp-named MP4 files. Files still being written carry
//! a `.part` suffix and are invisible to lookups.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Extension of finished clips
pub const CLIP_EXTENSION: &str = "mp4";

/// Suffix appended while a clip is being encoded
pub const PARTIAL_SUFFIX: &str = "part";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid clip name: {0}")]
    InvalidName(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Address of a finished recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipReference {
    pub folder: String,
    pub file: String,
}

impl ClipReference {
    pub fn new(folder: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            file: file.into(),
        }
    }

    /// Link to the clip page, as handed to clients
    pub fn link(&self) -> String {
        format!("/clip/{}", self.folder)
    }

    /// Link to the raw video bytes
    pub fn file_link(&self) -> String {
        format!("/clip_file/{}/{}", self.folder, self.file)
    }
}

/// Clip directory manager
#[derive(Debug, Clone)]
pub struct ClipStore {
    root: PathBuf,
}

impl ClipStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if needed
    pub async fn init(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tracing::info!("Clip store at {:?}", self.root);
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A fresh, collision-resistant folder name
    pub fn generate_folder_name() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// File name for a clip started now; sorts lexically by start time
    pub fn timestamp_file_name() -> String {
        format!("{}.{}", Local::now().format("%Y-%m-%d_%H-%M-%S"), CLIP_EXTENSION)
    }

    /// Path a clip is encoded to before it is published
    pub fn partial_path(final_path: &Path) -> PathBuf {
        let mut name = final_path.as_os_str().to_owned();
        name.push(".");
        name.push(PARTIAL_SUFFIX);
        PathBuf::from(name)
    }

    fn folder_path(&self, folder: &str) -> StorageResult<PathBuf> {
        validate_name(folder)?;
        Ok(self.root.join(folder))
    }

    /// Create a recording folder; succeeds if it already exists
    pub async fn create_folder(&self, folder: &str) -> StorageResult<PathBuf> {
        let path = self.folder_path(folder)?;
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }

    /// Most recent finished clip in `folder`, or `None` if the folder is
    /// missing, empty, or the name is invalid
    pub async fn latest_clip(&self, folder: &str) -> Option<ClipReference> {
        let path = self.folder_path(folder).ok()?;
        let mut entries = tokio::fs::read_dir(&path).await.ok()?;

        let mut latest: Option<String> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_finished_clip(&name) {
                continue;
            }
            if latest.as_ref().map_or(true, |current| name > *current) {
                latest = Some(name);
            }
        }

        latest.map(|file| ClipReference::new(folder, file))
    }

    /// Path of a finished clip file, if it exists
    pub async fn clip_path(&self, folder: &str, file: &str) -> Option<PathBuf> {
        let dir = self.folder_path(folder).ok()?;
        validate_name(file).ok()?;
        if !is_finished_clip(file) {
            return None;
        }

        let path = dir.join(file);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }
}

fn is_finished_clip(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext == CLIP_EXTENSION)
}

/// Accept only a single plain path component
fn validate_name(name: &str) -> StorageResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(()),
        _ => Err(StorageError::InvalidName(name.to_string())),
    }
}
