//! Per-capture folder tree on durable storage.
//!
//! ```text
//! <root>/<ISO8601-timestamp>-<suffix>/
//!   Images/
//!   Checkpoint/
//!   Models/
//! ```

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::error::StorageError;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const IMAGES_FOLDER: &str = "Images";
pub const CHECKPOINT_FOLDER: &str = "Checkpoint";
pub const MODELS_FOLDER: &str = "Models";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStorage {
    capture_folder: PathBuf,
    images_folder: PathBuf,
    checkpoint_folder: PathBuf,
    models_folder: PathBuf,
}

impl SessionStorage {
    /// Creates a fresh capture folder under `root`. Nothing is left on disk if
    /// any of the subdirectories cannot be created.
    pub fn create(root: &Path) -> Result<Self, StorageError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let name = folder_name(Utc::now(), &suffix[..8]);
        Self::create_named(root, &name)
    }

    pub(crate) fn create_named(root: &Path, name: &str) -> Result<Self, StorageError> {
        Self::create_with(root, name, create_dir_checked)
    }

    fn create_with<F>(root: &Path, name: &str, mkdir: F) -> Result<Self, StorageError>
    where
        F: Fn(&Path) -> Result<(), StorageError>,
    {
        let capture_folder = root.join(name);
        if capture_folder.exists() {
            log_warn!("Capture folder already exists at {}", capture_folder.display());
            return Err(StorageError::AlreadyExists(capture_folder));
        }

        log_info!("Creating capture folder {}", capture_folder.display());
        mkdir(&capture_folder)?;

        let storage = Self {
            images_folder: capture_folder.join(IMAGES_FOLDER),
            checkpoint_folder: capture_folder.join(CHECKPOINT_FOLDER),
            models_folder: capture_folder.join(MODELS_FOLDER),
            capture_folder,
        };

        let created = [
            &storage.images_folder,
            &storage.checkpoint_folder,
            &storage.models_folder,
        ]
        .into_iter()
        .try_for_each(|dir| mkdir(dir.as_path()));

        if let Err(err) = created {
            if let Err(cleanup) = fs::remove_dir_all(&storage.capture_folder) {
                log_warn!(
                    "Failed to roll back partial capture folder {}: {cleanup}",
                    storage.capture_folder.display()
                );
            }
            return Err(err);
        }

        Ok(storage)
    }

    pub fn capture_folder(&self) -> &Path {
        &self.capture_folder
    }

    pub fn images_folder(&self) -> &Path {
        &self.images_folder
    }

    pub fn checkpoint_folder(&self) -> &Path {
        &self.checkpoint_folder
    }

    pub fn models_folder(&self) -> &Path {
        &self.models_folder
    }

    pub fn model_path(&self, file_name: &str) -> PathBuf {
        self.models_folder.join(file_name)
    }

    pub fn preview_path(&self, file_name: &str) -> PathBuf {
        self.models_folder.join(file_name)
    }

    pub fn has_images_folder(&self) -> bool {
        self.images_folder.is_dir()
    }

    /// Number of captured frames currently in `Images/`.
    pub fn image_count(&self) -> usize {
        image_files(&self.images_folder).len()
    }

    /// First captured frame by file name, the capture primitive writes them sequentially.
    pub fn first_image(&self) -> Option<PathBuf> {
        image_files(&self.images_folder).into_iter().next()
    }

    pub fn remove_images(&self) -> Result<(), StorageError> {
        remove_dir_if_present(&self.images_folder)
    }

    pub fn remove_checkpoint(&self) -> Result<(), StorageError> {
        remove_dir_if_present(&self.checkpoint_folder)
    }

    /// Reclaims the raw frames and checkpoint data, keeping `Models/`.
    pub fn remove_scratch(&self) -> Result<(), StorageError> {
        let images = self.remove_images();
        let checkpoint = self.remove_checkpoint();
        images.and(checkpoint)
    }

    pub fn remove_all(&self) -> Result<(), StorageError> {
        log_info!("Removing capture folder {}", self.capture_folder.display());
        remove_dir_if_present(&self.capture_folder)
    }
}

/// `2024-05-01T10:11:12.345Z-1a2b3c4d`
pub fn folder_name(timestamp: DateTime<Utc>, suffix: &str) -> String {
    format!(
        "{}-{}",
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        suffix
    )
}

fn create_dir_checked(dir: &Path) -> Result<(), StorageError> {
    if dir.exists() {
        return Err(StorageError::AlreadyExists(dir.to_path_buf()));
    }
    fs::create_dir_all(dir).map_err(|source| StorageError::Creation {
        path: dir.to_path_buf(),
        source,
    })?;
    if !dir.is_dir() {
        return Err(StorageError::Missing(dir.to_path_buf()));
    }
    Ok(())
}

fn remove_dir_if_present(dir: &Path) -> Result<(), StorageError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::Removal {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

fn image_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| !name.starts_with('.'))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn create_builds_all_three_empty_subfolders() {
        let root = tempfile::tempdir().unwrap();
        let storage = SessionStorage::create(root.path()).unwrap();

        for dir in [
            storage.images_folder(),
            storage.checkpoint_folder(),
            storage.models_folder(),
        ] {
            assert!(dir.is_dir(), "{} missing", dir.display());
            assert_eq!(fs::read_dir(dir).unwrap().count(), 0);
        }
        assert!(storage.capture_folder().starts_with(root.path()));
    }

    #[test]
    fn consecutive_sessions_get_distinct_folders() {
        let root = tempfile::tempdir().unwrap();
        let a = SessionStorage::create(root.path()).unwrap();
        let b = SessionStorage::create(root.path()).unwrap();
        assert_ne!(a.capture_folder(), b.capture_folder());
    }

    #[test]
    fn folder_name_is_iso8601_with_suffix() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 11, 12).unwrap();
        assert_eq!(folder_name(ts, "deadbeef"), "2024-05-01T10:11:12.000Z-deadbeef");
    }

    #[test]
    fn existing_folder_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("taken")).unwrap();
        let err = SessionStorage::create_named(root.path(), "taken").unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[test]
    fn failed_checkpoint_folder_rolls_back_images_folder() {
        let root = tempfile::tempdir().unwrap();
        let err = SessionStorage::create_with(root.path(), "session", |dir| {
            if dir.ends_with(CHECKPOINT_FOLDER) {
                return Err(StorageError::Creation {
                    path: dir.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            create_dir_checked(dir)
        })
        .unwrap_err();

        assert!(matches!(err, StorageError::Creation { .. }));
        assert!(!root.path().join("session").exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn unwritable_root_fails_without_leftovers() {
        let root = tempfile::tempdir().unwrap();
        let blocked_root = root.path().join("blocked");
        fs::write(&blocked_root, b"not a directory").unwrap();

        let err = SessionStorage::create_named(&blocked_root, "session").unwrap_err();
        assert!(matches!(err, StorageError::Creation { .. }));
        assert!(!blocked_root.join("session").exists());
    }

    #[test]
    fn remove_scratch_keeps_models() {
        let root = tempfile::tempdir().unwrap();
        let storage = SessionStorage::create(root.path()).unwrap();
        fs::write(storage.images_folder().join("IMG_0001.HEIC"), b"x").unwrap();

        storage.remove_scratch().unwrap();
        assert!(!storage.images_folder().exists());
        assert!(!storage.checkpoint_folder().exists());
        assert!(storage.models_folder().is_dir());

        // Removing twice is fine.
        storage.remove_scratch().unwrap();
    }

    #[test]
    fn image_listing_is_sorted_and_skips_hidden_files() {
        let root = tempfile::tempdir().unwrap();
        let storage = SessionStorage::create(root.path()).unwrap();
        for name in ["IMG_0002.HEIC", ".DS_Store", "IMG_0001.HEIC"] {
            fs::write(storage.images_folder().join(name), b"x").unwrap();
        }

        assert_eq!(storage.image_count(), 2);
        assert_eq!(
            storage.first_image().unwrap().file_name().unwrap(),
            "IMG_0001.HEIC"
        );
    }
}
