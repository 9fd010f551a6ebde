use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use log::debug;

use crate::config::CameraConfig;

/// Writes captured JPEG bytes to `<pictures>/<photo_dir_name>/`.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    dir: PathBuf,
    prefix: String,
}

impl PhotoStore {
    pub fn new(pictures_dir: impl AsRef<Path>, config: &CameraConfig) -> Self {
        Self {
            dir: pictures_dir.as_ref().join(&config.photo_dir_name),
            prefix: config.file_prefix.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn photo_file_name<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        format!("{}{}.jpg", self.prefix, time.format("%Y%m%d_%H%M%S"))
    }

    pub fn save(&self, data: &[u8]) -> Result<PathBuf> {
        self.save_at(data, &Local::now())
    }

    pub fn save_at<Tz: TimeZone>(&self, data: &[u8], time: &DateTime<Tz>) -> Result<PathBuf>
    where
        Tz::Offset: std::fmt::Display,
    {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .with_context(|| format!("create {}", self.dir.display()))?;
        }
        let path = self.dir.join(self.photo_file_name(time));
        let mut file =
            File::create(&path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(data)?;
        file.flush()?;
        debug!("Photo saved to: {}", path.display());
        Ok(path)
    }
}

/// Public pictures directory of the desktop user, or the working directory.
#[cfg(not(target_os = "android"))]
pub fn pictures_dir(config: &CameraConfig) -> PathBuf {
    config
        .pictures_dir
        .clone()
        .or_else(dirs::picture_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn store(root: &Path) -> PhotoStore {
        PhotoStore::new(root, &CameraConfig::default())
    }

    #[test]
    fn file_name_uses_timestamp() {
        let time = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let store = store(Path::new("/pics"));
        assert_eq!(store.photo_file_name(&time), "INMO_AIR3_20240309_070501.jpg");
        assert_eq!(store.dir(), Path::new("/pics/INMO_Camera"));
    }

    #[test]
    fn save_creates_directory_and_writes_bytes() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let path = store.save_at(&[1, 2, 3], &time).unwrap();
        assert_eq!(path, root.path().join("INMO_Camera/INMO_AIR3_20240102_030405.jpg"));
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn save_fails_when_root_is_a_file() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let store = store(&blocker);
        assert!(store.save(&[1]).is_err());
    }
}
