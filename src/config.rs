use std::{env, path::PathBuf, time::Duration};

use log::warn;

use crate::camera::{CameraId, Size};

/// Camera used when the screen opens; the INMO AIR3 RGB camera sits at 0.
pub const DEFAULT_CAMERA_ID: CameraId = 0;

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub default_camera_id: CameraId,
    pub jpeg_quality: u8,
    /// Root of the public pictures directory. `None` resolves it from the platform.
    pub pictures_dir: Option<PathBuf>,
    pub photo_dir_name: String,
    pub file_prefix: String,
    /// Preview target used until the surface reports a size.
    pub preview_request: Size,
    pub permission_timeout: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            default_camera_id: DEFAULT_CAMERA_ID,
            jpeg_quality: 90,
            pictures_dir: None,
            photo_dir_name: "INMO_Camera".to_string(),
            file_prefix: "INMO_AIR3_".to_string(),
            preview_request: Size::new(1280, 720),
            permission_timeout: Duration::from_secs(30),
        }
    }
}

impl CameraConfig {
    /// Defaults overridden by `INMO_CAMERA_ID`, `INMO_JPEG_QUALITY` and `INMO_PICTURES_DIR`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(id) = lookup("INMO_CAMERA_ID") {
            match id.trim().parse() {
                Ok(id) => config.default_camera_id = id,
                Err(err) => warn!("ignoring INMO_CAMERA_ID={id}: {err}"),
            }
        }
        if let Some(quality) = lookup("INMO_JPEG_QUALITY") {
            match quality.trim().parse::<u8>() {
                Ok(q) if q <= 100 => config.jpeg_quality = q,
                _ => warn!("ignoring INMO_JPEG_QUALITY={quality}"),
            }
        }
        if let Some(dir) = lookup("INMO_PICTURES_DIR") {
            if !dir.is_empty() {
                config.pictures_dir = Some(PathBuf::from(dir));
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CameraConfig::default();
        assert_eq!(config.default_camera_id, 0);
        assert_eq!(config.jpeg_quality, 90);
        assert_eq!(config.photo_dir_name, "INMO_Camera");
        assert_eq!(config.file_prefix, "INMO_AIR3_");
    }

    #[test]
    fn lookup_overrides() {
        let config = CameraConfig::from_lookup(|key| match key {
            "INMO_CAMERA_ID" => Some("2".into()),
            "INMO_JPEG_QUALITY" => Some("75".into()),
            "INMO_PICTURES_DIR" => Some("/tmp/pics".into()),
            _ => None,
        });
        assert_eq!(config.default_camera_id, 2);
        assert_eq!(config.jpeg_quality, 75);
        assert_eq!(config.pictures_dir, Some(PathBuf::from("/tmp/pics")));
    }

    #[test]
    fn bad_values_keep_defaults() {
        let config = CameraConfig::from_lookup(|key| match key {
            "INMO_CAMERA_ID" => Some("front".into()),
            "INMO_JPEG_QUALITY" => Some("250".into()),
            _ => None,
        });
        assert_eq!(config.default_camera_id, 0);
        assert_eq!(config.jpeg_quality, 90);
    }
}
