//! Stateless queries over the platform camera registry.

use log::{debug, error};

use crate::camera::{CameraHandle, CameraId, CameraInfo, CameraService, Size};

pub fn number_of_cameras(service: &dyn CameraService) -> usize {
    service.number_of_cameras()
}

pub fn camera_info(service: &dyn CameraService, id: CameraId) -> Option<CameraInfo> {
    match service.camera_info(id) {
        Ok(info) => Some(info),
        Err(err) => {
            error!("Failed to get info of camera {id}: {err}");
            None
        }
    }
}

/// Probes `id` by opening it and releasing it straight away.
pub fn is_camera_available(service: &dyn CameraService, id: CameraId) -> bool {
    let handle = match service.open(id) {
        Ok(handle) => handle,
        Err(err) => {
            error!("Camera {id} is not available: {err}");
            return false;
        }
    };
    if let Err(err) = handle.release() {
        error!("Camera {id} probe release failed: {err}");
    }
    true
}

/// Picks the size whose aspect ratio is closest to `target_width:target_height`.
/// The earliest size wins a tie.
pub fn best_preview_size(sizes: &[Size], target_width: u32, target_height: u32) -> Option<Size> {
    if target_height == 0 {
        return sizes.first().copied();
    }
    let target_ratio = target_width as f64 / target_height as f64;
    let mut best: Option<(Size, f64)> = None;
    for size in sizes.iter().filter(|s| s.height > 0) {
        let diff = (size.aspect_ratio() - target_ratio).abs();
        if best.map_or(true, |(_, min_diff)| diff < min_diff) {
            best = Some((*size, diff));
        }
    }
    best.map(|(size, _)| size).or_else(|| sizes.first().copied())
}

pub fn log_camera_capabilities(handle: &dyn CameraHandle) {
    let caps = handle.capabilities();
    debug!("=== Camera {} capabilities ===", handle.id());
    debug!("Supported preview sizes:");
    for size in &caps.preview_sizes {
        debug!("  {size}");
    }
    debug!("Supported picture sizes:");
    for size in &caps.picture_sizes {
        debug!("  {size}");
    }
    debug!("Supported focus modes: {:?}", caps.focus_modes);
    debug!("Supported flash modes: {:?}", caps.flash_modes);
    debug!("Supported scene modes: {:?}", caps.scene_modes);
    debug!("Supported white balance modes: {:?}", caps.white_balance_modes);
    debug!("=== End of camera capabilities ===");
}
