use std::{fmt, sync::mpsc::Sender};

use image::RgbaImage;

#[cfg(target_os = "android")]
pub mod android;

#[cfg(target_os = "windows")]
pub mod desktop;

#[cfg(test)]
pub mod fake;

pub type CameraId = usize;

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("camera {0} is not available")]
    Unavailable(CameraId),
    #[error("failed to open camera {id}: {reason}")]
    OpenFailed { id: CameraId, reason: String },
    #[error("camera is not open")]
    NotOpen,
    #[error("preview error: {0}")]
    Preview(String),
    #[error("capture error: {0}")]
    Capture(String),
    #[error("platform error: {0}")]
    Platform(String),
}

pub type CameraResult<T> = std::result::Result<T, CameraError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    Back,
    Front,
    External,
}

/// Static information about one camera in the platform registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub id: CameraId,
    pub facing: Facing,
    /// Clockwise rotation (degrees) of the sensor relative to the display.
    pub orientation: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    Auto,
    ContinuousPicture,
    ContinuousVideo,
    Macro,
    Fixed,
    Edof,
    Infinity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashMode {
    Off,
    Auto,
    On,
    Torch,
    RedEye,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureFormat {
    Jpeg,
}

/// Everything a camera reports it can do. Queried once per open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    pub preview_sizes: Vec<Size>,
    pub picture_sizes: Vec<Size>,
    pub focus_modes: Vec<FocusMode>,
    pub flash_modes: Vec<FlashMode>,
    pub scene_modes: Vec<String>,
    pub white_balance_modes: Vec<String>,
}

impl Capabilities {
    pub fn supports_focus(&self, mode: FocusMode) -> bool {
        self.focus_modes.contains(&mode)
    }

    pub fn supports_flash(&self, mode: FlashMode) -> bool {
        self.flash_modes.contains(&mode)
    }
}

/// Settings applied to an open camera before the preview starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub preview_size: Option<Size>,
    pub picture_size: Option<Size>,
    pub focus_mode: Option<FocusMode>,
    pub flash_mode: Option<FlashMode>,
    pub picture_format: PictureFormat,
    pub jpeg_quality: u8,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            preview_size: None,
            picture_size: None,
            focus_mode: None,
            flash_mode: None,
            picture_format: PictureFormat::Jpeg,
            jpeg_quality: 90,
        }
    }
}

/// Results delivered by the camera service after `auto_focus` or `take_picture`.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraEvent {
    Shutter,
    AutoFocus { success: bool },
    PictureTaken(Vec<u8>),
    PictureFailed(String),
}

/// The on-screen target that live frames are streamed to.
#[derive(Debug, Clone)]
pub struct PreviewSurface {
    frames: Sender<RgbaImage>,
    size: Option<Size>,
}

impl PreviewSurface {
    pub fn new(frames: Sender<RgbaImage>) -> Self {
        Self { frames, size: None }
    }

    pub fn with_size(mut self, size: Size) -> Self {
        self.size = Some(size);
        self
    }

    pub fn size(&self) -> Option<Size> {
        self.size
    }

    pub fn set_size(&mut self, size: Size) {
        self.size = Some(size);
    }

    pub fn sender(&self) -> Sender<RgbaImage> {
        self.frames.clone()
    }
}

/// The platform camera registry.
pub trait CameraService {
    fn number_of_cameras(&self) -> usize;

    fn camera_info(&self, id: CameraId) -> CameraResult<CameraInfo>;

    /// Opens `id` for exclusive use. Only one handle may be open at a time.
    fn open(&self, id: CameraId) -> CameraResult<Box<dyn CameraHandle>>;
}

/// An open camera.
///
/// `take_picture` stops the preview; callers restart it once the picture
/// has been delivered.
pub trait CameraHandle {
    fn id(&self) -> CameraId;

    fn capabilities(&self) -> &Capabilities;

    fn parameters(&self) -> Parameters;

    fn set_parameters(&mut self, parameters: Parameters) -> CameraResult<()>;

    fn start_preview(&mut self, surface: &PreviewSurface) -> CameraResult<()>;

    fn stop_preview(&mut self) -> CameraResult<()>;

    fn auto_focus(&mut self, events: Sender<CameraEvent>) -> CameraResult<()>;

    fn take_picture(&mut self, events: Sender<CameraEvent>) -> CameraResult<()>;

    fn release(self: Box<Self>) -> CameraResult<()>;
}

/// Registry used on targets without a camera backend.
#[derive(Debug, Default)]
pub struct NoCameras;

impl CameraService for NoCameras {
    fn number_of_cameras(&self) -> usize {
        0
    }

    fn camera_info(&self, id: CameraId) -> CameraResult<CameraInfo> {
        Err(CameraError::Unavailable(id))
    }

    fn open(&self, id: CameraId) -> CameraResult<Box<dyn CameraHandle>> {
        Err(CameraError::Unavailable(id))
    }
}

/// Converts a packed NV21/NV12-style YUV 4:2:0 buffer (Y plane followed by
/// interleaved VU) to RGBA.
pub fn decode_yuv420sp(data: &[u8], width: u32, height: u32) -> RgbaImage {
    let width = width as usize;
    let height = height as usize;
    let frame_size = width * height;
    let mut rgba_data = Vec::with_capacity(frame_size * 4);
    let mut yp = 0;
    for j in 0..height {
        let (mut uvp, mut u, mut v) = (frame_size + (j >> 1) * width, 0i32, 0i32);
        for i in 0..width {
            let y = (data.get(yp).copied().unwrap_or(0) as i32 - 16).max(0);
            if i & 1 == 0 {
                v = data.get(uvp).copied().unwrap_or(128) as i32 - 128;
                u = data.get(uvp + 1).copied().unwrap_or(128) as i32 - 128;
                uvp += 2;
            }

            let y1192 = 1192 * y;
            let r = (y1192 + 1634 * v).clamp(0, 262143);
            let g = (y1192 - 833 * v - 400 * u).clamp(0, 262143);
            let b = (y1192 + 2066 * u).clamp(0, 262143);

            rgba_data.extend_from_slice(&[
                ((r >> 10) & 0xff) as u8,
                ((g >> 10) & 0xff) as u8,
                ((b >> 10) & 0xff) as u8,
                255,
            ]);
            yp += 1;
        }
    }
    RgbaImage::from_raw(width as u32, height as u32, rgba_data)
        .unwrap_or_else(|| RgbaImage::new(width as u32, height as u32))
}

/// Rotates a decoded frame clockwise by the sensor orientation.
pub fn rotate_frame(frame: RgbaImage, degrees: i32) -> RgbaImage {
    use image::imageops::{rotate180, rotate270, rotate90};
    match degrees.rem_euclid(360) {
        90 => rotate90(&frame),
        180 => rotate180(&frame),
        270 => rotate270(&frame),
        _ => frame,
    }
}

/// Swaps the blue and red channels of a packed BGRA buffer in place.
pub fn bgra_to_rgba(buffer: &mut [u8]) {
    for px in buffer.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

/// Encodes a frame as a JPEG still, dropping the alpha channel.
pub fn encode_jpeg(frame: &RgbaImage, quality: u8) -> CameraResult<Vec<u8>> {
    let rgb = image::DynamicImage::ImageRgba8(frame.clone()).to_rgb8();
    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)
        .map_err(|err| CameraError::Capture(err.to_string()))?;
    Ok(jpeg)
}
