//! NDK Camera2 backend.
//!
//! Preview frames come from a YUV_420_888 image reader and are converted to
//! RGBA on the camera thread. Stills come from a JPEG image reader attached
//! to the same capture session.

use core::slice;
use std::{
    ffi::{c_int, c_void, CStr, CString},
    mem::zeroed,
    ptr::null_mut,
    sync::{mpsc::Sender, Mutex},
};

use image::RgbaImage;
use log::{debug, error, info, warn};
use ndk_sys::{
    acamera_metadata_tag, camera_status_t, media_status_t, ACameraCaptureFailure,
    ACameraCaptureSession, ACameraCaptureSession_capture, ACameraCaptureSession_captureCallbacks,
    ACameraCaptureSession_close, ACameraCaptureSession_setRepeatingRequest,
    ACameraCaptureSession_stateCallbacks, ACameraCaptureSession_stopRepeating, ACameraDevice,
    ACameraDevice_StateCallbacks, ACameraDevice_close, ACameraDevice_createCaptureRequest,
    ACameraDevice_createCaptureSession, ACameraDevice_getId, ACameraDevice_request_template,
    ACameraManager, ACameraManager_create, ACameraManager_delete,
    ACameraManager_deleteCameraIdList, ACameraManager_getCameraCharacteristics,
    ACameraManager_getCameraIdList, ACameraManager_openCamera, ACameraMetadata,
    ACameraMetadata_const_entry, ACameraMetadata_free, ACameraMetadata_getConstEntry,
    ACameraOutputTarget, ACameraOutputTarget_create, ACameraOutputTarget_free, ACaptureRequest,
    ACaptureRequest_addTarget, ACaptureRequest_free, ACaptureRequest_setEntry_i32,
    ACaptureRequest_setEntry_u8, ACaptureSessionOutput, ACaptureSessionOutputContainer,
    ACaptureSessionOutputContainer_add, ACaptureSessionOutputContainer_create,
    ACaptureSessionOutputContainer_free, ACaptureSessionOutput_create,
    ACaptureSessionOutput_free, AImage, AImageReader, AImageReader_ImageListener,
    AImageReader_acquireLatestImage, AImageReader_acquireNextImage, AImageReader_delete,
    AImageReader_getWindow, AImageReader_new, AImageReader_setImageListener, AImage_delete,
    AImage_getHeight, AImage_getPlaneData, AImage_getPlanePixelStride, AImage_getPlaneRowStride,
    AImage_getWidth, ANativeWindow, AIMAGE_FORMATS,
};

use super::{
    decode_yuv420sp, rotate_frame, CameraError, CameraEvent, CameraHandle, CameraId, CameraInfo,
    CameraResult, CameraService, Capabilities, Facing, FlashMode, FocusMode, Parameters,
    PreviewSurface, Size,
};

#[link(name = "camera2ndk")]
extern "C" {}

#[link(name = "mediandk")]
extern "C" {}

// android.hardware.camera2.CameraMetadata constants
const LENS_FACING_FRONT: u8 = 0;
const LENS_FACING_BACK: u8 = 1;
const AF_MODE_OFF: u8 = 0;
const AF_MODE_AUTO: u8 = 1;
const AF_MODE_MACRO: u8 = 2;
const AF_MODE_CONTINUOUS_VIDEO: u8 = 3;
const AF_MODE_CONTINUOUS_PICTURE: u8 = 4;
const AF_MODE_EDOF: u8 = 5;
const AF_TRIGGER_START: u8 = 1;
const AF_STATE_FOCUSED_LOCKED: u8 = 4;
const AF_STATE_NOT_FOCUSED_LOCKED: u8 = 5;
const AE_MODE_ON: u8 = 1;
const AE_MODE_ON_AUTO_FLASH: u8 = 2;
const AE_MODE_ON_ALWAYS_FLASH: u8 = 3;
const AE_MODE_ON_AUTO_FLASH_REDEYE: u8 = 4;
const FLASH_MODE_TORCH: u8 = 2;

/// Preview results to wait for an AF lock before giving up.
const MAX_FOCUS_FRAMES: u32 = 30;

const MAX_READER_IMAGES: i32 = 2;

fn status(what: &str, camera_status: camera_status_t) -> CameraResult<()> {
    if camera_status != camera_status_t::ACAMERA_OK {
        return Err(CameraError::Platform(format!(
            "{what} failed (reason: {camera_status:?})"
        )));
    }
    Ok(())
}

fn media(what: &str, media_status: media_status_t) -> CameraResult<()> {
    if media_status != media_status_t::AMEDIA_OK {
        return Err(CameraError::Platform(format!(
            "{what} failed (reason: {media_status:?})"
        )));
    }
    Ok(())
}

unsafe fn entry_u8(metadata: *const ACameraMetadata, tag: acamera_metadata_tag) -> Vec<u8> {
    let mut entry: ACameraMetadata_const_entry = zeroed();
    if ACameraMetadata_getConstEntry(metadata, tag.0, &mut entry) != camera_status_t::ACAMERA_OK
        || entry.count == 0
    {
        return vec![];
    }
    slice::from_raw_parts(entry.data.u8_, entry.count as usize).to_vec()
}

unsafe fn entry_i32(metadata: *const ACameraMetadata, tag: acamera_metadata_tag) -> Vec<i32> {
    let mut entry: ACameraMetadata_const_entry = zeroed();
    if ACameraMetadata_getConstEntry(metadata, tag.0, &mut entry) != camera_status_t::ACAMERA_OK
        || entry.count == 0
    {
        return vec![];
    }
    slice::from_raw_parts(entry.data.i32_, entry.count as usize).to_vec()
}

pub unsafe fn get_cstr<'a>(s: *const ::std::os::raw::c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

struct CameraManager(*mut ACameraManager);

impl CameraManager {
    fn new() -> CameraResult<Self> {
        let manager = unsafe { ACameraManager_create() };
        if manager.is_null() {
            return Err(CameraError::Platform("ACameraManager_create returned null".into()));
        }
        Ok(Self(manager))
    }

    fn camera_ids(&self) -> CameraResult<Vec<CString>> {
        unsafe {
            let mut camera_id_list_raw = null_mut();
            status(
                "ACameraManager_getCameraIdList",
                ACameraManager_getCameraIdList(self.0, &mut camera_id_list_raw),
            )?;
            if camera_id_list_raw.is_null() {
                return Err(CameraError::Platform("camera id list is null".into()));
            }
            let camera_id_list = &*camera_id_list_raw;
            let ids = if camera_id_list.numCameras < 1 || camera_id_list.cameraIds.is_null() {
                vec![]
            } else {
                slice::from_raw_parts(camera_id_list.cameraIds, camera_id_list.numCameras as usize)
                    .iter()
                    .map(|id| CStr::from_ptr(*id).to_owned())
                    .collect()
            };
            ACameraManager_deleteCameraIdList(camera_id_list_raw);
            Ok(ids)
        }
    }

    fn camera_id(&self, id: CameraId) -> CameraResult<CString> {
        self.camera_ids()?
            .into_iter()
            .nth(id)
            .ok_or(CameraError::Unavailable(id))
    }

    fn characteristics(&self, camera_id: &CStr) -> CameraResult<Characteristics> {
        let mut metadata = null_mut();
        unsafe {
            status(
                "ACameraManager_getCameraCharacteristics",
                ACameraManager_getCameraCharacteristics(self.0, camera_id.as_ptr(), &mut metadata),
            )?;
        }
        Ok(Characteristics(metadata))
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        unsafe { ACameraManager_delete(self.0) };
    }
}

struct Characteristics(*mut ACameraMetadata);

impl Characteristics {
    fn facing(&self) -> Facing {
        match unsafe { entry_u8(self.0, acamera_metadata_tag::ACAMERA_LENS_FACING) }.first() {
            Some(&LENS_FACING_FRONT) => Facing::Front,
            Some(&LENS_FACING_BACK) => Facing::Back,
            _ => Facing::External,
        }
    }

    fn sensor_orientation(&self) -> i32 {
        let orientation =
            unsafe { entry_i32(self.0, acamera_metadata_tag::ACAMERA_SENSOR_ORIENTATION) };
        orientation.first().copied().unwrap_or(0)
    }

    /// Output sizes of `format` from the stream configuration table.
    fn output_sizes(&self, format: AIMAGE_FORMATS) -> Vec<Size> {
        // entries are (format, width, height, input) quadruples
        let configs = unsafe {
            entry_i32(
                self.0,
                acamera_metadata_tag::ACAMERA_SCALER_AVAILABLE_STREAM_CONFIGURATIONS,
            )
        };
        configs
            .chunks_exact(4)
            .filter(|c| c[0] == format.0 as i32 && c[3] == 0)
            .map(|c| Size::new(c[1] as u32, c[2] as u32))
            .collect()
    }

    fn capabilities(&self) -> Capabilities {
        let focus_modes = unsafe {
            entry_u8(self.0, acamera_metadata_tag::ACAMERA_CONTROL_AF_AVAILABLE_MODES)
        }
        .into_iter()
        .filter_map(|mode| match mode {
            AF_MODE_OFF => Some(FocusMode::Fixed),
            AF_MODE_AUTO => Some(FocusMode::Auto),
            AF_MODE_MACRO => Some(FocusMode::Macro),
            AF_MODE_CONTINUOUS_VIDEO => Some(FocusMode::ContinuousVideo),
            AF_MODE_CONTINUOUS_PICTURE => Some(FocusMode::ContinuousPicture),
            AF_MODE_EDOF => Some(FocusMode::Edof),
            _ => None,
        })
        .collect();

        let has_flash = unsafe {
            entry_u8(self.0, acamera_metadata_tag::ACAMERA_FLASH_INFO_AVAILABLE)
        }
        .first()
            == Some(&1);
        let flash_modes = if has_flash {
            vec![FlashMode::Off, FlashMode::Auto, FlashMode::On, FlashMode::Torch, FlashMode::RedEye]
        } else {
            vec![]
        };

        let scene_modes = unsafe {
            entry_u8(self.0, acamera_metadata_tag::ACAMERA_CONTROL_AVAILABLE_SCENE_MODES)
        }
        .into_iter()
        .map(scene_mode_name)
        .collect();

        let white_balance_modes = unsafe {
            entry_u8(self.0, acamera_metadata_tag::ACAMERA_CONTROL_AWB_AVAILABLE_MODES)
        }
        .into_iter()
        .map(white_balance_name)
        .collect();

        Capabilities {
            preview_sizes: self.output_sizes(AIMAGE_FORMATS::AIMAGE_FORMAT_YUV_420_888),
            picture_sizes: self.output_sizes(AIMAGE_FORMATS::AIMAGE_FORMAT_JPEG),
            focus_modes,
            flash_modes,
            scene_modes,
            white_balance_modes,
        }
    }
}

impl Drop for Characteristics {
    fn drop(&mut self) {
        unsafe { ACameraMetadata_free(self.0) };
    }
}

fn scene_mode_name(mode: u8) -> String {
    let name = match mode {
        0 => "disabled",
        1 => "face-priority",
        2 => "action",
        3 => "portrait",
        4 => "landscape",
        5 => "night",
        6 => "night-portrait",
        7 => "theatre",
        8 => "beach",
        9 => "snow",
        10 => "sunset",
        11 => "steadyphoto",
        12 => "fireworks",
        13 => "sports",
        14 => "party",
        15 => "candlelight",
        16 => "barcode",
        18 => "hdr",
        _ => return format!("scene-{mode}"),
    };
    name.to_string()
}

fn white_balance_name(mode: u8) -> String {
    let name = match mode {
        0 => "off",
        1 => "auto",
        2 => "incandescent",
        3 => "fluorescent",
        4 => "warm-fluorescent",
        5 => "daylight",
        6 => "cloudy-daylight",
        7 => "twilight",
        8 => "shade",
        _ => return format!("awb-{mode}"),
    };
    name.to_string()
}

fn af_mode(mode: FocusMode) -> u8 {
    match mode {
        FocusMode::Auto => AF_MODE_AUTO,
        FocusMode::Macro => AF_MODE_MACRO,
        FocusMode::ContinuousVideo => AF_MODE_CONTINUOUS_VIDEO,
        FocusMode::ContinuousPicture => AF_MODE_CONTINUOUS_PICTURE,
        FocusMode::Edof => AF_MODE_EDOF,
        FocusMode::Fixed | FocusMode::Infinity => AF_MODE_OFF,
    }
}

fn ae_mode(mode: Option<FlashMode>) -> u8 {
    match mode {
        Some(FlashMode::Auto) => AE_MODE_ON_AUTO_FLASH,
        Some(FlashMode::On) => AE_MODE_ON_ALWAYS_FLASH,
        Some(FlashMode::RedEye) => AE_MODE_ON_AUTO_FLASH_REDEYE,
        Some(FlashMode::Off) | Some(FlashMode::Torch) | None => AE_MODE_ON,
    }
}

/// Camera registry backed by `ACameraManager`.
#[derive(Debug, Default)]
pub struct AndroidCameraService;

impl CameraService for AndroidCameraService {
    fn number_of_cameras(&self) -> usize {
        match CameraManager::new().and_then(|manager| manager.camera_ids()) {
            Ok(ids) => ids.len(),
            Err(err) => {
                error!("Failed to list cameras: {err}");
                0
            }
        }
    }

    fn camera_info(&self, id: CameraId) -> CameraResult<CameraInfo> {
        let manager = CameraManager::new()?;
        let camera_id = manager.camera_id(id)?;
        let characteristics = manager.characteristics(&camera_id)?;
        Ok(CameraInfo {
            id,
            facing: characteristics.facing(),
            orientation: characteristics.sensor_orientation(),
        })
    }

    fn open(&self, id: CameraId) -> CameraResult<Box<dyn CameraHandle>> {
        let manager = CameraManager::new()?;
        let camera_id = manager.camera_id(id)?;
        let characteristics = manager.characteristics(&camera_id)?;
        let capabilities = characteristics.capabilities();
        let sensor_orientation = characteristics.sensor_orientation();
        info!(
            "Trying to open Camera2 (index: {id}, id: {:?}, orientation: {sensor_orientation})",
            camera_id
        );

        unsafe extern "C" fn on_disconnected(_data: *mut c_void, device: *mut ACameraDevice) {
            info!("Camera(id: {:?}) is disconnected.", get_cstr(ACameraDevice_getId(device)));
        }

        unsafe extern "C" fn on_error(_data: *mut c_void, device: *mut ACameraDevice, error: c_int) {
            error!(
                "Error(code: {}) on Camera(id: {:?}).",
                error,
                get_cstr(ACameraDevice_getId(device))
            );
        }

        let mut device_callbacks: Box<ACameraDevice_StateCallbacks> = Box::new(unsafe { zeroed() });
        device_callbacks.onDisconnected = Some(on_disconnected);
        device_callbacks.onError = Some(on_error);

        let mut device = null_mut();
        let camera_status = unsafe {
            ACameraManager_openCamera(manager.0, camera_id.as_ptr(), &mut *device_callbacks, &mut device)
        };
        if camera_status != camera_status_t::ACAMERA_OK || device.is_null() {
            return Err(CameraError::OpenFailed {
                id,
                reason: format!("{camera_status:?}"),
            });
        }

        Ok(Box::new(AndroidCameraHandle {
            id,
            device,
            _device_callbacks: device_callbacks,
            capabilities,
            parameters: Parameters::default(),
            sensor_orientation,
            session: None,
        }))
    }
}

enum Pending {
    Idle,
    Focus { events: Sender<CameraEvent>, frames: u32 },
    Picture(Sender<CameraEvent>),
}

/// Shared with the NDK callbacks; boxed so its address stays put.
struct CallbackContext {
    frames: Mutex<Sender<RgbaImage>>,
    pending: Mutex<Pending>,
    orientation: i32,
}

impl CallbackContext {
    fn send_event(&self, event: CameraEvent) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        let sender = match std::mem::replace(&mut *pending, Pending::Idle) {
            Pending::Idle => return,
            Pending::Focus { events, .. } | Pending::Picture(events) => events,
        };
        let _ = sender.send(event);
    }

    /// Fails whatever request the closed session still owed a reply for.
    fn cancel_pending(&self) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        let (events, event) = match std::mem::replace(&mut *pending, Pending::Idle) {
            Pending::Idle => return,
            Pending::Focus { events, .. } => (events, CameraEvent::AutoFocus { success: false }),
            Pending::Picture(events) => (
                events,
                CameraEvent::PictureFailed("capture session closed".to_string()),
            ),
        };
        let _ = events.send(event);
    }
}

struct AImageGuard(*mut AImage);

impl Drop for AImageGuard {
    fn drop(&mut self) {
        unsafe { AImage_delete(self.0) };
    }
}

unsafe fn plane(image: *mut AImage, index: c_int) -> CameraResult<(&'static [u8], usize, usize)> {
    let mut data = null_mut();
    let mut len = 0;
    let mut row_stride = 0;
    let mut pixel_stride = 0;
    media("AImage_getPlaneData", AImage_getPlaneData(image, index, &mut data, &mut len))?;
    media(
        "AImage_getPlaneRowStride",
        AImage_getPlaneRowStride(image, index, &mut row_stride),
    )?;
    media(
        "AImage_getPlanePixelStride",
        AImage_getPlanePixelStride(image, index, &mut pixel_stride),
    )?;
    Ok((
        slice::from_raw_parts(data, len as usize),
        row_stride as usize,
        pixel_stride as usize,
    ))
}

/// Repacks a YUV_420_888 image into NV21 ordering (Y plane, then interleaved VU).
unsafe fn read_nv21(image: *mut AImage, width: usize, height: usize) -> CameraResult<Vec<u8>> {
    let (y, y_stride, _) = plane(image, 0)?;
    let (u, uv_stride, uv_pixel_stride) = plane(image, 1)?;
    let (v, _, _) = plane(image, 2)?;

    let mut nv21 = Vec::with_capacity(width * height * 3 / 2);
    for row in 0..height {
        let start = row * y_stride;
        let end = (start + width).min(y.len());
        nv21.extend_from_slice(&y[start.min(end)..end]);
        nv21.resize((row + 1) * width, 0);
    }
    for row in 0..height / 2 {
        for col in 0..width / 2 {
            let offset = row * uv_stride + col * uv_pixel_stride;
            nv21.push(v.get(offset).copied().unwrap_or(128));
            nv21.push(u.get(offset).copied().unwrap_or(128));
        }
    }
    Ok(nv21)
}

unsafe fn on_preview_image(context: &CallbackContext, reader: *mut AImageReader) -> CameraResult<()> {
    let mut image = null_mut();
    media(
        "AImageReader_acquireLatestImage",
        AImageReader_acquireLatestImage(reader, &mut image),
    )?;
    let image = AImageGuard(image);

    let (mut width, mut height) = (0, 0);
    media("AImage_getWidth", AImage_getWidth(image.0, &mut width))?;
    media("AImage_getHeight", AImage_getHeight(image.0, &mut height))?;

    let nv21 = read_nv21(image.0, width as usize, height as usize)?;
    drop(image);

    let frame = rotate_frame(decode_yuv420sp(&nv21, width as u32, height as u32), context.orientation);
    if let Ok(frames) = context.frames.lock() {
        let _ = frames.send(frame);
    }
    Ok(())
}

unsafe fn on_still_image(context: &CallbackContext, reader: *mut AImageReader) -> CameraResult<()> {
    let mut image = null_mut();
    media(
        "AImageReader_acquireNextImage",
        AImageReader_acquireNextImage(reader, &mut image),
    )?;
    let image = AImageGuard(image);
    let (data, _, _) = plane(image.0, 0)?;
    let jpeg = data.to_vec();
    drop(image);
    context.send_event(CameraEvent::PictureTaken(jpeg));
    Ok(())
}

unsafe extern "C" fn preview_image_available(context: *mut c_void, reader: *mut AImageReader) {
    let context = &*(context as *const CallbackContext);
    if let Err(err) = on_preview_image(context, reader) {
        debug!("Preview frame dropped: {err}");
    }
}

unsafe extern "C" fn still_image_available(context: *mut c_void, reader: *mut AImageReader) {
    let context = &*(context as *const CallbackContext);
    if let Err(err) = on_still_image(context, reader) {
        error!("Failed to read picture: {err}");
        context.send_event(CameraEvent::PictureFailed(err.to_string()));
    }
}

unsafe extern "C" fn capture_started(
    context: *mut c_void,
    _session: *mut ACameraCaptureSession,
    _request: *const ACaptureRequest,
    _timestamp: i64,
) {
    let context = &*(context as *const CallbackContext);
    if let Ok(pending) = context.pending.lock() {
        if let Pending::Picture(events) = &*pending {
            let _ = events.send(CameraEvent::Shutter);
        }
    }
}

unsafe extern "C" fn capture_completed(
    context: *mut c_void,
    _session: *mut ACameraCaptureSession,
    _request: *mut ACaptureRequest,
    result: *const ACameraMetadata,
) {
    let context = &*(context as *const CallbackContext);
    let af_state = entry_u8(result, acamera_metadata_tag::ACAMERA_CONTROL_AF_STATE)
        .first()
        .copied();
    let success = {
        let Ok(mut pending) = context.pending.lock() else {
            return;
        };
        let Pending::Focus { frames, .. } = &mut *pending else {
            return;
        };
        *frames += 1;
        match af_state {
            Some(AF_STATE_FOCUSED_LOCKED) => true,
            Some(AF_STATE_NOT_FOCUSED_LOCKED) => false,
            _ if *frames >= MAX_FOCUS_FRAMES => false,
            _ => return,
        }
    };
    context.send_event(CameraEvent::AutoFocus { success });
}

unsafe extern "C" fn capture_failed(
    context: *mut c_void,
    _session: *mut ACameraCaptureSession,
    _request: *mut ACaptureRequest,
    failure: *mut ACameraCaptureFailure,
) {
    let context = &*(context as *const CallbackContext);
    let reason = if failure.is_null() { -1 } else { (*failure).reason };
    let event = match context.pending.lock().as_deref() {
        Ok(Pending::Focus { .. }) => CameraEvent::AutoFocus { success: false },
        Ok(Pending::Picture(_)) => CameraEvent::PictureFailed(format!("capture failed (reason: {reason})")),
        _ => return,
    };
    warn!("Capture failed (reason: {reason})");
    context.send_event(event);
}

unsafe extern "C" fn session_on_ready(_context: *mut c_void, session: *mut ACameraCaptureSession) {
    debug!("Session is ready. {:?}", session);
}

unsafe extern "C" fn session_on_active(_context: *mut c_void, session: *mut ACameraCaptureSession) {
    debug!("Session is activated. {:?}", session);
}

unsafe extern "C" fn session_on_closed(_context: *mut c_void, session: *mut ACameraCaptureSession) {
    debug!("Session is closed. {:?}", session);
}

/// A capture session with a preview and a still output. Every pointer is
/// released in `Drop`, so a half-built session cleans up after itself.
struct Session {
    context: Box<CallbackContext>,
    preview_listener: Box<AImageReader_ImageListener>,
    still_listener: Box<AImageReader_ImageListener>,
    state_callbacks: Box<ACameraCaptureSession_stateCallbacks>,
    capture_callbacks: Box<ACameraCaptureSession_captureCallbacks>,
    preview_reader: *mut AImageReader,
    still_reader: *mut AImageReader,
    preview_target: *mut ACameraOutputTarget,
    still_target: *mut ACameraOutputTarget,
    preview_output: *mut ACaptureSessionOutput,
    still_output: *mut ACaptureSessionOutput,
    outputs: *mut ACaptureSessionOutputContainer,
    session: *mut ACameraCaptureSession,
    preview_request: *mut ACaptureRequest,
    still_request: *mut ACaptureRequest,
    repeating: bool,
}

impl Session {
    fn new(frames: Sender<RgbaImage>, orientation: i32) -> Self {
        let context = Box::new(CallbackContext {
            frames: Mutex::new(frames),
            pending: Mutex::new(Pending::Idle),
            orientation,
        });
        let context_ptr = &*context as *const CallbackContext as *mut c_void;

        let mut state_callbacks: Box<ACameraCaptureSession_stateCallbacks> =
            Box::new(unsafe { zeroed() });
        state_callbacks.onReady = Some(session_on_ready);
        state_callbacks.onActive = Some(session_on_active);
        state_callbacks.onClosed = Some(session_on_closed);

        let mut capture_callbacks: Box<ACameraCaptureSession_captureCallbacks> =
            Box::new(unsafe { zeroed() });
        capture_callbacks.context = context_ptr;
        capture_callbacks.onCaptureStarted = Some(capture_started);
        capture_callbacks.onCaptureCompleted = Some(capture_completed);
        capture_callbacks.onCaptureFailed = Some(capture_failed);

        Self {
            preview_listener: Box::new(AImageReader_ImageListener {
                context: context_ptr,
                onImageAvailable: Some(preview_image_available),
            }),
            still_listener: Box::new(AImageReader_ImageListener {
                context: context_ptr,
                onImageAvailable: Some(still_image_available),
            }),
            context,
            state_callbacks,
            capture_callbacks,
            preview_reader: null_mut(),
            still_reader: null_mut(),
            preview_target: null_mut(),
            still_target: null_mut(),
            preview_output: null_mut(),
            still_output: null_mut(),
            outputs: null_mut(),
            session: null_mut(),
            preview_request: null_mut(),
            still_request: null_mut(),
            repeating: false,
        }
    }

    unsafe fn create_reader(
        size: Size,
        format: AIMAGE_FORMATS,
        listener: &mut AImageReader_ImageListener,
        reader: &mut *mut AImageReader,
    ) -> CameraResult<*mut ANativeWindow> {
        media(
            "AImageReader_new",
            AImageReader_new(
                size.width as i32,
                size.height as i32,
                format.0 as i32,
                MAX_READER_IMAGES,
                reader,
            ),
        )?;
        media(
            "AImageReader_setImageListener",
            AImageReader_setImageListener(*reader, listener),
        )?;
        let mut window = null_mut();
        media("AImageReader_getWindow", AImageReader_getWindow(*reader, &mut window))?;
        Ok(window)
    }

    unsafe fn build(
        &mut self,
        device: *mut ACameraDevice,
        parameters: &Parameters,
        preview_size: Size,
        picture_size: Size,
    ) -> CameraResult<()> {
        let preview_window = Self::create_reader(
            preview_size,
            AIMAGE_FORMATS::AIMAGE_FORMAT_YUV_420_888,
            &mut self.preview_listener,
            &mut self.preview_reader,
        )?;
        let still_window = Self::create_reader(
            picture_size,
            AIMAGE_FORMATS::AIMAGE_FORMAT_JPEG,
            &mut self.still_listener,
            &mut self.still_reader,
        )?;

        status(
            "ACameraOutputTarget_create",
            ACameraOutputTarget_create(preview_window, &mut self.preview_target),
        )?;
        status(
            "ACameraOutputTarget_create",
            ACameraOutputTarget_create(still_window, &mut self.still_target),
        )?;
        status(
            "ACaptureSessionOutput_create",
            ACaptureSessionOutput_create(preview_window, &mut self.preview_output),
        )?;
        status(
            "ACaptureSessionOutput_create",
            ACaptureSessionOutput_create(still_window, &mut self.still_output),
        )?;
        status(
            "ACaptureSessionOutputContainer_create",
            ACaptureSessionOutputContainer_create(&mut self.outputs),
        )?;
        status(
            "ACaptureSessionOutputContainer_add",
            ACaptureSessionOutputContainer_add(self.outputs, self.preview_output),
        )?;
        status(
            "ACaptureSessionOutputContainer_add",
            ACaptureSessionOutputContainer_add(self.outputs, self.still_output),
        )?;
        status(
            "ACameraDevice_createCaptureSession",
            ACameraDevice_createCaptureSession(
                device,
                self.outputs,
                &*self.state_callbacks,
                &mut self.session,
            ),
        )?;

        status(
            "ACameraDevice_createCaptureRequest",
            ACameraDevice_createCaptureRequest(
                device,
                ACameraDevice_request_template::TEMPLATE_PREVIEW,
                &mut self.preview_request,
            ),
        )?;
        status(
            "ACaptureRequest_addTarget",
            ACaptureRequest_addTarget(self.preview_request, self.preview_target),
        )?;
        apply_controls(self.preview_request, parameters)?;

        status(
            "ACameraDevice_createCaptureRequest",
            ACameraDevice_createCaptureRequest(
                device,
                ACameraDevice_request_template::TEMPLATE_STILL_CAPTURE,
                &mut self.still_request,
            ),
        )?;
        status(
            "ACaptureRequest_addTarget",
            ACaptureRequest_addTarget(self.still_request, self.still_target),
        )?;
        apply_controls(self.still_request, parameters)?;
        let quality = parameters.jpeg_quality;
        status(
            "ACaptureRequest_setEntry_u8(JPEG_QUALITY)",
            ACaptureRequest_setEntry_u8(
                self.still_request,
                acamera_metadata_tag::ACAMERA_JPEG_QUALITY.0,
                1,
                &quality,
            ),
        )?;
        let orientation = self.context.orientation;
        status(
            "ACaptureRequest_setEntry_i32(JPEG_ORIENTATION)",
            ACaptureRequest_setEntry_i32(
                self.still_request,
                acamera_metadata_tag::ACAMERA_JPEG_ORIENTATION.0,
                1,
                &orientation,
            ),
        )?;
        Ok(())
    }

    unsafe fn start_repeating(&mut self) -> CameraResult<()> {
        status(
            "ACameraCaptureSession_setRepeatingRequest",
            ACameraCaptureSession_setRepeatingRequest(
                self.session,
                &mut *self.capture_callbacks,
                1,
                &mut self.preview_request,
                null_mut(),
            ),
        )?;
        self.repeating = true;
        Ok(())
    }

    unsafe fn stop_repeating(&mut self) -> CameraResult<()> {
        if self.repeating {
            self.repeating = false;
            status(
                "ACameraCaptureSession_stopRepeating",
                ACameraCaptureSession_stopRepeating(self.session),
            )?;
        }
        Ok(())
    }

    unsafe fn capture(&mut self, mut request: *mut ACaptureRequest) -> CameraResult<()> {
        status(
            "ACameraCaptureSession_capture",
            ACameraCaptureSession_capture(
                self.session,
                &mut *self.capture_callbacks,
                1,
                &mut request,
                null_mut(),
            ),
        )
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        unsafe {
            if !self.session.is_null() {
                let _ = self.stop_repeating();
                ACameraCaptureSession_close(self.session);
            }
            if !self.preview_request.is_null() {
                ACaptureRequest_free(self.preview_request);
            }
            if !self.still_request.is_null() {
                ACaptureRequest_free(self.still_request);
            }
            for target in [self.preview_target, self.still_target] {
                if !target.is_null() {
                    ACameraOutputTarget_free(target);
                }
            }
            if !self.outputs.is_null() {
                ACaptureSessionOutputContainer_free(self.outputs);
            }
            for output in [self.preview_output, self.still_output] {
                if !output.is_null() {
                    ACaptureSessionOutput_free(output);
                }
            }
            for reader in [self.preview_reader, self.still_reader] {
                if !reader.is_null() {
                    AImageReader_delete(reader);
                }
            }
        }
        self.context.cancel_pending();
        debug!("Capture session released");
    }
}

unsafe fn apply_controls(request: *mut ACaptureRequest, parameters: &Parameters) -> CameraResult<()> {
    if let Some(mode) = parameters.focus_mode {
        let af = af_mode(mode);
        status(
            "ACaptureRequest_setEntry_u8(AF_MODE)",
            ACaptureRequest_setEntry_u8(request, acamera_metadata_tag::ACAMERA_CONTROL_AF_MODE.0, 1, &af),
        )?;
    }
    if let Some(flash) = parameters.flash_mode {
        let ae = ae_mode(Some(flash));
        status(
            "ACaptureRequest_setEntry_u8(AE_MODE)",
            ACaptureRequest_setEntry_u8(request, acamera_metadata_tag::ACAMERA_CONTROL_AE_MODE.0, 1, &ae),
        )?;
        if flash == FlashMode::Torch {
            let torch = FLASH_MODE_TORCH;
            status(
                "ACaptureRequest_setEntry_u8(FLASH_MODE)",
                ACaptureRequest_setEntry_u8(request, acamera_metadata_tag::ACAMERA_FLASH_MODE.0, 1, &torch),
            )?;
        }
    }
    Ok(())
}

pub struct AndroidCameraHandle {
    id: CameraId,
    device: *mut ACameraDevice,
    _device_callbacks: Box<ACameraDevice_StateCallbacks>,
    capabilities: Capabilities,
    parameters: Parameters,
    sensor_orientation: i32,
    session: Option<Session>,
}

impl AndroidCameraHandle {
    fn session_mut(&mut self) -> CameraResult<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| CameraError::Capture("preview is not running".into()))
    }

    fn close(&mut self) {
        self.session = None;
        if !self.device.is_null() {
            let camera_status = unsafe { ACameraDevice_close(self.device) };
            if camera_status != camera_status_t::ACAMERA_OK {
                error!("Failed to close CameraDevice.");
            }
            self.device = null_mut();
            info!("Close Camera {}", self.id);
        }
    }
}

impl CameraHandle for AndroidCameraHandle {
    fn id(&self) -> CameraId {
        self.id
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn parameters(&self) -> Parameters {
        self.parameters.clone()
    }

    fn set_parameters(&mut self, parameters: Parameters) -> CameraResult<()> {
        if self.session.as_ref().is_some_and(|s| s.repeating) {
            return Err(CameraError::Preview(
                "parameters changed while the preview is running".into(),
            ));
        }
        // an idle session was built for the old sizes
        self.session = None;
        self.parameters = parameters;
        Ok(())
    }

    fn start_preview(&mut self, surface: &PreviewSurface) -> CameraResult<()> {
        if let Some(session) = self.session.as_mut() {
            if let Ok(mut frames) = session.context.frames.lock() {
                *frames = surface.sender();
            }
            return unsafe { session.start_repeating() }
                .map_err(|err| CameraError::Preview(err.to_string()));
        }

        let preview_size = self
            .parameters
            .preview_size
            .or_else(|| self.capabilities.preview_sizes.first().copied())
            .ok_or_else(|| CameraError::Preview("no preview size".into()))?;
        let picture_size = self
            .parameters
            .picture_size
            .or_else(|| self.capabilities.picture_sizes.first().copied())
            .unwrap_or(preview_size);

        let mut session = Session::new(surface.sender(), self.sensor_orientation);
        unsafe {
            session
                .build(self.device, &self.parameters, preview_size, picture_size)
                .and_then(|_| session.start_repeating())
                .map_err(|err| CameraError::Preview(err.to_string()))?;
        }
        info!("Preview {preview_size} started, pictures {picture_size}");
        self.session = Some(session);
        Ok(())
    }

    fn stop_preview(&mut self) -> CameraResult<()> {
        self.session = None;
        Ok(())
    }

    fn auto_focus(&mut self, events: Sender<CameraEvent>) -> CameraResult<()> {
        let device = self.device;
        let focus = af_mode(self.parameters.focus_mode.unwrap_or(FocusMode::Auto));
        let session = self.session_mut()?;
        if let Ok(mut pending) = session.context.pending.lock() {
            *pending = Pending::Focus { events, frames: 0 };
        }
        unsafe {
            let mut request = null_mut();
            status(
                "ACameraDevice_createCaptureRequest",
                ACameraDevice_createCaptureRequest(
                    device,
                    ACameraDevice_request_template::TEMPLATE_PREVIEW,
                    &mut request,
                ),
            )?;
            let trigger = AF_TRIGGER_START;
            let result = status(
                "ACaptureRequest_addTarget",
                ACaptureRequest_addTarget(request, session.preview_target),
            )
            .and_then(|_| {
                status(
                    "ACaptureRequest_setEntry_u8(AF_MODE)",
                    ACaptureRequest_setEntry_u8(
                        request,
                        acamera_metadata_tag::ACAMERA_CONTROL_AF_MODE.0,
                        1,
                        &focus,
                    ),
                )
            })
            .and_then(|_| {
                status(
                    "ACaptureRequest_setEntry_u8(AF_TRIGGER)",
                    ACaptureRequest_setEntry_u8(
                        request,
                        acamera_metadata_tag::ACAMERA_CONTROL_AF_TRIGGER.0,
                        1,
                        &trigger,
                    ),
                )
            })
            .and_then(|_| session.capture(request));
            ACaptureRequest_free(request);
            if result.is_err() {
                if let Ok(mut pending) = session.context.pending.lock() {
                    *pending = Pending::Idle;
                }
            }
            result
        }
    }

    fn take_picture(&mut self, events: Sender<CameraEvent>) -> CameraResult<()> {
        let session = self.session_mut()?;
        if let Ok(mut pending) = session.context.pending.lock() {
            *pending = Pending::Picture(events);
        }
        unsafe {
            let request = session.still_request;
            let result = session
                .stop_repeating()
                .and_then(|_| session.capture(request))
                .map_err(|err| CameraError::Capture(err.to_string()));
            if result.is_err() {
                if let Ok(mut pending) = session.context.pending.lock() {
                    *pending = Pending::Idle;
                }
            }
            result
        }
    }

    fn release(mut self: Box<Self>) -> CameraResult<()> {
        self.close();
        Ok(())
    }
}

impl Drop for AndroidCameraHandle {
    fn drop(&mut self) {
        self.close();
    }
}
