//! The camera screen: owns the camera handle and the preview surface, and
//! turns button presses and lifecycle callbacks into camera calls.
//!
//! Nothing here talks to the UI toolkit. Feedback is queued as [`UiEvent`]s
//! which the window drains after every interaction.

use std::{
    path::PathBuf,
    sync::mpsc::{channel, Receiver, Sender},
};

use log::{debug, error};

use crate::{
    camera::{
        CameraError, CameraEvent, CameraHandle, CameraId, CameraService, Capabilities,
        FlashMode, FocusMode, Parameters, PictureFormat, PreviewSurface, Size,
    },
    config::CameraConfig,
    helper,
    permission::PermissionGate,
    storage::PhotoStore,
};

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Toast(String),
    Status(CameraId),
    PhotoSaved(PathBuf),
    /// The screen cannot continue and should be closed.
    Finish,
}

pub struct CameraScreen {
    service: Box<dyn CameraService>,
    config: CameraConfig,
    store: PhotoStore,
    camera: Option<Box<dyn CameraHandle>>,
    surface: Option<PreviewSurface>,
    current_camera_id: CameraId,
    is_preview_running: bool,
    is_picture_taking: bool,
    awaiting_permission: bool,
    /// The surface changed while a picture was in flight.
    reconfigure_after_capture: bool,
    events_tx: Sender<CameraEvent>,
    events_rx: Receiver<CameraEvent>,
    outbox: Vec<UiEvent>,
}

impl CameraScreen {
    pub fn new(service: Box<dyn CameraService>, store: PhotoStore, config: CameraConfig) -> Self {
        let (events_tx, events_rx) = channel();
        Self {
            service,
            current_camera_id: config.default_camera_id,
            config,
            store,
            camera: None,
            surface: None,
            is_preview_running: false,
            is_picture_taking: false,
            awaiting_permission: false,
            reconfigure_after_capture: false,
            events_tx,
            events_rx,
            outbox: vec![],
        }
    }

    pub fn current_camera_id(&self) -> CameraId {
        self.current_camera_id
    }

    pub fn has_camera(&self) -> bool {
        self.camera.is_some()
    }

    pub fn is_preview_running(&self) -> bool {
        self.is_preview_running
    }

    pub fn is_picture_taking(&self) -> bool {
        self.is_picture_taking
    }

    pub fn awaiting_permission(&self) -> bool {
        self.awaiting_permission
    }

    pub fn take_ui_events(&mut self) -> Vec<UiEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn toast(&mut self, message: impl Into<String>) {
        self.outbox.push(UiEvent::Toast(message.into()));
    }

    fn finish(&mut self) {
        self.outbox.push(UiEvent::Finish);
    }

    fn update_camera_status(&mut self) {
        self.outbox.push(UiEvent::Status(self.current_camera_id));
    }

    pub fn on_create(&mut self, permissions: &dyn PermissionGate) {
        self.update_camera_status();
        match permissions.is_granted() {
            Ok(true) => self.init_camera(),
            Ok(false) => self.request_permission(permissions),
            Err(err) => {
                error!("Permission check failed: {err:#}");
                self.request_permission(permissions);
            }
        }
    }

    fn request_permission(&mut self, permissions: &dyn PermissionGate) {
        match permissions.request() {
            Ok(()) => self.awaiting_permission = true,
            Err(err) => {
                error!("Permission request failed: {err:#}");
                self.on_permission_result(false);
            }
        }
    }

    pub fn on_permission_result(&mut self, granted: bool) {
        self.awaiting_permission = false;
        if granted {
            self.init_camera();
        } else {
            self.toast("Camera permission is required to use this feature");
            self.finish();
        }
    }

    fn init_camera(&mut self) {
        self.release_camera();
        let id = self.config.default_camera_id;
        if !helper::is_camera_available(self.service.as_ref(), id) {
            self.toast(format!("Camera {id} is not available"));
            self.finish();
            return;
        }

        match self.service.open(id) {
            Ok(camera) => {
                helper::log_camera_capabilities(camera.as_ref());
                self.camera = Some(camera);
                self.current_camera_id = id;
                self.update_camera_status();
                debug!("Camera opened, id: {id}");
                debug!(
                    "Number of cameras: {}",
                    helper::number_of_cameras(self.service.as_ref())
                );
                if self.surface.is_some() {
                    self.start_camera_preview();
                }
            }
            Err(err) => {
                error!("Failed to open camera: {err}");
                self.toast(format!("Failed to open camera: {err}"));
                self.finish();
            }
        }
    }

    pub fn switch_camera(&mut self) {
        let number_of_cameras = helper::number_of_cameras(self.service.as_ref());
        if number_of_cameras <= 1 {
            self.toast("Only one camera available");
            return;
        }

        self.release_camera();
        self.current_camera_id = (self.current_camera_id + 1) % number_of_cameras;

        if !helper::is_camera_available(self.service.as_ref(), self.current_camera_id) {
            self.toast(format!("Camera {} is not available", self.current_camera_id));
            self.current_camera_id =
                (self.current_camera_id + number_of_cameras - 1) % number_of_cameras;
            match self.service.open(self.current_camera_id) {
                Ok(camera) => {
                    self.camera = Some(camera);
                    self.start_camera_preview();
                }
                Err(err) => {
                    error!("Failed to reopen camera {}: {err}", self.current_camera_id);
                    self.toast(format!("Failed to reopen camera {}", self.current_camera_id));
                }
            }
            return;
        }

        match self.service.open(self.current_camera_id) {
            Ok(camera) => {
                self.camera = Some(camera);
                self.update_camera_status();
                self.start_camera_preview();
                self.toast(format!("Switched to camera {}", self.current_camera_id));
                debug!("Switched to camera id: {}", self.current_camera_id);
                if let Some(camera) = self.camera.as_deref() {
                    helper::log_camera_capabilities(camera);
                }
            }
            Err(err) => {
                error!("Failed to switch camera: {err}");
                self.toast("Failed to switch camera");
            }
        }
    }

    pub fn capture_photo(&mut self) {
        if self.is_picture_taking {
            debug!("Picture in progress, please wait...");
            return;
        }

        if !self.is_preview_running {
            error!("Preview is not running, cannot take a picture");
            self.toast("Camera preview is not ready");
            return;
        }

        let Some(camera) = self.camera.as_mut() else {
            error!("Camera is not initialized");
            self.toast("Camera is not initialized");
            return;
        };

        self.is_picture_taking = true;
        debug!("Taking picture...");

        if camera.capabilities().supports_focus(FocusMode::Auto) {
            if let Err(err) = camera.auto_focus(self.events_tx.clone()) {
                error!("Failed to prepare capture: {err}");
                self.toast(format!("Failed to prepare capture: {err}"));
                self.is_picture_taking = false;
            }
        } else {
            self.take_picture_internal();
        }
    }

    fn take_picture_internal(&mut self) {
        let Some(camera) = self.camera.as_mut() else {
            self.is_picture_taking = false;
            return;
        };
        match camera.take_picture(self.events_tx.clone()) {
            Ok(()) => self.is_preview_running = false,
            Err(err) => {
                error!("Failed to take picture: {err}");
                self.toast(format!("Failed to take picture: {err}"));
                self.is_picture_taking = false;
                self.restart_preview();
            }
        }
    }

    /// Delivers pending camera callbacks. Called from the UI thread.
    pub fn pump(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.on_camera_event(event);
        }
    }

    fn on_camera_event(&mut self, event: CameraEvent) {
        match event {
            CameraEvent::Shutter => debug!("Shutter"),
            CameraEvent::AutoFocus { success } => {
                debug!("Auto focus {}", if success { "succeeded" } else { "failed" });
                if self.is_picture_taking {
                    self.take_picture_internal();
                } else {
                    debug!("Auto focus result after capture was cancelled");
                }
            }
            CameraEvent::PictureTaken(data) => self.on_picture_taken(data),
            CameraEvent::PictureFailed(reason) if !self.is_picture_taking => {
                debug!("Capture failure after the camera was released: {reason}");
            }
            CameraEvent::PictureFailed(reason) => {
                error!("Failed to take picture: {reason}");
                self.toast(format!("Failed to take picture: {reason}"));
                self.is_picture_taking = false;
                self.restart_preview();
            }
        }
    }

    fn on_picture_taken(&mut self, data: Vec<u8>) {
        debug!("Picture taken, size: {} bytes", data.len());

        let message = match self.save_photo_to_file(&data) {
            Some(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.outbox.push(UiEvent::PhotoSaved(path));
                format!("Photo saved: {name}")
            }
            None => format!("Photo captured ({} bytes)", data.len()),
        };
        self.toast(message);

        self.is_preview_running = false;
        self.restart_preview();
        self.is_picture_taking = false;
    }

    fn save_photo_to_file(&self, data: &[u8]) -> Option<PathBuf> {
        match self.store.save(data) {
            Ok(path) => Some(path),
            Err(err) => {
                error!("Failed to save photo: {err:#}");
                None
            }
        }
    }

    fn restart_preview(&mut self) {
        if std::mem::take(&mut self.reconfigure_after_capture) {
            self.start_camera_preview();
            return;
        }
        let (Some(camera), Some(surface)) = (self.camera.as_mut(), self.surface.as_ref()) else {
            return;
        };
        match camera.start_preview(surface) {
            Ok(()) => {
                self.is_preview_running = true;
                debug!("Preview restarted after capture");
            }
            Err(err) => error!("Failed to restart preview after capture: {err}"),
        }
    }

    pub fn surface_created(&mut self, surface: PreviewSurface) {
        debug!("Surface created");
        self.surface = Some(surface);
        self.start_camera_preview();
    }

    pub fn surface_changed(&mut self, size: Size) {
        debug!("Surface changed: {size}");
        if let Some(surface) = self.surface.as_mut() {
            surface.set_size(size);
        }
        // reconfiguring now would tear down the session the picture is coming from
        if self.is_picture_taking {
            debug!("Capture in progress, preview reconfigures afterwards");
            self.reconfigure_after_capture = true;
            return;
        }
        self.stop_camera_preview();
        self.start_camera_preview();
    }

    pub fn surface_destroyed(&mut self) {
        debug!("Surface destroyed");
        self.reconfigure_after_capture = false;
        self.stop_camera_preview();
        self.surface = None;
    }

    fn start_camera_preview(&mut self) {
        if self.is_preview_running {
            self.stop_camera_preview();
        }
        let (Some(camera), Some(surface)) = (self.camera.as_mut(), self.surface.as_ref()) else {
            return;
        };

        let parameters = preview_parameters(
            camera.capabilities(),
            camera.parameters(),
            surface.size(),
            &self.config,
        );
        let result = camera
            .set_parameters(parameters)
            .and_then(|_| camera.start_preview(surface));

        match result {
            Ok(()) => {
                self.is_preview_running = true;
                debug!("Camera preview started");
            }
            Err(err @ CameraError::Preview(_)) => {
                error!("Failed to set up camera preview: {err}");
                self.toast("Camera preview failed");
                self.is_preview_running = false;
            }
            Err(err) => {
                error!("Camera preview error: {err}");
                self.toast("Camera preview error");
                self.is_preview_running = false;
            }
        }
    }

    fn stop_camera_preview(&mut self) {
        let Some(camera) = self.camera.as_mut() else {
            return;
        };
        if !self.is_preview_running {
            debug!("Preview already stopped");
            return;
        }
        match camera.stop_preview() {
            Ok(()) => {
                self.is_preview_running = false;
                debug!("Camera preview stopped");
            }
            Err(err) => error!("Failed to stop camera preview: {err}"),
        }
    }

    pub fn on_pause(&mut self) {
        self.release_camera();
    }

    /// Reopens the camera released by [`on_pause`](Self::on_pause).
    pub fn on_resume(&mut self) {
        if self.awaiting_permission || self.camera.is_some() {
            return;
        }
        let id = self.current_camera_id;
        match self.service.open(id) {
            Ok(camera) => {
                debug!("Camera {id} reopened on resume");
                self.camera = Some(camera);
                self.update_camera_status();
                if self.surface.is_some() {
                    self.start_camera_preview();
                }
            }
            Err(err) => {
                error!("Failed to open camera: {err}");
                self.toast(format!("Failed to open camera: {err}"));
                self.finish();
            }
        }
    }

    pub fn on_destroy(&mut self) {
        self.release_camera();
    }

    fn release_camera(&mut self) {
        let Some(mut camera) = self.camera.take() else {
            return;
        };
        self.is_picture_taking = false;
        self.reconfigure_after_capture = false;
        if self.is_preview_running {
            if let Err(err) = camera.stop_preview() {
                error!("Failed to stop preview before release: {err}");
            }
            self.is_preview_running = false;
        }
        match camera.release() {
            Ok(()) => debug!("Camera released"),
            Err(err) => error!("Failed to release camera: {err}"),
        }
    }
}

impl Drop for CameraScreen {
    fn drop(&mut self) {
        self.release_camera();
    }
}

/// Parameters for the next preview, derived from what the camera supports.
pub fn preview_parameters(
    caps: &Capabilities,
    current: Parameters,
    surface_size: Option<Size>,
    config: &CameraConfig,
) -> Parameters {
    let mut parameters = current;
    let target = surface_size.unwrap_or(config.preview_request);

    if let Some(size) = helper::best_preview_size(&caps.preview_sizes, target.width, target.height)
    {
        parameters.preview_size = Some(size);
        debug!("Preview size: {size}");
    }

    if let Some(size) = caps.picture_sizes.iter().max_by_key(|s| s.area()) {
        parameters.picture_size = Some(*size);
        debug!("Picture size: {size}");
    }

    parameters.picture_format = PictureFormat::Jpeg;
    parameters.jpeg_quality = config.jpeg_quality;

    if caps.supports_focus(FocusMode::ContinuousPicture) {
        parameters.focus_mode = Some(FocusMode::ContinuousPicture);
        debug!("Focus mode: continuous picture");
    } else if caps.supports_focus(FocusMode::Auto) {
        parameters.focus_mode = Some(FocusMode::Auto);
        debug!("Focus mode: auto");
    }

    if caps.supports_flash(FlashMode::Auto) {
        parameters.flash_mode = Some(FlashMode::Auto);
        debug!("Flash mode: auto");
    }

    parameters
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, collections::VecDeque, fs, sync::mpsc::Receiver};

    use anyhow::anyhow;
    use image::RgbaImage;
    use tempfile::TempDir;

    use super::*;
    use crate::camera::fake::{FakeCamera, FakeService};

    struct Permissions {
        granted: bool,
        requests: Cell<usize>,
        fail_request: bool,
    }

    impl Permissions {
        fn granted() -> Self {
            Self { granted: true, requests: Cell::new(0), fail_request: false }
        }

        fn missing() -> Self {
            Self { granted: false, ..Self::granted() }
        }
    }

    impl PermissionGate for Permissions {
        fn is_granted(&self) -> anyhow::Result<bool> {
            Ok(self.granted)
        }

        fn request(&self) -> anyhow::Result<()> {
            self.requests.set(self.requests.get() + 1);
            if self.fail_request {
                return Err(anyhow!("no activity"));
            }
            Ok(())
        }
    }

    struct Harness {
        service: FakeService,
        screen: CameraScreen,
        frames: Receiver<RgbaImage>,
        pictures: TempDir,
    }

    impl Harness {
        fn new(cameras: Vec<FakeCamera>) -> Self {
            let pictures = tempfile::tempdir().unwrap();
            Self::with_pictures_root(cameras, pictures.path().to_path_buf(), pictures)
        }

        fn with_pictures_root(cameras: Vec<FakeCamera>, root: PathBuf, pictures: TempDir) -> Self {
            let service = FakeService::new(cameras);
            let config = CameraConfig::default();
            let store = PhotoStore::new(root, &config);
            let screen = CameraScreen::new(Box::new(service.clone()), store, config);
            let (tx, frames) = std::sync::mpsc::channel();
            let mut harness = Self { service, screen, frames, pictures };
            harness.screen.on_create(&Permissions::granted());
            harness
                .screen
                .surface_created(PreviewSurface::new(tx).with_size(Size::new(1280, 720)));
            harness
        }

        fn deliver(&mut self) {
            self.service.fire_callbacks();
            self.screen.pump();
        }

        fn toasts(&mut self) -> Vec<String> {
            self.screen
                .take_ui_events()
                .into_iter()
                .filter_map(|e| match e {
                    UiEvent::Toast(msg) => Some(msg),
                    _ => None,
                })
                .collect()
        }

        fn assert_flags_match_handle(&self) {
            let state = self.service.state.borrow();
            assert_eq!(self.screen.is_preview_running(), state.preview_running);
            if self.screen.is_preview_running() || self.screen.is_picture_taking() {
                assert!(self.screen.has_camera());
            }
            assert_eq!(state.open_handles, usize::from(self.screen.has_camera()));
            assert!(state.max_open_handles <= 1);
        }
    }

    #[test]
    fn create_opens_default_camera_and_starts_preview() {
        let mut h = Harness::new(vec![FakeCamera::new(), FakeCamera::new()]);
        assert!(h.screen.has_camera());
        assert!(h.screen.is_preview_running());
        assert!(h.frames.try_recv().is_ok());
        let events = h.screen.take_ui_events();
        assert_eq!(events, vec![UiEvent::Status(0), UiEvent::Status(0)]);

        let applied = h.service.state.borrow().applied.last().cloned().unwrap();
        assert_eq!(applied.preview_size, Some(Size::new(1280, 720)));
        assert_eq!(applied.picture_size, Some(Size::new(4000, 3000)));
        assert_eq!(applied.focus_mode, Some(FocusMode::ContinuousPicture));
        assert_eq!(applied.flash_mode, Some(FlashMode::Auto));
        assert_eq!(applied.jpeg_quality, 90);
        h.assert_flags_match_handle();
    }

    #[test]
    fn switch_cycles_through_cameras() {
        let mut h = Harness::new(vec![FakeCamera::new(), FakeCamera::new(), FakeCamera::new()]);
        h.screen.take_ui_events();
        for expected in [1, 2, 0, 1] {
            h.screen.switch_camera();
            assert_eq!(h.screen.current_camera_id(), expected);
            assert!(h.screen.is_preview_running());
            let events = h.screen.take_ui_events();
            assert!(events.contains(&UiEvent::Status(expected)));
            assert!(events.contains(&UiEvent::Toast(format!("Switched to camera {expected}"))));
            h.assert_flags_match_handle();
        }
    }

    #[test]
    fn unavailable_camera_reverts_to_previous() {
        let mut h = Harness::new(vec![FakeCamera::new(), FakeCamera::unavailable()]);
        h.screen.take_ui_events();
        h.screen.switch_camera();
        assert_eq!(h.screen.current_camera_id(), 0);
        assert!(h.screen.has_camera());
        assert!(h.screen.is_preview_running());
        assert_eq!(h.toasts(), vec!["Camera 1 is not available".to_string()]);
        assert_eq!(h.service.state.borrow().opened.last(), Some(&0));
        h.assert_flags_match_handle();
    }

    #[test]
    fn single_camera_does_not_switch() {
        let mut h = Harness::new(vec![FakeCamera::new()]);
        h.screen.take_ui_events();
        h.screen.switch_camera();
        assert_eq!(h.screen.current_camera_id(), 0);
        assert_eq!(h.toasts(), vec!["Only one camera available".to_string()]);
        assert!(h.screen.is_preview_running());
    }

    #[test]
    fn capture_with_autofocus_saves_photo() {
        let mut h = Harness::new(vec![FakeCamera::new()]);
        h.screen.take_ui_events();

        h.screen.capture_photo();
        assert!(h.screen.is_picture_taking());
        // autofocus callback, then shutter + picture callbacks
        h.deliver();
        assert!(h.screen.is_picture_taking());
        assert!(!h.screen.is_preview_running());
        h.deliver();

        assert!(!h.screen.is_picture_taking());
        assert!(h.screen.is_preview_running());
        let events = h.screen.take_ui_events();
        let saved = events
            .iter()
            .find_map(|e| match e {
                UiEvent::PhotoSaved(path) => Some(path.clone()),
                _ => None,
            })
            .expect("photo saved");
        assert!(saved.starts_with(h.pictures.path().join("INMO_Camera")));
        assert_eq!(fs::read(&saved).unwrap(), vec![0xff, 0xd8, 0xff, 0xd9]);
        let name = saved.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("INMO_AIR3_") && name.ends_with(".jpg"));
        assert!(events.contains(&UiEvent::Toast(format!("Photo saved: {name}"))));
        h.assert_flags_match_handle();
    }

    #[test]
    fn capture_without_autofocus_takes_picture_directly() {
        let mut h = Harness::new(vec![FakeCamera::new().without_autofocus()]);
        h.screen.take_ui_events();
        h.screen.capture_photo();
        assert!(!h.screen.is_preview_running());
        h.deliver();
        assert!(!h.screen.is_picture_taking());
        assert!(h.screen.is_preview_running());
        assert!(h.toasts().iter().any(|t| t.starts_with("Photo saved: INMO_AIR3_")));
    }

    #[test]
    fn save_failure_reports_captured_size() {
        let pictures = tempfile::tempdir().unwrap();
        let blocker = pictures.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        let mut h =
            Harness::with_pictures_root(vec![FakeCamera::new().without_autofocus()], blocker, pictures);
        h.screen.take_ui_events();

        h.screen.capture_photo();
        h.deliver();
        assert_eq!(h.toasts(), vec!["Photo captured (4 bytes)".to_string()]);
        assert!(h.screen.is_preview_running());
        assert!(!h.screen.is_picture_taking());
    }

    #[test]
    fn second_capture_is_ignored_while_taking() {
        let mut h = Harness::new(vec![FakeCamera::new()]);
        h.screen.take_ui_events();
        h.screen.capture_photo();
        h.screen.capture_photo();
        assert_eq!(h.service.state.borrow().pending.len(), 1);
        assert!(h.toasts().is_empty());
    }

    #[test]
    fn capture_needs_running_preview() {
        let mut h = Harness::new(vec![FakeCamera::new()]);
        h.screen.surface_destroyed();
        h.screen.take_ui_events();
        h.screen.capture_photo();
        assert!(!h.screen.is_picture_taking());
        assert_eq!(h.toasts(), vec!["Camera preview is not ready".to_string()]);
        h.assert_flags_match_handle();
    }

    #[test]
    fn take_picture_error_restarts_preview() {
        let mut h = Harness::new(vec![FakeCamera::new().without_autofocus()]);
        h.service.state.borrow_mut().fail_take_picture = true;
        h.screen.take_ui_events();
        h.screen.capture_photo();
        assert!(!h.screen.is_picture_taking());
        assert!(h.screen.is_preview_running());
        assert_eq!(
            h.toasts(),
            vec!["Failed to take picture: capture error: shutter jammed".to_string()]
        );
        h.assert_flags_match_handle();
    }

    #[test]
    fn picture_failure_event_restarts_preview() {
        let mut h = Harness::new(vec![FakeCamera::new().without_autofocus()]);
        h.service.state.borrow_mut().picture_error = Some("sensor timeout".into());
        h.screen.take_ui_events();
        h.screen.capture_photo();
        h.deliver();
        assert!(!h.screen.is_picture_taking());
        assert!(h.screen.is_preview_running());
        assert_eq!(h.toasts(), vec!["Failed to take picture: sensor timeout".to_string()]);
    }

    #[test]
    fn pause_releases_camera_and_clears_flags() {
        let mut h = Harness::new(vec![FakeCamera::new()]);
        h.screen.capture_photo();
        h.screen.on_pause();
        assert!(!h.screen.has_camera());
        assert!(!h.screen.is_picture_taking());
        assert!(!h.screen.is_preview_running());
        h.assert_flags_match_handle();

        // late autofocus callback after release does nothing
        h.deliver();
        assert!(!h.screen.is_picture_taking());
        assert_eq!(h.service.state.borrow().open_handles, 0);
    }

    #[test]
    fn capture_cancelled_by_release_is_not_reported() {
        let mut h = Harness::new(vec![FakeCamera::new().without_autofocus()]);
        h.screen.capture_photo();
        h.screen.on_pause();
        h.screen.take_ui_events();

        let _ = h
            .screen
            .events_tx
            .send(CameraEvent::PictureFailed("capture session closed".into()));
        h.screen.pump();
        assert!(h.toasts().is_empty());
        assert!(!h.screen.is_picture_taking());
    }

    #[test]
    fn drop_releases_camera() {
        let h = Harness::new(vec![FakeCamera::new()]);
        let state = h.service.state.clone();
        drop(h);
        assert_eq!(state.borrow().open_handles, 0);
        assert!(!state.borrow().preview_running);
    }

    #[test]
    fn preview_failure_is_reported() {
        let mut h = Harness::new(vec![FakeCamera::new(), FakeCamera::new()]);
        h.service.state.borrow_mut().fail_preview = true;
        h.screen.take_ui_events();
        h.screen.switch_camera();
        assert!(h.screen.has_camera());
        assert!(!h.screen.is_preview_running());
        assert!(h.toasts().contains(&"Camera preview failed".to_string()));
        h.assert_flags_match_handle();
    }

    #[test]
    fn surface_change_restarts_preview_with_new_size() {
        let mut h = Harness::new(vec![FakeCamera::new()]);
        let starts = h.service.state.borrow().preview_starts;
        h.screen.surface_changed(Size::new(800, 600));
        assert!(h.screen.is_preview_running());
        let state = h.service.state.borrow();
        assert_eq!(state.preview_starts, starts + 1);
        assert_eq!(state.applied.last().unwrap().preview_size, Some(Size::new(640, 480)));
    }

    #[test]
    fn missing_permission_waits_for_result() {
        let service = FakeService::new(vec![FakeCamera::new()]);
        let config = CameraConfig::default();
        let store = PhotoStore::new(std::env::temp_dir(), &config);
        let mut screen = CameraScreen::new(Box::new(service.clone()), store, config);
        let permissions = Permissions::missing();
        screen.on_create(&permissions);
        assert_eq!(permissions.requests.get(), 1);
        assert!(screen.awaiting_permission());
        assert!(!screen.has_camera());

        screen.on_permission_result(true);
        assert!(!screen.awaiting_permission());
        assert!(screen.has_camera());
    }

    #[test]
    fn denied_permission_finishes() {
        let service = FakeService::new(vec![FakeCamera::new()]);
        let config = CameraConfig::default();
        let store = PhotoStore::new(std::env::temp_dir(), &config);
        let mut screen = CameraScreen::new(Box::new(service), store, config);
        let permissions = Permissions { fail_request: true, ..Permissions::missing() };
        screen.on_create(&permissions);
        let events = screen.take_ui_events();
        assert!(events.contains(&UiEvent::Finish));
        assert!(events.contains(&UiEvent::Toast(
            "Camera permission is required to use this feature".into()
        )));
        assert!(!screen.has_camera());
    }

    #[test]
    fn unavailable_default_camera_finishes() {
        let service = FakeService::new(vec![FakeCamera::unavailable(), FakeCamera::new()]);
        let config = CameraConfig::default();
        let store = PhotoStore::new(std::env::temp_dir(), &config);
        let mut screen = CameraScreen::new(Box::new(service.clone()), store, config);
        screen.on_create(&Permissions::granted());
        let events = screen.take_ui_events();
        assert!(events.contains(&UiEvent::Toast("Camera 0 is not available".into())));
        assert!(events.contains(&UiEvent::Finish));
        assert_eq!(service.state.borrow().open_handles, 0);
    }

    #[test]
    fn switch_open_failure_leaves_no_camera() {
        let mut h = Harness::new(vec![FakeCamera::new(), FakeCamera::new()]);
        h.screen.take_ui_events();
        // the availability check passes, the real open does not
        h.service.state.borrow_mut().fail_opens = VecDeque::from([false, true]);
        h.screen.switch_camera();
        assert_eq!(h.toasts(), vec!["Failed to switch camera".to_string()]);
        assert!(!h.screen.has_camera());
        assert!(!h.screen.is_preview_running());
        h.assert_flags_match_handle();
    }

    #[test]
    fn failed_reopen_after_unavailable_switch_is_reported() {
        let mut h = Harness::new(vec![FakeCamera::new(), FakeCamera::unavailable()]);
        h.screen.take_ui_events();
        h.service.state.borrow_mut().fail_opens = VecDeque::from([false, true]);
        h.screen.switch_camera();
        assert_eq!(
            h.toasts(),
            vec![
                "Camera 1 is not available".to_string(),
                "Failed to reopen camera 0".to_string(),
            ]
        );
        assert_eq!(h.screen.current_camera_id(), 0);
        assert!(!h.screen.has_camera());
        h.assert_flags_match_handle();
    }

    #[test]
    fn surface_change_during_capture_waits_for_the_picture() {
        let mut h = Harness::new(vec![FakeCamera::new().without_autofocus()]);
        h.service.state.borrow_mut().drop_pending_on_reconfigure = true;
        h.screen.take_ui_events();

        h.screen.capture_photo();
        h.screen.surface_changed(Size::new(800, 600));
        assert_eq!(h.service.state.borrow().pending.len(), 2);

        h.deliver();
        assert!(!h.screen.is_picture_taking());
        assert!(h.screen.is_preview_running());
        assert!(h.toasts().iter().any(|t| t.starts_with("Photo saved: ")));
        assert_eq!(
            h.service.state.borrow().applied.last().unwrap().preview_size,
            Some(Size::new(640, 480))
        );
        h.assert_flags_match_handle();

        h.screen.capture_photo();
        assert!(h.screen.is_picture_taking());
        h.deliver();
        assert!(!h.screen.is_picture_taking());
        assert!(h.toasts().iter().any(|t| t.starts_with("Photo saved: ")));
    }

    #[test]
    fn surface_change_during_autofocus_keeps_the_capture() {
        let mut h = Harness::new(vec![FakeCamera::new()]);
        h.service.state.borrow_mut().drop_pending_on_reconfigure = true;
        h.screen.take_ui_events();

        h.screen.capture_photo();
        h.screen.surface_changed(Size::new(800, 600));
        assert!(h.screen.is_preview_running());
        // autofocus, then shutter + picture
        h.deliver();
        h.deliver();

        assert!(!h.screen.is_picture_taking());
        assert!(h.screen.is_preview_running());
        assert!(h.toasts().iter().any(|t| t.starts_with("Photo saved: ")));
        assert_eq!(
            h.service.state.borrow().applied.last().unwrap().preview_size,
            Some(Size::new(640, 480))
        );
        h.assert_flags_match_handle();
    }

    #[test]
    fn resume_reopens_the_camera_released_on_pause() {
        let mut h = Harness::new(vec![FakeCamera::new(), FakeCamera::new()]);
        h.screen.switch_camera();
        h.screen.on_pause();
        assert!(!h.screen.has_camera());
        h.screen.take_ui_events();

        h.screen.on_resume();
        assert!(h.screen.has_camera());
        assert!(h.screen.is_preview_running());
        assert_eq!(h.screen.current_camera_id(), 1);
        assert_eq!(h.service.state.borrow().opened.last(), Some(&1));
        assert_eq!(h.screen.take_ui_events(), vec![UiEvent::Status(1)]);
        h.assert_flags_match_handle();

        // no pause, nothing to reopen
        let opens = h.service.state.borrow().opened.len();
        h.screen.on_resume();
        assert_eq!(h.service.state.borrow().opened.len(), opens);
    }

    #[test]
    fn resume_open_failure_finishes() {
        let mut h = Harness::new(vec![FakeCamera::new()]);
        h.screen.on_pause();
        h.screen.take_ui_events();
        h.service.state.borrow_mut().fail_opens.push_back(true);

        h.screen.on_resume();
        let events = h.screen.take_ui_events();
        assert!(events.contains(&UiEvent::Finish));
        assert!(events.contains(&UiEvent::Toast(
            "Failed to open camera: failed to open camera 0: device busy".into()
        )));
        h.assert_flags_match_handle();
    }

    #[test]
    fn resume_while_waiting_for_permission_opens_nothing() {
        let service = FakeService::new(vec![FakeCamera::new()]);
        let config = CameraConfig::default();
        let store = PhotoStore::new(std::env::temp_dir(), &config);
        let mut screen = CameraScreen::new(Box::new(service.clone()), store, config);
        screen.on_create(&Permissions::missing());
        // the permission dialog pauses and resumes the activity
        screen.on_pause();
        screen.on_resume();
        assert!(screen.awaiting_permission());
        assert!(!screen.has_camera());
        assert!(service.state.borrow().opened.is_empty());
    }
}
