//! In-memory camera service used by the unit tests.

use std::{cell::RefCell, collections::VecDeque, rc::Rc, sync::mpsc::Sender};

use image::RgbaImage;

use super::{
    CameraError, CameraEvent, CameraHandle, CameraId, CameraInfo, CameraResult, CameraService,
    Capabilities, Facing, FlashMode, FocusMode, Parameters, PreviewSurface, Size,
};

#[derive(Debug, Clone)]
pub struct FakeCamera {
    pub available: bool,
    pub capabilities: Capabilities,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            available: true,
            capabilities: Capabilities {
                preview_sizes: vec![Size::new(640, 480), Size::new(1280, 720)],
                picture_sizes: vec![Size::new(1280, 720), Size::new(4000, 3000)],
                focus_modes: vec![FocusMode::Auto, FocusMode::ContinuousPicture],
                flash_modes: vec![FlashMode::Off, FlashMode::Auto],
                scene_modes: vec!["auto".into()],
                white_balance_modes: vec!["auto".into()],
            },
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn without_autofocus(mut self) -> Self {
        self.capabilities.focus_modes = vec![FocusMode::Fixed];
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub open_handles: usize,
    pub max_open_handles: usize,
    pub opened: Vec<CameraId>,
    pub preview_running: bool,
    pub preview_starts: usize,
    pub applied: Vec<Parameters>,
    pub fail_preview: bool,
    pub fail_take_picture: bool,
    /// When set, `take_picture` replies with a failure event instead of bytes.
    pub picture_error: Option<String>,
    pub picture_bytes: Vec<u8>,
    pub focus_success: bool,
    /// One entry consumed per `open` call; `true` fails that call.
    pub fail_opens: VecDeque<bool>,
    /// Mirrors a session-based backend: reconfiguring or stopping drops
    /// the queued callbacks.
    pub drop_pending_on_reconfigure: bool,
    pub pending: Vec<(Sender<CameraEvent>, CameraEvent)>,
}

/// Camera registry whose handles share a [`FakeState`] the test can inspect.
#[derive(Debug, Clone)]
pub struct FakeService {
    pub cameras: Rc<RefCell<Vec<FakeCamera>>>,
    pub state: Rc<RefCell<FakeState>>,
}

impl FakeService {
    pub fn new(cameras: Vec<FakeCamera>) -> Self {
        Self {
            cameras: Rc::new(RefCell::new(cameras)),
            state: Rc::new(RefCell::new(FakeState {
                picture_bytes: vec![0xff, 0xd8, 0xff, 0xd9],
                focus_success: true,
                ..Default::default()
            })),
        }
    }

    /// Delivers the callbacks queued by `auto_focus` / `take_picture`.
    pub fn fire_callbacks(&self) {
        let pending = std::mem::take(&mut self.state.borrow_mut().pending);
        for (sender, event) in pending {
            let _ = sender.send(event);
        }
    }
}

impl CameraService for FakeService {
    fn number_of_cameras(&self) -> usize {
        self.cameras.borrow().len()
    }

    fn camera_info(&self, id: CameraId) -> CameraResult<CameraInfo> {
        if id >= self.number_of_cameras() {
            return Err(CameraError::Unavailable(id));
        }
        Ok(CameraInfo {
            id,
            facing: if id == 0 { Facing::Back } else { Facing::Front },
            orientation: 90,
        })
    }

    fn open(&self, id: CameraId) -> CameraResult<Box<dyn CameraHandle>> {
        if self.state.borrow_mut().fail_opens.pop_front().unwrap_or(false) {
            return Err(CameraError::OpenFailed {
                id,
                reason: "device busy".into(),
            });
        }
        let camera = self
            .cameras
            .borrow()
            .get(id)
            .cloned()
            .ok_or(CameraError::Unavailable(id))?;
        if !camera.available {
            return Err(CameraError::OpenFailed {
                id,
                reason: "camera is disabled".into(),
            });
        }
        let mut state = self.state.borrow_mut();
        if state.open_handles > 0 {
            return Err(CameraError::OpenFailed {
                id,
                reason: "camera in use".into(),
            });
        }
        state.open_handles += 1;
        state.max_open_handles = state.max_open_handles.max(state.open_handles);
        state.opened.push(id);
        Ok(Box::new(FakeHandle {
            id,
            capabilities: camera.capabilities,
            parameters: Parameters::default(),
            state: self.state.clone(),
        }))
    }
}

struct FakeHandle {
    id: CameraId,
    capabilities: Capabilities,
    parameters: Parameters,
    state: Rc<RefCell<FakeState>>,
}

impl CameraHandle for FakeHandle {
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
        let state = self.state.borrow();
        if state.preview_running {
            return Err(CameraError::Preview("reconfigured while previewing".into()));
        }
        drop(state);
        let mut state = self.state.borrow_mut();
        if state.drop_pending_on_reconfigure {
            state.pending.clear();
        }
        state.applied.push(parameters.clone());
        self.parameters = parameters;
        Ok(())
    }

    fn start_preview(&mut self, surface: &PreviewSurface) -> CameraResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_preview {
            return Err(CameraError::Preview("surface rejected".into()));
        }
        state.preview_running = true;
        state.preview_starts += 1;
        let _ = surface.sender().send(RgbaImage::new(2, 2));
        Ok(())
    }

    fn stop_preview(&mut self) -> CameraResult<()> {
        let mut state = self.state.borrow_mut();
        if state.drop_pending_on_reconfigure {
            state.pending.clear();
        }
        state.preview_running = false;
        Ok(())
    }

    fn auto_focus(&mut self, events: Sender<CameraEvent>) -> CameraResult<()> {
        let mut state = self.state.borrow_mut();
        let success = state.focus_success;
        state.pending.push((events, CameraEvent::AutoFocus { success }));
        Ok(())
    }

    fn take_picture(&mut self, events: Sender<CameraEvent>) -> CameraResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_take_picture {
            return Err(CameraError::Capture("shutter jammed".into()));
        }
        state.preview_running = false;
        state.pending.push((events.clone(), CameraEvent::Shutter));
        let event = match state.picture_error.clone() {
            Some(reason) => CameraEvent::PictureFailed(reason),
            None => CameraEvent::PictureTaken(state.picture_bytes.clone()),
        };
        state.pending.push((events, event));
        Ok(())
    }

    fn release(self: Box<Self>) -> CameraResult<()> {
        let mut state = self.state.borrow_mut();
        if state.preview_running {
            return Err(CameraError::Preview("released while previewing".into()));
        }
        state.open_handles -= 1;
        Ok(())
    }
}
