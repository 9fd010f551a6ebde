use std::{
    cell::{Cell, RefCell},
    path::PathBuf,
    rc::{Rc, Weak},
    sync::mpsc::{channel, Receiver},
    time::{Duration, Instant},
};

use anyhow::Result;
use image::RgbaImage;
use log::info;
use slint::{ComponentHandle, Image, Rgba8Pixel, SharedPixelBuffer, Timer, TimerMode};

use crate::{
    camera::{CameraService, PreviewSurface, Size},
    config::CameraConfig,
    permission::PermissionGate,
    screen::{CameraScreen, UiEvent},
    storage::PhotoStore,
};

slint::slint! {
    import { Button, VerticalBox, HorizontalBox } from "std-widgets.slint";
    export component MainWindow inherits Window {
        in-out property <image> camera-texture <=> preview.source;
        in property <int> page: 0;
        in property <string> status-text: "Camera ID: 0";
        in property <string> toast-text;
        callback open-camera();
        callback capture();
        callback switch-camera();
        callback close-camera();

        preferred-width: 1280px;
        preferred-height: 720px;

        Rectangle {
            visible: root.page == 0;
            width: 100%;
            height: 100%;
            VerticalBox {
                alignment: center;
                Text {
                    text: "INMO AIR3 Camera";
                    horizontal-alignment: center;
                    font-size: 24px;
                }
                HorizontalBox {
                    alignment: center;
                    Button {
                        text: "Open INMO AIR3 camera";
                        clicked => {
                            root.open-camera();
                        }
                    }
                }
            }
        }

        Rectangle {
            visible: root.page == 1;
            width: 100%;
            height: 100%;
            background: black;
            preview := Image {
                width: parent.width;
                height: parent.height;
                image-fit: contain;
            }
            Rectangle {
                x: 10px;
                y: 10px;
                width: 200px;
                height: 40px;
                Text {
                    text: root.status-text;
                    color: white;
                }
            }
            Text {
                y: parent.height - 110px;
                width: parent.width;
                horizontal-alignment: center;
                text: root.toast-text;
                color: white;
            }
            Rectangle {
                height: 50px;
                width: 420px;
                x: (parent.width/2 - self.width/2);
                y: (parent.height - self.height - 10px);
                HorizontalBox {
                    padding: 0px;
                    Button {
                        text: "Capture";
                        clicked => {
                            root.capture();
                        }
                    }
                    Button {
                        text: "Switch camera";
                        clicked => {
                            root.switch-camera();
                        }
                    }
                    Button {
                        text: "Close";
                        clicked => {
                            root.close-camera();
                        }
                    }
                }
            }
        }
    }
}

const TOAST_DURATION: Duration = Duration::from_secs(2);
const PERMISSION_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[cfg(target_os = "android")]
fn camera_service() -> Box<dyn CameraService> {
    Box::new(crate::camera::android::AndroidCameraService)
}

#[cfg(target_os = "windows")]
fn camera_service() -> Box<dyn CameraService> {
    Box::new(crate::camera::desktop::DesktopCameraService::default())
}

#[cfg(not(any(target_os = "android", target_os = "windows")))]
fn camera_service() -> Box<dyn CameraService> {
    Box::new(crate::camera::NoCameras)
}

fn to_slint_image(frame: &RgbaImage) -> Image {
    let buffer = SharedPixelBuffer::<Rgba8Pixel>::clone_from_slice(
        frame.as_raw(),
        frame.width(),
        frame.height(),
    );
    Image::from_rgba8(buffer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleEvent {
    Pause,
    Resume,
}

/// Forwards activity pause/resume to the camera page, once the window exists.
#[derive(Clone, Default)]
pub struct Lifecycle {
    ui: Rc<RefCell<Weak<Ui>>>,
}

impl Lifecycle {
    pub fn pause(&self) {
        self.dispatch(LifecycleEvent::Pause);
    }

    pub fn resume(&self) {
        self.dispatch(LifecycleEvent::Resume);
    }

    #[cfg(target_os = "android")]
    fn attach(&self, ui: &Rc<Ui>) {
        *self.ui.borrow_mut() = Rc::downgrade(ui);
    }

    fn dispatch(&self, event: LifecycleEvent) {
        let ui = self.ui.borrow().upgrade();
        if let Some(ui) = ui {
            ui.on_lifecycle(event);
        }
    }
}

/// The open camera screen and the receiving end of its preview surface.
struct CameraPage {
    screen: CameraScreen,
    frames: Receiver<RgbaImage>,
    permission_requested_at: Instant,
    last_permission_check: Instant,
    surface_size: Size,
}

struct Ui {
    window: slint::Weak<MainWindow>,
    page: RefCell<Option<CameraPage>>,
    toast_shown_at: Cell<Option<Instant>>,
    /// Arrived while the page was borrowed; applied on the next tick.
    deferred_lifecycle: Cell<Option<LifecycleEvent>>,
    store: PhotoStore,
    config: CameraConfig,
    permissions: Box<dyn PermissionGate>,
}

impl Ui {
    fn surface_size(&self) -> Size {
        self.window
            .upgrade()
            .map(|window| {
                let size = window.window().size();
                Size::new(size.width, size.height)
            })
            .filter(|size| size.width > 0 && size.height > 0)
            .unwrap_or(self.config.preview_request)
    }

    fn open_camera(&self) {
        if self.page.borrow().is_some() {
            return;
        }
        if let Some(window) = self.window.upgrade() {
            window.set_page(1);
        }

        let mut screen = CameraScreen::new(camera_service(), self.store.clone(), self.config.clone());
        let (frames_sender, frames) = channel();
        let surface_size = self.surface_size();
        screen.on_create(self.permissions.as_ref());
        screen.surface_created(PreviewSurface::new(frames_sender).with_size(surface_size));

        let now = Instant::now();
        *self.page.borrow_mut() = Some(CameraPage {
            screen,
            frames,
            permission_requested_at: now,
            last_permission_check: now,
            surface_size,
        });
        self.flush();
    }

    fn on_lifecycle(&self, event: LifecycleEvent) {
        let Ok(mut page) = self.page.try_borrow_mut() else {
            self.deferred_lifecycle.set(Some(event));
            return;
        };
        if let Some(page) = page.as_mut() {
            info!("activity {event:?}");
            match event {
                LifecycleEvent::Pause => page.screen.on_pause(),
                LifecycleEvent::Resume => page.screen.on_resume(),
            }
        }
        drop(page);
        self.flush();
    }

    fn with_screen(&self, f: impl FnOnce(&mut CameraScreen)) {
        if let Some(page) = self.page.borrow_mut().as_mut() {
            f(&mut page.screen);
        }
        self.flush();
    }

    fn close_camera(&self) {
        let page = self.page.borrow_mut().take();
        if let Some(mut page) = page {
            page.screen.surface_destroyed();
            page.screen.on_destroy();
        }
        if let Some(window) = self.window.upgrade() {
            window.set_page(0);
            window.set_camera_texture(Image::default());
        }
    }

    /// Shows the feedback the screen queued since the last call.
    fn flush(&self) {
        let events = match self.page.borrow_mut().as_mut() {
            Some(page) => page.screen.take_ui_events(),
            None => return,
        };
        let Some(window) = self.window.upgrade() else {
            return;
        };
        let mut finish = false;
        for event in events {
            match event {
                UiEvent::Toast(message) => {
                    info!("toast: {message}");
                    window.set_toast_text(message.into());
                    self.toast_shown_at.set(Some(Instant::now()));
                }
                UiEvent::Status(id) => window.set_status_text(format!("Camera ID: {id}").into()),
                UiEvent::PhotoSaved(path) => info!("photo written to {}", path.display()),
                UiEvent::Finish => finish = true,
            }
        }
        if finish {
            self.close_camera();
        }
    }

    fn tick(&self) {
        if let Some(event) = self.deferred_lifecycle.take() {
            self.on_lifecycle(event);
        }
        let size = self.surface_size();
        if let Some(page) = self.page.borrow_mut().as_mut() {
            // no native permission result reaches us, so poll until granted or timed out
            if page.screen.awaiting_permission()
                && page.last_permission_check.elapsed() >= PERMISSION_POLL_INTERVAL
            {
                page.last_permission_check = Instant::now();
                match self.permissions.is_granted() {
                    Ok(true) => page.screen.on_permission_result(true),
                    _ if page.permission_requested_at.elapsed() >= self.config.permission_timeout => {
                        page.screen.on_permission_result(false)
                    }
                    _ => {}
                }
            }

            if size != page.surface_size {
                page.surface_size = size;
                page.screen.surface_changed(size);
            }

            page.screen.pump();

            if let (Some(frame), Some(window)) = (page.frames.try_iter().last(), self.window.upgrade()) {
                window.set_camera_texture(to_slint_image(&frame));
            }
        }
        self.flush();

        if let Some(shown_at) = self.toast_shown_at.get() {
            if shown_at.elapsed() >= TOAST_DURATION {
                self.toast_shown_at.set(None);
                if let Some(window) = self.window.upgrade() {
                    window.set_toast_text("".into());
                }
            }
        }
    }
}

pub fn run(
    #[cfg(target_os = "android")]
    android_app: slint::android::AndroidApp,
    #[cfg(target_os = "android")]
    lifecycle: Lifecycle,
) -> Result<()> {
    let config = CameraConfig::from_env();

    #[cfg(target_os = "android")]
    let (permissions, pictures_dir): (Box<dyn PermissionGate>, PathBuf) = {
        let pictures_dir = match config.pictures_dir.clone() {
            Some(dir) => dir,
            None => crate::android::pictures_dir(&android_app)?,
        };
        (
            Box::new(crate::android::AndroidPermissions::new(android_app)),
            pictures_dir,
        )
    };

    #[cfg(not(target_os = "android"))]
    let (permissions, pictures_dir): (Box<dyn PermissionGate>, PathBuf) = (
        Box::new(crate::permission::AlwaysGranted),
        crate::storage::pictures_dir(&config),
    );

    info!("photos are stored under {}", pictures_dir.display());

    let app = MainWindow::new()?;
    let ui = Rc::new(Ui {
        window: app.as_weak(),
        page: RefCell::new(None),
        toast_shown_at: Cell::new(None),
        deferred_lifecycle: Cell::new(None),
        store: PhotoStore::new(&pictures_dir, &config),
        config,
        permissions,
    });

    #[cfg(target_os = "android")]
    lifecycle.attach(&ui);

    let ui_clone = ui.clone();
    app.on_open_camera(move || ui_clone.open_camera());

    let ui_clone = ui.clone();
    app.on_capture(move || ui_clone.with_screen(CameraScreen::capture_photo));

    let ui_clone = ui.clone();
    app.on_switch_camera(move || ui_clone.with_screen(CameraScreen::switch_camera));

    let ui_clone = ui.clone();
    app.on_close_camera(move || ui_clone.close_camera());

    let ui_clone = ui.clone();
    let timer = Timer::default();
    timer.start(TimerMode::Repeated, Duration::from_millis(10), move || {
        ui_clone.tick()
    });

    app.run()?;
    ui.close_camera();
    Ok(())
}
