//! Webcam backend for desktop development builds.

use std::{
    cell::OnceCell,
    sync::mpsc::{channel, Receiver, Sender, TryRecvError},
    thread::JoinHandle,
    time::Duration,
};

use anyhow::{anyhow, Result};
use image::RgbaImage;
use kamera::Camera as KCamera;
use log::{debug, error, info};

use super::{
    bgra_to_rgba, encode_jpeg, CameraError, CameraEvent, CameraHandle, CameraId, CameraInfo,
    CameraResult, CameraService, Capabilities, Facing, FocusMode, Parameters, PreviewSurface,
    Size,
};

/// Upper bound for device probing; kamera has no enumeration call.
const MAX_DEVICES: usize = 8;

enum Command {
    Preview(Sender<RgbaImage>),
    StopPreview,
    Capture {
        events: Sender<CameraEvent>,
        quality: u8,
    },
    Release,
}

/// Number of attached devices, probed on first use.
#[derive(Debug, Default)]
struct DeviceCount(OnceCell<usize>);

impl DeviceCount {
    fn get(&self, mut probe: impl FnMut(usize) -> bool) -> usize {
        *self.0.get_or_init(|| {
            let count = (0..MAX_DEVICES).take_while(|index| probe(*index)).count();
            debug!("{count} webcam(s) found");
            count
        })
    }
}

#[derive(Debug, Default)]
pub struct DesktopCameraService {
    devices: DeviceCount,
}

impl CameraService for DesktopCameraService {
    fn number_of_cameras(&self) -> usize {
        self.devices
            .get(|index| KCamera::new_device(index).is_some())
    }

    fn camera_info(&self, id: CameraId) -> CameraResult<CameraInfo> {
        if id >= self.number_of_cameras() {
            return Err(CameraError::Unavailable(id));
        }
        Ok(CameraInfo {
            id,
            facing: Facing::External,
            orientation: 0,
        })
    }

    fn open(&self, id: CameraId) -> CameraResult<Box<dyn CameraHandle>> {
        let (commands, command_receiver) = channel();
        let (opened_sender, opened) = channel();
        let worker = std::thread::spawn(move || camera_thread(id, command_receiver, opened_sender));

        let size = match opened.recv() {
            Ok(Ok(size)) => size,
            Ok(Err(reason)) => {
                let _ = worker.join();
                return Err(CameraError::OpenFailed { id, reason });
            }
            Err(_) => {
                let res = worker.join();
                return Err(CameraError::OpenFailed {
                    id,
                    reason: format!("camera thread exited: {:?}", res),
                });
            }
        };
        info!("webcam {id} opened, frame size {size}");

        Ok(Box::new(DesktopCameraHandle {
            id,
            commands,
            worker: Some(worker),
            capabilities: Capabilities {
                preview_sizes: vec![size],
                picture_sizes: vec![size],
                focus_modes: vec![FocusMode::Fixed],
                ..Default::default()
            },
            parameters: Parameters::default(),
        }))
    }
}

fn frame_to_rgba(width: u32, height: u32, bgra: &[u8]) -> Result<RgbaImage> {
    let mut rgba_buffer = bgra.to_vec();
    bgra_to_rgba(&mut rgba_buffer);
    RgbaImage::from_raw(width, height, rgba_buffer).ok_or(anyhow!("short frame {width}x{height}"))
}

fn camera_thread(
    index: CameraId,
    commands: Receiver<Command>,
    opened: Sender<std::result::Result<Size, String>>,
) -> Result<()> {
    let camera = match KCamera::new_device(index) {
        None => {
            let _ = opened.send(Err("camera id not exist".to_string()));
            return Err(anyhow!("camera id not exist"));
        }
        Some(v) => v,
    };

    // the frame size is only known once a frame arrives
    camera.start();
    let size = camera.wait_for_frame().map(|frame| {
        let (width, height) = frame.size_u32();
        Size::new(width, height)
    });
    camera.stop();
    let Some(size) = size else {
        let _ = opened.send(Err("no frame from camera".to_string()));
        return Err(anyhow!("no frame from camera"));
    };
    opened.send(Ok(size)).map_err(|err| anyhow!("{:?}", err))?;

    let mut preview: Option<Sender<RgbaImage>> = None;
    loop {
        let command = if preview.is_some() {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        match command {
            Some(Command::Preview(frames)) => {
                if preview.is_none() {
                    camera.start();
                }
                preview = Some(frames);
            }
            Some(Command::StopPreview) => {
                if preview.take().is_some() {
                    camera.stop();
                }
            }
            Some(Command::Capture { events, quality }) => {
                if preview.is_none() {
                    camera.start();
                }
                let _ = events.send(CameraEvent::Shutter);
                let event = match camera.wait_for_frame() {
                    Some(frame) => match frame_to_rgba(
                        frame.size_u32().0,
                        frame.size_u32().1,
                        frame.data().data_u8(),
                    )
                    .map_err(|err| CameraError::Capture(err.to_string()))
                    .and_then(|rgba| encode_jpeg(&rgba, quality))
                    {
                        Ok(jpeg) => CameraEvent::PictureTaken(jpeg),
                        Err(err) => CameraEvent::PictureFailed(err.to_string()),
                    },
                    None => CameraEvent::PictureFailed("no frame from camera".to_string()),
                };
                let _ = events.send(event);
                preview = None;
                camera.stop();
            }
            Some(Command::Release) => break,
            None => {}
        }

        let Some(frames) = preview.as_ref() else {
            continue;
        };
        match camera.wait_for_frame() {
            Some(frame) => match frame_to_rgba(
                frame.size_u32().0,
                frame.size_u32().1,
                frame.data().data_u8(),
            ) {
                Ok(rgba) => {
                    if frames.send(rgba).is_err() {
                        debug!("preview surface gone");
                        preview = None;
                        camera.stop();
                    }
                }
                Err(err) => error!("bad frame: {err}"),
            },
            None => std::thread::sleep(Duration::from_millis(10)),
        }
    }
    if preview.is_some() {
        camera.stop();
    }
    Ok(())
}

pub struct DesktopCameraHandle {
    id: CameraId,
    commands: Sender<Command>,
    worker: Option<JoinHandle<Result<()>>>,
    capabilities: Capabilities,
    parameters: Parameters,
}

impl DesktopCameraHandle {
    fn send(&self, command: Command) -> CameraResult<()> {
        self.commands
            .send(command)
            .map_err(|_| CameraError::Platform("camera thread stopped".into()))
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.commands.send(Command::Release);
            let res = worker.join();
            debug!("camera {} thread stopped: {:?}", self.id, res);
        }
    }
}

impl CameraHandle for DesktopCameraHandle {
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
        self.parameters = parameters;
        Ok(())
    }

    fn start_preview(&mut self, surface: &PreviewSurface) -> CameraResult<()> {
        self.send(Command::Preview(surface.sender()))
            .map_err(|err| CameraError::Preview(err.to_string()))
    }

    fn stop_preview(&mut self) -> CameraResult<()> {
        self.send(Command::StopPreview)
    }

    fn auto_focus(&mut self, events: Sender<CameraEvent>) -> CameraResult<()> {
        // webcams focus on their own
        let _ = events.send(CameraEvent::AutoFocus { success: true });
        Ok(())
    }

    fn take_picture(&mut self, events: Sender<CameraEvent>) -> CameraResult<()> {
        self.send(Command::Capture {
            events,
            quality: self.parameters.jpeg_quality,
        })
        .map_err(|err| CameraError::Capture(err.to_string()))
    }

    fn release(mut self: Box<Self>) -> CameraResult<()> {
        self.stop_worker();
        Ok(())
    }
}

impl Drop for DesktopCameraHandle {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn device_count_is_probed_once() {
        let devices = DeviceCount::default();
        let probes = Cell::new(0);
        let probe = |index: usize| {
            probes.set(probes.get() + 1);
            index < 2
        };
        assert_eq!(devices.get(probe), 2);
        // two hits and the miss that ends the scan
        assert_eq!(probes.get(), 3);
        assert_eq!(devices.get(probe), 2);
        assert_eq!(probes.get(), 3);
    }
}
