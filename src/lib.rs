pub mod app;
pub mod camera;
pub mod config;
pub mod helper;
pub mod permission;
pub mod screen;
pub mod storage;

#[cfg(target_os = "android")]
pub mod android;

#[cfg(target_os = "android")]
#[no_mangle]
fn android_main(app: slint::android::AndroidApp) {
    use slint::android::android_activity::{MainEvent, PollEvent};

    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("inmo_camera"),
    );

    let lifecycle = app::Lifecycle::default();
    let listener = lifecycle.clone();
    let init = slint::android::init_with_event_listener(app.clone(), move |event| match event {
        PollEvent::Main(MainEvent::Pause) => listener.pause(),
        PollEvent::Main(MainEvent::Resume { .. }) => listener.resume(),
        _ => {}
    });
    if let Err(err) = init {
        log::error!("slint init failed: {err}");
        return;
    }
    if let Err(err) = app::run(app, lifecycle) {
        log::error!("camera app exited: {err:#}");
    }
}
