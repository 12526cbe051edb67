use recorder::{PipelineController, RecorderConfig, available_screens, input_devices};
use std::{thread, time::Duration};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    log::info!("Recording for exactly 5 seconds...");

    let screens = available_screens()?;
    assert!(!screens.is_empty());

    log::info!(
        "{} screen(s), virtual desktop {:?}",
        screens.len(),
        screens.virtual_desktop_size()
    );

    let mic_device = input_devices()?.into_iter().next().map(|device| device.name);
    log::info!("microphone device: {mic_device:?}");

    let config = RecorderConfig::new("/tmp/recording-5s-demo.mp4")
        .with_fps(30)
        .with_mic_device(mic_device);

    let mut controller = PipelineController::new(config);
    controller.init()?;
    controller.start()?;

    log::info!("audio channels: {:?}", controller.audio_channels());

    let stop = controller.stop_handle();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(5));
        log::info!("5 seconds elapsed, stopping recording...");
        stop.stop();
    });

    let summary = controller.wait()?;

    log::info!(
        "Recording completed successfully: {} frames appended, {} dropped",
        summary.frames_appended,
        summary.frames_dropped
    );

    Ok(())
}
