use crate::{
    BufferAdapter, CaptureError, ProductClass, ScreenComposer, backend,
    screen_info::ScreenRegistry,
};
use image::RgbaImage;
use std::sync::{Arc, atomic::AtomicBool, atomic::Ordering};

#[derive(Debug, Clone)]
pub struct CaptureStreamConfig {
    /// Whether to include the mouse cursor in the capture
    pub include_cursor: bool,

    /// Hardware class that selects the buffer adapter variant
    pub product_class: ProductClass,

    /// Cancellation signal - when set to true, the capture loop will exit
    pub cancel_sig: Arc<AtomicBool>,
}

/// Connects to the compositor and reports the current screen layout without
/// starting a capture.
pub fn available_screens() -> Result<ScreenRegistry, CaptureError> {
    let (state, _event_queue) = backend::connect_and_get_output_info()?;
    Ok(state.screens.clone())
}

/// Runs the compositor intake loop until cancelled.
///
/// For every capture cycle one dmabuf frame is requested per connected
/// output; completed buffers are normalised to RGBA8888 by the configured
/// adapter and handed to the [`ScreenComposer`]. The callback receives one
/// composed canvas per cycle. Returns once the cancellation signal is set;
/// a lost compositor connection surfaces as an error.
///
/// The wayland event queue, the adapter (and its GPU context, if any) all
/// live on the calling thread for the lifetime of the connection.
pub fn capture_stream(
    config: CaptureStreamConfig,
    mut cb: impl FnMut(RgbaImage),
) -> Result<(), CaptureError> {
    let (mut state, mut event_queue) = backend::connect_and_get_output_info()?;

    if state.output_infos.is_empty() {
        return Err(CaptureError::NoCaptures);
    }

    let export_manager = state.export_manager.clone().ok_or_else(|| {
        CaptureError::Unimplemented(
            "compositor does not implement the export-dmabuf protocol".to_string(),
        )
    })?;

    let mut adapter = BufferAdapter::new(config.product_class);
    let mut composer = ScreenComposer::new();

    log::info!(
        "capture started: {} output(s), virtual desktop {:?}",
        state.screens.len(),
        state.screens.virtual_desktop_size()
    );

    loop {
        if config.cancel_sig.load(Ordering::Relaxed) {
            log::info!("capture loop exit after stop request");
            return Ok(());
        }

        // Every output unplugged: wait for a hot-plug instead of spinning.
        if state.output_infos.is_empty() {
            event_queue.blocking_dispatch(&mut state)?;
            continue;
        }

        // One outstanding frame request per output.
        for info in &mut state.output_infos {
            if !info.frame_inflight {
                export_manager.capture_output(
                    config.include_cursor as i32,
                    &info.wl_output,
                    &event_queue.handle(),
                    info.registry_name,
                );
                info.frame_inflight = true;
            }
        }

        while !state.has_ready() && state.any_inflight() {
            if config.cancel_sig.load(Ordering::Relaxed) {
                return Ok(());
            }
            event_queue.blocking_dispatch(&mut state)?;
        }

        for (uuid, buffer) in state.take_ready() {
            match adapter.to_rgba(&buffer) {
                Ok(image) => {
                    if let Some(canvas) = composer.push(&state.screens, &uuid, image) {
                        cb(canvas);
                    }
                }
                // Per-frame capture failure: drop the frame, keep going.
                Err(e) => log::warn!("dropping frame from `{uuid}`: {e}"),
            }
        }
    }
}
