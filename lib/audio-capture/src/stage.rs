use crate::{AudioCaptureError, AudioSpec, device};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam::channel::{Receiver, bounded};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

const BLOCK_CHANNEL_SIZE: usize = 64;

/// One running capture stage: a device stream whose callback pushes blocks of
/// interleaved f32 samples into a bounded channel.
///
/// The stream object is not `Send`, so it is created and kept on a dedicated
/// thread; [`AudioCaptureStage::open`] blocks until that thread reports
/// whether the device could be opened. A full channel drops the block rather
/// than stalling the device callback.
pub struct AudioCaptureStage {
    spec: AudioSpec,
    receiver: Receiver<Vec<f32>>,
    stop_sig: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AudioCaptureStage {
    /// Opens the named device and starts capturing. Errors here mean the
    /// channel stays disabled; the caller decides whether to continue
    /// without it.
    pub fn open(device_name: &str) -> Result<Self, AudioCaptureError> {
        let spec = device::device_spec(device_name)?;

        let (block_sender, block_receiver) = bounded::<Vec<f32>>(BLOCK_CHANNEL_SIZE);
        let (open_sender, open_receiver) = bounded::<Result<(), AudioCaptureError>>(1);

        let stop_sig = Arc::new(AtomicBool::new(false));
        let stop_sig_worker = stop_sig.clone();
        let name = device_name.to_owned();

        let worker = thread::spawn(move || {
            let stream = match build_stream(&name, move |block| {
                if let Err(e) = block_sender.try_send(block) {
                    log::warn!("audio block channel full, dropping block: {e}");
                }
            }) {
                Ok(stream) => stream,
                Err(e) => {
                    _ = open_sender.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                _ = open_sender.send(Err(AudioCaptureError::Stream(e.to_string())));
                return;
            }

            _ = open_sender.send(Ok(()));

            // The stream delivers through its callback; this thread only
            // keeps it alive until stop.
            while !stop_sig_worker.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
            }

            drop(stream);
            log::info!("audio capture stage for `{name}` exit");
        });

        match open_receiver.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                log::info!(
                    "audio capture stage for `{device_name}` started: {} Hz, {} channel(s)",
                    spec.sample_rate,
                    spec.channels
                );
                Ok(Self {
                    spec,
                    receiver: block_receiver,
                    stop_sig,
                    worker: Some(worker),
                })
            }
            Ok(Err(e)) => {
                _ = worker.join();
                Err(e)
            }
            Err(_) => {
                stop_sig.store(true, Ordering::Relaxed);
                Err(AudioCaptureError::Stream(format!(
                    "device `{device_name}` did not start in time"
                )))
            }
        }
    }

    pub fn spec(&self) -> AudioSpec {
        self.spec
    }

    pub fn receiver(&self) -> Receiver<Vec<f32>> {
        self.receiver.clone()
    }

    /// Stops the stream and joins the worker. Blocks already queued stay
    /// readable so the consumer can drain the tail.
    pub fn stop(&mut self) {
        self.stop_sig.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take()
            && let Err(e) = worker.join()
        {
            log::warn!("join audio capture worker failed: {e:?}");
        }
    }
}

impl Drop for AudioCaptureStage {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    device_name: &str,
    mut on_block: impl FnMut(Vec<f32>) + Send + 'static,
) -> Result<cpal::Stream, AudioCaptureError> {
    let device = device::find_device(device_name)?;

    let config = device
        .default_input_config()
        .map_err(|e| AudioCaptureError::Device(e.to_string()))?
        .config();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !data.is_empty() {
                    on_block(data.to_vec());
                }
            },
            |err| log::warn!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| AudioCaptureError::Stream(e.to_string()))?;

    Ok(stream)
}
