//! # Wayland Screen Recording Engine
//!
//! Real-time capture and multiplexing pipeline for Wayland compositors:
//! compositor-pushed screen buffers plus up to two audio device streams go
//! in, one encoded MP4 or MKV file comes out.
//!
//! ## Features
//!
//! - **Video pipeline**: composed RGBA frames are paced into a bounded ring
//!   at the target FPS, scaled to YUV 4:2:0 and encoded to H.264
//! - **Audio pipeline**: microphone and system/loopback devices feed
//!   per-stream sample FIFOs through format conversion
//! - **Mixing**: when both devices are open, a two-input amix graph folds
//!   them into a single encoded stream
//! - **Backpressure**: a slow encoder drops the oldest ring frames instead
//!   of ever blocking capture
//! - **Clean shutdown**: stop admits no new frames while every consumer
//!   drains its queue; the container trailer is written on all exit paths
//!
//! ## Architecture
//!
//! ```text
//! compositor ─► adapter ─► composer ─► VideoRing ─► video encoder ─┐
//! mic device ─► resampler ─► AudioFifo ─┬► audio encoder ──────────┼► mux ─► file
//! sys device ─► resampler ─► AudioFifo ─┴► amix ─► audio encoder ──┘
//! ```
//!
//! The [`PipelineController`] owns every stage and drives the lifecycle;
//! see its documentation for the full API walk-through.

mod audio_fifo;
mod audio_stage;
mod clock;
mod config;
mod controller;
mod error;
mod mixer;
mod mux;
mod profile;
mod resampler;
mod video_ring;
mod video_stage;

pub use audio_fifo::{AudioFifo, FifoPolicy};
pub use clock::{AudioClock, audio_packet_pts, video_packet_pts};
pub use config::{ContainerFormat, CropOffsets, RecorderConfig};
pub use controller::{
    AudioChannelMask, PipelineController, PipelineState, RecordingSummary, StopHandle,
};
pub use error::RecorderError;
pub use mixer::{AudioMixer, MixInput};
pub use mux::MuxWriter;
pub use profile::{AAC_FRAME_SIZE, AudioProfile, VideoProfile};
pub use resampler::AudioResampler;
pub use video_ring::{CanvasFrame, RingStats, VideoRing};

pub use audio_capture::{AudioDeviceInfo, AudioSpec, device_spec, input_devices};
pub use wayland_capture::{ProductClass, ScreenRegistry, available_screens};
