//! Compositor-side frame intake for Wayland screen recording.
//!
//! This crate connects to the compositor, tracks the screen layout, pulls
//! dmabuf frames for every output and normalises them into RGBA8888 images:
//!
//! 1. **Registry**: outputs and their geometry are collected into a
//!    [`ScreenRegistry`], kept current across hot-plug events.
//! 2. **Adapter**: each delivered buffer descriptor is converted to an owned
//!    RGBA image, either through a plain memory mapping or through a GPU
//!    readback on boards that require it (see [`ProductClass`]).
//! 3. **Composer**: per-output images are assembled into one canvas the size
//!    of the virtual desktop.
//!
//! [`capture_stream`] runs all three stages on the calling thread and hands
//! composed frames to a callback.

mod adapter;
mod backend;
mod capture;
mod composer;
mod egl;
mod error;
mod screen_info;

pub use adapter::{BufferAdapter, ProductClass, RemoteBuffer};
pub use capture::{CaptureStreamConfig, available_screens, capture_stream};
pub use composer::ScreenComposer;
pub use error::CaptureError;
pub use screen_info::{LogicalSize, Position, ScreenRect, ScreenRegistry};
