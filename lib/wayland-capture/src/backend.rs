use crate::{
    CaptureError,
    adapter::RemoteBuffer,
    screen_info::{LogicalSize, Position, ScreenRect, ScreenRegistry},
};
use std::{collections::HashMap, os::fd::OwnedFd};
use wayland_client::{
    self, Connection, Dispatch, QueueHandle,
    protocol::{wl_callback, wl_output, wl_registry},
};
use wayland_protocols::xdg::xdg_output::zv1::client::{zxdg_output_manager_v1, zxdg_output_v1};
use wayland_protocols_wlr::export_dmabuf::v1::client::{
    zwlr_export_dmabuf_frame_v1, zwlr_export_dmabuf_manager_v1,
};

#[derive(Debug)]
pub(crate) struct OutputInfo {
    /// Wayland output object
    pub wl_output: wl_output::WlOutput,

    /// Numeric name of the global, stable across the connection. Used to
    /// match hot-unplug events and as the user data of derived objects.
    pub registry_name: u32,

    /// Connector name of the output, used as the screen identifier
    pub name: Option<String>,

    /// Logical position of the output in compositor space
    pub logical_position: Option<Position>,

    /// Logical size of the output
    pub logical_size: Option<LogicalSize>,

    /// Whether a dmabuf frame request is currently outstanding
    pub frame_inflight: bool,
}

/// A dmabuf frame in the middle of its event sequence.
#[derive(Debug, Default)]
struct PendingFrame {
    width: u32,
    height: u32,
    format: u32,
    stride: Option<u32>,
    fd: Option<OwnedFd>,
}

#[derive(Default, Debug)]
pub(crate) struct State {
    /// Whether global enumeration is complete
    pub done: bool,

    /// Export-dmabuf manager used to request frames from the compositor
    pub export_manager: Option<zwlr_export_dmabuf_manager_v1::ZwlrExportDmabufManagerV1>,

    /// XDG output manager for output geometry
    pub xdg_output_manager: Option<zxdg_output_manager_v1::ZxdgOutputManagerV1>,

    /// Information about all connected outputs
    pub output_infos: Vec<OutputInfo>,

    /// Screen identifier → rectangle mapping derived from the outputs
    pub screens: ScreenRegistry,

    /// Frames whose event sequences are still in progress, keyed by the
    /// registry name of their output
    pending: HashMap<u32, PendingFrame>,

    /// Completed buffers waiting for the capture loop
    ready: Vec<(String, RemoteBuffer)>,
}

impl State {
    pub fn take_ready(&mut self) -> Vec<(String, RemoteBuffer)> {
        std::mem::take(&mut self.ready)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn any_inflight(&self) -> bool {
        self.output_infos.iter().any(|info| info.frame_inflight)
    }

    fn output_mut(&mut self, registry_name: u32) -> Option<&mut OutputInfo> {
        self.output_infos
            .iter_mut()
            .find(|info| info.registry_name == registry_name)
    }

    /// Publishes an output into the screen registry once its identifier and
    /// geometry are all known.
    fn sync_screen(&mut self, registry_name: u32) {
        let known = self.output_mut(registry_name).and_then(|info| {
            match (info.name.clone(), info.logical_position, info.logical_size) {
                (Some(name), Some(position), Some(size)) => {
                    Some((name, ScreenRect { position, size }))
                }
                _ => None,
            }
        });

        if let Some((name, rect)) = known {
            self.screens.insert(name, rect);
        }
    }

    fn remove_output(&mut self, registry_name: u32) {
        if let Some(index) = self
            .output_infos
            .iter()
            .position(|info| info.registry_name == registry_name)
        {
            let info = self.output_infos.remove(index);
            if let Some(name) = &info.name {
                self.screens.remove(name);
            }
            info.wl_output.release();
            self.pending.remove(&registry_name);
            log::info!(
                "output `{}` removed, {} remaining",
                info.name.as_deref().unwrap_or("?"),
                self.output_infos.len()
            );
        }
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for State {
    fn event(
        state: &mut State,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _connection: &Connection,
        queue_handle: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version: _,
            } => match &interface[..] {
                // Export-dmabuf manager (used to request frames of an output)
                "zwlr_export_dmabuf_manager_v1" => {
                    let manager = registry
                        .bind::<zwlr_export_dmabuf_manager_v1::ZwlrExportDmabufManagerV1, _, _>(
                            name,
                            1,
                            queue_handle,
                            (),
                        );
                    state.export_manager = Some(manager);
                }
                // XDG output manager (used to obtain output geometry)
                "zxdg_output_manager_v1" => {
                    let manager = registry
                        .bind::<zxdg_output_manager_v1::ZxdgOutputManagerV1, _, _>(
                            name,
                            3,
                            queue_handle,
                            (),
                        );
                    state.xdg_output_manager = Some(manager);
                }
                "wl_output" => {
                    let wl_output =
                        registry.bind::<wl_output::WlOutput, _, _>(name, 4, queue_handle, name);

                    // Hot-plugged outputs arrive after setup; ask for their
                    // geometry right away.
                    if let Some(manager) = &state.xdg_output_manager {
                        manager.get_xdg_output(&wl_output, queue_handle, name);
                    }

                    state.output_infos.push(OutputInfo {
                        wl_output,
                        registry_name: name,
                        name: None,
                        logical_position: None,
                        logical_size: None,
                        frame_inflight: false,
                    });
                }
                _ => {}
            },
            wl_registry::Event::GlobalRemove { name } => {
                state.remove_output(name);
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_callback::WlCallback, ()> for State {
    fn event(
        state: &mut State,
        _wl_callback: &wl_callback::WlCallback,
        event: wl_callback::Event,
        _: &(),
        _connection: &Connection,
        _queue_handle: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { callback_data: _ } = event {
            state.done = true;
        }
    }
}

impl Dispatch<wl_output::WlOutput, u32> for State {
    fn event(
        state: &mut State,
        _wl_output: &wl_output::WlOutput,
        event: wl_output::Event,
        registry_name: &u32,
        _connection: &Connection,
        _queue_handle: &QueueHandle<Self>,
    ) {
        if let wl_output::Event::Name { name } = event {
            if let Some(info) = state.output_mut(*registry_name) {
                info.name = Some(name);
            }
            state.sync_screen(*registry_name);
        }
    }
}

impl Dispatch<zxdg_output_v1::ZxdgOutputV1, u32> for State {
    fn event(
        state: &mut State,
        _xdg_output: &zxdg_output_v1::ZxdgOutputV1,
        event: zxdg_output_v1::Event,
        registry_name: &u32,
        _connection: &Connection,
        _queue_handle: &QueueHandle<Self>,
    ) {
        match event {
            // Logical position accounts for transforms and scaling
            zxdg_output_v1::Event::LogicalPosition { x, y } => {
                if let Some(info) = state.output_mut(*registry_name) {
                    info.logical_position = Some(Position::new(x, y));
                }
                state.sync_screen(*registry_name);
            }
            zxdg_output_v1::Event::LogicalSize { width, height } => {
                if let Some(info) = state.output_mut(*registry_name) {
                    info.logical_size = Some(LogicalSize::new(width, height));
                }
                state.sync_screen(*registry_name);
            }
            _ => {}
        }
    }
}

impl Dispatch<zwlr_export_dmabuf_frame_v1::ZwlrExportDmabufFrameV1, u32> for State {
    fn event(
        state: &mut State,
        frame: &zwlr_export_dmabuf_frame_v1::ZwlrExportDmabufFrameV1,
        event: zwlr_export_dmabuf_frame_v1::Event,
        registry_name: &u32,
        _connection: &Connection,
        _queue_handle: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_export_dmabuf_frame_v1::Event::Frame {
                width,
                height,
                format,
                num_objects,
                ..
            } => {
                if num_objects > 1 {
                    let err = CaptureError::Protocol(format!(
                        "frame delivered with {num_objects} planes, expected 1"
                    ));
                    log::debug!("{err}; using plane 0 only");
                }
                state.pending.insert(
                    *registry_name,
                    PendingFrame {
                        width,
                        height,
                        format,
                        stride: None,
                        fd: None,
                    },
                );
            }
            zwlr_export_dmabuf_frame_v1::Event::Object {
                index, fd, stride, ..
            } => {
                if index == 0
                    && let Some(pending) = state.pending.get_mut(registry_name)
                {
                    pending.fd = Some(fd);
                    pending.stride = Some(stride);
                }
            }
            zwlr_export_dmabuf_frame_v1::Event::Ready { .. } => {
                if let Some(pending) = state.pending.remove(registry_name) {
                    let uuid = state
                        .output_mut(*registry_name)
                        .and_then(|info| info.name.clone());

                    match (uuid, pending.fd, pending.stride) {
                        (Some(uuid), Some(fd), Some(stride)) => {
                            state.ready.push((
                                uuid,
                                RemoteBuffer {
                                    fd,
                                    width: pending.width,
                                    height: pending.height,
                                    stride,
                                    format: pending.format,
                                },
                            ));
                        }
                        _ => {
                            let err = CaptureError::Protocol(
                                "frame ready without a descriptor".to_string(),
                            );
                            log::warn!("{err}, dropping");
                        }
                    }
                }
                if let Some(info) = state.output_mut(*registry_name) {
                    info.frame_inflight = false;
                }
                frame.destroy();
            }
            zwlr_export_dmabuf_frame_v1::Event::Cancel { reason } => {
                // Non-structural: the loop requests a fresh frame next cycle.
                let err =
                    CaptureError::Protocol(format!("frame canceled by compositor: {reason:?}"));
                log::warn!("{err}");
                state.pending.remove(registry_name);
                if let Some(info) = state.output_mut(*registry_name) {
                    info.frame_inflight = false;
                }
                frame.destroy();
            }
            _ => {}
        }
    }
}

impl Dispatch<zwlr_export_dmabuf_manager_v1::ZwlrExportDmabufManagerV1, ()> for State {
    fn event(
        _state: &mut State,
        _manager: &zwlr_export_dmabuf_manager_v1::ZwlrExportDmabufManagerV1,
        _event: zwlr_export_dmabuf_manager_v1::Event,
        _: &(),
        _connection: &Connection,
        _queue_handle: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<zxdg_output_manager_v1::ZxdgOutputManagerV1, ()> for State {
    fn event(
        _state: &mut State,
        _manager: &zxdg_output_manager_v1::ZxdgOutputManagerV1,
        _event: zxdg_output_manager_v1::Event,
        _: &(),
        _connection: &Connection,
        _queue_handle: &QueueHandle<Self>,
    ) {
    }
}

pub(crate) fn connect_and_get_output_info()
-> Result<(State, wayland_client::EventQueue<State>), CaptureError> {
    let connection = Connection::connect_to_env()?;

    let mut event_queue = connection.new_event_queue();

    let wl_display = connection.display();
    wl_display.get_registry(&event_queue.handle(), ());
    wl_display.sync(&event_queue.handle(), ());

    let mut state = State::default();

    while !state.done {
        event_queue.blocking_dispatch(&mut state)?;
    }

    let xdg_output_manager = state.xdg_output_manager.clone().ok_or_else(|| {
        CaptureError::Unimplemented("compositor does not provide xdg-output".to_string())
    })?;

    for info in &state.output_infos {
        xdg_output_manager.get_xdg_output(
            &info.wl_output,
            &event_queue.handle(),
            info.registry_name,
        );
    }

    while state.output_infos.iter().any(|info| {
        info.name.is_none() || info.logical_position.is_none() || info.logical_size.is_none()
    }) {
        event_queue.blocking_dispatch(&mut state)?;
    }

    Ok((state, event_queue))
}
