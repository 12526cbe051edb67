use crate::{CaptureError, egl::GpuReadback};
use image::RgbaImage;
use std::{
    fs,
    os::fd::{AsRawFd, OwnedFd},
};

/// Product names whose GPU stack cannot serve CPU-mapped dmabufs; those
/// boards go through the textured readback path instead.
const TEXTURED_PRODUCTS: [&str; 4] = ["KLVV", "KLVU", "PGUV", "PGUW"];

const DMI_PRODUCT_NAME: &str = "/sys/class/dmi/id/product_name";

/// Hardware class resolved once at startup from the DMI product name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductClass {
    /// Buffers are readable through a plain memory mapping.
    Standard,
    /// Buffers must be imported as GPU images and read back.
    GpuReadback,
}

impl ProductClass {
    pub fn detect() -> Self {
        let name = fs::read_to_string(DMI_PRODUCT_NAME).unwrap_or_default();
        let class = Self::from_product_name(&name);
        log::info!("product name {:?} resolved to {class:?}", name.trim());
        class
    }

    pub fn from_product_name(name: &str) -> Self {
        let name = name.trim().to_ascii_uppercase();
        if TEXTURED_PRODUCTS.iter().any(|p| name.contains(p)) {
            Self::GpuReadback
        } else {
            Self::Standard
        }
    }
}

/// One frame handed over by the compositor: a dmabuf plus its geometry.
///
/// The descriptor is owned and closed exactly once when this struct drops,
/// after the adapter has finished reading it.
#[derive(Debug)]
pub struct RemoteBuffer {
    pub fd: OwnedFd,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    /// DRM fourcc as announced by the compositor.
    pub format: u32,
}

/// Converts compositor buffers into owned RGBA8888 images.
pub enum BufferAdapter {
    Mapped,
    Textured(GpuReadback),
}

impl BufferAdapter {
    /// Picks the adapter variant for the running hardware. Falls back to the
    /// mapped variant when the GPU context cannot be created.
    pub fn new(class: ProductClass) -> Self {
        match class {
            ProductClass::Standard => Self::Mapped,
            ProductClass::GpuReadback => match GpuReadback::new() {
                Ok(gpu) => Self::Textured(gpu),
                Err(e) => {
                    log::warn!("gpu readback unavailable, falling back to mapped buffers: {e}");
                    Self::Mapped
                }
            },
        }
    }

    /// Normalises one buffer to RGBA8888. Errors are per-frame: the caller
    /// drops the frame and capture continues.
    pub fn to_rgba(&mut self, buffer: &RemoteBuffer) -> Result<RgbaImage, CaptureError> {
        match self {
            Self::Mapped => map_to_rgba(buffer),
            Self::Textured(gpu) => gpu.read_to_rgba(buffer),
        }
    }
}

/// Maps the descriptor read-only for `stride * height` bytes and copies the
/// pixel rows out, assuming the compositor delivers RGBA8888. The mapping is
/// released before return; the descriptor closes with the [`RemoteBuffer`].
fn map_to_rgba(buffer: &RemoteBuffer) -> Result<RgbaImage, CaptureError> {
    let len = buffer.stride as usize * buffer.height as usize;
    if len == 0 {
        return Err(CaptureError::BufferMap("zero-sized buffer".to_string()));
    }

    let mmap = unsafe {
        memmap2::MmapOptions::new()
            .len(len)
            .map(buffer.fd.as_raw_fd())
    }
    .map_err(|e| CaptureError::BufferMap(format!("dmabuf fd mmap failed: {e}")))?;

    Ok(copy_rows(
        &mmap,
        buffer.width,
        buffer.height,
        buffer.stride,
    ))
}

/// Packs a possibly padded `stride`-laid-out buffer into a tight RGBA image.
pub(crate) fn copy_rows(data: &[u8], width: u32, height: u32, stride: u32) -> RgbaImage {
    let row_bytes = width as usize * 4;
    if stride as usize == row_bytes {
        return RgbaImage::from_raw(width, height, data[..row_bytes * height as usize].to_vec())
            .unwrap_or_else(|| RgbaImage::new(width, height));
    }

    let mut out = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride as usize;
        out.extend_from_slice(&data[start..start + row_bytes]);
    }

    RgbaImage::from_raw(width, height, out).unwrap_or_else(|| RgbaImage::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_products_use_mapped_variant() {
        assert_eq!(
            ProductClass::from_product_name("ThinkPad X1 Carbon"),
            ProductClass::Standard
        );
        assert_eq!(ProductClass::from_product_name(""), ProductClass::Standard);
    }

    #[test]
    fn test_listed_products_use_textured_variant() {
        for name in ["KLVV", "klvu-wa1", "PGUV 2.0", "pguw"] {
            assert_eq!(
                ProductClass::from_product_name(name),
                ProductClass::GpuReadback,
                "{name}"
            );
        }
    }

    #[test]
    fn test_copy_rows_strips_stride_padding() {
        // 2x2 image with 4 bytes of padding per row.
        let mut data = Vec::new();
        for row in 0u8..2 {
            for px in 0u8..2 {
                data.extend_from_slice(&[row * 10 + px, 0, 0, 255]);
            }
            data.extend_from_slice(&[0xEE; 4]);
        }

        let img = copy_rows(&data, 2, 2, 12);
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(img.get_pixel(1, 1).0, [11, 0, 0, 255]);
    }

    #[test]
    fn test_copy_rows_tight_stride_is_passthrough() {
        let data = vec![5u8; 2 * 2 * 4];
        let img = copy_rows(&data, 2, 2, 8);
        assert_eq!(img.into_raw(), data);
    }
}
