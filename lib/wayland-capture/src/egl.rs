use crate::{CaptureError, adapter::RemoteBuffer};
use image::RgbaImage;
use khronos_egl as egl;
use std::{ffi::c_void, os::fd::AsRawFd, ptr};

// dmabuf import attributes, not exported by khronos-egl.
const EGL_LINUX_DMA_BUF_EXT: egl::Enum = 0x3270;
const EGL_LINUX_DRM_FOURCC_EXT: egl::Int = 0x3271;
const EGL_DMA_BUF_PLANE0_FD_EXT: egl::Int = 0x3272;
const EGL_DMA_BUF_PLANE0_OFFSET_EXT: egl::Int = 0x3273;
const EGL_DMA_BUF_PLANE0_PITCH_EXT: egl::Int = 0x3274;

type EglCreateImageKhr = unsafe extern "system" fn(
    display: *mut c_void,
    context: *mut c_void,
    target: egl::Enum,
    buffer: *mut c_void,
    attrib_list: *const egl::Int,
) -> *mut c_void;

type EglDestroyImageKhr =
    unsafe extern "system" fn(display: *mut c_void, image: *mut c_void) -> egl::Boolean;

type GlImageTargetTexture2DOes =
    unsafe extern "system" fn(target: gl::types::GLenum, image: *const c_void);

/// Process-wide EGL/GLES context used to read dmabufs back through the GPU.
///
/// The context is bound to the thread that created it; every call into this
/// struct must happen on that thread. The capture loop owns both the wayland
/// event queue and this context, which keeps the two on the same thread for
/// the lifetime of the connection.
pub struct GpuReadback {
    egl: egl::DynamicInstance<egl::EGL1_4>,
    display: egl::Display,
    context: egl::Context,
    create_image: EglCreateImageKhr,
    destroy_image: EglDestroyImageKhr,
    image_target_texture: GlImageTargetTexture2DOes,
}

impl GpuReadback {
    pub fn new() -> Result<Self, CaptureError> {
        let instance = unsafe { egl::DynamicInstance::<egl::EGL1_4>::load_required() }
            .map_err(|e| CaptureError::Gpu(format!("libEGL load failed: {e}")))?;

        let display = unsafe { instance.get_display(egl::DEFAULT_DISPLAY) }
            .ok_or_else(|| CaptureError::Gpu("no EGL display".to_string()))?;

        instance
            .initialize(display)
            .map_err(|e| CaptureError::Gpu(format!("eglInitialize failed: {e}")))?;

        instance
            .bind_api(egl::OPENGL_ES_API)
            .map_err(|e| CaptureError::Gpu(format!("eglBindAPI failed: {e}")))?;

        let config_attribs = [
            egl::SURFACE_TYPE,
            egl::PBUFFER_BIT,
            egl::RENDERABLE_TYPE,
            egl::OPENGL_ES2_BIT,
            egl::NONE,
        ];
        let config = instance
            .choose_first_config(display, &config_attribs)
            .map_err(|e| CaptureError::Gpu(format!("eglChooseConfig failed: {e}")))?
            .ok_or_else(|| CaptureError::Gpu("no matching EGL config".to_string()))?;

        let context_attribs = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];
        let context = instance
            .create_context(display, config, None, &context_attribs)
            .map_err(|e| CaptureError::Gpu(format!("eglCreateContext failed: {e}")))?;

        // Surfaceless current: only FBO rendering is needed.
        instance
            .make_current(display, None, None, Some(context))
            .map_err(|e| CaptureError::Gpu(format!("eglMakeCurrent failed: {e}")))?;

        let create_image = lookup(&instance, "eglCreateImageKHR")?;
        let destroy_image = lookup(&instance, "eglDestroyImageKHR")?;
        let image_target_texture = lookup(&instance, "glEGLImageTargetTexture2DOES")?;

        gl::load_with(|name| {
            instance
                .get_proc_address(name)
                .map_or(ptr::null(), |f| f as *const c_void)
        });

        Ok(Self {
            egl: instance,
            display,
            context,
            create_image: unsafe { std::mem::transmute::<*const c_void, EglCreateImageKhr>(create_image) },
            destroy_image: unsafe {
                std::mem::transmute::<*const c_void, EglDestroyImageKhr>(destroy_image)
            },
            image_target_texture: unsafe {
                std::mem::transmute::<*const c_void, GlImageTargetTexture2DOes>(image_target_texture)
            },
        })
    }

    /// Imports the dmabuf as an external image, renders it into a 2-D texture
    /// attached to a framebuffer object and reads the pixels back as
    /// RGBA8888. All GPU objects are destroyed before returning.
    pub fn read_to_rgba(&mut self, buffer: &RemoteBuffer) -> Result<RgbaImage, CaptureError> {
        let attribs: [egl::Int; 13] = [
            egl::WIDTH as egl::Int,
            buffer.width as egl::Int,
            egl::HEIGHT as egl::Int,
            buffer.height as egl::Int,
            EGL_LINUX_DRM_FOURCC_EXT,
            buffer.format as egl::Int,
            EGL_DMA_BUF_PLANE0_FD_EXT,
            buffer.fd.as_raw_fd(),
            EGL_DMA_BUF_PLANE0_OFFSET_EXT,
            0,
            EGL_DMA_BUF_PLANE0_PITCH_EXT,
            buffer.stride as egl::Int,
            egl::NONE as egl::Int,
        ];

        let image = unsafe {
            (self.create_image)(
                self.display.as_ptr(),
                ptr::null_mut(), // EGL_NO_CONTEXT, required for dmabuf import
                EGL_LINUX_DMA_BUF_EXT,
                ptr::null_mut(),
                attribs.as_ptr(),
            )
        };
        if image.is_null() {
            return Err(CaptureError::BufferImport(
                "eglCreateImageKHR returned no image".to_string(),
            ));
        }

        let mut pixels = vec![0u8; buffer.width as usize * buffer.height as usize * 4];

        let result = unsafe {
            let mut texture = 0;
            gl::GenTextures(1, &mut texture);
            gl::BindTexture(gl::TEXTURE_2D, texture);
            (self.image_target_texture)(gl::TEXTURE_2D, image);

            let mut fbo = 0;
            gl::GenFramebuffers(1, &mut fbo);
            gl::BindFramebuffer(gl::FRAMEBUFFER, fbo);
            gl::FramebufferTexture2D(
                gl::FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                gl::TEXTURE_2D,
                texture,
                0,
            );

            let status = gl::CheckFramebufferStatus(gl::FRAMEBUFFER);
            let result = if status == gl::FRAMEBUFFER_COMPLETE {
                gl::PixelStorei(gl::PACK_ALIGNMENT, 1);
                gl::ReadPixels(
                    0,
                    0,
                    buffer.width as i32,
                    buffer.height as i32,
                    gl::RGBA,
                    gl::UNSIGNED_BYTE,
                    pixels.as_mut_ptr() as *mut c_void,
                );
                Ok(())
            } else {
                Err(CaptureError::Gpu(format!(
                    "framebuffer incomplete: {status:#x}"
                )))
            };

            gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
            gl::DeleteFramebuffers(1, &fbo);
            gl::BindTexture(gl::TEXTURE_2D, 0);
            gl::DeleteTextures(1, &texture);
            (self.destroy_image)(self.display.as_ptr(), image);

            result
        };

        result?;

        RgbaImage::from_raw(buffer.width, buffer.height, pixels)
            .ok_or_else(|| CaptureError::Gpu("readback buffer size mismatch".to_string()))
    }
}

impl Drop for GpuReadback {
    fn drop(&mut self) {
        _ = self.egl.make_current(self.display, None, None, None);
        _ = self.egl.destroy_context(self.display, self.context);
        _ = self.egl.terminate(self.display);
    }
}

fn lookup(
    instance: &egl::DynamicInstance<egl::EGL1_4>,
    name: &str,
) -> Result<*const c_void, CaptureError> {
    instance
        .get_proc_address(name)
        .map(|f| f as *const c_void)
        .ok_or_else(|| CaptureError::Gpu(format!("missing EGL extension function `{name}`")))
}
