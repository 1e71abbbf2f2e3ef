//! OpenGL rendering to a DRM output through GBM and EGL
//!
//! libEGL is loaded at runtime, the GL entry points are resolved with
//! `eglGetProcAddress`. An [`EglOutput`] renders into a GBM surface of the size of a
//! [`DrmOutput`]. Each [`flush`](EglOutput::flush) swaps buffers, attaches a
//! framebuffer to the new front buffer and scans it out.

use std::{
    ffi::{c_void, CStr},
    fmt, ptr,
};

use drm::control::Device as ControlDevice;
use gbm::{AsRaw, BufferObject, BufferObjectFlags, Format as GbmFormat};
use tracing::{debug, info, info_span, trace, warn};

use crate::drm::{dumb::Framebuffer, DrmCard, DrmOutput};

mod error;
#[allow(non_camel_case_types, dead_code, unused_mut, non_upper_case_globals)]
pub mod ffi;

pub use self::error::*;
use self::ffi::egl::types::{EGLConfig, EGLContext, EGLDisplay, EGLSurface};

const GBM_PLATFORM_EXTENSIONS: [&str; 2] = ["EGL_MESA_platform_gbm", "EGL_KHR_platform_gbm"];

/// Version strings of the OpenGL implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlInfo {
    /// `GL_VERSION`
    pub version: String,
    /// `GL_SHADING_LANGUAGE_VERSION`
    pub shading_language: String,
    /// `GL_VENDOR`
    pub vendor: String,
    /// `GL_RENDERER`
    pub renderer: String,
}

impl fmt::Display for GlInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "opengl version:  {}", self.version)?;
        writeln!(f, "shader version:  {}", self.shading_language)?;
        writeln!(f, "vendor:          {}", self.vendor)?;
        writeln!(f, "renderer:        {}", self.renderer)
    }
}

/// A desktop OpenGL context rendering to a GBM surface
pub struct EglOutput {
    front: Option<(BufferObject<()>, Framebuffer)>,
    gl: ffi::gl::Gl,
    display: EGLDisplay,
    context: EGLContext,
    surface: EGLSurface,
    gbm_surface: gbm::Surface<()>,
    gbm: gbm::Device<DrmCard>,
    card: DrmCard,
    span: tracing::Span,
}

impl fmt::Debug for EglOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EglOutput")
            .field("display", &self.display)
            .field("context", &self.context)
            .field("surface", &self.surface)
            .field("card", &self.card)
            .finish_non_exhaustive()
    }
}

impl EglOutput {
    /// Sets up GBM and EGL for `output` and makes the context current.
    pub fn new(output: &DrmOutput) -> Result<EglOutput, Error> {
        let span = info_span!("egl", output = output.name());
        let _guard = span.enter();

        ffi::make_sure_egl_is_loaded()?;

        let card = output.card().clone();
        let gbm = gbm::Device::new(card.clone()).map_err(Error::GbmDevice)?;
        let (w, h) = output.size();
        let gbm_surface = gbm
            .create_surface::<()>(w, h, GbmFormat::Xrgb8888, BufferObjectFlags::RENDERING)
            .map_err(Error::GbmSurface)?;
        debug!(w, h, "created gbm surface");

        let display = get_display(&gbm)?;

        let mut major = 0;
        let mut minor = 0;
        wrap_egl_bool(|| unsafe { ffi::egl::Initialize(display, &mut major, &mut minor) })
            .map_err(Error::InitFailed)?;
        info!(major, minor, "initialized egl display");

        wrap_egl_bool(|| unsafe { ffi::egl::BindAPI(ffi::egl::OPENGL_API) }).map_err(Error::BindApiFailed)?;

        let config = choose_config(display)?;

        let ctx_attribs = [ffi::egl::NONE as ffi::EGLint];
        let context = wrap_egl_call(|| unsafe {
            ffi::egl::CreateContext(display, config, ffi::egl::NO_CONTEXT, ctx_attribs.as_ptr())
        })
        .map_err(Error::ContextCreationFailed)?;
        if context == ffi::egl::NO_CONTEXT {
            return Err(Error::ContextCreationFailed(EGLError::Failed));
        }

        wrap_egl_bool(|| unsafe {
            ffi::egl::MakeCurrent(display, ffi::egl::NO_SURFACE, ffi::egl::NO_SURFACE, context)
        })
        .map_err(Error::MakeCurrentFailed)?;

        let surface = wrap_egl_call(|| unsafe {
            ffi::egl::CreateWindowSurface(
                display,
                config,
                gbm_surface.as_raw() as ffi::NativeWindowType,
                ptr::null(),
            )
        })
        .map_err(Error::SurfaceCreationFailed)?;
        if surface == ffi::egl::NO_SURFACE {
            return Err(Error::SurfaceCreationFailed(EGLError::Failed));
        }

        wrap_egl_bool(|| unsafe { ffi::egl::MakeCurrent(display, surface, surface, context) })
            .map_err(Error::MakeCurrentFailed)?;

        let gl = ffi::gl::Gl::load_with(|s| unsafe { ffi::get_proc_address(s) });

        drop(_guard);
        Ok(EglOutput {
            front: None,
            gl,
            display,
            context,
            surface,
            gbm_surface,
            gbm,
            card,
            span,
        })
    }

    /// Version strings of the GL implementation
    pub fn info(&self) -> GlInfo {
        GlInfo {
            version: self.gl_string(ffi::gl::VERSION),
            shading_language: self.gl_string(ffi::gl::SHADING_LANGUAGE_VERSION),
            vendor: self.gl_string(ffi::gl::VENDOR),
            renderer: self.gl_string(ffi::gl::RENDERER),
        }
    }

    /// Supported GL extensions
    pub fn extensions(&self) -> Vec<String> {
        self.gl_string(ffi::gl::EXTENSIONS)
            .split(' ')
            .filter(|ext| !ext.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn gl_string(&self, name: ffi::gl::types::GLenum) -> String {
        let p = unsafe { self.gl.GetString(name) };
        if p.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(p as *const _) }.to_string_lossy().into_owned()
    }

    /// Draws a triangle with blue, green and red corners on dark grey.
    pub fn draw(&self) {
        unsafe {
            self.gl.ClearColor(0.2, 0.2, 0.2, 1.0);
            self.gl.Clear(ffi::gl::COLOR_BUFFER_BIT);

            self.gl.Begin(ffi::gl::TRIANGLES);
            self.gl.Color3f(0.0, 0.0, 1.0);
            self.gl.Vertex2f(-0.9, -0.9);
            self.gl.Color3f(0.0, 1.0, 0.0);
            self.gl.Vertex2f(0.9, 0.9);
            self.gl.Color3f(1.0, 0.0, 0.0);
            self.gl.Vertex2f(0.9, -0.9);
            self.gl.End();

            self.gl.Flush();
        }
    }

    /// Presents the rendered frame on `output`.
    ///
    /// The buffer and framebuffer shown before are released afterwards.
    pub fn flush(&mut self, output: &DrmOutput) -> Result<(), Error> {
        let _guard = self.span.enter();
        wrap_egl_bool(|| unsafe { ffi::egl::SwapBuffers(self.display, self.surface) })
            .map_err(Error::SwapBuffersFailed)?;

        // SAFETY: eglSwapBuffers was called right before
        let bo = unsafe { self.gbm_surface.lock_front_buffer() }.map_err(|err| {
            warn!(?err, "no front buffer");
            Error::LockFrontBuffer
        })?;

        let fb = self
            .card
            .add_framebuffer(&bo, 24, 32)
            .map_err(|source| self.card.access_error("drmModeAddFB() failed", source))?;
        let fb = Framebuffer::from_handle(&self.card, fb);
        trace!(fb = ?fb.handle(), "new front buffer");
        output.show_fb(fb.handle())?;

        // dropping the old buffer object hands it back to the surface
        self.front = Some((bo, fb));
        Ok(())
    }
}

impl Drop for EglOutput {
    fn drop(&mut self) {
        let _guard = self.span.enter();
        self.front.take();
        unsafe {
            ffi::egl::MakeCurrent(
                self.display,
                ffi::egl::NO_SURFACE,
                ffi::egl::NO_SURFACE,
                ffi::egl::NO_CONTEXT,
            );
            ffi::egl::DestroySurface(self.display, self.surface);
            ffi::egl::DestroyContext(self.display, self.context);
            ffi::egl::Terminate(self.display);
        }
        debug!(gbm = ?self.gbm.as_raw(), "egl torn down");
    }
}

fn client_extensions() -> Vec<String> {
    let p = unsafe { ffi::egl::QueryString(ffi::egl::NO_DISPLAY, ffi::egl::EXTENSIONS as i32) };
    if p.is_null() {
        // EGL_EXT_client_extensions missing
        return Vec::new();
    }
    unsafe { CStr::from_ptr(p) }
        .to_string_lossy()
        .split(' ')
        .map(str::to_string)
        .collect()
}

fn get_display(gbm: &gbm::Device<DrmCard>) -> Result<EGLDisplay, Error> {
    let extensions = client_extensions();
    let platform = GBM_PLATFORM_EXTENSIONS
        .iter()
        .any(|ext| extensions.iter().any(|x| x == ext));

    let display = if platform && ffi::egl::GetPlatformDisplayEXT::is_loaded() {
        debug!("using eglGetPlatformDisplayEXT(EGL_PLATFORM_GBM_MESA)");
        wrap_egl_call(|| unsafe {
            ffi::egl::GetPlatformDisplayEXT(
                ffi::egl::PLATFORM_GBM_MESA,
                gbm.as_raw() as *mut c_void,
                ptr::null(),
            )
        })
    } else {
        debug!("using eglGetDisplay");
        wrap_egl_call(|| unsafe { ffi::egl::GetDisplay(gbm.as_raw() as ffi::NativeDisplayType) })
    }
    .map_err(Error::DisplayNotSupported)?;

    if display == ffi::egl::NO_DISPLAY {
        return Err(Error::DisplayNotSupported(EGLError::BadDisplay));
    }
    Ok(display)
}

/// Picks a window config for desktop GL, preferring one with a XRGB8888 native visual.
fn choose_config(display: EGLDisplay) -> Result<EGLConfig, Error> {
    let attribs = [
        ffi::egl::RENDERABLE_TYPE as ffi::EGLint,
        ffi::egl::OPENGL_BIT as ffi::EGLint,
        ffi::egl::SURFACE_TYPE as ffi::EGLint,
        ffi::egl::WINDOW_BIT as ffi::EGLint,
        ffi::egl::RED_SIZE as ffi::EGLint,
        5,
        ffi::egl::GREEN_SIZE as ffi::EGLint,
        5,
        ffi::egl::BLUE_SIZE as ffi::EGLint,
        5,
        ffi::egl::ALPHA_SIZE as ffi::EGLint,
        0,
        ffi::egl::NONE as ffi::EGLint,
    ];

    let mut num_configs = 0;
    wrap_egl_bool(|| unsafe {
        ffi::egl::ChooseConfig(display, attribs.as_ptr(), ptr::null_mut(), 0, &mut num_configs)
    })
    .map_err(Error::ConfigFailed)?;
    if num_configs == 0 {
        return Err(Error::NoAvailablePixelFormat);
    }

    let mut configs: Vec<EGLConfig> = Vec::with_capacity(num_configs as usize);
    wrap_egl_bool(|| unsafe {
        ffi::egl::ChooseConfig(
            display,
            attribs.as_ptr(),
            configs.as_mut_ptr(),
            num_configs,
            &mut num_configs,
        )
    })
    .map_err(Error::ConfigFailed)?;
    unsafe {
        configs.set_len(num_configs as usize);
    }

    let xrgb = GbmFormat::Xrgb8888 as u32 as ffi::EGLint;
    let native = configs.iter().copied().find(|config| {
        let mut id = 0;
        let ok = unsafe { ffi::egl::GetConfigAttrib(display, *config, ffi::egl::NATIVE_VISUAL_ID as ffi::EGLint, &mut id) };
        ok == ffi::egl::TRUE && id == xrgb
    });
    trace!(count = configs.len(), native = native.is_some(), "egl configs");
    native
        .or_else(|| configs.first().copied())
        .ok_or(Error::NoAvailablePixelFormat)
}
