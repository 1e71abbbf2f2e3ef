use std::io;

use super::ffi;
use crate::drm::AccessError;

/// Errors of the EGL bring-up
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// libEGL could not be loaded
    #[error("egl: loading libEGL.so.1 failed: {0}")]
    Load(String),
    /// `gbm_create_device` failed
    #[error("egl: gbm_create_device failed")]
    GbmDevice(#[source] io::Error),
    /// `gbm_surface_create` failed
    #[error("egl: gbm_create_surface failed")]
    GbmSurface(#[source] io::Error),
    /// Unable to obtain a valid EGL Display
    #[error("egl: eglGetDisplay failed")]
    DisplayNotSupported(#[source] EGLError),
    /// `eglInitialize` returned an error
    #[error("egl: eglInitialize failed")]
    InitFailed(#[source] EGLError),
    /// Desktop OpenGL is not available
    #[error("egl: eglBindAPI failed")]
    BindApiFailed(#[source] EGLError),
    /// `eglChooseConfig` failed
    #[error("egl: eglChooseConfig failed")]
    ConfigFailed(#[source] EGLError),
    /// No config matched the criteria
    #[error("egl: eglChooseConfig failed: no matching config")]
    NoAvailablePixelFormat,
    /// `eglCreateContext` failed
    #[error("egl: eglCreateContext failed")]
    ContextCreationFailed(#[source] EGLError),
    /// `eglCreateWindowSurface` failed
    #[error("egl: eglCreateWindowSurface failed")]
    SurfaceCreationFailed(#[source] EGLError),
    /// `eglMakeCurrent` failed
    #[error("egl: eglMakeCurrent failed")]
    MakeCurrentFailed(#[source] EGLError),
    /// `eglSwapBuffers` failed
    #[error("egl: eglSwapBuffers failed")]
    SwapBuffersFailed(#[source] EGLError),
    /// No buffer was rendered into the surface
    #[error("egl: gbm_surface_lock_front_buffer failed")]
    LockFrontBuffer,
    /// Showing the rendered buffer failed
    #[error("egl: {0}")]
    Drm(#[from] AccessError),
}

/// Raw EGL error
#[derive(thiserror::Error, Debug)]
pub enum EGLError {
    /// EGL is not initialized, or could not be initialized, for the specified EGL display connection.
    #[error(
        "EGL is not initialized, or could not be initialized, for the specified EGL display connection."
    )]
    NotInitialized,
    /// EGL cannot access a requested resource (for example a context is bound in another thread).
    #[error("EGL cannot access a requested resource (for example a context is bound in another thread).")]
    BadAccess,
    /// EGL failed to allocate resources for the requested operation.
    #[error("EGL failed to allocate resources for the requested operation.")]
    BadAlloc,
    /// An unrecognized attribute or attribute value was passed in the attribute list.
    #[error("An unrecognized attribute or attribute value was passed in the attribute list.")]
    BadAttribute,
    /// An EGLContext argument does not name a valid EGL rendering context.
    #[error("An EGLContext argument does not name a valid EGL rendering context.")]
    BadContext,
    /// An EGLConfig argument does not name a valid EGL frame buffer configuration.
    #[error("An EGLConfig argument does not name a valid EGL frame buffer configuration.")]
    BadConfig,
    /// The current surface of the calling thread is no longer valid.
    #[error("The current surface of the calling thread is no longer valid.")]
    BadCurrentSurface,
    /// An EGLDisplay argument does not name a valid EGL display connection.
    #[error("An EGLDisplay argument does not name a valid EGL display connection.")]
    BadDisplay,
    /// An EGLSurface argument does not name a valid surface configured for GL rendering.
    #[error("An EGLSurface argument does not name a valid surface configured for GL rendering.")]
    BadSurface,
    /// Arguments are inconsistent.
    #[error("Arguments are inconsistent.")]
    BadMatch,
    /// One or more argument values are invalid.
    #[error("One or more argument values are invalid.")]
    BadParameter,
    /// A NativeWindowType argument does not refer to a valid native window.
    #[error("A NativeWindowType argument does not refer to a valid native window.")]
    BadNativeWindow,
    /// A power management event has occurred.
    #[error("A power management event has occurred, the context is lost.")]
    ContextLost,
    /// The call returned a failure without setting an error
    #[error("The call failed without an EGL error code.")]
    Failed,
    /// An unknown error
    #[error("An unknown error ({0:x})")]
    Unknown(u32),
}

impl From<u32> for EGLError {
    fn from(value: u32) -> Self {
        match value {
            ffi::egl::NOT_INITIALIZED => EGLError::NotInitialized,
            ffi::egl::BAD_ACCESS => EGLError::BadAccess,
            ffi::egl::BAD_ALLOC => EGLError::BadAlloc,
            ffi::egl::BAD_ATTRIBUTE => EGLError::BadAttribute,
            ffi::egl::BAD_CONTEXT => EGLError::BadContext,
            ffi::egl::BAD_CONFIG => EGLError::BadConfig,
            ffi::egl::BAD_CURRENT_SURFACE => EGLError::BadCurrentSurface,
            ffi::egl::BAD_DISPLAY => EGLError::BadDisplay,
            ffi::egl::BAD_SURFACE => EGLError::BadSurface,
            ffi::egl::BAD_MATCH => EGLError::BadMatch,
            ffi::egl::BAD_PARAMETER => EGLError::BadParameter,
            ffi::egl::BAD_NATIVE_WINDOW => EGLError::BadNativeWindow,
            ffi::egl::CONTEXT_LOST => EGLError::ContextLost,
            x => EGLError::Unknown(x),
        }
    }
}

impl EGLError {
    fn from_last_call() -> Result<(), EGLError> {
        match unsafe { ffi::egl::GetError() as u32 } {
            ffi::egl::SUCCESS => Ok(()),
            x => Err(EGLError::from(x)),
        }
    }
}

pub(crate) fn wrap_egl_call<R, F: FnOnce() -> R>(call: F) -> Result<R, EGLError> {
    let res = call();
    EGLError::from_last_call().map(|()| res)
}

/// Like [`wrap_egl_call`] for calls returning `EGLBoolean`, a false result is an error
/// even if no error code was set.
pub(crate) fn wrap_egl_bool<F: FnOnce() -> ffi::egl::types::EGLBoolean>(call: F) -> Result<(), EGLError> {
    match wrap_egl_call(call)? {
        ffi::egl::FALSE => Err(EGLError::Failed),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert!(matches!(EGLError::from(0x3001), EGLError::NotInitialized));
        assert!(matches!(EGLError::from(0x3009), EGLError::BadMatch));
        assert!(matches!(EGLError::from(0x300E), EGLError::ContextLost));
        assert!(matches!(EGLError::from(0x1234), EGLError::Unknown(0x1234)));
    }
}
