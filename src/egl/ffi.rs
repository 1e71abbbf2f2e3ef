#![allow(missing_docs)]

use std::{
    ffi::{c_void, CString},
    ptr,
};

use libc::c_long;

use super::Error;

pub type khronos_utime_nanoseconds_t = khronos_uint64_t;
pub type khronos_uint64_t = u64;
pub type khronos_ssize_t = c_long;
pub type EGLint = i32;
pub type EGLNativeDisplayType = NativeDisplayType;
pub type EGLNativePixmapType = NativePixmapType;
pub type EGLNativeWindowType = NativeWindowType;
pub type NativeDisplayType = *const c_void;
pub type NativePixmapType = *const c_void;
pub type NativeWindowType = *const c_void;

/// Loads libEGL symbols, if not loaded already.
pub fn make_sure_egl_is_loaded() -> Result<(), Error> {
    let lib = egl::LIB.as_ref().map_err(|err| Error::Load(err.to_string()))?;

    egl::LOAD.call_once(|| unsafe {
        egl::load_with(|sym| {
            let Ok(name) = CString::new(sym) else {
                return ptr::null();
            };
            match lib.get::<*mut c_void>(name.as_bytes_with_nul()) {
                Ok(x) => *x as *const _,
                Err(_) => ptr::null(),
            }
        });
        // extension entry points are only reachable through eglGetProcAddress
        egl::load_with(|sym| get_proc_address(sym));
    });

    if !egl::GetDisplay::is_loaded() {
        return Err(Error::Load("eglGetDisplay not found".into()));
    }
    Ok(())
}

/// Looks up an EGL or GL entry point.
///
/// # Safety
///
/// libEGL must be loaded.
pub unsafe fn get_proc_address(symbol: &str) -> *const c_void {
    match CString::new(symbol) {
        Ok(name) if egl::GetProcAddress::is_loaded() => egl::GetProcAddress(name.as_ptr()) as *const _,
        _ => ptr::null(),
    }
}

/// Module containing raw egl function bindings
#[allow(clippy::all, non_upper_case_globals, missing_debug_implementations)]
pub mod egl {
    use super::*;
    use libloading::Library;
    use once_cell::sync::Lazy;
    use std::sync::Once;

    pub static LIB: Lazy<Result<Library, libloading::Error>> =
        Lazy::new(|| unsafe { Library::new("libEGL.so.1") });

    pub static LOAD: Once = Once::new();

    include!(concat!(env!("OUT_DIR"), "/egl_bindings.rs"));
}

/// Module containing raw desktop GL function bindings
#[allow(clippy::all, non_upper_case_globals, non_camel_case_types, missing_debug_implementations)]
pub mod gl {
    include!(concat!(env!("OUT_DIR"), "/gl_bindings.rs"));
}
