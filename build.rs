#[cfg(feature = "backend_egl")]
fn gl_generate() {
    use gl_generator::{Api, Fallbacks, Profile, Registry};
    use std::{env, fs::File, path::PathBuf};

    let dest = PathBuf::from(&env::var("OUT_DIR").unwrap());

    let mut file = File::create(dest.join("egl_bindings.rs")).unwrap();
    Registry::new(
        Api::Egl,
        (1, 5),
        Profile::Core,
        Fallbacks::All,
        [
            "EGL_EXT_platform_base",
            "EGL_KHR_platform_gbm",
            "EGL_MESA_platform_gbm",
        ],
    )
    .write_bindings(gl_generator::GlobalGenerator, &mut file)
    .unwrap();

    // desktop GL, immediate mode entry points are part of 2.1 compatibility
    let mut file = File::create(dest.join("gl_bindings.rs")).unwrap();
    Registry::new(Api::Gl, (2, 1), Profile::Compatibility, Fallbacks::None, [])
        .write_bindings(gl_generator::StructGenerator, &mut file)
        .unwrap();
}

fn main() {
    #[cfg(feature = "backend_egl")]
    gl_generate();
}
