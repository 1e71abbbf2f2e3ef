#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
// Allow acronyms like EGL
#![allow(clippy::upper_case_acronyms)]

//! # drminfo: poking at the linux display stack
//!
//! This crate holds everything behind a small collection of diagnostic tools for
//! DRM/KMS devices and legacy framebuffers: `drminfo`, `drmtest`, `egltest`,
//! `fbinfo`, `fbtest`, `prime` and `virtiotest`. The binaries themselves live in the
//! `drminfo-tools` crate and are thin wrappers around this library.
//!
//! ## Structure of the crate
//!
//! - [`drm`] opens cards, lists their resources, sets modes, manages dumb buffers
//!   and framebuffers, obtains leases and drives the virtio-gpu specific ioctls.
//! - [`format`] is the table of framebuffer formats all tools share.
//! - [`render`] draws the test pattern (or an image) and converts it into any of
//!   those formats.
//! - [`fbdev`] handles `/dev/fbN` devices.
//! - `egl` renders with desktop OpenGL through GBM (feature `backend_egl`).
//! - `prime` checks dma-buf export and import between cards (feature `backend_gbm`).
//! - [`session`] opens device nodes, directly or through logind.
//! - [`selftest`], [`tty`] and [`complete`] are the small helpers shared by the tools.
//!
//! ### Logging
//!
//! drminfo makes extensive use of [`tracing`] for its internal logging. User facing
//! output (device listings, test results) is printed, never logged.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod complete;
pub mod drm;
#[cfg(feature = "backend_egl")]
pub mod egl;
pub mod fbdev;
pub mod format;
#[cfg(feature = "backend_gbm")]
pub mod prime;
pub mod render;
pub mod selftest;
pub mod session;
pub mod tty;
pub mod utils;
