//! Various utilities functions and types

mod mmap;

pub use self::mmap::Mapping;
