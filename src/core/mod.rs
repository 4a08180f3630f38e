//! Core module
//!
//! Value types shared by the render targets and the backends.
mod color;
pub use color::*;
mod handle;
pub use handle::*;
mod texture;
pub use texture::*;
mod typedef;
pub use typedef::*;
