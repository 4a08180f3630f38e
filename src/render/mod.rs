//! Rendering: the graphics backend abstraction, its wgpu and software
//! implementations, and the offscreen render target built on top of them.

mod backend;
mod context;
mod geometry;
mod gpu;
mod pipeline;
mod program;
mod sampler;
mod selftest;
mod software;
mod target;
pub mod util;
mod viewport;

pub use backend::*;
pub use context::*;
pub use geometry::*;
pub use gpu::*;
pub use pipeline::*;
pub use program::*;
pub use sampler::*;
pub use selftest::*;
pub use software::*;
pub use target::*;
pub use viewport::*;
