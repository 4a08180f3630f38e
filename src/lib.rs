//! Offscreen render targets.
//!
//! An [`OffscreenTarget`] bundles a color texture, a depth/stencil
//! renderbuffer and the framebuffer joining them. Activate it to redirect
//! rendering into it, draw it back into another target with any
//! [`Geometry`] and [`ShaderProgram`], or read it back and save it as a
//! JPEG image.
//!
//! Targets talk to the GPU through the [`GraphicsBackend`] trait.
//! [`WgpuBackend`] drives real hardware through `wgpu`; [`SoftwareBackend`]
//! keeps everything in host memory and records draw calls, which makes it
//! suitable for tests.
//!
//! [`Geometry`]: render::Geometry
//! [`ShaderProgram`]: render::ShaderProgram

pub mod core;
pub mod error;
pub mod render;

pub use crate::{
    core::Color,
    error::{Error, GraphicsApiError, Result},
    render::{
        run_self_test, GraphicsBackend, OffscreenTarget, SoftwareBackend, TargetParams,
        WgpuBackend,
    },
};

static_assertions::assert_impl_all!(SoftwareBackend: Send, Sync);
static_assertions::assert_impl_all!(OffscreenTarget<SoftwareBackend>: Send, Sync);
