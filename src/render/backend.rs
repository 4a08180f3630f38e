use crate::{
    core::{
        Color, FramebufferHandle, ProgramHandle, RenderbufferHandle, TextureDesc, TextureHandle,
        VertexBufferHandle,
    },
    error::{Error, GraphicsApiError},
    render::{ShaderSource, Viewport},
};
use glam::UVec2;
use std::ops::Range;

/// Number of texture units a backend exposes.
pub const MAX_TEXTURE_UNITS: usize = 16;

/// Attachments affected by [`GraphicsBackend::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClearFlags {
    pub color: bool,
    pub depth_stencil: bool,
}

impl ClearFlags {
    pub const ALL: Self = Self {
        color: true,
        depth_stencil: true,
    };
}

/// Primitive topology of a draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
}

impl From<Topology> for wgpu::PrimitiveTopology {
    fn from(t: Topology) -> Self {
        match t {
            Topology::Points => wgpu::PrimitiveTopology::PointList,
            Topology::Lines => wgpu::PrimitiveTopology::LineList,
            Topology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            Topology::Triangles => wgpu::PrimitiveTopology::TriangleList,
            Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }
}

/// Order in which a backend returns the rows of a texture readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrder {
    /// First row is the top of the image.
    TopDown,
    /// First row is the bottom of the image (GL convention).
    BottomUp,
}

/// Location of a sampler uniform inside a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// The graphics context a render target talks to.
///
/// Models the state of an immediate-mode context: a single "bound
/// framebuffer" slot (`None` is the default target), a viewport, a clear
/// color, texture units, and the current program. All methods take `&self`;
/// implementations synchronize internally so the context can be shared by
/// `Arc` between targets, programs and geometry.
///
/// Calls never fail directly. Errors are queued and drained with
/// [`take_error`](Self::take_error), mirroring a driver's error flag.
pub trait GraphicsBackend: Send + Sync {
    /// Allocates an RGB8 texture with undefined contents.
    fn create_texture(&self, desc: &TextureDesc) -> TextureHandle;
    /// Reallocates the storage of `texture`. The handle stays valid, the
    /// contents become undefined.
    fn resize_texture(&self, texture: TextureHandle, size: UVec2);
    fn delete_texture(&self, texture: TextureHandle);

    /// Allocates depth24 + stencil8 storage.
    fn create_renderbuffer(&self, size: UVec2) -> RenderbufferHandle;
    fn resize_renderbuffer(&self, renderbuffer: RenderbufferHandle, size: UVec2);
    fn delete_renderbuffer(&self, renderbuffer: RenderbufferHandle);

    /// Creates a framebuffer with `color` and `depth_stencil` attached.
    ///
    /// Leaves the bound framebuffer unchanged.
    fn create_framebuffer(
        &self,
        color: TextureHandle,
        depth_stencil: RenderbufferHandle,
    ) -> FramebufferHandle;
    fn delete_framebuffer(&self, framebuffer: FramebufferHandle);

    /// Binds `framebuffer` as the render target, or the default target for
    /// `None`.
    fn bind_framebuffer(&self, framebuffer: Option<FramebufferHandle>);
    fn bound_framebuffer(&self) -> Option<FramebufferHandle>;

    fn viewport(&self) -> Viewport;
    fn set_viewport(&self, viewport: Viewport);

    fn clear_color(&self) -> Color;
    fn set_clear_color(&self, color: Color);
    /// Clears the attachments of the bound framebuffer. Ignores the viewport.
    fn clear(&self, flags: ClearFlags);

    /// Binds `texture` to texture unit `unit`.
    fn bind_texture(&self, unit: u32, texture: TextureHandle);

    fn create_program(&self, source: &ShaderSource) -> Result<ProgramHandle, Error>;
    fn delete_program(&self, program: ProgramHandle);
    fn use_program(&self, program: ProgramHandle);
    fn current_program(&self) -> Option<ProgramHandle>;
    /// Points a sampler uniform of the current program at texture unit
    /// `unit`.
    fn set_sampler_uniform(&self, location: UniformLocation, unit: u32);

    fn create_vertex_buffer(&self, positions: &[[f32; 3]]) -> VertexBufferHandle;
    fn delete_vertex_buffer(&self, buffer: VertexBufferHandle);
    /// Draws `vertices` of `buffer` into the bound framebuffer with the
    /// current program and viewport.
    fn draw_arrays(&self, buffer: VertexBufferHandle, topology: Topology, vertices: Range<u32>);

    /// Reads back the full contents of `texture` as tightly packed RGB8
    /// rows, in [`row_order`](Self::row_order). Blocks until the data is
    /// available.
    fn read_texture(&self, texture: TextureHandle) -> Result<image::RgbImage, Error>;
    fn row_order(&self) -> RowOrder;

    /// Pops the oldest pending error, if any.
    fn take_error(&self) -> Option<GraphicsApiError>;
}

/// Drains every pending backend error, logging each one.
///
/// Returns the errors so callers can decide whether to escalate.
pub fn drain_errors<B: GraphicsBackend + ?Sized>(
    backend: &B,
    context: &str,
) -> Vec<GraphicsApiError> {
    let mut errors = Vec::new();
    while let Some(err) = backend.take_error() {
        log::error!("{}: {}", context, err);
        errors.push(err);
    }
    errors
}
