use crate::{
    core::VertexBufferHandle,
    render::{GraphicsBackend, Topology},
};
use std::{ops::Range, sync::Arc};

/// Anything that can issue a draw call with the vertex data it was
/// configured with.
pub trait Geometry {
    fn draw(&self);
}

/// Vertex positions uploaded to a [`GraphicsBackend`], drawn with a fixed
/// topology and vertex range. The buffer is deleted on drop.
pub struct VertexArray<B: GraphicsBackend + ?Sized> {
    backend: Arc<B>,
    buffer: VertexBufferHandle,
    topology: Topology,
    vertices: Range<u32>,
}

impl<B: GraphicsBackend + ?Sized> VertexArray<B> {
    /// Uploads `positions` and draws all of them.
    pub fn new(backend: Arc<B>, positions: &[[f32; 3]], topology: Topology) -> Self {
        let buffer = backend.create_vertex_buffer(positions);
        Self {
            backend,
            buffer,
            topology,
            vertices: 0..positions.len() as u32,
        }
    }

    /// The small triangle anchored at the origin used by diagnostics.
    pub fn triangle(backend: Arc<B>) -> Self {
        const POSITIONS: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [0.0, 0.5, 0.0]];
        Self::new(backend, &POSITIONS, Topology::Triangles)
    }

    /// Two triangles covering clip space, for composition passes.
    pub fn fullscreen_quad(backend: Arc<B>) -> Self {
        const POSITIONS: [[f32; 3]; 4] = [
            [-1.0, -1.0, 0.0],
            [1.0, -1.0, 0.0],
            [-1.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
        ];
        Self::new(backend, &POSITIONS, Topology::TriangleStrip)
    }
}

impl<B: GraphicsBackend + ?Sized> Geometry for VertexArray<B> {
    fn draw(&self) {
        self.backend
            .draw_arrays(self.buffer, self.topology, self.vertices.clone());
    }
}

impl<B: GraphicsBackend + ?Sized> Drop for VertexArray<B> {
    fn drop(&mut self) {
        self.backend.delete_vertex_buffer(self.buffer);
    }
}
