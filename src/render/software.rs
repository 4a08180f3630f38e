//! CPU-side graphics backend.
//!
//! Keeps every resource in host memory and follows GL conventions: texture
//! rows are stored bottom-up and the viewport origin is the bottom-left
//! corner. Clears write real pixels; draw calls are recorded rather than
//! rasterized, together with the state they were issued with, so the
//! binding discipline of callers can be inspected.

use crate::{
    core::{
        Color, Framebuffer, FramebufferHandle, Handle, HandleMap, ProgramHandle, ProgramObject,
        Renderbuffer, RenderbufferHandle, Resource, SmlString, Texture, TextureDesc,
        TextureHandle, VertexBuffer, VertexBufferHandle,
    },
    error::{Error, GraphicsApiError},
    render::{
        ClearFlags, GraphicsBackend, RowOrder, ShaderSource, Topology, UniformLocation, Viewport,
        MAX_TEXTURE_UNITS,
    },
};
use glam::UVec2;
use std::{
    collections::VecDeque,
    ops::Range,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// A texture unit binding as seen by a recorded draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerBinding {
    pub location: UniformLocation,
    pub unit: u32,
    pub texture: Option<TextureHandle>,
}

/// A draw call recorded by [`SoftwareBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub program: ProgramHandle,
    /// `None` when drawing into the default target.
    pub framebuffer: Option<FramebufferHandle>,
    pub viewport: Viewport,
    pub topology: Topology,
    pub vertices: Range<u32>,
    /// One entry per sampler uniform of the program.
    pub samplers: Vec<SamplerBinding>,
}

/// Number of live resources of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveResources {
    pub textures: usize,
    pub renderbuffers: usize,
    pub framebuffers: usize,
    pub programs: usize,
    pub vertex_buffers: usize,
}

impl LiveResources {
    pub fn total(&self) -> usize {
        self.textures + self.renderbuffers + self.framebuffers + self.programs + self.vertex_buffers
    }
}

struct SoftTexture {
    desc: TextureDesc,
    /// Bottom-up RGB8 rows.
    pixels: Vec<u8>,
}

struct SoftRenderbuffer {
    size: UVec2,
    depth: f32,
    stencil: u8,
}

#[derive(Clone, Copy)]
struct SoftFramebuffer {
    color: TextureHandle,
    depth_stencil: RenderbufferHandle,
}

struct SoftProgram {
    label: SmlString,
    /// Texture unit read by each sampler uniform.
    sampler_units: Vec<u32>,
}

struct SoftState {
    textures: HandleMap<Texture, SoftTexture>,
    renderbuffers: HandleMap<Renderbuffer, SoftRenderbuffer>,
    framebuffers: HandleMap<Framebuffer, SoftFramebuffer>,
    programs: HandleMap<ProgramObject, SoftProgram>,
    vertex_buffers: HandleMap<VertexBuffer, Vec<[f32; 3]>>,
    default_size: UVec2,
    default_pixels: Vec<u8>,
    bound_framebuffer: Option<FramebufferHandle>,
    viewport: Viewport,
    clear_color: Color,
    clear_depth: f32,
    clear_stencil: u8,
    texture_units: [Option<TextureHandle>; MAX_TEXTURE_UNITS],
    current_program: Option<ProgramHandle>,
    draw_calls: Vec<DrawCall>,
    errors: VecDeque<GraphicsApiError>,
}

impl SoftState {
    fn error(&mut self, err: GraphicsApiError) {
        log::trace!("Software backend error: {}", err);
        self.errors.push_back(err);
    }

    fn invalid<T: Resource>(&mut self, handle: Handle<T>) {
        self.error(invalid_handle(handle));
    }
}

fn invalid_handle<T: Resource>(handle: Handle<T>) -> GraphicsApiError {
    GraphicsApiError::InvalidHandle {
        kind: T::NAME,
        index: handle.index(),
        generation: handle.generation(),
    }
}

fn rgb8_storage(size: UVec2) -> Vec<u8> {
    vec![0; size.x as usize * size.y as usize * 3]
}

fn fill(pixels: &mut [u8], rgb: [u8; 3]) {
    for texel in pixels.chunks_exact_mut(3) {
        texel.copy_from_slice(&rgb);
    }
}

/// Graphics backend emulated in host memory.
pub struct SoftwareBackend {
    state: Mutex<SoftState>,
}

impl SoftwareBackend {
    /// Creates a context whose default render target is `width` x `height`.
    ///
    /// As with a freshly created GL context the viewport covers the default
    /// target and the clear color is transparent black.
    pub fn new(width: u32, height: u32) -> Self {
        let default_size = UVec2::new(width, height);
        Self {
            state: Mutex::new(SoftState {
                textures: HandleMap::new(),
                renderbuffers: HandleMap::new(),
                framebuffers: HandleMap::new(),
                programs: HandleMap::new(),
                vertex_buffers: HandleMap::new(),
                default_size,
                default_pixels: rgb8_storage(default_size),
                bound_framebuffer: None,
                viewport: Viewport::from_size(default_size),
                clear_color: Color::TRANSPARENT,
                clear_depth: 1.0,
                clear_stencil: 0,
                texture_units: [None; MAX_TEXTURE_UNITS],
                current_program: None,
                draw_calls: Vec::new(),
                errors: VecDeque::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SoftState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Draw calls recorded so far, oldest first.
    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.state().draw_calls.clone()
    }

    pub fn live_resources(&self) -> LiveResources {
        let state = self.state();
        LiveResources {
            textures: state.textures.len(),
            renderbuffers: state.renderbuffers.len(),
            framebuffers: state.framebuffers.len(),
            programs: state.programs.len(),
            vertex_buffers: state.vertex_buffers.len(),
        }
    }

    pub fn texture_size(&self, texture: TextureHandle) -> Option<UVec2> {
        self.state().textures.get(texture).map(|t| t.desc.size)
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.state().textures.get(texture).map(|t| t.desc)
    }

    pub fn renderbuffer_size(&self, renderbuffer: RenderbufferHandle) -> Option<UVec2> {
        self.state().renderbuffers.get(renderbuffer).map(|r| r.size)
    }

    /// Depth and stencil values last written to `renderbuffer`.
    pub fn renderbuffer_contents(&self, renderbuffer: RenderbufferHandle) -> Option<(f32, u8)> {
        self.state()
            .renderbuffers
            .get(renderbuffer)
            .map(|r| (r.depth, r.stencil))
    }

    /// Color and depth/stencil attachments of `framebuffer`.
    pub fn framebuffer_attachments(
        &self,
        framebuffer: FramebufferHandle,
    ) -> Option<(TextureHandle, RenderbufferHandle)> {
        self.state()
            .framebuffers
            .get(framebuffer)
            .map(|f| (f.color, f.depth_stencil))
    }

    /// Texel at `(x, y)`, with `y` counted from the bottom row.
    pub fn texture_pixel(&self, texture: TextureHandle, x: u32, y: u32) -> Option<[u8; 3]> {
        let state = self.state();
        let tex = state.textures.get(texture)?;
        if x >= tex.desc.size.x || y >= tex.desc.size.y {
            return None;
        }
        let i = (y as usize * tex.desc.size.x as usize + x as usize) * 3;
        Some([tex.pixels[i], tex.pixels[i + 1], tex.pixels[i + 2]])
    }

    /// Texel of the default target at `(x, y)`, `y` counted from the bottom.
    pub fn default_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        let state = self.state();
        let size = state.default_size;
        if x >= size.x || y >= size.y {
            return None;
        }
        let i = (y as usize * size.x as usize + x as usize) * 3;
        Some([
            state.default_pixels[i],
            state.default_pixels[i + 1],
            state.default_pixels[i + 2],
        ])
    }

    /// Fills `rect` of `texture` with `rgb`, `rect` having a bottom-left
    /// origin. Stands in for rasterized output.
    pub fn fill_rect(&self, texture: TextureHandle, rect: Viewport, rgb: [u8; 3]) {
        let mut state = self.state();
        let Some(tex) = state.textures.get_mut(texture) else {
            state.invalid(texture);
            return;
        };
        let size = tex.desc.size;
        let Some(rect) = rect.clamped_to(size) else {
            return;
        };
        let pitch = size.x as usize * 3;
        for y in rect.y as usize..(rect.y as usize + rect.height as usize) {
            let start = y * pitch + rect.x as usize * 3;
            let end = start + rect.width as usize * 3;
            fill(&mut tex.pixels[start..end], rgb);
        }
    }

    /// Queues `err` as if the driver had raised it.
    pub fn push_error(&self, err: GraphicsApiError) {
        self.state().error(err);
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn create_texture(&self, desc: &TextureDesc) -> TextureHandle {
        let mut state = self.state();
        if desc.size.x == 0 || desc.size.y == 0 {
            state.error(GraphicsApiError::InvalidValue(format!(
                "zero-sized texture {}x{}",
                desc.size.x, desc.size.y
            )));
        }
        let handle = state.textures.insert(SoftTexture {
            desc: *desc,
            pixels: rgb8_storage(desc.size),
        });
        log::trace!("Created texture {:?} {:?}", handle, desc.size);
        handle
    }

    fn resize_texture(&self, texture: TextureHandle, size: UVec2) {
        let mut state = self.state();
        match state.textures.get_mut(texture) {
            Some(tex) => {
                tex.desc.size = size;
                tex.pixels = rgb8_storage(size);
            }
            None => state.invalid(texture),
        }
    }

    fn delete_texture(&self, texture: TextureHandle) {
        let mut state = self.state();
        if state.textures.remove(texture).is_none() {
            state.invalid(texture);
            return;
        }
        for unit in state.texture_units.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
    }

    fn create_renderbuffer(&self, size: UVec2) -> RenderbufferHandle {
        self.state().renderbuffers.insert(SoftRenderbuffer {
            size,
            depth: 1.0,
            stencil: 0,
        })
    }

    fn resize_renderbuffer(&self, renderbuffer: RenderbufferHandle, size: UVec2) {
        let mut state = self.state();
        match state.renderbuffers.get_mut(renderbuffer) {
            Some(rb) => rb.size = size,
            None => state.invalid(renderbuffer),
        }
    }

    fn delete_renderbuffer(&self, renderbuffer: RenderbufferHandle) {
        let mut state = self.state();
        if state.renderbuffers.remove(renderbuffer).is_none() {
            state.invalid(renderbuffer);
        }
    }

    fn create_framebuffer(
        &self,
        color: TextureHandle,
        depth_stencil: RenderbufferHandle,
    ) -> FramebufferHandle {
        let mut state = self.state();
        if !state.textures.contains(color) {
            state.invalid(color);
        }
        if !state.renderbuffers.contains(depth_stencil) {
            state.invalid(depth_stencil);
        }
        state.framebuffers.insert(SoftFramebuffer {
            color,
            depth_stencil,
        })
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferHandle) {
        let mut state = self.state();
        if state.framebuffers.remove(framebuffer).is_none() {
            state.invalid(framebuffer);
            return;
        }
        // Deleting the bound framebuffer reverts to the default target.
        if state.bound_framebuffer == Some(framebuffer) {
            state.bound_framebuffer = None;
        }
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferHandle>) {
        let mut state = self.state();
        if let Some(fb) = framebuffer {
            if !state.framebuffers.contains(fb) {
                state.invalid(fb);
                return;
            }
        }
        state.bound_framebuffer = framebuffer;
    }

    fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.state().bound_framebuffer
    }

    fn viewport(&self) -> Viewport {
        self.state().viewport
    }

    fn set_viewport(&self, viewport: Viewport) {
        self.state().viewport = viewport;
    }

    fn clear_color(&self) -> Color {
        self.state().clear_color
    }

    fn set_clear_color(&self, color: Color) {
        self.state().clear_color = color;
    }

    fn clear(&self, flags: ClearFlags) {
        let mut state = self.state();
        let rgb = state.clear_color.to_rgb8();
        let (depth, stencil) = (state.clear_depth, state.clear_stencil);
        let Some(fb) = state.bound_framebuffer else {
            if flags.color {
                fill(&mut state.default_pixels, rgb);
            }
            return;
        };
        let Some(attachments) = state.framebuffers.get(fb).copied() else {
            state.invalid(fb);
            return;
        };
        if flags.color {
            match state.textures.get_mut(attachments.color) {
                Some(tex) => fill(&mut tex.pixels, rgb),
                None => state.invalid(attachments.color),
            }
        }
        if flags.depth_stencil {
            match state.renderbuffers.get_mut(attachments.depth_stencil) {
                Some(rb) => {
                    rb.depth = depth;
                    rb.stencil = stencil;
                }
                None => state.invalid(attachments.depth_stencil),
            }
        }
    }

    fn bind_texture(&self, unit: u32, texture: TextureHandle) {
        let mut state = self.state();
        if unit as usize >= MAX_TEXTURE_UNITS {
            state.error(GraphicsApiError::InvalidValue(format!(
                "texture unit {} out of range",
                unit
            )));
            return;
        }
        if !state.textures.contains(texture) {
            state.invalid(texture);
            return;
        }
        state.texture_units[unit as usize] = Some(texture);
    }

    fn create_program(&self, source: &ShaderSource) -> Result<ProgramHandle, Error> {
        if source.wgsl.trim().is_empty() {
            return Err(Error::Shader {
                label: source.label.to_string(),
                message: "empty shader source".into(),
            });
        }
        let mut state = self.state();
        Ok(state.programs.insert(SoftProgram {
            label: source.label.clone(),
            sampler_units: vec![0; source.samplers.len()],
        }))
    }

    fn delete_program(&self, program: ProgramHandle) {
        let mut state = self.state();
        if state.programs.remove(program).is_none() {
            state.invalid(program);
            return;
        }
        if state.current_program == Some(program) {
            state.current_program = None;
        }
    }

    fn use_program(&self, program: ProgramHandle) {
        let mut state = self.state();
        if !state.programs.contains(program) {
            state.invalid(program);
            return;
        }
        state.current_program = Some(program);
    }

    fn current_program(&self) -> Option<ProgramHandle> {
        self.state().current_program
    }

    fn set_sampler_uniform(&self, location: UniformLocation, unit: u32) {
        let mut state = self.state();
        let Some(current) = state.current_program else {
            state.error(GraphicsApiError::InvalidOperation(
                "no program in use".into(),
            ));
            return;
        };
        let result = match state.programs.get_mut(current) {
            Some(program) => match program.sampler_units.get_mut(location.0 as usize) {
                Some(slot) => {
                    *slot = unit;
                    Ok(())
                }
                None => Err(GraphicsApiError::InvalidOperation(format!(
                    "program {:?} has no uniform at location {}",
                    program.label, location.0
                ))),
            },
            None => Err(invalid_handle(current)),
        };
        if let Err(err) = result {
            state.error(err);
        }
    }

    fn create_vertex_buffer(&self, positions: &[[f32; 3]]) -> VertexBufferHandle {
        self.state().vertex_buffers.insert(positions.to_vec())
    }

    fn delete_vertex_buffer(&self, buffer: VertexBufferHandle) {
        let mut state = self.state();
        if state.vertex_buffers.remove(buffer).is_none() {
            state.invalid(buffer);
        }
    }

    fn draw_arrays(&self, buffer: VertexBufferHandle, topology: Topology, vertices: Range<u32>) {
        let mut state = self.state();
        let Some(program) = state.current_program else {
            state.error(GraphicsApiError::InvalidOperation(
                "draw without a program in use".into(),
            ));
            return;
        };
        let Some(len) = state.vertex_buffers.get(buffer).map(Vec::len) else {
            state.invalid(buffer);
            return;
        };
        if vertices.end as usize > len || vertices.start > vertices.end {
            state.error(GraphicsApiError::InvalidValue(format!(
                "vertex range {:?} outside buffer of {} vertices",
                vertices, len
            )));
            return;
        }
        let samplers = match state.programs.get(program) {
            Some(p) => p
                .sampler_units
                .iter()
                .enumerate()
                .map(|(i, &unit)| SamplerBinding {
                    location: UniformLocation(i as u32),
                    unit,
                    texture: state.texture_units.get(unit as usize).copied().flatten(),
                })
                .collect(),
            None => Vec::new(),
        };
        let call = DrawCall {
            program,
            framebuffer: state.bound_framebuffer,
            viewport: state.viewport,
            topology,
            vertices,
            samplers,
        };
        state.draw_calls.push(call);
    }

    fn read_texture(&self, texture: TextureHandle) -> Result<image::RgbImage, Error> {
        let state = self.state();
        let tex = state
            .textures
            .get(texture)
            .ok_or_else(|| Error::Readback(invalid_handle(texture).to_string()))?;
        image::RgbImage::from_raw(tex.desc.size.x, tex.desc.size.y, tex.pixels.clone())
            .ok_or_else(|| Error::Readback("texture storage does not match its size".into()))
    }

    fn row_order(&self) -> RowOrder {
        RowOrder::BottomUp
    }

    fn take_error(&self) -> Option<GraphicsApiError> {
        self.state().errors.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_without_framebuffer_fills_default_target() {
        let backend = SoftwareBackend::new(4, 3);
        assert_eq!(backend.default_pixel(0, 0), Some([0, 0, 0]));
        backend.set_clear_color(Color::ORANGE);
        backend.clear(ClearFlags::ALL);
        assert_eq!(backend.default_pixel(0, 0), Some([255, 128, 0]));
        assert_eq!(backend.default_pixel(3, 2), Some([255, 128, 0]));
        assert_eq!(backend.default_pixel(4, 0), None);
    }

    #[test]
    fn reading_a_deleted_texture_is_a_readback_error() {
        let backend = SoftwareBackend::default();
        let desc = TextureDesc {
            size: UVec2::new(2, 2),
            filter: Default::default(),
            wrap: Default::default(),
        };
        let texture = backend.create_texture(&desc);
        assert_eq!(backend.read_texture(texture).unwrap().dimensions(), (2, 2));

        backend.delete_texture(texture);
        assert!(matches!(backend.read_texture(texture), Err(Error::Readback(_))));
        assert!(backend.take_error().is_none());
    }

    #[test]
    fn deleting_bound_framebuffer_rebinds_default_target() {
        let backend = SoftwareBackend::default();
        let desc = TextureDesc {
            size: UVec2::new(2, 2),
            filter: Default::default(),
            wrap: Default::default(),
        };
        let color = backend.create_texture(&desc);
        let depth_stencil = backend.create_renderbuffer(desc.size);
        let framebuffer = backend.create_framebuffer(color, depth_stencil);
        backend.bind_framebuffer(Some(framebuffer));

        backend.delete_framebuffer(framebuffer);
        assert_eq!(backend.bound_framebuffer(), None);
        backend.bind_framebuffer(Some(framebuffer));
        assert!(matches!(
            backend.take_error(),
            Some(GraphicsApiError::InvalidHandle { kind: "framebuffer", .. })
        ));
    }
}
