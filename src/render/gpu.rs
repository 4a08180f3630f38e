//! Graphics backend on top of `wgpu`.
//!
//! wgpu has no global "bound framebuffer" and no in-place texture
//! reallocation, so both are emulated: a framebuffer is a pair of handles
//! resolved to texture views each time a pass is recorded, and resizing a
//! texture swaps the `wgpu::Texture` stored behind its handle. Every clear
//! and draw is recorded into its own render pass and submitted right away.

use crate::{
    core::{
        Color, Framebuffer, FramebufferHandle, FxHashMap, Handle, HandleMap, ProgramHandle,
        ProgramObject, Renderbuffer, RenderbufferHandle, Resource, SmlString, Texture,
        TextureDesc, TextureHandle, VertexBuffer, VertexBufferHandle,
    },
    error::{Error, GraphicsApiError, Result},
    render::{
        util, ClearFlags, GpuContext, GraphicsBackend, PipelineId, RowOrder, Sampler, SamplerId,
        ShaderSource, Topology, UniformLocation, Viewport, MAX_TEXTURE_UNITS,
    },
};
use glam::UVec2;
use std::{
    collections::VecDeque,
    ops::Range,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use wgpu::util::DeviceExt;

/// Format of color textures. wgpu has no three-channel format; alpha is
/// dropped on readback.
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
/// Format of depth/stencil renderbuffers.
pub const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

struct GpuTexture {
    desc: TextureDesc,
    raw: wgpu::Texture,
}

struct GpuRenderbuffer {
    size: UVec2,
    raw: wgpu::Texture,
}

#[derive(Clone, Copy)]
struct GpuFramebuffer {
    color: TextureHandle,
    depth_stencil: RenderbufferHandle,
}

struct GpuProgram {
    label: SmlString,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
    /// Texture unit read by each sampler uniform.
    sampler_units: Vec<u32>,
}

struct GpuVertexBuffer {
    raw: wgpu::Buffer,
    len: u32,
}

struct GpuState {
    textures: HandleMap<Texture, GpuTexture>,
    renderbuffers: HandleMap<Renderbuffer, GpuRenderbuffer>,
    framebuffers: HandleMap<Framebuffer, GpuFramebuffer>,
    programs: HandleMap<ProgramObject, GpuProgram>,
    vertex_buffers: HandleMap<VertexBuffer, GpuVertexBuffer>,
    pipelines: FxHashMap<PipelineId, wgpu::RenderPipeline>,
    samplers: FxHashMap<SamplerId, Sampler>,
    default_size: UVec2,
    default_color: wgpu::Texture,
    default_depth_stencil: wgpu::Texture,
    /// Sampled by sampler uniforms whose unit has no texture bound.
    placeholder: wgpu::Texture,
    bound_framebuffer: Option<FramebufferHandle>,
    viewport: Viewport,
    clear_color: Color,
    texture_units: [Option<TextureHandle>; MAX_TEXTURE_UNITS],
    current_program: Option<ProgramHandle>,
    errors: VecDeque<GraphicsApiError>,
}

impl GpuState {
    fn error(&mut self, err: GraphicsApiError) {
        self.errors.push_back(err);
    }

    fn invalid<T: Resource>(&mut self, handle: Handle<T>) {
        self.error(invalid_handle(handle));
    }

    /// Views of the color and depth/stencil attachments of `framebuffer`,
    /// and their size.
    fn attachments(
        &self,
        framebuffer: Option<FramebufferHandle>,
    ) -> Result<(wgpu::TextureView, wgpu::TextureView, UVec2), GraphicsApiError> {
        let view = |raw: &wgpu::Texture| raw.create_view(&wgpu::TextureViewDescriptor::default());
        let Some(fb) = framebuffer else {
            return Ok((
                view(&self.default_color),
                view(&self.default_depth_stencil),
                self.default_size,
            ));
        };
        let attachments = self.framebuffers.get(fb).ok_or_else(|| invalid_handle(fb))?;
        let color = self
            .textures
            .get(attachments.color)
            .ok_or_else(|| invalid_handle(attachments.color))?;
        let depth_stencil = self
            .renderbuffers
            .get(attachments.depth_stencil)
            .ok_or_else(|| invalid_handle(attachments.depth_stencil))?;
        if color.desc.size != depth_stencil.size {
            return Err(GraphicsApiError::InvalidOperation(format!(
                "incomplete framebuffer {:?}: attachment sizes differ",
                fb
            )));
        }
        Ok((view(&color.raw), view(&depth_stencil.raw), color.desc.size))
    }
}

fn invalid_handle<T: Resource>(handle: Handle<T>) -> GraphicsApiError {
    GraphicsApiError::InvalidHandle {
        kind: T::NAME,
        index: handle.index(),
        generation: handle.generation(),
    }
}

fn extent(size: UVec2) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.x,
        height: size.y,
        depth_or_array_layers: 1,
    }
}

fn create_color_texture(device: &wgpu::Device, size: UVec2) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("render_target_color"),
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: COLOR_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

fn create_depth_stencil_texture(device: &wgpu::Device, size: UVec2) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("render_target_depth_stencil"),
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_STENCIL_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    })
}

fn convert_error(err: wgpu::Error) -> GraphicsApiError {
    match err {
        wgpu::Error::OutOfMemory { .. } => GraphicsApiError::OutOfMemory(err.to_string()),
        _ => GraphicsApiError::Validation(err.to_string()),
    }
}

/// A [`GraphicsBackend`] driving a real GPU through `wgpu`.
///
/// The default render target is an offscreen texture owned by the backend,
/// standing in for a window's back buffer.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    state: Mutex<GpuState>,
}

static_assertions::assert_impl_all!(WgpuBackend: Send, Sync);

impl WgpuBackend {
    /// Creates a backend on `context` with a `width` x `height` default
    /// render target.
    pub fn new(context: &GpuContext, width: u32, height: u32) -> Self {
        profiling::scope!("WgpuBackend::new");
        let device = context.device.clone();
        let queue = context.queue.clone();

        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            log::error!("Uncaptured wgpu error: {}", err);
        }));
        // Popped and pushed again by `take_error`.
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let default_size = UVec2::new(width.max(1), height.max(1));
        let placeholder = create_color_texture(&device, UVec2::ONE);
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &placeholder,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0, 0, 0, 255],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: None,
            },
            extent(UVec2::ONE),
        );

        let state = GpuState {
            textures: HandleMap::new(),
            renderbuffers: HandleMap::new(),
            framebuffers: HandleMap::new(),
            programs: HandleMap::new(),
            vertex_buffers: HandleMap::new(),
            pipelines: FxHashMap::default(),
            samplers: FxHashMap::default(),
            default_size,
            default_color: create_color_texture(&device, default_size),
            default_depth_stencil: create_depth_stencil_texture(&device, default_size),
            placeholder,
            bound_framebuffer: None,
            viewport: Viewport::from_size(default_size),
            clear_color: Color::TRANSPARENT,
            texture_units: [None; MAX_TEXTURE_UNITS],
            current_program: None,
            errors: VecDeque::new(),
        };

        Self {
            device,
            queue,
            state: Mutex::new(state),
        }
    }

    /// Creates a GPU context and a backend on it in one go.
    pub fn headless(width: u32, height: u32) -> Result<Self> {
        let context = GpuContext::new(None)?;
        Ok(Self::new(&context, width, height))
    }

    fn state(&self) -> MutexGuard<'_, GpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads back the default render target, top row first.
    pub fn read_default_target(&self) -> Result<image::RgbImage> {
        let state = self.state();
        let size = state.default_size;
        let buffer = self.copy_to_readback_buffer(&state.default_color, size);
        drop(state);
        self.map_readback_buffer(buffer, size)
    }

    fn copy_to_readback_buffer(&self, raw: &wgpu::Texture, size: UVec2) -> ReadbackBuffer {
        let bytes_per_row =
            util::padded_bytes_per_row(size.x, 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texture_readback_buffer"),
            size: bytes_per_row as u64 * size.y as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texture_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: raw,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(size.y),
                },
            },
            extent(size),
        );
        self.queue.submit(Some(encoder.finish()));
        ReadbackBuffer {
            buffer,
            bytes_per_row,
        }
    }

    /// Blocks until `readback` is mapped and packs it into an RGB8 image.
    fn map_readback_buffer(&self, readback: ReadbackBuffer, size: UVec2) -> Result<image::RgbImage> {
        profiling::scope!("WgpuBackend::map_readback_buffer");
        let slice = readback.buffer.slice(..);
        let (sender, receiver) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = sender.send(r);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(receiver.recv_async())
            .map_err(|e| Error::Readback(e.to_string()))?
            .map_err(|e| Error::Readback(e.to_string()))?;
        let rgb = {
            let view = slice.get_mapped_range();
            util::rgba_rows_to_rgb(&view, size.x, size.y, readback.bytes_per_row)
        };
        readback.buffer.unmap();
        image::RgbImage::from_raw(size.x, size.y, rgb)
            .ok_or_else(|| Error::Readback("readback buffer too small".into()))
    }

    fn create_pipeline(&self, program: &GpuProgram, topology: Topology) -> wgpu::RenderPipeline {
        profiling::scope!("WgpuBackend::create_pipeline");
        log::debug!("Creating pipeline for {:?} ({:?})", program.label, topology);
        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.label.as_str()),
                layout: Some(&program.layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<[f32; 3]>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &[wgpu::VertexAttribute {
                            offset: 0,
                            shader_location: 0,
                            format: wgpu::VertexFormat::Float32x3,
                        }],
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: topology.into(),
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    ..Default::default()
                },
                // Depth testing stays off, as in a fresh GL context.
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_STENCIL_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: wgpu::CompareFunction::Always,
                    stencil: Default::default(),
                    bias: Default::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            })
    }
}

struct ReadbackBuffer {
    buffer: wgpu::Buffer,
    bytes_per_row: u32,
}

impl GraphicsBackend for WgpuBackend {
    fn create_texture(&self, desc: &TextureDesc) -> TextureHandle {
        let raw = create_color_texture(&self.device, desc.size);
        let handle = self.state().textures.insert(GpuTexture { desc: *desc, raw });
        log::trace!("Created texture {:?} {:?}", handle, desc.size);
        handle
    }

    fn resize_texture(&self, texture: TextureHandle, size: UVec2) {
        let mut state = self.state();
        match state.textures.get_mut(texture) {
            Some(tex) => {
                tex.desc.size = size;
                tex.raw = create_color_texture(&self.device, size);
            }
            None => state.invalid(texture),
        }
    }

    fn delete_texture(&self, texture: TextureHandle) {
        let mut state = self.state();
        match state.textures.remove(texture) {
            Some(tex) => tex.raw.destroy(),
            None => return state.invalid(texture),
        }
        for unit in state.texture_units.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
    }

    fn create_renderbuffer(&self, size: UVec2) -> RenderbufferHandle {
        let raw = create_depth_stencil_texture(&self.device, size);
        self.state()
            .renderbuffers
            .insert(GpuRenderbuffer { size, raw })
    }

    fn resize_renderbuffer(&self, renderbuffer: RenderbufferHandle, size: UVec2) {
        let mut state = self.state();
        match state.renderbuffers.get_mut(renderbuffer) {
            Some(rb) => {
                rb.size = size;
                rb.raw = create_depth_stencil_texture(&self.device, size);
            }
            None => state.invalid(renderbuffer),
        }
    }

    fn delete_renderbuffer(&self, renderbuffer: RenderbufferHandle) {
        let mut state = self.state();
        match state.renderbuffers.remove(renderbuffer) {
            Some(rb) => rb.raw.destroy(),
            None => state.invalid(renderbuffer),
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
        state.framebuffers.insert(GpuFramebuffer {
            color,
            depth_stencil,
        })
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferHandle) {
        let mut state = self.state();
        if state.framebuffers.remove(framebuffer).is_none() {
            return state.invalid(framebuffer);
        }
        if state.bound_framebuffer == Some(framebuffer) {
            state.bound_framebuffer = None;
        }
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferHandle>) {
        let mut state = self.state();
        if let Some(fb) = framebuffer {
            if !state.framebuffers.contains(fb) {
                return state.invalid(fb);
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
        profiling::scope!("WgpuBackend::clear");
        let mut state = self.state();
        let (color_view, depth_view, _) = match state.attachments(state.bound_framebuffer) {
            Ok(attachments) => attachments,
            Err(err) => return state.error(err),
        };
        let color_load = if flags.color {
            wgpu::LoadOp::Clear(state.clear_color.into())
        } else {
            wgpu::LoadOp::Load
        };
        let (depth_load, stencil_load) = if flags.depth_stencil {
            (wgpu::LoadOp::Clear(1.0), wgpu::LoadOp::Clear(0))
        } else {
            (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear_encoder"),
            });
        {
            let _render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("render_pass_clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: stencil_load,
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn bind_texture(&self, unit: u32, texture: TextureHandle) {
        let mut state = self.state();
        if unit as usize >= MAX_TEXTURE_UNITS {
            return state.error(GraphicsApiError::InvalidValue(format!(
                "texture unit {} out of range",
                unit
            )));
        }
        if !state.textures.contains(texture) {
            return state.invalid(texture);
        }
        state.texture_units[unit as usize] = Some(texture);
    }

    fn create_program(&self, source: &ShaderSource) -> Result<ProgramHandle, Error> {
        profiling::scope!("WgpuBackend::create_program");
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.label.as_str()),
                source: wgpu::ShaderSource::Wgsl(source.wgsl.clone()),
            });
        let entries: Vec<_> = (0..source.samplers.len() as u32)
            .flat_map(|i| {
                [
                    wgpu::BindGroupLayoutEntry {
                        binding: 2 * i,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2 * i + 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ]
            })
            .collect();
        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(source.label.as_str()),
                    entries: &entries,
                });
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(source.label.as_str()),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::Shader {
                label: source.label.to_string(),
                message: err.to_string(),
            });
        }
        let program = GpuProgram {
            label: source.label.clone(),
            module,
            bind_group_layout,
            layout,
            sampler_units: vec![0; source.samplers.len()],
        };
        Ok(self.state().programs.insert(program))
    }

    fn delete_program(&self, program: ProgramHandle) {
        let mut state = self.state();
        if state.programs.remove(program).is_none() {
            return state.invalid(program);
        }
        let id_index = program.index();
        state
            .pipelines
            .retain(|id, _| id.program_index() != id_index);
        if state.current_program == Some(program) {
            state.current_program = None;
        }
    }

    fn use_program(&self, program: ProgramHandle) {
        let mut state = self.state();
        if !state.programs.contains(program) {
            return state.invalid(program);
        }
        state.current_program = Some(program);
    }

    fn current_program(&self) -> Option<ProgramHandle> {
        self.state().current_program
    }

    fn set_sampler_uniform(&self, location: UniformLocation, unit: u32) {
        let mut state = self.state();
        let Some(current) = state.current_program else {
            return state.error(GraphicsApiError::InvalidOperation(
                "no program in use".into(),
            ));
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
        let raw = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("vertex_positions"),
                contents: bytemuck::cast_slice(positions),
                usage: wgpu::BufferUsages::VERTEX,
            });
        self.state().vertex_buffers.insert(GpuVertexBuffer {
            raw,
            len: positions.len() as u32,
        })
    }

    fn delete_vertex_buffer(&self, buffer: VertexBufferHandle) {
        let mut state = self.state();
        match state.vertex_buffers.remove(buffer) {
            Some(vb) => vb.raw.destroy(),
            None => state.invalid(buffer),
        }
    }

    fn draw_arrays(&self, buffer: VertexBufferHandle, topology: Topology, vertices: Range<u32>) {
        profiling::scope!("WgpuBackend::draw_arrays");
        let mut guard = self.state();
        let state = &mut *guard;

        let Some(program_handle) = state.current_program else {
            return state.error(GraphicsApiError::InvalidOperation(
                "draw without a program in use".into(),
            ));
        };
        let Some(len) = state.vertex_buffers.get(buffer).map(|vb| vb.len) else {
            return state.invalid(buffer);
        };
        if vertices.end > len || vertices.start > vertices.end {
            return state.error(GraphicsApiError::InvalidValue(format!(
                "vertex range {:?} outside buffer of {} vertices",
                vertices, len
            )));
        }
        let (color_view, depth_view, bounds) = match state.attachments(state.bound_framebuffer) {
            Ok(attachments) => attachments,
            Err(err) => return state.error(err),
        };
        let viewport = state.viewport;
        let Some(scissor) = viewport.clamped_to(bounds) else {
            log::trace!("Viewport {:?} outside render target, draw skipped", viewport);
            return;
        };

        let pipeline_id = PipelineId::builder()
            .with_program(program_handle)
            .with_topology(topology)
            .build();
        let Some(program) = state.programs.get(program_handle) else {
            return state.invalid(program_handle);
        };
        if !state.pipelines.contains_key(&pipeline_id) {
            let pipeline = self.create_pipeline(program, topology);
            state.pipelines.insert(pipeline_id, pipeline);
        }

        // Resolve every sampler uniform to the texture bound on its unit.
        let mut sampled = Vec::with_capacity(program.sampler_units.len());
        for &unit in &program.sampler_units {
            let texture = state
                .texture_units
                .get(unit as usize)
                .copied()
                .flatten()
                .and_then(|handle| state.textures.get(handle));
            let (raw, sampler_id) = match texture {
                Some(tex) => (&tex.raw, SamplerId::new(tex.desc.filter, tex.desc.wrap)),
                None => (&state.placeholder, SamplerId::new(Default::default(), Default::default())),
            };
            state
                .samplers
                .entry(sampler_id)
                .or_insert_with(|| Sampler::new(&self.device, sampler_id));
            sampled.push((
                raw.create_view(&wgpu::TextureViewDescriptor::default()),
                sampler_id,
            ));
        }
        let entries: Vec<_> = sampled
            .iter()
            .enumerate()
            .flat_map(|(i, (view, sampler_id))| {
                [
                    wgpu::BindGroupEntry {
                        binding: 2 * i as u32,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2 * i as u32 + 1,
                        resource: wgpu::BindingResource::Sampler(&state.samplers[sampler_id]),
                    },
                ]
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.label.as_str()),
            layout: &program.bind_group_layout,
            entries: &entries,
        });
        let Some(pipeline) = state.pipelines.get(&pipeline_id) else {
            return;
        };
        let vertex_buffer = match state.vertex_buffers.get(buffer) {
            Some(vb) => &vb.raw,
            None => return,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("draw_encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("render_pass_draw"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            // Viewports have a bottom-left origin, wgpu's is top-left. The
            // viewport may overhang the target; the scissor clips to it.
            let top = bounds.y as i32 - viewport.y - viewport.height as i32;
            render_pass.set_viewport(
                viewport.x as f32,
                top as f32,
                viewport.width as f32,
                viewport.height as f32,
                0.0,
                1.0,
            );
            let scissor_top = bounds.y - scissor.y as u32 - scissor.height;
            render_pass.set_scissor_rect(
                scissor.x as u32,
                scissor_top,
                scissor.width,
                scissor.height,
            );
            render_pass.draw(vertices, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn read_texture(&self, texture: TextureHandle) -> Result<image::RgbImage, Error> {
        profiling::scope!("WgpuBackend::read_texture");
        let state = self.state();
        let tex = state
            .textures
            .get(texture)
            .ok_or_else(|| Error::Readback(invalid_handle(texture).to_string()))?;
        let size = tex.desc.size;
        let readback = self.copy_to_readback_buffer(&tex.raw, size);
        // The lock is not needed while waiting on the GPU.
        drop(state);
        self.map_readback_buffer(readback, size)
    }

    fn row_order(&self) -> RowOrder {
        RowOrder::TopDown
    }

    fn take_error(&self) -> Option<GraphicsApiError> {
        let mut state = self.state();
        // Scopes were pushed as [Validation, OutOfMemory]; pop in reverse.
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        let validation = pollster::block_on(self.device.pop_error_scope());
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        for err in [validation, out_of_memory].into_iter().flatten() {
            state.error(convert_error(err));
        }
        state.errors.pop_front()
    }
}
