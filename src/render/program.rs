use crate::{
    core::{FxHashMap, ProgramHandle, SmlString},
    error::Result,
    render::{GraphicsBackend, UniformLocation},
};
use std::{borrow::Cow, sync::Arc};

/// A shader program as seen by a render target.
///
/// The target only needs to make the program current and to look up the
/// location of the sampler uniform it writes its texture unit into.
pub trait ShaderProgram {
    /// Makes this program the current one.
    fn bind(&self);
    /// Location of the uniform named `name`, if the program declares it.
    fn uniform_location(&self, name: &str) -> Option<UniformLocation>;
}

/// Source of a shader program.
///
/// The WGSL module must provide `vs_main` taking `@location(0) vec3<f32>`
/// positions and `fs_main` writing `@location(0)`. Every entry of `samplers`
/// is a `texture_2d<f32>` at `@group(0) @binding(2 * i)` paired with a
/// `sampler` at `@binding(2 * i + 1)`; its name is the uniform name used by
/// [`ShaderProgram::uniform_location`].
#[derive(Debug, Clone)]
pub struct ShaderSource {
    pub label: SmlString,
    pub wgsl: Cow<'static, str>,
    pub samplers: Vec<SmlString>,
}

impl ShaderSource {
    pub fn new(
        label: &str,
        wgsl: impl Into<Cow<'static, str>>,
        samplers: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        Self {
            label: label.into(),
            wgsl: wgsl.into(),
            samplers: samplers.into_iter().map(SmlString::from).collect(),
        }
    }

    /// Transforms positions unchanged and shades everything white.
    pub fn passthrough() -> Self {
        Self::new(
            "passthrough",
            include_str!("shaders/passthrough.wgsl"),
            std::iter::empty(),
        )
    }

    /// Samples `screen_texture` across a full-screen quad.
    pub fn blit() -> Self {
        Self::new("blit", include_str!("shaders/blit.wgsl"), ["screen_texture"])
    }
}

/// A program living on a [`GraphicsBackend`], deleted on drop.
pub struct Program<B: GraphicsBackend + ?Sized> {
    backend: Arc<B>,
    handle: ProgramHandle,
    label: SmlString,
    uniforms: FxHashMap<SmlString, UniformLocation>,
}

impl<B: GraphicsBackend + ?Sized> Program<B> {
    /// Creates a program from `source`.
    pub fn new(backend: Arc<B>, source: &ShaderSource) -> Result<Self> {
        profiling::scope!("Program::new");
        let handle = backend.create_program(source)?;
        let uniforms = source
            .samplers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), UniformLocation(i as u32)))
            .collect();
        log::debug!("Created program {:?} as {:?}", source.label, handle);
        Ok(Self {
            backend,
            handle,
            label: source.label.clone(),
            uniforms,
        })
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }
}

impl<B: GraphicsBackend + ?Sized> ShaderProgram for Program<B> {
    fn bind(&self) {
        self.backend.use_program(self.handle);
    }

    fn uniform_location(&self, name: &str) -> Option<UniformLocation> {
        self.uniforms.get(name).copied()
    }
}

impl<B: GraphicsBackend + ?Sized> Drop for Program<B> {
    fn drop(&mut self) {
        log::trace!("Deleting program {:?}", self.label);
        self.backend.delete_program(self.handle);
    }
}
