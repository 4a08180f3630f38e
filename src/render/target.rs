use crate::{
    core::{
        Color, FilterMode, FramebufferHandle, RenderbufferHandle, TextureDesc, TextureHandle,
        WrapMode,
    },
    error::{Error, Result},
    render::{
        drain_errors, util, ClearFlags, Geometry, GraphicsBackend, RowOrder, ShaderProgram,
        Viewport,
    },
};
use glam::UVec2;
use image::{codecs::jpeg::JpegEncoder, RgbImage};
use std::{
    io::{BufWriter, Write},
    path::Path,
    sync::Arc,
};

/// Configuration of an [`OffscreenTarget`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetParams {
    /// Clear color applied on activation.
    ///
    /// `None` clears with whatever clear color the context currently has.
    /// With `Some`, the context's previous clear color is restored on
    /// deactivation.
    pub clear_color: Option<Color>,
    /// Filtering of the color texture when sampled.
    pub filter: FilterMode,
    /// Wrapping of the color texture when sampled.
    pub wrap: WrapMode,
    /// JPEG quality of screenshots, in `1..=100`.
    pub jpeg_quality: u8,
    /// Whether errors reported by the backend abort the program.
    pub panic_on_gpu_error: bool,
}

impl TargetParams {
    /// Highest JPEG quality the encoder accepts.
    pub const MAX_JPEG_QUALITY: u8 = 100;

    pub fn new() -> Self {
        Self {
            clear_color: None,
            filter: FilterMode::Linear,
            wrap: WrapMode::Repeat,
            jpeg_quality: Self::MAX_JPEG_QUALITY,
            panic_on_gpu_error: cfg!(debug_assertions),
        }
    }

    pub fn with_clear_color(mut self, color: Color) -> Self {
        self.clear_color = Some(color);
        self
    }

    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, Self::MAX_JPEG_QUALITY);
        self
    }

    pub fn with_panic_on_gpu_error(mut self, panic: bool) -> Self {
        self.panic_on_gpu_error = panic;
        self
    }
}

impl Default for TargetParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Context state captured by [`OffscreenTarget::activate`].
#[derive(Debug, Clone, Copy)]
struct SavedState {
    viewport: Viewport,
    clear_color: Option<Color>,
}

/// An offscreen render target: an RGB8 color texture and a depth/stencil
/// renderbuffer attached to a framebuffer.
///
/// The three resources live and die together; dropping the target deletes
/// all of them. Between [`activate`](Self::activate) and
/// [`deactivate`](Self::deactivate) every draw issued on the backend lands
/// in this target.
pub struct OffscreenTarget<B: GraphicsBackend + ?Sized> {
    backend: Arc<B>,
    size: UVec2,
    color: TextureHandle,
    depth_stencil: RenderbufferHandle,
    framebuffer: FramebufferHandle,
    /// `Some` while active.
    saved: Option<SavedState>,
    params: TargetParams,
}

impl<B: GraphicsBackend + ?Sized> OffscreenTarget<B> {
    /// Creates a target of `width` x `height` pixels with default parameters.
    pub fn new(backend: Arc<B>, width: u32, height: u32) -> Result<Self> {
        Self::with_params(backend, width, height, TargetParams::new())
    }

    /// Creates a target of `width` x `height` pixels.
    ///
    /// The default render target is bound again when this returns.
    pub fn with_params(
        backend: Arc<B>,
        width: u32,
        height: u32,
        params: TargetParams,
    ) -> Result<Self> {
        profiling::scope!("OffscreenTarget::new");
        let size = validate_size(width, height)?;

        let color = backend.create_texture(&TextureDesc {
            size,
            filter: params.filter,
            wrap: params.wrap,
        });
        let depth_stencil = backend.create_renderbuffer(size);
        let framebuffer = backend.create_framebuffer(color, depth_stencil);
        backend.bind_framebuffer(None);

        let target = Self {
            backend,
            size,
            color,
            depth_stencil,
            framebuffer,
            saved: None,
            params,
        };
        log::debug!(
            "Created offscreen target {:?} ({}x{})",
            target.framebuffer,
            width,
            height
        );
        target.check_errors("OffscreenTarget::new");
        Ok(target)
    }

    /// Makes this target the current render target.
    ///
    /// Saves the current viewport, binds the framebuffer, sets the viewport
    /// to the whole target and clears color and depth/stencil.
    ///
    /// Activation does not nest: calling this while active returns
    /// [`Error::AlreadyActive`] and leaves the saved state untouched.
    pub fn activate(&mut self) -> Result<()> {
        if self.saved.is_some() {
            log::warn!("Offscreen target {:?} is already active", self.framebuffer);
            return Err(Error::AlreadyActive);
        }
        let saved = SavedState {
            viewport: self.backend.viewport(),
            clear_color: self.params.clear_color.map(|_| self.backend.clear_color()),
        };
        self.backend.bind_framebuffer(Some(self.framebuffer));
        self.backend.set_viewport(Viewport::from_size(self.size));
        if let Some(color) = self.params.clear_color {
            self.backend.set_clear_color(color);
        }
        self.backend.clear(ClearFlags::ALL);
        self.saved = Some(saved);
        self.check_errors("OffscreenTarget::activate");
        Ok(())
    }

    /// Binds the default render target again and restores the viewport that
    /// was current when [`activate`](Self::activate) was called.
    ///
    /// Returns [`Error::NotActive`] without touching the context if the
    /// target is not active.
    pub fn deactivate(&mut self) -> Result<()> {
        let saved = self.saved.take().ok_or(Error::NotActive)?;
        self.restore(saved);
        self.check_errors("OffscreenTarget::deactivate");
        Ok(())
    }

    fn restore(&self, saved: SavedState) {
        self.backend.bind_framebuffer(None);
        self.backend.set_viewport(saved.viewport);
        if let Some(color) = saved.clear_color {
            self.backend.set_clear_color(color);
        }
    }

    /// Reallocates the color and depth/stencil storage at the new size.
    ///
    /// Handles stay the same, previous contents are lost. Resizing to the
    /// current size keeps the storage and its contents. While active the
    /// live viewport is reset to the whole target; otherwise the context
    /// viewport is left alone.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        profiling::scope!("OffscreenTarget::resize");
        let size = validate_size(width, height)?;
        if size == self.size {
            if self.is_active() {
                self.backend.set_viewport(Viewport::from_size(size));
            }
            return Ok(());
        }
        log::debug!(
            "Resizing offscreen target {:?} from {}x{} to {}x{}",
            self.framebuffer,
            self.size.x,
            self.size.y,
            width,
            height
        );
        self.size = size;
        self.backend.resize_texture(self.color, size);
        self.backend.resize_renderbuffer(self.depth_stencil, size);
        if self.is_active() {
            self.backend.set_viewport(Viewport::from_size(size));
        }
        self.check_errors("OffscreenTarget::resize");
        Ok(())
    }

    /// Draws `geometry` with `program`, sampling this target's color texture
    /// through the sampler uniform `uniform_name` on `texture_unit`.
    ///
    /// Both collaborators stay owned by the caller. Typically `geometry` is a
    /// full-screen quad and `program` a texture-sampling pass, composing this
    /// target into whatever render target is currently bound. If the program
    /// has no such uniform the uniform update is skipped.
    pub fn draw<G, P>(&self, geometry: &G, program: &P, uniform_name: &str, texture_unit: u32)
    where
        G: Geometry + ?Sized,
        P: ShaderProgram + ?Sized,
    {
        profiling::scope!("OffscreenTarget::draw");
        program.bind();
        self.backend.bind_texture(texture_unit, self.color);
        match program.uniform_location(uniform_name) {
            Some(location) => self.backend.set_sampler_uniform(location, texture_unit),
            None => log::warn!("Program has no uniform named {:?}", uniform_name),
        }
        geometry.draw();
        self.check_errors("OffscreenTarget::draw");
    }

    /// [`draw`](Self::draw) on texture unit 0.
    pub fn draw_default<G, P>(&self, geometry: &G, program: &P, uniform_name: &str)
    where
        G: Geometry + ?Sized,
        P: ShaderProgram + ?Sized,
    {
        self.draw(geometry, program, uniform_name, 0)
    }

    /// Reads the color texture back as a top-down RGB8 image.
    ///
    /// Blocks until the GPU has finished writing the texture.
    pub fn read_pixels(&self) -> Result<RgbImage> {
        profiling::scope!("OffscreenTarget::read_pixels");
        let mut image = self.backend.read_texture(self.color)?;
        if image.dimensions() != (self.size.x, self.size.y) {
            return Err(Error::Readback(format!(
                "expected {}x{} pixels, got {}x{}",
                self.size.x,
                self.size.y,
                image.width(),
                image.height()
            )));
        }
        if self.backend.row_order() == RowOrder::BottomUp {
            let row_len = image.width() as usize * 3;
            util::flip_rows(&mut image, row_len);
        }
        Ok(image)
    }

    /// Saves the color texture as a JPEG file at `path`.
    ///
    /// The file is written to a temporary sibling first and renamed into
    /// place, so a failure never leaves a truncated image behind.
    pub fn screenshot(&self, path: impl AsRef<Path>) -> Result<()> {
        profiling::scope!("OffscreenTarget::screenshot");
        let path = path.as_ref();
        let image = self.read_pixels()?;
        write_jpeg(&image, path, self.params.jpeg_quality)?;
        log::debug!(
            "Saved {}x{} screenshot of {:?} to {}",
            image.width(),
            image.height(),
            self.framebuffer,
            path.display()
        );
        self.check_errors("OffscreenTarget::screenshot");
        Ok(())
    }

    /// Handle of the color texture, for sampling in other passes.
    ///
    /// The handle survives resizes; its contents do not.
    pub fn color_texture(&self) -> TextureHandle {
        self.color
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.x
    }

    pub fn height(&self) -> u32 {
        self.size.y
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.size.x as f32 / self.size.y as f32
    }

    /// Viewport covering the whole target.
    pub fn viewport(&self) -> Viewport {
        Viewport::from_size(self.size)
    }

    pub fn is_active(&self) -> bool {
        self.saved.is_some()
    }

    pub fn params(&self) -> &TargetParams {
        &self.params
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn check_errors(&self, context: &str) {
        let errors = drain_errors(&*self.backend, context);
        if !errors.is_empty() && self.params.panic_on_gpu_error {
            panic!("{}: {} graphics API error(s): {:?}", context, errors.len(), errors);
        }
    }
}

impl<B: GraphicsBackend + ?Sized> Drop for OffscreenTarget<B> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            log::warn!(
                "Offscreen target {:?} dropped while active, restoring default target",
                self.framebuffer
            );
            self.restore(saved);
        }
        log::trace!("Deleting offscreen target {:?}", self.framebuffer);
        self.backend.delete_framebuffer(self.framebuffer);
        self.backend.delete_texture(self.color);
        self.backend.delete_renderbuffer(self.depth_stencil);
        drain_errors(&*self.backend, "OffscreenTarget::drop");
    }
}

fn validate_size(width: u32, height: u32) -> Result<UVec2> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidSize { width, height });
    }
    Ok(UVec2::new(width, height))
}

fn write_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<()> {
    let io_error = |source: std::io::Error| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(io_error)?;
    {
        let mut writer = BufWriter::new(file.as_file_mut());
        let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
        image
            .write_with_encoder(encoder)
            .map_err(|source| Error::Encode {
                path: path.to_path_buf(),
                source,
            })?;
        writer.flush().map_err(io_error)?;
    }
    file.persist(path).map_err(|e| io_error(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::GraphicsApiError,
        render::{
            Program, SamplerBinding, ShaderSource, SoftwareBackend, Topology, UniformLocation,
            VertexArray, WgpuBackend,
        },
    };

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn backend() -> Arc<SoftwareBackend> {
        init();
        Arc::new(SoftwareBackend::new(800, 600))
    }

    fn assert_close(actual: [u8; 3], expected: [u8; 3], tolerance: u8) {
        for (a, e) in actual.iter().zip(expected) {
            assert!(
                a.abs_diff(e) <= tolerance,
                "{:?} differs from {:?} by more than {}",
                actual,
                expected,
                tolerance
            );
        }
    }

    #[test]
    fn new_allocates_attachments_of_the_requested_size() {
        let backend = backend();
        let target = OffscreenTarget::new(backend.clone(), 320, 240).unwrap();

        assert_eq!(target.size(), UVec2::new(320, 240));
        assert_eq!((target.width(), target.height()), (320, 240));
        assert!(!target.is_active());
        assert_eq!(backend.bound_framebuffer(), None);

        let (color, depth_stencil) = backend
            .framebuffer_attachments(target.framebuffer())
            .unwrap();
        assert_eq!(color, target.color_texture());
        assert_eq!(backend.texture_size(color), Some(UVec2::new(320, 240)));
        assert_eq!(backend.renderbuffer_size(depth_stencil), Some(UVec2::new(320, 240)));

        let desc = backend.texture_desc(color).unwrap();
        assert_eq!(desc.filter, FilterMode::Linear);
        assert_eq!(desc.wrap, WrapMode::Repeat);
        assert_eq!(backend.live_resources().total(), 3);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let backend = backend();
        assert!(matches!(
            OffscreenTarget::new(backend.clone(), 0, 10),
            Err(Error::InvalidSize {
                width: 0,
                height: 10
            })
        ));
        assert_eq!(backend.live_resources().total(), 0);

        let mut target = OffscreenTarget::new(backend.clone(), 16, 16).unwrap();
        assert!(matches!(
            target.resize(16, 0),
            Err(Error::InvalidSize { .. })
        ));
        assert_eq!(target.size(), UVec2::new(16, 16));
        assert_eq!(
            backend.texture_size(target.color_texture()),
            Some(UVec2::new(16, 16))
        );
    }

    #[test]
    fn deactivate_restores_viewport_and_default_target() {
        let backend = backend();
        let mut target = OffscreenTarget::new(backend.clone(), 256, 128).unwrap();
        let before = Viewport::new(10, 20, 300, 200);
        backend.set_viewport(before);

        target.activate().unwrap();
        assert!(target.is_active());
        assert_eq!(backend.bound_framebuffer(), Some(target.framebuffer()));
        assert_eq!(backend.viewport(), Viewport::new(0, 0, 256, 128));

        backend.set_viewport(Viewport::new(1, 2, 3, 4));
        target.deactivate().unwrap();
        assert!(!target.is_active());
        assert_eq!(backend.bound_framebuffer(), None);
        assert_eq!(backend.viewport(), before);
    }

    #[test]
    fn activate_clears_color_and_depth_stencil() {
        let backend = backend();
        let mut target = OffscreenTarget::new(backend.clone(), 8, 8).unwrap();
        backend.fill_rect(target.color_texture(), target.viewport(), [1, 2, 3]);
        backend.set_clear_color(Color::RED);

        target.activate().unwrap();
        assert_eq!(backend.texture_pixel(target.color_texture(), 0, 0), Some([255, 0, 0]));
        assert_eq!(backend.texture_pixel(target.color_texture(), 7, 7), Some([255, 0, 0]));
        let (_, depth_stencil) = backend
            .framebuffer_attachments(target.framebuffer())
            .unwrap();
        assert_eq!(backend.renderbuffer_contents(depth_stencil), Some((1.0, 0)));
        // Without a configured clear color the context's is left alone.
        target.deactivate().unwrap();
        assert_eq!(backend.clear_color(), Color::RED);
    }

    #[test]
    fn configured_clear_color_is_applied_and_restored() {
        let backend = backend();
        backend.set_clear_color(Color::BLUE);
        let mut target = OffscreenTarget::with_params(
            backend.clone(),
            4,
            4,
            TargetParams::new().with_clear_color(Color::GREEN),
        )
        .unwrap();

        target.activate().unwrap();
        assert_eq!(backend.clear_color(), Color::GREEN);
        assert_eq!(backend.texture_pixel(target.color_texture(), 2, 2), Some([0, 255, 0]));

        target.deactivate().unwrap();
        assert_eq!(backend.clear_color(), Color::BLUE);
    }

    #[test]
    fn activation_does_not_nest() {
        let backend = backend();
        let mut target = OffscreenTarget::new(backend.clone(), 64, 64).unwrap();
        let before = Viewport::new(5, 5, 100, 100);
        backend.set_viewport(before);

        target.activate().unwrap();
        assert!(matches!(target.activate(), Err(Error::AlreadyActive)));
        assert!(target.is_active());

        // The second call must not have overwritten the saved viewport.
        target.deactivate().unwrap();
        assert_eq!(backend.viewport(), before);
    }

    #[test]
    fn deactivate_without_activate_is_rejected() {
        let backend = backend();
        let mut target = OffscreenTarget::new(backend.clone(), 64, 64).unwrap();
        let before = Viewport::new(7, 8, 9, 10);
        backend.set_viewport(before);

        assert!(matches!(target.deactivate(), Err(Error::NotActive)));
        assert_eq!(backend.viewport(), before);
        assert_eq!(backend.bound_framebuffer(), None);
    }

    #[test]
    fn resize_while_active_updates_viewport() {
        let backend = backend();
        let mut target = OffscreenTarget::new(backend.clone(), 100, 100).unwrap();
        let color = target.color_texture();
        let framebuffer = target.framebuffer();

        target.activate().unwrap();
        target.resize(1920, 1080).unwrap();
        assert_eq!(backend.viewport(), Viewport::new(0, 0, 1920, 1080));
        assert_eq!(target.color_texture(), color);
        assert_eq!(target.framebuffer(), framebuffer);
        assert_eq!(backend.texture_size(color), Some(UVec2::new(1920, 1080)));
        let (_, depth_stencil) = backend.framebuffer_attachments(framebuffer).unwrap();
        assert_eq!(
            backend.renderbuffer_size(depth_stencil),
            Some(UVec2::new(1920, 1080))
        );
        target.deactivate().unwrap();
    }

    #[test]
    fn resize_while_inactive_leaves_viewport_alone() {
        let backend = backend();
        let mut target = OffscreenTarget::new(backend.clone(), 100, 100).unwrap();
        let before = backend.viewport();

        target.resize(50, 25).unwrap();
        assert_eq!(backend.viewport(), before);
        assert_eq!(target.size(), UVec2::new(50, 25));
        assert_eq!(target.aspect_ratio(), 2.0);
    }

    #[test]
    fn resize_to_the_same_size_keeps_contents() {
        let backend = backend();
        let mut target = OffscreenTarget::new(backend.clone(), 10, 10).unwrap();
        backend.fill_rect(target.color_texture(), target.viewport(), [9, 8, 7]);

        target.resize(10, 10).unwrap();
        assert_eq!(backend.texture_pixel(target.color_texture(), 5, 5), Some([9, 8, 7]));
    }

    #[test]
    fn resize_to_the_same_size_while_active_resets_viewport() {
        let backend = backend();
        let mut target = OffscreenTarget::new(backend.clone(), 100, 100).unwrap();
        target.activate().unwrap();
        backend.set_viewport(Viewport::new(10, 10, 20, 20));

        target.resize(100, 100).unwrap();
        assert_eq!(backend.viewport(), Viewport::new(0, 0, 100, 100));
        target.deactivate().unwrap();
    }

    #[test]
    fn filter_and_wrap_reach_the_color_texture() {
        let backend = backend();
        let params = TargetParams::new()
            .with_filter(FilterMode::Nearest)
            .with_wrap(WrapMode::ClampToEdge);
        let mut target = OffscreenTarget::with_params(backend.clone(), 8, 8, params).unwrap();
        assert_eq!(target.params(), &params);

        let desc = backend.texture_desc(target.color_texture()).unwrap();
        assert_eq!(desc.filter, FilterMode::Nearest);
        assert_eq!(desc.wrap, WrapMode::ClampToEdge);

        // Sampling state survives reallocation.
        target.resize(16, 4).unwrap();
        let desc = backend.texture_desc(target.color_texture()).unwrap();
        assert_eq!(desc.size, UVec2::new(16, 4));
        assert_eq!(desc.filter, FilterMode::Nearest);
        assert_eq!(desc.wrap, WrapMode::ClampToEdge);
    }

    #[test]
    fn screenshot_of_solid_fill_matches_clear_color() {
        let backend = backend();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solid.jpg");
        let expected = [30, 144, 255];
        backend.set_clear_color(Color::from_rgb8(expected));

        let mut target = OffscreenTarget::new(backend.clone(), 64, 48).unwrap();
        target.activate().unwrap();
        target.deactivate().unwrap();
        target.screenshot(&path).unwrap();

        let image = image::open(&path).unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (64, 48));
        for pixel in image.pixels() {
            assert_close(pixel.0, expected, 8);
        }
    }

    #[test]
    fn screenshot_is_top_row_first() {
        let backend = backend();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orange.jpg");
        backend.set_clear_color(Color::ORANGE);

        let mut target = OffscreenTarget::new(backend.clone(), 100, 100).unwrap();
        target.activate().unwrap();
        // Upper half, in bottom-left origin coordinates.
        backend.fill_rect(target.color_texture(), Viewport::new(0, 50, 100, 50), [0, 0, 255]);
        target.deactivate().unwrap();

        let pixels = target.read_pixels().unwrap();
        assert_eq!(pixels.get_pixel(50, 0).0, [0, 0, 255]);
        assert_eq!(pixels.get_pixel(50, 99).0, [255, 128, 0]);

        target.screenshot(&path).unwrap();
        let image = image::open(&path).unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (100, 100));
        assert_close(image.get_pixel(50, 10).0, [0, 0, 255], 8);
        assert_close(image.get_pixel(50, 90).0, [255, 128, 0], 8);
    }

    #[test]
    fn screenshot_after_resize_has_new_dimensions() {
        let backend = backend();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hd.jpg");

        let mut target = OffscreenTarget::new(backend.clone(), 100, 100).unwrap();
        target.resize(1920, 1080).unwrap();
        target.screenshot(&path).unwrap();

        let image = image::open(&path).unwrap();
        assert_eq!((image.width(), image.height()), (1920, 1080));
    }

    #[test]
    fn screenshot_to_missing_directory_fails_cleanly() {
        let backend = backend();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.jpg");

        let target = OffscreenTarget::new(backend.clone(), 16, 16).unwrap();
        assert!(matches!(target.screenshot(&path), Err(Error::Io { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn screenshot_overwrites_existing_file() {
        let backend = backend();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        std::fs::write(&path, b"stale").unwrap();

        let target = OffscreenTarget::new(backend.clone(), 20, 10).unwrap();
        target.screenshot(&path).unwrap();

        let image = image::open(&path).unwrap();
        assert_eq!((image.width(), image.height()), (20, 10));
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn drop_releases_all_resources() {
        let backend = backend();
        let target = OffscreenTarget::new(backend.clone(), 32, 32).unwrap();
        assert_eq!(backend.live_resources().total(), 3);
        drop(target);
        assert_eq!(backend.live_resources().total(), 0);
    }

    #[test]
    fn drop_while_active_restores_context() {
        let backend = backend();
        let before = Viewport::new(0, 0, 640, 480);
        backend.set_viewport(before);

        let mut target = OffscreenTarget::new(backend.clone(), 32, 32).unwrap();
        target.activate().unwrap();
        drop(target);

        assert_eq!(backend.bound_framebuffer(), None);
        assert_eq!(backend.viewport(), before);
        assert_eq!(backend.live_resources().total(), 0);
        assert!(backend.take_error().is_none());
    }

    #[test]
    fn draw_samples_color_texture_on_requested_unit() {
        let backend = backend();
        let target = OffscreenTarget::new(backend.clone(), 64, 64).unwrap();
        let quad = VertexArray::fullscreen_quad(backend.clone());
        let program = Program::new(backend.clone(), &ShaderSource::blit()).unwrap();

        target.draw(&quad, &program, "screen_texture", 3);

        let calls = backend.draw_calls();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.program, program.handle());
        assert_eq!(call.framebuffer, None);
        assert_eq!(call.topology, Topology::TriangleStrip);
        assert_eq!(call.vertices, 0..4);
        assert_eq!(
            call.samplers,
            vec![SamplerBinding {
                location: UniformLocation(0),
                unit: 3,
                texture: Some(target.color_texture()),
            }]
        );
        assert_eq!(backend.current_program(), Some(program.handle()));
    }

    #[test]
    fn draw_default_uses_unit_zero() {
        let backend = backend();
        let target = OffscreenTarget::new(backend.clone(), 64, 64).unwrap();
        let quad = VertexArray::fullscreen_quad(backend.clone());
        let program = Program::new(backend.clone(), &ShaderSource::blit()).unwrap();

        target.draw_default(&quad, &program, "screen_texture");

        let calls = backend.draw_calls();
        assert_eq!(calls[0].samplers[0].unit, 0);
        assert_eq!(calls[0].samplers[0].texture, Some(target.color_texture()));
    }

    #[test]
    fn draw_with_unknown_uniform_skips_the_uniform_update() {
        let backend = backend();
        let target = OffscreenTarget::with_params(
            backend.clone(),
            64,
            64,
            TargetParams::new().with_panic_on_gpu_error(true),
        )
        .unwrap();
        let quad = VertexArray::fullscreen_quad(backend.clone());
        let program = Program::new(backend.clone(), &ShaderSource::blit()).unwrap();

        target.draw(&quad, &program, "no_such_uniform", 2);

        let calls = backend.draw_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].samplers[0].unit, 0);
        assert_eq!(calls[0].samplers[0].texture, None);
    }

    #[test]
    fn draw_into_another_active_target() {
        let backend = backend();
        let source = OffscreenTarget::new(backend.clone(), 64, 64).unwrap();
        let mut dest = OffscreenTarget::new(backend.clone(), 128, 32).unwrap();
        let quad = VertexArray::fullscreen_quad(backend.clone());
        let program = Program::new(backend.clone(), &ShaderSource::blit()).unwrap();

        dest.activate().unwrap();
        source.draw(&quad, &program, "screen_texture", 1);
        dest.deactivate().unwrap();

        let calls = backend.draw_calls();
        assert_eq!(calls[0].framebuffer, Some(dest.framebuffer()));
        assert_eq!(calls[0].viewport, Viewport::new(0, 0, 128, 32));
        assert_eq!(calls[0].samplers[0].texture, Some(source.color_texture()));
    }

    #[test]
    #[should_panic(expected = "graphics API error")]
    fn gpu_errors_panic_when_requested() {
        let backend = backend();
        let mut target = OffscreenTarget::with_params(
            backend.clone(),
            16,
            16,
            TargetParams::new().with_panic_on_gpu_error(true),
        )
        .unwrap();
        backend.push_error(GraphicsApiError::InvalidOperation("boom".into()));
        let _ = target.resize(32, 32);
    }

    #[test]
    fn gpu_errors_are_logged_and_drained_otherwise() {
        let backend = backend();
        let mut target = OffscreenTarget::with_params(
            backend.clone(),
            16,
            16,
            TargetParams::new().with_panic_on_gpu_error(false),
        )
        .unwrap();
        backend.push_error(GraphicsApiError::InvalidOperation("boom".into()));
        target.resize(32, 32).unwrap();
        assert!(backend.take_error().is_none());
    }

    #[test]
    fn jpeg_quality_is_clamped() {
        assert_eq!(TargetParams::new().with_jpeg_quality(0).jpeg_quality, 1);
        assert_eq!(TargetParams::new().with_jpeg_quality(250).jpeg_quality, 100);
        assert_eq!(TargetParams::default().jpeg_quality, 100);
    }

    fn wgpu_backend(width: u32, height: u32) -> Option<Arc<WgpuBackend>> {
        init();
        match WgpuBackend::headless(width, height) {
            Ok(backend) => Some(Arc::new(backend)),
            Err(err) => {
                log::warn!("Skipping wgpu test: {}", err);
                None
            }
        }
    }

    fn black_target(
        backend: &Arc<WgpuBackend>,
        params: TargetParams,
    ) -> OffscreenTarget<WgpuBackend> {
        let params = params.with_clear_color(Color::BLACK);
        OffscreenTarget::with_params(backend.clone(), 72, 72, params).unwrap()
    }

    /// Checks the white diagnostic triangle on black in a 72x72 image, top
    /// row first: the triangle sits right of and above the center.
    fn assert_upright_triangle(pixels: &RgbImage) {
        assert_eq!(pixels.dimensions(), (72, 72));
        assert_close(pixels.get_pixel(40, 24).0, [255, 255, 255], 1);
        assert_close(pixels.get_pixel(40, 40).0, [0, 0, 0], 1);
        assert_close(pixels.get_pixel(24, 24).0, [0, 0, 0], 1);
        assert_close(pixels.get_pixel(60, 10).0, [0, 0, 0], 1);
    }

    fn draw_triangle(target: &mut OffscreenTarget<WgpuBackend>) {
        let backend = target.backend().clone();
        let triangle = VertexArray::triangle(backend.clone());
        let program = Program::new(backend, &ShaderSource::passthrough()).unwrap();
        target.activate().unwrap();
        program.bind();
        triangle.draw();
        target.deactivate().unwrap();
    }

    #[test]
    fn wgpu_target_reads_back_clear_color() {
        let Some(backend) = wgpu_backend(64, 64) else {
            return;
        };
        let mut target = OffscreenTarget::with_params(
            backend.clone(),
            40,
            30,
            TargetParams::new().with_clear_color(Color::ORANGE),
        )
        .unwrap();
        target.activate().unwrap();
        target.deactivate().unwrap();

        let pixels = target.read_pixels().unwrap();
        assert_eq!(pixels.dimensions(), (40, 30));
        assert_close(pixels.get_pixel(0, 0).0, [255, 128, 0], 1);
        assert_close(pixels.get_pixel(39, 29).0, [255, 128, 0], 1);
    }

    #[test]
    fn wgpu_triangle_is_upright() {
        let Some(backend) = wgpu_backend(72, 72) else {
            return;
        };
        let mut target = black_target(&backend, TargetParams::new());
        draw_triangle(&mut target);
        assert_upright_triangle(&target.read_pixels().unwrap());
    }

    #[test]
    fn wgpu_composition_keeps_orientation() {
        let Some(backend) = wgpu_backend(72, 72) else {
            return;
        };
        let mut source = black_target(
            &backend,
            TargetParams::new()
                .with_filter(FilterMode::Nearest)
                .with_wrap(WrapMode::ClampToEdge),
        );
        draw_triangle(&mut source);

        let mut dest = black_target(&backend, TargetParams::new());
        let quad = VertexArray::fullscreen_quad(backend.clone());
        let blit = Program::new(backend.clone(), &ShaderSource::blit()).unwrap();
        dest.activate().unwrap();
        source.draw(&quad, &blit, "screen_texture", 2);
        dest.deactivate().unwrap();

        assert_upright_triangle(&dest.read_pixels().unwrap());
    }

    #[test]
    fn wgpu_composition_into_default_target() {
        let Some(backend) = wgpu_backend(72, 72) else {
            return;
        };
        let mut source = black_target(&backend, TargetParams::new());
        draw_triangle(&mut source);

        backend.set_clear_color(Color::BLACK);
        backend.clear(ClearFlags::ALL);
        let quad = VertexArray::fullscreen_quad(backend.clone());
        let blit = Program::new(backend.clone(), &ShaderSource::blit()).unwrap();
        source.draw_default(&quad, &blit, "screen_texture");

        assert_upright_triangle(&backend.read_default_target().unwrap());
    }

    #[test]
    fn wgpu_overhanging_viewport_crops_instead_of_squashing() {
        let Some(backend) = wgpu_backend(64, 64) else {
            return;
        };
        let mut target = OffscreenTarget::with_params(
            backend.clone(),
            64,
            64,
            TargetParams::new().with_clear_color(Color::BLACK),
        )
        .unwrap();
        let triangle = VertexArray::triangle(backend.clone());
        let quad = VertexArray::fullscreen_quad(backend.clone());
        let program = Program::new(backend.clone(), &ShaderSource::passthrough()).unwrap();

        // Right half of the viewport lies outside the target, and so does
        // the whole triangle.
        target.activate().unwrap();
        backend.set_viewport(Viewport::new(32, 0, 64, 64));
        program.bind();
        triangle.draw();
        target.deactivate().unwrap();
        let pixels = target.read_pixels().unwrap();
        assert!(pixels.pixels().all(|p| p.0 == [0, 0, 0]));

        target.activate().unwrap();
        backend.set_viewport(Viewport::new(32, 0, 64, 64));
        program.bind();
        quad.draw();
        target.deactivate().unwrap();
        let pixels = target.read_pixels().unwrap();
        assert_close(pixels.get_pixel(48, 32).0, [255, 255, 255], 1);
        assert_close(pixels.get_pixel(16, 32).0, [0, 0, 0], 1);
    }
}
