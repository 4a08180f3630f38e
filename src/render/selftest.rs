use crate::{
    core::Color,
    error::Result,
    render::{
        ClearFlags, Geometry, GraphicsBackend, OffscreenTarget, Program, ShaderProgram,
        ShaderSource, VertexArray,
    },
};
use std::path::Path;

/// File written by [`run_self_test`] at the target's initial size.
pub const SELF_TEST_IMAGE: &str = "target.jpg";
/// File written by [`run_self_test`] after resizing to [`SELF_TEST_HD_SIZE`].
pub const SELF_TEST_HD_IMAGE: &str = "target_hd.jpg";
/// Size the target is resized to halfway through the self test.
pub const SELF_TEST_HD_SIZE: (u32, u32) = (1920, 1080);

/// Renders a white triangle on an orange background into `target`, saves it
/// to [`SELF_TEST_IMAGE`] in `out_dir`, then repeats at 1920x1080 into
/// [`SELF_TEST_HD_IMAGE`].
///
/// The target is left deactivated and resized, and the context clear color
/// is reset to white. Fails if the shader does not build or a screenshot
/// cannot be written.
pub fn run_self_test<B>(target: &mut OffscreenTarget<B>, out_dir: &Path) -> Result<()>
where
    B: GraphicsBackend + ?Sized,
{
    profiling::scope!("run_self_test");
    let backend = target.backend().clone();
    let triangle = VertexArray::triangle(backend.clone());
    let program = Program::new(backend.clone(), &ShaderSource::passthrough()).map_err(|err| {
        log::error!("Self test shader failed to build: {}", err);
        err
    })?;

    target.activate()?;
    let result = render_passes(target, &triangle, &program, out_dir);
    let deactivated = target.deactivate();
    backend.set_clear_color(Color::WHITE);
    result?;
    deactivated?;
    log::info!("Self test images written to {}", out_dir.display());
    Ok(())
}

fn render_passes<B, G, P>(
    target: &mut OffscreenTarget<B>,
    triangle: &G,
    program: &P,
    out_dir: &Path,
) -> Result<()>
where
    B: GraphicsBackend + ?Sized,
    G: Geometry,
    P: ShaderProgram,
{
    let backend = target.backend().clone();
    backend.set_clear_color(Color::ORANGE);

    backend.clear(ClearFlags::ALL);
    program.bind();
    triangle.draw();
    target.screenshot(out_dir.join(SELF_TEST_IMAGE))?;

    let (width, height) = SELF_TEST_HD_SIZE;
    target.resize(width, height)?;
    backend.clear(ClearFlags::ALL);
    program.bind();
    triangle.draw();
    target.screenshot(out_dir.join(SELF_TEST_HD_IMAGE))?;
    Ok(())
}
