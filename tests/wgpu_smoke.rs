/// Headless GPU smoke test. Skips quietly on machines without an adapter,
/// so it can live in the default test run.
///
/// Run with:   cargo test --test wgpu_smoke
use futures::executor::block_on;
use scena::{Camera, Color, PixelPrimitive, Renderer, WgpuDevice};

#[test]
fn clears_and_reads_back_a_frame() {
    let _ = env_logger::builder().is_test(true).try_init();

    let Some(mut device) = block_on(WgpuDevice::try_new_headless(8, 8)) else {
        log::warn!("no gpu adapter available, skipping");
        return;
    };

    let mut renderer = Renderer::new();
    renderer.set_resolution(8, 8);
    *renderer.camera_mut() = Camera::orthographic(0.0, 1.0, 0.0, 1.0);
    renderer.set_clear_colour(Color::rgb(1.0, 0.0, 0.0));
    renderer.render(&mut device);

    let mut pixels = Vec::new();
    device.read_frame(&mut pixels);
    assert_eq!(&pixels[0..4], &[255, 0, 0, 255]);
}

#[test]
fn nested_worlds_render_into_a_target_texture() {
    let _ = env_logger::builder().is_test(true).try_init();

    let Some(mut device) = block_on(WgpuDevice::try_new_headless(8, 8)) else {
        log::warn!("no gpu adapter available, skipping");
        return;
    };

    let mut renderer = Renderer::new();
    renderer.set_resolution(8, 8);
    *renderer.camera_mut() = Camera::orthographic(0.0, 1.0, 0.0, 1.0);

    let mut surface = PixelPrimitive::new(&mut device, 4, 4, true);
    surface
        .renderer_mut()
        .set_clear_colour(Color::rgb(0.0, 0.0, 1.0));
    renderer.add_primitive(surface.into());
    renderer.render(&mut device);

    // the sub-world's clear colour shows through the textured quad
    let mut pixels = Vec::new();
    device.read_frame(&mut pixels);
    assert_eq!(&pixels[0..4], &[0, 0, 255, 255]);
}
