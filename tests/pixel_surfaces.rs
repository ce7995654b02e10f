/// Render-target surface tests for the pixel primitive.
///
/// These run against the CPU device, so they exercise the full
/// upload/render/download pipeline without needing a GPU.
///
/// Run with:   cargo test --test pixel_surfaces
use scena::{Camera, Color, PixelPrimitive, Renderer, SoftwareDevice};

fn world(width: u32, height: u32) -> Renderer {
    let mut renderer = Renderer::new();
    renderer.set_resolution(width, height);
    *renderer.camera_mut() = Camera::orthographic(0.0, 1.0, 0.0, 1.0);
    renderer
}

#[test]
fn surfaces_are_padded_to_powers_of_two() {
    let mut device = SoftwareDevice::new(8, 8);

    let small = PixelPrimitive::new(&mut device, 3, 5, false);
    assert_eq!(small.padded_size(), Some((4, 8)));

    let exact = PixelPrimitive::new(&mut device, 64, 64, false);
    assert_eq!(exact.padded_size(), Some((64, 64)));
    assert_eq!(exact.used_fractions(), (1.0, 1.0));

    let texture = small.texture().unwrap();
    assert_eq!(device.texture_size(texture), Some((4, 8)));
}

#[test]
fn resize_recreates_the_surface_and_recomputes_fractions() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut primitive = PixelPrimitive::new(&mut device, 64, 64, false);
    assert_eq!(device.texture_count(), 1);

    primitive.resize(&mut device, 100, 40);

    assert_eq!(primitive.size(), (100, 40));
    assert_eq!(primitive.padded_size(), Some((128, 64)));
    let (s, t) = primitive.used_fractions();
    assert_eq!(s, 100.0 / 128.0);
    assert_eq!(t, 40.0 / 64.0);
    // the old surface was released, not leaked
    assert_eq!(device.texture_count(), 1);
    assert_eq!(device.render_target_count(), 1);
}

#[test]
fn resize_reseeds_the_surface_from_the_colour_channel() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    let mut primitive = PixelPrimitive::new(&mut device, 4, 4, false);
    primitive.resize(&mut device, 8, 8);
    renderer.add_primitive(primitive.into());
    renderer.render(&mut device);

    // the grown surface carries the channel's opaque white, not zeroes
    let frame = device.frame_pixels();
    assert_eq!(&frame[..4], &[255, 255, 255, 255]);
    let last = frame.len() - 4;
    assert_eq!(&frame[last..], &[255, 255, 255, 255]);
}

#[test]
fn upload_download_round_trips_within_8_bit_precision() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    let mut primitive = PixelPrimitive::new(&mut device, 4, 4, false);
    {
        let colours = primitive.pdata.colours_mut("c").unwrap();
        for (index, colour) in colours.iter_mut().enumerate() {
            let v = index as f32 / 15.0;
            *colour = Color::rgba(v, 1.0 - v, 0.25, 1.0);
        }
    }
    primitive.upload();
    primitive.download();
    let expected: Vec<Color> = primitive.pdata.colours("c").unwrap().to_vec();

    let id = renderer.add_primitive(primitive.into());
    renderer.render(&mut device);

    let pixel = renderer
        .get_primitive(id)
        .and_then(|p| p.as_pixel())
        .unwrap();
    let colours = pixel.pdata.colours("c").unwrap();
    for (got, want) in colours.iter().zip(expected.iter()) {
        assert!((got.r - want.r).abs() <= 1.0 / 255.0);
        assert!((got.g - want.g).abs() <= 1.0 / 255.0);
        assert!((got.b - want.b).abs() <= 1.0 / 255.0);
        assert!((got.a - want.a).abs() <= 1.0 / 255.0);
    }
}

#[test]
fn only_the_used_region_is_sampled_onto_the_quad() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    // 3x3 content inside a 4x4 padded texture; the padding stays black
    let mut primitive = PixelPrimitive::new(&mut device, 3, 3, false);
    for colour in primitive.pdata.colours_mut("c").unwrap().iter_mut() {
        *colour = Color::rgb(1.0, 0.0, 0.0);
    }
    primitive.upload();

    renderer.add_primitive(primitive.into());
    renderer.render(&mut device);

    let pixels = device.frame_pixels();
    assert_eq!(&pixels[0..4], &[255, 0, 0, 255]);
    let centre = ((4 * 8 + 4) * 4) as usize;
    assert_eq!(&pixels[centre..centre + 4], &[255, 0, 0, 255]);
    let last = pixels.len() - 4;
    assert_eq!(&pixels[last..], &[255, 0, 0, 255]);
}

#[test]
fn fallback_mode_disables_nested_rendering_but_still_draws() {
    let mut device = SoftwareDevice::without_render_targets(8, 8);
    let mut renderer = world(8, 8);

    let mut primitive = PixelPrimitive::new(&mut device, 4, 4, true);
    assert!(primitive.is_fallback());
    assert!(primitive.renderer_active());
    assert_eq!(primitive.padded_size(), None);
    assert_eq!(primitive.used_fractions(), (1.0, 1.0));
    assert_eq!(device.render_target_count(), 0);

    // content the nested renderer would overwrite if it ran
    for colour in primitive.pdata.colours_mut("c").unwrap().iter_mut() {
        *colour = Color::rgb(0.0, 1.0, 0.0);
    }
    primitive.upload();
    primitive
        .renderer_mut()
        .set_clear_colour(Color::rgb(1.0, 0.0, 0.0));

    renderer.add_primitive(primitive.into());
    renderer.render(&mut device);

    // the uploaded pixels survive because the active flag is ignored
    assert_eq!(&device.frame_pixels()[0..4], &[0, 255, 0, 255]);
}

#[test]
fn nested_worlds_render_into_the_parent_surface() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    let mut primitive = PixelPrimitive::new(&mut device, 4, 4, true);
    let nested = primitive.renderer_mut();
    *nested.camera_mut() = Camera::orthographic(0.0, 1.0, 0.0, 1.0);
    nested.set_clear_colour(Color::rgb(0.0, 0.0, 1.0));

    renderer.add_primitive(primitive.into());
    renderer.render(&mut device);

    // the nested clear colour shows through the textured quad
    assert_eq!(&device.frame_pixels()[0..4], &[0, 0, 255, 255]);
}

#[test]
fn removing_a_primitive_releases_every_nested_resource() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    let mut outer = PixelPrimitive::new(&mut device, 4, 4, true);
    let inner = PixelPrimitive::new(&mut device, 2, 2, false);
    outer.renderer_mut().add_primitive(inner.into());
    assert_eq!(device.texture_count(), 2);
    assert_eq!(device.render_target_count(), 2);

    let id = renderer.add_primitive(outer.into());
    renderer.render(&mut device);

    renderer.remove_primitive(id);
    // teardown is deferred to the next frame, where a context exists
    assert_eq!(device.texture_count(), 2);
    renderer.render(&mut device);
    assert_eq!(device.texture_count(), 0);
    assert_eq!(device.render_target_count(), 0);
}

#[test]
fn clones_get_a_fresh_world_and_allocate_lazily() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    let mut original = PixelPrimitive::new(&mut device, 4, 4, true);
    original
        .renderer_mut()
        .add_primitive(scena::RibbonPrimitive::new().into());

    let clone = original.clone();
    assert_eq!(clone.size(), (4, 4));
    assert_eq!(clone.renderer().primitive_count(), 0);
    assert_eq!(clone.padded_size(), None);
    assert_eq!(device.texture_count(), 1);

    renderer.add_primitive(clone.into());
    renderer.render(&mut device);
    // the clone's surface exists after its first render
    assert_eq!(device.texture_count(), 2);

    // one-shot rendering of the original releases its surface afterwards
    renderer.render_primitive(original.into());
    renderer.render(&mut device);
    assert_eq!(device.texture_count(), 1);
}
