/// Scene-graph, state-stack and picking behaviour through the renderer.
///
/// Run with:   cargo test --test world
use glam::{Mat4, Vec3};
use scena::{Camera, Color, PixelPrimitive, Renderer, RibbonPrimitive, SoftwareDevice};

fn world(width: u32, height: u32) -> Renderer {
    let mut renderer = Renderer::new();
    renderer.set_resolution(width, height);
    *renderer.camera_mut() = Camera::orthographic(0.0, 1.0, 0.0, 1.0);
    renderer
}

#[test]
fn the_state_stack_is_balanced_across_a_frame() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    renderer.push_state();
    renderer.state_mut().colour = Color::rgb(1.0, 0.0, 0.0);
    let parent = renderer.add_primitive(RibbonPrimitive::new().into());
    renderer.add_primitive_to(RibbonPrimitive::new().into(), Some(parent));
    renderer.pop_state();

    let depth = renderer.stack_depth();
    renderer.render(&mut device);
    assert_eq!(renderer.stack_depth(), depth);

    renderer.render(&mut device);
    assert_eq!(renderer.stack_depth(), depth);
}

#[test]
fn detaching_keeps_a_primitive_where_it_was() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    let parent = renderer.add_primitive(RibbonPrimitive::new().into());
    let child = renderer.add_primitive_to(RibbonPrimitive::new().into(), Some(parent));
    renderer
        .get_primitive_mut(parent)
        .unwrap()
        .state_mut()
        .transform = Mat4::from_translation(Vec3::new(0.25, 0.0, 0.0));
    renderer
        .get_primitive_mut(child)
        .unwrap()
        .state_mut()
        .transform = Mat4::from_translation(Vec3::new(0.0, 0.25, 0.0));

    let before = renderer.global_transform(child);
    assert!(renderer.detach_primitive(child));
    let after = renderer.global_transform(child);

    assert_eq!(before, after);
    renderer.render(&mut device);
}

#[test]
fn grabbing_is_exclusive_and_routes_state_edits() {
    let mut renderer = world(8, 8);
    let first = renderer.add_primitive(RibbonPrimitive::new().into());
    let second = renderer.add_primitive(RibbonPrimitive::new().into());

    assert!(renderer.grab(first));
    assert!(renderer.grab(second));
    assert_eq!(renderer.grabbed(), Some(second));

    renderer.state_mut().colour = Color::rgb(0.0, 1.0, 0.0);
    let untouched = renderer.get_primitive(first).unwrap().state().colour;
    let edited = renderer.get_primitive(second).unwrap().state().colour;
    assert_eq!(untouched, Color::WHITE);
    assert_eq!(edited, Color::rgb(0.0, 1.0, 0.0));

    // push and pop are refused while grabbed, so the stack stays put
    let depth = renderer.stack_depth();
    renderer.push_state();
    assert_eq!(renderer.stack_depth(), depth);

    renderer.ungrab();
    assert_eq!(renderer.grabbed(), None);
    renderer.state_mut().colour = Color::rgb(0.0, 0.0, 1.0);
    assert_eq!(
        renderer.get_primitive(second).unwrap().state().colour,
        Color::rgb(0.0, 1.0, 0.0)
    );
}

#[test]
fn select_returns_the_nearest_primitive() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    let behind = renderer.add_primitive(PixelPrimitive::new(&mut device, 2, 2, false).into());
    let front = renderer.add_primitive(PixelPrimitive::new(&mut device, 2, 2, false).into());
    renderer
        .get_primitive_mut(behind)
        .unwrap()
        .state_mut()
        .transform = Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0));

    let hit = renderer.select(&mut device, 3, 3, 2);
    assert_eq!(hit, Some(front));

    // a picking pass leaves no visible trace
    assert_eq!(&device.frame_pixels()[0..4], &[0, 0, 0, 0]);

    // an ordinary frame still renders afterwards
    renderer.render(&mut device);
    assert_ne!(&device.frame_pixels()[0..4], &[0, 0, 0, 0]);
}

#[test]
fn select_misses_when_nothing_is_under_the_cursor() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    let id = renderer.add_primitive(PixelPrimitive::new(&mut device, 2, 2, false).into());
    // shrink the quad into the lower-left quarter of the view
    renderer.get_primitive_mut(id).unwrap().state_mut().transform =
        Mat4::from_scale(Vec3::new(0.25, 0.25, 1.0));

    assert_eq!(renderer.select(&mut device, 7, 0, 1), None);
}

#[test]
fn equal_depth_select_prefers_the_oldest_primitive() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    // two quads side by side in the same depth plane
    let left = renderer.add_primitive(PixelPrimitive::new(&mut device, 2, 2, false).into());
    let right = renderer.add_primitive(PixelPrimitive::new(&mut device, 2, 2, false).into());
    renderer.get_primitive_mut(left).unwrap().state_mut().transform =
        Mat4::from_scale(Vec3::new(0.5, 1.0, 1.0));
    renderer.get_primitive_mut(right).unwrap().state_mut().transform =
        Mat4::from_translation(Vec3::new(0.5, 0.0, 0.0)) * Mat4::from_scale(Vec3::new(0.5, 1.0, 1.0));

    // the region straddles both quads
    assert_eq!(renderer.select(&mut device, 2, 2, 4), Some(left));
    assert_eq!(renderer.select(&mut device, 2, 2, 4), Some(left));
}

#[test]
fn the_scene_bounding_box_spans_every_root() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    let a = renderer.add_primitive(RibbonPrimitive::from_points(vec![Vec3::ZERO, Vec3::X], 0.1).into());
    let b = renderer
        .add_primitive(RibbonPrimitive::from_points(vec![Vec3::new(4.0, 4.0, 0.0), Vec3::new(5.0, 6.0, 0.0)], 0.1).into());

    let bounds = renderer.scene_bounding_box();
    assert_eq!(bounds.min, Vec3::ZERO);
    assert_eq!(bounds.max, Vec3::new(5.0, 6.0, 0.0));

    renderer.remove_primitive(b);
    assert!(renderer.get_primitive(a).is_some());
    let bounds = renderer.scene_bounding_box();
    assert_eq!(bounds.max, Vec3::new(1.0, 0.0, 0.0));
    renderer.render(&mut device);
}

#[test]
fn removal_notifies_physics_and_keeps_the_rest() {
    let mut device = SoftwareDevice::new(8, 8);
    let mut renderer = world(8, 8);

    let doomed = renderer.add_primitive(RibbonPrimitive::new().into());
    let kept = renderer.add_primitive(RibbonPrimitive::new().into());
    renderer.physics_mut().register_body(doomed);
    renderer.physics_mut().register_body(kept);

    renderer.remove_primitive(doomed);
    assert!(!renderer.physics().has_body(doomed));
    assert!(renderer.physics().has_body(kept));
    assert!(renderer.get_primitive(doomed).is_none());
    assert!(renderer.get_primitive(kept).is_some());

    // removing an already removed id is harmless
    renderer.remove_primitive(doomed);
    renderer.render(&mut device);
}

#[test]
fn removing_a_grabbed_primitive_drops_the_grab() {
    let mut renderer = world(8, 8);
    let id = renderer.add_primitive(RibbonPrimitive::new().into());
    renderer.grab(id);
    renderer.remove_primitive(id);
    assert_eq!(renderer.grabbed(), None);

    // state edits fall back to the stack top instead of a dead primitive
    renderer.state_mut().opacity = 0.5;
    assert_eq!(renderer.state().opacity, 0.5);
}

#[test]
fn new_primitives_snapshot_the_current_state() {
    let mut renderer = world(8, 8);

    renderer.push_state();
    renderer.state_mut().colour = Color::rgb(1.0, 0.0, 1.0);
    renderer.state_mut().transform = Mat4::from_translation(Vec3::new(0.5, 0.0, 0.0));
    let id = renderer.add_primitive(RibbonPrimitive::new().into());
    renderer.pop_state();

    let state = renderer.get_primitive(id).unwrap().state();
    assert_eq!(state.colour, Color::rgb(1.0, 0.0, 1.0));
    assert_eq!(
        state.transform.transform_point3(Vec3::ZERO),
        Vec3::new(0.5, 0.0, 0.0)
    );

    // primitives added after the pop use the untouched stack top
    let plain = renderer.add_primitive(RibbonPrimitive::new().into());
    assert_eq!(renderer.get_primitive(plain).unwrap().state().colour, Color::WHITE);
}
