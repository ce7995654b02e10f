//! The renderer: owns a scene graph, a state stack, lights, a camera and
//! frame configuration, and drives a [`GraphicsDevice`] to draw them.
//!
//! A renderer is deliberately self-contained so that a pixel primitive can
//! own a whole nested one; nothing here touches global state.

use std::time::{Duration, Instant};

use glam::Mat4;

use crate::bounds::BoundingBox;
use crate::camera::Camera;
use crate::color::Color;
use crate::device::{Fog, GraphicsDevice, LightInfo, StereoMode};
use crate::id::{LightId, PrimitiveId};
use crate::light::Light;
use crate::physics::Physics;
use crate::primitive::Primitive;
use crate::scene_graph::SceneGraph;
use crate::state::{State, StateStack};

mod frame;
mod picking;

pub struct Renderer {
    world: SceneGraph,
    stack: StateStack,
    physics: Physics,

    grabbed: Option<PrimitiveId>,

    lights: Vec<(LightId, Light)>,
    next_light_id: u32,

    camera: Camera,
    resolution: (u32, u32),
    clear_colour: Color,
    clear_frame: bool,
    clear_depth: bool,
    fog: Option<Fog>,
    stereo: StereoMode,
    backface_cull: bool,
    clockwise_faces: bool,

    /// Primitives whose device resources await release; drained at the
    /// start of the next frame, where a live context is guaranteed.
    retired: Vec<Primitive>,
    /// One-shot primitives queued for this frame only.
    immediate: Vec<Primitive>,

    initialised: bool,
    frame_count: u32,
    fps: f32,
    last_fps_check: Instant,
    desired_fps: Option<f32>,
    started: Instant,
    last_frame: Instant,
    delta: f32,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            world: SceneGraph::new(),
            stack: StateStack::new(),
            physics: Physics::new(),
            grabbed: None,
            lights: Vec::new(),
            next_light_id: 1,
            camera: Camera::default(),
            resolution: (640, 480),
            clear_colour: Color::BLACK,
            clear_frame: true,
            clear_depth: true,
            fog: None,
            stereo: StereoMode::None,
            backface_cull: false,
            clockwise_faces: false,
            retired: Vec::new(),
            immediate: Vec::new(),
            initialised: false,
            frame_count: 0,
            fps: 0.0,
            last_fps_check: Instant::now(),
            desired_fps: None,
            started: Instant::now(),
            last_frame: Instant::now(),
            delta: 0.0,
        }
    }

    // --- frame configuration -------------------------------------------

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.resolution = (width, height);
        self.initialised = false;
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// Forces frame setup to run again at the next render. Needed after the
    /// device's output has changed underneath us, e.g. when rendering into
    /// a freshly bound off-screen target.
    pub fn reinitialise(&mut self) {
        self.initialised = false;
    }

    pub fn set_clear_colour(&mut self, colour: Color) {
        self.clear_colour = colour;
    }

    pub fn clear_colour(&self) -> Color {
        self.clear_colour
    }

    pub fn set_clear_frame(&mut self, clear: bool) {
        self.clear_frame = clear;
    }

    pub fn set_clear_depth(&mut self, clear: bool) {
        self.clear_depth = clear;
    }

    pub fn set_fog(&mut self, fog: Option<Fog>) {
        self.fog = fog;
    }

    pub fn set_stereo(&mut self, stereo: StereoMode) {
        self.stereo = stereo;
    }

    pub fn set_backface_cull(&mut self, cull: bool) {
        self.backface_cull = cull;
    }

    pub fn set_clockwise_faces(&mut self, clockwise: bool) {
        self.clockwise_faces = clockwise;
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Caps the frame rate by sleeping out the rest of each frame's budget
    /// at the end of [`render`](Self::render). `None` leaves it uncapped.
    pub fn set_desired_fps(&mut self, fps: Option<f32>) {
        self.desired_fps = fps.filter(|f| *f > 0.0);
    }

    /// Seconds since this renderer was created.
    pub fn time(&self) -> f32 {
        self.started.elapsed().as_secs_f32()
    }

    /// Seconds between the last two frames, frame-cap sleep included.
    pub fn delta(&self) -> f32 {
        self.delta
    }

    // --- state stack and grab ------------------------------------------

    /// The state new primitives are built with and ungrabbed edits apply
    /// to. While a primitive is grabbed this is its state instead.
    pub fn state(&self) -> &State {
        if let Some(id) = self.grabbed {
            if let Some(primitive) = self.world.get(id) {
                return primitive.state();
            }
        }
        self.stack.current()
    }

    pub fn state_mut(&mut self) -> &mut State {
        if let Some(id) = self.grabbed {
            if self.world.contains(id) {
                return self.world.get_mut(id).unwrap().state_mut();
            }
        }
        self.stack.current_mut()
    }

    pub fn push_state(&mut self) {
        if self.grabbed.is_some() {
            log::warn!("state push ignored while a primitive is grabbed");
            return;
        }
        self.stack.push();
    }

    pub fn pop_state(&mut self) {
        if self.grabbed.is_some() {
            log::warn!("state pop ignored while a primitive is grabbed");
            return;
        }
        self.stack.pop();
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Directs state edits at `id` until [`ungrab`](Self::ungrab). Grabbing
    /// is exclusive; a second grab displaces the first.
    pub fn grab(&mut self, id: PrimitiveId) -> bool {
        if !self.world.contains(id) {
            log::warn!("grab of unknown primitive {} ignored", id);
            return false;
        }
        self.grabbed = Some(id);
        true
    }

    pub fn ungrab(&mut self) {
        self.grabbed = None;
    }

    pub fn grabbed(&self) -> Option<PrimitiveId> {
        self.grabbed
    }

    // --- lights ---------------------------------------------------------

    pub fn add_light(&mut self, light: Light) -> LightId {
        let id = LightId(self.next_light_id);
        self.next_light_id += 1;
        self.lights.push((id, light));
        id
    }

    pub fn light_mut(&mut self, id: LightId) -> Option<&mut Light> {
        self.lights
            .iter_mut()
            .find(|(light_id, _)| *light_id == id)
            .map(|(_, light)| light)
    }

    pub fn clear_lights(&mut self) {
        self.lights.clear();
    }

    fn light_infos(&self) -> Vec<LightInfo> {
        self.lights.iter().map(|(_, light)| light.info()).collect()
    }

    // --- primitives -----------------------------------------------------

    /// Adds a primitive at the root of the scene graph. It takes a snapshot
    /// of the current state, so pushes and transforms made before the add
    /// shape where it lands.
    pub fn add_primitive(&mut self, primitive: Primitive) -> PrimitiveId {
        self.add_primitive_to(primitive, None)
    }

    pub fn add_primitive_to(
        &mut self,
        mut primitive: Primitive,
        parent: Option<PrimitiveId>,
    ) -> PrimitiveId {
        *primitive.state_mut() = *self.stack.current();
        self.world.add(primitive, parent)
    }

    pub fn get_primitive(&self, id: PrimitiveId) -> Option<&Primitive> {
        self.world.get(id)
    }

    pub fn get_primitive_mut(&mut self, id: PrimitiveId) -> Option<&mut Primitive> {
        self.world.get_mut(id)
    }

    pub fn primitive_count(&self) -> usize {
        self.world.len()
    }

    /// Removes `id` and its subtree. Physics bodies for the removed
    /// primitives are dropped, and their device resources are released at
    /// the start of the next frame.
    pub fn remove_primitive(&mut self, id: PrimitiveId) {
        if self.grabbed == Some(id) {
            self.grabbed = None;
        }
        for (removed_id, primitive) in self.world.remove(id) {
            self.physics.remove_body(removed_id);
            self.retired.push(primitive);
        }
    }

    pub fn reparent_primitive(&mut self, id: PrimitiveId, parent: Option<PrimitiveId>) -> bool {
        self.world.reparent(id, parent)
    }

    /// Moves `id` to the scene-graph root without changing where it sits in
    /// the world.
    pub fn detach_primitive(&mut self, id: PrimitiveId) -> bool {
        self.world.detach(id)
    }

    pub fn global_transform(&self, id: PrimitiveId) -> Mat4 {
        self.world.global_transform(id)
    }

    pub fn bounding_box(&self, id: PrimitiveId) -> BoundingBox {
        self.world.bounding_box(id)
    }

    pub fn scene_bounding_box(&self) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        for root in self.world.roots() {
            bounds.union(&self.world.bounding_box(*root));
        }
        bounds
    }

    /// Queues a primitive to render once next frame, outside the scene
    /// graph. Its device resources are released as soon as it has drawn.
    pub fn render_primitive(&mut self, mut primitive: Primitive) {
        *primitive.state_mut() = *self.stack.current();
        self.immediate.push(primitive);
    }

    pub fn physics(&self) -> &Physics {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut Physics {
        &mut self.physics
    }

    fn flush_retired(&mut self, device: &mut dyn GraphicsDevice) {
        for mut primitive in self.retired.drain(..) {
            primitive.destroy(device);
        }
    }

    /// Releases every device resource this renderer and its primitives
    /// hold, nested sub-worlds included.
    pub fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        self.flush_retired(device);
        let roots: Vec<PrimitiveId> = self.world.roots().to_vec();
        for root in roots {
            for (_, mut primitive) in self.world.remove(root) {
                primitive.destroy(device);
            }
        }
        for mut primitive in self.immediate.drain(..) {
            primitive.destroy(device);
        }
        self.physics.clear();
        self.grabbed = None;
        self.initialised = false;
    }
}
