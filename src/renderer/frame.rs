use super::*;

use glam::Vec3;

use crate::device::FrameSetup;
use crate::primitive::DrawContext;

impl Renderer {
    /// Renders one frame: retired resources are released, the scene graph
    /// is traversed depth-first with states composing down the tree, and
    /// any immediate-mode primitives draw last.
    pub fn render(&mut self, device: &mut dyn GraphicsDevice) {
        self.render_pass(device, false);
    }

    pub(super) fn render_pass(&mut self, device: &mut dyn GraphicsDevice, picking: bool) {
        self.flush_retired(device);

        if !self.initialised {
            device.begin_frame(&self.frame_setup());
            self.initialised = true;
        }
        device.clear(self.clear_colour, self.clear_frame, self.clear_depth);

        let (width, height) = self.resolution;
        let eye = self.camera.eye();
        device.set_camera(self.camera.view_projection(width, height), eye);
        device.set_lights(&self.light_infos());

        let depth_before = self.stack.depth();
        let roots: Vec<PrimitiveId> = self.world.roots().to_vec();
        for root in roots {
            Self::render_node(&mut self.world, &mut self.stack, device, eye, picking, root);
        }
        debug_assert_eq!(self.stack.depth(), depth_before);

        // one-shot primitives carry a self-contained state snapshot, drawn
        // here and released straight after
        let mut queued = std::mem::take(&mut self.immediate);
        for primitive in queued.iter_mut() {
            let state = *primitive.state();
            let mut ctx = DrawContext {
                device: &mut *device,
                state,
                eye,
                pick: None,
            };
            primitive.render(&mut ctx);
            primitive.destroy(device);
        }

        device.end_frame();
        self.update_fps();
    }

    fn render_node(
        world: &mut SceneGraph,
        stack: &mut StateStack,
        device: &mut dyn GraphicsDevice,
        eye: Vec3,
        picking: bool,
        id: PrimitiveId,
    ) {
        stack.push();
        if let Some(primitive) = world.get_mut(id) {
            let state = State::inherited(stack.current(), primitive.state());
            *stack.current_mut() = state;
            let mut ctx = DrawContext {
                device: &mut *device,
                state,
                eye,
                pick: picking.then_some(id),
            };
            primitive.render(&mut ctx);
        }
        let children: Vec<PrimitiveId> = world.children(id).to_vec();
        for child in children {
            Self::render_node(world, stack, device, eye, picking, child);
        }
        stack.pop();
    }

    fn frame_setup(&self) -> FrameSetup {
        FrameSetup {
            width: self.resolution.0,
            height: self.resolution.1,
            backface_cull: self.backface_cull,
            clockwise_faces: self.clockwise_faces,
            fog: self.fog,
            stereo: self.stereo,
        }
    }

    fn update_fps(&mut self) {
        let now = Instant::now();
        self.delta = now.duration_since(self.last_frame).as_secs_f32();
        if let Some(cap) = self.desired_fps {
            let budget = Duration::from_secs_f32(1.0 / cap);
            if let Some(remaining) = budget.checked_sub(now.duration_since(self.last_frame)) {
                std::thread::sleep(remaining);
            }
        }
        self.last_frame = Instant::now();

        self.frame_count += 1;
        if self.frame_count >= 10 {
            let elapsed = self.last_fps_check.elapsed().as_secs_f32();
            if elapsed > 0.0 {
                self.fps = self.frame_count as f32 / elapsed;
            }
            log::trace!("{:.1} fps", self.fps);
            self.frame_count = 0;
            self.last_fps_check = Instant::now();
        }
    }
}
