use glam::{Mat4, Vec3};
use std::path::Path;

use crate::bounds::BoundingBox;
use crate::color::{colors_to_rgba8, Color};
use crate::device::{with_bound_target, GraphicsDevice, QuadDraw, RenderTargetHandle, TextureHandle};
use crate::pdata::{Channel, PData};
use crate::primitive::DrawContext;
use crate::renderer::Renderer;
use crate::state::{Hints, State};
use crate::texture_io::{TextureIoError, TexturePainter};

/// Smallest power of two that can hold `size` texels.
fn padded_dimension(size: u32) -> u32 {
    size.max(1).next_power_of_two()
}

/// A GPU surface owned by one [`PixelPrimitive`]: a power-of-two colour
/// texture attached to a render target, plus an optional depth buffer.
///
/// All teardown paths go through [`RenderTarget::release`]; the struct is
/// consumed so a released target cannot be used again.
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    texture: TextureHandle,
    target: RenderTargetHandle,
    width: u32,
    height: u32,
    padded_width: u32,
    padded_height: u32,
}

impl RenderTarget {
    fn create(device: &mut dyn GraphicsDevice, width: u32, height: u32, state: &State) -> Self {
        let padded_width = padded_dimension(width);
        let padded_height = padded_dimension(height);
        let texture = device.create_texture(padded_width, padded_height, state.sampler);
        let with_depth = !state.hints.contains(Hints::IGNORE_DEPTH);
        let target = device.create_render_target(texture, with_depth);
        Self {
            texture,
            target,
            width,
            height,
            padded_width,
            padded_height,
        }
    }

    fn release(self, device: &mut dyn GraphicsDevice) {
        device.destroy_render_target(self.target);
        device.destroy_texture(self.texture);
    }

    pub fn padded_size(&self) -> (u32, u32) {
        (self.padded_width, self.padded_height)
    }

    /// Texture-coordinate extent of the region actually holding content.
    pub fn used_fractions(&self) -> (f32, f32) {
        (
            self.width as f32 / self.padded_width as f32,
            self.height as f32 / self.padded_height as f32,
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum Surface {
    /// Render-target backed; nested rendering lands in the texture.
    Target(RenderTarget),
    /// Plain-texture fallback for devices without render-target support;
    /// nested rendering is disabled for the primitive's lifetime.
    Fallback(TextureHandle),
    /// No device resources yet (fresh clone, or awaiting re-creation).
    Unallocated,
}

/// The off-screen render-target primitive.
///
/// Owns a self-contained sub-world, a private [`Renderer`] with its own
/// scene graph and physics instance, and renders it into an
/// off-screen surface presented as a textured quad. Pixel data moves between
/// the `"c"` attribute channel and the GPU via the deferred upload/download
/// flags, which resolve inside the next render where a live context is
/// guaranteed: uploads before that frame's draw, downloads after it.
pub struct PixelPrimitive {
    pub state: State,
    pub pdata: PData,
    points: [Vec3; 4],
    width: u32,
    height: u32,
    renderer_active: bool,
    ready_for_upload: bool,
    ready_for_download: bool,
    surface: Surface,
    renderer: Box<Renderer>,
}

impl PixelPrimitive {
    /// Builds a `width` × `height` pixel surface seeded opaque white, with
    /// `renderer_active` controlling whether the nested scene graph renders
    /// each frame.
    pub fn new(
        device: &mut dyn GraphicsDevice,
        width: u32,
        height: u32,
        renderer_active: bool,
    ) -> Self {
        let mut primitive = Self::unallocated(width, height, renderer_active);
        primitive.allocate_surface(device);
        primitive
    }

    fn unallocated(width: u32, height: u32, renderer_active: bool) -> Self {
        let mut pdata = PData::new();
        pdata.add(
            "c",
            Channel::Colour(vec![Color::WHITE; (width * height) as usize]),
        );

        let mut renderer = Box::new(Renderer::new());
        renderer.set_resolution(width, height);

        Self {
            state: State::default(),
            pdata,
            points: [
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            width,
            height,
            renderer_active,
            ready_for_upload: false,
            ready_for_download: false,
            surface: Surface::Unallocated,
            renderer,
        }
    }

    fn allocate_surface(&mut self, device: &mut dyn GraphicsDevice) {
        if device.supports_render_targets() {
            self.surface = Surface::Target(RenderTarget::create(
                device,
                self.width,
                self.height,
                &self.state,
            ));
        } else {
            log::warn!(
                "render targets unsupported; pixel primitive {}x{} falls back to a plain texture",
                self.width,
                self.height
            );
            let texture = device.create_texture(self.width, self.height, self.state.sampler);
            self.surface = Surface::Fallback(texture);
        }
        // seed the texture from the attribute store, as a resize would
        self.upload_pdata(device);
    }

    fn release_surface(&mut self, device: &mut dyn GraphicsDevice) {
        match std::mem::replace(&mut self.surface, Surface::Unallocated) {
            Surface::Target(target) => target.release(device),
            Surface::Fallback(texture) => device.destroy_texture(texture),
            Surface::Unallocated => {}
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Padded texture dimensions, when a render target is allocated.
    pub fn padded_size(&self) -> Option<(u32, u32)> {
        match self.surface {
            Surface::Target(target) => Some(target.padded_size()),
            _ => None,
        }
    }

    /// UV extents of the content region: `(w/padded_w, h/padded_h)` when
    /// render-target backed, `(1, 1)` otherwise.
    pub fn used_fractions(&self) -> (f32, f32) {
        match self.surface {
            Surface::Target(target) => target.used_fractions(),
            _ => (1.0, 1.0),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.surface, Surface::Fallback(_))
    }

    pub fn renderer_active(&self) -> bool {
        self.renderer_active
    }

    pub fn set_renderer_active(&mut self, active: bool) {
        self.renderer_active = active;
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        match self.surface {
            Surface::Target(target) => Some(target.texture),
            Surface::Fallback(texture) => Some(texture),
            Surface::Unallocated => None,
        }
    }

    /// The nested renderer driving this primitive's own scene graph.
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    /// The physics instance scoped to the nested world.
    pub fn physics_mut(&mut self) -> &mut crate::physics::Physics {
        self.renderer.physics_mut()
    }

    /// Requests that the `"c"` channel be pushed to the texture during the
    /// next render, before that frame's draw.
    pub fn upload(&mut self) {
        self.ready_for_upload = true;
    }

    /// Requests that the rendered pixels be read back into the `"c"` channel
    /// during the next render, after that frame's draw.
    pub fn download(&mut self) {
        self.ready_for_download = true;
    }

    pub(crate) fn render(&mut self, ctx: &mut DrawContext<'_>) {
        if matches!(self.surface, Surface::Unallocated) {
            self.allocate_surface(ctx.device);
        }

        // uploading needs a live context, hence the deferral to here
        if self.ready_for_upload {
            self.upload_pdata(ctx.device);
            self.ready_for_upload = false;
        }

        if let Surface::Target(target) = self.surface {
            if self.renderer_active {
                let renderer = &mut self.renderer;
                with_bound_target(ctx.device, target.target, |device| {
                    renderer.reinitialise();
                    renderer.render(device);
                });
                ctx.device.generate_mipmaps(target.texture);
            }
        }

        let hints = ctx.state.hints;
        let points = [
            ctx.state.transform.transform_point3(self.points[0]),
            ctx.state.transform.transform_point3(self.points[1]),
            ctx.state.transform.transform_point3(self.points[2]),
            ctx.state.transform.transform_point3(self.points[3]),
        ];
        let depth_test = !hints.contains(Hints::IGNORE_DEPTH);

        if hints.contains(Hints::WIRE) {
            ctx.device.draw_quad(&QuadDraw {
                points,
                uvs: [[0.0, 0.0]; 4],
                colour: ctx.state.wire_colour,
                texture: None,
                sampler: ctx.state.sampler,
                lit: false,
                depth_test,
                wire: true,
                pick: ctx.pick,
            });
        }

        let (max_s, max_t) = self.used_fractions();
        // texture modulation replaces lighting for this draw
        ctx.device.draw_quad(&QuadDraw {
            points,
            uvs: [
                [0.0, 0.0],
                [max_s, 0.0],
                [max_s, max_t],
                [0.0, max_t],
            ],
            colour: Color::rgba(1.0, 1.0, 1.0, ctx.state.opacity),
            texture: self.texture(),
            sampler: ctx.state.sampler,
            lit: false,
            depth_test,
            wire: false,
            pick: ctx.pick,
        });

        // downloading after the draw means the frame just rendered, nested
        // sub-scene included, is what gets read back
        if self.ready_for_download {
            self.download_pdata(ctx.device);
            self.ready_for_download = false;
        }
    }

    fn upload_pdata(&mut self, device: &mut dyn GraphicsDevice) {
        let pixel_count = (self.width * self.height) as usize;
        let Some(colours) = self.pdata.colours("c") else {
            return; // channel removed or retyped by calling code
        };
        if colours.len() < pixel_count {
            return;
        }
        let bytes = colors_to_rgba8(&colours[..pixel_count]);
        match self.surface {
            Surface::Target(target) => {
                device.upload_region(target.texture, 0, 0, self.width, self.height, &bytes);
            }
            Surface::Fallback(texture) => {
                device.upload_region(texture, 0, 0, self.width, self.height, &bytes);
            }
            Surface::Unallocated => {}
        }
    }

    fn download_pdata(&mut self, device: &mut dyn GraphicsDevice) {
        let Surface::Target(target) = self.surface else {
            return; // nothing rendered off-screen to read back
        };
        let width = self.width;
        let height = self.height;

        let mut bytes = Vec::new();
        with_bound_target(device, target.target, |device| {
            device.read_pixels(0, 0, width, height, &mut bytes);
        });

        let pixel_count = (width * height) as usize;
        if bytes.len() < pixel_count * 4 {
            return;
        }
        let Some(colours) = self.pdata.colours_mut("c") else {
            return;
        };
        if colours.len() < pixel_count {
            return;
        }
        for (colour, sample) in colours[..pixel_count].iter_mut().zip(bytes.chunks_exact(4)) {
            *colour = Color::from_rgba8([sample[0], sample[1], sample[2], sample[3]]);
        }
    }

    /// Destroys and recreates the surface at a new size, adjusts the colour
    /// channel to match, and propagates the resolution to the nested
    /// renderer.
    pub fn resize(&mut self, device: &mut dyn GraphicsDevice, width: u32, height: u32) {
        // grow the channel first so the recreated surface seeds from it
        let pixel_count = (width * height) as usize;
        if let Some(colours) = self.pdata.colours_mut("c") {
            colours.resize(pixel_count, Color::WHITE);
        }
        self.set_size(device, width, height);
    }

    fn set_size(&mut self, device: &mut dyn GraphicsDevice, width: u32, height: u32) {
        self.release_surface(device);
        self.width = width;
        self.height = height;
        self.renderer.set_resolution(width, height);
        self.allocate_surface(device);
    }

    /// Loads an image into the colour channel; a size change rebuilds the
    /// render target. A missing or retyped colour channel makes this a
    /// no-op.
    pub fn load(
        &mut self,
        device: &mut dyn GraphicsDevice,
        painter: &dyn TexturePainter,
        path: &Path,
    ) -> Result<(), TextureIoError> {
        if self.pdata.colours("c").is_none() {
            return Ok(());
        }
        let (width, height) = painter.load_into(path, &mut self.pdata)?;
        if (width, height) != (self.width, self.height) {
            self.set_size(device, width, height);
        }
        self.ready_for_upload = true;
        Ok(())
    }

    /// Saves the colour channel. A missing or retyped colour channel makes
    /// this a no-op.
    pub fn save(
        &self,
        painter: &dyn TexturePainter,
        path: &Path,
    ) -> Result<(), TextureIoError> {
        if self.pdata.colours("c").is_none() {
            return Ok(());
        }
        painter.save_from(path, self.width, self.height, &self.pdata)
    }

    pub fn bounding_box(&self, space: Mat4) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        for point in &self.points {
            bounds.expand_transformed(space, *point);
        }
        bounds
    }

    pub fn apply_transform(&mut self, scale_rot_only: bool) {
        for point in self.points.iter_mut() {
            *point = if scale_rot_only {
                self.state.transform.transform_vector3(*point)
            } else {
                self.state.transform.transform_point3(*point)
            };
        }
        self.state.transform = Mat4::IDENTITY;
    }

    pub(crate) fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        self.release_surface(device);
        // sub-world teardown is ordinary: nested primitives release their
        // own targets the same way
        self.renderer.destroy(device);
    }
}

impl Clone for PixelPrimitive {
    /// Clones configuration and pixel data but never the sub-world: the
    /// clone gets a fresh nested renderer, scene graph and physics, and its
    /// surface is allocated at its first render.
    fn clone(&self) -> Self {
        let mut clone = Self::unallocated(self.width, self.height, self.renderer_active);
        clone.state = self.state;
        clone.pdata = self.pdata.clone();
        clone.points = self.points;
        clone.ready_for_upload = self.ready_for_upload;
        clone.ready_for_download = self.ready_for_download;
        clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_dimension_is_the_next_power_of_two() {
        assert_eq!(padded_dimension(1), 1);
        assert_eq!(padded_dimension(2), 2);
        assert_eq!(padded_dimension(3), 4);
        assert_eq!(padded_dimension(64), 64);
        assert_eq!(padded_dimension(65), 128);
        assert_eq!(padded_dimension(100), 128);
        assert_eq!(padded_dimension(0), 1);
    }
}
