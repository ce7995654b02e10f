//! The graphics-device collaborator boundary.
//!
//! The render core never talks to a concrete graphics API; everything it
//! needs from the device is expressed by [`GraphicsDevice`]. Two backends
//! ship with the crate: a wgpu backend ([`WgpuDevice`]) and a CPU reference
//! backend ([`SoftwareDevice`]) used for headless rendering and tests.

use glam::{Mat4, Vec3};

use crate::color::Color;
use crate::id::PrimitiveId;
use crate::state::SamplerParams;

pub mod software;
pub mod wgpu_backend;

pub use software::SoftwareDevice;
pub use wgpu_backend::WgpuDevice;

/// Handle to a device-owned 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Handle to a device-owned render target (colour attachment plus optional
/// depth buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetHandle(pub u64);

/// Stereo rendering configuration. Part of the frame-setup key: changing it
/// forces renderer re-initialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StereoMode {
    #[default]
    None,
    CrystalEyes,
    ColourAnaglyph,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fog {
    pub colour: Color,
    pub density: f32,
    pub start: f32,
    pub end: f32,
}

/// One-time device setup for a frame configuration, applied by the
/// renderer's `PreRender` step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSetup {
    pub width: u32,
    pub height: u32,
    pub backface_cull: bool,
    pub clockwise_faces: bool,
    pub fog: Option<Fog>,
    pub stereo: StereoMode,
}

/// Light data handed to the device when the renderer configures a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightInfo {
    pub position: Vec3,
    pub diffuse: Color,
    pub ambient: Color,
}

/// A textured or flat-coloured quad draw: four world-space corners with
/// per-vertex texture coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadDraw {
    pub points: [Vec3; 4],
    pub uvs: [[f32; 2]; 4],
    pub colour: Color,
    pub texture: Option<TextureHandle>,
    pub sampler: SamplerParams,
    /// When false, texture modulation replaces lighting for this draw.
    pub lit: bool,
    pub depth_test: bool,
    /// Draw the outline only, in `colour`.
    pub wire: bool,
    /// Identifies the primitive during a picking pass.
    pub pick: Option<PrimitiveId>,
}

/// Screen-space region queried by a picking pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickRegion {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

/// A primitive that covered part of the pick region, with the nearest depth
/// at which it did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickHit {
    pub id: PrimitiveId,
    pub depth: f32,
}

/// Contract consumed by the render core.
///
/// Render-target binds nest; the device saves its attribute state (camera,
/// lights, viewport) at bind and restores it at unbind. Frame begin/end also
/// nest, so a nested renderer can run a full frame inside its parent's.
pub trait GraphicsDevice {
    /// Whether off-screen render targets are available. When false, the
    /// render-target primitive falls back to a plain texture.
    fn supports_render_targets(&self) -> bool;

    fn create_texture(&mut self, width: u32, height: u32, sampler: SamplerParams) -> TextureHandle;
    fn destroy_texture(&mut self, texture: TextureHandle);
    /// Uploads RGBA8 pixel data into a sub-region of a texture.
    fn upload_region(
        &mut self,
        texture: TextureHandle,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        rgba8: &[u8],
    );
    fn set_sampler(&mut self, texture: TextureHandle, sampler: SamplerParams);
    fn generate_mipmaps(&mut self, texture: TextureHandle);

    fn create_render_target(
        &mut self,
        colour: TextureHandle,
        with_depth: bool,
    ) -> RenderTargetHandle;
    fn destroy_render_target(&mut self, target: RenderTargetHandle);
    fn bind_render_target(&mut self, target: RenderTargetHandle);
    fn unbind_render_target(&mut self);
    /// Reads back an RGBA8 pixel region from the currently bound target.
    fn read_pixels(&mut self, x: u32, y: u32, width: u32, height: u32, out: &mut Vec<u8>);

    fn begin_frame(&mut self, setup: &FrameSetup);
    fn clear(&mut self, colour: Color, frame: bool, depth: bool);
    fn set_camera(&mut self, view_proj: Mat4, eye: Vec3);
    fn set_lights(&mut self, lights: &[LightInfo]);
    fn draw_quad(&mut self, quad: &QuadDraw);
    fn end_frame(&mut self);

    fn begin_pick(&mut self, region: PickRegion);
    fn take_pick_hits(&mut self, out: &mut Vec<PickHit>);
}

/// Runs `body` with `target` bound, guaranteeing the matching unbind on every
/// exit path. The core never calls `bind_render_target` directly.
pub fn with_bound_target<R>(
    device: &mut dyn GraphicsDevice,
    target: RenderTargetHandle,
    body: impl FnOnce(&mut dyn GraphicsDevice) -> R,
) -> R {
    device.bind_render_target(target);
    let out = body(device);
    device.unbind_render_target();
    out
}

impl QuadDraw {
    /// A flat unit quad in the XY plane; the usual starting point for
    /// textured-surface draws.
    pub fn unit(colour: Color) -> Self {
        Self {
            points: [
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            uvs: [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            colour,
            texture: None,
            sampler: SamplerParams::default(),
            lit: true,
            depth_test: true,
            wire: false,
            pick: None,
        }
    }
}
