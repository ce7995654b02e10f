use glam::{Mat4, Vec3};

use crate::bounds::BoundingBox;
use crate::device::GraphicsDevice;
use crate::id::PrimitiveId;
use crate::pdata::PData;
use crate::pixel::PixelPrimitive;
use crate::ribbon::RibbonPrimitive;
use crate::state::State;

/// Everything a primitive needs to draw itself for one frame.
pub struct DrawContext<'a> {
    pub device: &'a mut dyn GraphicsDevice,
    /// This primitive's state with ancestor state already composed in.
    pub state: State,
    /// Camera position in world space, for camera-facing geometry.
    pub eye: Vec3,
    /// Set during a picking pass: the ID draws should carry.
    pub pick: Option<PrimitiveId>,
}

/// A scene-graph primitive.
///
/// Primitives form a closed set of variants so traversal, cloning and
/// teardown stay exhaustive: adding a variant is a compile error everywhere
/// it has not been handled.
#[derive(Clone)]
pub enum Primitive {
    /// The render-target primitive: a textured quad backed by an off-screen
    /// surface with its own nested renderer and scene graph.
    Pixel(PixelPrimitive),
    /// Camera-facing line/ribbon geometry.
    Ribbon(RibbonPrimitive),
}

impl Primitive {
    pub fn type_name(&self) -> &'static str {
        match self {
            Primitive::Pixel(_) => "PixelPrimitive",
            Primitive::Ribbon(_) => "RibbonPrimitive",
        }
    }

    pub fn state(&self) -> &State {
        match self {
            Primitive::Pixel(p) => &p.state,
            Primitive::Ribbon(p) => &p.state,
        }
    }

    pub fn state_mut(&mut self) -> &mut State {
        match self {
            Primitive::Pixel(p) => &mut p.state,
            Primitive::Ribbon(p) => &mut p.state,
        }
    }

    pub fn pdata(&self) -> &PData {
        match self {
            Primitive::Pixel(p) => &p.pdata,
            Primitive::Ribbon(p) => &p.pdata,
        }
    }

    pub fn pdata_mut(&mut self) -> &mut PData {
        match self {
            Primitive::Pixel(p) => &mut p.pdata,
            Primitive::Ribbon(p) => &mut p.pdata,
        }
    }

    /// Bounding box of this primitive's own geometry under `space`.
    pub fn bounding_box(&self, space: Mat4) -> BoundingBox {
        match self {
            Primitive::Pixel(p) => p.bounding_box(space),
            Primitive::Ribbon(p) => p.bounding_box(space),
        }
    }

    /// Bakes the primitive's current transform into its geometry and resets
    /// the transform to identity. With `scale_rot_only` the translation part
    /// is left out of the bake.
    pub fn apply_transform(&mut self, scale_rot_only: bool) {
        match self {
            Primitive::Pixel(p) => p.apply_transform(scale_rot_only),
            Primitive::Ribbon(p) => p.apply_transform(scale_rot_only),
        }
    }

    pub(crate) fn render(&mut self, ctx: &mut DrawContext<'_>) {
        match self {
            Primitive::Pixel(p) => p.render(ctx),
            Primitive::Ribbon(p) => p.render(ctx),
        }
    }

    /// Releases any device resources the primitive holds. Must be called
    /// with a live device before the primitive is dropped for good.
    pub(crate) fn destroy(&mut self, device: &mut dyn GraphicsDevice) {
        match self {
            Primitive::Pixel(p) => p.destroy(device),
            Primitive::Ribbon(_) => {}
        }
    }

    pub fn as_pixel(&self) -> Option<&PixelPrimitive> {
        match self {
            Primitive::Pixel(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_pixel_mut(&mut self) -> Option<&mut PixelPrimitive> {
        match self {
            Primitive::Pixel(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_ribbon_mut(&mut self) -> Option<&mut RibbonPrimitive> {
        match self {
            Primitive::Ribbon(p) => Some(p),
            _ => None,
        }
    }
}

impl From<PixelPrimitive> for Primitive {
    fn from(p: PixelPrimitive) -> Self {
        Primitive::Pixel(p)
    }
}

impl From<RibbonPrimitive> for Primitive {
    fn from(p: RibbonPrimitive) -> Self {
        Primitive::Ribbon(p)
    }
}
