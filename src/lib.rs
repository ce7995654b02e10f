pub use wgpu;

mod bounds;
mod camera;
mod color;
pub mod device;
mod id;
mod light;
mod pdata;
mod physics;
mod pixel;
mod primitive;
mod renderer;
mod ribbon;
mod scene_graph;
mod state;
mod texture_io;

pub use bounds::BoundingBox;
pub use camera::{Camera, Projection};
pub use color::Color;
pub use device::{Fog, GraphicsDevice, SoftwareDevice, StereoMode, WgpuDevice};
pub use id::{LightId, PrimitiveId};
pub use light::Light;
pub use pdata::{Channel, PData};
pub use physics::Physics;
pub use pixel::PixelPrimitive;
pub use primitive::Primitive;
pub use renderer::Renderer;
pub use ribbon::RibbonPrimitive;
pub use scene_graph::SceneGraph;
pub use state::{FilterMode, Hints, SamplerParams, State, StateStack, WrapMode};
pub use texture_io::{ImagePainter, TextureIoError, TexturePainter};
