use glam::Vec3;

use crate::color::Color;
use crate::device::LightInfo;

/// Light data container. The renderer forwards these to the device when a
/// frame is configured; shading itself is a backend concern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub diffuse: Color,
    pub ambient: Color,
}

impl Light {
    pub fn point(position: Vec3, diffuse: Color) -> Self {
        Self {
            position,
            diffuse,
            ambient: Color::rgba(0.1, 0.1, 0.1, 1.0),
        }
    }

    pub(crate) fn info(&self) -> LightInfo {
        LightInfo {
            position: self.position,
            diffuse: self.diffuse,
            ambient: self.ambient,
        }
    }
}

impl Default for Light {
    fn default() -> Self {
        Self::point(Vec3::new(0.0, 10.0, 0.0), Color::WHITE)
    }
}
