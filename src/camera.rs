use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective { fov_y: f32 },
    /// Orthographic over `left..right` × `bottom..top`.
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
    },
}

/// Camera data container. The renderer only ever asks it for matrices; how
/// the transform gets animated is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// World-to-view transform.
    pub view: Mat4,
    pub projection: Projection,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32) -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Projection::Orthographic {
                left,
                right,
                bottom,
                top,
            },
            near: -10.0,
            far: 10.0,
        }
    }

    pub fn projection_matrix(&self, width: u32, height: u32) -> Mat4 {
        match self.projection {
            Projection::Perspective { fov_y } => {
                let aspect = width.max(1) as f32 / height.max(1) as f32;
                Mat4::perspective_rh(fov_y, aspect, self.near, self.far)
            }
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
            } => Mat4::orthographic_rh(left, right, bottom, top, self.near, self.far),
        }
    }

    pub fn view_projection(&self, width: u32, height: u32) -> Mat4 {
        self.projection_matrix(width, height) * self.view
    }

    /// The camera position in world space.
    pub fn eye(&self) -> Vec3 {
        self.view.inverse().transform_point3(Vec3::ZERO)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            view: Mat4::from_translation(Vec3::new(0.0, 0.0, -10.0)),
            projection: Projection::Perspective {
                fov_y: std::f32::consts::FRAC_PI_4,
            },
            near: 0.1,
            far: 1000.0,
        }
    }
}
