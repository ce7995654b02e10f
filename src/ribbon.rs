use glam::{Mat4, Vec3};

use crate::bounds::BoundingBox;
use crate::color::Color;
use crate::device::QuadDraw;
use crate::pdata::{Channel, PData};
use crate::primitive::DrawContext;
use crate::state::{Hints, State};

/// Width used for vertices without a `"w"` entry.
const DEFAULT_WIDTH: f32 = 0.1;

/// One stretch of ribbon between two consecutive line vertices, derived from
/// the attribute store and cached in local space.
#[derive(Debug, Clone, Copy)]
struct Segment {
    start: Vec3,
    end: Vec3,
    width_start: f32,
    width_end: f32,
    colour: Color,
    /// Texture coordinates along the ribbon's length.
    u_start: f32,
    u_end: f32,
}

/// Line/ribbon geometry built from per-vertex positions (`"p"`), widths
/// (`"w"`) and colours (`"c"`); the emitted quads always face the camera.
///
/// The segment cache is derived data: it is rebuilt whenever the attribute
/// store's epoch has moved, so edits through [`PData`] are picked up without
/// any pointer caching.
#[derive(Clone)]
pub struct RibbonPrimitive {
    pub state: State,
    pub pdata: PData,
    segments: Vec<Segment>,
    built_epoch: Option<u64>,
}

impl RibbonPrimitive {
    pub fn new() -> Self {
        let mut pdata = PData::new();
        pdata.add("p", Channel::Vector(Vec::new()));
        pdata.add("w", Channel::Float(Vec::new()));
        pdata.add("c", Channel::Colour(Vec::new()));
        Self {
            state: State::default(),
            pdata,
            segments: Vec::new(),
            built_epoch: None,
        }
    }

    /// Convenience constructor from explicit vertices.
    pub fn from_points(points: Vec<Vec3>, width: f32) -> Self {
        let count = points.len();
        let mut ribbon = Self::new();
        ribbon.pdata.add("p", Channel::Vector(points));
        ribbon.pdata.add("w", Channel::Float(vec![width; count]));
        ribbon
            .pdata
            .add("c", Channel::Colour(vec![Color::WHITE; count]));
        ribbon
    }

    pub(crate) fn render(&mut self, ctx: &mut DrawContext<'_>) {
        self.rebuild_if_dirty();
        if self.segments.is_empty() {
            return;
        }

        let transform = ctx.state.transform;
        let hints = ctx.state.hints;

        for segment in &self.segments {
            let start = transform.transform_point3(segment.start);
            let end = transform.transform_point3(segment.end);
            let direction = end - start;
            let to_eye = ctx.eye - (start + end) * 0.5;
            let side = direction.cross(to_eye);
            let side = if side.length_squared() > f32::EPSILON {
                side.normalize()
            } else {
                continue; // segment is edge-on or degenerate
            };

            let half_start = side * (segment.width_start * 0.5);
            let half_end = side * (segment.width_end * 0.5);

            let mut colour = segment.colour;
            colour.a *= ctx.state.opacity;
            let mut quad = QuadDraw {
                points: [
                    start - half_start,
                    end - half_end,
                    end + half_end,
                    start + half_start,
                ],
                uvs: [
                    [segment.u_start, 0.0],
                    [segment.u_end, 0.0],
                    [segment.u_end, 1.0],
                    [segment.u_start, 1.0],
                ],
                colour,
                texture: None,
                sampler: ctx.state.sampler,
                lit: !hints.contains(Hints::UNLIT),
                depth_test: !hints.contains(Hints::IGNORE_DEPTH),
                wire: false,
                pick: ctx.pick,
            };

            if hints.contains(Hints::SOLID) {
                ctx.device.draw_quad(&quad);
            }
            if hints.contains(Hints::WIRE) {
                quad.colour = ctx.state.wire_colour;
                quad.wire = true;
                quad.lit = false;
                ctx.device.draw_quad(&quad);
            }
        }
    }

    pub fn bounding_box(&self, space: Mat4) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        if let Some(points) = self.pdata.vectors("p") {
            for point in points {
                bounds.expand_transformed(space, *point);
            }
        }
        bounds
    }

    pub fn apply_transform(&mut self, scale_rot_only: bool) {
        let transform = self.state.transform;
        if let Some(points) = self.pdata.vectors_mut("p") {
            for point in points.iter_mut() {
                *point = if scale_rot_only {
                    transform.transform_vector3(*point)
                } else {
                    transform.transform_point3(*point)
                };
            }
        }
        self.state.transform = Mat4::IDENTITY;
    }

    fn rebuild_if_dirty(&mut self) {
        if self.built_epoch == Some(self.pdata.epoch()) {
            return;
        }

        self.segments.clear();
        if let Some(points) = self.pdata.vectors("p") {
            let widths = self.pdata.floats("w");
            let colours = self.pdata.colours("c");
            let total = (points.len().saturating_sub(1)).max(1) as f32;

            for (index, pair) in points.windows(2).enumerate() {
                let width_at = |i: usize| {
                    widths
                        .and_then(|w| w.get(i).copied())
                        .unwrap_or(DEFAULT_WIDTH)
                };
                let colour = colours
                    .and_then(|c| c.get(index).copied())
                    .unwrap_or(Color::WHITE);
                self.segments.push(Segment {
                    start: pair[0],
                    end: pair[1],
                    width_start: width_at(index),
                    width_end: width_at(index + 1),
                    colour,
                    u_start: index as f32 / total,
                    u_end: (index + 1) as f32 / total,
                });
            }
        }
        self.built_epoch = Some(self.pdata.epoch());
    }

    #[cfg(test)]
    fn segment_count(&mut self) -> usize {
        self.rebuild_if_dirty();
        self.segments.len()
    }
}

impl Default for RibbonPrimitive {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_follow_the_point_channel() {
        let mut ribbon =
            RibbonPrimitive::from_points(vec![Vec3::ZERO, Vec3::X, Vec3::X + Vec3::Y], 0.2);
        assert_eq!(ribbon.segment_count(), 2);
    }

    #[test]
    fn geometry_rebuilds_when_the_epoch_moves() {
        let mut ribbon = RibbonPrimitive::from_points(vec![Vec3::ZERO, Vec3::X], 0.2);
        assert_eq!(ribbon.segment_count(), 1);

        ribbon.pdata.vectors_mut("p").unwrap().push(Vec3::Y);
        assert_eq!(ribbon.segment_count(), 2);
    }

    #[test]
    fn geometry_survives_a_retyped_width_channel() {
        let mut ribbon = RibbonPrimitive::from_points(vec![Vec3::ZERO, Vec3::X], 0.2);
        // retype "w"; widths fall back to the default instead of erroring
        ribbon.pdata.add("w", Channel::Vector(vec![Vec3::ZERO]));
        assert_eq!(ribbon.segment_count(), 1);
    }

    #[test]
    fn apply_transform_bakes_points_and_resets() {
        let mut ribbon = RibbonPrimitive::from_points(vec![Vec3::ZERO, Vec3::X], 0.2);
        ribbon.state.transform = Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0));
        ribbon.apply_transform(false);

        assert_eq!(ribbon.state.transform, Mat4::IDENTITY);
        let points = ribbon.pdata.vectors("p").unwrap();
        assert_eq!(points[0], Vec3::new(0.0, 5.0, 0.0));
    }

    #[test]
    fn scale_rot_only_bake_keeps_positions_unscaled_by_translation() {
        let mut ribbon = RibbonPrimitive::from_points(vec![Vec3::X], 0.2);
        ribbon.state.transform =
            Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0));
        ribbon.apply_transform(true);

        let points = ribbon.pdata.vectors("p").unwrap();
        assert_eq!(points[0], Vec3::new(2.0, 0.0, 0.0));
    }
}
