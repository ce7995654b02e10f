use super::*;

use crate::device::{PickHit, PickRegion};

impl Renderer {
    /// Renders the scene in picking mode and returns the primitive nearest
    /// the camera within a `size`-texel box around `(x, y)`, if any.
    pub fn select(
        &mut self,
        device: &mut dyn GraphicsDevice,
        x: u32,
        y: u32,
        size: u32,
    ) -> Option<PrimitiveId> {
        device.begin_pick(PickRegion { x, y, size });
        self.render_pass(device, true);

        let mut hits: Vec<PickHit> = Vec::new();
        device.take_pick_hits(&mut hits);
        // equal depths resolve to the oldest primitive
        hits.into_iter()
            .min_by(|a, b| a.depth.total_cmp(&b.depth).then(a.id.cmp(&b.id)))
            .map(|hit| hit.id)
    }
}
