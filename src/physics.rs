use ahash::{HashSet, HashSetExt};

use crate::id::PrimitiveId;

/// Thin physics collaborator.
///
/// The simulation itself lives elsewhere; what matters to the render core is
/// the body registry: every primitive with a simulation body must be
/// deregistered when it leaves the scene graph, or the body leaks. A nested
/// sub-world owns its own private instance.
#[derive(Debug, Default)]
pub struct Physics {
    bodies: HashSet<PrimitiveId>,
}

impl Physics {
    pub fn new() -> Self {
        Self {
            bodies: HashSet::new(),
        }
    }

    /// Registers a simulation body for a primitive.
    pub fn register_body(&mut self, id: PrimitiveId) {
        self.bodies.insert(id);
    }

    pub fn has_body(&self, id: PrimitiveId) -> bool {
        self.bodies.contains(&id)
    }

    /// Drops any simulation representation of a primitive. Called on every
    /// primitive removal, whether or not a body exists.
    pub fn remove_body(&mut self, id: PrimitiveId) {
        if self.bodies.remove(&id) {
            log::debug!("physics: dropped body for primitive {id}");
        }
    }

    pub fn clear(&mut self) {
        self.bodies.clear();
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }
}
