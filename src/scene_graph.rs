use ahash::AHashMap;
use glam::Mat4;
use smallvec::SmallVec;

use crate::bounds::BoundingBox;
use crate::id::PrimitiveId;
use crate::primitive::Primitive;

struct SceneNode {
    parent: Option<PrimitiveId>,
    children: SmallVec<[PrimitiveId; 4]>,
    primitive: Primitive,
}

/// Parented hierarchy of primitives.
///
/// Children inherit state from their parents during traversal; removing a
/// node removes its whole subtree. Ids are handed out once and never reused,
/// so a stale id simply misses the map.
#[derive(Default)]
pub struct SceneGraph {
    nodes: AHashMap<PrimitiveId, SceneNode>,
    roots: Vec<PrimitiveId>,
    next_id: u32,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self {
            nodes: AHashMap::new(),
            roots: Vec::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Inserts a primitive under `parent`, or as a root when `parent` is
    /// `None` or no longer present.
    pub fn add(&mut self, primitive: Primitive, parent: Option<PrimitiveId>) -> PrimitiveId {
        let id = PrimitiveId(self.next_id);
        self.next_id += 1;

        let parent = parent.filter(|p| self.nodes.contains_key(p));
        match parent {
            Some(parent_id) => {
                self.nodes
                    .get_mut(&parent_id)
                    .unwrap()
                    .children
                    .push(id);
            }
            None => self.roots.push(id),
        }
        self.nodes.insert(
            id,
            SceneNode {
                parent,
                children: SmallVec::new(),
                primitive,
            },
        );
        id
    }

    pub fn contains(&self, id: PrimitiveId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: PrimitiveId) -> Option<&Primitive> {
        self.nodes.get(&id).map(|node| &node.primitive)
    }

    pub fn get_mut(&mut self, id: PrimitiveId) -> Option<&mut Primitive> {
        self.nodes.get_mut(&id).map(|node| &mut node.primitive)
    }

    pub fn parent(&self, id: PrimitiveId) -> Option<PrimitiveId> {
        self.nodes.get(&id).and_then(|node| node.parent)
    }

    pub fn roots(&self) -> &[PrimitiveId] {
        &self.roots
    }

    pub fn children(&self, id: PrimitiveId) -> &[PrimitiveId] {
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Moves `id` under `new_parent` (or to the roots). Reparenting under a
    /// missing node, itself, or its own descendant is refused.
    pub fn reparent(&mut self, id: PrimitiveId, new_parent: Option<PrimitiveId>) -> bool {
        if !self.nodes.contains_key(&id) {
            return false;
        }
        if let Some(parent_id) = new_parent {
            if !self.nodes.contains_key(&parent_id) || self.is_descendant(parent_id, id) {
                log::warn!("refusing to reparent {} under {}", id, parent_id);
                return false;
            }
        }

        self.unlink(id);
        match new_parent {
            Some(parent_id) => {
                self.nodes
                    .get_mut(&parent_id)
                    .unwrap()
                    .children
                    .push(id);
            }
            None => self.roots.push(id),
        }
        self.nodes.get_mut(&id).unwrap().parent = new_parent;
        true
    }

    /// True when `id` is `ancestor` or sits below it.
    fn is_descendant(&self, id: PrimitiveId, ancestor: PrimitiveId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Removes the leaving-edge of `id` from either its parent's child list
    /// or the root list.
    fn unlink(&mut self, id: PrimitiveId) {
        match self.parent(id) {
            Some(parent_id) => {
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.retain(|child| *child != id);
                }
            }
            None => self.roots.retain(|root| *root != id),
        }
    }

    /// Removes `id` and its whole subtree, returning the removed ids and
    /// primitives in depth-first order so the caller can release their
    /// device resources and tell physics.
    pub fn remove(&mut self, id: PrimitiveId) -> Vec<(PrimitiveId, Primitive)> {
        if !self.nodes.contains_key(&id) {
            return Vec::new();
        }
        self.unlink(id);

        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                pending.extend(node.children.iter().copied());
                removed.push((current, node.primitive));
            }
        }
        removed
    }

    /// Moves `id` to the roots while preserving its world transform: the
    /// ancestor transforms it was inheriting are baked into its own state.
    pub fn detach(&mut self, id: PrimitiveId) -> bool {
        let Some(parent_id) = self.parent(id) else {
            return self.nodes.contains_key(&id);
        };
        let inherited = self.global_transform(parent_id);

        self.unlink(id);
        let node = self.nodes.get_mut(&id).unwrap();
        node.parent = None;
        node.primitive.state_mut().transform = inherited * node.primitive.state().transform;
        self.roots.push(id);
        true
    }

    /// Composed transform of `id` including every ancestor, root first.
    pub fn global_transform(&self, id: PrimitiveId) -> Mat4 {
        let mut transform = Mat4::IDENTITY;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if let Some(node) = self.nodes.get(&current) {
                transform = node.primitive.state().transform * transform;
                cursor = node.parent;
            } else {
                break;
            }
        }
        transform
    }

    /// World-space bounds of `id` and everything below it.
    pub fn bounding_box(&self, id: PrimitiveId) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.nodes.get(&current) {
                let space = self.global_transform(current);
                bounds.union(&node.primitive.bounding_box(space));
                pending.extend(node.children.iter().copied());
            }
        }
        bounds
    }

    /// Ids in depth-first traversal order, parents before children.
    pub fn traversal_order(&self) -> Vec<PrimitiveId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut pending: Vec<PrimitiveId> = self.roots.iter().rev().copied().collect();
        while let Some(current) = pending.pop() {
            order.push(current);
            if let Some(node) = self.nodes.get(&current) {
                pending.extend(node.children.iter().rev().copied());
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ribbon::RibbonPrimitive;
    use glam::Vec3;

    fn ribbon() -> Primitive {
        RibbonPrimitive::new().into()
    }

    fn translated(offset: Vec3) -> Primitive {
        let mut primitive = ribbon();
        primitive.state_mut().transform = Mat4::from_translation(offset);
        primitive
    }

    #[test]
    fn ids_are_unique_and_never_reused() {
        let mut graph = SceneGraph::new();
        let first = graph.add(ribbon(), None);
        graph.remove(first);
        let second = graph.add(ribbon(), None);
        assert_ne!(first, second);
        assert!(!graph.contains(first));
        assert!(graph.contains(second));
    }

    #[test]
    fn removing_a_parent_takes_the_subtree_with_it() {
        let mut graph = SceneGraph::new();
        let parent = graph.add(ribbon(), None);
        let child = graph.add(ribbon(), Some(parent));
        let grandchild = graph.add(ribbon(), Some(child));
        let other = graph.add(ribbon(), None);

        let removed = graph.remove(parent);
        assert_eq!(removed.len(), 3);
        assert!(!graph.contains(child));
        assert!(!graph.contains(grandchild));
        assert!(graph.contains(other));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn reparenting_under_a_descendant_is_refused() {
        let mut graph = SceneGraph::new();
        let parent = graph.add(ribbon(), None);
        let child = graph.add(ribbon(), Some(parent));
        assert!(!graph.reparent(parent, Some(child)));
        assert!(!graph.reparent(parent, Some(parent)));
        assert_eq!(graph.parent(child), Some(parent));
    }

    #[test]
    fn global_transform_composes_ancestors_root_first() {
        let mut graph = SceneGraph::new();
        let parent = graph.add(translated(Vec3::new(10.0, 0.0, 0.0)), None);
        let child = graph.add(translated(Vec3::new(0.0, 5.0, 0.0)), Some(parent));

        let world = graph.global_transform(child);
        let origin = world.transform_point3(Vec3::ZERO);
        assert_eq!(origin, Vec3::new(10.0, 5.0, 0.0));
    }

    #[test]
    fn detach_preserves_the_world_transform() {
        let mut graph = SceneGraph::new();
        let parent = graph.add(translated(Vec3::new(3.0, 0.0, 0.0)), None);
        let child = graph.add(translated(Vec3::new(0.0, 2.0, 0.0)), Some(parent));

        let before = graph.global_transform(child);
        assert!(graph.detach(child));
        let after = graph.global_transform(child);

        assert_eq!(graph.parent(child), None);
        assert!(graph.roots().contains(&child));
        assert_eq!(before, after);
    }

    #[test]
    fn bounding_box_unions_the_whole_subtree() {
        let mut graph = SceneGraph::new();
        let mut parent: Primitive =
            RibbonPrimitive::from_points(vec![Vec3::ZERO, Vec3::X], 0.1).into();
        parent.state_mut().transform = Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0));
        let child: Primitive =
            RibbonPrimitive::from_points(vec![Vec3::ZERO, Vec3::Y * 3.0], 0.1).into();

        let parent_id = graph.add(parent, None);
        graph.add(child, Some(parent_id));

        let bounds = graph.bounding_box(parent_id);
        assert_eq!(bounds.min, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(3.0, 3.0, 0.0));
    }

    #[test]
    fn traversal_visits_parents_before_children() {
        let mut graph = SceneGraph::new();
        let a = graph.add(ribbon(), None);
        let b = graph.add(ribbon(), Some(a));
        let c = graph.add(ribbon(), None);
        let d = graph.add(ribbon(), Some(b));

        let order = graph.traversal_order();
        assert_eq!(order, vec![a, b, d, c]);
    }
}
