use bitflags::bitflags;
use glam::Mat4;

use crate::color::Color;

bitflags! {
    /// Render hints inherited down the scene graph.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Hints: u32 {
        /// Draw filled geometry.
        const SOLID = 1 << 0;
        /// Draw a wireframe outline using the wire colour.
        const WIRE = 1 << 1;
        /// Skip depth testing (and depth buffer allocation for render targets).
        const IGNORE_DEPTH = 1 << 2;
        /// Skip lighting for this primitive's draws.
        const UNLIT = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    Linear,
    #[default]
    LinearMipmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    Clamp,
    Repeat,
}

/// Texture sampling parameters carried in the render state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerParams {
    pub mag: FilterMode,
    pub min: FilterMode,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
}

/// Inheritable rendering attributes.
///
/// Every primitive owns a `State`; during traversal the renderer composes it
/// with the ancestors' states via [`State::inherited`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct State {
    pub colour: Color,
    pub wire_colour: Color,
    pub opacity: f32,
    pub hints: Hints,
    pub sampler: SamplerParams,
    pub transform: Mat4,
}

impl State {
    /// Composes a primitive's own state with the inherited state of its
    /// ancestors: transforms multiply, hints accumulate, colour and sampler
    /// settings are the primitive's own.
    pub fn inherited(parent: &State, own: &State) -> State {
        State {
            colour: own.colour,
            wire_colour: own.wire_colour,
            opacity: own.opacity,
            hints: parent.hints | own.hints,
            sampler: own.sampler,
            transform: parent.transform * own.transform,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self {
            colour: Color::WHITE,
            wire_colour: Color::BLACK,
            opacity: 1.0,
            hints: Hints::SOLID,
            sampler: SamplerParams::default(),
            transform: Mat4::IDENTITY,
        }
    }
}

/// The stack of rendering states pushed and popped around scene-graph
/// traversal.
///
/// The stack always holds at least one entry. Popping the last entry is a
/// caller error: it panics in debug builds and is a logged no-op in release
/// builds.
#[derive(Debug, Clone)]
pub struct StateStack {
    stack: Vec<State>,
}

impl StateStack {
    pub fn new() -> Self {
        Self {
            stack: vec![State::default()],
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn current(&self) -> &State {
        // the stack is never empty
        self.stack.last().unwrap()
    }

    pub fn current_mut(&mut self) -> &mut State {
        self.stack.last_mut().unwrap()
    }

    /// Duplicates the current top onto the stack.
    pub fn push(&mut self) {
        let top = *self.current();
        self.stack.push(top);
    }

    /// Removes the top entry, restoring the previous one as current.
    pub fn pop(&mut self) {
        if self.stack.len() <= 1 {
            debug_assert!(false, "popped the last state stack entry");
            log::error!("StateStack::pop called on a stack of depth 1; ignoring");
            return;
        }
        self.stack.pop();
    }
}

impl Default for StateStack {
    fn default() -> Self {
        Self::new()
    }
}
