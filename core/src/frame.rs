//! Frame records and the frame stack.
//!
//! Frames are pushed and popped strictly LIFO, so the frame stack is a plain
//! vector. Handles carry a generation so that a [`FrameId`] kept past its
//! frame's pop is detected instead of silently naming a newer frame at the
//! same depth.

use crate::{
    Rc, Vec,
    chunker::Chunk,
    data_stack::Dsp,
    function::Function,
    heap::ContextId,
};
use bitflags::bitflags;
use core::fmt;

/// Generation-checked handle to a running frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    index: u32,
    generation: u32,
}

impl FrameId {
    /// Position on the frame stack, 0 being the outermost frame.
    pub fn depth(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A function invocation with argument storage.
    Function,
    /// A non-function evaluation level (group, block step). Has no arguments
    /// and is never reified.
    Group,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// Arguments are still being gathered.
        const FULFILLING = 1 << 0;
        /// Native code may hold references into the argument cells; a
        /// reified context must be read-only while the frame runs.
        const NATIVE_HOLD = 1 << 1;
    }
}

/// Where a frame's argument cells live.
#[derive(Debug)]
pub enum ArgStorage {
    /// Group frames.
    None,
    /// Cells in a chunk on the chunk stack.
    Inline(Chunk),
    /// Cells moved into a managed context by reification. The chunk stays
    /// acquired until the frame pops so releases remain in stack order.
    Reified { context: ContextId, reserved: Chunk },
}

impl ArgStorage {
    /// The context the frame was reified into, if any.
    pub fn context(&self) -> Option<ContextId> {
        match self {
            ArgStorage::Reified { context, .. } => Some(*context),
            _ => None,
        }
    }

    /// Gives back the chunk, if one is held.
    pub(crate) fn into_chunk(self) -> Option<Chunk> {
        match self {
            ArgStorage::None => None,
            ArgStorage::Inline(chunk) | ArgStorage::Reified { reserved: chunk, .. } => Some(chunk),
        }
    }
}

/// One running evaluation level.
#[derive(Debug)]
pub struct Frame {
    pub kind: FrameKind,
    /// Function being run. `None` for group frames.
    pub phase: Option<Rc<Function>>,
    /// Definitional binding the function was invoked with.
    pub binding: Option<ContextId>,
    pub args: ArgStorage,
    pub flags: FrameFlags,
    /// Number of argument slots gathered so far, counting from slot 1.
    pub fulfilled: usize,
    /// Data stack pointer when the frame was pushed.
    pub dsp_orig: Dsp,
}

impl Frame {
    pub fn is_function(&self) -> bool {
        self.kind == FrameKind::Function
    }

    pub fn is_fulfilling(&self) -> bool {
        self.flags.contains(FrameFlags::FULFILLING)
    }

    pub fn context(&self) -> Option<ContextId> {
        self.args.context()
    }
}

/// LIFO stack of [`Frame`]s.
#[derive(Debug, Default)]
pub struct FrameStack {
    frames: Vec<Frame>,
    /// Generation of each depth; bumped on pop.
    generations: Vec<u32>,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) -> FrameId {
        let index = self.frames.len();
        if index == self.generations.len() {
            self.generations.push(0);
        }
        self.frames.push(frame);
        FrameId {
            index: index as u32,
            generation: self.generations[index],
        }
    }

    /// Pops the innermost frame.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not the innermost frame.
    pub fn pop(&mut self, id: FrameId) -> Frame {
        assert!(
            self.top() == Some(id),
            "frame {} popped out of order: only the innermost frame may be dropped",
            id
        );
        let index = id.index as usize;
        self.generations[index] = self.generations[index].wrapping_add(1);
        // Checked by the assertion above.
        self.frames.pop().unwrap_or_else(|| unreachable!())
    }

    fn is_live(&self, id: FrameId) -> bool {
        let index = id.index as usize;
        index < self.frames.len() && self.generations[index] == id.generation
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        if self.is_live(id) {
            Some(&self.frames[id.index as usize])
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        if self.is_live(id) {
            Some(&mut self.frames[id.index as usize])
        } else {
            None
        }
    }

    /// The innermost frame.
    pub fn top(&self) -> Option<FrameId> {
        let index = self.frames.len().checked_sub(1)?;
        Some(FrameId {
            index: index as u32,
            generation: self.generations[index],
        })
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames from innermost to outermost.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (FrameId, &Frame)> + '_ {
        self.frames
            .iter()
            .enumerate()
            .rev()
            .map(|(index, frame)| {
                (
                    FrameId {
                        index: index as u32,
                        generation: self.generations[index],
                    },
                    frame,
                )
            })
    }
}
