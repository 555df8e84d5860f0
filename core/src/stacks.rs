//! The execution stacks as one unit.
//!
//! [`Stacks`] owns the chunk arena, the data stack, the frame stack and the
//! managed store, and keeps them consistent: frames acquire their argument
//! chunks on push and give them back on pop, reified contexts are detached
//! when their frame stops running, and the collector is handed every value
//! the stacks still reference.

use crate::{
    Rc, StackError, Value, Vec,
    array::ArrayFlags,
    chunker::ChunkerArena,
    data_stack::{DataStack, Dsp},
    frame::{ArgStorage, Frame, FrameFlags, FrameId, FrameKind, FrameStack},
    function::Function,
    heap::{ArrayId, ContextId, Heap},
    options::StackOptions,
};
use tracing::{debug, trace};

/// A saved position on the data and frame stacks, for unwinding after an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackMark {
    dsp: Dsp,
    depth: usize,
}

impl StackMark {
    pub fn dsp(&self) -> Dsp {
        self.dsp
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// The cells a running frame holds, as seen by the collector.
#[derive(Debug)]
pub struct FrameCells<'a> {
    pub id: FrameId,
    pub kind: FrameKind,
    /// Argument cells, slot 1 first. Empty for group frames.
    pub cells: &'a [Value],
}

pub struct Stacks {
    pub(crate) arena: ChunkerArena,
    pub(crate) data: DataStack,
    pub(crate) frames: FrameStack,
    pub(crate) heap: Heap,
    options: StackOptions,
}

impl Stacks {
    /// Brings up the chunk arena and the data stack.
    pub fn startup(options: StackOptions) -> Result<Self, StackError> {
        let arena = ChunkerArena::new(options.chunker_size, options.arena_limit);
        let data = DataStack::new(
            options.initial_data_stack_size,
            options.data_stack_expand_basis,
            options.data_stack_limit,
        )?;
        debug!(
            data_stack = data.capacity(),
            chunker_size = options.chunker_size,
            "stacks started"
        );
        Ok(Self {
            arena,
            data,
            frames: FrameStack::new(),
            heap: Heap::new(),
            options,
        })
    }

    /// Tears the stacks down.
    ///
    /// # Panics
    ///
    /// Panics if any frame is still running, any value is left on the data
    /// stack, or any chunk is still acquired.
    pub fn shutdown(self) {
        assert!(
            self.frames.is_empty(),
            "{} frames still running at shutdown",
            self.frames.depth()
        );
        assert!(
            self.data.is_empty(),
            "{} values left on the data stack at shutdown",
            self.data.dsp()
        );
        assert_eq!(self.arena.depth(), 0, "chunks still acquired at shutdown");
        assert!(self.arena.is_terminated());
        debug!(objects = self.heap.len(), "stacks shut down");
    }

    pub fn options(&self) -> &StackOptions {
        &self.options
    }

    pub fn data_stack(&self) -> &DataStack {
        &self.data
    }

    pub fn data_stack_mut(&mut self) -> &mut DataStack {
        &mut self.data
    }

    pub fn arena(&self) -> &ChunkerArena {
        &self.arena
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn frame(&self, id: FrameId) -> Result<&Frame, StackError> {
        self.frames.get(id).ok_or(StackError::StaleFrame)
    }

    pub fn top_frame(&self) -> Option<FrameId> {
        self.frames.top()
    }

    /// Number of running frames.
    pub fn depth(&self) -> usize {
        self.frames.depth()
    }

    /// Pushes a frame for invoking `function`.
    ///
    /// The frame starts out gathering arguments, with every slot trash.
    pub fn push_function_frame(
        &mut self,
        function: Rc<Function>,
        binding: Option<ContextId>,
    ) -> Result<FrameId, StackError> {
        // Slot 0 is kept for the rootvar written when the frame is reified.
        let chunk = self.arena.acquire(function.arity() + 1)?;
        let mut flags = FrameFlags::FULFILLING;
        if function.is_native() {
            flags |= FrameFlags::NATIVE_HOLD;
        }
        let arity = function.arity();
        let id = self.frames.push(Frame {
            kind: FrameKind::Function,
            phase: Some(function),
            binding,
            args: ArgStorage::Inline(chunk),
            flags,
            fulfilled: 0,
            dsp_orig: self.data.dsp(),
        });
        trace!(frame = %id, arity, "function frame pushed");
        Ok(id)
    }

    /// Pushes an evaluation level with no arguments.
    pub fn push_group_frame(&mut self) -> FrameId {
        let id = self.frames.push(Frame {
            kind: FrameKind::Group,
            phase: None,
            binding: None,
            args: ArgStorage::None,
            flags: FrameFlags::empty(),
            fulfilled: 0,
            dsp_orig: self.data.dsp(),
        });
        trace!(frame = %id, "group frame pushed");
        id
    }

    /// Drops the innermost frame and releases its chunk.
    ///
    /// If the frame was reified, its context is detached and returned. The
    /// context stays valid for as long as something references it.
    ///
    /// # Panics
    ///
    /// Panics if `id` is running but is not the innermost frame.
    pub fn pop_frame(&mut self, id: FrameId) -> Result<Option<ContextId>, StackError> {
        if self.frames.get(id).is_none() {
            return Err(StackError::StaleFrame);
        }
        Ok(self.drop_frame(id))
    }

    /// Pops a frame known to be live and innermost.
    fn drop_frame(&mut self, id: FrameId) -> Option<ContextId> {
        let frame = self.frames.pop(id);
        let context = frame.context();
        if let Some(context) = context {
            if let Some(reified) = self.heap.context_mut(context) {
                reified.detach();
            }
        }
        if let Some(chunk) = frame.args.into_chunk() {
            self.arena.release(chunk);
        }
        trace!(frame = %id, reified = context.is_some(), "frame popped");
        context
    }

    /// The argument cells of a frame, slot 0 included.
    fn frame_slots(&self, frame: &Frame) -> Result<&[Value], StackError> {
        match &frame.args {
            ArgStorage::None => Ok(&[]),
            ArgStorage::Inline(chunk) => Ok(self.arena.values(chunk)),
            ArgStorage::Reified { context, .. } => self
                .heap
                .context(*context)
                .map(|context| context.varlist().as_slice())
                .ok_or(StackError::StaleContext),
        }
    }

    fn check_arg_index(index: usize, slots: usize) -> Result<(), StackError> {
        if index == 0 || index >= slots {
            return Err(StackError::ArgumentOutOfRange {
                index,
                len: slots.saturating_sub(1),
            });
        }
        Ok(())
    }

    /// Reads argument `index` (1-based) of a frame.
    pub fn arg(&self, id: FrameId, index: usize) -> Result<&Value, StackError> {
        let frame = self.frame(id)?;
        let slots = self.frame_slots(frame)?;
        Self::check_arg_index(index, slots.len())?;
        Ok(&slots[index])
    }

    /// Writes argument `index` (1-based) of a frame.
    ///
    /// This is how the evaluator fills in arguments, so it is not subject to
    /// the hold a native frame puts on its context.
    pub fn set_arg(&mut self, id: FrameId, index: usize, value: Value) -> Result<(), StackError> {
        debug_assert!(!value.is_end(), "End marker stored as an argument");
        let frame = self.frames.get_mut(id).ok_or(StackError::StaleFrame)?;
        let slots = match &frame.args {
            ArgStorage::None => {
                return Err(StackError::ArgumentOutOfRange { index, len: 0 });
            }
            ArgStorage::Inline(chunk) => self.arena.values_mut(chunk),
            ArgStorage::Reified { context, .. } => self
                .heap
                .context_mut(*context)
                .ok_or(StackError::StaleContext)?
                .varlist_mut()
                .as_mut_slice(),
        };
        Self::check_arg_index(index, slots.len())?;
        slots[index] = value;

        frame.fulfilled = frame.fulfilled.max(index);
        if let Some(context) = frame.context() {
            if let Some(reified) = self.heap.context_mut(context) {
                if frame.flags.contains(FrameFlags::FULFILLING) {
                    reified.set_available(frame.fulfilled + 1);
                }
            }
        }
        Ok(())
    }

    /// Marks argument gathering as complete; every slot is now considered
    /// initialized.
    pub fn finish_fulfilling(&mut self, id: FrameId) -> Result<(), StackError> {
        let frame = self.frames.get_mut(id).ok_or(StackError::StaleFrame)?;
        frame.flags.remove(FrameFlags::FULFILLING);
        if let Some(phase) = &frame.phase {
            frame.fulfilled = phase.arity();
        }
        if let Some(context) = frame.context() {
            if let Some(reified) = self.heap.context_mut(context) {
                reified.set_available(usize::MAX);
            }
        }
        Ok(())
    }

    /// The variables of a context, slot 1 first.
    pub fn context_vars(&self, context: ContextId) -> Result<&[Value], StackError> {
        self.heap
            .context(context)
            .map(|context| context.vars())
            .ok_or(StackError::StaleContext)
    }

    /// Writes variable `index` (1-based) of a context as user code would.
    ///
    /// Fails with [`StackError::ReadOnly`] while the context is held by a
    /// running native frame.
    pub fn set_context_var(
        &mut self,
        context: ContextId,
        index: usize,
        value: Value,
    ) -> Result<(), StackError> {
        let context = self
            .heap
            .context_mut(context)
            .ok_or(StackError::StaleContext)?;
        if context.varlist().is_read_only() {
            return Err(StackError::ReadOnly);
        }
        let slots = context.varlist_mut().as_mut_slice();
        Self::check_arg_index(index, slots.len())?;
        slots[index] = value;
        // A gathering frame's context may be written ahead of its arguments.
        context.set_available(index + 1);
        Ok(())
    }

    /// Finds the `level`th running function frame, counting from the
    /// innermost at 0.
    ///
    /// Group frames and frames still gathering arguments do not count.
    pub fn frame_for_level(&self, level: usize) -> Result<FrameId, StackError> {
        self.frames
            .iter()
            .filter(|(_, frame)| frame.is_function() && !frame.is_fulfilling())
            .nth(level)
            .map(|(id, _)| id)
            .ok_or(StackError::NoSuchLevel { level })
    }

    /// The context of the `level`th running function frame, reifying it if
    /// needed.
    pub fn context_for_level(&mut self, level: usize) -> Result<ContextId, StackError> {
        let id = self.frame_for_level(level)?;
        self.reify(id)
    }

    pub fn mark(&self) -> StackMark {
        StackMark {
            dsp: self.data.dsp(),
            depth: self.frames.depth(),
        }
    }

    /// Drops every frame and value pushed since `mark` was taken.
    ///
    /// # Panics
    ///
    /// Panics if either stack is already below the mark.
    pub fn unwind_to(&mut self, mark: StackMark) {
        assert!(
            self.frames.depth() >= mark.depth,
            "unwinding to frame depth {} from {}",
            mark.depth,
            self.frames.depth()
        );
        let dropped = self.frames.depth() - mark.depth;
        while let Some(top) = self.frames.top() {
            if top.depth() < mark.depth {
                break;
            }
            self.drop_frame(top);
        }
        self.data.drop_to(mark.dsp);
        debug!(frames = dropped, dsp = mark.dsp, "stacks unwound");
    }

    /// Pops everything above `start` off the data stack into a managed
    /// block.
    pub fn pop_block(&mut self, start: Dsp) -> ArrayId {
        let array = self.data.pop_values(start, ArrayFlags::empty());
        self.heap.manage_array(array)
    }

    /// Running frames from innermost to outermost, with their argument cells.
    ///
    /// Cells past what a gathering frame has filled in are trash.
    pub fn frames(&self) -> impl Iterator<Item = FrameCells<'_>> + '_ {
        self.frames.iter().map(|(id, frame)| {
            let slots = self.frame_slots(frame).unwrap_or(&[]);
            FrameCells {
                id,
                kind: frame.kind,
                cells: slots.get(1..).unwrap_or(&[]),
            }
        })
    }

    /// Every value the stacks keep alive: the data stack and each running
    /// frame's arguments and binding.
    pub fn roots(&self) -> Vec<Value> {
        let mut roots: Vec<Value> = self.data.live().to_vec();
        for (_, frame) in self.frames.iter() {
            if let Some(binding) = frame.binding {
                roots.push(Value::Frame(binding));
            }
            match &frame.args {
                ArgStorage::None => {}
                ArgStorage::Inline(chunk) => {
                    let slots = self.arena.values(chunk);
                    let filled = (frame.fulfilled + 1).min(slots.len());
                    roots.extend_from_slice(&slots[1..filled]);
                }
                ArgStorage::Reified { context, .. } => roots.push(Value::Frame(*context)),
            }
        }
        roots
    }

    /// Collects everything in the managed store the stacks no longer reach.
    /// Returns the number of objects freed.
    pub fn collect_garbage(&mut self) -> usize {
        let roots = self.roots();
        self.heap.collect_garbage(roots)
    }
}

impl core::fmt::Debug for Stacks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stacks")
            .field("dsp", &self.data.dsp())
            .field("frames", &self.frames.depth())
            .field("chunks", &self.arena.depth())
            .field("heap", &self.heap.len())
            .finish()
    }
}
