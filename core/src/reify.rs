//! Turning a running frame into a first-class context.
//!
//! Frames keep their arguments in chunk memory, which is released when the
//! frame is dropped. Anything that must outlive that (a word bound into the
//! frame, a FRAME value handed to user code) needs the arguments in the
//! managed store instead. Reification moves them there once; the frame then
//! reads and writes through the context for the rest of its run.

use crate::{
    StackError, Value,
    array::{Array, ArrayFlags, SeriesInfo},
    frame::{ArgStorage, FrameFlags, FrameId},
    heap::{Context, ContextId},
    stacks::Stacks,
};
use tracing::debug;

impl Stacks {
    /// Returns the context for a running function frame, creating it on
    /// first use.
    ///
    /// Idempotent: every call for the same frame yields the same context.
    /// The frame may still be gathering arguments; only the slots gathered
    /// so far are considered initialized.
    ///
    /// # Panics
    ///
    /// Panics if `id` names a group frame.
    pub fn reify(&mut self, id: FrameId) -> Result<ContextId, StackError> {
        let frame = self.frames.get_mut(id).ok_or(StackError::StaleFrame)?;
        match &frame.args {
            ArgStorage::Reified { context, .. } => return Ok(*context),
            ArgStorage::None => panic!("group frame {} cannot be reified", id),
            ArgStorage::Inline(_) => {}
        }
        let Some(phase) = frame.phase.clone() else {
            panic!("function frame {} has no phase", id);
        };
        let ArgStorage::Inline(chunk) = core::mem::replace(&mut frame.args, ArgStorage::None)
        else {
            unreachable!()
        };

        let cells = self.arena.values(&chunk).to_vec();
        let mut varlist = Array::from_cells(cells, ArrayFlags::VARLIST | ArrayFlags::VOIDS_LEGAL);
        varlist.set_info(SeriesInfo::STACK, true);
        if frame.flags.contains(FrameFlags::NATIVE_HOLD) {
            varlist.set_info(SeriesInfo::HOLD, true);
        }

        let available = if frame.is_fulfilling() {
            frame.fulfilled + 1
        } else {
            varlist.len()
        };
        let keys = phase.params().clone();
        let context = self.heap.manage_context(Context::new(
            varlist,
            keys,
            id,
            phase,
            frame.binding,
            available,
        ));
        if let Some(reified) = self.heap.context_mut(context) {
            reified.varlist_mut().as_mut_slice()[0] = Value::Frame(context);
        }

        // The chunk stays acquired so the arena is still released in order.
        self.arena.values_mut(&chunk).fill(Value::Trash);
        frame.args = ArgStorage::Reified {
            context,
            reserved: chunk,
        };

        debug!(frame = %id, available, fulfilling = frame.is_fulfilling(), "frame reified");
        Ok(context)
    }
}
