//! The managed store.
//!
//! Arrays and contexts that outlive the stack discipline live here. Objects
//! are kept in a vector of slots and named by generation-checked handles, so
//! a handle to a collected object is detected rather than dangling.
//! Collection is a plain mark/sweep from an explicit root set.

use crate::{
    Rc, Vec,
    array::{Array, SeriesInfo},
    frame::FrameId,
    function::{Function, KeyList},
    value::Value,
};
use core::fmt;
use tracing::debug;

/// Packed `{ index: u32, generation: u32 }`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct HeapId(u64);

impl HeapId {
    fn from_parts(index: u32, generation: u32) -> Self {
        Self((index as u64) | ((generation as u64) << 32))
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapId")
            .field("index", &self.index())
            .field("generation", &self.generation())
            .finish()
    }
}

/// A managed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ArrayId(HeapId);

impl ArrayId {
    pub fn id(self) -> HeapId {
        self.0
    }
}

/// A managed context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ContextId(HeapId);

impl ContextId {
    pub fn id(self) -> HeapId {
        self.0
    }
}

/// Handle to a persistent root registered with [`Heap::register_root`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(u32);

/// A frame's variables as a first-class object.
///
/// Slot 0 of the variable list is the rootvar, a `Value::Frame` naming the
/// context itself. Slots `1..` line up with `keys`.
#[derive(Debug)]
pub struct Context {
    varlist: Array,
    keys: Rc<KeyList>,
    /// Frame this context was reified from, while that frame is running.
    frame: Option<FrameId>,
    phase: Rc<Function>,
    binding: Option<ContextId>,
    /// Cells of `varlist` known to be initialized, rootvar included.
    available: usize,
}

impl Context {
    pub(crate) fn new(
        varlist: Array,
        keys: Rc<KeyList>,
        frame: FrameId,
        phase: Rc<Function>,
        binding: Option<ContextId>,
        available: usize,
    ) -> Self {
        debug_assert_eq!(varlist.len(), keys.len() + 1);
        Self {
            varlist,
            keys,
            frame: Some(frame),
            phase,
            binding,
            available,
        }
    }

    pub fn varlist(&self) -> &Array {
        &self.varlist
    }

    pub(crate) fn varlist_mut(&mut self) -> &mut Array {
        &mut self.varlist
    }

    /// The variables, without the rootvar.
    pub fn vars(&self) -> &[Value] {
        &self.varlist.as_slice()[1..]
    }

    pub fn rootvar(&self) -> &Value {
        &self.varlist.as_slice()[0]
    }

    pub fn keys(&self) -> &Rc<KeyList> {
        &self.keys
    }

    pub fn frame(&self) -> Option<FrameId> {
        self.frame
    }

    pub fn phase(&self) -> &Rc<Function> {
        &self.phase
    }

    pub fn binding(&self) -> Option<ContextId> {
        self.binding
    }

    pub fn available(&self) -> usize {
        self.available
    }

    /// Moves the initialized prefix forward; never shrinks it.
    pub(crate) fn set_available(&mut self, available: usize) {
        self.available = self.available.max(available).min(self.varlist.len());
    }

    /// Severs the link to the frame once it has stopped running.
    pub(crate) fn detach(&mut self) {
        self.frame = None;
        self.varlist
            .set_info(SeriesInfo::STACK | SeriesInfo::HOLD, false);
    }
}

#[derive(Debug)]
enum HeapObject {
    Array(Array),
    Context(Context),
}

impl HeapObject {
    fn info(&self) -> SeriesInfo {
        match self {
            HeapObject::Array(array) => array.info(),
            HeapObject::Context(context) => context.varlist.info(),
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    value: Option<HeapObject>,
}

/// A non-moving mark/sweep store for arrays and contexts.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    marks: Vec<bool>,
    free_list: Vec<u32>,
    live: usize,
    gc_runs: u64,
    persistent_roots: Vec<Option<Value>>,
    persistent_roots_free: Vec<u32>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, object: HeapObject) -> HeapId {
        self.live += 1;
        match self.free_list.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.value.is_none());
                slot.value = Some(object);
                HeapId::from_parts(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(object),
                });
                self.marks.push(false);
                HeapId::from_parts(index, 0)
            }
        }
    }

    fn object(&self, id: HeapId) -> Option<&HeapObject> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    fn object_mut(&mut self, id: HeapId) -> Option<&mut HeapObject> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    /// Hands an array over to the collector.
    pub fn manage_array(&mut self, mut array: Array) -> ArrayId {
        array.set_info(SeriesInfo::MANAGED, true);
        ArrayId(self.insert(HeapObject::Array(array)))
    }

    /// Hands a context over to the collector.
    pub(crate) fn manage_context(&mut self, mut context: Context) -> ContextId {
        context.varlist.set_info(SeriesInfo::MANAGED, true);
        ContextId(self.insert(HeapObject::Context(context)))
    }

    pub fn array(&self, id: ArrayId) -> Option<&Array> {
        match self.object(id.0)? {
            HeapObject::Array(array) => Some(array),
            HeapObject::Context(_) => None,
        }
    }

    pub fn array_mut(&mut self, id: ArrayId) -> Option<&mut Array> {
        match self.object_mut(id.0)? {
            HeapObject::Array(array) => Some(array),
            HeapObject::Context(_) => None,
        }
    }

    pub fn context(&self, id: ContextId) -> Option<&Context> {
        match self.object(id.0)? {
            HeapObject::Context(context) => Some(context),
            HeapObject::Array(_) => None,
        }
    }

    pub(crate) fn context_mut(&mut self, id: ContextId) -> Option<&mut Context> {
        match self.object_mut(id.0)? {
            HeapObject::Context(context) => Some(context),
            HeapObject::Array(_) => None,
        }
    }

    pub fn is_valid_context(&self, id: ContextId) -> bool {
        self.context(id).is_some()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn gc_runs(&self) -> u64 {
        self.gc_runs
    }

    /// Keeps `value` alive until the root is unregistered.
    pub fn register_root(&mut self, value: Value) -> RootId {
        let index = match self.persistent_roots_free.pop() {
            Some(index) => index as usize,
            None => {
                self.persistent_roots.push(None);
                self.persistent_roots.len() - 1
            }
        };
        debug_assert!(self.persistent_roots[index].is_none());
        self.persistent_roots[index] = Some(value);
        RootId(index as u32)
    }

    pub fn root(&self, id: RootId) -> Option<Value> {
        self.persistent_roots
            .get(id.0 as usize)
            .and_then(|slot| *slot)
    }

    pub fn unregister_root(&mut self, id: RootId) {
        let index = id.0 as usize;
        debug_assert!(index < self.persistent_roots.len(), "invalid RootId");
        if let Some(slot) = self.persistent_roots.get_mut(index) {
            if slot.take().is_some() {
                self.persistent_roots_free.push(id.0);
            }
        }
    }

    /// Runs a collection cycle.
    ///
    /// `roots` are the values the caller knows to be live (the data stack,
    /// running frames' cells). Persistent roots are added implicitly.
    /// Objects still attached to the stack are never freed. Returns the
    /// number of objects freed.
    pub fn collect_garbage<I>(&mut self, roots: I) -> usize
    where
        I: IntoIterator<Item = Value>,
    {
        self.gc_runs += 1;

        {
            let slots = &self.slots[..];
            let mut tracer = Tracer {
                marks: &mut self.marks,
                work: Vec::new(),
            };
            for value in roots {
                tracer.trace_value(value);
            }
            for value in self.persistent_roots.iter().flatten() {
                tracer.trace_value(*value);
            }
            for (index, slot) in slots.iter().enumerate() {
                let on_stack = slot
                    .value
                    .as_ref()
                    .is_some_and(|object| object.info().contains(SeriesInfo::STACK));
                if on_stack {
                    tracer
                        .work
                        .push(HeapId::from_parts(index as u32, slot.generation));
                }
            }

            while let Some(id) = tracer.work.pop() {
                let index = id.index() as usize;
                let slot = &slots[index];
                if slot.generation != id.generation() || tracer.marks[index] {
                    continue;
                }
                tracer.marks[index] = true;
                match &slot.value {
                    Some(HeapObject::Array(array)) => {
                        for value in array.as_slice() {
                            tracer.trace_value(*value);
                        }
                    }
                    Some(HeapObject::Context(context)) => {
                        for value in &context.varlist.as_slice()[..context.available] {
                            tracer.trace_value(*value);
                        }
                        if let Some(binding) = context.binding {
                            tracer.work.push(binding.0);
                        }
                    }
                    None => debug_assert!(false, "traced a free slot: {id:?}"),
                }
            }
        }

        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let marked = core::mem::replace(&mut self.marks[index], false);
            if marked || slot.value.is_none() {
                continue;
            }
            slot.value = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free_list.push(index as u32);
            freed += 1;
        }
        self.live -= freed;

        debug!(freed, live = self.live, runs = self.gc_runs, "garbage collected");
        freed
    }
}

struct Tracer<'a> {
    marks: &'a mut [bool],
    work: Vec<HeapId>,
}

impl Tracer<'_> {
    fn trace_value(&mut self, value: Value) {
        match value {
            Value::Block(array) => self.work.push(array.0),
            Value::Frame(context) => self.work.push(context.0),
            Value::Word(word) => {
                if let Some(context) = word.binding {
                    self.work.push(context.0);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{array::ArrayFlags, vec};

    fn block(values: Vec<Value>) -> Array {
        Array::from_cells(values, ArrayFlags::empty())
    }

    #[test]
    fn test_manage_marks_array() {
        let mut heap = Heap::new();
        let id = heap.manage_array(block(vec![Value::Integer(1)]));
        let array = heap.array(id).unwrap();
        assert!(array.info().contains(SeriesInfo::MANAGED));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_unreachable_array_is_freed() {
        let mut heap = Heap::new();
        let id = heap.manage_array(block(vec![]));
        assert_eq!(heap.collect_garbage([]), 1);
        assert!(heap.array(id).is_none());
        assert!(heap.is_empty());
    }

    #[test]
    fn test_reachable_through_nesting() {
        let mut heap = Heap::new();
        let inner = heap.manage_array(block(vec![Value::Integer(1)]));
        let outer = heap.manage_array(block(vec![Value::Block(inner)]));
        let garbage = heap.manage_array(block(vec![]));

        assert_eq!(heap.collect_garbage([Value::Block(outer)]), 1);
        assert!(heap.array(inner).is_some());
        assert!(heap.array(outer).is_some());
        assert!(heap.array(garbage).is_none());
    }

    #[test]
    fn test_persistent_root() {
        let mut heap = Heap::new();
        let id = heap.manage_array(block(vec![]));
        let root = heap.register_root(Value::Block(id));
        assert_eq!(heap.root(root), Some(Value::Block(id)));

        assert_eq!(heap.collect_garbage([]), 0);
        assert!(heap.array(id).is_some());

        heap.unregister_root(root);
        assert_eq!(heap.root(root), None);
        assert_eq!(heap.collect_garbage([]), 1);
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut heap = Heap::new();
        let old = heap.manage_array(block(vec![Value::Integer(1)]));
        heap.collect_garbage([]);
        let new = heap.manage_array(block(vec![Value::Integer(2)]));

        assert_eq!(old.id().index(), new.id().index());
        assert_ne!(old, new);
        assert!(heap.array(old).is_none());
        assert_eq!(heap.array(new).unwrap().get(0), Some(&Value::Integer(2)));
    }
}
