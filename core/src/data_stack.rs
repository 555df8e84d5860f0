use crate::{
    StackError, Value, Vec,
    array::{Array, ArrayFlags},
    vec,
};
use core::fmt;
use tracing::{debug, warn};

/// Index into the data stack.
///
/// Indices survive expansion; references into the stack do not, which the
/// borrow checker enforces for every accessor here.
pub type Dsp = usize;

/// The data stack: a growable, index-addressed sequence of value cells used
/// by the evaluator to accumulate intermediate results.
///
/// Layout of the backing storage:
///
/// ```text
///   0        1 ..= dsp      dsp+1 ..        len-1
/// +-------+-------------+--------------+-------+
/// | Trash |   values    |  Trash ...   |  End  |
/// +-------+-------------+--------------+-------+
/// ```
///
/// Cell 0 is never a value, so `dsp == 0` means empty without needing a
/// signed index. The `End` cell at the tail is what a push runs into when
/// the stack has to grow.
///
/// # Examples
///
/// ```
/// use renstack_core::Value;
/// use renstack_core::array::ArrayFlags;
/// use renstack_core::data_stack::DataStack;
///
/// let mut stack = DataStack::new(16, 16, 1000).unwrap();
/// let mark = stack.dsp();
/// stack.push(Value::Integer(10)).unwrap();
/// stack.push(Value::Integer(20)).unwrap();
/// let block = stack.pop_values(mark, ArrayFlags::empty());
/// assert_eq!(block.len(), 2);
/// assert_eq!(stack.dsp(), mark);
/// ```
pub struct DataStack {
    cells: Vec<Value>,
    dsp: Dsp,
    expand_basis: usize,
    /// Maximum number of cells, end marker included.
    limit: usize,
}

impl DataStack {
    /// Creates a data stack expanded to `initial_size` cells.
    ///
    /// The initial size is reached through the same expansion path a push
    /// takes when it hits the end marker.
    pub fn new(initial_size: usize, expand_basis: usize, limit: usize) -> Result<Self, StackError> {
        let mut stack = Self {
            cells: vec![Value::Trash, Value::End],
            dsp: 1,
            expand_basis: expand_basis.max(1),
            limit,
        };
        stack.expand(initial_size)?;
        stack.dsp = 0;
        Ok(stack)
    }

    /// Current data stack pointer. `0` when empty.
    #[inline]
    pub fn dsp(&self) -> Dsp {
        self.dsp
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dsp == 0
    }

    /// Number of usable cells before the next expansion, sentinel included.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cells.len() - 1
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Pushes a value, growing the stack if the end marker is reached.
    ///
    /// `Void` is refused; most arrays built from the stack cannot hold it.
    /// Use [`push_maybe_void`](Self::push_maybe_void) when building
    /// something that can, such as a variable list.
    #[inline]
    pub fn push(&mut self, value: Value) -> Result<(), StackError> {
        if value.is_void() {
            return Err(StackError::AbsentValue);
        }
        self.push_maybe_void(value)
    }

    /// Pushes a value that may be `Void`.
    ///
    /// On overflow the stack is left exactly as it was.
    pub fn push_maybe_void(&mut self, value: Value) -> Result<(), StackError> {
        debug_assert!(!value.is_end(), "End marker pushed onto the data stack");
        self.dsp += 1;
        if self.cells[self.dsp].is_end() {
            if let Err(err) = self.expand(self.expand_basis) {
                self.dsp -= 1;
                return Err(err);
            }
        }
        self.cells[self.dsp] = value;
        Ok(())
    }

    /// Grows the stack by `amount` cells.
    ///
    /// Only legal while `dsp` sits on the end marker, which is the state a
    /// push leaves it in when it runs out of room. New cells are filled with
    /// trash and the end marker moves to the new tail.
    ///
    /// Relocates the backing storage.
    pub fn expand(&mut self, amount: usize) -> Result<(), StackError> {
        let len_old = self.cells.len() - 1;
        debug_assert!(self.cells[self.dsp].is_end());
        debug_assert_eq!(self.dsp, len_old);

        let requested = len_old.saturating_add(amount).saturating_add(1);
        if requested > self.limit {
            warn!(requested, limit = self.limit, "data stack overflow");
            return Err(StackError::StackOverflow {
                requested,
                limit: self.limit,
            });
        }

        self.cells.reserve_exact(amount);
        self.cells.pop();
        self.cells.resize(len_old + amount, Value::Trash);
        self.cells.push(Value::End);
        debug!(from = len_old, to = len_old + amount, "data stack expanded");
        Ok(())
    }

    /// Removes and returns the top value.
    ///
    /// # Panics
    ///
    /// Panics if the stack is empty.
    #[inline]
    pub fn pop(&mut self) -> Value {
        assert!(self.dsp > 0, "data stack underflow");
        let value = core::mem::replace(&mut self.cells[self.dsp], Value::Trash);
        self.dsp -= 1;
        value
    }

    /// Discards everything above `dsp`.
    ///
    /// # Panics
    ///
    /// Panics if `dsp` is above the current top.
    pub fn drop_to(&mut self, dsp: Dsp) {
        assert!(
            dsp <= self.dsp,
            "drop_to({}) above current data stack pointer {}",
            dsp,
            self.dsp
        );
        self.cells[dsp + 1..=self.dsp].fill(Value::Trash);
        self.dsp = dsp;
    }

    /// Returns the top value.
    ///
    /// # Panics
    ///
    /// Panics if the stack is empty.
    #[inline]
    pub fn top(&self) -> &Value {
        self.at(self.dsp)
    }

    /// Returns the value at `dsp`, counting from the bottom.
    ///
    /// # Panics
    ///
    /// Panics unless `1 <= dsp <= self.dsp()`.
    #[inline]
    pub fn at(&self, dsp: Dsp) -> &Value {
        assert!(
            dsp >= 1 && dsp <= self.dsp,
            "data stack index {} out of range (dsp is {})",
            dsp,
            self.dsp
        );
        &self.cells[dsp]
    }

    #[inline]
    pub fn at_mut(&mut self, dsp: Dsp) -> &mut Value {
        assert!(
            dsp >= 1 && dsp <= self.dsp,
            "data stack index {} out of range (dsp is {})",
            dsp,
            self.dsp
        );
        &mut self.cells[dsp]
    }

    /// The live values, bottom to top.
    pub fn live(&self) -> &[Value] {
        &self.cells[1..=self.dsp]
    }

    fn above(&self, start: Dsp) -> &[Value] {
        assert!(
            start <= self.dsp,
            "stack mark {} above current data stack pointer {}",
            start,
            self.dsp
        );
        &self.cells[start + 1..=self.dsp]
    }

    /// Pops everything above `start` into a new array, bottom first.
    pub fn pop_values(&mut self, start: Dsp, flags: ArrayFlags) -> Array {
        let array = Array::from_cells(self.above(start).to_vec(), flags);
        self.drop_to(start);
        array
    }

    /// Pops everything above `start` into a new array, top first.
    ///
    /// Used when evaluation order and the order wanted in the result are
    /// opposite.
    pub fn pop_values_reversed(&mut self, start: Dsp) -> Array {
        let cells = self.above(start).iter().rev().copied().collect();
        let array = Array::from_cells(cells, ArrayFlags::empty());
        self.drop_to(start);
        array
    }

    /// Pops everything above `start` into `into` at `index`.
    ///
    /// Returns the index just past the inserted values. Fails without
    /// touching the stack if `into` is read-only.
    pub fn pop_values_into(
        &mut self,
        start: Dsp,
        into: &mut Array,
        index: usize,
    ) -> Result<usize, StackError> {
        if into.is_read_only() {
            return Err(StackError::ReadOnly);
        }
        let next = into.insert_slice(index, self.above(start));
        self.drop_to(start);
        Ok(next)
    }
}

impl fmt::Debug for DataStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStack")
            .field("live", &self.live())
            .field("dsp", &self.dsp)
            .field("capacity", &self.capacity())
            .field("limit", &self.limit)
            .finish()
    }
}
