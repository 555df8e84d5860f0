//! Owned arrays of value cells and the flags that describe them.

use crate::{Value, Vec};
use bitflags::bitflags;

bitflags! {
    /// Properties fixed when an array is created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ArrayFlags: u8 {
        /// The array may contain `Void` cells.
        const VOIDS_LEGAL = 1 << 0;
        /// The array is a context's variable list.
        const VARLIST = 1 << 1;
    }
}

bitflags! {
    /// Properties that change over an array's lifetime.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SeriesInfo: u8 {
        /// Owned by the managed store; freed only by collection.
        const MANAGED = 1 << 0;
        /// Storage belongs to a running frame.
        const STACK = 1 << 1;
        /// Running native code depends on the contents; user writes fail.
        const HOLD = 1 << 2;
        /// Permanently read-only.
        const PROTECTED = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    cells: Vec<Value>,
    flags: ArrayFlags,
    info: SeriesInfo,
}

impl Array {
    pub fn new(flags: ArrayFlags) -> Self {
        Self::from_cells(Vec::new(), flags)
    }

    pub fn from_cells(cells: Vec<Value>, flags: ArrayFlags) -> Self {
        debug_assert!(
            cells.iter().all(|cell| !cell.is_end()),
            "End marker stored in an array"
        );
        debug_assert!(
            flags.contains(ArrayFlags::VOIDS_LEGAL) || !cells.iter().any(Value::is_void),
            "Void stored in an array that does not allow voids"
        );
        Self {
            cells,
            flags,
            info: SeriesInfo::empty(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.cells
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Value] {
        &mut self.cells
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.cells.get(index)
    }

    pub fn flags(&self) -> ArrayFlags {
        self.flags
    }

    pub fn info(&self) -> SeriesInfo {
        self.info
    }

    pub(crate) fn set_info(&mut self, info: SeriesInfo, value: bool) {
        self.info.set(info, value);
    }

    pub fn protect(&mut self) {
        self.info.insert(SeriesInfo::PROTECTED);
    }

    /// Held and protected arrays refuse user writes.
    pub fn is_read_only(&self) -> bool {
        self.info
            .intersects(SeriesInfo::HOLD | SeriesInfo::PROTECTED)
    }

    /// Appends a cell, failing if the array is read-only.
    pub fn push(&mut self, value: Value) -> Result<(), crate::StackError> {
        if self.is_read_only() {
            return Err(crate::StackError::ReadOnly);
        }
        debug_assert!(!value.is_end());
        debug_assert!(self.flags.contains(ArrayFlags::VOIDS_LEGAL) || !value.is_void());
        self.cells.push(value);
        Ok(())
    }

    /// Inserts `values` at `index`, returning the index just past them.
    pub(crate) fn insert_slice(&mut self, index: usize, values: &[Value]) -> usize {
        assert!(
            index <= self.cells.len(),
            "insertion index {} past array length {}",
            index,
            self.cells.len()
        );
        self.cells.splice(index..index, values.iter().copied());
        index + values.len()
    }
}
