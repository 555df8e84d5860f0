//! Tagged value cells.
//!
//! Every slot of the data stack, of a chunk and of a managed array holds one
//! `Value`. Cells are `Copy` so they can live in raw chunk memory without
//! drop glue.
//!
//! Two variants are not values at all:
//!
//! - [`Value::End`] marks the boundary of a sequence (the tail of the data
//!   stack, the cell after the top chunk's arguments).
//! - [`Value::Trash`] is a placeholder for a slot that holds nothing
//!   meaningful yet. It is safe for the collector to see, but reading it as a
//!   value is a bug.

use crate::heap::{ArrayId, ContextId};
use crate::symbol::Symbol;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Sequence terminator. Never a user value.
    End,
    /// Unreadable placeholder for uninitialized or discarded slots.
    Trash,
    /// The user-visible "no value".
    Void,
    Blank,
    Logic(bool),
    Integer(i64),
    Decimal(f64),
    Word(Word),
    /// A managed array.
    Block(ArrayId),
    /// A reified frame context.
    Frame(ContextId),
}

/// A symbol together with the context slot it refers to, if bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Word {
    pub symbol: Symbol,
    pub binding: Option<ContextId>,
    /// 1-based slot in the bound context (0 when unbound).
    pub index: u32,
}

impl Value {
    pub fn unbound_word(symbol: Symbol) -> Self {
        Value::Word(Word {
            symbol,
            binding: None,
            index: 0,
        })
    }

    pub fn bound_word(symbol: Symbol, context: ContextId, index: u32) -> Self {
        Value::Word(Word {
            symbol,
            binding: Some(context),
            index,
        })
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        matches!(self, Value::End)
    }

    #[inline]
    pub fn is_trash(&self) -> bool {
        matches!(self, Value::Trash)
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Returns `true` for anything other than the two internal markers.
    #[inline]
    pub fn is_readable(&self) -> bool {
        !matches!(self, Value::End | Value::Trash)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_context(&self) -> Option<ContextId> {
        match self {
            Value::Frame(ctx) => Some(*ctx),
            _ => None,
        }
    }

    pub fn as_word(&self) -> Option<&Word> {
        match self {
            Value::Word(word) => Some(word),
            _ => None,
        }
    }
}
