//! Errors raised by the execution stacks.
//!
//! # Error Categories
//!
//! - **Resource exceeded errors**: the data stack or the chunk arena would
//!   grow past its configured limit. These are catchable at the interpreter
//!   level; the evaluator unwinds to its nearest [`StackMark`] and reports.
//!
//! - **Usage errors**: operations on handles that are no longer valid, or
//!   writes into storage that is currently held.
//!
//! Raw allocation failure is not represented here. It is fatal and goes
//! through `handle_alloc_error`. Internal misuse (releasing a chunk that is
//! not the top, popping past the data stack base) is an assertion.
//!
//! [`StackMark`]: crate::stacks::StackMark

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// Growing the data stack would exceed its cell limit.
    #[error("Data stack overflow: {requested} cells requested, limit is {limit}")]
    StackOverflow { requested: usize, limit: usize },

    /// Allocating another chunker would exceed the arena byte limit.
    #[error("Chunk stack overflow: {requested} bytes requested, limit is {limit}")]
    ArenaOverflow { requested: usize, limit: usize },

    /// A plain push was given the "no value" cell.
    #[error("Cannot push a void value onto the data stack")]
    AbsentValue,

    /// The target series is held by running native code or protected.
    #[error("Series is read-only")]
    ReadOnly,

    /// The frame handle no longer refers to a frame on the frame stack.
    #[error("Frame is no longer running")]
    StaleFrame,

    /// The context handle refers to an object that has been collected.
    #[error("Context is no longer available")]
    StaleContext,

    #[error("Argument {index} out of range (frame has {len} arguments)")]
    ArgumentOutOfRange { index: usize, len: usize },

    /// No running function frame exists at the requested level.
    #[error("No running function frame at level {level}")]
    NoSuchLevel { level: usize },
}

impl StackError {
    /// Returns `true` for the overflow errors, which signal resource
    /// exhaustion rather than misuse.
    pub fn is_resource_exceeded(&self) -> bool {
        matches!(
            self,
            StackError::StackOverflow { .. } | StackError::ArenaOverflow { .. }
        )
    }
}
