//! Renstack - execution stacks for a dynamic-language interpreter
//!
//! # Overview
//!
//! Everything an evaluator needs to run calls and hold intermediate results:
//!
//! - A chunk stack that hands out per-call argument storage in strict LIFO
//!   order
//! - A growable data stack addressed by index, so growth never invalidates
//!   what the evaluator holds on to
//! - A frame stack the collector can walk without touching the host stack
//! - Reification, which moves a running frame's arguments into the managed
//!   store once something needs them to outlive the call
//!
//! # Quick Start
//!
//! ```
//! use renstack::{StackOptions, Stacks, Value};
//! use renstack::function::{Function, FunctionClass, KeyList};
//! use renstack::symbol::SymbolTable;
//!
//! let mut symbols = SymbolTable::new();
//! let mut stacks = Stacks::startup(StackOptions::default()).unwrap();
//!
//! let params: KeyList = ["x", "y"].iter().map(|name| symbols.intern(name)).collect();
//! let add = Function::new(Some(symbols.intern("add")), params, FunctionClass::User);
//!
//! // Gather arguments into the frame's chunk.
//! let frame = stacks.push_function_frame(add, None).unwrap();
//! stacks.set_arg(frame, 1, Value::Integer(1)).unwrap();
//! stacks.set_arg(frame, 2, Value::Integer(2)).unwrap();
//! stacks.finish_fulfilling(frame).unwrap();
//!
//! // Something wants the frame as a value: move it to the managed store.
//! let context = stacks.reify(frame).unwrap();
//! assert_eq!(stacks.context_vars(context).unwrap(), &[Value::Integer(1), Value::Integer(2)]);
//!
//! stacks.pop_frame(frame).unwrap();
//! stacks.shutdown();
//! ```
//!
//! # Error Recovery
//!
//! Overflow of either stack is reported as a [`StackError`]. The evaluator
//! is expected to unwind to a [`StackMark`] it took earlier:
//!
//! ```
//! use renstack::{StackOptions, Stacks, Value};
//!
//! let mut stacks = Stacks::startup(StackOptions {
//!     initial_data_stack_size: 8,
//!     data_stack_expand_basis: 8,
//!     data_stack_limit: 64,
//!     ..StackOptions::default()
//! })
//! .unwrap();
//!
//! let mark = stacks.mark();
//! let err = loop {
//!     if let Err(err) = stacks.data_stack_mut().push(Value::Blank) {
//!         break err;
//!     }
//! };
//! assert!(err.is_resource_exceeded());
//!
//! stacks.unwind_to(mark);
//! stacks.shutdown();
//! ```

// Re-export public API from renstack_core
pub use renstack_core::{StackError, StackMark, StackOptions, Stacks, Value};

// Re-export the building blocks
pub use renstack_core::{
    array, chunker, data_stack, error, frame, function, heap, options, symbol, value,
};
