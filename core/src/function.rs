//! Function descriptors as seen by the frame machinery.
//!
//! A function here is only what frames and contexts need: a name for
//! diagnostics, a parameter list to size the argument chunk and key the
//! reified context, and whether it is implemented natively.

use crate::{Rc, symbol::Symbol};
use smallvec::SmallVec;

/// Parameter names of a function, in slot order.
///
/// Shared by reference between the function and every context reified from
/// its frames.
pub type KeyList = SmallVec<[Symbol; 8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionClass {
    /// Implemented in Rust. Native code may keep references into argument
    /// cells while it runs, so their contexts are held.
    Native,
    /// Implemented in the interpreted language.
    User,
}

#[derive(Debug)]
pub struct Function {
    pub name: Option<Symbol>,
    params: Rc<KeyList>,
    pub class: FunctionClass,
}

impl Function {
    pub fn new(name: Option<Symbol>, params: KeyList, class: FunctionClass) -> Rc<Self> {
        Rc::new(Self {
            name,
            params: Rc::new(params),
            class,
        })
    }

    pub fn params(&self) -> &Rc<KeyList> {
        &self.params
    }

    /// Number of argument cells a frame for this function needs.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_native(&self) -> bool {
        self.class == FunctionClass::Native
    }
}
