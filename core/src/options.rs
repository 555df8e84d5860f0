//! Configuration options for the execution stacks.

/// Data stack increment used when a push runs into the end marker.
pub const STACK_EXPAND_BASIS: usize = 128;

/// Smallest useful data stack size.
pub const STACK_MIN: usize = 4000;

/// Hard limit on data stack cells, end marker included.
pub const STACK_LIMIT: usize = 400_000;

/// Size in bytes of a chunker, header included.
pub const CHUNKER_SIZE: usize = 4096;

/// Hard limit on bytes held by chunkers.
pub const ARENA_LIMIT: usize = 64 * 1024 * 1024;

/// Sizes and limits for a [`Stacks`](crate::stacks::Stacks) instance.
///
/// # Example
///
/// ```
/// use renstack_core::options::StackOptions;
///
/// let options = StackOptions {
///     data_stack_limit: 10_000,
///     ..StackOptions::default()
/// };
/// assert_eq!(options.initial_data_stack_size, 1000);
/// ```
#[derive(Debug, Clone)]
pub struct StackOptions {
    /// Number of cells the data stack is expanded to at startup.
    ///
    /// Default: 1000
    pub initial_data_stack_size: usize,

    /// Number of cells added when a push finds the stack full.
    ///
    /// Default: 128
    pub data_stack_expand_basis: usize,

    /// Maximum number of data stack cells, end marker included.
    ///
    /// Default: 400 000
    pub data_stack_limit: usize,

    /// Bytes per chunker, header included. Larger requests get a chunker of
    /// their own size.
    ///
    /// Default: 4096
    pub chunker_size: usize,

    /// Maximum total bytes of chunker memory.
    ///
    /// Default: 64 MiB
    pub arena_limit: usize,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            initial_data_stack_size: STACK_MIN / 4,
            data_stack_expand_basis: STACK_EXPAND_BASIS,
            data_stack_limit: STACK_LIMIT,
            chunker_size: CHUNKER_SIZE,
            arena_limit: ARENA_LIMIT,
        }
    }
}
