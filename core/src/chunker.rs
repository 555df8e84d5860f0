//! Chunk stack: LIFO allocation of argument cells out of large blocks.
//!
//! A *chunker* is one raw allocation: a small header followed by a payload.
//! Chunkers form a singly linked list through their `next` field. The
//! payload is carved into *chunks*, each a header followed by value cells and
//! one `End` terminator cell. Chunks are pushed and dropped in strict LIFO
//! order, which is what lets a call's arguments be allocated without touching
//! the general allocator.
//!
//! ```text
//!   root chunker                          spare chunker
//!  +--------+------+-------+-------+     +--------+---------------+
//!  | header | base | chunk | chunk | --> | header |   (unused)    |
//!  +--------+------+-------+-------+     +--------+---------------+
//!                              ^ top
//! ```
//!
//! The root chunker lives from startup to shutdown and holds a zero-length
//! base chunk, so acquiring and releasing never special-case an empty stack.
//! At most one chunker past the current one is kept around as headroom; a
//! call pattern that repeatedly crosses a chunker boundary then reuses the
//! same block instead of allocating and freeing it each time.
//!
//! Chunks never move once acquired. The [`Chunk`] handle is move-only and is
//! consumed by [`ChunkerArena::release`], so a released chunk cannot be read
//! and only the holder of the top chunk can release it.

use alloc::alloc::{Layout, alloc, dealloc, handle_alloc_error};
use core::{
    fmt,
    marker::PhantomData,
    mem::{align_of, size_of},
    ptr::{self, NonNull},
    sync::atomic::{AtomicU32, Ordering},
};

use static_assertions::assert_not_impl_any;
use tracing::{debug, trace, warn};

use crate::{StackError, Value};

/// Byte written over fresh chunker payloads in debug builds.
const POISON: u8 = 0xBD;

#[repr(C)]
struct ChunkerHeader {
    next: Option<NonNull<ChunkerHeader>>,
    /// Payload bytes following the header.
    capacity: usize,
}

#[repr(C)]
struct ChunkHeader {
    prev: Option<NonNull<ChunkHeader>>,
    /// Start of this chunk relative to its chunker's payload.
    offset: usize,
    /// Bytes taken by this chunk, header and terminator included.
    size: usize,
    /// Number of value cells, terminator excluded.
    len: usize,
}

const fn max(a: usize, b: usize) -> usize {
    if a > b { a } else { b }
}

const fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

const CHUNK_ALIGN: usize = max(align_of::<ChunkHeader>(), align_of::<Value>());
const CELLS_OFFSET: usize = round_up(size_of::<ChunkHeader>(), align_of::<Value>());
const CHUNKER_ALIGN: usize = max(align_of::<ChunkerHeader>(), CHUNK_ALIGN);
const PAYLOAD_OFFSET: usize = round_up(size_of::<ChunkerHeader>(), CHUNK_ALIGN);

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

/// Bytes needed for a chunk of `len` cells, or `None` on arithmetic overflow.
fn chunk_size(len: usize) -> Option<usize> {
    let cells = len.checked_add(1)?.checked_mul(size_of::<Value>())?;
    let size = CELLS_OFFSET.checked_add(cells)?;
    size.checked_add(CHUNK_ALIGN - 1).map(|n| n & !(CHUNK_ALIGN - 1))
}

fn chunker_layout(capacity: usize) -> Layout {
    Layout::from_size_align(PAYLOAD_OFFSET + capacity, CHUNKER_ALIGN).expect("chunker too large")
}

/// # Safety
///
/// `chunker` must point to a live chunker.
unsafe fn payload(chunker: NonNull<ChunkerHeader>) -> *mut u8 {
    unsafe { chunker.as_ptr().cast::<u8>().add(PAYLOAD_OFFSET) }
}

/// # Safety
///
/// `chunk` must point to a live chunk header.
unsafe fn cells(chunk: NonNull<ChunkHeader>) -> *mut Value {
    unsafe { chunk.as_ptr().cast::<u8>().add(CELLS_OFFSET).cast::<Value>() }
}

/// # Safety
///
/// `chunk` must point to a live chunk header.
unsafe fn chunker_of(chunk: NonNull<ChunkHeader>) -> NonNull<ChunkerHeader> {
    unsafe {
        let offset = chunk.as_ref().offset;
        let base = chunk.as_ptr().cast::<u8>().sub(offset).sub(PAYLOAD_OFFSET);
        NonNull::new_unchecked(base.cast::<ChunkerHeader>())
    }
}

fn alloc_chunker(capacity: usize) -> NonNull<ChunkerHeader> {
    let layout = chunker_layout(capacity);
    let raw = unsafe { alloc(layout) }.cast::<ChunkerHeader>();
    let Some(chunker) = NonNull::new(raw) else {
        handle_alloc_error(layout)
    };
    unsafe {
        chunker.as_ptr().write(ChunkerHeader {
            next: None,
            capacity,
        });
        if cfg!(debug_assertions) {
            ptr::write_bytes(payload(chunker), POISON, capacity);
        }
    }
    chunker
}

/// # Safety
///
/// `chunker` must have come from `alloc_chunker` and not be referenced again.
unsafe fn free_chunker(chunker: NonNull<ChunkerHeader>) {
    unsafe {
        let capacity = chunker.as_ref().capacity;
        dealloc(chunker.as_ptr().cast::<u8>(), chunker_layout(capacity));
    }
}

/// Handle to one acquired chunk.
///
/// Not `Clone`: it is given up to [`ChunkerArena::release`].
#[derive(Debug)]
pub struct Chunk {
    ptr: NonNull<ChunkHeader>,
    len: usize,
    arena: u32,
}

assert_not_impl_any!(Chunk: Clone, Copy, Send, Sync);

impl Chunk {
    /// Number of value cells in the chunk.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Diagnostic view of one chunker in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerInfo {
    /// Payload bytes.
    pub capacity: usize,
    /// Whether the top chunk lives in this chunker.
    pub is_current: bool,
}

/// The chunk stack allocator.
pub struct ChunkerArena {
    id: u32,
    root: NonNull<ChunkerHeader>,
    /// Chunker holding `top`.
    current: NonNull<ChunkerHeader>,
    top: NonNull<ChunkHeader>,
    chunker_size: usize,
    limit: usize,
    /// Bytes of all chunkers currently allocated, headers included.
    allocated: usize,
    /// Chunks acquired and not yet released, base chunk excluded.
    depth: usize,
}

impl ChunkerArena {
    /// Creates the arena with its root chunker and base chunk.
    ///
    /// `chunker_size` is the default size of a chunker in bytes, header
    /// included. `limit` bounds the total bytes of chunkers held at once.
    pub fn new(chunker_size: usize, limit: usize) -> Self {
        let base_size = chunk_size(0).expect("base chunk size");
        let capacity = max(chunker_size.saturating_sub(PAYLOAD_OFFSET), base_size);
        let root = alloc_chunker(capacity);

        let base = unsafe {
            let base = NonNull::new_unchecked(payload(root).cast::<ChunkHeader>());
            base.as_ptr().write(ChunkHeader {
                prev: None,
                offset: 0,
                size: base_size,
                len: 0,
            });
            cells(base).write(Value::End);
            base
        };

        debug!(capacity, "chunk stack started");

        Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            root,
            current: root,
            top: base,
            chunker_size,
            limit,
            allocated: PAYLOAD_OFFSET + capacity,
            depth: 0,
        }
    }

    /// Acquires a chunk of `len` cells on top of the stack.
    ///
    /// Cells start out as [`Value::Trash`] and are followed by an `End`
    /// terminator.
    pub fn acquire(&mut self, len: usize) -> Result<Chunk, StackError> {
        let size = chunk_size(len).ok_or(StackError::ArenaOverflow {
            requested: usize::MAX,
            limit: self.limit,
        })?;

        let (chunker, offset) = unsafe {
            let top = self.top.as_ref();
            let offset = top.offset + top.size;
            let fits = offset
                .checked_add(size)
                .is_some_and(|end| end <= self.current.as_ref().capacity);
            if fits {
                (self.current, offset)
            } else {
                (self.advance(size)?, 0)
            }
        };

        let ptr = unsafe {
            let ptr = NonNull::new_unchecked(payload(chunker).add(offset).cast::<ChunkHeader>());
            ptr.as_ptr().write(ChunkHeader {
                prev: Some(self.top),
                offset,
                size,
                len,
            });
            let values = cells(ptr);
            for i in 0..len {
                values.add(i).write(Value::Trash);
            }
            values.add(len).write(Value::End);
            ptr
        };

        self.current = chunker;
        self.top = ptr;
        self.depth += 1;
        trace!(len, offset, depth = self.depth, "chunk acquired");

        Ok(Chunk {
            ptr,
            len,
            arena: self.id,
        })
    }

    /// Finds room for a chunk of `size` bytes past the current chunker,
    /// reusing the spare when it is big enough.
    fn advance(&mut self, size: usize) -> Result<NonNull<ChunkerHeader>, StackError> {
        unsafe {
            let spare = self.current.as_ref().next;
            if let Some(spare) = spare {
                if spare.as_ref().capacity >= size {
                    return Ok(spare);
                }
            }

            let default_capacity = self.chunker_size.saturating_sub(PAYLOAD_OFFSET);
            let capacity = max(default_capacity, size);
            let total = PAYLOAD_OFFSET
                .checked_add(capacity)
                .ok_or(StackError::ArenaOverflow {
                    requested: usize::MAX,
                    limit: self.limit,
                })?;
            let freed = spare.map_or(0, |spare| PAYLOAD_OFFSET + spare.as_ref().capacity);
            let requested = self
                .allocated
                .checked_sub(freed)
                .and_then(|n| n.checked_add(total))
                .unwrap_or(usize::MAX);
            // Layouts cannot exceed isize::MAX bytes.
            if requested > self.limit || total > isize::MAX as usize {
                warn!(requested, limit = self.limit, "chunk stack overflow");
                return Err(StackError::ArenaOverflow {
                    requested,
                    limit: self.limit,
                });
            }

            if let Some(spare) = spare {
                debug_assert!(spare.as_ref().next.is_none());
                debug!(capacity = spare.as_ref().capacity, "freeing undersized spare chunker");
                free_chunker(spare);
                self.allocated -= freed;
            }

            let chunker = alloc_chunker(capacity);
            (*self.current.as_ptr()).next = Some(chunker);
            self.allocated += total;
            debug!(capacity, allocated = self.allocated, "chunker allocated");
            Ok(chunker)
        }
    }

    /// Releases the top chunk.
    ///
    /// # Panics
    ///
    /// Panics if `chunk` is not the current top of this arena.
    pub fn release(&mut self, chunk: Chunk) {
        assert_eq!(chunk.arena, self.id, "chunk released into a foreign arena");
        assert!(
            chunk.ptr == self.top,
            "chunk released out of order: only the top chunk may be released"
        );

        unsafe {
            let header = chunk.ptr.as_ref();
            let prev = header.prev.expect("the base chunk is never released");

            if header.offset == 0 {
                // First chunk in its chunker: the chunker becomes the spare,
                // and any spare beyond it goes.
                let emptied = self.current;
                if let Some(spare) = emptied.as_ref().next {
                    debug_assert!(spare.as_ref().next.is_none());
                    let bytes = PAYLOAD_OFFSET + spare.as_ref().capacity;
                    free_chunker(spare);
                    self.allocated -= bytes;
                    (*emptied.as_ptr()).next = None;
                    debug!(bytes, "spare chunker freed");
                }
                self.current = chunker_of(prev);
            }

            let prev_header = prev.as_ref();
            cells(prev).add(prev_header.len).write(Value::End);
            self.top = prev;
        }

        self.depth -= 1;
        trace!(depth = self.depth, "chunk released");
    }

    /// The cells of an acquired chunk.
    pub fn values(&self, chunk: &Chunk) -> &[Value] {
        assert_eq!(chunk.arena, self.id, "chunk belongs to a foreign arena");
        unsafe { core::slice::from_raw_parts(cells(chunk.ptr), chunk.len) }
    }

    /// The cells of an acquired chunk, mutably.
    pub fn values_mut(&mut self, chunk: &Chunk) -> &mut [Value] {
        assert_eq!(chunk.arena, self.id, "chunk belongs to a foreign arena");
        unsafe { core::slice::from_raw_parts_mut(cells(chunk.ptr), chunk.len) }
    }

    /// Whether `chunk` is the current top.
    pub fn is_top(&self, chunk: &Chunk) -> bool {
        chunk.arena == self.id && chunk.ptr == self.top
    }

    /// Whether the cell after the top chunk's values is the `End` terminator.
    pub fn is_terminated(&self) -> bool {
        unsafe {
            let len = self.top.as_ref().len;
            (*cells(self.top).add(len)).is_end()
        }
    }

    /// Number of chunks acquired and not yet released.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Bytes of chunker memory currently allocated.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Walks the chunker list from the root.
    pub fn chunkers(&self) -> Chunkers<'_> {
        Chunkers {
            next: Some(self.root),
            current: self.current,
            _marker: PhantomData,
        }
    }

    /// Number of chunkers linked after the current one.
    pub fn spare_count(&self) -> usize {
        self.chunkers()
            .skip_while(|info| !info.is_current)
            .skip(1)
            .count()
    }
}

impl Drop for ChunkerArena {
    fn drop(&mut self) {
        let mut next = Some(self.root);
        while let Some(chunker) = next {
            unsafe {
                next = chunker.as_ref().next;
                free_chunker(chunker);
            }
        }
    }
}

impl fmt::Debug for ChunkerArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkerArena")
            .field("depth", &self.depth)
            .field("chunkers", &self.chunkers().count())
            .field("allocated", &self.allocated)
            .field("limit", &self.limit)
            .finish()
    }
}

/// Iterator over the chunker list, see [`ChunkerArena::chunkers`].
pub struct Chunkers<'a> {
    next: Option<NonNull<ChunkerHeader>>,
    current: NonNull<ChunkerHeader>,
    _marker: PhantomData<&'a ChunkerArena>,
}

impl Iterator for Chunkers<'_> {
    type Item = ChunkerInfo;

    fn next(&mut self) -> Option<ChunkerInfo> {
        let chunker = self.next?;
        let header = unsafe { chunker.as_ref() };
        self.next = header.next;
        Some(ChunkerInfo {
            capacity: header.capacity,
            is_current: chunker == self.current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vec;
    use pretty_assertions::assert_eq;

    fn cells_per_chunker(chunker_size: usize) -> usize {
        (chunker_size - PAYLOAD_OFFSET - CELLS_OFFSET) / size_of::<Value>() - 1
    }

    #[test]
    fn test_new_arena() {
        let arena = ChunkerArena::new(4096, 1 << 20);
        assert_eq!(arena.depth(), 0);
        assert_eq!(arena.chunkers().count(), 1);
        assert_eq!(arena.spare_count(), 0);
        assert!(arena.is_terminated());
    }

    #[test]
    fn test_acquire_release() {
        let mut arena = ChunkerArena::new(4096, 1 << 20);
        let chunk = arena.acquire(3).unwrap();
        assert_eq!(chunk.len(), 3);
        assert!(arena.values(&chunk).iter().all(Value::is_trash));
        assert!(arena.is_terminated());

        arena.values_mut(&chunk)[1] = Value::Integer(10);
        let inner = arena.acquire(2).unwrap();
        assert!(arena.is_top(&inner));
        assert!(!arena.is_top(&chunk));
        arena.release(inner);

        assert!(arena.is_top(&chunk));
        assert_eq!(arena.values(&chunk)[1], Value::Integer(10));
        assert!(arena.is_terminated());

        arena.values_mut(&chunk)[2] = Value::Blank;
        arena.release(chunk);
        assert_eq!(arena.depth(), 0);
        assert!(arena.is_terminated());
    }

    #[test]
    fn test_zero_length_chunk() {
        let mut arena = ChunkerArena::new(4096, 1 << 20);
        let chunk = arena.acquire(0).unwrap();
        assert!(chunk.is_empty());
        assert!(arena.is_terminated());
        arena.release(chunk);
    }

    #[test]
    fn test_overflowing_chunker_links_a_second_one() {
        let mut arena = ChunkerArena::new(512, 1 << 20);
        let per_chunker = cells_per_chunker(512);

        let first = arena.acquire(per_chunker / 2).unwrap();
        let second = arena.acquire(per_chunker / 2).unwrap();
        assert_eq!(arena.chunkers().count(), 2);
        let infos: Vec<_> = arena.chunkers().collect();
        assert!(!infos[0].is_current);
        assert!(infos[1].is_current);

        arena.release(second);
        assert_eq!(arena.chunkers().count(), 2);
        assert_eq!(arena.spare_count(), 1);
        arena.release(first);
        assert_eq!(arena.chunkers().count(), 2);
        assert_eq!(arena.spare_count(), 1);
    }

    #[test]
    fn test_spare_is_reused() {
        let mut arena = ChunkerArena::new(512, 1 << 20);
        let per_chunker = cells_per_chunker(512);

        let filler = arena.acquire(per_chunker - 4).unwrap();
        for _ in 0..10 {
            let chunk = arena.acquire(8).unwrap();
            assert_eq!(arena.chunkers().count(), 2);
            arena.release(chunk);
        }
        let allocated = arena.allocated_bytes();
        let chunk = arena.acquire(8).unwrap();
        assert_eq!(arena.allocated_bytes(), allocated);
        arena.release(chunk);
        arena.release(filler);
    }

    #[test]
    fn test_at_most_one_spare_retained() {
        let mut arena = ChunkerArena::new(512, 1 << 20);
        let per_chunker = cells_per_chunker(512);

        let mut chunks = Vec::new();
        for _ in 0..4 {
            chunks.push(arena.acquire(per_chunker).unwrap());
        }
        assert_eq!(arena.chunkers().count(), 5);

        while let Some(chunk) = chunks.pop() {
            arena.release(chunk);
            assert!(arena.spare_count() <= 1);
        }
        assert_eq!(arena.chunkers().count(), 2);
        assert_eq!(arena.spare_count(), 1);
    }

    #[test]
    fn test_oversized_request_gets_its_own_chunker() {
        let mut arena = ChunkerArena::new(512, 1 << 20);
        let big = arena.acquire(1000).unwrap();
        let infos: Vec<_> = arena.chunkers().collect();
        assert_eq!(infos.len(), 2);
        assert!(infos[1].capacity >= 1000 * size_of::<Value>());
        arena.release(big);

        // Undersized spare is replaced rather than reused.
        let bigger = arena.acquire(2000).unwrap();
        assert_eq!(arena.chunkers().count(), 2);
        assert!(arena.chunkers().nth(1).unwrap().capacity >= 2000 * size_of::<Value>());
        arena.release(bigger);
    }

    #[test]
    fn test_arena_limit() {
        let mut arena = ChunkerArena::new(512, 1024);
        let per_chunker = cells_per_chunker(512);
        let first = arena.acquire(per_chunker).unwrap();
        let err = arena.acquire(per_chunker).unwrap_err();
        assert!(matches!(err, StackError::ArenaOverflow { limit: 1024, .. }));
        assert_eq!(arena.depth(), 1);
        assert!(arena.is_top(&first));
        arena.release(first);
    }

    #[test]
    fn test_huge_request_is_an_overflow() {
        let mut arena = ChunkerArena::new(4096, usize::MAX);
        let chunk = arena.acquire(20).unwrap();
        let allocated = arena.allocated_bytes();

        let err = arena
            .acquire(usize::MAX / size_of::<Value>() - 8)
            .unwrap_err();
        assert!(matches!(err, StackError::ArenaOverflow { .. }));
        assert_eq!(arena.depth(), 1);
        assert_eq!(arena.allocated_bytes(), allocated);
        assert!(arena.is_top(&chunk));
        assert!(arena.is_terminated());
        arena.release(chunk);

        let err = arena.acquire(usize::MAX).unwrap_err();
        assert!(matches!(err, StackError::ArenaOverflow { .. }));
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn test_release_out_of_order_panics() {
        let mut arena = ChunkerArena::new(4096, 1 << 20);
        let outer = arena.acquire(1).unwrap();
        let _inner = arena.acquire(1).unwrap();
        arena.release(outer);
    }

    #[test]
    #[should_panic(expected = "foreign arena")]
    fn test_release_into_foreign_arena_panics() {
        let mut a = ChunkerArena::new(4096, 1 << 20);
        let mut b = ChunkerArena::new(4096, 1 << 20);
        let chunk = a.acquire(1).unwrap();
        b.release(chunk);
    }
}
