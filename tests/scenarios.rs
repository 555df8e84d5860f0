//! End-to-end scenarios across the stacks.

use pretty_assertions::assert_eq;
use renstack::array::ArrayFlags;
use renstack::chunker::ChunkerArena;
use renstack::function::{Function, FunctionClass, KeyList};
use renstack::symbol::SymbolTable;
use renstack::{StackError, StackOptions, Stacks, Value};

fn ints(values: &[Value]) -> Vec<i64> {
    values.iter().filter_map(Value::as_integer).collect()
}

#[test]
fn collect_forward_and_reversed() {
    let mut stacks = Stacks::startup(StackOptions::default()).unwrap();
    let data = stacks.data_stack_mut();

    for value in [10, 20, 30] {
        data.push(Value::Integer(value)).unwrap();
    }
    let forward = data.pop_values(0, ArrayFlags::empty());
    assert_eq!(ints(forward.as_slice()), vec![10, 20, 30]);
    assert_eq!(data.dsp(), 0);

    for value in [10, 20, 30] {
        data.push(Value::Integer(value)).unwrap();
    }
    let reversed = data.pop_values_reversed(0);
    assert_eq!(ints(reversed.as_slice()), vec![30, 20, 10]);
    assert_eq!(data.dsp(), 0);

    stacks.shutdown();
}

#[test]
fn second_chunker_then_one_spare() {
    let chunker_size = 1024;
    let mut arena = ChunkerArena::new(chunker_size, 1 << 20);
    assert_eq!(arena.chunkers().count(), 1);

    let mut chunks = Vec::new();
    while arena.chunkers().count() == 1 {
        chunks.push(arena.acquire(4).unwrap());
    }

    // Slightly more than one chunker's worth: the root is still linked in
    // front of the new current chunker.
    let chunkers: Vec<_> = arena.chunkers().collect();
    assert_eq!(chunkers.len(), 2);
    assert!(!chunkers[0].is_current);
    assert!(chunkers[1].is_current);

    while let Some(chunk) = chunks.pop() {
        arena.release(chunk);
    }
    assert_eq!(arena.depth(), 0);
    assert!(arena.is_terminated());
    assert_eq!(arena.chunkers().count(), 2);
    assert_eq!(arena.spare_count(), 1);
}

#[test]
fn overflow_by_one_then_recover() {
    // Sentinel, 6 slots and the end marker fill the limit exactly.
    let mut stacks = Stacks::startup(StackOptions {
        initial_data_stack_size: 6,
        data_stack_expand_basis: 1,
        data_stack_limit: 8,
        ..StackOptions::default()
    })
    .unwrap();
    let mark = stacks.mark();

    for value in 0..6 {
        stacks.data_stack_mut().push(Value::Integer(value)).unwrap();
    }
    let err = stacks.data_stack_mut().push(Value::Integer(6)).unwrap_err();
    assert_eq!(
        err,
        StackError::StackOverflow {
            requested: 9,
            limit: 8
        }
    );
    assert_eq!(stacks.data_stack().dsp(), 6);
    assert_eq!(ints(stacks.data_stack().live()), vec![0, 1, 2, 3, 4, 5]);

    stacks.unwind_to(mark);
    assert_eq!(stacks.data_stack().dsp(), 0);
    stacks.data_stack_mut().push(Value::Integer(7)).unwrap();
    stacks.data_stack_mut().drop_to(0);
    stacks.shutdown();
}

#[test]
fn deep_recursion_hits_arena_limit() {
    let mut symbols = SymbolTable::new();
    let mut stacks = Stacks::startup(StackOptions {
        chunker_size: 1024,
        arena_limit: 16 * 1024,
        ..StackOptions::default()
    })
    .unwrap();
    let params: KeyList = (0..8).map(|i| symbols.intern(&format!("a{i}"))).collect();
    let f = Function::new(None, params, FunctionClass::User);

    let mark = stacks.mark();
    let err = loop {
        match stacks.push_function_frame(f.clone(), None) {
            Ok(frame) => stacks.finish_fulfilling(frame).unwrap(),
            Err(err) => break err,
        }
    };
    assert!(matches!(err, StackError::ArenaOverflow { limit, .. } if limit == 16 * 1024));
    assert!(stacks.arena().allocated_bytes() <= 16 * 1024);
    assert!(stacks.depth() > 0);

    stacks.unwind_to(mark);
    assert_eq!(stacks.arena().depth(), 0);
    assert!(stacks.arena().spare_count() <= 1);
    stacks.shutdown();
}

#[test]
fn closure_keeps_frame_after_return() {
    let mut symbols = SymbolTable::new();
    let mut stacks = Stacks::startup(StackOptions::default()).unwrap();
    let n = symbols.intern("n");
    let params: KeyList = [n].into_iter().collect();
    let make_counter = Function::new(Some(symbols.intern("make-counter")), params, FunctionClass::User);

    let frame = stacks.push_function_frame(make_counter, None).unwrap();
    stacks.set_arg(frame, 1, Value::Integer(5)).unwrap();
    stacks.finish_fulfilling(frame).unwrap();

    // The body builds a block holding a word bound to `n`, and returns it.
    let context = stacks.context_for_level(0).unwrap();
    let mark = stacks.data_stack().dsp();
    stacks
        .data_stack_mut()
        .push(Value::bound_word(n, context, 1))
        .unwrap();
    let body = stacks.pop_block(mark);
    let root = stacks.heap_mut().register_root(Value::Block(body));
    assert_eq!(stacks.pop_frame(frame), Ok(Some(context)));

    assert_eq!(stacks.collect_garbage(), 0);
    let word = *stacks.heap().array(body).unwrap().as_slice()[0]
        .as_word()
        .unwrap();
    assert_eq!(word.binding, Some(context));
    assert_eq!(
        stacks.context_vars(context).unwrap()[word.index as usize - 1],
        Value::Integer(5)
    );

    stacks.heap_mut().unregister_root(root);
    assert_eq!(stacks.collect_garbage(), 2);
    stacks.shutdown();
}
