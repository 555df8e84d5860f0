use proptest::prelude::*;
use renstack_core::array::ArrayFlags;
use renstack_core::data_stack::DataStack;
use renstack_core::function::{Function, FunctionClass, KeyList};
use renstack_core::frame::FrameId;
use renstack_core::symbol::SymbolTable;
use renstack_core::{StackError, StackOptions, Stacks, Value};
use std::rc::Rc;

#[derive(Debug, Clone)]
enum StackOp {
    Push(i64),
    Pop,
    DropTo(usize),
}

fn arb_stack_op() -> impl Strategy<Value = StackOp> {
    prop_oneof![
        4 => any::<i64>().prop_map(StackOp::Push),
        2 => Just(StackOp::Pop),
        1 => (0usize..64).prop_map(StackOp::DropTo),
    ]
}

#[derive(Debug, Clone)]
enum CallOp {
    /// Enter a function of the given arity, optionally reifying its frame.
    Call { arity: usize, native: bool, reify: bool },
    Group,
    Return,
    Collect,
}

fn arb_call_op() -> impl Strategy<Value = CallOp> {
    prop_oneof![
        4 => (0usize..12, any::<bool>(), any::<bool>())
            .prop_map(|(arity, native, reify)| CallOp::Call { arity, native, reify }),
        1 => Just(CallOp::Group),
        4 => Just(CallOp::Return),
        1 => Just(CallOp::Collect),
    ]
}

fn ints(values: &[Value]) -> Vec<i64> {
    values.iter().filter_map(Value::as_integer).collect()
}

proptest! {
    #[test]
    fn data_stack_matches_model(ops in prop::collection::vec(arb_stack_op(), 0..200)) {
        let mut stack = DataStack::new(4, 3, 1000).unwrap();
        let mut model: Vec<i64> = Vec::new();

        for op in ops {
            match op {
                StackOp::Push(value) => {
                    stack.push(Value::Integer(value)).unwrap();
                    model.push(value);
                }
                StackOp::Pop => {
                    if let Some(expected) = model.pop() {
                        prop_assert_eq!(stack.pop(), Value::Integer(expected));
                    }
                }
                StackOp::DropTo(dsp) => {
                    let dsp = dsp.min(model.len());
                    stack.drop_to(dsp);
                    model.truncate(dsp);
                }
            }
            prop_assert_eq!(stack.dsp(), model.len());
            prop_assert_eq!(ints(stack.live()), model.clone());
        }
    }

    #[test]
    fn collected_arrays_match_pushed_values(
        below in prop::collection::vec(any::<i64>(), 0..10),
        above in prop::collection::vec(any::<i64>(), 0..300),
    ) {
        let mut stack = DataStack::new(2, 16, 10_000).unwrap();
        for value in &below {
            stack.push(Value::Integer(*value)).unwrap();
        }
        let mark = stack.dsp();
        for value in &above {
            stack.push(Value::Integer(*value)).unwrap();
        }

        let forward = stack.pop_values(mark, ArrayFlags::empty());
        prop_assert_eq!(stack.dsp(), mark);
        prop_assert_eq!(ints(forward.as_slice()), above.clone());

        for value in &above {
            stack.push(Value::Integer(*value)).unwrap();
        }
        let reversed = stack.pop_values_reversed(mark);
        let mut expected = above.clone();
        expected.reverse();
        prop_assert_eq!(ints(reversed.as_slice()), expected);
        prop_assert_eq!(ints(stack.live()), below);
    }

    #[test]
    fn overflow_commits_nothing(limit in 8usize..200, basis in 1usize..32) {
        let mut stack = DataStack::new(1, basis, limit).unwrap();
        let mut pushed = 0;
        let err = loop {
            match stack.push(Value::Integer(pushed)) {
                Ok(()) => pushed += 1,
                Err(err) => break err,
            }
        };
        let StackError::StackOverflow { requested, limit: reported } = err else {
            return Err(TestCaseError::fail(format!("unexpected error {err:?}")));
        };
        prop_assert_eq!(reported, limit);
        prop_assert!(requested > limit);
        prop_assert_eq!(stack.dsp(), pushed as usize);
        prop_assert!(stack.capacity() < limit);
        prop_assert_eq!(stack.top().as_integer(), Some(pushed - 1));
    }

    #[test]
    fn chunk_releases_follow_call_nesting(
        ops in prop::collection::vec(arb_call_op(), 0..150),
        chunker_size in 256usize..2048,
    ) {
        let mut symbols = SymbolTable::new();
        let mut stacks = Stacks::startup(StackOptions {
            initial_data_stack_size: 8,
            chunker_size,
            ..StackOptions::default()
        })
        .unwrap();
        let mut running: Vec<(FrameId, Vec<i64>)> = Vec::new();

        for op in ops {
            match op {
                CallOp::Call { arity, native, reify } => {
                    let params: KeyList = (0..arity)
                        .map(|i| symbols.intern(&format!("arg{i}")))
                        .collect();
                    let class = if native { FunctionClass::Native } else { FunctionClass::User };
                    let frame = stacks
                        .push_function_frame(Function::new(None, params, class), None)
                        .unwrap();
                    let args: Vec<i64> = (0..arity as i64).map(|i| i * 7 + running.len() as i64).collect();
                    for (i, value) in args.iter().enumerate() {
                        stacks.set_arg(frame, i + 1, Value::Integer(*value)).unwrap();
                    }
                    stacks.finish_fulfilling(frame).unwrap();
                    if reify {
                        let context = stacks.reify(frame).unwrap();
                        prop_assert_eq!(stacks.reify(frame).unwrap(), context);
                        prop_assert_eq!(ints(stacks.context_vars(context).unwrap()), args.clone());
                    }
                    running.push((frame, args));
                }
                CallOp::Group => running.push((stacks.push_group_frame(), Vec::new())),
                CallOp::Return => {
                    if let Some((frame, args)) = running.pop() {
                        for (i, value) in args.iter().enumerate() {
                            prop_assert_eq!(stacks.arg(frame, i + 1).unwrap(), &Value::Integer(*value));
                        }
                        stacks.pop_frame(frame).unwrap();
                    }
                }
                CallOp::Collect => {
                    stacks.collect_garbage();
                }
            }

            let functions = stacks
                .frames()
                .filter(|frame| frame.kind == renstack_core::frame::FrameKind::Function)
                .count();
            prop_assert_eq!(stacks.arena().depth(), functions);
            prop_assert!(stacks.arena().is_terminated());
            prop_assert!(stacks.arena().spare_count() <= 1);
        }

        while let Some((frame, _)) = running.pop() {
            stacks.pop_frame(frame).unwrap();
        }
        stacks.collect_garbage();
        prop_assert!(stacks.heap().is_empty());
        stacks.shutdown();
    }
}

#[test]
fn reify_keys_are_shared_between_frames() {
    let mut symbols = SymbolTable::new();
    let mut stacks = Stacks::startup(StackOptions::default()).unwrap();
    let params: KeyList = ["a", "b"].iter().map(|name| symbols.intern(name)).collect();
    let f = Function::new(None, params, FunctionClass::User);

    let outer = stacks.push_function_frame(f.clone(), None).unwrap();
    let inner = stacks.push_function_frame(f.clone(), None).unwrap();
    let inner_ctx = stacks.reify(inner).unwrap();
    let outer_ctx = stacks.reify(outer).unwrap();

    let heap = stacks.heap();
    let inner_keys = heap.context(inner_ctx).unwrap().keys();
    let outer_keys = heap.context(outer_ctx).unwrap().keys();
    assert!(Rc::ptr_eq(inner_keys, outer_keys));
    assert!(Rc::ptr_eq(inner_keys, f.params()));

    stacks.pop_frame(inner).unwrap();
    stacks.pop_frame(outer).unwrap();
    stacks.shutdown();
}
