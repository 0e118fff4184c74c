//! Tests for the reference evaluator used to fold and check lowered graphs.

mod common;

use cflow::error::InterpError;
use cflow::interp::{broadcast_dims, cast, fold_value, run_graph, stack};
use cflow::ir::{Attr, DType, Graph, NodeBuilder, Tensor, LOOP_BODY};
use common::*;

// ---------------------------------------------------------------------------
// 1. Kernels
// ---------------------------------------------------------------------------

#[test]
fn test_broadcast_dims() {
    assert_eq!(broadcast_dims(&[2, 1], &[3]), Some(vec![2, 3]));
    assert_eq!(broadcast_dims(&[], &[4]), Some(vec![4]));
    assert_eq!(broadcast_dims(&[2], &[3]), None);
}

#[test]
fn test_cast_float_to_int() {
    let t = cast(&Tensor::vec_f32(vec![3.7, -2.5]), DType::I32).expect("cast");
    assert_eq!(t, Tensor::vec_i32(vec![3, -2]));
    let nan = cast(&Tensor::scalar_f32(f32::NAN), DType::I64).expect("cast");
    assert_eq!(nan, Tensor::scalar_i64(i64::MIN));
}

#[test]
fn test_broadcasting_add() {
    let mut g = Graph::new("main");
    g.add_input("a", DType::F32, dims(&[2, 1])).expect("a");
    g.add_input("b", DType::F32, dims(&[3])).expect("b");
    let out = add(&mut g, NodeBuilder::new("Add", ["a", "b"]).named("sum"));
    g.add_output(&out[0], DType::F32, dims(&[2, 3]));

    let a = Tensor::vec_f32(vec![10.0, 20.0]).reshaped(vec![2, 1]).expect("reshape");
    let result = run(&g, &[("a", a), ("b", Tensor::vec_f32(vec![1.0, 2.0, 3.0]))]);
    let expected = Tensor::vec_f32(vec![11.0, 12.0, 13.0, 21.0, 22.0, 23.0]).reshaped(vec![2, 3]).expect("reshape");
    assert_eq!(result[0], expected);
}

#[test]
fn test_integer_division_by_zero() {
    let mut g = Graph::new("main");
    let a = constant(&mut g, "a", Tensor::scalar_i64(7));
    let b = constant(&mut g, "b", Tensor::scalar_i64(0));
    let out = add(&mut g, NodeBuilder::new("Div", [a.as_str(), b.as_str()]).named("q"));
    g.add_output(&out[0], DType::I64, scalar());
    let err = run_graph(&g, &[]).unwrap_err();
    assert!(matches!(err, InterpError::DivisionByZero { .. }), "got {err}");
}

#[test]
fn test_unsupported_op() {
    let mut g = Graph::new("main");
    g.add_input("x", DType::F32, scalar()).expect("x");
    let out = add(&mut g, NodeBuilder::new("Conv", ["x"]).named("conv"));
    g.add_output(&out[0], DType::F32, scalar());
    let err = run_graph(&g, &[("x", Tensor::scalar_f32(1.0))]).unwrap_err();
    assert!(matches!(err, InterpError::Unsupported { .. }), "got {err}");
}

// ---------------------------------------------------------------------------
// 2. Folding
// ---------------------------------------------------------------------------

#[test]
fn test_fold_constant_expression() {
    let mut g = Graph::new("main");
    let a = constant(&mut g, "a", Tensor::scalar_i64(6));
    let b = constant(&mut g, "b", Tensor::scalar_i64(7));
    let out = add(&mut g, NodeBuilder::new("Mul", [a.as_str(), b.as_str()]).named("m"));
    assert_eq!(fold_value(&g, &out[0]).expect("fold"), Tensor::scalar_i64(42));
}

#[test]
fn test_fold_of_input_dependent_value_fails() {
    let mut g = Graph::new("main");
    g.add_input("x", DType::I64, scalar()).expect("x");
    let one = constant(&mut g, "one", Tensor::scalar_i64(1));
    let out = add(&mut g, NodeBuilder::new("Add", ["x", one.as_str()]).named("inc"));
    let err = fold_value(&g, &out[0]).unwrap_err();
    assert!(matches!(err, InterpError::UnboundValue { .. }), "got {err}");
}

// ---------------------------------------------------------------------------
// 3. Loop
// ---------------------------------------------------------------------------

#[test]
fn test_loop_carries_and_scans() {
    // for i in 0..4 { acc = acc * 2; emit i }
    let mut g = Graph::new("main");
    let trip = constant(&mut g, "trip", Tensor::scalar_i64(4));
    let go = constant(&mut g, "go", Tensor::scalar_bool(true));
    let acc0 = constant(&mut g, "acc0", Tensor::scalar_i64(1));
    let two = constant(&mut g, "two", Tensor::scalar_i64(2));
    let outs = add(
        &mut g,
        NodeBuilder::new("Loop", [trip.as_str(), go.as_str(), acc0.as_str()]).named("loop").output_count(2),
    );

    let mut body = Graph::new("body");
    body.add_input("i", DType::I64, scalar()).expect("i");
    body.add_input("cond", DType::Bool, scalar()).expect("cond");
    body.add_input("acc", DType::I64, scalar()).expect("acc");
    let keep = add(&mut body, NodeBuilder::new("Identity", ["cond"]).named("keep"));
    let doubled = add(&mut body, NodeBuilder::new("Mul", ["acc", two.as_str()]).named("doubled"));
    let emitted = add(&mut body, NodeBuilder::new("Identity", ["i"]).named("emit"));
    body.add_output(&keep[0], DType::Bool, scalar());
    body.add_output(&doubled[0], DType::I64, scalar());
    body.add_output(&emitted[0], DType::I64, scalar());
    g.set_body("loop", LOOP_BODY, body).expect("body");
    g.add_output(&outs[0], DType::I64, scalar());
    g.add_output(&outs[1], DType::I64, dims(&[4]));

    let result = run(&g, &[]);
    assert_eq!(result[0], Tensor::scalar_i64(16));
    assert_eq!(result[1], Tensor::vec_i64(vec![0, 1, 2, 3]));
}

#[test]
fn test_stack_of_nothing_is_empty() {
    assert_eq!(stack(&[], DType::F32).expect("stack"), Tensor::vec_f32(vec![]));
    let rows = [Tensor::vec_i32(vec![1, 2]), Tensor::vec_i32(vec![3, 4])];
    let stacked = stack(&rows, DType::I32).expect("stack");
    assert_eq!(stacked, Tensor::vec_i32(vec![1, 2, 3, 4]).reshaped(vec![2, 2]).expect("reshape"));
}

#[test]
fn test_cast_node_uses_to_attribute() {
    let mut g = Graph::new("main");
    g.add_input("x", DType::I64, dims(&[2])).expect("x");
    let out = add(&mut g, NodeBuilder::new("Cast", ["x"]).named("c").attr("to", Attr::DType(DType::F32)));
    g.add_output(&out[0], DType::F32, dims(&[2]));
    assert_eq!(run(&g, &[("x", Tensor::vec_i64(vec![1, -3]))])[0], Tensor::vec_f32(vec![1.0, -3.0]));
}
