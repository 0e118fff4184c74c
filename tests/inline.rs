//! Integration tests for parameter binding and subgraph inlining.

mod common;

use cflow::error::LowerError;
use cflow::ir::{DType, Graph, NodeBuilder, Tensor, PLACEHOLDER};
use cflow::lower::inline::{bind_parameters, copy_and_inline, prefix_graph, wire_in_place, Actual};
use common::*;

/// add_mul(a, b) = ((a + b), (a * b))
fn add_mul() -> Graph {
    let mut f = function("add_mul", &[("a", DType::F32, dims(&[2])), ("b", DType::F32, dims(&[2]))]);
    let sum = add(&mut f, NodeBuilder::new("Add", ["a", "b"]).named("sum").typed(DType::F32, dims(&[2])));
    let prod = add(&mut f, NodeBuilder::new("Mul", ["a", "b"]).named("prod").typed(DType::F32, dims(&[2])));
    f.add_output(&sum[0], DType::F32, dims(&[2]));
    f.add_output(&prod[0], DType::F32, dims(&[2]));
    f
}

fn caller() -> Graph {
    let mut g = Graph::new("caller");
    g.add_input("x", DType::F32, dims(&[2])).expect("input");
    g.add_input("y", DType::F32, dims(&[2])).expect("input");
    g
}

// ---------------------------------------------------------------------------
// 1. Binding
// ---------------------------------------------------------------------------

#[test]
fn test_bind_parameters_positional() {
    let f = add_mul();
    let binding = bind_parameters(&f, &[Actual::from("x"), Actual::Unbound]).expect("bind");
    assert_eq!(binding.len(), 2);
    assert_eq!(binding.get("a"), Some(&Actual::Value("x".to_owned())));
    assert_eq!(binding.get("b"), Some(&Actual::Unbound));
}

#[test]
fn test_bind_parameters_length_mismatch() {
    let f = add_mul();
    let err = bind_parameters(&f, &[Actual::from("x")]).unwrap_err();
    assert!(matches!(err, LowerError::InvariantViolation { .. }), "got {err}");
}

#[test]
fn test_poison_actual_is_unbound() {
    assert_eq!(Actual::from(cflow::ir::POISON), Actual::Unbound);
}

// ---------------------------------------------------------------------------
// 2. Wiring
// ---------------------------------------------------------------------------

#[test]
fn test_wire_in_place_turns_placeholders_into_identities() {
    let mut f = add_mul();
    let binding = bind_parameters(&f, &[Actual::from("x"), Actual::from("y")]).expect("bind");
    wire_in_place(&mut f, &binding).expect("wire");

    assert!(f.params().is_empty());
    assert!(f.inputs().is_empty());
    let a = f.node("a").expect("a survives as a node");
    assert_eq!(a.op, "Identity");
    assert_eq!(a.inputs, vec!["x".to_owned()]);
}

#[test]
fn test_wire_in_place_drops_dead_unbound_parameter() {
    let mut f = function("first", &[("a", DType::F32, scalar()), ("unused", DType::F32, scalar())]);
    let out = add(&mut f, NodeBuilder::new("Identity", ["a"]).named("id"));
    f.add_output(&out[0], DType::F32, scalar());

    let binding = bind_parameters(&f, &[Actual::from("x"), Actual::Unbound]).expect("bind");
    wire_in_place(&mut f, &binding).expect("wire");
    assert!(f.node("unused").is_none());
}

#[test]
fn test_wire_in_place_rejects_read_unbound_parameter() {
    let mut f = add_mul();
    let binding = bind_parameters(&f, &[Actual::from("x"), Actual::Unbound]).expect("bind");
    let err = wire_in_place(&mut f, &binding).unwrap_err();
    assert!(matches!(err, LowerError::InvariantViolation { .. }), "got {err}");
}

// ---------------------------------------------------------------------------
// 3. Renaming
// ---------------------------------------------------------------------------

#[test]
fn test_prefix_graph_renames_everything_but_placeholders() {
    let mut f = add_mul();
    prefix_graph(&mut f, "s");

    assert!(f.node("s/sum").is_some());
    assert!(f.node("s/prod").is_some());
    assert_eq!(f.node("a").map(|n| n.op.as_str()), Some(PLACEHOLDER));
    assert_eq!(f.outputs(), &["s/sum:0".to_owned(), "s/prod:0".to_owned()]);
    assert_eq!(f.node("s/sum").expect("sum").inputs, vec!["a".to_owned(), "b".to_owned()]);
    assert_eq!(f.dtype("s/sum:0"), DType::F32);
}

// ---------------------------------------------------------------------------
// 4. Copy and inline
// ---------------------------------------------------------------------------

#[test]
fn test_copy_and_inline_computes_callee() {
    let f = add_mul();
    let mut g = caller();
    let binding = bind_parameters(&f, &[Actual::from("x"), Actual::from("y")]).expect("bind");
    let outs = copy_and_inline(&mut g, &f, "call", &binding).expect("inline");
    for o in &outs {
        g.add_output(o, DType::F32, dims(&[2]));
    }

    let results = run(&g, &[("x", Tensor::vec_f32(vec![1.0, 2.0])), ("y", Tensor::vec_f32(vec![3.0, 4.0]))]);
    assert_eq!(results[0], Tensor::vec_f32(vec![4.0, 6.0]));
    assert_eq!(results[1], Tensor::vec_f32(vec![3.0, 8.0]));
    // The definition itself is untouched.
    assert_eq!(f, add_mul());
}

#[test]
fn test_copy_and_inline_twice_does_not_collide() {
    let f = add_mul();
    let mut g = caller();
    let b1 = bind_parameters(&f, &[Actual::from("x"), Actual::from("y")]).expect("bind");
    let b2 = bind_parameters(&f, &[Actual::from("y"), Actual::from("y")]).expect("bind");
    let first = copy_and_inline(&mut g, &f, "c1", &b1).expect("first");
    let second = copy_and_inline(&mut g, &f, "c2", &b2).expect("second");
    assert_ne!(first, second);
    // Both splices worked on copies.
    assert_eq!(f, add_mul());
    g.add_output(&first[0], DType::F32, dims(&[2]));
    g.add_output(&second[1], DType::F32, dims(&[2]));

    let results = run(&g, &[("x", Tensor::vec_f32(vec![1.0, 1.0])), ("y", Tensor::vec_f32(vec![2.0, 3.0]))]);
    assert_eq!(results[0], Tensor::vec_f32(vec![3.0, 4.0]));
    assert_eq!(results[1], Tensor::vec_f32(vec![4.0, 9.0]));
}

#[test]
fn test_copy_and_inline_with_actuals_named_like_formals() {
    // swap(y, x) = (x - y): both formals share their names with the actuals
    // they are bound to, crosswise.
    let mut f = function("swap", &[("y", DType::F32, dims(&[2])), ("x", DType::F32, dims(&[2]))]);
    let diff = add(&mut f, NodeBuilder::new("Sub", ["x", "y"]).named("diff").typed(DType::F32, dims(&[2])));
    f.add_output(&diff[0], DType::F32, dims(&[2]));

    let mut g = caller();
    let binding = bind_parameters(&f, &[Actual::from("x"), Actual::from("y")]).expect("bind");
    let outs = copy_and_inline(&mut g, &f, "call", &binding).expect("inline");
    g.add_output(&outs[0], DType::F32, dims(&[2]));

    let results = run(&g, &[("x", Tensor::vec_f32(vec![10.0, 20.0])), ("y", Tensor::vec_f32(vec![1.0, 2.0]))]);
    assert_eq!(results[0], Tensor::vec_f32(vec![-9.0, -18.0]));
}
