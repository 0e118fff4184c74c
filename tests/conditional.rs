//! Integration tests for Switch / Merge lowering and the scalar select.

mod common;

use cflow::ir::{DType, FunctionLibrary, Graph, NameGen, NodeBuilder, Shape, Tensor, ELSE_BRANCH, THEN_BRANCH};
use cflow::lower::cond::create_if_op;
use common::*;

/// out = p ? x + 1 : x * 2, written with a Switch / Merge pair.
fn switch_merge_graph() -> Graph {
    let mut g = Graph::new("switch_merge");
    g.add_input("x", DType::F32, dims(&[2])).expect("x");
    g.add_input("p", DType::Bool, scalar()).expect("p");
    let one = constant(&mut g, "one", Tensor::scalar_f32(1.0));
    let two = constant(&mut g, "two", Tensor::scalar_f32(2.0));
    let sw = add(
        &mut g,
        NodeBuilder::new("Switch", ["x", "p"])
            .named("sw")
            .output_count(2)
            .dtypes(vec![DType::F32, DType::F32])
            .shapes(vec![dims(&[2]), dims(&[2])]),
    );
    let doubled = add(&mut g, NodeBuilder::new("Mul", [sw[0].clone(), two]).named("doubled").typed(DType::F32, dims(&[2])));
    let bumped = add(&mut g, NodeBuilder::new("Add", [sw[1].clone(), one]).named("bumped").typed(DType::F32, dims(&[2])));
    let merged = add(
        &mut g,
        NodeBuilder::new("Merge", [doubled[0].clone(), bumped[0].clone()])
            .named("merge")
            .output_count(2)
            .dtypes(vec![DType::F32, DType::I32])
            .shapes(vec![dims(&[2]), scalar()]),
    );
    g.add_output(&merged[0], DType::F32, dims(&[2]));
    g.add_output(&merged[1], DType::I32, scalar());
    g
}

// ---------------------------------------------------------------------------
// 1. Switch
// ---------------------------------------------------------------------------

#[test]
fn test_switch_becomes_if_with_same_name_and_outputs() {
    let mut g = switch_merge_graph();
    lower_at(&mut g, &FunctionLibrary::new(), 8);

    let node = g.node("sw").expect("sw");
    assert_eq!(node.op, "If");
    assert_eq!(node.inputs, vec!["p".to_owned()]);
    assert_eq!(node.outputs, vec!["sw:0".to_owned(), "sw:1".to_owned()]);
    for slot in [THEN_BRANCH, ELSE_BRANCH] {
        let branch = node.body(slot).expect("branch");
        assert_eq!(branch.outputs().len(), 2);
        assert!(branch.inputs().is_empty());
    }
    assert_eq!(count_op(&g, "Switch"), 0);
    assert_eq!(count_op(&g, "Merge"), 0);
}

#[test]
fn test_switch_poisons_the_branch_not_taken() {
    let mut g = Graph::new("switch_only");
    g.add_input("x", DType::F32, dims(&[2])).expect("x");
    g.add_input("p", DType::Bool, scalar()).expect("p");
    let sw = add(
        &mut g,
        NodeBuilder::new("Switch", ["x", "p"]).named("sw").output_count(2).dtypes(vec![DType::F32, DType::F32]),
    );
    g.add_output(&sw[0], DType::F32, None);
    g.add_output(&sw[1], DType::F32, None);
    lower_at(&mut g, &FunctionLibrary::new(), 8);

    let x = Tensor::vec_f32(vec![1.5, -2.0]);
    let taken = run(&g, &[("x", x.clone()), ("p", Tensor::scalar_bool(true))]);
    assert_eq!(taken[1], x);
    assert!(taken[0].as_f32().expect("f32").iter().all(|v| v.is_nan()));

    let not_taken = run(&g, &[("x", x.clone()), ("p", Tensor::scalar_bool(false))]);
    assert_eq!(not_taken[0], x);
    assert!(not_taken[1].as_f32().expect("f32").iter().all(|v| v.is_nan()));
}

#[test]
fn test_switch_with_unknown_type_is_rejected() {
    let mut g = Graph::new("untyped");
    g.add_input("x", DType::Undefined, None).expect("x");
    g.add_input("p", DType::Bool, scalar()).expect("p");
    add(&mut g, NodeBuilder::new("Switch", ["x", "p"]).named("sw").output_count(2));
    let err = lower_err(&mut g, &FunctionLibrary::new(), 8);
    assert!(is_invariant(&err), "got {err}");
}

// ---------------------------------------------------------------------------
// 2. Merge
// ---------------------------------------------------------------------------

#[test]
fn test_switch_merge_round_trip() {
    let mut g = switch_merge_graph();
    lower_at(&mut g, &FunctionLibrary::new(), 8);

    let x = Tensor::vec_f32(vec![3.0, -1.0]);
    let when_true = run(&g, &[("x", x.clone()), ("p", Tensor::scalar_bool(true))]);
    assert_eq!(when_true[0], Tensor::vec_f32(vec![4.0, 0.0]));
    assert_eq!(when_true[1], Tensor::scalar_i32(1));

    let when_false = run(&g, &[("x", x), ("p", Tensor::scalar_bool(false))]);
    assert_eq!(when_false[0], Tensor::vec_f32(vec![6.0, -2.0]));
    assert_eq!(when_false[1], Tensor::scalar_i32(0));
}

#[test]
fn test_merge_with_three_inputs_is_unsupported() {
    let mut g = Graph::new("merge3");
    for v in ["a", "b", "c"] {
        g.add_input(v, DType::F32, scalar()).expect("input");
    }
    add(&mut g, NodeBuilder::new("Merge", ["a", "b", "c"]).named("m").output_count(2).dtypes(vec![DType::F32]));
    let err = lower_err(&mut g, &FunctionLibrary::new(), 8);
    assert!(is_unsupported(&err), "got {err}");
    match err {
        cflow::Error::Lower { node, op, .. } => {
            assert_eq!(node, "m");
            assert_eq!(op, "Merge");
        }
        other => panic!("expected a node-level error, got {other}"),
    }
}

#[test]
fn test_merge_with_unknown_type_is_rejected() {
    let mut g = Graph::new("merge_untyped");
    g.add_input("a", DType::F32, scalar()).expect("a");
    g.add_input("b", DType::F32, scalar()).expect("b");
    add(&mut g, NodeBuilder::new("Merge", ["a", "b"]).named("m").output_count(2));
    let err = lower_err(&mut g, &FunctionLibrary::new(), 8);
    assert!(is_invariant(&err), "got {err}");
}

#[test]
fn test_merge_index_defaults_to_i32() {
    let mut g = Graph::new("merge_index");
    g.add_input("a", DType::F32, scalar()).expect("a");
    g.add_input("b", DType::F32, scalar()).expect("b");
    let m = add(
        &mut g,
        NodeBuilder::new("Merge", ["a", "b"]).named("m").output_count(2).dtypes(vec![DType::F32, DType::Undefined]),
    );
    g.add_output(&m[0], DType::F32, scalar());
    g.add_output(&m[1], DType::Undefined, None);
    lower_at(&mut g, &FunctionLibrary::new(), 8);

    assert_eq!(g.dtype("m:1"), DType::I32);
    let out = run(&g, &[("a", Tensor::scalar_f32(f32::NAN)), ("b", Tensor::scalar_f32(7.0))]);
    assert_eq!(out[0], Tensor::scalar_f32(7.0));
    assert_eq!(out[1], Tensor::scalar_i32(1));
}

// ---------------------------------------------------------------------------
// 3. Scalar select
// ---------------------------------------------------------------------------

#[test]
fn test_create_if_op_selects_scalar() {
    let mut g = Graph::new("ternary");
    g.add_input("c", DType::Bool, scalar()).expect("c");
    g.add_input("t", DType::I64, scalar()).expect("t");
    g.add_input("f", DType::I64, scalar()).expect("f");
    let mut names = NameGen::new();
    let out = create_if_op(&mut names, &mut g, "c", "t", "f", DType::I64, Some(Shape::scalar())).expect("if");
    g.add_output(&out, DType::I64, scalar());

    let feeds = |c: bool| [("c", Tensor::scalar_bool(c)), ("t", Tensor::scalar_i64(5)), ("f", Tensor::scalar_i64(9))];
    assert_eq!(run(&g, &feeds(true))[0], Tensor::scalar_i64(5));
    assert_eq!(run(&g, &feeds(false))[0], Tensor::scalar_i64(9));
    assert_eq!(count_op(&g, "If"), 1);
}
