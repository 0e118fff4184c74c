//! Integration tests for `Range` materialization.

mod common;

use cflow::config::LowerConfig;
use cflow::error::LowerError;
use cflow::ir::{Attr, DType, FunctionLibrary, Graph, NodeBuilder, Tensor};
use cflow::lower::range::{arange, range_len};
use cflow::lower_model;
use common::*;
use proptest::prelude::*;

fn range_node(g: &mut Graph, inputs: [&str; 3], tidx: Option<DType>) -> String {
    let mut b = NodeBuilder::new("Range", inputs).named("r");
    if let Some(dtype) = tidx {
        b = b.attr("Tidx", Attr::DType(dtype));
    }
    add(g, b).remove(0)
}

/// `Range` over three constants.
fn const_range(start: Tensor, limit: Tensor, delta: Tensor, dtype: DType) -> Graph {
    let mut g = Graph::new("main");
    let s = constant(&mut g, "start", start);
    let l = constant(&mut g, "limit", limit);
    let d = constant(&mut g, "delta", delta);
    let out = range_node(&mut g, [s.as_str(), l.as_str(), d.as_str()], Some(dtype));
    g.add_output(&out, dtype, None);
    g
}

/// `Range` whose start is a graph input.
fn input_range(limit: i64, delta: i64) -> Graph {
    let mut g = Graph::new("main");
    g.add_input("start", DType::I64, scalar()).expect("start");
    let l = constant(&mut g, "limit", Tensor::scalar_i64(limit));
    let d = constant(&mut g, "delta", Tensor::scalar_i64(delta));
    let out = range_node(&mut g, ["start", l.as_str(), d.as_str()], Some(DType::I64));
    g.add_output(&out, DType::I64, None);
    g
}

// ---------------------------------------------------------------------------
// 1. Constant operands
// ---------------------------------------------------------------------------

#[test]
fn test_constant_range_is_a_literal() {
    let mut g = const_range(Tensor::scalar_i32(0), Tensor::scalar_i32(10), Tensor::scalar_i32(3), DType::I32);
    lower_at(&mut g, &FunctionLibrary::new(), 8);

    assert_eq!(count_op(&g, "Range"), 0);
    assert_eq!(count_op(&g, "Loop"), 0);
    // The output keeps its identifier.
    assert_eq!(g.outputs()[0], "r:0");
    assert_eq!(run(&g, &[])[0], Tensor::vec_i32(vec![0, 3, 6, 9]));
}

#[test]
fn test_constant_range_negative_step() {
    let mut g = const_range(Tensor::scalar_i64(10), Tensor::scalar_i64(0), Tensor::scalar_i64(-3), DType::I64);
    lower_at(&mut g, &FunctionLibrary::new(), 8);
    assert_eq!(run(&g, &[])[0], Tensor::vec_i64(vec![10, 7, 4, 1]));
}

#[test]
fn test_constant_range_float() {
    let mut g = const_range(Tensor::scalar_f32(0.0), Tensor::scalar_f32(1.0), Tensor::scalar_f32(0.25), DType::F32);
    lower_at(&mut g, &FunctionLibrary::new(), 8);
    assert_eq!(run(&g, &[])[0], Tensor::vec_f32(vec![0.0, 0.25, 0.5, 0.75]));
}

#[test]
fn test_constant_range_empty() {
    let mut g = const_range(Tensor::scalar_i32(5), Tensor::scalar_i32(5), Tensor::scalar_i32(1), DType::I32);
    lower_at(&mut g, &FunctionLibrary::new(), 8);
    assert_eq!(run(&g, &[])[0], Tensor::vec_i32(vec![]));
}

#[test]
fn test_long_constant_range_is_generated_at_run_time() {
    init_logging();
    let mut g = const_range(Tensor::scalar_i64(0), Tensor::scalar_i64(10), Tensor::scalar_i64(1), DType::I64);
    let config = LowerConfig { max_range_literal: 4, ..LowerConfig::for_opset(8) };
    lower_model(&mut g, &FunctionLibrary::new(), &config).expect("lower_model");

    assert_eq!(count_op(&g, "Range"), 0);
    assert_eq!(count_op(&g, "Loop"), 1);
    assert_eq!(run(&g, &[])[0], Tensor::vec_i64((0..10).collect()));
}

#[test]
fn test_range_len_counts_without_materializing() {
    let len = range_len(&Tensor::scalar_i64(0), &Tensor::scalar_i64(i64::MAX), &Tensor::scalar_i64(1)).expect("range_len");
    assert!(len > LowerConfig::default().max_range_literal);
    assert_eq!(range_len(&Tensor::scalar_f32(1.0), &Tensor::scalar_f32(0.0), &Tensor::scalar_f32(0.5)).expect("empty"), 0);
}

#[test]
fn test_zero_step_is_rejected() {
    let mut g = const_range(Tensor::scalar_i32(0), Tensor::scalar_i32(5), Tensor::scalar_i32(0), DType::I32);
    let err = lower_err(&mut g, &FunctionLibrary::new(), 8);
    assert!(is_invariant(&err), "got {err}");
}

#[test]
fn test_arange_directly() {
    let t = arange(DType::I64, &Tensor::scalar_i64(-2), &Tensor::scalar_i64(3), &Tensor::scalar_i64(2)).expect("arange");
    assert_eq!(t, Tensor::vec_i64(vec![-2, 0, 2]));
    let err = arange(DType::Bool, &Tensor::scalar_f32(0.0), &Tensor::scalar_f32(1.0), &Tensor::scalar_f32(1.0)).unwrap_err();
    assert!(matches!(err, LowerError::InvariantViolation { .. }), "got {err}");
}

// ---------------------------------------------------------------------------
// 2. Run-time operands
// ---------------------------------------------------------------------------

#[test]
fn test_runtime_range_uses_loop() {
    let mut g = input_range(7, 2);
    lower_at(&mut g, &FunctionLibrary::new(), 8);

    assert_eq!(count_op(&g, "Range"), 0);
    assert_eq!(count_op(&g, "Loop"), 1);
    assert_eq!(run(&g, &[("start", Tensor::scalar_i64(2))])[0], Tensor::vec_i64(vec![2, 4, 6]));
    assert_eq!(run(&g, &[("start", Tensor::scalar_i64(9))])[0], Tensor::vec_i64(vec![]));
}

#[test]
fn test_runtime_float_range() {
    let mut g = Graph::new("main");
    g.add_input("limit", DType::F32, scalar()).expect("limit");
    let s = constant(&mut g, "start", Tensor::scalar_f32(1.0));
    let d = constant(&mut g, "delta", Tensor::scalar_f32(0.5));
    let out = range_node(&mut g, [s.as_str(), "limit", d.as_str()], Some(DType::F32));
    g.add_output(&out, DType::F32, None);
    lower_at(&mut g, &FunctionLibrary::new(), 8);

    assert_eq!(count_op(&g, "Cast"), 1);
    assert_eq!(run(&g, &[("limit", Tensor::scalar_f32(2.2))])[0], Tensor::vec_f32(vec![1.0, 1.5, 2.0]));
}

// ---------------------------------------------------------------------------
// 3. Versions and malformed nodes
// ---------------------------------------------------------------------------

#[test]
fn test_range_is_native_from_version_11() {
    let mut g = input_range(7, 2);
    lower_at(&mut g, &FunctionLibrary::new(), 11);
    assert_eq!(count_op(&g, "Range"), 1);
    assert_eq!(count_op(&g, "Loop"), 0);
}

#[test]
fn test_range_without_element_type_is_rejected() {
    let mut g = Graph::new("main");
    for name in ["start", "limit", "delta"] {
        constant(&mut g, name, Tensor::scalar_i64(1));
    }
    range_node(&mut g, ["start:0", "limit:0", "delta:0"], None);
    let err = lower_err(&mut g, &FunctionLibrary::new(), 8);
    assert!(is_invariant(&err), "got {err}");
}

// ---------------------------------------------------------------------------
// 4. Literal and loop agree
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn test_loop_range_matches_literal(
        start in -20i64..20,
        limit in -20i64..20,
        delta in prop_oneof![-5i64..=-1, 1i64..=5],
    ) {
        let mut literal = const_range(
            Tensor::scalar_i64(start),
            Tensor::scalar_i64(limit),
            Tensor::scalar_i64(delta),
            DType::I64,
        );
        lower_at(&mut literal, &FunctionLibrary::new(), 8);
        let mut looped = input_range(limit, delta);
        lower_at(&mut looped, &FunctionLibrary::new(), 8);

        let expected = run(&literal, &[]);
        let actual = run(&looped, &[("start", Tensor::scalar_i64(start))]);
        prop_assert_eq!(&expected[0], &actual[0]);
    }
}
