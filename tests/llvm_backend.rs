#![cfg(feature = "llvm")]

mod common;

use bufkern::codegen::llvm::{emit_llvm_ir, emit_object, jit_call, JitOptions};
use bufkern::lower::{KernelOutput, KernelSpec, LoweringOptions};
use bufkern::reduce::{dot_product, map_into, reduce_elementwise};
use bufkern::{Backing, BufferView, BufferViewMut, ElementType, ReduceOp};
use common::{sample_values, shapes_for_rank, view};

#[test]
fn test_jit_dot_product_scenarios() {
    let spec = KernelSpec::dot_product(ElementType::F64, 1);
    let cases: [(Vec<f64>, Vec<f64>, f64); 3] = [
        (vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0], 32.0),
        (vec![], vec![], 0.0),
        (vec![1.0], vec![-1.0], -1.0),
    ];
    for (a, b, expected) in cases {
        let n = a.len();
        let a = Backing::from_vec(a);
        let b = Backing::from_vec(b);
        let got = jit_call(
            &spec,
            &LoweringOptions::default(),
            &JitOptions::default(),
            &[&view(&a, &[n]), &view(&b, &[n])],
            None,
        )
        .unwrap();
        assert_eq!(got, Some(expected));
    }
}

#[test]
fn test_jit_matches_runtime_across_ranks() {
    for opt_level in [0u8, 2] {
        let options = JitOptions { opt_level };
        for rank in 0..=3 {
            let spec = KernelSpec::dot_product(ElementType::F64, rank);
            for (seed, dims) in shapes_for_rank(rank).into_iter().enumerate() {
                let n: usize = dims.iter().product();
                let a = Backing::from_vec(sample_values::<f64>(n, seed as u64));
                let b = Backing::from_vec(sample_values::<f64>(n, seed as u64 + 3));
                let (av, bv) = (view(&a, &dims), view(&b, &dims));
                let expected = dot_product(&av, &bv).unwrap();
                let got = jit_call(&spec, &LoweringOptions::default(), &options, &[&av, &bv], None)
                    .unwrap()
                    .unwrap();
                assert_eq!(got.to_bits(), expected.to_bits(), "O{opt_level} shape {dims:?}");
            }
        }
    }
}

#[test]
fn test_jit_integer_max_and_pow() {
    let spec = KernelSpec::from_source(
        "spread",
        ElementType::I32,
        2,
        &["a", "b"],
        "max(a, b) - min(a, b)",
        KernelOutput::Reduce(ReduceOp::Max),
    )
    .unwrap();
    let a = Backing::from_vec(vec![1i32, 9, -4, 7, 0, 2]);
    let b = Backing::from_vec(vec![3i32, 2, 5, 7, -8, 1]);
    let got = jit_call(
        &spec,
        &LoweringOptions::default(),
        &JitOptions::default(),
        &[&view(&a, &[2, 3]), &view(&b, &[2, 3])],
        None,
    )
    .unwrap();
    assert_eq!(got, Some(9));

    let spec = KernelSpec::from_source(
        "cubes",
        ElementType::F32,
        1,
        &["x"],
        "x ^ 3",
        KernelOutput::Reduce(ReduceOp::Sum),
    )
    .unwrap();
    let x = Backing::from_vec(vec![1.0f32, 2.0, 3.0]);
    let xv = view(&x, &[3]);
    let combiner = spec.combiner.bind(&["x"]).unwrap();
    let expected = reduce_elementwise(&[&xv], |v| combiner.apply(v), ReduceOp::Sum).unwrap();
    let got = jit_call(&spec, &LoweringOptions::default(), &JitOptions::default(), &[&xv], None)
        .unwrap()
        .unwrap();
    assert!((got - expected).abs() < 1e-4);
}

#[test]
fn test_jit_integer_division_by_zero() {
    let spec = KernelSpec::from_source(
        "quotient",
        ElementType::I64,
        1,
        &["a", "b"],
        "a / b",
        KernelOutput::Reduce(ReduceOp::Sum),
    )
    .unwrap();
    let a = Backing::from_vec(vec![7i64, 5, -12, 40]);
    let b = Backing::from_vec(vec![2i64, 0, 3, 0]);
    for opt_level in [0u8, 2] {
        let got = jit_call(
            &spec,
            &LoweringOptions::default(),
            &JitOptions { opt_level },
            &[&view(&a, &[4]), &view(&b, &[4])],
            None,
        )
        .unwrap();
        assert_eq!(got, Some(-1), "O{opt_level}");
    }
}

#[test]
fn test_jit_map_kernel() {
    let spec = KernelSpec::from_source(
        "blend",
        ElementType::F64,
        2,
        &["x", "y"],
        "x * y - 1",
        KernelOutput::Map,
    )
    .unwrap();
    let combiner = spec.combiner.bind(&["x", "y"]).unwrap();
    let x = Backing::from_vec(sample_values::<f64>(6, 1));
    let y = Backing::from_vec(sample_values::<f64>(6, 2));
    let (xv, yv) = (view(&x, &[2, 3]), view(&y, &[2, 3]));

    let mut expected = vec![0.0f64; 6];
    map_into(
        &[&xv, &yv],
        |v| combiner.apply(v),
        &mut BufferViewMut::new(&mut expected, vec![2, 3]).unwrap(),
    )
    .unwrap();

    let mut got = vec![0.0f64; 6];
    let mut out = BufferViewMut::new(&mut got, vec![2, 3]).unwrap();
    let result = jit_call(
        &spec,
        &LoweringOptions::default(),
        &JitOptions::default(),
        &[&xv, &yv],
        Some(&mut out),
    )
    .unwrap();
    assert_eq!(result, None);
    assert_eq!(got, expected);
}

#[test]
fn test_jit_rejects_bad_calls() {
    let spec = KernelSpec::dot_product(ElementType::F64, 1);
    let a = Backing::from_vec(vec![1.0f64, 2.0, 3.0]);
    let b = Backing::from_vec(vec![1.0f64, 2.0]);
    let lowering = LoweringOptions::default();
    let jit = JitOptions::default();

    let mismatched = jit_call(&spec, &lowering, &jit, &[&view(&a, &[3]), &view(&b, &[2])], None);
    assert!(matches!(mismatched, Err(bufkern::error::KernelError::Shape { .. })));

    let wrong_rank = jit_call(
        &spec,
        &lowering,
        &jit,
        &[
            &BufferView::contiguous(&a, vec![3, 1]).unwrap(),
            &BufferView::contiguous(&a, vec![3, 1]).unwrap(),
        ],
        None,
    );
    assert!(wrong_rank.is_err());

    let f32s = Backing::from_vec(vec![1.0f32]);
    let wrong_dtype = jit_call(&spec, &lowering, &jit, &[&view(&f32s, &[1]), &view(&f32s, &[1])], None);
    assert!(wrong_dtype.is_err());

    let mut sink = vec![0.0f64; 3];
    let mut out = BufferViewMut::new(&mut sink, vec![3]).unwrap();
    let stray_output = jit_call(
        &spec,
        &lowering,
        &jit,
        &[&view(&a, &[3]), &view(&a, &[3])],
        Some(&mut out),
    );
    assert!(stray_output.is_err());
}

#[test]
fn test_emit_llvm_ir_text() {
    let module = bufkern::lower(
        &[KernelSpec::dot_product(ElementType::F64, 2)],
        &LoweringOptions::default(),
    )
    .unwrap();
    let ir = emit_llvm_ir(&module, &JitOptions { opt_level: 0 }).unwrap();
    assert!(ir.contains("define double @dot_product(ptr"));
    assert!(ir.contains("for_cond"));

    let dir = tempfile::tempdir().unwrap();
    let obj = dir.path().join("dot.o");
    emit_object(&module, &obj, &JitOptions::default()).unwrap();
    assert!(std::fs::metadata(&obj).unwrap().len() > 0);
}
