mod common;

use bufkern::interp::{Arg, Interpreter};
use bufkern::lower::{KernelOutput, KernelSpec, LoweringOptions};
use bufkern::reduce::{map_into, reduce_elementwise};
use bufkern::{Backing, BufferViewMut, Element, ElementType, ReduceOp};
use common::{sample_values, shapes_for_rank, view};

fn reduction_specs(dtype: ElementType, rank: usize) -> Vec<KernelSpec> {
    let mut specs = vec![KernelSpec::dot_product(dtype, rank)];
    let sources: [(&str, &str, ReduceOp); 3] = [
        ("diff_max", "a - b", ReduceOp::Max),
        ("shifted_min", "-a + 2 * b", ReduceOp::Min),
        ("ratio_product", "a / 4 + b / 8 + 1", ReduceOp::Product),
    ];
    for (name, combiner, op) in sources {
        specs.push(
            KernelSpec::from_source(name, dtype, rank, &["a", "b"], combiner, KernelOutput::Reduce(op))
                .unwrap(),
        );
    }
    specs
}

/// Interpreter result of every reduction kernel equals the runtime kernel,
/// bit for bit, for each exercised shape of `rank`.
fn check_reductions<T: Element>(rank: usize, options: &LoweringOptions) {
    let specs = reduction_specs(T::DTYPE, rank);
    let module = bufkern::lower(&specs, options).unwrap();
    let interp = Interpreter::new(&module);

    for (seed, dims) in shapes_for_rank(rank).into_iter().enumerate() {
        let n: usize = dims.iter().product();
        let a = Backing::from_vec(sample_values::<T>(n, seed as u64));
        let b = Backing::from_vec(sample_values::<T>(n, seed as u64 + 100));
        let av = view(&a, &dims);
        let bv = view(&b, &dims);

        for spec in &specs {
            let combiner = spec.combiner.bind(&["a", "b"]).unwrap();
            let KernelOutput::Reduce(op) = spec.output else {
                unreachable!("reduction specs only")
            };
            let expected =
                reduce_elementwise(&[&av, &bv], |v| combiner.apply(v), op).unwrap();
            let got = interp
                .call(&spec.name, vec![Arg::Buffer(av.clone()), Arg::Buffer(bv.clone())])
                .unwrap()
                .unwrap();
            assert_eq!(
                format!("{got:?}"),
                format!("{expected:?}"),
                "{} on shape {dims:?}",
                spec.name
            );
        }
    }
}

#[test]
fn test_f64_reductions_agree_across_ranks() {
    for rank in 0..=3 {
        check_reductions::<f64>(rank, &LoweringOptions::default());
        check_reductions::<f64>(rank, &LoweringOptions { empty_guard: false });
    }
}

#[test]
fn test_f32_reductions_agree_across_ranks() {
    for rank in 0..=3 {
        check_reductions::<f32>(rank, &LoweringOptions::default());
    }
}

#[test]
fn test_i64_reductions_agree_across_ranks() {
    let specs = |rank| {
        vec![
            KernelSpec::dot_product(ElementType::I64, rank),
            KernelSpec::from_source(
                "weighted_max",
                ElementType::I64,
                rank,
                &["a", "b"],
                "3 * a - b",
                KernelOutput::Reduce(ReduceOp::Max),
            )
            .unwrap(),
        ]
    };
    for rank in 0..=3 {
        let specs = specs(rank);
        let module = bufkern::lower(&specs, &LoweringOptions::default()).unwrap();
        let interp = Interpreter::new(&module);
        for (seed, dims) in shapes_for_rank(rank).into_iter().enumerate() {
            let n: usize = dims.iter().product();
            let a = Backing::from_vec(sample_values::<i64>(n, seed as u64 + 7));
            let b = Backing::from_vec(sample_values::<i64>(n, seed as u64 + 9));
            let av = view(&a, &dims);
            let bv = view(&b, &dims);
            for spec in &specs {
                let combiner = spec.combiner.bind(&["a", "b"]).unwrap();
                let KernelOutput::Reduce(op) = spec.output else {
                    unreachable!("reduction specs only")
                };
                let expected =
                    reduce_elementwise(&[&av, &bv], |v| combiner.apply(v), op).unwrap();
                let got = interp
                    .call(&spec.name, vec![Arg::Buffer(av.clone()), Arg::Buffer(bv.clone())])
                    .unwrap();
                assert_eq!(got, Some(expected), "{} on shape {dims:?}", spec.name);
            }
        }
    }
}

#[test]
fn test_map_kernels_agree_across_ranks() {
    for rank in 0..=3 {
        let spec = KernelSpec::from_source(
            "blend",
            ElementType::F64,
            rank,
            &["x", "y", "z"],
            "x * y - z ^ 2",
            KernelOutput::Map,
        )
        .unwrap();
        let combiner = spec.combiner.bind(&["x", "y", "z"]).unwrap();
        let module = bufkern::lower(&[spec], &LoweringOptions::default()).unwrap();
        let interp = Interpreter::new(&module);

        for (seed, dims) in shapes_for_rank(rank).into_iter().enumerate() {
            let n: usize = dims.iter().product();
            let x = Backing::from_vec(sample_values::<f64>(n, seed as u64));
            let y = Backing::from_vec(sample_values::<f64>(n, seed as u64 + 1));
            let z = Backing::from_vec(sample_values::<f64>(n, seed as u64 + 2));
            let (xv, yv, zv) = (view(&x, &dims), view(&y, &dims), view(&z, &dims));

            let mut expected = vec![0.0f64; n];
            let mut out = BufferViewMut::new(&mut expected, dims.clone()).unwrap();
            map_into(&[&xv, &yv, &zv], |v| combiner.apply(v), &mut out).unwrap();

            let mut got = vec![0.0f64; n];
            let out = BufferViewMut::new(&mut got, dims.clone()).unwrap();
            let result = interp
                .call(
                    "blend",
                    vec![
                        Arg::Buffer(xv.clone()),
                        Arg::Buffer(yv.clone()),
                        Arg::Buffer(zv.clone()),
                        Arg::Output(out),
                    ],
                )
                .unwrap();
            assert_eq!(result, None);
            assert_eq!(got, expected, "shape {dims:?}");
        }
    }
}

#[test]
fn test_interpreter_rejects_mismatched_shapes() {
    let module = bufkern::lower(
        &[KernelSpec::dot_product(ElementType::F64, 1)],
        &LoweringOptions::default(),
    )
    .unwrap();
    let a = Backing::from_vec(vec![1.0f64, 2.0, 3.0]);
    let b = Backing::from_vec(vec![1.0f64, 2.0]);
    let err = Interpreter::new(&module)
        .call(
            "dot_product",
            vec![Arg::Buffer(view(&a, &[3])), Arg::Buffer(view(&b, &[2]))],
        )
        .unwrap_err();
    assert!(matches!(err, bufkern::error::KernelError::Eval { .. }));
}

#[test]
fn test_integer_division_by_zero_agrees() {
    let spec = KernelSpec::from_source(
        "quotient",
        ElementType::I64,
        1,
        &["a", "b"],
        "a / b",
        KernelOutput::Reduce(ReduceOp::Sum),
    )
    .unwrap();
    let combiner = spec.combiner.bind(&["a", "b"]).unwrap();
    let module = bufkern::lower(&[spec], &LoweringOptions::default()).unwrap();

    let a = Backing::from_vec(vec![7i64, 5, -9, i64::MIN]);
    let b = Backing::from_vec(vec![2i64, 0, 3, -1]);
    let (av, bv) = (view(&a, &[4]), view(&b, &[4]));

    let expected = reduce_elementwise(&[&av, &bv], |v| combiner.apply(v), ReduceOp::Sum).unwrap();
    // 7 / 2 + 0 + -9 / 3 + i64::MIN / -1 (wraps to i64::MIN)
    assert_eq!(expected, 3i64.wrapping_add(-3).wrapping_add(i64::MIN));
    let got = Interpreter::new(&module)
        .call("quotient", vec![Arg::Buffer(av), Arg::Buffer(bv)])
        .unwrap();
    assert_eq!(got, Some(expected));
}
