//! Elementwise-then-reduce kernels over buffer views.
//!
//! Every kernel walks linear indices `0..len` in ascending order through one
//! shared [`Linearization`] and folds into a single accumulator that starts
//! at the operator's identity. Nothing here allocates, and repeated calls on
//! the same inputs are bit-identical.

use std::fmt;

use crate::buffer::{BufferView, BufferViewMut};
use crate::dtype::Element;
use crate::error::KernelError;
use crate::shape::{Linearization, Shape};

/// Most operands a single kernel may combine.
pub const MAX_OPERANDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Product,
    Max,
    Min,
}

impl ReduceOp {
    /// Value returned for an empty input.
    pub fn identity<T: Element>(&self) -> T {
        match self {
            ReduceOp::Sum => T::zero(),
            ReduceOp::Product => T::one(),
            ReduceOp::Max => T::lowest(),
            ReduceOp::Min => T::highest(),
        }
    }

    /// One fold step. `Max`/`Min` compare-and-select, so a NaN element never
    /// replaces the accumulator.
    #[inline]
    pub fn fold<T: Element>(&self, acc: T, x: T) -> T {
        match self {
            ReduceOp::Sum => acc.add(x),
            ReduceOp::Product => acc.mul(x),
            ReduceOp::Max => {
                if x > acc {
                    x
                } else {
                    acc
                }
            }
            ReduceOp::Min => {
                if x < acc {
                    x
                } else {
                    acc
                }
            }
        }
    }

    pub fn parse(name: &str) -> crate::error::Result<Self> {
        match name {
            "sum" | "add" => Ok(ReduceOp::Sum),
            "product" | "prod" | "mul" => Ok(ReduceOp::Product),
            "max" => Ok(ReduceOp::Max),
            "min" => Ok(ReduceOp::Min),
            other => Err(KernelError::lower_error(format!(
                "unknown reduction '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Product => "product",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
        };
        write!(f, "{name}")
    }
}

fn shared_shape<'s, T: Element>(operands: &'s [&BufferView<'_, T>]) -> crate::error::Result<&'s Shape> {
    let first = operands
        .first()
        .ok_or_else(|| KernelError::shape_error("a kernel needs at least one operand"))?;
    if operands.len() > MAX_OPERANDS {
        return Err(KernelError::shape_error(format!(
            "{} operands exceed the supported maximum of {MAX_OPERANDS}",
            operands.len()
        )));
    }
    let shape = first.shape();
    for (k, operand) in operands.iter().enumerate().skip(1) {
        if operand.shape() != shape {
            return Err(KernelError::shape_error(format!(
                "operand {k} has shape {}, expected {shape}",
                operand.shape()
            )));
        }
    }
    Ok(shape)
}

#[inline]
fn fold_linear<T, F>(
    operands: &[&BufferView<'_, T>],
    lin: &Linearization,
    len: usize,
    mut combine: F,
    op: ReduceOp,
) -> T
where
    T: Element,
    F: FnMut(&[T]) -> T,
{
    if len == 0 {
        return op.identity();
    }
    let mut scratch = [T::zero(); MAX_OPERANDS];
    let values = &mut scratch[..operands.len()];
    let mut acc = op.identity();
    for i in 0..len {
        let index = lin.index(i);
        for (slot, operand) in values.iter_mut().zip(operands) {
            *slot = operand.data()[index];
        }
        acc = op.fold(acc, combine(&*values));
    }
    acc
}

/// Combine same-shape operands elementwise and reduce the results.
///
/// `combine` receives one value per operand, in operand order.
pub fn reduce_elementwise<T, F>(
    operands: &[&BufferView<'_, T>],
    combine: F,
    op: ReduceOp,
) -> crate::error::Result<T>
where
    T: Element,
    F: FnMut(&[T]) -> T,
{
    let shape = shared_shape(operands)?;
    let lin = Linearization::new(shape)?;
    Ok(fold_linear(operands, &lin, shape.len(), combine, op))
}

/// [`reduce_elementwise`] without the shape checks.
///
/// # Safety
/// `operands` must be non-empty, hold at most [`MAX_OPERANDS`] views, and
/// every view must share the first operand's shape, whose rank must not
/// exceed [`crate::shape::MAX_RANK`]. Debug builds assert the shape match.
pub unsafe fn reduce_elementwise_unchecked<T, F>(
    operands: &[&BufferView<'_, T>],
    mut combine: F,
    op: ReduceOp,
) -> T
where
    T: Element,
    F: FnMut(&[T]) -> T,
{
    debug_assert!(!operands.is_empty() && operands.len() <= MAX_OPERANDS);
    debug_assert!(
        operands.iter().all(|o| o.shape() == operands[0].shape()),
        "operand shapes differ"
    );
    let len = operands.get_unchecked(0).len();
    if len == 0 {
        return op.identity();
    }
    let lin = Linearization::within_limit(operands.get_unchecked(0).shape());
    let mut scratch = [T::zero(); MAX_OPERANDS];
    let values = scratch.get_unchecked_mut(..operands.len());
    let mut acc = op.identity();
    for i in 0..len {
        let index = lin.index(i);
        for (slot, operand) in values.iter_mut().zip(operands) {
            *slot = *operand.data().get_unchecked(index);
        }
        acc = op.fold(acc, combine(&*values));
    }
    acc
}

/// Single-operand reduction.
pub fn reduce<T: Element>(a: &BufferView<'_, T>, op: ReduceOp) -> crate::error::Result<T> {
    reduce_elementwise(&[a], |v| v[0], op)
}

/// `sum(a[i] * b[i])` in ascending index order with one accumulator.
pub fn dot_product<T: Element>(a: &BufferView<'_, T>, b: &BufferView<'_, T>) -> crate::error::Result<T> {
    reduce_elementwise(&[a, b], |v| v[0].mul(v[1]), ReduceOp::Sum)
}

/// [`dot_product`] without the shape check.
///
/// # Safety
/// `a` and `b` must share one shape of rank at most
/// [`crate::shape::MAX_RANK`].
pub unsafe fn dot_product_unchecked<T: Element>(a: &BufferView<'_, T>, b: &BufferView<'_, T>) -> T {
    reduce_elementwise_unchecked(&[a, b], |v| v[0].mul(v[1]), ReduceOp::Sum)
}

/// Elementwise combine into `out`, which must share the operands' shape.
pub fn map_into<T, F>(
    operands: &[&BufferView<'_, T>],
    mut combine: F,
    out: &mut BufferViewMut<'_, T>,
) -> crate::error::Result<()>
where
    T: Element,
    F: FnMut(&[T]) -> T,
{
    let shape = shared_shape(operands)?;
    if out.shape() != shape {
        return Err(KernelError::shape_error(format!(
            "output has shape {}, expected {shape}",
            out.shape()
        )));
    }
    let len = shape.len();
    if len == 0 {
        return Ok(());
    }
    let lin = Linearization::new(shape)?;
    let mut scratch = [T::zero(); MAX_OPERANDS];
    let values = &mut scratch[..operands.len()];
    let target = out.data_mut();
    for i in 0..len {
        let index = lin.index(i);
        for (slot, operand) in values.iter_mut().zip(operands) {
            *slot = operand.data()[index];
        }
        target[index] = combine(&*values);
    }
    Ok(())
}

/// Combine elementwise, then reduce along `axis` into `out`.
///
/// `out` must have the operands' shape with `axis` removed. Each output
/// element starts at the identity and folds its inputs in ascending order
/// along `axis`; an empty axis leaves every output at the identity.
pub fn reduce_axis<T, F>(
    operands: &[&BufferView<'_, T>],
    axis: usize,
    mut combine: F,
    op: ReduceOp,
    out: &mut BufferViewMut<'_, T>,
) -> crate::error::Result<()>
where
    T: Element,
    F: FnMut(&[T]) -> T,
{
    let shape = shared_shape(operands)?;
    let expected = shape.without_axis(axis)?;
    if out.shape() != &expected {
        return Err(KernelError::shape_error(format!(
            "output has shape {}, expected {expected}",
            out.shape()
        )));
    }

    let lin = Linearization::new(shape)?;

    let target = out.data_mut();
    for slot in target.iter_mut() {
        *slot = op.identity();
    }
    let len = shape.len();
    if len == 0 {
        return Ok(());
    }

    let extent = shape.dims()[axis];
    let inner: usize = shape.dims()[axis + 1..].iter().product();
    let mut scratch = [T::zero(); MAX_OPERANDS];
    let values = &mut scratch[..operands.len()];
    for i in 0..len {
        let index = lin.index(i);
        for (slot, operand) in values.iter_mut().zip(operands) {
            *slot = operand.data()[index];
        }
        let out_index = (i / (extent * inner)) * inner + i % inner;
        target[out_index] = op.fold(target[out_index], combine(&*values));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Backing;

    fn view<T: Element>(backing: &Backing<T>, dims: Vec<usize>) -> BufferView<'_, T> {
        BufferView::contiguous(backing, dims).unwrap()
    }

    #[test]
    fn test_dot_product_concrete() {
        let a = Backing::from_vec(vec![1.0f64, 2.0, 3.0]);
        let b = Backing::from_vec(vec![4.0f64, 5.0, 6.0]);
        assert_eq!(dot_product(&view(&a, vec![3]), &view(&b, vec![3])).unwrap(), 32.0);
    }

    #[test]
    fn test_dot_product_empty_is_identity() {
        let a = Backing::<f64>::from_vec(vec![]);
        let b = Backing::<f64>::from_vec(vec![]);
        let r = dot_product(&view(&a, vec![0]), &view(&b, vec![0])).unwrap();
        assert_eq!(r, 0.0);
        assert!(r.is_sign_positive());
    }

    #[test]
    fn test_dot_product_rank0() {
        let a = Backing::from_vec(vec![3.0f64]);
        let b = Backing::from_vec(vec![-2.5f64]);
        let r = dot_product(&view(&a, vec![]), &view(&b, vec![])).unwrap();
        assert_eq!(r, -7.5);
    }

    #[test]
    fn test_dot_product_nan_propagates() {
        let a = Backing::from_vec(vec![1.0f64, f64::NAN]);
        let b = Backing::from_vec(vec![1.0f64, 1.0]);
        assert!(dot_product(&view(&a, vec![2]), &view(&b, vec![2])).unwrap().is_nan());
    }

    #[test]
    fn test_dot_product_shape_mismatch() {
        let a = Backing::from_vec(vec![1.0f64; 6]);
        let b = Backing::from_vec(vec![1.0f64; 6]);
        let err = dot_product(&view(&a, vec![2, 3]), &view(&b, vec![3, 2])).unwrap_err();
        assert!(matches!(err, KernelError::Shape { .. }));
    }

    #[test]
    fn test_dot_product_aliased_operands() {
        let a = Backing::from_vec(vec![1.0f64, 2.0, 3.0]);
        let va = view(&a, vec![3]);
        assert_eq!(dot_product(&va, &va).unwrap(), 14.0);
    }

    #[test]
    fn test_unchecked_matches_checked() {
        let a = Backing::from_vec((0..12).map(|i| i as f64 * 0.5).collect());
        let b = Backing::from_vec((0..12).map(|i| 1.0 - i as f64).collect());
        let (va, vb) = (view(&a, vec![3, 4]), view(&b, vec![3, 4]));
        let checked = dot_product(&va, &vb).unwrap();
        let unchecked = unsafe { dot_product_unchecked(&va, &vb) };
        assert_eq!(checked.to_bits(), unchecked.to_bits());
    }

    #[test]
    fn test_reduce_ops() {
        let a = Backing::from_vec(vec![3i64, -1, 4, 1, -5]);
        let va = view(&a, vec![5]);
        assert_eq!(reduce(&va, ReduceOp::Sum).unwrap(), 2);
        assert_eq!(reduce(&va, ReduceOp::Product).unwrap(), 60);
        assert_eq!(reduce(&va, ReduceOp::Max).unwrap(), 4);
        assert_eq!(reduce(&va, ReduceOp::Min).unwrap(), -5);
        let empty = Backing::<i64>::from_vec(vec![]);
        assert_eq!(reduce(&view(&empty, vec![0]), ReduceOp::Max).unwrap(), i64::MIN);
    }

    #[test]
    fn test_three_operand_reduction() {
        let a = Backing::from_vec(vec![1.0f32, 2.0]);
        let b = Backing::from_vec(vec![3.0f32, 4.0]);
        let c = Backing::from_vec(vec![0.5f32, 0.25]);
        let r = reduce_elementwise(
            &[&view(&a, vec![2]), &view(&b, vec![2]), &view(&c, vec![2])],
            |v| v[0].mul(v[1]).mul(v[2]),
            ReduceOp::Sum,
        )
        .unwrap();
        assert_eq!(r, 3.5);
    }

    #[test]
    fn test_map_into() {
        let a = Backing::from_vec(vec![1.0f64, 2.0, 3.0, 4.0]);
        let b = Backing::from_vec(vec![10.0f64, 20.0, 30.0, 40.0]);
        let mut out = vec![0.0f64; 4];
        let mut ov = BufferViewMut::new(&mut out, vec![2, 2]).unwrap();
        map_into(
            &[&view(&a, vec![2, 2]), &view(&b, vec![2, 2])],
            |v| v[0].add(v[1]),
            &mut ov,
        )
        .unwrap();
        assert_eq!(out, vec![11.0, 22.0, 33.0, 44.0]);
    }

    #[test]
    fn test_map_into_rejects_wrong_output_shape() {
        let a = Backing::from_vec(vec![1.0f64, 2.0]);
        let mut out = vec![0.0f64; 2];
        let mut ov = BufferViewMut::new(&mut out, vec![1, 2]).unwrap();
        assert!(map_into(&[&view(&a, vec![2])], |v| v[0], &mut ov).is_err());
    }

    #[test]
    fn test_reduce_axis() {
        // [[1, 2, 3], [4, 5, 6]]
        let a = Backing::from_vec(vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let va = view(&a, vec![2, 3]);

        let mut rows = vec![0.0f64; 2];
        let mut rv = BufferViewMut::new(&mut rows, vec![2]).unwrap();
        reduce_axis(&[&va], 1, |v| v[0], ReduceOp::Sum, &mut rv).unwrap();
        assert_eq!(rows, vec![6.0, 15.0]);

        let mut cols = vec![0.0f64; 3];
        let mut cv = BufferViewMut::new(&mut cols, vec![3]).unwrap();
        reduce_axis(&[&va], 0, |v| v[0], ReduceOp::Max, &mut cv).unwrap();
        assert_eq!(cols, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_reduce_axis_empty_axis_fills_identity() {
        let a = Backing::<f64>::from_vec(vec![]);
        let mut out = vec![9.0f64; 3];
        let mut ov = BufferViewMut::new(&mut out, vec![3]).unwrap();
        reduce_axis(&[&view(&a, vec![0, 3])], 0, |v| v[0], ReduceOp::Product, &mut ov).unwrap();
        assert_eq!(out, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_reduce_axis_rank_error_leaves_output() {
        let a = Backing::from_vec(vec![2.0f64]);
        let va = view(&a, vec![1; crate::shape::MAX_RANK + 1]);
        let mut out = vec![7.0f64];
        let mut ov = BufferViewMut::new(&mut out, vec![1; crate::shape::MAX_RANK]).unwrap();
        assert!(reduce_axis(&[&va], 0, |v| v[0], ReduceOp::Sum, &mut ov).is_err());
        assert_eq!(out, vec![7.0]);
    }

    #[test]
    fn test_reduce_axis_rank3_middle() {
        let a = Backing::from_vec((0..24).map(|i| i as i64).collect());
        let va = view(&a, vec![2, 3, 4]);
        let mut out = vec![0i64; 8];
        let mut ov = BufferViewMut::new(&mut out, vec![2, 4]).unwrap();
        reduce_axis(&[&va], 1, |v| v[0], ReduceOp::Sum, &mut ov).unwrap();
        let mut expected = vec![0i64; 8];
        for i in 0..2 {
            for j in 0..3 {
                for k in 0..4 {
                    expected[i * 4 + k] += (i * 12 + j * 4 + k) as i64;
                }
            }
        }
        assert_eq!(out, expected);
    }
}
