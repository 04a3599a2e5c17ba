//! Shapes and the row-major linearization every kernel shares.
//!
//! A linear index `i` in `0..len` maps one-to-one to a coordinate through
//! mixed-radix decomposition against the extents (outermost first). All
//! operands of one kernel use the same [`Linearization`], derived from their
//! shared shape, so the element fetched from each operand at step `i` sits at
//! the same logical coordinate.

use std::fmt;

use crate::error::KernelError;

/// Highest rank a kernel or descriptor may carry.
pub const MAX_RANK: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Rank-0 shape: one element, no extents.
    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Element count. The empty product is 1, so a scalar holds one element.
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    /// [`Shape::len`] for extents that did not come from a live allocation.
    pub fn checked_len(&self) -> crate::error::Result<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| KernelError::shape_error(format!("shape {self} overflows usize")))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Row-major strides in elements: the innermost stride is 1.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1usize; self.dims.len()];
        for k in (0..self.dims.len().saturating_sub(1)).rev() {
            strides[k] = strides[k + 1] * self.dims[k + 1];
        }
        strides
    }

    /// Coordinate to linear index.
    pub fn linearize(&self, coord: &[usize]) -> crate::error::Result<usize> {
        if coord.len() != self.dims.len() {
            return Err(KernelError::shape_error(format!(
                "coordinate of rank {} used with shape {self}",
                coord.len()
            )));
        }
        let mut linear = 0usize;
        for (k, (&c, &extent)) in coord.iter().zip(&self.dims).enumerate() {
            if c >= extent {
                return Err(KernelError::shape_error(format!(
                    "coordinate {c} out of range for axis {k} of shape {self}"
                )));
            }
            linear = linear * extent + c;
        }
        Ok(linear)
    }

    /// Linear index to coordinate (mixed-radix decomposition, innermost
    /// digit first).
    pub fn delinearize(&self, linear: usize, coord: &mut [usize]) -> crate::error::Result<()> {
        if coord.len() != self.dims.len() {
            return Err(KernelError::shape_error(format!(
                "coordinate of rank {} used with shape {self}",
                coord.len()
            )));
        }
        if linear >= self.len() {
            return Err(KernelError::shape_error(format!(
                "linear index {linear} out of range for shape {self}"
            )));
        }
        let mut rem = linear;
        for k in (0..self.dims.len()).rev() {
            coord[k] = rem % self.dims[k];
            rem /= self.dims[k];
        }
        Ok(())
    }

    /// Shape with `axis` removed.
    pub fn without_axis(&self, axis: usize) -> crate::error::Result<Shape> {
        if axis >= self.dims.len() {
            return Err(KernelError::shape_error(format!(
                "axis {axis} out of range for shape {self}"
            )));
        }
        let dims = self
            .dims
            .iter()
            .enumerate()
            .filter(|&(k, _)| k != axis)
            .map(|(_, &d)| d)
            .collect();
        Ok(Shape::new(dims))
    }

    /// Extents as the ABI's signed 32-bit tuple.
    pub fn to_abi<const R: usize>(&self) -> crate::error::Result<[i32; R]> {
        if self.dims.len() != R {
            return Err(KernelError::shape_error(format!(
                "shape {self} has rank {}, descriptor expects rank {R}",
                self.dims.len()
            )));
        }
        let mut out = [0i32; R];
        for (slot, &extent) in out.iter_mut().zip(&self.dims) {
            *slot = i32::try_from(extent).map_err(|_| {
                KernelError::shape_error(format!("extent {extent} does not fit in int32_t"))
            })?;
        }
        Ok(out)
    }

    /// Shape from the ABI tuple; negative extents are rejected.
    pub fn from_abi(extents: &[i32]) -> crate::error::Result<Shape> {
        let dims = extents
            .iter()
            .map(|&e| {
                usize::try_from(e)
                    .map_err(|_| KernelError::shape_error(format!("negative extent {e}")))
            })
            .collect::<crate::error::Result<Vec<usize>>>()?;
        Ok(Shape::new(dims))
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

/// Allocation-free linearization for one shared shape.
///
/// `index(i)` decomposes `i` against the extents and recomposes the
/// coordinate with row-major strides. For the dense row-major buffers this
/// crate accepts the result equals `i`; rank 1 is the trivial case and rank 0
/// maps its single step to 0.
#[derive(Debug, Clone, Copy)]
pub struct Linearization {
    rank: usize,
    dims: [usize; MAX_RANK],
    strides: [usize; MAX_RANK],
}

impl Linearization {
    pub fn new(shape: &Shape) -> crate::error::Result<Self> {
        let rank = shape.rank();
        if rank > MAX_RANK {
            return Err(KernelError::shape_error(format!(
                "rank {rank} exceeds the supported maximum of {MAX_RANK}"
            )));
        }
        Ok(Self::within_limit(shape))
    }

    /// Infallible variant for callers that already bounded the rank. Extents
    /// past [`MAX_RANK`] are ignored.
    pub fn within_limit(shape: &Shape) -> Self {
        debug_assert!(shape.rank() <= MAX_RANK);
        let rank = shape.rank().min(MAX_RANK);
        let mut dims = [0usize; MAX_RANK];
        let mut strides = [0usize; MAX_RANK];
        dims[..rank].copy_from_slice(&shape.dims()[..rank]);
        let mut stride = 1usize;
        for k in (0..rank).rev() {
            strides[k] = stride;
            stride *= dims[k];
        }
        Self {
            rank,
            dims,
            strides,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn index(&self, linear: usize) -> usize {
        let mut rem = linear;
        let mut index = 0usize;
        for k in (0..self.rank).rev() {
            let extent = self.dims[k];
            index += (rem % extent) * self.strides[k];
            rem /= extent;
        }
        index
    }
}

/// Row-major coordinate iterator (odometer order).
pub struct Coords<'s> {
    shape: &'s Shape,
    next: Option<Vec<usize>>,
}

impl<'s> Coords<'s> {
    pub fn new(shape: &'s Shape) -> Self {
        let next = if shape.is_empty() {
            None
        } else {
            Some(vec![0; shape.rank()])
        };
        Self { shape, next }
    }
}

impl Iterator for Coords<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.next.take()?;
        let mut following = current.clone();
        let dims = self.shape.dims();
        for axis in (0..following.len()).rev() {
            following[axis] += 1;
            if following[axis] < dims[axis] {
                self.next = Some(following);
                return Some(current);
            }
            following[axis] = 0;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_and_rank() {
        assert_eq!(Shape::scalar().len(), 1);
        assert_eq!(Shape::scalar().rank(), 0);
        assert_eq!(Shape::new(vec![2, 3, 4]).len(), 24);
        assert!(Shape::new(vec![3, 0, 2]).is_empty());
    }

    #[test]
    fn test_checked_len_overflow() {
        assert_eq!(Shape::new(vec![2, 3, 4]).checked_len().unwrap(), 24);
        assert_eq!(Shape::scalar().checked_len().unwrap(), 1);
        let huge = Shape::new(vec![1 << 30, 1 << 30, 1 << 30, 1 << 30, 16]);
        assert!(huge.checked_len().is_err());
        // A zero extent anywhere still makes the product well defined.
        assert_eq!(Shape::new(vec![0, usize::MAX, 2]).checked_len().unwrap(), 0);
    }

    #[test]
    fn test_strides_row_major() {
        assert_eq!(Shape::new(vec![2, 3, 4]).strides(), vec![12, 4, 1]);
        assert_eq!(Shape::new(vec![5]).strides(), vec![1]);
        assert!(Shape::scalar().strides().is_empty());
    }

    #[test]
    fn test_linearize_delinearize() {
        let shape = Shape::new(vec![2, 3, 4]);
        assert_eq!(shape.linearize(&[1, 2, 3]).unwrap(), 23);
        assert_eq!(shape.linearize(&[0, 1, 0]).unwrap(), 4);
        let mut coord = [0usize; 3];
        shape.delinearize(17, &mut coord).unwrap();
        assert_eq!(coord, [1, 1, 1]);
        assert!(shape.linearize(&[2, 0, 0]).is_err());
        assert!(shape.delinearize(24, &mut coord).is_err());
    }

    #[test]
    fn test_linearization_is_identity_for_dense_shapes() {
        for dims in [vec![], vec![7], vec![3, 5], vec![2, 3, 4], vec![1, 1, 6, 1]] {
            let shape = Shape::new(dims);
            let lin = Linearization::new(&shape).unwrap();
            for i in 0..shape.len() {
                assert_eq!(lin.index(i), i, "shape {shape}");
            }
        }
    }

    #[test]
    fn test_linearization_rejects_high_rank() {
        let shape = Shape::new(vec![1; MAX_RANK + 1]);
        assert!(Linearization::new(&shape).is_err());
    }

    #[test]
    fn test_coords_order() {
        let shape = Shape::new(vec![2, 2]);
        let coords: Vec<Vec<usize>> = Coords::new(&shape).collect();
        assert_eq!(coords, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
        assert_eq!(Coords::new(&Shape::scalar()).count(), 1);
        assert_eq!(Coords::new(&Shape::new(vec![3, 0])).count(), 0);
    }

    #[test]
    fn test_abi_round_trip_and_range_checks() {
        let shape = Shape::new(vec![4, 2]);
        assert_eq!(shape.to_abi::<2>().unwrap(), [4, 2]);
        assert!(shape.to_abi::<1>().is_err());
        assert!(Shape::new(vec![1usize << 40]).to_abi::<1>().is_err());
        assert!(Shape::from_abi(&[3, -1]).is_err());
        assert_eq!(Shape::from_abi(&[3, 1]).unwrap(), Shape::new(vec![3, 1]));
    }

    #[test]
    fn test_without_axis() {
        let shape = Shape::new(vec![2, 3, 4]);
        assert_eq!(shape.without_axis(1).unwrap(), Shape::new(vec![2, 4]));
        assert!(shape.without_axis(3).is_err());
    }
}
