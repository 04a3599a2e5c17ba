//! Buffer descriptors: the owning backing, borrowed views over it, and the
//! `#[repr(C)]` descriptor generated kernels receive by value.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::dtype::Element;
use crate::error::KernelError;
use crate::shape::Shape;

/// Reference-counted allocation a view borrows from.
#[derive(Debug, Clone)]
pub struct Backing<T> {
    cells: Arc<[T]>,
}

impl<T: Element> Backing<T> {
    pub fn from_vec(values: Vec<T>) -> Self {
        Self {
            cells: Arc::from(values),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.cells
    }

    /// Opaque token identifying this allocation for as long as it is borrowed.
    pub fn handle(&self) -> BackingHandle<'_> {
        BackingHandle::new(Arc::as_ptr(&self.cells) as *const T as *const c_void)
    }
}

/// Non-owning ownership token carried by a view. It is compared and passed
/// through to the ABI, never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackingHandle<'a> {
    ptr: *const c_void,
    _borrow: PhantomData<&'a ()>,
}

// The handle is an opaque address; no access goes through it.
unsafe impl Send for BackingHandle<'_> {}
unsafe impl Sync for BackingHandle<'_> {}

impl<'a> BackingHandle<'a> {
    fn new(ptr: *const c_void) -> Self {
        Self {
            ptr,
            _borrow: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.ptr
    }
}

fn check_extent(shape: &Shape, offset: usize, available: usize) -> crate::error::Result<usize> {
    let length = shape.checked_len()?;
    match offset.checked_add(length) {
        Some(end) if end <= available => Ok(length),
        _ => Err(KernelError::shape_error(format!(
            "view of shape {shape} at offset {offset} exceeds backing of {available} elements"
        ))),
    }
}

/// Read-only array view: backing handle, typed data, length, shape.
#[derive(Debug, Clone)]
pub struct BufferView<'a, T> {
    backing: BackingHandle<'a>,
    data: &'a [T],
    shape: Shape,
}

impl<'a, T: Element> BufferView<'a, T> {
    /// View `shape.len()` elements of `backing` starting at `offset`.
    pub fn new(
        backing: &'a Backing<T>,
        offset: usize,
        shape: impl Into<Shape>,
    ) -> crate::error::Result<Self> {
        let shape = shape.into();
        let length = check_extent(&shape, offset, backing.len())?;
        Ok(Self {
            backing: backing.handle(),
            data: &backing.as_slice()[offset..offset + length],
            shape,
        })
    }

    /// View the whole backing as `shape`; lengths must match exactly.
    pub fn contiguous(backing: &'a Backing<T>, shape: impl Into<Shape>) -> crate::error::Result<Self> {
        let shape = shape.into();
        let length = shape.checked_len()?;
        if length != backing.len() {
            return Err(KernelError::shape_error(format!(
                "shape {shape} holds {length} elements, backing holds {}",
                backing.len()
            )));
        }
        Self::new(backing, 0, shape)
    }

    /// Rank-0 view of the element at `offset`.
    pub fn scalar(backing: &'a Backing<T>, offset: usize) -> crate::error::Result<Self> {
        Self::new(backing, offset, Shape::scalar())
    }

    /// View over memory owned elsewhere (a foreign descriptor).
    fn from_parts(backing: BackingHandle<'a>, data: &'a [T], shape: Shape) -> Self {
        Self {
            backing,
            data,
            shape,
        }
    }

    pub fn backing(&self) -> BackingHandle<'a> {
        self.backing
    }

    pub fn data(&self) -> &'a [T] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn get(&self, linear: usize) -> Option<T> {
        self.data.get(linear).copied()
    }

    pub fn at(&self, coord: &[usize]) -> crate::error::Result<T> {
        let linear = self.shape.linearize(coord)?;
        Ok(self.data[linear])
    }

    /// ABI descriptor for this view. The descriptor borrows the view's
    /// memory; it must not outlive the backing.
    pub fn to_raw<const R: usize>(&self) -> crate::error::Result<RawBuffer<T, R>> {
        Ok(RawBuffer {
            arr: self.backing.as_ptr() as *mut c_void,
            data: self.data.as_ptr() as *mut T,
            length: self.data.len(),
            shape: self.shape.to_abi::<R>()?,
        })
    }
}

/// Writable view, used for kernels that produce an output buffer.
#[derive(Debug)]
pub struct BufferViewMut<'a, T> {
    backing: BackingHandle<'a>,
    data: &'a mut [T],
    shape: Shape,
}

impl<'a, T: Element> BufferViewMut<'a, T> {
    /// Writable view over caller-owned storage; `data.len()` must equal the
    /// shape's element count.
    pub fn new(data: &'a mut [T], shape: impl Into<Shape>) -> crate::error::Result<Self> {
        let shape = shape.into();
        let length = shape.checked_len()?;
        if length != data.len() {
            return Err(KernelError::shape_error(format!(
                "shape {shape} holds {length} elements, output slice holds {}",
                data.len()
            )));
        }
        let backing = BackingHandle::new(data.as_ptr() as *const c_void);
        Ok(Self {
            backing,
            data,
            shape,
        })
    }

    pub fn backing(&self) -> BackingHandle<'a> {
        self.backing
    }

    pub fn data(&self) -> &[T] {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut *self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn to_raw<const R: usize>(&mut self) -> crate::error::Result<RawBuffer<T, R>> {
        Ok(RawBuffer {
            arr: self.backing.as_ptr() as *mut c_void,
            data: self.data.as_mut_ptr(),
            length: self.data.len(),
            shape: self.shape.to_abi::<R>()?,
        })
    }
}

/// The C descriptor `struct CNumpyBuffer_<dtype>_<R>`, field for field:
///
/// ```c
/// struct CNumpyBuffer_float64_1 {
///     void* arr;
///     double* data;
///     size_t length;
///     struct C_CTuple shape;
/// };
/// ```
///
/// `[i32; R]` has the layout of a struct of `R` `int32_t` fields. For
/// `R == 0` the array is zero-sized, matching the C struct without `shape`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawBuffer<T, const R: usize> {
    pub arr: *mut c_void,
    pub data: *mut T,
    pub length: usize,
    pub shape: [i32; R],
}

impl<T: Element, const R: usize> RawBuffer<T, R> {
    /// Validated shape: extents non-negative and consistent with `length`.
    pub fn shape(&self) -> crate::error::Result<Shape> {
        let shape = Shape::from_abi(&self.shape)?;
        if shape.checked_len()? != self.length {
            return Err(KernelError::shape_error(format!(
                "descriptor length {} disagrees with shape {shape}",
                self.length
            )));
        }
        Ok(shape)
    }

    /// Borrow the described memory as a view.
    ///
    /// # Safety
    /// `data` must point to `length` initialized elements that stay valid and
    /// unmodified for `'a`, and `arr` must identify an allocation that
    /// outlives `'a`. A null `data` is accepted only when `length == 0`.
    pub unsafe fn view<'a>(&self) -> crate::error::Result<BufferView<'a, T>> {
        let shape = self.shape()?;
        let data: &'a [T] = if self.length == 0 {
            &[]
        } else if self.data.is_null() {
            return Err(KernelError::shape_error(
                "descriptor has a null data pointer",
            ));
        } else {
            std::slice::from_raw_parts(self.data as *const T, self.length)
        };
        Ok(BufferView::from_parts(
            BackingHandle::new(self.arr as *const c_void),
            data,
            shape,
        ))
    }
}
