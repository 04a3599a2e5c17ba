//! `extern "C"` entry points taking `CNumpyBuffer` descriptors by value.
//!
//! Each function reads two descriptors, checks their shapes agree and
//! returns the dot product. Invalid descriptors produce NaN and an error log
//! entry; nothing unwinds across the boundary.

use log::error;

use crate::buffer::RawBuffer;
use crate::dtype::Element;
use crate::reduce::dot_product;

/// # Safety
/// Both descriptors must satisfy the contract of [`RawBuffer::view`].
unsafe fn dot_raw<T: Element, const R: usize>(
    a: &RawBuffer<T, R>,
    b: &RawBuffer<T, R>,
) -> crate::error::Result<T> {
    let a = a.view()?;
    let b = b.view()?;
    dot_product(&a, &b)
}

macro_rules! dot_product_entry {
    ($($name:ident: $ty:ty, $rank:literal;)*) => {
        $(
            #[doc = concat!("Dot product of two rank-", stringify!($rank), " buffers.")]
            ///
            /// # Safety
            /// `data` of each descriptor must point to `length` initialized
            /// elements that stay valid for the duration of the call.
            #[no_mangle]
            pub unsafe extern "C" fn $name(a: RawBuffer<$ty, $rank>, b: RawBuffer<$ty, $rank>) -> $ty {
                match dot_raw(&a, &b) {
                    Ok(value) => value,
                    Err(e) => {
                        error!("{}: {e}", stringify!($name));
                        <$ty>::NAN
                    }
                }
            }
        )*
    };
}

dot_product_entry! {
    bufkern_dot_product_float64_0: f64, 0;
    bufkern_dot_product_float64_1: f64, 1;
    bufkern_dot_product_float64_2: f64, 2;
    bufkern_dot_product_float64_3: f64, 3;
    bufkern_dot_product_float32_0: f32, 0;
    bufkern_dot_product_float32_1: f32, 1;
    bufkern_dot_product_float32_2: f32, 2;
    bufkern_dot_product_float32_3: f32, 3;
}
