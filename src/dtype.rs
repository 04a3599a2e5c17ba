use std::fmt;

use crate::error::KernelError;

/// Scalar element types a buffer may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    I32,
    I64,
    F32,
    F64,
}

impl ElementType {
    pub fn is_float(&self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }

    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }

    /// C spelling used by the generated source.
    pub fn c_name(&self) -> &'static str {
        match self {
            ElementType::I32 => "int32_t",
            ElementType::I64 => "int64_t",
            ElementType::F32 => "float",
            ElementType::F64 => "double",
        }
    }

    /// NumPy dtype name, used in buffer struct names (`CNumpyBuffer_float64_1`).
    pub fn numpy_name(&self) -> &'static str {
        match self {
            ElementType::I32 => "int32",
            ElementType::I64 => "int64",
            ElementType::F32 => "float32",
            ElementType::F64 => "float64",
        }
    }

    pub fn parse(name: &str) -> crate::error::Result<Self> {
        match name {
            "i32" | "int32" => Ok(ElementType::I32),
            "i64" | "int64" => Ok(ElementType::I64),
            "f32" | "float32" => Ok(ElementType::F32),
            "f64" | "float64" => Ok(ElementType::F64),
            other => Err(KernelError::lower_error(format!(
                "unknown element type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        };
        write!(f, "{name}")
    }
}

/// Arithmetic every buffer element type supports.
///
/// Integer arithmetic wraps on overflow; float arithmetic is plain IEEE, so
/// NaN and infinities propagate without special-casing.
pub trait Element: Copy + PartialOrd + fmt::Debug + Send + Sync + 'static {
    const DTYPE: ElementType;

    fn zero() -> Self;
    fn one() -> Self;
    /// Smallest representable value (`-inf` for floats).
    fn lowest() -> Self;
    /// Largest representable value (`+inf` for floats).
    fn highest() -> Self;

    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn div(self, rhs: Self) -> Self;
    fn neg(self) -> Self;
    fn pow(self, exponent: Self) -> Self;

    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! float_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: ElementType = $dtype;

            fn zero() -> Self {
                0.0
            }
            fn one() -> Self {
                1.0
            }
            fn lowest() -> Self {
                <$ty>::NEG_INFINITY
            }
            fn highest() -> Self {
                <$ty>::INFINITY
            }
            fn add(self, rhs: Self) -> Self {
                self + rhs
            }
            fn sub(self, rhs: Self) -> Self {
                self - rhs
            }
            fn mul(self, rhs: Self) -> Self {
                self * rhs
            }
            fn div(self, rhs: Self) -> Self {
                self / rhs
            }
            fn neg(self) -> Self {
                -self
            }
            fn pow(self, exponent: Self) -> Self {
                self.powf(exponent)
            }
            fn from_f64(value: f64) -> Self {
                value as $ty
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

macro_rules! int_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: ElementType = $dtype;

            fn zero() -> Self {
                0
            }
            fn one() -> Self {
                1
            }
            fn lowest() -> Self {
                <$ty>::MIN
            }
            fn highest() -> Self {
                <$ty>::MAX
            }
            fn add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }
            fn sub(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }
            fn mul(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }
            // Total: a zero divisor yields 0, as numpy does for integers.
            fn div(self, rhs: Self) -> Self {
                if rhs == 0 {
                    0
                } else {
                    self.wrapping_div(rhs)
                }
            }
            fn neg(self) -> Self {
                self.wrapping_neg()
            }
            // Lowering rejects `^` on integer kernels; this only serves
            // direct combiner evaluation with non-negative exponents.
            fn pow(self, exponent: Self) -> Self {
                self.wrapping_pow(exponent.max(0) as u32)
            }
            fn from_f64(value: f64) -> Self {
                value as $ty
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

float_element!(f32, ElementType::F32);
float_element!(f64, ElementType::F64);
int_element!(i32, ElementType::I32);
int_element!(i64, ElementType::I64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(ElementType::F64.c_name(), "double");
        assert_eq!(ElementType::F64.numpy_name(), "float64");
        assert_eq!(ElementType::I32.numpy_name(), "int32");
        assert_eq!(ElementType::parse("float32").unwrap(), ElementType::F32);
        assert!(ElementType::parse("f16").is_err());
    }

    #[test]
    fn test_integer_wraps() {
        assert_eq!(Element::add(i32::MAX, 1), i32::MIN);
        assert_eq!(Element::mul(i64::MAX, 2), -2);
    }

    #[test]
    fn test_integer_division_is_total() {
        assert_eq!(Element::div(7i32, 0), 0);
        assert_eq!(Element::div(-7i64, 2), -3);
        assert_eq!(Element::div(i64::MIN, -1), i64::MIN);
        assert!(Element::div(1.0f64, 0.0).is_infinite());
    }

    #[test]
    fn test_float_identities() {
        assert_eq!(<f64 as Element>::lowest(), f64::NEG_INFINITY);
        assert_eq!(<f32 as Element>::highest(), f32::INFINITY);
        assert!(Element::add(f64::NAN, 1.0).is_nan());
    }
}
