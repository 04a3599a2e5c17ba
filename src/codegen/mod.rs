pub mod c;
#[cfg(feature = "llvm")]
pub mod llvm;

pub use c::emit_c;
