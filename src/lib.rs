pub mod abi;
pub mod buffer;
pub mod codegen;
pub mod config;
pub mod dtype;
pub mod error;
pub mod expr;
pub mod interp;
pub mod ir;
pub mod lower;
pub mod manifest;
pub mod native;
pub mod reduce;
pub mod shape;

use std::path::{Path, PathBuf};

use config::BackendConfig;
use error::KernelError;
use lower::{KernelSpec, LoweringOptions};

pub use buffer::{Backing, BufferView, BufferViewMut, RawBuffer};
pub use dtype::{Element, ElementType};
pub use reduce::{dot_product, reduce, ReduceOp};
pub use shape::{Shape, MAX_RANK};

pub fn lower(specs: &[KernelSpec], options: &LoweringOptions) -> error::Result<ir::Module> {
    lower::lower_module(specs, options)
}

/// C source for `specs`.
pub fn compile_to_c(specs: &[KernelSpec], options: &LoweringOptions) -> error::Result<String> {
    codegen::emit_c(&lower(specs, options)?)
}

/// Artifacts written by [`build_library`].
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub source: PathBuf,
    pub library: PathBuf,
    pub manifest: PathBuf,
}

/// Emit C for `specs` into `dir`, build it into a shared library and write
/// the JSON manifest next to it.
pub fn build_library(
    specs: &[KernelSpec],
    options: &LoweringOptions,
    config: &BackendConfig,
    dir: &Path,
    stem: &str,
) -> error::Result<BuildOutput> {
    let source = compile_to_c(specs, options)?;
    let library = native::compile_c_source(config, &source, dir, stem)?;
    let library_name = library
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(stem)
        .to_string();
    let manifest = dir.join(format!("{stem}.json"));
    std::fs::write(&manifest, manifest::generate_json(specs, &library_name)).map_err(|e| {
        KernelError::native_error(format!("failed to write '{}': {e}", manifest.display()))
    })?;
    Ok(BuildOutput {
        source: dir.join(format!("{stem}.c")),
        library,
        manifest,
    })
}

#[cfg(feature = "llvm")]
pub fn compile_to_ir(
    specs: &[KernelSpec],
    options: &LoweringOptions,
    jit: &codegen::llvm::JitOptions,
) -> error::Result<String> {
    codegen::llvm::emit_llvm_ir(&lower(specs, options)?, jit)
}
