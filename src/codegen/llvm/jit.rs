use std::ffi::c_void;

use inkwell::context::Context;
use log::debug;

use crate::buffer::{BufferView, BufferViewMut};
use crate::dtype::Element;
use crate::error::KernelError;
use crate::ir;
use crate::lower::{lower_kernel, KernelOutput, KernelSpec, LoweringOptions};
use crate::shape::MAX_RANK;

use super::target::{create_target_machine, initialize_native, opt_level_to_inkwell, optimize_module};
use super::CodeGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitOptions {
    /// 0-3, as in `-O`.
    pub opt_level: u8,
}

impl Default for JitOptions {
    fn default() -> Self {
        Self { opt_level: 2 }
    }
}

/// Descriptor handed to JIT-compiled code. Its prefix matches
/// `RawBuffer<T, R>` for every `R <= MAX_RANK`, and generated code only reads
/// `shape[k]` for `k < R`.
#[repr(C)]
struct JitDescriptor {
    arr: *mut c_void,
    data: *mut c_void,
    length: usize,
    shape: [i32; MAX_RANK],
}

impl JitDescriptor {
    fn new(
        arr: *const c_void,
        data: *mut c_void,
        dims: &[usize],
        length: usize,
    ) -> crate::error::Result<Self> {
        let mut shape = [0i32; MAX_RANK];
        for (slot, &extent) in shape.iter_mut().zip(dims) {
            *slot = i32::try_from(extent).map_err(|_| {
                KernelError::shape_error(format!("extent {extent} does not fit in int32_t"))
            })?;
        }
        Ok(Self {
            arr: arr as *mut c_void,
            data,
            length,
            shape,
        })
    }
}

/// Textual LLVM IR for `module`, optimized when `opt_level > 0`.
pub fn emit_llvm_ir(module: &ir::Module, options: &JitOptions) -> crate::error::Result<String> {
    let context = Context::create();
    let mut codegen = CodeGenerator::new(&context, "bufkern");
    codegen.compile_module(module)?;
    if options.opt_level > 0 {
        let machine = create_target_machine(options.opt_level)?;
        optimize_module(codegen.module(), &machine, options.opt_level)?;
    }
    Ok(codegen.print_ir())
}

/// Native object file for `module`.
pub fn emit_object(
    module: &ir::Module,
    path: &std::path::Path,
    options: &JitOptions,
) -> crate::error::Result<()> {
    let context = Context::create();
    let mut codegen = CodeGenerator::new(&context, "bufkern");
    codegen.compile_module(module)?;
    super::target::write_object_file(codegen.module(), path, options.opt_level)
}

/// Lower, JIT-compile and run one kernel.
///
/// Operands must all have the kernel's rank and one shared shape; `out` is
/// required for map kernels and must share that shape too. Returns the
/// reduced scalar for reduction kernels and `None` for map kernels.
pub fn jit_call<T: Element>(
    spec: &KernelSpec,
    lowering: &LoweringOptions,
    options: &JitOptions,
    operands: &[&BufferView<'_, T>],
    out: Option<&mut BufferViewMut<'_, T>>,
) -> crate::error::Result<Option<T>> {
    if T::DTYPE != spec.dtype {
        return Err(KernelError::codegen_error(format!(
            "kernel '{}' is {}, called with {} buffers",
            spec.name,
            spec.dtype,
            T::DTYPE
        )));
    }
    if operands.len() != spec.operands.len() {
        return Err(KernelError::codegen_error(format!(
            "kernel '{}' takes {} operand(s), {} given",
            spec.name,
            spec.operands.len(),
            operands.len()
        )));
    }
    let first = operands
        .first()
        .ok_or_else(|| KernelError::shape_error("a kernel needs at least one operand"))?;
    let shape = first.shape().clone();
    if shape.rank() != spec.rank {
        return Err(KernelError::shape_error(format!(
            "kernel '{}' has rank {}, operands have shape {shape}",
            spec.name, spec.rank
        )));
    }
    let mut descriptors = Vec::with_capacity(operands.len() + 1);
    for (k, operand) in operands.iter().enumerate() {
        if operand.shape() != &shape {
            return Err(KernelError::shape_error(format!(
                "operand {k} has shape {}, expected {shape}",
                operand.shape()
            )));
        }
        descriptors.push(JitDescriptor::new(
            operand.backing().as_ptr(),
            operand.data().as_ptr() as *mut c_void,
            shape.dims(),
            operand.len(),
        )?);
    }
    match (spec.output, out) {
        (KernelOutput::Map, Some(out)) => {
            if out.shape() != &shape {
                return Err(KernelError::shape_error(format!(
                    "output has shape {}, expected {shape}",
                    out.shape()
                )));
            }
            let arr = out.backing().as_ptr();
            let length = out.len();
            descriptors.push(JitDescriptor::new(
                arr,
                out.data_mut().as_mut_ptr() as *mut c_void,
                shape.dims(),
                length,
            )?);
        }
        (KernelOutput::Map, None) => {
            return Err(KernelError::codegen_error(format!(
                "map kernel '{}' needs an output buffer",
                spec.name
            )))
        }
        (KernelOutput::Reduce(_), Some(_)) => {
            return Err(KernelError::codegen_error(format!(
                "reduction kernel '{}' does not take an output buffer",
                spec.name
            )))
        }
        (KernelOutput::Reduce(_), None) => {}
    }
    let args: Vec<*const JitDescriptor> = descriptors.iter().map(|d| d as *const _).collect();

    let func = lower_kernel(spec, lowering)?;
    let context = Context::create();
    let mut codegen = CodeGenerator::new(&context, &spec.name);
    codegen.compile_module(&ir::Module::new(vec![func]))?;
    if options.opt_level > 0 {
        let machine = create_target_machine(options.opt_level)?;
        optimize_module(codegen.module(), &machine, options.opt_level)?;
    } else {
        initialize_native()?;
    }
    let engine = codegen
        .module()
        .create_jit_execution_engine(opt_level_to_inkwell(options.opt_level))
        .map_err(|e| KernelError::codegen_error(format!("failed to create JIT: {e}")))?;
    debug!("jit-compiled kernel '{}' at O{}", spec.name, options.opt_level);

    // The descriptors above match the signature the generator emitted, and
    // every operand shares the shape the loop bounds are read from.
    match spec.output {
        KernelOutput::Reduce(_) => {
            let kernel = unsafe {
                engine.get_function::<unsafe extern "C" fn(*const *const JitDescriptor) -> T>(
                    &spec.name,
                )
            }
            .map_err(|e| KernelError::codegen_error(format!("JIT lookup failed: {e}")))?;
            Ok(Some(unsafe { kernel.call(args.as_ptr()) }))
        }
        KernelOutput::Map => {
            let kernel = unsafe {
                engine.get_function::<unsafe extern "C" fn(*const *const JitDescriptor)>(&spec.name)
            }
            .map_err(|e| KernelError::codegen_error(format!("JIT lookup failed: {e}")))?;
            unsafe { kernel.call(args.as_ptr()) };
            Ok(None)
        }
    }
}
