//! LLVM backend for loop IR.
//!
//! Generated functions take a single pointer to an array of descriptor
//! pointers, one per buffer parameter in declaration order. Each descriptor
//! has the `RawBuffer<T, R>` layout: `{ ptr arr, ptr data, i64 length,
//! [R x i32] shape }`. Passing descriptors indirectly keeps the signature
//! independent of how a platform lowers by-value structs.

mod expressions;
pub mod jit;
mod statements;
pub mod target;

use std::collections::HashMap;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::types::{BasicType, BasicTypeEnum, StructType};
use inkwell::values::{FunctionValue, PointerValue};
use inkwell::AddressSpace;

use crate::dtype::ElementType;
use crate::error::KernelError;
use crate::ir::{self, Type};

pub use jit::{emit_llvm_ir, emit_object, jit_call, JitOptions};

/// A buffer parameter: pointer to its descriptor plus the descriptor type.
#[derive(Clone, Copy)]
pub(crate) struct BufferParam<'ctx> {
    pub(crate) desc: PointerValue<'ctx>,
    pub(crate) desc_type: StructType<'ctx>,
    pub(crate) elem: ElementType,
}

pub struct CodeGenerator<'ctx> {
    pub(crate) context: &'ctx Context,
    pub(crate) module: Module<'ctx>,
    pub(crate) builder: Builder<'ctx>,
    pub(crate) variables: HashMap<String, (PointerValue<'ctx>, Type)>,
    pub(crate) buffers: HashMap<String, BufferParam<'ctx>>,
    pub(crate) functions: HashMap<String, FunctionValue<'ctx>>,
}

impl<'ctx> CodeGenerator<'ctx> {
    pub fn new(context: &'ctx Context, module_name: &str) -> Self {
        let module = context.create_module(module_name);
        let builder = context.create_builder();
        Self {
            context,
            module,
            builder,
            variables: HashMap::new(),
            buffers: HashMap::new(),
            functions: HashMap::new(),
        }
    }

    pub fn compile_module(&mut self, module: &ir::Module) -> crate::error::Result<()> {
        for func in &module.functions {
            self.declare_function(func)?;
        }
        for func in &module.functions {
            self.compile_function(func)?;
        }
        Ok(())
    }

    pub(crate) fn elem_type(&self, elem: ElementType) -> BasicTypeEnum<'ctx> {
        match elem {
            ElementType::I32 => self.context.i32_type().into(),
            ElementType::I64 => self.context.i64_type().into(),
            ElementType::F32 => self.context.f32_type().into(),
            ElementType::F64 => self.context.f64_type().into(),
        }
    }

    pub(crate) fn llvm_type(&self, ty: &Type) -> BasicTypeEnum<'ctx> {
        match ty {
            Type::Index | Type::Size => self.context.i64_type().into(),
            Type::Bool => self.context.bool_type().into(),
            Type::Elem(e) => self.elem_type(*e),
            Type::Buffer { .. } => self.context.ptr_type(AddressSpace::default()).into(),
        }
    }

    /// `{ ptr, ptr, i64, [rank x i32] }`, field for field `RawBuffer<T, R>`.
    pub(crate) fn descriptor_type(&self, rank: usize) -> StructType<'ctx> {
        let ptr = self.context.ptr_type(AddressSpace::default());
        self.context.struct_type(
            &[
                ptr.into(),
                ptr.into(),
                self.context.i64_type().into(),
                self.context.i32_type().array_type(rank as u32).into(),
            ],
            false,
        )
    }

    fn declare_function(&mut self, func: &ir::Function) -> crate::error::Result<()> {
        if let Some(param) = func.params.iter().find(|p| !matches!(p.ty, Type::Buffer { .. })) {
            return Err(KernelError::codegen_error(format!(
                "scalar parameter '{}' is not supported by the LLVM backend",
                param.name
            )));
        }
        let args = self.context.ptr_type(AddressSpace::default());
        let fn_type = match &func.return_type {
            Some(ty) => self.llvm_type(ty).fn_type(&[args.into()], false),
            None => self.context.void_type().fn_type(&[args.into()], false),
        };
        let function = self
            .module
            .add_function(&func.name, fn_type, Some(Linkage::External));
        self.functions.insert(func.name.clone(), function);
        Ok(())
    }

    pub fn module(&self) -> &Module<'ctx> {
        &self.module
    }

    pub fn print_ir(&self) -> String {
        self.module.print_to_string().to_string()
    }
}
