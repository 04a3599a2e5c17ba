use inkwell::types::BasicTypeEnum;
use inkwell::values::{FunctionValue, PointerValue};
use inkwell::AddressSpace;

use crate::error::KernelError;
use crate::ir::{self, BinOp, Stmt, Type};

use super::{BufferParam, CodeGenerator};

impl<'ctx> CodeGenerator<'ctx> {
    pub(crate) fn compile_function(&mut self, func: &ir::Function) -> crate::error::Result<()> {
        let function = *self.functions.get(&func.name).ok_or_else(|| {
            KernelError::codegen_error(format!("undeclared function '{}'", func.name))
        })?;

        let entry = self.context.append_basic_block(function, "entry");
        self.builder.position_at_end(entry);

        self.variables.clear();
        self.buffers.clear();
        let args = function
            .get_nth_param(0)
            .ok_or_else(|| KernelError::codegen_error("missing argument array"))?
            .into_pointer_value();
        let ptr_type = self.context.ptr_type(AddressSpace::default());
        for (k, param) in func.params.iter().enumerate() {
            let Type::Buffer { elem, rank } = param.ty else {
                return Err(KernelError::codegen_error(format!(
                    "parameter '{}' is not a buffer",
                    param.name
                )));
            };
            let slot = unsafe {
                self.builder.build_in_bounds_gep(
                    ptr_type,
                    args,
                    &[self.context.i64_type().const_int(k as u64, false)],
                    &format!("{}.slot", param.name),
                )
            }
            .map_err(|e| KernelError::codegen_error(e.to_string()))?;
            let desc = self
                .builder
                .build_load(ptr_type, slot, &param.name)
                .map_err(|e| KernelError::codegen_error(e.to_string()))?
                .into_pointer_value();
            let desc_type = self.descriptor_type(rank);
            self.buffers.insert(
                param.name.clone(),
                BufferParam {
                    desc,
                    desc_type,
                    elem,
                },
            );
        }

        let terminated = self.compile_block(&func.body, function)?;
        if !terminated {
            match &func.return_type {
                Some(ty) => {
                    let zero = self.llvm_type(ty).const_zero();
                    self.builder
                        .build_return(Some(&zero))
                        .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                }
                None => {
                    self.builder
                        .build_return(None)
                        .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                }
            }
        }

        if !function.verify(true) {
            return Err(KernelError::codegen_error(format!(
                "LLVM verification failed for function '{}'",
                func.name
            )));
        }
        Ok(())
    }

    /// Compile statements until one terminates the block. Returns whether the
    /// block ended in a terminator.
    pub(crate) fn compile_block(
        &mut self,
        body: &[Stmt],
        function: FunctionValue<'ctx>,
    ) -> crate::error::Result<bool> {
        for stmt in body {
            if self.compile_stmt(stmt, function)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stack slot in the entry block, so loop bodies do not grow the stack.
    fn entry_alloca(
        &self,
        function: FunctionValue<'ctx>,
        ty: BasicTypeEnum<'ctx>,
        name: &str,
    ) -> crate::error::Result<PointerValue<'ctx>> {
        let current = self.builder.get_insert_block();
        let entry = function
            .get_first_basic_block()
            .ok_or_else(|| KernelError::codegen_error("function has no entry block"))?;
        match entry.get_first_instruction() {
            Some(first) => self.builder.position_before(&first),
            None => self.builder.position_at_end(entry),
        }
        let slot = self
            .builder
            .build_alloca(ty, name)
            .map_err(|e| KernelError::codegen_error(e.to_string()))?;
        if let Some(block) = current {
            self.builder.position_at_end(block);
        }
        Ok(slot)
    }

    fn variable(&self, var: &ir::Var) -> crate::error::Result<(PointerValue<'ctx>, Type)> {
        self.variables
            .get(&var.name)
            .copied()
            .ok_or_else(|| KernelError::codegen_error(format!("undefined variable '{}'", var.name)))
    }

    pub(crate) fn compile_stmt(
        &mut self,
        stmt: &Stmt,
        function: FunctionValue<'ctx>,
    ) -> crate::error::Result<bool> {
        match stmt {
            Stmt::Declare(var, value) => {
                let llvm_ty = self.llvm_type(&var.ty);
                let slot = self.entry_alloca(function, llvm_ty, &var.name)?;
                let val = self.compile_expr(value, function)?;
                self.builder
                    .build_store(slot, val)
                    .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                self.variables.insert(var.name.clone(), (slot, var.ty));
                Ok(false)
            }
            Stmt::Assign(var, value) => {
                let (slot, _) = self.variable(var)?;
                let val = self.compile_expr(value, function)?;
                self.builder
                    .build_store(slot, val)
                    .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                Ok(false)
            }
            Stmt::AddAssign(var, value) => {
                let sum = ir::Expr::binary(ir::Expr::var(var), BinOp::Add, value.clone());
                let (slot, _) = self.variable(var)?;
                let val = self.compile_expr(&sum, function)?;
                self.builder
                    .build_store(slot, val)
                    .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                Ok(false)
            }
            Stmt::Store(buf, index, value) => {
                let elem_ptr = self.element_pointer(buf, index, function)?;
                let val = self.compile_expr(value, function)?;
                self.builder
                    .build_store(elem_ptr, val)
                    .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                Ok(false)
            }
            Stmt::ForLoop {
                var,
                start,
                end,
                body,
            } => {
                let llvm_ty = self.llvm_type(&var.ty);
                let slot = self.entry_alloca(function, llvm_ty, &var.name)?;
                let start_val = self.compile_expr(start, function)?;
                let end_val = self.compile_expr(end, function)?.into_int_value();
                self.builder
                    .build_store(slot, start_val)
                    .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                self.variables.insert(var.name.clone(), (slot, var.ty));

                let cond_bb = self.context.append_basic_block(function, "for_cond");
                let body_bb = self.context.append_basic_block(function, "for_body");
                let exit_bb = self.context.append_basic_block(function, "for_exit");

                self.builder
                    .build_unconditional_branch(cond_bb)
                    .map_err(|e| KernelError::codegen_error(e.to_string()))?;

                self.builder.position_at_end(cond_bb);
                let i_val = self
                    .builder
                    .build_load(llvm_ty, slot, &var.name)
                    .map_err(|e| KernelError::codegen_error(e.to_string()))?
                    .into_int_value();
                let cond = self
                    .builder
                    .build_int_compare(inkwell::IntPredicate::SLT, i_val, end_val, "for_cmp")
                    .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                self.builder
                    .build_conditional_branch(cond, body_bb, exit_bb)
                    .map_err(|e| KernelError::codegen_error(e.to_string()))?;

                self.builder.position_at_end(body_bb);
                let body_term = self.compile_block(body, function)?;
                if !body_term {
                    let current = self
                        .builder
                        .build_load(llvm_ty, slot, &var.name)
                        .map_err(|e| KernelError::codegen_error(e.to_string()))?
                        .into_int_value();
                    let one = current.get_type().const_int(1, false);
                    let next = self
                        .builder
                        .build_int_add(current, one, "for_next")
                        .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                    self.builder
                        .build_store(slot, next)
                        .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                    self.builder
                        .build_unconditional_branch(cond_bb)
                        .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                }

                self.builder.position_at_end(exit_bb);
                Ok(false)
            }
            Stmt::If { cond, body } => {
                let cond_val = self.compile_expr(cond, function)?.into_int_value();
                let then_bb = self.context.append_basic_block(function, "then");
                let merge_bb = self.context.append_basic_block(function, "merge");
                self.builder
                    .build_conditional_branch(cond_val, then_bb, merge_bb)
                    .map_err(|e| KernelError::codegen_error(e.to_string()))?;

                self.builder.position_at_end(then_bb);
                if !self.compile_block(body, function)? {
                    self.builder
                        .build_unconditional_branch(merge_bb)
                        .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                }

                self.builder.position_at_end(merge_bb);
                Ok(false)
            }
            Stmt::Return(Some(value)) => {
                let val = self.compile_expr(value, function)?;
                self.builder
                    .build_return(Some(&val))
                    .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                Ok(true)
            }
            Stmt::Return(None) => {
                self.builder
                    .build_return(None)
                    .map_err(|e| KernelError::codegen_error(e.to_string()))?;
                Ok(true)
            }
        }
    }

    pub(crate) fn buffer(&self, buf: &ir::Var) -> crate::error::Result<BufferParam<'ctx>> {
        self.buffers
            .get(&buf.name)
            .copied()
            .ok_or_else(|| KernelError::codegen_error(format!("undefined buffer '{}'", buf.name)))
    }
}
