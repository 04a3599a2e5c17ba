use either::Either::{Left, Right};
use inkwell::values::{BasicValueEnum, FunctionValue, IntValue, PointerValue};
use inkwell::{AddressSpace, FloatPredicate, IntPredicate};

use crate::dtype::ElementType;
use crate::error::KernelError;
use crate::ir::{BinOp, Expr, Literal, Var};

use super::CodeGenerator;

const FIELD_DATA: u32 = 1;
const FIELD_LENGTH: u32 = 2;
const FIELD_SHAPE: u32 = 3;

impl<'ctx> CodeGenerator<'ctx> {
    pub(crate) fn compile_expr(
        &mut self,
        expr: &Expr,
        function: FunctionValue<'ctx>,
    ) -> crate::error::Result<BasicValueEnum<'ctx>> {
        match expr {
            Expr::Literal(lit) => Ok(self.compile_literal(lit)),
            Expr::Var(var) => {
                let (slot, ty) = self.variables.get(&var.name).copied().ok_or_else(|| {
                    KernelError::codegen_error(format!("undefined variable '{}'", var.name))
                })?;
                let llvm_ty = self.llvm_type(&ty);
                self.builder
                    .build_load(llvm_ty, slot, &var.name)
                    .map_err(|e| KernelError::codegen_error(e.to_string()))
            }
            Expr::Length(buf) => Ok(self.buffer_length(buf)?.into()),
            Expr::ShapeDim(buf, k) => Ok(self.buffer_dim(buf, *k)?.into()),
            Expr::Load(buf, index) => {
                let elem_ptr = self.element_pointer(buf, index, function)?;
                let elem = self.buffer(buf)?.elem;
                self.builder
                    .build_load(self.elem_type(elem), elem_ptr, "elem")
                    .map_err(|e| KernelError::codegen_error(e.to_string()))
            }
            Expr::Neg(inner) => match self.compile_expr(inner, function)? {
                BasicValueEnum::IntValue(iv) => self
                    .builder
                    .build_int_neg(iv, "neg")
                    .map(Into::into)
                    .map_err(|e| KernelError::codegen_error(e.to_string())),
                BasicValueEnum::FloatValue(fv) => self
                    .builder
                    .build_float_neg(fv, "fneg")
                    .map(Into::into)
                    .map_err(|e| KernelError::codegen_error(e.to_string())),
                _ => Err(KernelError::codegen_error("negation of a non-numeric value")),
            },
            Expr::Binary(l, op, r) => {
                let lhs = self.compile_expr(l, function)?;
                let rhs = self.compile_expr(r, function)?;
                self.compile_binary(lhs, *op, rhs)
            }
            Expr::Pow(base, exponent) => {
                let b = self.compile_expr(base, function)?;
                let e = self.compile_expr(exponent, function)?;
                self.compile_pow(b, e)
            }
            Expr::Select {
                cond,
                then,
                otherwise,
            } => {
                let c = self.compile_expr(cond, function)?.into_int_value();
                let t = self.compile_expr(then, function)?;
                let o = self.compile_expr(otherwise, function)?;
                self.builder
                    .build_select(c, t, o, "select")
                    .map_err(|e| KernelError::codegen_error(e.to_string()))
            }
        }
    }

    fn compile_literal(&self, lit: &Literal) -> BasicValueEnum<'ctx> {
        match lit {
            Literal::Index(v) => self.context.i64_type().const_int(*v as u64, true).into(),
            Literal::Size(v) => self.context.i64_type().const_int(*v, false).into(),
            Literal::Float(ElementType::F32, v) => self.context.f32_type().const_float(*v).into(),
            Literal::Float(_, v) => self.context.f64_type().const_float(*v).into(),
            Literal::Int(ElementType::I32, v) => {
                self.context.i32_type().const_int(*v as u64, true).into()
            }
            Literal::Int(_, v) => self.context.i64_type().const_int(*v as u64, true).into(),
        }
    }

    fn compile_binary(
        &self,
        lhs: BasicValueEnum<'ctx>,
        op: BinOp,
        rhs: BasicValueEnum<'ctx>,
    ) -> crate::error::Result<BasicValueEnum<'ctx>> {
        match (&lhs, &rhs) {
            (BasicValueEnum::IntValue(l), BasicValueEnum::IntValue(r)) => {
                let result = match op {
                    BinOp::Add => self.builder.build_int_add(*l, *r, "add"),
                    BinOp::Sub => self.builder.build_int_sub(*l, *r, "sub"),
                    BinOp::Mul => self.builder.build_int_mul(*l, *r, "mul"),
                    BinOp::Div => self.builder.build_int_signed_div(*l, *r, "div"),
                    BinOp::Rem => self.builder.build_int_signed_rem(*l, *r, "rem"),
                    BinOp::Lt => self.builder.build_int_compare(IntPredicate::SLT, *l, *r, "cmp"),
                    BinOp::Gt => self.builder.build_int_compare(IntPredicate::SGT, *l, *r, "cmp"),
                    BinOp::Eq => self.builder.build_int_compare(IntPredicate::EQ, *l, *r, "cmp"),
                };
                result
                    .map(Into::into)
                    .map_err(|e| KernelError::codegen_error(e.to_string()))
            }
            (BasicValueEnum::FloatValue(l), BasicValueEnum::FloatValue(r)) => {
                let result: Result<BasicValueEnum<'ctx>, _> = match op {
                    BinOp::Add => self.builder.build_float_add(*l, *r, "fadd").map(Into::into),
                    BinOp::Sub => self.builder.build_float_sub(*l, *r, "fsub").map(Into::into),
                    BinOp::Mul => self.builder.build_float_mul(*l, *r, "fmul").map(Into::into),
                    BinOp::Div => self.builder.build_float_div(*l, *r, "fdiv").map(Into::into),
                    BinOp::Rem => self.builder.build_float_rem(*l, *r, "frem").map(Into::into),
                    BinOp::Lt => self
                        .builder
                        .build_float_compare(FloatPredicate::OLT, *l, *r, "fcmp")
                        .map(Into::into),
                    BinOp::Gt => self
                        .builder
                        .build_float_compare(FloatPredicate::OGT, *l, *r, "fcmp")
                        .map(Into::into),
                    BinOp::Eq => self
                        .builder
                        .build_float_compare(FloatPredicate::OEQ, *l, *r, "fcmp")
                        .map(Into::into),
                };
                result.map_err(|e| KernelError::codegen_error(e.to_string()))
            }
            _ => Err(KernelError::codegen_error(format!(
                "'{}' between mismatched operand types",
                op.symbol()
            ))),
        }
    }

    /// `llvm.pow.f32` / `llvm.pow.f64`.
    fn compile_pow(
        &self,
        base: BasicValueEnum<'ctx>,
        exponent: BasicValueEnum<'ctx>,
    ) -> crate::error::Result<BasicValueEnum<'ctx>> {
        let (BasicValueEnum::FloatValue(b), BasicValueEnum::FloatValue(e)) = (base, exponent) else {
            return Err(KernelError::codegen_error("pow expects float operands"));
        };
        let float_ty = b.get_type();
        let intrinsic_name = if float_ty == self.context.f32_type() {
            "llvm.pow.f32"
        } else {
            "llvm.pow.f64"
        };
        let fn_type = float_ty.fn_type(&[float_ty.into(), float_ty.into()], false);
        let intrinsic = self
            .module
            .get_function(intrinsic_name)
            .unwrap_or_else(|| self.module.add_function(intrinsic_name, fn_type, None));
        let call = self
            .builder
            .build_call(intrinsic, &[b.into(), e.into()], "pow")
            .map_err(|e| KernelError::codegen_error(e.to_string()))?;
        match call.try_as_basic_value() {
            Left(value) => Ok(value),
            Right(_) => Err(KernelError::codegen_error("pow did not return a value")),
        }
    }

    fn field_pointer(&self, buf: &Var, field: u32, name: &str) -> crate::error::Result<PointerValue<'ctx>> {
        let param = self.buffer(buf)?;
        self.builder
            .build_struct_gep(param.desc_type, param.desc, field, &format!("{}.{name}", buf.name))
            .map_err(|e| KernelError::codegen_error(format!("struct gep error: {e}")))
    }

    fn buffer_length(&self, buf: &Var) -> crate::error::Result<IntValue<'ctx>> {
        let ptr = self.field_pointer(buf, FIELD_LENGTH, "length")?;
        Ok(self
            .builder
            .build_load(self.context.i64_type(), ptr, "length")
            .map_err(|e| KernelError::codegen_error(e.to_string()))?
            .into_int_value())
    }

    /// Extent `k`, sign-extended to i64.
    fn buffer_dim(&self, buf: &Var, k: usize) -> crate::error::Result<IntValue<'ctx>> {
        let param = self.buffer(buf)?;
        let shape = self.field_pointer(buf, FIELD_SHAPE, "shape")?;
        let shape_ty = param
            .desc_type
            .get_field_type_at_index(FIELD_SHAPE)
            .ok_or_else(|| KernelError::codegen_error("descriptor has no shape field"))?;
        let i64_ty = self.context.i64_type();
        let extent_ptr = unsafe {
            self.builder.build_in_bounds_gep(
                shape_ty,
                shape,
                &[i64_ty.const_zero(), i64_ty.const_int(k as u64, false)],
                "extent_ptr",
            )
        }
        .map_err(|e| KernelError::codegen_error(e.to_string()))?;
        let extent = self
            .builder
            .build_load(self.context.i32_type(), extent_ptr, "extent")
            .map_err(|e| KernelError::codegen_error(e.to_string()))?
            .into_int_value();
        self.builder
            .build_int_s_extend(extent, i64_ty, "sext")
            .map_err(|e| KernelError::codegen_error(e.to_string()))
    }

    /// Address of `buf.data[index]`.
    pub(crate) fn element_pointer(
        &mut self,
        buf: &Var,
        index: &Expr,
        function: FunctionValue<'ctx>,
    ) -> crate::error::Result<PointerValue<'ctx>> {
        let param = self.buffer(buf)?;
        let data_field = self.field_pointer(buf, FIELD_DATA, "data")?;
        let data = self
            .builder
            .build_load(
                self.context.ptr_type(AddressSpace::default()),
                data_field,
                "data",
            )
            .map_err(|e| KernelError::codegen_error(e.to_string()))?
            .into_pointer_value();
        let idx = self.compile_expr(index, function)?.into_int_value();
        unsafe {
            self.builder
                .build_in_bounds_gep(self.elem_type(param.elem), data, &[idx], "elemptr")
        }
        .map_err(|e| KernelError::codegen_error(e.to_string()))
    }
}
