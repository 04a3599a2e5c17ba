//! C source generator for the buffer ABI.
//!
//! Buffers travel by value as
//!
//! ```c
//! struct CNumpyBuffer_float64_1 {
//!     void* arr;
//!     double* data;
//!     size_t length;
//!     struct C_CTuple shape;
//! };
//! ```
//!
//! where the shape tuple holds one `int32_t element_k` per axis. Tuple
//! structs are declared on first use (`C_CTuple`, `C_CTuple_2`, ... one per
//! distinct rank), each buffer struct right after the tuple it needs. The
//! output is newline-joined with no trailing newline.

use log::debug;

use crate::dtype::ElementType;
use crate::error::KernelError;
use crate::ir::{BinOp, Expr, Function, Literal, Module, Stmt, Type, Var};

const PREC_SELECT: u8 = 1;
const PREC_UNARY: u8 = 6;
const PREC_PRIMARY: u8 = 7;

fn binop_precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Eq => 2,
        BinOp::Lt | BinOp::Gt => 3,
        BinOp::Add | BinOp::Sub => 4,
        BinOp::Mul | BinOp::Div | BinOp::Rem => 5,
    }
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Literal(Literal::Size(_)) => PREC_PRIMARY,
        Expr::Literal(_) | Expr::Neg(_) => PREC_UNARY,
        Expr::Binary(_, op, _) => binop_precedence(*op),
        Expr::Select { .. } => PREC_SELECT,
        _ => PREC_PRIMARY,
    }
}

pub fn buffer_struct_name(elem: ElementType, rank: usize) -> String {
    format!("CNumpyBuffer_{}_{}", elem.numpy_name(), rank)
}

fn scalar_c_type(ty: &Type) -> crate::error::Result<&'static str> {
    match ty {
        Type::Index => Ok("int64_t"),
        Type::Size => Ok("size_t"),
        Type::Bool => Ok("int"),
        Type::Elem(e) => Ok(e.c_name()),
        Type::Buffer { .. } => Err(KernelError::codegen_error(
            "buffers cannot be declared as locals",
        )),
    }
}

fn needs_math_header(module: &Module) -> bool {
    fn non_finite(expr: &Expr) -> bool {
        match expr {
            Expr::Literal(Literal::Float(_, v)) => !v.is_finite(),
            Expr::Literal(_) | Expr::Var(_) | Expr::Length(_) | Expr::ShapeDim(_, _) => false,
            Expr::Load(_, i) | Expr::Neg(i) => non_finite(i),
            Expr::Binary(l, _, r) | Expr::Pow(l, r) => non_finite(l) || non_finite(r),
            Expr::Select {
                cond,
                then,
                otherwise,
            } => non_finite(cond) || non_finite(then) || non_finite(otherwise),
        }
    }
    fn stmt_non_finite(stmt: &Stmt) -> bool {
        match stmt {
            Stmt::Declare(_, e) | Stmt::Assign(_, e) | Stmt::AddAssign(_, e) => non_finite(e),
            Stmt::Store(_, i, v) => non_finite(i) || non_finite(v),
            Stmt::ForLoop {
                start, end, body, ..
            } => non_finite(start) || non_finite(end) || body.iter().any(stmt_non_finite),
            Stmt::If { cond, body } => non_finite(cond) || body.iter().any(stmt_non_finite),
            Stmt::Return(e) => e.as_ref().is_some_and(non_finite),
        }
    }
    module
        .functions
        .iter()
        .any(|f| f.uses_pow() || f.body.iter().any(stmt_non_finite))
}

pub struct CGenerator {
    tab: String,
    lines: Vec<String>,
    tuples: Vec<usize>,
    buffers: Vec<(ElementType, usize)>,
}

impl Default for CGenerator {
    fn default() -> Self {
        Self::new("    ")
    }
}

impl CGenerator {
    pub fn new(tab: &str) -> Self {
        Self {
            tab: tab.to_string(),
            lines: Vec::new(),
            tuples: Vec::new(),
            buffers: Vec::new(),
        }
    }

    pub fn emit_module(mut self, module: &Module) -> crate::error::Result<String> {
        self.lines.push("#include <stddef.h>".to_string());
        self.lines.push("#include <stdint.h>".to_string());
        if needs_math_header(module) {
            self.lines.push("#include <math.h>".to_string());
        }
        for func in &module.functions {
            for param in &func.params {
                if let Type::Buffer { elem, rank } = param.ty {
                    self.declare_buffer(elem, rank);
                }
            }
        }
        for func in &module.functions {
            self.emit_function(func)?;
        }
        let source = self.lines.join("\n");
        debug!(
            "emitted {} bytes of C for {} function(s)",
            source.len(),
            module.functions.len()
        );
        Ok(source)
    }

    fn tuple_name(&self, rank: usize) -> String {
        match self.tuples.iter().position(|&r| r == rank) {
            Some(0) | None => "C_CTuple".to_string(),
            Some(k) => format!("C_CTuple_{}", k + 1),
        }
    }

    fn declare_buffer(&mut self, elem: ElementType, rank: usize) {
        if self.buffers.contains(&(elem, rank)) {
            return;
        }
        if rank > 0 && !self.tuples.contains(&rank) {
            self.tuples.push(rank);
            let name = self.tuple_name(rank);
            self.lines.push(format!("struct {name} {{"));
            for k in 0..rank {
                self.lines.push(format!("{}int32_t element_{k};", self.tab));
            }
            self.lines.push("};".to_string());
        }
        self.buffers.push((elem, rank));
        self.lines
            .push(format!("struct {} {{", buffer_struct_name(elem, rank)));
        self.lines.push(format!("{}void* arr;", self.tab));
        self.lines
            .push(format!("{}{}* data;", self.tab, elem.c_name()));
        self.lines.push(format!("{}size_t length;", self.tab));
        if rank > 0 {
            self.lines.push(format!(
                "{}struct {} shape;",
                self.tab,
                self.tuple_name(rank)
            ));
        }
        self.lines.push("};".to_string());
    }

    fn param_decl(&self, param: &Var) -> crate::error::Result<String> {
        match param.ty {
            Type::Buffer { elem, rank } => Ok(format!(
                "struct {} {}",
                buffer_struct_name(elem, rank),
                param.name
            )),
            ref ty => Ok(format!("{} {}", scalar_c_type(ty)?, param.name)),
        }
    }

    fn emit_function(&mut self, func: &Function) -> crate::error::Result<()> {
        let ret = match &func.return_type {
            Some(ty) => scalar_c_type(ty)?,
            None => "void",
        };
        let params = func
            .params
            .iter()
            .map(|p| self.param_decl(p))
            .collect::<crate::error::Result<Vec<_>>>()?;
        self.lines
            .push(format!("{ret} {}({}) {{", func.name, params.join(", ")));
        self.emit_block(&func.body, 1)?;
        self.lines.push("}".to_string());
        Ok(())
    }

    fn emit_block(&mut self, body: &[Stmt], depth: usize) -> crate::error::Result<()> {
        for stmt in body {
            self.emit_stmt(stmt, depth)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt, depth: usize) -> crate::error::Result<()> {
        let feed = self.tab.repeat(depth);
        match stmt {
            Stmt::Declare(var, value) => {
                let line = format!(
                    "{feed}{} {} = {};",
                    scalar_c_type(&var.ty)?,
                    var.name,
                    expr(value)?
                );
                self.lines.push(line);
            }
            Stmt::Assign(var, value) => {
                let line = format!("{feed}{} = {};", var.name, expr(value)?);
                self.lines.push(line);
            }
            Stmt::AddAssign(var, value) => {
                let line = format!("{feed}{} += {};", var.name, expr(value)?);
                self.lines.push(line);
            }
            Stmt::Store(buf, index, value) => {
                let line = format!(
                    "{feed}{}.data[{}] = {};",
                    buf.name,
                    expr(index)?,
                    expr(value)?
                );
                self.lines.push(line);
            }
            Stmt::ForLoop {
                var,
                start,
                end,
                body,
            } => {
                let line = format!(
                    "{feed}for ({} {v} = {}; {v} < {}; {v}++) {{",
                    scalar_c_type(&var.ty)?,
                    expr(start)?,
                    child(end, binop_precedence(BinOp::Lt) + 1)?,
                    v = var.name
                );
                self.lines.push(line);
                self.emit_block(body, depth + 1)?;
                self.lines.push(format!("{feed}}}"));
            }
            Stmt::If { cond, body } => {
                self.lines.push(format!("{feed}if ({}) {{", expr(cond)?));
                self.emit_block(body, depth + 1)?;
                self.lines.push(format!("{feed}}}"));
            }
            Stmt::Return(Some(value)) => {
                self.lines.push(format!("{feed}return {};", expr(value)?));
            }
            Stmt::Return(None) => self.lines.push(format!("{feed}return;")),
        }
        Ok(())
    }
}

fn literal(lit: &Literal) -> String {
    match lit {
        Literal::Index(v) => format!("(int64_t){v}"),
        Literal::Size(v) => format!("{v}"),
        Literal::Float(elem, v) => {
            let text = if v.is_nan() {
                "NAN".to_string()
            } else if v.is_infinite() {
                let sign = if *v > 0.0 { "" } else { "-" };
                format!("{sign}INFINITY")
            } else {
                format!("{v:?}")
            };
            format!("({}){text}", elem.c_name())
        }
        Literal::Int(elem, v) => {
            let text = match (elem, *v) {
                (ElementType::I64, i64::MIN) => "INT64_MIN".to_string(),
                (ElementType::I64, i64::MAX) => "INT64_MAX".to_string(),
                (ElementType::I32, v) if v == i32::MIN as i64 => "INT32_MIN".to_string(),
                (ElementType::I32, v) if v == i32::MAX as i64 => "INT32_MAX".to_string(),
                (_, v) => v.to_string(),
            };
            format!("({}){text}", elem.c_name())
        }
    }
}

/// Render `e`, parenthesized when it binds looser than `min`.
fn child(e: &Expr, min: u8) -> crate::error::Result<String> {
    let text = expr(e)?;
    if precedence(e) < min {
        Ok(format!("({text})"))
    } else {
        Ok(text)
    }
}

pub fn expr(e: &Expr) -> crate::error::Result<String> {
    Ok(match e {
        Expr::Literal(lit) => literal(lit),
        Expr::Var(v) => v.name.clone(),
        Expr::Length(buf) => format!("{}.length", buf.name),
        Expr::ShapeDim(buf, k) => format!("{}.shape.element_{k}", buf.name),
        Expr::Load(buf, index) => format!("{}.data[{}]", buf.name, expr(index)?),
        Expr::Neg(inner) => format!("-{}", child(inner, PREC_UNARY + 1)?),
        Expr::Binary(l, op, r) => {
            let p = binop_precedence(*op);
            format!("{} {} {}", child(l, p)?, op.symbol(), child(r, p + 1)?)
        }
        Expr::Pow(base, exponent) => {
            let func = match base.ty() {
                Type::Elem(ElementType::F32) => "powf",
                Type::Elem(ElementType::F64) => "pow",
                other => {
                    return Err(KernelError::codegen_error(format!(
                        "pow is only defined for floating point, found {other}"
                    )))
                }
            };
            format!("{func}({}, {})", expr(base)?, expr(exponent)?)
        }
        Expr::Select {
            cond,
            then,
            otherwise,
        } => format!(
            "{} ? {} : {}",
            child(cond, PREC_SELECT + 1)?,
            child(then, PREC_SELECT + 1)?,
            child(otherwise, PREC_SELECT)?
        ),
    })
}

/// C source for every function in `module`.
pub fn emit_c(module: &Module) -> crate::error::Result<String> {
    CGenerator::default().emit_module(module)
}
