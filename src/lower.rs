//! Lowering of kernel descriptions into loop IR.
//!
//! A reduction kernel becomes one counted loop over linear indices of the
//! first operand. Inside the loop the index is decomposed into coordinates,
//! each operand gets its own freshly named `linear_idx` accumulated from
//! `coordinate * stride` terms, and the combiner is instantiated over loads
//! at those offsets.

use std::collections::HashSet;

use log::debug;

use crate::dtype::ElementType;
use crate::error::KernelError;
use crate::expr::{self, BinaryOp};
use crate::ir::{BinOp, Expr, Function, Literal, Module, Stmt, Type, Var};
use crate::reduce::{ReduceOp, MAX_OPERANDS};
use crate::shape::MAX_RANK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoweringOptions {
    /// Emit `if (a.length == 0) return <identity>;` ahead of the loop.
    pub empty_guard: bool,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        Self { empty_guard: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelOutput {
    /// Fold every combined element into one scalar.
    Reduce(ReduceOp),
    /// Write every combined element into an `out` buffer of the same shape.
    Map,
}

impl KernelOutput {
    pub fn name(&self) -> String {
        match self {
            KernelOutput::Reduce(op) => op.to_string(),
            KernelOutput::Map => "map".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelSpec {
    pub name: String,
    pub dtype: ElementType,
    pub rank: usize,
    pub operands: Vec<String>,
    pub combiner: expr::Expr,
    pub output: KernelOutput,
}

impl KernelSpec {
    pub fn new(
        name: impl Into<String>,
        dtype: ElementType,
        rank: usize,
        operands: Vec<String>,
        combiner: expr::Expr,
        output: KernelOutput,
    ) -> Self {
        Self {
            name: name.into(),
            dtype,
            rank,
            operands,
            combiner,
            output,
        }
    }

    /// Build a kernel description from a combiner source string such as `"a * b"`.
    pub fn from_source(
        name: impl Into<String>,
        dtype: ElementType,
        rank: usize,
        operands: &[&str],
        combiner: &str,
        output: KernelOutput,
    ) -> crate::error::Result<Self> {
        Ok(Self::new(
            name,
            dtype,
            rank,
            operands.iter().map(|s| s.to_string()).collect(),
            expr::Expr::parse(combiner)?,
            output,
        ))
    }

    /// `dot_product(a, b) = sum(a * b)`.
    pub fn dot_product(dtype: ElementType, rank: usize) -> Self {
        Self::new(
            "dot_product",
            dtype,
            rank,
            vec!["a".to_string(), "b".to_string()],
            expr::Expr::binary(expr::Expr::operand("a"), BinaryOp::Mul, expr::Expr::operand("b")),
            KernelOutput::Reduce(ReduceOp::Sum),
        )
    }

    pub fn return_type(&self) -> Option<Type> {
        match self.output {
            KernelOutput::Reduce(_) => Some(Type::Elem(self.dtype)),
            KernelOutput::Map => None,
        }
    }

    pub fn buffer_type(&self) -> Type {
        Type::Buffer {
            elem: self.dtype,
            rank: self.rank,
        }
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        check_identifier(&self.name, "kernel name")?;
        if self.operands.is_empty() {
            return Err(KernelError::lower_error(format!(
                "kernel '{}' has no operands",
                self.name
            )));
        }
        if self.operands.len() > MAX_OPERANDS {
            return Err(KernelError::lower_error(format!(
                "kernel '{}' has {} operands, at most {MAX_OPERANDS} are supported",
                self.name,
                self.operands.len()
            )));
        }
        let mut seen = HashSet::new();
        for operand in &self.operands {
            check_identifier(operand, "operand name")?;
            if !seen.insert(operand.as_str()) {
                return Err(KernelError::lower_error(format!(
                    "operand '{operand}' is declared twice"
                )));
            }
        }
        for used in self.combiner.operands() {
            if !seen.contains(used) {
                return Err(KernelError::lower_error(format!(
                    "combiner uses unknown operand '{used}'"
                )));
            }
        }
        if self.rank > MAX_RANK {
            return Err(KernelError::lower_error(format!(
                "rank {} exceeds the supported maximum of {MAX_RANK}",
                self.rank
            )));
        }
        if self.dtype.is_integer() {
            if self.combiner.uses_pow() {
                return Err(KernelError::lower_error(format!(
                    "'^' is not supported for {} kernels",
                    self.dtype
                )));
            }
            if self.combiner.has_fractional_literal() {
                return Err(KernelError::lower_error(format!(
                    "fractional literal in a {} kernel",
                    self.dtype
                )));
            }
        }
        Ok(())
    }
}

const RESERVED: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "pow", "powf", "size_t", "int32_t",
    "int64_t", "max", "min",
];

fn check_identifier(name: &str, what: &str) -> crate::error::Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid || RESERVED.contains(&name) {
        return Err(KernelError::lower_error(format!(
            "invalid {what} '{name}'"
        )));
    }
    Ok(())
}

/// Hands out unique variable names: `base`, then `base_2`, `base_3`, ...
#[derive(Debug, Default)]
struct Namespace {
    used: HashSet<String>,
}

impl Namespace {
    fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    fn fresh(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}_{n}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    fn var(&mut self, base: &str, ty: Type) -> Var {
        Var::new(self.fresh(base), ty)
    }
}

fn identity_literal(op: ReduceOp, dtype: ElementType) -> Literal {
    match (op, dtype) {
        (ReduceOp::Sum, _) => Literal::elem(dtype, 0.0),
        (ReduceOp::Product, _) => Literal::elem(dtype, 1.0),
        (ReduceOp::Max, ElementType::I32) => Literal::Int(dtype, i32::MIN as i64),
        (ReduceOp::Max, ElementType::I64) => Literal::Int(dtype, i64::MIN),
        (ReduceOp::Max, _) => Literal::Float(dtype, f64::NEG_INFINITY),
        (ReduceOp::Min, ElementType::I32) => Literal::Int(dtype, i32::MAX as i64),
        (ReduceOp::Min, ElementType::I64) => Literal::Int(dtype, i64::MAX),
        (ReduceOp::Min, _) => Literal::Float(dtype, f64::INFINITY),
    }
}

/// Coordinates of the loop index `i` against `first`'s shape.
fn decompose(
    ns: &mut Namespace,
    first: &Var,
    index: &Var,
    rank: usize,
    body: &mut Vec<Stmt>,
) -> Vec<Expr> {
    match rank {
        0 => Vec::new(),
        1 => vec![Expr::var(index)],
        _ => {
            let rem = ns.var("rem", Type::Index);
            body.push(Stmt::Declare(rem.clone(), Expr::var(index)));
            let mut coords = vec![Expr::var(&rem); rank];
            for k in (1..rank).rev() {
                let coord = ns.var(&format!("i_{k}"), Type::Index);
                let extent = Expr::ShapeDim(first.clone(), k);
                body.push(Stmt::Declare(
                    coord.clone(),
                    Expr::binary(Expr::var(&rem), BinOp::Rem, extent.clone()),
                ));
                body.push(Stmt::Assign(
                    rem.clone(),
                    Expr::binary(Expr::var(&rem), BinOp::Div, extent),
                ));
                coords[k] = Expr::var(&coord);
            }
            let outer = ns.var("i_0", Type::Index);
            body.push(Stmt::Declare(outer.clone(), Expr::var(&rem)));
            coords[0] = Expr::var(&outer);
            coords
        }
    }
}

/// Declare and accumulate the linear offset of `buffer` at `coords`.
fn linear_offset(ns: &mut Namespace, buffer: &Var, coords: &[Expr], body: &mut Vec<Stmt>) -> Var {
    let offset = ns.var("linear_idx", Type::Size);
    body.push(Stmt::Declare(offset.clone(), Expr::Literal(Literal::Size(0))));
    let rank = coords.len();
    for (k, coord) in coords.iter().enumerate() {
        let term = ((k + 1)..rank).fold(coord.clone(), |acc, j| {
            Expr::binary(acc, BinOp::Mul, Expr::ShapeDim(buffer.clone(), j))
        });
        body.push(Stmt::AddAssign(offset.clone(), term));
    }
    offset
}

fn instantiate(
    e: &expr::Expr,
    dtype: ElementType,
    loads: &[(String, Expr)],
) -> crate::error::Result<Expr> {
    Ok(match e {
        expr::Expr::Literal(v) => Expr::Literal(Literal::elem(dtype, *v)),
        expr::Expr::Operand(name) => loads
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, load)| load.clone())
            .ok_or_else(|| {
                KernelError::lower_error(format!("combiner uses unknown operand '{name}'"))
            })?,
        expr::Expr::Neg(inner) => match inner.as_ref() {
            expr::Expr::Literal(v) => Expr::Literal(Literal::elem(dtype, -*v)),
            other => Expr::Neg(Box::new(instantiate(other, dtype, loads)?)),
        },
        expr::Expr::Binary(l, op, r) => {
            let l = instantiate(l, dtype, loads)?;
            let r = instantiate(r, dtype, loads)?;
            match op {
                BinaryOp::Add => Expr::binary(l, BinOp::Add, r),
                BinaryOp::Sub => Expr::binary(l, BinOp::Sub, r),
                BinaryOp::Mul => Expr::binary(l, BinOp::Mul, r),
                BinaryOp::Div if dtype.is_integer() => total_div(l, r, dtype),
                BinaryOp::Div => Expr::binary(l, BinOp::Div, r),
                BinaryOp::Pow => Expr::Pow(Box::new(l), Box::new(r)),
                BinaryOp::Max => select(r, BinOp::Gt, l),
                BinaryOp::Min => select(r, BinOp::Lt, l),
            }
        }
    })
}

/// `r == 0 ? 0 : l / (r == 0 ? 1 : r)`. The inner guard keeps the division
/// defined on backends that evaluate both arms of a select.
fn total_div(l: Expr, r: Expr, dtype: ElementType) -> Expr {
    let zero = Expr::Literal(Literal::elem(dtype, 0.0));
    let is_zero = Expr::binary(r.clone(), BinOp::Eq, zero.clone());
    let divisor = Expr::Select {
        cond: Box::new(is_zero.clone()),
        then: Box::new(Expr::Literal(Literal::elem(dtype, 1.0))),
        otherwise: Box::new(r),
    };
    Expr::Select {
        cond: Box::new(is_zero),
        then: Box::new(zero),
        otherwise: Box::new(Expr::binary(l, BinOp::Div, divisor)),
    }
}

/// `candidate <cmp> current ? candidate : current`
fn select(candidate: Expr, cmp: BinOp, current: Expr) -> Expr {
    Expr::Select {
        cond: Box::new(Expr::binary(candidate.clone(), cmp, current.clone())),
        then: Box::new(candidate),
        otherwise: Box::new(current),
    }
}

pub fn lower_kernel(spec: &KernelSpec, options: &LoweringOptions) -> crate::error::Result<Function> {
    spec.validate()?;

    let mut ns = Namespace::default();
    for operand in &spec.operands {
        ns.reserve(operand);
    }

    let mut params: Vec<Var> = spec
        .operands
        .iter()
        .map(|name| Var::new(name.clone(), spec.buffer_type()))
        .collect();
    let out = match spec.output {
        KernelOutput::Map => {
            let out = ns.var("out", spec.buffer_type());
            params.push(out.clone());
            Some(out)
        }
        KernelOutput::Reduce(_) => None,
    };
    let first = params[0].clone();
    let is_empty = Expr::binary(
        Expr::Length(first.clone()),
        BinOp::Eq,
        Expr::Literal(Literal::Size(0)),
    );

    let mut body = Vec::new();
    let accumulator = match spec.output {
        KernelOutput::Reduce(op) => {
            let identity = Expr::Literal(identity_literal(op, spec.dtype));
            if options.empty_guard {
                body.push(Stmt::If {
                    cond: is_empty,
                    body: vec![Stmt::Return(Some(identity.clone()))],
                });
            }
            let acc = ns.var("c", Type::Elem(spec.dtype));
            body.push(Stmt::Declare(acc.clone(), identity));
            Some((acc, op))
        }
        KernelOutput::Map => {
            if options.empty_guard {
                body.push(Stmt::If {
                    cond: is_empty,
                    body: vec![Stmt::Return(None)],
                });
            }
            None
        }
    };

    let index = ns.var("i", Type::Index);
    let mut loop_body = Vec::new();
    let coords = decompose(&mut ns, &first, &index, spec.rank, &mut loop_body);

    let mut loads = Vec::with_capacity(spec.operands.len());
    for param in &params[..spec.operands.len()] {
        let offset = linear_offset(&mut ns, param, &coords, &mut loop_body);
        loads.push((
            param.name.clone(),
            Expr::Load(param.clone(), Box::new(Expr::var(&offset))),
        ));
    }
    let value = instantiate(&spec.combiner, spec.dtype, &loads)?;

    match (&accumulator, &out) {
        (Some((acc, op)), _) => match op {
            ReduceOp::Sum | ReduceOp::Product => {
                let bin = if *op == ReduceOp::Sum {
                    BinOp::Add
                } else {
                    BinOp::Mul
                };
                loop_body.push(Stmt::Assign(
                    acc.clone(),
                    Expr::binary(Expr::var(acc), bin, value),
                ));
            }
            ReduceOp::Max | ReduceOp::Min => {
                let cmp = if *op == ReduceOp::Max {
                    BinOp::Gt
                } else {
                    BinOp::Lt
                };
                let v = ns.var("v", Type::Elem(spec.dtype));
                loop_body.push(Stmt::Declare(v.clone(), value));
                loop_body.push(Stmt::Assign(
                    acc.clone(),
                    select(Expr::var(&v), cmp, Expr::var(acc)),
                ));
            }
        },
        (None, Some(out)) => {
            let offset = linear_offset(&mut ns, out, &coords, &mut loop_body);
            loop_body.push(Stmt::Store(out.clone(), Expr::var(&offset), value));
        }
        (None, None) => {
            return Err(KernelError::lower_error(format!(
                "kernel '{}' has neither an accumulator nor an output",
                spec.name
            )))
        }
    }

    body.push(Stmt::ForLoop {
        var: index,
        start: Expr::Literal(Literal::Index(0)),
        end: Expr::Length(first),
        body: loop_body,
    });
    if let Some((acc, _)) = accumulator {
        body.push(Stmt::Return(Some(Expr::var(&acc))));
    }

    debug!(
        "lowered kernel '{}': {} operand(s), {} rank {}, output {}",
        spec.name,
        spec.operands.len(),
        spec.dtype,
        spec.rank,
        spec.output.name()
    );

    Ok(Function {
        name: spec.name.clone(),
        params,
        return_type: spec.return_type(),
        body,
    })
}

pub fn lower_module(specs: &[KernelSpec], options: &LoweringOptions) -> crate::error::Result<Module> {
    let mut names = HashSet::new();
    let mut functions = Vec::with_capacity(specs.len());
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            return Err(KernelError::lower_error(format!(
                "kernel '{}' is defined twice",
                spec.name
            )));
        }
        functions.push(lower_kernel(spec, options)?);
    }
    Ok(Module::new(functions))
}
