//! Imperative loop IR that kernels are lowered into.
//!
//! The IR is deliberately close to C: scalar variables, buffer parameters
//! with `length`/`shape`/`data` fields, counted `for` loops and structured
//! conditionals. Every backend (interpreter, C, LLVM) consumes it.

use std::fmt;

use crate::dtype::ElementType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// Signed 64-bit loop counter (`int64_t`).
    Index,
    /// Unsigned machine-size offset (`size_t`).
    Size,
    Bool,
    Elem(ElementType),
    Buffer { elem: ElementType, rank: usize },
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Index => write!(f, "index"),
            Type::Size => write!(f, "size"),
            Type::Bool => write!(f, "bool"),
            Type::Elem(e) => write!(f, "{e}"),
            Type::Buffer { elem, rank } => write!(f, "buffer<{elem}, {rank}>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: String,
    pub ty: Type,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    /// Element type of a buffer variable.
    pub fn elem(&self) -> Option<ElementType> {
        match self.ty {
            Type::Buffer { elem, .. } => Some(elem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Index(i64),
    Size(u64),
    Float(ElementType, f64),
    Int(ElementType, i64),
}

impl Literal {
    pub fn ty(&self) -> Type {
        match self {
            Literal::Index(_) => Type::Index,
            Literal::Size(_) => Type::Size,
            Literal::Float(e, _) | Literal::Int(e, _) => Type::Elem(*e),
        }
    }

    /// Element-typed literal for `value`.
    pub fn elem(dtype: ElementType, value: f64) -> Self {
        if dtype.is_float() {
            Literal::Float(dtype, value)
        } else {
            Literal::Int(dtype, value as i64)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    Eq,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Eq => "==",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Gt | BinOp::Eq)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Var(Var),
    /// `buf.length`
    Length(Var),
    /// `buf.shape[k]`, widened to an index.
    ShapeDim(Var, usize),
    /// `buf.data[index]`
    Load(Var, Box<Expr>),
    Neg(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Select {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn var(var: &Var) -> Expr {
        Expr::Var(var.clone())
    }

    pub fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
        Expr::Binary(Box::new(left), op, Box::new(right))
    }

    pub fn ty(&self) -> Type {
        match self {
            Expr::Literal(lit) => lit.ty(),
            Expr::Var(v) => v.ty,
            Expr::Length(_) => Type::Size,
            Expr::ShapeDim(_, _) => Type::Index,
            Expr::Load(buf, _) => match buf.ty {
                Type::Buffer { elem, .. } => Type::Elem(elem),
                other => other,
            },
            Expr::Neg(inner) => inner.ty(),
            Expr::Binary(_, op, _) if op.is_comparison() => Type::Bool,
            Expr::Binary(l, _, _) => l.ty(),
            Expr::Pow(base, _) => base.ty(),
            Expr::Select { then, .. } => then.ty(),
        }
    }

    pub fn uses_pow(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Var(_) | Expr::Length(_) | Expr::ShapeDim(_, _) => false,
            Expr::Load(_, index) => index.uses_pow(),
            Expr::Neg(inner) => inner.uses_pow(),
            Expr::Binary(l, _, r) => l.uses_pow() || r.uses_pow(),
            Expr::Pow(_, _) => true,
            Expr::Select {
                cond,
                then,
                otherwise,
            } => cond.uses_pow() || then.uses_pow() || otherwise.uses_pow(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Declare(Var, Expr),
    Assign(Var, Expr),
    AddAssign(Var, Expr),
    /// `buf.data[index] = value`
    Store(Var, Expr, Expr),
    /// `for (var = start; var < end; var++)`
    ForLoop {
        var: Var,
        start: Expr,
        end: Expr,
        body: Vec<Stmt>,
    },
    If {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
}

impl Stmt {
    pub fn uses_pow(&self) -> bool {
        match self {
            Stmt::Declare(_, e) | Stmt::Assign(_, e) | Stmt::AddAssign(_, e) => e.uses_pow(),
            Stmt::Store(_, i, v) => i.uses_pow() || v.uses_pow(),
            Stmt::ForLoop {
                start, end, body, ..
            } => start.uses_pow() || end.uses_pow() || body.iter().any(Stmt::uses_pow),
            Stmt::If { cond, body } => cond.uses_pow() || body.iter().any(Stmt::uses_pow),
            Stmt::Return(e) => e.as_ref().is_some_and(Expr::uses_pow),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Var>,
    pub return_type: Option<Type>,
    pub body: Vec<Stmt>,
}

impl Function {
    pub fn uses_pow(&self) -> bool {
        self.body.iter().any(Stmt::uses_pow)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(functions: Vec<Function>) -> Self {
        Self { functions }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

// Pseudo-code printer used by `bufkern emit-ir`.

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Index(v) => write!(f, "{v}"),
            Literal::Size(v) => write!(f, "{v}z"),
            Literal::Float(_, v) => write!(f, "{v:?}"),
            Literal::Int(_, v) => write!(f, "{v}"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Var(v) => write!(f, "{}", v.name),
            Expr::Length(v) => write!(f, "len({})", v.name),
            Expr::ShapeDim(v, k) => write!(f, "dim({}, {k})", v.name),
            Expr::Load(v, index) => write!(f, "{}[{index}]", v.name),
            Expr::Neg(inner) => write!(f, "-({inner})"),
            Expr::Binary(l, op, r) => write!(f, "({l} {} {r})", op.symbol()),
            Expr::Pow(b, e) => write!(f, "pow({b}, {e})"),
            Expr::Select {
                cond,
                then,
                otherwise,
            } => write!(f, "select({cond}, {then}, {otherwise})"),
        }
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, body: &[Stmt], depth: usize) -> fmt::Result {
    for stmt in body {
        write_stmt(f, stmt, depth)?;
    }
    Ok(())
}

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, depth: usize) -> fmt::Result {
    let pad = "    ".repeat(depth);
    match stmt {
        Stmt::Declare(v, e) => writeln!(f, "{pad}let {}: {} = {e}", v.name, v.ty),
        Stmt::Assign(v, e) => writeln!(f, "{pad}{} = {e}", v.name),
        Stmt::AddAssign(v, e) => writeln!(f, "{pad}{} += {e}", v.name),
        Stmt::Store(v, i, e) => writeln!(f, "{pad}{}[{i}] = {e}", v.name),
        Stmt::ForLoop {
            var,
            start,
            end,
            body,
        } => {
            writeln!(f, "{pad}for {}: {} in {start}..{end} {{", var.name, var.ty)?;
            write_block(f, body, depth + 1)?;
            writeln!(f, "{pad}}}")
        }
        Stmt::If { cond, body } => {
            writeln!(f, "{pad}if {cond} {{")?;
            write_block(f, body, depth + 1)?;
            writeln!(f, "{pad}}}")
        }
        Stmt::Return(Some(e)) => writeln!(f, "{pad}return {e}"),
        Stmt::Return(None) => writeln!(f, "{pad}return"),
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", p.name, p.ty)?;
        }
        write!(f, ")")?;
        if let Some(ret) = &self.return_type {
            write!(f, " -> {ret}")?;
        }
        writeln!(f, " {{")?;
        write_block(f, &self.body, 1)?;
        write!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
                writeln!(f)?;
            }
            write!(f, "{func}")?;
        }
        Ok(())
    }
}
