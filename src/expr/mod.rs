//! Combiner expressions: the elementwise half of a reduction kernel.
//!
//! ```text
//! a * b
//! (x - y) ^ 2
//! max(a, b) - 0.5 * c
//! ```

pub mod lexer;
mod parser;

use std::fmt;

use crate::dtype::Element;
use crate::error::KernelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Max,
    Min,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
            BinaryOp::Pow => 4,
            BinaryOp::Max | BinaryOp::Min => 5,
        }
    }

    #[inline]
    fn apply<T: Element>(&self, l: T, r: T) -> T {
        match self {
            BinaryOp::Add => l.add(r),
            BinaryOp::Sub => l.sub(r),
            BinaryOp::Mul => l.mul(r),
            BinaryOp::Div => l.div(r),
            BinaryOp::Pow => l.pow(r),
            BinaryOp::Max => {
                if r > l {
                    r
                } else {
                    l
                }
            }
            BinaryOp::Min => {
                if r < l {
                    r
                } else {
                    l
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Operand(String),
    Neg(Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
}

impl Expr {
    pub fn parse(source: &str) -> crate::error::Result<Expr> {
        let lexer = lexer::Lexer::new(source);
        let tokens = lexer.tokenize()?;
        parser::Parser::new(tokens, lexer.end_position()).parse()
    }

    pub fn operand(name: &str) -> Expr {
        Expr::Operand(name.to_string())
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary(Box::new(left), op, Box::new(right))
    }

    /// Operand names in order of first appearance.
    pub fn operands(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_operands(&mut names);
        names
    }

    fn collect_operands<'e>(&'e self, names: &mut Vec<&'e str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Operand(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Expr::Neg(inner) => inner.collect_operands(names),
            Expr::Binary(l, _, r) => {
                l.collect_operands(names);
                r.collect_operands(names);
            }
        }
    }

    pub fn uses_pow(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Operand(_) => false,
            Expr::Neg(inner) => inner.uses_pow(),
            Expr::Binary(l, op, r) => *op == BinaryOp::Pow || l.uses_pow() || r.uses_pow(),
        }
    }

    /// Literals that are not whole numbers.
    pub fn has_fractional_literal(&self) -> bool {
        match self {
            Expr::Literal(v) => v.fract() != 0.0 || !v.is_finite(),
            Expr::Operand(_) => false,
            Expr::Neg(inner) => inner.has_fractional_literal(),
            Expr::Binary(l, _, r) => l.has_fractional_literal() || r.has_fractional_literal(),
        }
    }

    /// Resolve operand names to argument slots.
    pub fn bind(&self, names: &[&str]) -> crate::error::Result<Combiner> {
        Ok(Combiner {
            root: self.resolve(names)?,
            arity: names.len(),
        })
    }

    fn resolve(&self, names: &[&str]) -> crate::error::Result<Bound> {
        Ok(match self {
            Expr::Literal(v) => Bound::Literal(*v),
            Expr::Operand(name) => {
                let slot = names.iter().position(|n| n == name).ok_or_else(|| {
                    KernelError::lower_error(format!("combiner uses unknown operand '{name}'"))
                })?;
                Bound::Slot(slot)
            }
            Expr::Neg(inner) => Bound::Neg(Box::new(inner.resolve(names)?)),
            Expr::Binary(l, op, r) => Bound::Binary(
                Box::new(l.resolve(names)?),
                *op,
                Box::new(r.resolve(names)?),
            ),
        })
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Literal(_) | Expr::Operand(_) => 5,
            Expr::Neg(_) => 3,
            Expr::Binary(_, op, _) => op.precedence(),
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Operand(name) => write!(f, "{name}"),
            Expr::Neg(inner) => {
                write!(f, "-")?;
                inner.fmt_child(f, 4)
            }
            Expr::Binary(l, op @ (BinaryOp::Max | BinaryOp::Min), r) => {
                write!(f, "{}({l}, {r})", op.symbol())
            }
            Expr::Binary(l, BinaryOp::Pow, r) => {
                l.fmt_child(f, 5)?;
                write!(f, " ^ ")?;
                r.fmt_child(f, 3)
            }
            Expr::Binary(l, op, r) => {
                let p = op.precedence();
                l.fmt_child(f, p)?;
                write!(f, " {} ", op.symbol())?;
                r.fmt_child(f, p + 1)
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Bound {
    Literal(f64),
    Slot(usize),
    Neg(Box<Bound>),
    Binary(Box<Bound>, BinaryOp, Box<Bound>),
}

impl Bound {
    fn eval<T: Element>(&self, values: &[T]) -> T {
        match self {
            Bound::Literal(v) => T::from_f64(*v),
            Bound::Slot(k) => values[*k],
            Bound::Neg(inner) => inner.eval(values).neg(),
            Bound::Binary(l, op, r) => op.apply(l.eval(values), r.eval(values)),
        }
    }
}

/// A combiner with operand names resolved to positions, ready to feed
/// [`crate::reduce`] kernels.
#[derive(Debug, Clone)]
pub struct Combiner {
    root: Bound,
    arity: usize,
}

impl Combiner {
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Evaluate with one value per bound operand, in binding order.
    #[inline]
    pub fn apply<T: Element>(&self, values: &[T]) -> T {
        debug_assert_eq!(values.len(), self.arity);
        self.root.eval(values)
    }
}
