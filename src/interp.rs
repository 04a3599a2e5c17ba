//! Reference interpreter for loop IR.
//!
//! Executes a lowered [`Function`] directly over buffer views. It is slow
//! and checks everything (bounds, types, bindings), which makes it the
//! yardstick the native backends are compared against.

use std::collections::HashMap;

use log::trace;

use crate::buffer::{BufferView, BufferViewMut};
use crate::dtype::Element;
use crate::error::KernelError;
use crate::ir::{BinOp, Expr, Function, Literal, Module, Stmt, Type, Var};

/// A call argument.
#[derive(Debug)]
pub enum Arg<'a, T> {
    Buffer(BufferView<'a, T>),
    Output(BufferViewMut<'a, T>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value<T> {
    Index(i64),
    Elem(T),
    Bool(bool),
}

enum Flow<T> {
    Next,
    Return(Option<Value<T>>),
}

fn type_error(what: &str) -> KernelError {
    KernelError::eval_error(format!("type mismatch: {what}"))
}

struct Machine<'a, T> {
    scalars: HashMap<String, Value<T>>,
    inputs: HashMap<String, BufferView<'a, T>>,
    outputs: HashMap<String, BufferViewMut<'a, T>>,
}

impl<'a, T: Element> Machine<'a, T> {
    fn bind(func: &Function, args: Vec<Arg<'a, T>>) -> crate::error::Result<Self> {
        if func.params.len() != args.len() {
            return Err(KernelError::eval_error(format!(
                "'{}' takes {} argument(s), {} given",
                func.name,
                func.params.len(),
                args.len()
            )));
        }
        let mut machine = Machine {
            scalars: HashMap::new(),
            inputs: HashMap::new(),
            outputs: HashMap::new(),
        };
        for (param, arg) in func.params.iter().zip(args) {
            machine.bind_param(param, arg)?;
        }
        Ok(machine)
    }

    fn bind_param(&mut self, param: &Var, arg: Arg<'a, T>) -> crate::error::Result<()> {
        let check_buffer = |rank: usize| -> crate::error::Result<()> {
            match param.ty {
                Type::Buffer { elem, rank: r } if elem == T::DTYPE && r == rank => Ok(()),
                ty => Err(type_error(&format!(
                    "parameter '{}' is {ty}, argument is buffer<{}, {rank}>",
                    param.name,
                    T::DTYPE
                ))),
            }
        };
        match arg {
            Arg::Buffer(view) => {
                check_buffer(view.rank())?;
                self.inputs.insert(param.name.clone(), view);
            }
            Arg::Output(view) => {
                check_buffer(view.rank())?;
                self.outputs.insert(param.name.clone(), view);
            }
        }
        Ok(())
    }

    fn buffer_len(&self, buf: &Var) -> crate::error::Result<usize> {
        if let Some(view) = self.inputs.get(&buf.name) {
            Ok(view.len())
        } else if let Some(view) = self.outputs.get(&buf.name) {
            Ok(view.len())
        } else {
            Err(unbound(&buf.name))
        }
    }

    fn buffer_dim(&self, buf: &Var, k: usize) -> crate::error::Result<usize> {
        let shape = if let Some(view) = self.inputs.get(&buf.name) {
            view.shape()
        } else if let Some(view) = self.outputs.get(&buf.name) {
            view.shape()
        } else {
            return Err(unbound(&buf.name));
        };
        shape.dims().get(k).copied().ok_or_else(|| {
            KernelError::eval_error(format!("'{}' has no axis {k}", buf.name))
        })
    }

    fn load(&self, buf: &Var, index: usize) -> crate::error::Result<T> {
        let data = if let Some(view) = self.inputs.get(&buf.name) {
            view.data()
        } else if let Some(view) = self.outputs.get(&buf.name) {
            view.data()
        } else {
            return Err(unbound(&buf.name));
        };
        data.get(index).copied().ok_or_else(|| {
            KernelError::eval_error(format!(
                "index {index} out of bounds for '{}' of length {}",
                buf.name,
                data.len()
            ))
        })
    }

    fn eval(&self, expr: &Expr) -> crate::error::Result<Value<T>> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Index(v) => Value::Index(*v),
                Literal::Size(v) => Value::Index(*v as i64),
                Literal::Float(_, v) => Value::Elem(T::from_f64(*v)),
                Literal::Int(_, v) => Value::Elem(T::from_f64(*v as f64)),
            }),
            Expr::Var(v) => self
                .scalars
                .get(&v.name)
                .copied()
                .ok_or_else(|| unbound(&v.name)),
            Expr::Length(buf) => Ok(Value::Index(self.buffer_len(buf)? as i64)),
            Expr::ShapeDim(buf, k) => Ok(Value::Index(self.buffer_dim(buf, *k)? as i64)),
            Expr::Load(buf, index) => {
                let index = self.index(index)?;
                Ok(Value::Elem(self.load(buf, index)?))
            }
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Index(v) => Ok(Value::Index(v.wrapping_neg())),
                Value::Elem(v) => Ok(Value::Elem(v.neg())),
                Value::Bool(_) => Err(type_error("negating a boolean")),
            },
            Expr::Binary(l, op, r) => binary(self.eval(l)?, *op, self.eval(r)?),
            Expr::Pow(base, exponent) => match (self.eval(base)?, self.eval(exponent)?) {
                (Value::Elem(b), Value::Elem(e)) => Ok(Value::Elem(b.pow(e))),
                _ => Err(type_error("pow expects element operands")),
            },
            Expr::Select {
                cond,
                then,
                otherwise,
            } => match self.eval(cond)? {
                Value::Bool(true) => self.eval(then),
                Value::Bool(false) => self.eval(otherwise),
                _ => Err(type_error("select condition is not a boolean")),
            },
        }
    }

    fn index(&self, expr: &Expr) -> crate::error::Result<usize> {
        match self.eval(expr)? {
            Value::Index(v) => usize::try_from(v)
                .map_err(|_| KernelError::eval_error(format!("negative index {v}"))),
            _ => Err(type_error("buffer index is not an integer")),
        }
    }

    fn assign(&mut self, var: &Var, value: Value<T>) -> crate::error::Result<()> {
        match self.scalars.get_mut(&var.name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(unbound(&var.name)),
        }
    }

    fn exec_block(&mut self, body: &[Stmt]) -> crate::error::Result<Flow<T>> {
        for stmt in body {
            if let Flow::Return(value) = self.exec(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }

    fn condition(&self, cond: &Expr) -> crate::error::Result<bool> {
        match self.eval(cond)? {
            Value::Bool(b) => Ok(b),
            _ => Err(type_error("condition is not a boolean")),
        }
    }

    fn exec(&mut self, stmt: &Stmt) -> crate::error::Result<Flow<T>> {
        match stmt {
            Stmt::Declare(var, expr) => {
                let value = self.eval(expr)?;
                self.scalars.insert(var.name.clone(), value);
            }
            Stmt::Assign(var, expr) => {
                let value = self.eval(expr)?;
                self.assign(var, value)?;
            }
            Stmt::AddAssign(var, expr) => {
                let current = self.eval(&Expr::var(var))?;
                let value = binary(current, BinOp::Add, self.eval(expr)?)?;
                self.assign(var, value)?;
            }
            Stmt::Store(buf, index, value) => {
                let index = self.index(index)?;
                let value = match self.eval(value)? {
                    Value::Elem(v) => v,
                    _ => return Err(type_error("stored value is not an element")),
                };
                let view = self.outputs.get_mut(&buf.name).ok_or_else(|| {
                    KernelError::eval_error(format!("'{}' is not a writable buffer", buf.name))
                })?;
                let len = view.len();
                let slot = view.data_mut().get_mut(index).ok_or_else(|| {
                    KernelError::eval_error(format!(
                        "index {index} out of bounds for '{}' of length {len}",
                        buf.name
                    ))
                })?;
                *slot = value;
            }
            Stmt::ForLoop {
                var,
                start,
                end,
                body,
            } => {
                let (start, end) = match (self.eval(start)?, self.eval(end)?) {
                    (Value::Index(s), Value::Index(e)) => (s, e),
                    _ => return Err(type_error("loop bounds are not integers")),
                };
                let mut i = start;
                while i < end {
                    self.scalars.insert(var.name.clone(), Value::Index(i));
                    if let Flow::Return(value) = self.exec_block(body)? {
                        return Ok(Flow::Return(value));
                    }
                    i += 1;
                }
            }
            Stmt::If { cond, body } => {
                if self.condition(cond)? {
                    return self.exec_block(body);
                }
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(e) => Some(self.eval(e)?),
                    None => None,
                };
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }
}

fn unbound(name: &str) -> KernelError {
    KernelError::eval_error(format!("'{name}' is not defined in the current context"))
}

fn binary<T: Element>(l: Value<T>, op: BinOp, r: Value<T>) -> crate::error::Result<Value<T>> {
    match (l, r) {
        (Value::Index(a), Value::Index(b)) => Ok(match op {
            BinOp::Add => Value::Index(a.wrapping_add(b)),
            BinOp::Sub => Value::Index(a.wrapping_sub(b)),
            BinOp::Mul => Value::Index(a.wrapping_mul(b)),
            BinOp::Div | BinOp::Rem if b == 0 => {
                return Err(KernelError::eval_error("integer division by zero"))
            }
            BinOp::Div => Value::Index(a.wrapping_div(b)),
            BinOp::Rem => Value::Index(a.wrapping_rem(b)),
            BinOp::Lt => Value::Bool(a < b),
            BinOp::Gt => Value::Bool(a > b),
            BinOp::Eq => Value::Bool(a == b),
        }),
        (Value::Elem(a), Value::Elem(b)) => Ok(match op {
            BinOp::Add => Value::Elem(a.add(b)),
            BinOp::Sub => Value::Elem(a.sub(b)),
            BinOp::Mul => Value::Elem(a.mul(b)),
            BinOp::Div => Value::Elem(a.div(b)),
            BinOp::Rem => return Err(type_error("'%' on elements")),
            BinOp::Lt => Value::Bool(a < b),
            BinOp::Gt => Value::Bool(a > b),
            BinOp::Eq => Value::Bool(a == b),
        }),
        _ => Err(type_error(&format!("'{}' between an index and an element", op.symbol()))),
    }
}

/// Runs functions of one module by name.
pub struct Interpreter<'m> {
    module: &'m Module,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self { module }
    }

    /// Call `name`. Returns the scalar result, or `None` for functions
    /// without a return type (map kernels write their `out` argument).
    pub fn call<T: Element>(&self, name: &str, args: Vec<Arg<'_, T>>) -> crate::error::Result<Option<T>> {
        let func = self
            .module
            .function(name)
            .ok_or_else(|| KernelError::eval_error(format!("no function named '{name}'")))?;
        run(func, args)
    }
}

/// Execute `func` on `args`.
pub fn run<T: Element>(func: &Function, args: Vec<Arg<'_, T>>) -> crate::error::Result<Option<T>> {
    trace!("interpreting '{}'", func.name);
    let mut machine = Machine::bind(func, args)?;
    let result = match machine.exec_block(&func.body)? {
        Flow::Return(value) => value,
        Flow::Next => None,
    };
    match (func.return_type, result) {
        (None, None) => Ok(None),
        (Some(Type::Elem(_)), Some(Value::Elem(v))) => Ok(Some(v)),
        (Some(Type::Elem(_)), None) => Err(KernelError::eval_error(format!(
            "'{}' finished without returning a value",
            func.name
        ))),
        (ret, _) => Err(type_error(&format!(
            "'{}' returned a value that does not match {}",
            func.name,
            ret.map(|t| t.to_string()).unwrap_or_else(|| "void".to_string())
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Backing;
    use crate::dtype::ElementType;
    use crate::lower::{lower_kernel, KernelOutput, KernelSpec, LoweringOptions};
    use crate::reduce::ReduceOp;

    fn dot(rank: usize) -> Function {
        lower_kernel(
            &KernelSpec::dot_product(ElementType::F64, rank),
            &LoweringOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_dot_product() {
        let a = Backing::from_vec(vec![1.0f64, 2.0, 3.0]);
        let b = Backing::from_vec(vec![4.0f64, 5.0, 6.0]);
        let args = vec![
            Arg::Buffer(BufferView::contiguous(&a, vec![3]).unwrap()),
            Arg::Buffer(BufferView::contiguous(&b, vec![3]).unwrap()),
        ];
        assert_eq!(run(&dot(1), args).unwrap(), Some(32.0));
    }

    #[test]
    fn test_empty_without_guard_returns_identity() {
        let f = lower_kernel(
            &KernelSpec::dot_product(ElementType::F64, 1),
            &LoweringOptions { empty_guard: false },
        )
        .unwrap();
        let a = Backing::<f64>::from_vec(vec![]);
        let args = vec![
            Arg::Buffer(BufferView::contiguous(&a, vec![0]).unwrap()),
            Arg::Buffer(BufferView::contiguous(&a, vec![0]).unwrap()),
        ];
        assert_eq!(run(&f, args).unwrap(), Some(0.0));
    }

    #[test]
    fn test_rejects_wrong_rank_and_dtype() {
        let a = Backing::from_vec(vec![1.0f64; 4]);
        let args = vec![
            Arg::Buffer(BufferView::contiguous(&a, vec![2, 2]).unwrap()),
            Arg::Buffer(BufferView::contiguous(&a, vec![2, 2]).unwrap()),
        ];
        assert!(matches!(run(&dot(1), args), Err(KernelError::Eval { .. })));

        let x = Backing::from_vec(vec![1.0f32; 2]);
        let args = vec![
            Arg::Buffer(BufferView::contiguous(&x, vec![2]).unwrap()),
            Arg::Buffer(BufferView::contiguous(&x, vec![2]).unwrap()),
        ];
        assert!(run(&dot(1), args).is_err());
        assert!(run::<f64>(&dot(1), vec![]).is_err());
    }

    #[test]
    fn test_mismatched_shapes_fail_on_bounds() {
        let a = Backing::from_vec(vec![1.0f64; 3]);
        let b = Backing::from_vec(vec![1.0f64; 2]);
        let args = vec![
            Arg::Buffer(BufferView::contiguous(&a, vec![3]).unwrap()),
            Arg::Buffer(BufferView::contiguous(&b, vec![2]).unwrap()),
        ];
        assert!(matches!(run(&dot(1), args), Err(KernelError::Eval { .. })));
    }

    #[test]
    fn test_map_kernel_writes_output() {
        let spec = KernelSpec::from_source(
            "scale",
            ElementType::I64,
            2,
            &["x"],
            "3 * x - 1",
            KernelOutput::Map,
        )
        .unwrap();
        let module = crate::ir::Module::new(vec![
            lower_kernel(&spec, &LoweringOptions::default()).unwrap()
        ]);
        let x = Backing::from_vec(vec![1i64, 2, 3, 4, 5, 6]);
        let mut out = vec![0i64; 6];
        let result = Interpreter::new(&module)
            .call(
                "scale",
                vec![
                    Arg::Buffer(BufferView::contiguous(&x, vec![2, 3]).unwrap()),
                    Arg::Output(BufferViewMut::new(&mut out, vec![2, 3]).unwrap()),
                ],
            )
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(out, vec![2, 5, 8, 11, 14, 17]);
    }

    #[test]
    fn test_max_kernel_skips_nan() {
        let spec = KernelSpec::from_source(
            "peak",
            ElementType::F64,
            1,
            &["a"],
            "a",
            KernelOutput::Reduce(ReduceOp::Max),
        )
        .unwrap();
        let f = lower_kernel(&spec, &LoweringOptions::default()).unwrap();
        let a = Backing::from_vec(vec![1.0f64, f64::NAN, 3.0, 2.0]);
        let args = vec![Arg::Buffer(BufferView::contiguous(&a, vec![4]).unwrap())];
        assert_eq!(run(&f, args).unwrap(), Some(3.0));
    }

    #[test]
    fn test_unknown_function() {
        let module = crate::ir::Module::default();
        assert!(Interpreter::new(&module).call::<f64>("nope", vec![]).is_err());
    }
}
