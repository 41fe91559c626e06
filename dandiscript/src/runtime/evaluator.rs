// Tree-walking evaluator. Async because host calls (data access, remote
// services) are suspension points; everything else is plain computation.

use std::collections::BTreeMap;

use async_recursion::async_recursion;

use crate::ast::{BinaryOp, Expr, Literal, Program, Stmt, UnaryOp};

use super::environment::Environment;
use super::error::{ScriptError, ScriptResult};
use super::host::ScriptHost;
use super::values::{values_equal, Value};

/// Non-local control flow signal threaded through statement execution.
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub struct Evaluator<'h> {
    host: &'h dyn ScriptHost,
}

impl<'h> Evaluator<'h> {
    pub fn new(host: &'h dyn ScriptHost) -> Self {
        Evaluator { host }
    }

    /// Run a program with the given global bindings. Returns the value of
    /// the `return` statement that ended the program, or null when the
    /// program ran off the end.
    pub async fn run(
        &self,
        program: &Program,
        globals: Vec<(String, Value)>,
    ) -> ScriptResult<Value> {
        let mut env = Environment::new();
        for (name, value) in globals {
            env.define(&name, value);
        }
        match self.exec_stmts(&program.stmts, &mut env).await? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Null),
            Flow::Break => Err(ScriptError::ControlOutsideLoop("break")),
            Flow::Continue => Err(ScriptError::ControlOutsideLoop("continue")),
        }
    }

    async fn exec_block(&self, stmts: &[Stmt], env: &mut Environment) -> ScriptResult<Flow> {
        env.push_scope();
        let result = self.exec_stmts(stmts, env).await;
        env.pop_scope();
        result
    }

    async fn exec_stmts(&self, stmts: &[Stmt], env: &mut Environment) -> ScriptResult<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt, env).await? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    #[async_recursion]
    async fn exec_stmt(&self, stmt: &Stmt, env: &mut Environment) -> ScriptResult<Flow> {
        match stmt {
            Stmt::Let { name, value } => {
                let value = self.eval(value, env).await?;
                env.define(name, value);
                Ok(Flow::Normal)
            }
            Stmt::Assign { name, value } => {
                let value = self.eval(value, env).await?;
                env.assign(name, value)?;
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval(expr, env).await?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                if self.eval(cond, env).await?.is_truthy() {
                    self.exec_block(then_block, env).await
                } else if let Some(stmts) = else_block {
                    self.exec_block(stmts, env).await
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::For {
                var,
                iterable,
                body,
            } => {
                let iterable = self.eval(iterable, env).await?;
                for item in iteration_items(iterable)? {
                    env.push_scope();
                    env.define(var, item);
                    let flow = self.exec_stmts(body, env).await;
                    env.pop_scope();
                    match flow? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::While { cond, body } => {
                while self.eval(cond, env).await?.is_truthy() {
                    env.push_scope();
                    let flow = self.exec_stmts(body, env).await;
                    env.pop_scope();
                    match flow? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, env).await?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
        }
    }

    #[async_recursion]
    async fn eval(&self, expr: &Expr, env: &mut Environment) -> ScriptResult<Value> {
        match expr {
            Expr::Literal(lit) => Ok(literal_value(lit)),
            Expr::Ident(name) => env.lookup(name),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env).await?);
                }
                Ok(Value::List(values))
            }
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let value = self.eval(value, env).await?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Map(map))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, env).await?;
                apply_unary(*op, value)
            }
            Expr::Binary { op, left, right } => match op {
                // Logical operators short-circuit and yield the deciding
                // operand, so `x || fallback` works as a default.
                BinaryOp::And => {
                    let left = self.eval(left, env).await?;
                    if left.is_truthy() {
                        self.eval(right, env).await
                    } else {
                        Ok(left)
                    }
                }
                BinaryOp::Or => {
                    let left = self.eval(left, env).await?;
                    if left.is_truthy() {
                        Ok(left)
                    } else {
                        self.eval(right, env).await
                    }
                }
                _ => {
                    let left = self.eval(left, env).await?;
                    let right = self.eval(right, env).await?;
                    apply_binary(*op, left, right)
                }
            },
            Expr::Field { target, name } => {
                let target = self.eval(target, env).await?;
                match target {
                    Value::Map(entries) => {
                        Ok(entries.get(name).cloned().unwrap_or(Value::Null))
                    }
                    Value::Host(host_ref) => self.host.get_property(&host_ref, name).await,
                    other => Err(ScriptError::UnknownMember {
                        target: other.type_name().to_string(),
                        member: name.clone(),
                    }),
                }
            }
            Expr::Index { target, index } => {
                let target = self.eval(target, env).await?;
                let index = self.eval(index, env).await?;
                apply_index(target, index)
            }
            Expr::Call { target, args } => {
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg, env).await?);
                }
                match target.as_ref() {
                    Expr::Ident(name) => call_builtin(name, arg_values),
                    Expr::Field { target: receiver, name } => {
                        let receiver = self.eval(receiver, env).await?;
                        match receiver {
                            Value::Host(host_ref) => {
                                self.host.call_method(&host_ref, name, arg_values).await
                            }
                            other => Err(ScriptError::UnknownMember {
                                target: other.type_name().to_string(),
                                member: name.clone(),
                            }),
                        }
                    }
                    other => {
                        let value = self.eval(other, env).await?;
                        Err(ScriptError::NotCallable(value.type_name().to_string()))
                    }
                }
            }
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(x) => Value::Float(*x),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

fn iteration_items(value: Value) -> ScriptResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        Value::Map(entries) => Ok(entries.keys().cloned().map(Value::Str).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(ScriptError::type_error(
            "for loop",
            "list, map, or string",
            other.type_name(),
        )),
    }
}

fn apply_unary(op: UnaryOp, value: Value) -> ScriptResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
        UnaryOp::Neg => match value {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(ScriptError::Overflow),
            Value::Float(x) => Ok(Value::Float(-x)),
            other => Err(ScriptError::type_error(
                "negation",
                "number",
                other.type_name(),
            )),
        },
    }
}

fn op_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "||",
        BinaryOp::And => "&&",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> ScriptResult<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, left, right),
        BinaryOp::Add => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (left, right) => numeric(op, left, right),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            numeric(op, left, right)
        }
        BinaryOp::And | BinaryOp::Or => {
            // Short-circuit forms are handled in eval; this path only runs
            // for pre-evaluated operands.
            let result = if op == BinaryOp::And {
                left.is_truthy() && right.is_truthy()
            } else {
                left.is_truthy() || right.is_truthy()
            };
            Ok(Value::Bool(result))
        }
    }
}

fn compare(op: BinaryOp, left: Value, right: Value) -> ScriptResult<Value> {
    let ordering = match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        _ => {
            return Err(ScriptError::type_error(
                op_name(op),
                "two numbers or two strings",
                &format!("{} and {}", left.type_name(), right.type_name()),
            ))
        }
    };
    let result = match ordering {
        Some(ordering) => match op {
            BinaryOp::Lt => ordering.is_lt(),
            BinaryOp::Le => ordering.is_le(),
            BinaryOp::Gt => ordering.is_gt(),
            BinaryOp::Ge => ordering.is_ge(),
            _ => false,
        },
        // NaN comparisons are simply false, as in most languages.
        None => false,
    };
    Ok(Value::Bool(result))
}

fn numeric(op: BinaryOp, left: Value, right: Value) -> ScriptResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_arith(op, a, b),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_arith(op, a, b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_arith(op, a as f64, b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_arith(op, a, b as f64))),
        (left, right) => Err(ScriptError::type_error(
            op_name(op),
            "numbers",
            &format!("{} and {}", left.type_name(), right.type_name()),
        )),
    }
}

fn int_arith(op: BinaryOp, a: i64, b: i64) -> ScriptResult<Value> {
    if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0 {
        return Err(ScriptError::DivisionByZero);
    }
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Rem => a.checked_rem(b),
        _ => None,
    };
    result.map(Value::Int).ok_or(ScriptError::Overflow)
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => f64::NAN,
    }
}

fn apply_index(target: Value, index: Value) -> ScriptResult<Value> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => {
            if i < 0 || i as usize >= items.len() {
                return Err(ScriptError::IndexOutOfBounds {
                    index: i,
                    length: items.len(),
                });
            }
            Ok(items[i as usize].clone())
        }
        (Value::Map(entries), Value::Str(key)) => {
            Ok(entries.get(&key).cloned().unwrap_or(Value::Null))
        }
        (target, index) => Err(ScriptError::type_error(
            "indexing",
            "list[int] or map[string]",
            &format!("{}[{}]", target.type_name(), index.type_name()),
        )),
    }
}

fn expect_args(function: &str, expected: usize, args: &[Value]) -> ScriptResult<()> {
    if args.len() != expected {
        return Err(ScriptError::Arity {
            function: function.to_string(),
            expected: expected.to_string(),
            actual: args.len(),
        });
    }
    Ok(())
}

fn call_builtin(name: &str, mut args: Vec<Value>) -> ScriptResult<Value> {
    match name {
        "len" => {
            expect_args("len", 1, &args)?;
            let length = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Map(entries) => entries.len(),
                other => {
                    return Err(ScriptError::type_error(
                        "len",
                        "string, list, or map",
                        other.type_name(),
                    ))
                }
            };
            Ok(Value::Int(length as i64))
        }
        "str" => {
            expect_args("str", 1, &args)?;
            let rendered = match &args[0] {
                Value::Str(s) => s.clone(),
                other => other.to_string(),
            };
            Ok(Value::Str(rendered))
        }
        "contains" => {
            expect_args("contains", 2, &args)?;
            let needle = args.pop().unwrap_or(Value::Null);
            let haystack = args.pop().unwrap_or(Value::Null);
            let found = match (&haystack, &needle) {
                (Value::Str(s), Value::Str(sub)) => s.contains(sub.as_str()),
                (Value::List(items), needle) => items.iter().any(|v| values_equal(v, needle)),
                (Value::Map(entries), Value::Str(key)) => entries.contains_key(key),
                _ => {
                    return Err(ScriptError::type_error(
                        "contains",
                        "string/list/map haystack",
                        &format!("{} and {}", haystack.type_name(), needle.type_name()),
                    ))
                }
            };
            Ok(Value::Bool(found))
        }
        "lower" | "upper" => {
            expect_args(name, 1, &args)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Str(if name == "lower" {
                    s.to_lowercase()
                } else {
                    s.to_uppercase()
                })),
                other => Err(ScriptError::type_error(name, "string", other.type_name())),
            }
        }
        "keys" => {
            expect_args("keys", 1, &args)?;
            match &args[0] {
                Value::Map(entries) => {
                    Ok(Value::List(entries.keys().cloned().map(Value::Str).collect()))
                }
                other => Err(ScriptError::type_error("keys", "map", other.type_name())),
            }
        }
        "push" => {
            expect_args("push", 2, &args)?;
            let value = args.pop().unwrap_or(Value::Null);
            match args.pop() {
                Some(Value::List(mut items)) => {
                    items.push(value);
                    Ok(Value::List(items))
                }
                Some(other) => Err(ScriptError::type_error("push", "list", other.type_name())),
                None => Err(ScriptError::type_error("push", "list", "nothing")),
            }
        }
        "range" => {
            if args.is_empty() || args.len() > 2 {
                return Err(ScriptError::Arity {
                    function: "range".to_string(),
                    expected: "1 or 2".to_string(),
                    actual: args.len(),
                });
            }
            let bounds: Vec<i64> = args
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Ok(*i),
                    other => Err(ScriptError::type_error("range", "int", other.type_name())),
                })
                .collect::<ScriptResult<_>>()?;
            let (start, end) = if bounds.len() == 1 {
                (0, bounds[0])
            } else {
                (bounds[0], bounds[1])
            };
            Ok(Value::List((start..end).map(Value::Int).collect()))
        }
        _ => Err(ScriptError::UnknownFunction(name.to_string())),
    }
}
