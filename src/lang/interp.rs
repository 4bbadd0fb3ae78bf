use std::collections::HashMap;

use indexmap::IndexMap;
use std::env;

use crate::lang::ast::{Arg, BinaryOp, Expr, ExprKind, Program, Stmt, StmtKind, UnaryOp};
use crate::lang::{Args, EvalError, Host, Interrupt, Value};

/// Names every program can call, regardless of host
pub const BUILTINS: &[&str] = &[
    "range", "len", "str", "int", "float", "join", "keys", "getenv", "fail",
];

/// `range()` refuses to build longer lists than this
const MAX_RANGE: i64 = 1_000_000;

type Eval<T> = Result<T, Interrupt>;

pub struct Interpreter<'h, H: Host> {
    host: &'h mut H,
    vars: HashMap<String, Value>,
}

impl<'h, H: Host> Interpreter<'h, H> {
    pub fn new(host: &'h mut H) -> Self {
        Interpreter {
            host,
            vars: HashMap::new(),
        }
    }

    pub fn run(&mut self, program: &Program) -> Eval<()> {
        self.block(&program.stmts)
    }

    /// Current binding of a variable, mostly useful in tests
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    fn is_reserved(&self, name: &str) -> bool {
        BUILTINS.contains(&name) || self.host.capabilities().contains(&name)
    }

    fn block(&mut self, stmts: &[Stmt]) -> Eval<()> {
        for stmt in stmts {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn assign(&mut self, name: &str, value: Value, line: usize) -> Eval<()> {
        if self.is_reserved(name) {
            return Err(EvalError::new(line, format!("cannot assign to builtin '{name}'")).into());
        }
        self.vars.insert(name.to_string(), value);
        Ok(())
    }

    fn statement(&mut self, stmt: &Stmt) -> Eval<()> {
        match &stmt.kind {
            StmtKind::Assign { name, value } => {
                let value = self.eval(value)?;
                self.assign(name, value, stmt.line)
            }
            StmtKind::For { var, iter, body } => {
                let items = match self.eval(iter)? {
                    Value::List(items) => items,
                    Value::Map(map) => map.into_keys().map(Value::Str).collect(),
                    Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                    other => {
                        return Err(EvalError::new(
                            iter.line,
                            format!("cannot iterate over {}", other.type_name()),
                        )
                        .into())
                    }
                };
                for item in items {
                    self.assign(var, item, stmt.line)?;
                    self.block(body)?;
                }
                Ok(())
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.truthy() {
                    self.block(then)
                } else {
                    self.block(otherwise)
                }
            }
            StmtKind::Expr(expr) => self.eval(expr).map(|_| ()),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        let line = expr.line;
        Ok(match &expr.kind {
            ExprKind::Null => Value::Null,
            ExprKind::Bool(b) => Value::Bool(*b),
            ExprKind::Int(i) => Value::Int(*i),
            ExprKind::Float(x) => Value::Float(*x),
            ExprKind::Str(s) => Value::Str(s.clone()),
            ExprKind::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Eval<Vec<_>>>()?,
            ),
            ExprKind::Map(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let value = self.eval(value)?;
                    map.insert(key.clone(), value);
                }
                Value::Map(map)
            }
            ExprKind::Var(name) => match self.vars.get(name) {
                Some(value) => value.clone(),
                None if self.is_reserved(name) => Value::Function(name.clone()),
                None => return Err(EvalError::new(line, format!("name '{name}' is not defined")).into()),
            },
            ExprKind::Call { callee, args } => {
                let name = match self.eval(callee)? {
                    Value::Function(name) => name,
                    other => {
                        return Err(EvalError::new(
                            line,
                            format!("{} is not callable", other.type_name()),
                        )
                        .into())
                    }
                };
                let args = self.arguments(args)?;
                if self.host.capabilities().contains(&name.as_str()) {
                    self.host.call(&name, args, line)?
                } else {
                    call_builtin(&name, args, line)?
                }
            }
            ExprKind::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(target, index, line)?
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match (op, value) {
                    (UnaryOp::Not, value) => Value::Bool(!value.truthy()),
                    (UnaryOp::Neg, Value::Int(i)) => Value::Int(
                        i.checked_neg()
                            .ok_or_else(|| EvalError::new(line, "integer overflow"))?,
                    ),
                    (UnaryOp::Neg, Value::Float(x)) => Value::Float(-x),
                    (UnaryOp::Neg, other) => {
                        return Err(EvalError::new(
                            line,
                            format!("cannot negate {}", other.type_name()),
                        )
                        .into())
                    }
                }
            }
            ExprKind::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let left = self.eval(left)?;
                    Value::Bool(left.truthy() && self.eval(right)?.truthy())
                }
                BinaryOp::Or => {
                    let left = self.eval(left)?;
                    Value::Bool(left.truthy() || self.eval(right)?.truthy())
                }
                _ => {
                    let left = self.eval(left)?;
                    let right = self.eval(right)?;
                    binary(*op, left, right, line)?
                }
            },
        })
    }

    fn arguments(&mut self, args: &[Arg]) -> Eval<Args> {
        let mut out = Args::default();
        for arg in args {
            match arg {
                Arg::Positional(expr) => out.positional.push(self.eval(expr)?),
                Arg::Keyword(name, expr) => {
                    if out.keyword.iter().any(|(seen, _)| seen == name) {
                        return Err(EvalError::new(
                            expr.line,
                            format!("keyword argument '{name}' repeated"),
                        )
                        .into());
                    }
                    let value = self.eval(expr)?;
                    out.keyword.push((name.clone(), value));
                }
            }
        }
        Ok(out)
    }
}

fn type_error(line: usize, op: BinaryOp, left: &Value, right: &Value) -> EvalError {
    EvalError::new(
        line,
        format!(
            "unsupported operand types for {}: {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ),
    )
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn binary(op: BinaryOp, left: Value, right: Value, line: usize) -> Result<Value, EvalError> {
    let overflow = || EvalError::new(line, "integer overflow");
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(left.loose_eq(&right))),
        BinaryOp::Ne => return Ok(Value::Bool(!left.loose_eq(&right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                _ => match (as_f64(&left), as_f64(&right)) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => return Err(type_error(line, op, &left, &right)),
                },
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            return Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }));
        }
        _ => {}
    }

    match (op, &left, &right) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (BinaryOp::Add, Value::Int(a), Value::Int(b)) => {
            a.checked_add(*b).map(Value::Int).ok_or_else(overflow)
        }
        (BinaryOp::Sub, Value::Int(a), Value::Int(b)) => {
            a.checked_sub(*b).map(Value::Int).ok_or_else(overflow)
        }
        (BinaryOp::Mul, Value::Int(a), Value::Int(b)) => {
            a.checked_mul(*b).map(Value::Int).ok_or_else(overflow)
        }
        (BinaryOp::Div | BinaryOp::Rem, Value::Int(_), Value::Int(0)) => {
            Err(EvalError::new(line, "division by zero"))
        }
        (BinaryOp::Div, Value::Int(a), Value::Int(b)) => Ok(Value::Float(*a as f64 / *b as f64)),
        (BinaryOp::Rem, Value::Int(a), Value::Int(b)) => {
            a.checked_rem_euclid(*b).map(Value::Int).ok_or_else(overflow)
        }
        _ => match (as_f64(&left), as_f64(&right)) {
            (Some(a), Some(b)) => Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a.rem_euclid(b),
            })),
            _ => Err(type_error(line, op, &left, &right)),
        },
    }
}

fn index_value(target: Value, index: Value, line: usize) -> Result<Value, EvalError> {
    let position = |len: usize, i: i64| -> Result<usize, EvalError> {
        let resolved = if i < 0 { len as i64 + i } else { i };
        if resolved < 0 || resolved >= len as i64 {
            Err(EvalError::new(line, format!("index {i} out of range for length {len}")))
        } else {
            Ok(resolved as usize)
        }
    };
    match (target, index) {
        (Value::List(items), Value::Int(i)) => {
            let at = position(items.len(), i)?;
            Ok(items[at].clone())
        }
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let at = position(chars.len(), i)?;
            Ok(Value::Str(chars[at].to_string()))
        }
        (Value::Map(map), Value::Str(key)) => map
            .get(&key)
            .cloned()
            .ok_or_else(|| EvalError::new(line, format!("key {key:?} not found"))),
        (target, index) => Err(EvalError::new(
            line,
            format!("cannot index {} with {}", target.type_name(), index.type_name()),
        )),
    }
}

fn arity(name: &str, args: &Args, min: usize, max: usize, line: usize) -> Result<(), EvalError> {
    if !args.keyword.is_empty() {
        return Err(EvalError::new(
            line,
            format!("{name}() does not take keyword arguments"),
        ));
    }
    let n = args.positional.len();
    if n < min || n > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(EvalError::new(
            line,
            format!("{name}() takes {expected} arguments, got {n}"),
        ));
    }
    Ok(())
}

fn int_arg(name: &str, value: &Value, line: usize) -> Result<i64, EvalError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(EvalError::new(
            line,
            format!("{name}() expects int, got {}", other.type_name()),
        )),
    }
}

fn call_builtin(name: &str, args: Args, line: usize) -> Result<Value, EvalError> {
    match name {
        "range" => {
            arity(name, &args, 1, 3, line)?;
            let ints = args
                .positional
                .iter()
                .map(|v| int_arg(name, v, line))
                .collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => unreachable!("arity checked"),
            };
            if step == 0 {
                return Err(EvalError::new(line, "range() step must not be zero"));
            }
            let span = (stop as i128 - start as i128) as f64 / step as f64;
            if span.ceil() > MAX_RANGE as f64 {
                return Err(EvalError::new(
                    line,
                    format!("range() longer than {MAX_RANGE} elements"),
                ));
            }
            let mut items = vec![];
            let mut current = start;
            while (step > 0 && current < stop) || (step < 0 && current > stop) {
                items.push(Value::Int(current));
                match current.checked_add(step) {
                    Some(next) => current = next,
                    None => break,
                }
            }
            Ok(Value::List(items))
        }
        "len" => {
            arity(name, &args, 1, 1, line)?;
            let len = match &args.positional[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Map(map) => map.len(),
                other => {
                    return Err(EvalError::new(
                        line,
                        format!("len() of {}", other.type_name()),
                    ))
                }
            };
            Ok(Value::Int(len as i64))
        }
        "str" => {
            arity(name, &args, 1, 1, line)?;
            Ok(Value::Str(args.positional[0].to_text()))
        }
        "int" => {
            arity(name, &args, 1, 1, line)?;
            match &args.positional[0] {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Float(x) if x.is_finite() && x.abs() < i64::MAX as f64 => {
                    Ok(Value::Int(x.trunc() as i64))
                }
                Value::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| EvalError::new(line, format!("int() cannot parse {s:?}"))),
                other => Err(EvalError::new(
                    line,
                    format!("int() cannot convert {other}"),
                )),
            }
        }
        "float" => {
            arity(name, &args, 1, 1, line)?;
            match &args.positional[0] {
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Float(x) => Ok(Value::Float(*x)),
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| EvalError::new(line, format!("float() cannot parse {s:?}"))),
                other => Err(EvalError::new(
                    line,
                    format!("float() cannot convert {}", other.type_name()),
                )),
            }
        }
        "join" => {
            arity(name, &args, 2, 2, line)?;
            match (&args.positional[0], &args.positional[1]) {
                (Value::List(items), Value::Str(sep)) => Ok(Value::Str(
                    items.iter().map(Value::to_text).collect::<Vec<_>>().join(sep),
                )),
                _ => Err(EvalError::new(line, "join() expects a list and a separator string")),
            }
        }
        "keys" => {
            arity(name, &args, 1, 1, line)?;
            match &args.positional[0] {
                Value::Map(map) => Ok(Value::List(map.keys().cloned().map(Value::Str).collect())),
                other => Err(EvalError::new(
                    line,
                    format!("keys() of {}", other.type_name()),
                )),
            }
        }
        "getenv" => {
            arity(name, &args, 1, 2, line)?;
            let Value::Str(var) = &args.positional[0] else {
                return Err(EvalError::new(line, "getenv() expects a variable name"));
            };
            Ok(match env::var(var) {
                Ok(value) => Value::Str(value),
                Err(_) => args.positional.get(1).cloned().unwrap_or(Value::Null),
            })
        }
        "fail" => {
            arity(name, &args, 1, 1, line)?;
            Err(EvalError::new(line, args.positional[0].to_text()))
        }
        _ => Err(EvalError::new(line, format!("unknown function '{name}'"))),
    }
}
