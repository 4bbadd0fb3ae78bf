//! The language of submission blocks
//!
//! A deliberately small, side-effect free language: literals, lists, maps, variables, `for`, `if`
//! and calls. The interpreter itself can only compute values. Every capability that touches the
//! outside world is supplied by a [`Host`], which is how the sandbox decides what `submit`, `pip`
//! and friends actually do.

use std::fmt;

/// Source text to tokens
pub mod token;
/// Syntax tree produced by the parser
pub mod ast;
/// Recursive descent parser
pub mod parse;
/// Runtime values
pub mod value;
/// Tree-walking evaluator and pure builtins
pub mod interp;

pub use ast::Program;
pub use interp::Interpreter;
pub use value::Value;

/// An error in submission code, located by its line within the submission segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    pub line: usize,
    pub message: String,
}

impl EvalError {
    pub fn new(line: usize, message: impl Into<String>) -> EvalError {
        EvalError {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Why evaluation ended early
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    Error(EvalError),
    /// Stop enumerating; raised by a host and caught by whoever started the interpreter
    Stop,
}

impl From<EvalError> for Interrupt {
    fn from(err: EvalError) -> Self {
        Interrupt::Error(err)
    }
}

/// Arguments of one call, in source order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

/// Provider of the named capabilities a program may call
pub trait Host {
    /// Names this host answers to; they shadow nothing and cannot be reassigned
    fn capabilities(&self) -> &[&'static str];

    fn call(&mut self, name: &str, args: Args, line: usize) -> Result<Value, Interrupt>;
}

/// Parse and evaluate `code` against `host`
pub fn run<H: Host>(code: &str, host: &mut H) -> Result<(), Interrupt> {
    let program = parse::parse(code)?;
    Interpreter::new(host).run(&program)
}
