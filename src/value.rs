//! Runtime values
//!
//! Everything a token can carry as its result, pass to a site, bind in its
//! environment or throw as an exception.

use crate::env::{Binding, Env};
use crate::error::TokenError;
use crate::node::{Def, NodeRef};
use crate::site::Site;
use std::fmt;
use std::sync::Arc;

/// A position in the source program, attached to nodes by the compiler.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: &str, line: u32, column: u32) -> Self {
        Self {
            file: Arc::from(file),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A value produced or consumed by Orc code.
#[derive(Clone)]
pub enum Value {
    /// The unit value published by sites that have nothing else to say.
    Signal,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
    List(Arc<[Value]>),
    Closure(Closure),
    Site(Arc<dyn Site>),
    /// A runtime error turned into a catchable exception value.
    Error(Arc<TokenError>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn site(site: impl Site + 'static) -> Self {
        Value::Site(Arc::new(site))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Short name of the variant, used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Signal => "signal",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Closure(_) => "closure",
            Value::Site(_) => "site",
            Value::Error(_) => "error",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Signal, Value::Signal) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => {
                Arc::ptr_eq(&a.defs, &b.defs) && a.index == b.index
            }
            (Value::Site(a), Value::Site(b)) => Arc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Signal => write!(f, "signal"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{:?}", &**s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Closure(c) => write!(f, "<closure {}>", c.def().name),
            Value::Site(s) => write!(f, "<site {}>", s.name()),
            Value::Error(e) => write!(f, "<error: {e}>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A definition paired with the environment it was declared in.
///
/// Closures from one `Defs` group share the definition slice and the
/// environment *below* the group. Entering a closure rebuilds the group's
/// bindings on top of that environment, so recursion never needs a
/// reference cycle.
#[derive(Clone)]
pub struct Closure {
    defs: Arc<[Def]>,
    index: usize,
    env: Env,
}

impl Closure {
    pub fn new(defs: Arc<[Def]>, index: usize, env: Env) -> Self {
        Self { defs, index, env }
    }

    pub fn def(&self) -> &Def {
        &self.defs[self.index]
    }

    pub fn arity(&self) -> usize {
        self.def().arity
    }

    pub fn body(&self) -> &NodeRef {
        &self.def().body
    }

    /// Environment the body runs in: captured bindings, then every closure
    /// of the definition group in declaration order, then the arguments in
    /// order (so `Var(0)` is the last argument).
    pub(crate) fn body_env(&self, args: Vec<Value>) -> Env {
        let mut env = self.env.clone();
        for i in 0..self.defs.len() {
            env.push(Binding::Value(Value::Closure(Closure::new(
                self.defs.clone(),
                i,
                self.env.clone(),
            ))));
        }
        for arg in args {
            env.push(Binding::Value(arg));
        }
        env
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({})", self.def().name)
    }
}
