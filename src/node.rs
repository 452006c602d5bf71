//! Compiled program graph
//!
//! Nodes are immutable and shared between every token that reaches them.
//! The compiler hands the engine a root [`NodeRef`]; each node kind is
//! processed by one arm of the interpreter.

use crate::value::{SourceLocation, Value};
use std::sync::Arc;

pub type NodeRef = Arc<Node>;

/// Operand of a node: a de Bruijn variable or a literal.
#[derive(Clone, Debug)]
pub enum Arg {
    Var(usize),
    Const(Value),
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Const(v)
    }
}

/// One definition of a mutually recursive group.
#[derive(Clone, Debug)]
pub struct Def {
    pub name: Arc<str>,
    pub arity: usize,
    pub body: NodeRef,
}

impl Def {
    pub fn new(name: &str, arity: usize, body: NodeRef) -> Self {
        Self {
            name: Arc::from(name),
            arity,
            body,
        }
    }
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Emit the token's result to the top level.
    Publish,
    Stop,
    Let { arg: Arg, next: NodeRef },
    Bind { next: NodeRef },
    Unwind { width: usize, next: NodeRef },
    Fork { left: NodeRef, right: NodeRef },
    /// `left <x< right`: `left` sees `x` as the most recent binding.
    Pruning { left: NodeRef, right: NodeRef },
    /// Terminal of a pruning's right side.
    Store,
    Otherwise { left: NodeRef, right: NodeRef },
    Leave { next: NodeRef },
    Defs { defs: Arc<[Def]>, next: NodeRef },
    Call { target: Arg, args: Vec<Arg>, next: NodeRef },
    Return,
    Try { body: NodeRef, handler: Arg, next: NodeRef },
    PopHandler { next: NodeRef },
    Throw { arg: Arg },
    Delay { arg: Arg, next: NodeRef },
    /// result := current time of the token's logical clock.
    Now { next: NodeRef },
    WithClock { body: NodeRef },
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub location: Option<SourceLocation>,
}

impl Node {
    fn wrap(kind: NodeKind) -> NodeRef {
        Arc::new(Node {
            kind,
            location: None,
        })
    }

    /// Copy of this node tagged with a source location.
    pub fn at(&self, location: SourceLocation) -> NodeRef {
        Arc::new(Node {
            kind: self.kind.clone(),
            location: Some(location),
        })
    }

    pub fn publish() -> NodeRef {
        Self::wrap(NodeKind::Publish)
    }

    pub fn stop() -> NodeRef {
        Self::wrap(NodeKind::Stop)
    }

    pub fn store() -> NodeRef {
        Self::wrap(NodeKind::Store)
    }

    pub fn ret() -> NodeRef {
        Self::wrap(NodeKind::Return)
    }

    pub fn let_(arg: impl Into<Arg>, next: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::Let {
            arg: arg.into(),
            next,
        })
    }

    pub fn bind(next: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::Bind { next })
    }

    pub fn unwind(width: usize, next: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::Unwind { width, next })
    }

    pub fn fork(left: NodeRef, right: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::Fork { left, right })
    }

    pub fn pruning(left: NodeRef, right: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::Pruning { left, right })
    }

    pub fn otherwise(left: NodeRef, right: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::Otherwise { left, right })
    }

    pub fn leave(next: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::Leave { next })
    }

    pub fn defs(defs: Vec<Def>, next: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::Defs {
            defs: Arc::from(defs),
            next,
        })
    }

    pub fn call(target: impl Into<Arg>, args: Vec<Arg>, next: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::Call {
            target: target.into(),
            args,
            next,
        })
    }

    pub fn try_(body: NodeRef, handler: impl Into<Arg>, next: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::Try {
            body,
            handler: handler.into(),
            next,
        })
    }

    pub fn pop_handler(next: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::PopHandler { next })
    }

    pub fn throw(arg: impl Into<Arg>) -> NodeRef {
        Self::wrap(NodeKind::Throw { arg: arg.into() })
    }

    pub fn delay(arg: impl Into<Arg>, next: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::Delay {
            arg: arg.into(),
            next,
        })
    }

    pub fn now(next: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::Now { next })
    }

    pub fn with_clock(body: NodeRef) -> NodeRef {
        Self::wrap(NodeKind::WithClock { body })
    }

    /// A call whose continuation is `Return`, so closure entry reuses the
    /// caller's frame.
    pub fn is_tail_call(&self) -> bool {
        matches!(&self.kind, NodeKind::Call { next, .. } if matches!(next.kind, NodeKind::Return))
    }
}
