//! Tokens
//!
//! A token is one thread of control walking the program graph. It owns its
//! position, environment, continuation stack and handler stack; all of them
//! are persistent so forking a token is a handful of reference-count bumps.
//!
//! Tokens are moved, never shared: whoever holds a `Token` value is the only
//! party allowed to run or kill it. A token that dies is consumed by the
//! engine and cannot come back.

use crate::clock::ClockId;
use crate::env::Env;
use crate::error::{ErrorReport, TokenError};
use crate::group::GroupId;
use crate::node::NodeRef;
use crate::region::RegionId;
use crate::value::{Closure, SourceLocation, Value};
use std::sync::Arc;

/// One continuation frame, pushed by a non-tail closure call.
#[derive(Debug)]
pub(crate) struct Frame {
    /// Where the caller continues after `Return`.
    resume: NodeRef,
    env: Env,
    /// Call site.
    location: Option<SourceLocation>,
    parent: Option<Arc<Frame>>,
    /// Tail calls folded into this frame.
    depth: usize,
    /// Frames on the stack including this one.
    height: usize,
}

/// An installed exception handler.
#[derive(Debug)]
pub(crate) struct HandlerFrame {
    pub(crate) handler: Closure,
    /// The handler token: a copy of the token taken when the handler was
    /// installed, positioned after the `try`.
    pub(crate) sibling: Dormant,
    below: Option<Arc<HandlerFrame>>,
}

/// A token that is not running and is not counted in any region.
#[derive(Debug)]
pub(crate) struct Dormant {
    node: NodeRef,
    env: Env,
    continuation: Option<Arc<Frame>>,
    handlers: Option<Arc<HandlerFrame>>,
    pub(crate) group: GroupId,
    pub(crate) region: RegionId,
    pub(crate) clock: ClockId,
    location: Option<SourceLocation>,
}

impl Dormant {
    /// Turn the snapshot into a live token. The caller registers it.
    pub(crate) fn revive(&self, id: u64) -> Token {
        Token {
            id,
            node: self.node.clone(),
            env: self.env.clone(),
            group: self.group,
            region: self.region,
            clock: self.clock,
            continuation: self.continuation.clone(),
            handlers: self.handlers.clone(),
            result: Value::Signal,
            location: self.location.clone(),
            fault: None,
            quiescent: false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum FaultCause {
    Thrown,
    Runtime(TokenError),
}

/// Where an exception was first thrown.
#[derive(Debug)]
pub(crate) struct Fault {
    cause: FaultCause,
    value: Value,
    location: Option<SourceLocation>,
    backtrace: Vec<SourceLocation>,
}

#[derive(Debug)]
pub struct Token {
    id: u64,
    pub(crate) node: NodeRef,
    pub(crate) env: Env,
    pub(crate) group: GroupId,
    pub(crate) region: RegionId,
    pub(crate) clock: ClockId,
    continuation: Option<Arc<Frame>>,
    handlers: Option<Arc<HandlerFrame>>,
    pub(crate) result: Value,
    pub(crate) location: Option<SourceLocation>,
    pub(crate) fault: Option<Arc<Fault>>,
    /// Not counted as active on its clock.
    pub(crate) quiescent: bool,
}

impl Token {
    pub(crate) fn new(id: u64, node: NodeRef, group: GroupId, region: RegionId, clock: ClockId) -> Self {
        Self {
            id,
            node,
            env: Env::new(),
            group,
            region,
            clock,
            continuation: None,
            handlers: None,
            result: Value::Signal,
            location: None,
            fault: None,
            quiescent: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    /// Number of continuation frames.
    pub fn stack_height(&self) -> usize {
        self.continuation.as_ref().map_or(0, |f| f.height)
    }

    /// Tail calls folded into the top frame.
    pub fn tail_depth(&self) -> usize {
        self.continuation.as_ref().map_or(0, |f| f.depth)
    }

    /// A new token at the same position sharing everything persistent.
    /// Exception origin is per token and is not copied.
    pub(crate) fn fork_copy(&self, id: u64) -> Token {
        Token {
            id,
            node: self.node.clone(),
            env: self.env.clone(),
            group: self.group,
            region: self.region,
            clock: self.clock,
            continuation: self.continuation.clone(),
            handlers: self.handlers.clone(),
            result: self.result.clone(),
            location: self.location.clone(),
            fault: None,
            quiescent: false,
        }
    }

    /// Snapshot this token as if it stood at `node`.
    pub(crate) fn snapshot(&self, node: NodeRef) -> Dormant {
        Dormant {
            node,
            env: self.env.clone(),
            continuation: self.continuation.clone(),
            handlers: self.handlers.clone(),
            group: self.group,
            region: self.region,
            clock: self.clock,
            location: self.location.clone(),
        }
    }

    /// Enter `closure` with `args`. A non-tail call pushes a frame that
    /// returns to `resume`; a tail call reuses the caller's frame and only
    /// bumps its depth counter, so iteration runs in constant stack.
    pub(crate) fn enter_closure(
        &mut self,
        closure: &Closure,
        args: Vec<Value>,
        resume: NodeRef,
        tail: bool,
        stack_limit: usize,
    ) -> Result<(), TokenError> {
        if args.len() != closure.arity() {
            return Err(TokenError::ArityMismatch {
                expected: closure.arity(),
                got: args.len(),
            });
        }
        let top = self.continuation.take();
        self.continuation = match top {
            Some(top) if tail => Some(Arc::new(Frame {
                resume: top.resume.clone(),
                env: top.env.clone(),
                location: top.location.clone(),
                parent: top.parent.clone(),
                depth: top.depth + 1,
                height: top.height,
            })),
            parent => {
                let height = parent.as_ref().map_or(0, |f| f.height) + 1;
                if stack_limit > 0 && height > stack_limit {
                    self.continuation = parent;
                    return Err(TokenError::StackLimit { limit: stack_limit });
                }
                Some(Arc::new(Frame {
                    resume,
                    env: self.env.clone(),
                    location: self.location.clone(),
                    parent,
                    depth: 0,
                    height,
                }))
            }
        };
        self.env = closure.body_env(args);
        self.node = closure.body().clone();
        Ok(())
    }

    /// Return from the current closure to the caller's continuation.
    pub(crate) fn leave_closure(&mut self) -> Result<(), TokenError> {
        let frame = self
            .continuation
            .take()
            .ok_or_else(|| TokenError::Internal("return with an empty continuation stack".into()))?;
        self.node = frame.resume.clone();
        self.env = frame.env.clone();
        self.continuation = frame.parent.clone();
        Ok(())
    }

    /// Install `handler` for the body about to run. On a throw, a copy of
    /// this token continuing at `resume` calls the handler.
    pub(crate) fn push_handler(&mut self, handler: Closure, resume: NodeRef) {
        let below = self.handlers.take();
        let mut sibling = self.snapshot(resume);
        sibling.handlers = below.clone();
        self.handlers = Some(Arc::new(HandlerFrame {
            handler,
            sibling,
            below,
        }));
    }

    pub(crate) fn pop_handler(&mut self) -> Result<(), TokenError> {
        let top = self
            .handlers
            .take()
            .ok_or_else(|| TokenError::Internal("pop of an empty handler stack".into()))?;
        self.handlers = top.below.clone();
        Ok(())
    }

    pub(crate) fn top_handler(&self) -> Option<Arc<HandlerFrame>> {
        self.handlers.clone()
    }

    /// Current location followed by the call site of every frame.
    pub fn backtrace(&self) -> Vec<SourceLocation> {
        let mut out: Vec<SourceLocation> = self.location.iter().cloned().collect();
        let mut frame = self.continuation.as_deref();
        while let Some(f) = frame {
            out.extend(f.location.iter().cloned());
            frame = f.parent.as_deref();
        }
        out
    }

    /// Remember where `value` was thrown. A re-throw of the value already on
    /// record keeps the first location and backtrace.
    pub(crate) fn record_fault(&mut self, value: &Value, cause: FaultCause) {
        if let Some(f) = &self.fault {
            if f.value == *value {
                return;
            }
        }
        self.fault = Some(Arc::new(Fault {
            cause,
            value: value.clone(),
            location: self.location.clone(),
            backtrace: self.backtrace(),
        }));
    }

    /// Report for an error raised at the current position.
    pub(crate) fn report(&self, error: TokenError) -> ErrorReport {
        ErrorReport {
            error,
            location: self.location.clone(),
            backtrace: self.backtrace(),
        }
    }

    /// Report for `value` escaping the last handler, attributed to where it
    /// was first thrown.
    pub(crate) fn uncaught_report(&self, value: &Value) -> ErrorReport {
        match self.fault.as_deref() {
            Some(fault) => ErrorReport {
                error: match &fault.cause {
                    FaultCause::Runtime(e) => e.clone(),
                    FaultCause::Thrown => TokenError::Uncaught(value.clone()),
                },
                location: fault.location.clone(),
                backtrace: fault.backtrace.clone(),
            },
            None => self.report(TokenError::Uncaught(value.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockTable;
    use crate::group::GroupTable;
    use crate::node::{Def, Node};
    use crate::region::RegionTable;

    fn token() -> Token {
        let mut groups: GroupTable<()> = GroupTable::new();
        let mut regions: RegionTable<()> = RegionTable::new();
        let mut clocks: ClockTable<()> = ClockTable::new();
        let g = groups.new_root();
        let r = regions.open(None, ()).unwrap();
        let c = clocks.open(None);
        Token::new(0, Node::publish(), g, r, c)
    }

    fn closure(arity: usize) -> Closure {
        let defs: Arc<[Def]> = Arc::from(vec![Def::new("f", arity, Node::ret())]);
        Closure::new(defs, 0, Env::new())
    }

    fn loc(line: u32) -> SourceLocation {
        SourceLocation::new("t.orc", line, 1)
    }

    #[test]
    fn enter_and_leave_restores_caller() {
        let mut t = token();
        t.env.push(crate::env::Binding::Value(Value::Int(5)));
        let after = Node::stop();
        t.enter_closure(&closure(1), vec![Value::Int(1)], after.clone(), false, 0)
            .unwrap();
        assert_eq!(t.stack_height(), 1);
        assert!(matches!(t.node.kind, crate::node::NodeKind::Return));
        // One definition plus one argument on top of the empty capture.
        assert_eq!(t.env.depth(), 2);

        t.leave_closure().unwrap();
        assert!(Arc::ptr_eq(&t.node, &after));
        assert_eq!(t.env.depth(), 1);
        assert_eq!(t.stack_height(), 0);
        assert!(t.leave_closure().is_err());
    }

    #[test]
    fn tail_calls_run_in_constant_stack() {
        let mut t = token();
        let f = closure(0);
        t.enter_closure(&f, vec![], Node::stop(), false, 2).unwrap();
        for _ in 0..100 {
            t.enter_closure(&f, vec![], Node::ret(), true, 2).unwrap();
        }
        assert_eq!(t.stack_height(), 1);
        assert_eq!(t.tail_depth(), 100);
    }

    #[test]
    fn stack_limit_is_enforced() {
        let mut t = token();
        let f = closure(0);
        t.enter_closure(&f, vec![], Node::stop(), false, 2).unwrap();
        t.enter_closure(&f, vec![], Node::stop(), false, 2).unwrap();
        let err = t
            .enter_closure(&f, vec![], Node::stop(), false, 2)
            .unwrap_err();
        assert!(matches!(err, TokenError::StackLimit { limit: 2 }));
        assert_eq!(t.stack_height(), 2);
    }

    #[test]
    fn arity_is_checked() {
        let mut t = token();
        let err = t
            .enter_closure(&closure(2), vec![Value::Int(1)], Node::stop(), false, 0)
            .unwrap_err();
        assert!(matches!(err, TokenError::ArityMismatch { expected: 2, got: 1 }));
    }

    #[test]
    fn backtrace_lists_call_sites_innermost_first() {
        let mut t = token();
        let f = closure(0);
        t.location = Some(loc(1));
        t.enter_closure(&f, vec![], Node::stop(), false, 0).unwrap();
        t.location = Some(loc(2));
        t.enter_closure(&f, vec![], Node::stop(), false, 0).unwrap();
        t.location = Some(loc(3));
        assert_eq!(t.backtrace(), vec![loc(3), loc(2), loc(1)]);
    }

    #[test]
    fn rethrow_keeps_first_location() {
        let mut t = token();
        t.location = Some(loc(10));
        t.record_fault(&Value::str("e"), FaultCause::Thrown);
        t.location = Some(loc(20));
        t.record_fault(&Value::str("e"), FaultCause::Thrown);
        let report = t.uncaught_report(&Value::str("e"));
        assert_eq!(report.location, Some(loc(10)));

        t.record_fault(&Value::str("other"), FaultCause::Thrown);
        let report = t.uncaught_report(&Value::str("other"));
        assert_eq!(report.location, Some(loc(20)));
    }

    #[test]
    fn handler_stack_push_pop() {
        let mut t = token();
        t.push_handler(closure(1), Node::stop());
        t.push_handler(closure(1), Node::publish());
        let top = t.top_handler().unwrap();
        assert!(matches!(top.sibling.node.kind, crate::node::NodeKind::Publish));
        t.pop_handler().unwrap();
        let top = t.top_handler().unwrap();
        assert!(matches!(top.sibling.node.kind, crate::node::NodeKind::Stop));
        t.pop_handler().unwrap();
        assert!(t.pop_handler().is_err());
    }
}
