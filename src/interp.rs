//! Node interpreter
//!
//! `process` runs one node for one token. Every arm ends by handing the
//! token somewhere: back to the active queue, into a parking spot (site
//! call, clock, future) or to `kill_token`. Region closes cascade from
//! `kill_token` and from tokens moving between regions.

use crate::clock::ClockId;
use crate::engine::Engine;
use crate::env::Binding;
use crate::error::TokenError;
use crate::group::{Cell, GroupId, Killed, Parked};
use crate::node::{Arg, NodeKind, NodeRef};
use crate::region::RegionId;
use crate::site::{Resumer, Site};
use crate::token::{Dormant, FaultCause, Token};
use crate::value::{Closure, Value};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// What a region does when it closes.
#[derive(Debug)]
pub(crate) enum RegionKind {
    /// Closing ends the run.
    Root,
    /// Right side of a pruning; closing kills the group, and with it any
    /// tokens still waiting on an unbound cell.
    Pruning(GroupId),
    /// Left side of an otherwise; closing with the fallback still present
    /// starts the fallback in the parent region.
    Otherwise { fallback: Option<Dormant> },
    /// Scope of a nested logical clock.
    Clock(ClockId),
}

enum Resolved<T> {
    Ready(T),
    /// Unbound future whose group is still running.
    Blocked(Cell),
    /// Unbound future whose group is gone; the reader halts.
    Dead,
}

impl Engine {
    pub(crate) fn process(&mut self, mut token: Token) {
        if !self.groups.is_alive(token.group) {
            trace!(token = token.id(), "token of a dead group halts");
            self.kill_token(token);
            return;
        }
        let node = token.node.clone();
        if let Some(loc) = &node.location {
            token.location = Some(loc.clone());
        }

        match &node.kind {
            NodeKind::Publish => {
                self.publish(token.result.clone());
                self.kill_token(token);
            }
            NodeKind::Stop => self.kill_token(token),
            NodeKind::Let { arg, next } => {
                let r = self.resolve(&token, arg);
                let Some((mut token, v)) = self.ready(token, r) else {
                    return;
                };
                token.result = v;
                token.node = next.clone();
                self.activate(token);
            }
            NodeKind::Bind { next } => {
                token.env.push(Binding::Value(token.result.clone()));
                token.node = next.clone();
                self.activate(token);
            }
            NodeKind::Unwind { width, next } => match token.env.unwind(*width) {
                Ok(()) => {
                    token.node = next.clone();
                    self.activate(token);
                }
                Err(e) => self.raise(token, e),
            },
            NodeKind::Fork { left, right } => {
                let mut forked = match self.spawn_fork(&token) {
                    Ok(t) => t,
                    Err(e) => return self.raise(token, e),
                };
                token.node = left.clone();
                forked.node = right.clone();
                self.activate(token);
                self.activate(forked);
            }
            NodeKind::Pruning { left, right } => self.pruning(token, left, right),
            NodeKind::Store => self.store(token),
            NodeKind::Otherwise { left, right } => {
                let fallback = token.snapshot(right.clone());
                let Some(r) = self.regions.open(
                    Some(token.region),
                    RegionKind::Otherwise {
                        fallback: Some(fallback),
                    },
                ) else {
                    return self.kill_token(token);
                };
                self.move_region(&mut token, r);
                token.node = left.clone();
                self.activate(token);
            }
            NodeKind::Leave { next } => self.leave(token, next),
            NodeKind::Defs { defs, next } => {
                let captured = token.env.clone();
                for i in 0..defs.len() {
                    token.env.push(Binding::Value(Value::Closure(Closure::new(
                        defs.clone(),
                        i,
                        captured.clone(),
                    ))));
                }
                token.node = next.clone();
                self.activate(token);
            }
            NodeKind::Call { target, args, next } => {
                let r = self.resolve_all(&token, std::iter::once(target).chain(args.iter()));
                let Some((mut token, mut values)) = self.ready(token, r) else {
                    return;
                };
                let target = values.remove(0);
                match target {
                    Value::Closure(c) => {
                        let tail = node.is_tail_call();
                        let limit = self.config.stack_limit;
                        match token.enter_closure(&c, values, next.clone(), tail, limit) {
                            Ok(()) => self.activate(token),
                            Err(e) => self.raise(token, e),
                        }
                    }
                    Value::Site(site) => {
                        token.node = next.clone();
                        token.result = Value::Signal;
                        self.call_site(token, site, values);
                    }
                    other => self.raise(token, TokenError::NotCallable(other)),
                }
            }
            NodeKind::Return => match token.leave_closure() {
                Ok(()) => self.activate(token),
                Err(e) => self.raise(token, e),
            },
            NodeKind::Try {
                body,
                handler,
                next,
            } => {
                let r = self.resolve(&token, handler);
                let Some((mut token, h)) = self.ready(token, r) else {
                    return;
                };
                let h = match h {
                    Value::Closure(c) => c,
                    other => {
                        let e = TokenError::type_mismatch("closure", &other);
                        return self.raise(token, e);
                    }
                };
                token.push_handler(h, next.clone());
                token.node = body.clone();
                self.activate(token);
            }
            NodeKind::PopHandler { next } => match token.pop_handler() {
                Ok(()) => {
                    token.node = next.clone();
                    self.activate(token);
                }
                Err(e) => self.raise(token, e),
            },
            NodeKind::Throw { arg } => {
                let r = self.resolve(&token, arg);
                if let Some((token, v)) = self.ready(token, r) {
                    self.throw(token, v);
                }
            }
            NodeKind::Delay { arg, next } => {
                let r = self.resolve(&token, arg);
                let Some((mut token, v)) = self.ready(token, r) else {
                    return;
                };
                let ticks = match v.as_int() {
                    Some(t) if t >= 0 => t as u64,
                    _ => {
                        let e = TokenError::type_mismatch("non-negative integer", &v);
                        return self.raise(token, e);
                    }
                };
                token.node = next.clone();
                token.result = Value::Signal;
                self.delay(token, ticks);
            }
            NodeKind::Now { next } => {
                let Some(now) = self.clocks.get(token.clock).map(|c| c.now()) else {
                    let e = TokenError::Internal("token on a closed clock".into());
                    return self.raise(token, e);
                };
                token.result = Value::Int(i64::try_from(now).unwrap_or(i64::MAX));
                token.node = next.clone();
                self.activate(token);
            }
            NodeKind::WithClock { body } => {
                let clock = self.clocks.open(Some(token.clock));
                let Some(r) = self.regions.open(Some(token.region), RegionKind::Clock(clock)) else {
                    self.clocks.close(clock);
                    return self.kill_token(token);
                };
                self.move_region(&mut token, r);
                self.switch_clock(&mut token, clock);
                token.node = body.clone();
                self.activate(token);
            }
        }
    }

    fn resolve(&self, token: &Token, arg: &Arg) -> Result<Resolved<Value>, TokenError> {
        let index = match arg {
            Arg::Const(v) => return Ok(Resolved::Ready(v.clone())),
            Arg::Var(i) => *i,
        };
        match token.env.lookup(index) {
            None => Err(TokenError::UnboundVariable(index)),
            Some(Binding::Value(v)) => Ok(Resolved::Ready(v.clone())),
            Some(Binding::Future(cell)) => Ok(match cell.value() {
                Some(v) => Resolved::Ready(v.clone()),
                None if self.groups.is_alive(cell.group()) => Resolved::Blocked(cell.clone()),
                None => Resolved::Dead,
            }),
        }
    }

    fn resolve_all<'a>(
        &self,
        token: &Token,
        args: impl Iterator<Item = &'a Arg>,
    ) -> Result<Resolved<Vec<Value>>, TokenError> {
        let mut out = Vec::new();
        for arg in args {
            match self.resolve(token, arg)? {
                Resolved::Ready(v) => out.push(v),
                Resolved::Blocked(c) => return Ok(Resolved::Blocked(c)),
                Resolved::Dead => return Ok(Resolved::Dead),
            }
        }
        Ok(Resolved::Ready(out))
    }

    /// Hand the token back with its value, or dispose of it: block on the
    /// future, halt it, or raise the lookup error.
    fn ready<T>(
        &mut self,
        token: Token,
        resolved: Result<Resolved<T>, TokenError>,
    ) -> Option<(Token, T)> {
        match resolved {
            Ok(Resolved::Ready(v)) => Some((token, v)),
            Ok(Resolved::Blocked(cell)) => {
                self.block_on(token, cell);
                None
            }
            Ok(Resolved::Dead) => {
                self.kill_token(token);
                None
            }
            Err(e) => {
                self.raise(token, e);
                None
            }
        }
    }

    /// Park the token on an unbound cell. It re-runs its current node when
    /// the cell is bound.
    fn block_on(&mut self, mut token: Token, cell: Cell) {
        self.set_quiescent(&mut token);
        let own = token.group;
        match self.groups.wait(cell.group(), token) {
            Ok(waiter) => {
                self.groups.park(own, Parked::Waiter(cell.group(), waiter));
                trace!(waiter, "token waits on a future");
            }
            Err(token) => self.kill_token(token),
        }
    }

    fn spawn_fork(&mut self, token: &Token) -> Result<Token, TokenError> {
        let limit = self.config.token_limit;
        if limit > 0 && self.live_tokens >= limit {
            return Err(TokenError::TokenLimit { limit });
        }
        let id = self.next_id();
        let forked = token.fork_copy(id);
        if !self.register(&forked) {
            return Err(TokenError::Internal("forked into a closed region".into()));
        }
        Ok(forked)
    }

    fn pruning(&mut self, mut token: Token, left: &NodeRef, right: &NodeRef) {
        let mut forked = match self.spawn_fork(&token) {
            Ok(t) => t,
            Err(e) => return self.raise(token, e),
        };
        let Some((group, cell)) = self.groups.new_pruning(token.group) else {
            self.kill_token(forked);
            return self.kill_token(token);
        };
        let Some(r) = self.regions.open(Some(token.region), RegionKind::Pruning(group)) else {
            self.groups.kill(group);
            self.kill_token(forked);
            return self.kill_token(token);
        };
        self.move_region(&mut forked, r);
        forked.group = group;
        forked.node = right.clone();

        token.env.push(Binding::Future(cell));
        token.node = left.clone();
        self.activate(token);
        self.activate(forked);
    }

    /// First publication of a pruning's right side: bind the cell, wake its
    /// readers and cancel the rest of the right side.
    fn store(&mut self, token: Token) {
        let group = token.group;
        let Some(waiters) = self.groups.bind(group, token.result.clone()) else {
            return self.raise(token, TokenError::Internal("store outside a pruning group".into()));
        };
        debug!(woken = waiters.len(), "future bound");
        for (waiter, mut t) in waiters {
            self.groups.unpark(t.group, &Parked::Waiter(group, waiter));
            self.unset_quiescent(&mut t);
            self.activate(t);
        }
        let killed = self.groups.kill(group);
        self.release(killed);
        self.kill_token(token);
    }

    fn leave(&mut self, mut token: Token, next: &NodeRef) {
        let r = token.region;
        let Some(parent) = self.regions.parent(r) else {
            return self.raise(token, TokenError::Internal("leave from the root region".into()));
        };
        let outer_clock = match self.regions.kind_mut(r) {
            Some(RegionKind::Otherwise { fallback }) => {
                *fallback = None;
                None
            }
            Some(RegionKind::Clock(c)) => Some(*c),
            _ => {
                return self.raise(
                    token,
                    TokenError::Internal("leave outside an otherwise or clock scope".into()),
                )
            }
        };
        if let Some(c) = outer_clock {
            let Some(outer) = self.clocks.get(c).and_then(|k| k.parent()) else {
                return self.raise(token, TokenError::Internal("clock scope without a parent clock".into()));
            };
            self.switch_clock(&mut token, outer);
        }
        self.move_region(&mut token, parent);
        token.node = next.clone();
        self.activate(token);
    }

    fn call_site(&mut self, mut token: Token, site: Arc<dyn Site>, args: Vec<Value>) {
        if site.quiescent_while_pending() {
            self.set_quiescent(&mut token);
        }
        let group = token.group;
        let token_id = token.id();
        let call = self.shared.park_call(token);
        if !self.groups.park(group, Parked::Call(call)) {
            if let Some(t) = self.shared.take_pending(call) {
                self.kill_token(t);
            }
            return;
        }
        trace!(token = token_id, call = call.raw(), site = site.name(), "site call");
        let resumer = Resumer::new(self.shared.clone(), call, site.name(), self.config.clone());
        site.call(args, resumer);
    }

    fn delay(&mut self, mut token: Token, ticks: u64) {
        self.set_quiescent(&mut token);
        let (clock, group) = (token.clock, token.group);
        match self.clocks.add_event(clock, ticks, token) {
            Ok(event) => {
                self.groups.park(group, Parked::Event(clock, event));
                trace!(event, ticks, "token waits on logical clock");
            }
            Err(token) => self.kill_token(token),
        }
    }

    /// Throw a program exception from `token`.
    pub(crate) fn throw(&mut self, mut token: Token, value: Value) {
        token.record_fault(&value, FaultCause::Thrown);
        self.dispatch_exception(token, value);
    }

    /// Handle an error raised by `token`. Catchable errors are thrown as
    /// exception values; the rest are reported and kill the token.
    pub(crate) fn raise(&mut self, mut token: Token, error: TokenError) {
        if error.is_catchable() {
            let value = Value::Error(Arc::new(error.clone()));
            token.record_fault(&value, FaultCause::Runtime(error));
            self.dispatch_exception(token, value);
        } else {
            let report = token.report(error);
            self.report_error(report);
            self.kill_token(token);
        }
    }

    /// Start the innermost handler in a copy of the token taken when it was
    /// installed, then kill the thrower.
    fn dispatch_exception(&mut self, token: Token, value: Value) {
        let Some(frame) = token.top_handler() else {
            let report = token.uncaught_report(&value);
            self.report_error(report);
            return self.kill_token(token);
        };
        let id = self.next_id();
        let mut handler = frame.sibling.revive(id);
        handler.fault = token.fault.clone();
        if self.register(&handler) {
            let resume = handler.node.clone();
            let limit = self.config.stack_limit;
            match handler.enter_closure(&frame.handler, vec![value], resume, false, limit) {
                Ok(()) => self.activate(handler),
                Err(e) => self.raise(handler, e),
            }
        } else {
            trace!(token = id, "handler region already closed");
        }
        self.kill_token(token);
    }

    /// The single place a token dies.
    pub(crate) fn kill_token(&mut self, token: Token) {
        self.live_tokens = self.live_tokens.saturating_sub(1);
        if !token.quiescent {
            self.clocks.set_quiescent(token.clock);
        }
        trace!(token = token.id(), "token died");
        let region = token.region;
        drop(token);
        self.leave_region(region);
    }

    /// Move the token's membership to `to`. Entering first keeps a shared
    /// parent from closing in between.
    fn move_region(&mut self, token: &mut Token, to: RegionId) {
        self.regions.add(to);
        let from = std::mem::replace(&mut token.region, to);
        self.leave_region(from);
    }

    /// Count one inhabitant out of `r` and run the close cascade.
    fn leave_region(&mut self, r: RegionId) {
        let mut next = Some(r);
        while let Some(r) = next {
            let Some(closed) = self.regions.remove(r) else {
                break;
            };
            next = closed.parent;
            self.on_region_closed(closed.kind);
        }
    }

    fn on_region_closed(&mut self, kind: RegionKind) {
        match kind {
            RegionKind::Root => {
                info!("root region closed");
                self.shared.terminate();
            }
            RegionKind::Pruning(group) => {
                let killed = self.groups.kill(group);
                self.release(killed);
            }
            RegionKind::Otherwise { fallback: Some(d) } => {
                let id = self.next_id();
                let token = d.revive(id);
                if self.register(&token) {
                    trace!(token = id, "otherwise fallback starts");
                    self.activate(token);
                }
            }
            RegionKind::Otherwise { fallback: None } => {}
            RegionKind::Clock(c) => {
                if let Some(mut clock) = self.clocks.close(c) {
                    let leftover = clock.drain();
                    if !leftover.is_empty() {
                        self.internal_error("clock scope closed with pending events");
                    }
                    for t in leftover {
                        self.kill_token(t);
                    }
                }
            }
        }
    }

    /// Kill every token parked in the dead groups, plus unbound waiters.
    fn release(&mut self, killed: Vec<Killed<Token>>) {
        for k in killed {
            trace!(group = ?k.id, parked = k.parked.len(), "group killed");
            for p in k.parked {
                let parked = match p {
                    Parked::Call(call) => self.shared.take_pending(call),
                    Parked::Event(clock, event) => self.clocks.remove_event(clock, event),
                    Parked::Waiter(cell_group, waiter) => self.groups.take_waiter(cell_group, waiter),
                };
                if let Some(t) = parked {
                    self.kill_token(t);
                }
            }
            for (waiter, t) in k.waiters {
                self.groups.unpark(t.group, &Parked::Waiter(k.id, waiter));
                self.kill_token(t);
            }
        }
    }

    fn set_quiescent(&mut self, token: &mut Token) {
        if !token.quiescent {
            token.quiescent = true;
            self.clocks.set_quiescent(token.clock);
        }
    }

    fn unset_quiescent(&mut self, token: &mut Token) {
        if token.quiescent {
            token.quiescent = false;
            self.clocks.unset_quiescent(token.clock);
        }
    }

    /// Move the token's activity from its clock to `to`.
    fn switch_clock(&mut self, token: &mut Token, to: ClockId) {
        if !token.quiescent {
            self.clocks.set_quiescent(token.clock);
            self.clocks.unset_quiescent(to);
        }
        token.clock = to;
    }
}
