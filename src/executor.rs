//! Token run queues
//!
//! The thread-safe half of the engine. Runnable tokens wait in the `active`
//! queue; tokens coming back from a site call or a clock wait in the
//! `returned` queue. Both drain in FIFO order, and `active` always drains
//! before a `returned` entry is admitted.
//!
//! A token handed to a site sits in the pending table under its call id
//! until the site answers. Resuming removes it from the table, so a second
//! answer, or an answer for a token the engine has since killed, finds
//! nothing and is dropped.

use crate::engine::EngineEvent;
use crate::error::TokenError;
use crate::token::Token;
use crate::value::Value;
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Identifies one outstanding site call.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CallId(u64);

impl CallId {
    pub fn from_raw(raw: u64) -> Self {
        CallId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// How a parked token comes back.
#[derive(Debug, Clone)]
pub enum Delivery {
    Publish(Value),
    /// The call finished without a value; the token dies silently.
    Halt,
    Throw(Value),
    Fail(TokenError),
}

pub(crate) struct Returned {
    pub(crate) token: Token,
    pub(crate) call: Option<CallId>,
    pub(crate) delivery: Delivery,
}

/// What the engine loop should do next.
pub(crate) enum Work {
    Active(Token),
    Returned(Returned),
    Idle,
    Halted,
}

/// Result of blocking for external activity.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Wake {
    Ready,
    Halted,
    /// Nothing queued, nothing pending and not paused: nobody can wake us.
    Stalled,
}

#[derive(Default)]
struct Queues {
    active: VecDeque<Token>,
    returned: VecDeque<Returned>,
    pending: HashMap<CallId, Token>,
    next_call: u64,
    halted: bool,
    paused: bool,
    stale_resumes: u64,
}

pub(crate) struct Shared {
    queues: Mutex<Queues>,
    wake: Condvar,
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl Shared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(Queues::default()),
            wake: Condvar::new(),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn push_active(&self, token: Token) {
        self.queues.lock().active.push_back(token);
        self.wake.notify_one();
    }

    pub(crate) fn push_returned(&self, entry: Returned) {
        self.queues.lock().returned.push_back(entry);
        self.wake.notify_one();
    }

    /// Park `token` under a fresh call id.
    pub(crate) fn park_call(&self, token: Token) -> CallId {
        let mut q = self.queues.lock();
        let id = CallId(q.next_call);
        q.next_call += 1;
        q.pending.insert(id, token);
        id
    }

    /// Remove a pending token without resuming it.
    pub(crate) fn take_pending(&self, id: CallId) -> Option<Token> {
        self.queues.lock().pending.remove(&id)
    }

    /// Move the token pending on `id` to the returned queue. Returns false
    /// and counts a stale resume if no such call is pending.
    pub(crate) fn resume(&self, id: CallId, delivery: Delivery) -> bool {
        let mut q = self.queues.lock();
        let Some(token) = q.pending.remove(&id) else {
            q.stale_resumes += 1;
            debug!(call = id.0, "dropping resume for a call that is no longer pending");
            return false;
        };
        q.returned.push_back(Returned {
            token,
            call: Some(id),
            delivery,
        });
        drop(q);
        self.wake.notify_one();
        true
    }

    pub(crate) fn next_work(&self) -> Work {
        let mut q = self.queues.lock();
        if q.halted {
            return Work::Halted;
        }
        if q.paused {
            return Work::Idle;
        }
        if let Some(t) = q.active.pop_front() {
            return Work::Active(t);
        }
        match q.returned.pop_front() {
            Some(r) => Work::Returned(r),
            None => Work::Idle,
        }
    }

    /// Block until there is work, the engine halts, or it becomes clear that
    /// nothing can ever arrive. The emptiness check and the wait happen
    /// under one lock so a resume cannot slip in between.
    pub(crate) fn wait_for_work(&self) -> Wake {
        let mut q = self.queues.lock();
        loop {
            if q.halted {
                return Wake::Halted;
            }
            if !q.paused {
                if !q.active.is_empty() || !q.returned.is_empty() {
                    return Wake::Ready;
                }
                if q.pending.is_empty() {
                    return Wake::Stalled;
                }
            }
            self.wake.wait(&mut q);
        }
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.queues.lock().halted
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.queues.lock().paused
    }

    /// Sizes of the active, returned and pending collections.
    pub(crate) fn queue_lens(&self) -> (usize, usize, usize) {
        let q = self.queues.lock();
        (q.active.len(), q.returned.len(), q.pending.len())
    }

    pub(crate) fn pending_calls(&self) -> usize {
        self.queues.lock().pending.len()
    }

    pub(crate) fn stale_resumes(&self) -> u64 {
        self.queues.lock().stale_resumes
    }

    pub(crate) fn terminate(&self) {
        self.queues.lock().halted = true;
        self.wake.notify_all();
    }

    fn set_paused(&self, paused: bool) {
        self.queues.lock().paused = paused;
        self.wake.notify_all();
    }

    pub(crate) fn subscribe(&self, tx: Sender<EngineEvent>) {
        self.subscribers.lock().push(tx);
    }

    /// Send to every subscriber, forgetting the ones that hung up.
    pub(crate) fn emit(&self, event: EngineEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Cloneable, thread-safe control surface of a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) shared: Arc<Shared>,
}

impl EngineHandle {
    /// Queue a runnable token. Tokens only come from the engine, which has
    /// already counted them in their region.
    pub(crate) fn activate(&self, token: Token) {
        self.shared.push_active(token);
    }

    /// Answer the site call `id`. Returns false if the call is no longer
    /// pending (already answered, or its token was killed).
    pub fn resume(&self, id: CallId, delivery: Delivery) -> bool {
        self.shared.resume(id, delivery)
    }

    /// Stop the engine loop.
    pub fn terminate(&self) {
        self.shared.terminate();
    }

    /// Stop processing tokens until [`EngineHandle::unpause`].
    pub fn pause(&self) {
        self.shared.set_paused(true);
    }

    pub fn unpause(&self) {
        self.shared.set_paused(false);
    }

    pub fn is_halted(&self) -> bool {
        self.shared.is_halted()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockTable;
    use crate::group::GroupTable;
    use crate::node::Node;
    use crate::region::RegionTable;

    fn tokens(n: u64) -> Vec<Token> {
        let mut groups: GroupTable<()> = GroupTable::new();
        let mut regions: RegionTable<()> = RegionTable::new();
        let mut clocks: ClockTable<()> = ClockTable::new();
        let g = groups.new_root();
        let r = regions.open(None, ()).unwrap();
        let c = clocks.open(None);
        (0..n).map(|i| Token::new(i, Node::stop(), g, r, c)).collect()
    }

    fn next_id(shared: &Shared) -> Option<(bool, u64)> {
        match shared.next_work() {
            Work::Active(t) => Some((true, t.id())),
            Work::Returned(r) => Some((false, r.token.id())),
            Work::Idle | Work::Halted => None,
        }
    }

    #[test]
    fn active_drains_before_returned() {
        let shared = Shared::new();
        let mut ts = tokens(4).into_iter();
        let call = shared.park_call(ts.next().unwrap());
        assert!(shared.resume(call, Delivery::Halt));
        shared.push_active(ts.next().unwrap());
        shared.push_active(ts.next().unwrap());

        assert_eq!(next_id(&shared), Some((true, 1)));
        assert_eq!(next_id(&shared), Some((true, 2)));
        assert_eq!(next_id(&shared), Some((false, 0)));
        assert_eq!(next_id(&shared), None);
    }

    #[test]
    fn second_resume_is_stale() {
        let shared = Shared::new();
        let call = shared.park_call(tokens(1).pop().unwrap());
        assert!(shared.resume(call, Delivery::Publish(Value::Int(1))));
        assert!(!shared.resume(call, Delivery::Publish(Value::Int(2))));
        assert_eq!(shared.stale_resumes(), 1);
    }

    #[test]
    fn resume_after_take_is_stale() {
        let shared = Shared::new();
        let call = shared.park_call(tokens(1).pop().unwrap());
        assert!(shared.take_pending(call).is_some());
        assert!(!shared.resume(call, Delivery::Halt));
        assert_eq!(shared.stale_resumes(), 1);
        assert_eq!(shared.pending_calls(), 0);
    }

    #[test]
    fn wait_reports_stall_and_halt() {
        let shared = Shared::new();
        assert_eq!(shared.wait_for_work(), Wake::Stalled);
        shared.terminate();
        assert_eq!(shared.wait_for_work(), Wake::Halted);
        assert!(matches!(shared.next_work(), Work::Halted));
    }

    #[test]
    fn pending_call_is_woken_from_another_thread() {
        let shared = Shared::new();
        let call = shared.park_call(tokens(1).pop().unwrap());
        let remote = EngineHandle {
            shared: shared.clone(),
        };
        let t = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            remote.resume(call, Delivery::Publish(Value::Int(7)))
        });
        assert_eq!(shared.wait_for_work(), Wake::Ready);
        assert!(t.join().unwrap());
        match shared.next_work() {
            Work::Returned(r) => {
                assert_eq!(r.call, Some(call));
                assert!(matches!(r.delivery, Delivery::Publish(Value::Int(7))));
            }
            _ => panic!("expected a returned token"),
        }
    }

    #[test]
    fn paused_engine_hands_out_no_work() {
        let shared = Shared::new();
        let handle = EngineHandle {
            shared: shared.clone(),
        };
        handle.pause();
        handle.activate(tokens(1).pop().unwrap());
        assert!(matches!(shared.next_work(), Work::Idle));
        handle.unpause();
        assert!(matches!(shared.next_work(), Work::Active(_)));
    }
}
