//! Engine - the token scheduling loop
//!
//! The engine owns every group, region and logical clock and runs on one
//! thread. Each step takes one unit of work:
//! - the next active token, which executes exactly one node
//! - otherwise one returned token, which starts a new round
//! - otherwise one tick of every quiescent logical clock
//!
//! When none of those is possible the loop blocks until a site answers, the
//! engine is unpaused or someone terminates it. The run ends when the root
//! region closes.

use crate::clock::ClockTable;
use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorReport, TokenError};
use crate::executor::{Delivery, EngineHandle, Returned, Shared, Wake, Work};
use crate::group::{GroupTable, Parked};
use crate::interp::RegionKind;
use crate::node::NodeRef;
use crate::region::RegionTable;
use crate::token::Token;
use crate::value::Value;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Observable output of a running engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A top-level publication.
    Published(Value),
    /// A token failed; the report carries the first throw location.
    Error(ErrorReport),
    /// Text written by a site.
    Print(String),
}

/// Outcome of a single [`Engine::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Progress,
    /// Nothing runnable right now.
    Idle,
    Halted,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub publications: Vec<Value>,
    pub errors: Vec<ErrorReport>,
    /// Returned tokens admitted, one per round.
    pub rounds: u64,
    /// Site answers that arrived for calls no longer pending.
    pub stale_resumes: u64,
}

pub struct Engine {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) groups: GroupTable<Token>,
    pub(crate) regions: RegionTable<RegionKind>,
    pub(crate) clocks: ClockTable<Token>,
    /// Held for the whole run so site literals outlive their pending calls.
    root: Option<NodeRef>,
    next_token: u64,
    pub(crate) live_tokens: usize,
    rounds: u64,
    publications: Vec<Value>,
    errors: Vec<ErrorReport>,
    fatal: Option<ErrorReport>,
    started: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            shared: Shared::new(),
            groups: GroupTable::new(),
            regions: RegionTable::new(),
            clocks: ClockTable::new(),
            root: None,
            next_token: 0,
            live_tokens: 0,
            rounds: 0,
            publications: Vec::new(),
            errors: Vec::new(),
            fatal: None,
            started: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: self.shared.clone(),
        }
    }

    /// Receive publications, error reports and prints as they happen.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.shared.subscribe(tx);
        rx
    }

    /// Run `root` to completion.
    pub fn run(&mut self, root: NodeRef) -> Result<RunSummary, EngineError> {
        self.start(root)?;
        self.drive()
    }

    /// Step until the engine halts. Blocks while site calls are pending.
    pub fn drive(&mut self) -> Result<RunSummary, EngineError> {
        loop {
            match self.step() {
                Step::Progress => continue,
                Step::Halted => break,
                Step::Idle => match self.shared.wait_for_work() {
                    Wake::Ready => continue,
                    Wake::Halted => break,
                    Wake::Stalled => {
                        error!(live_tokens = self.live_tokens, "engine stalled");
                        self.shared.terminate();
                        return Err(EngineError::Stalled {
                            live_tokens: self.live_tokens,
                        });
                    }
                },
            }
        }
        if let Some(report) = self.fatal.take() {
            return Err(EngineError::Fatal(Box::new(report)));
        }
        info!(
            publications = self.publications.len(),
            errors = self.errors.len(),
            rounds = self.rounds,
            "engine finished"
        );
        Ok(self.summary())
    }

    /// Set up the root group, clock and region and activate the first token.
    pub fn start(&mut self, root: NodeRef) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::AlreadyStarted);
        }
        self.started = true;
        let group = self.groups.new_root();
        let clock = self.clocks.open(None);
        let region = self
            .regions
            .open(None, RegionKind::Root)
            .ok_or_else(|| EngineError::Internal("root region did not open".into()))?;
        let token = Token::new(self.next_id(), root.clone(), group, region, clock);
        self.root = Some(root);
        if !self.register(&token) {
            return Err(EngineError::Internal("root token was not admitted".into()));
        }
        self.activate(token);
        Ok(())
    }

    /// Perform one unit of work.
    pub fn step(&mut self) -> Step {
        match self.shared.next_work() {
            Work::Halted => Step::Halted,
            Work::Active(token) => {
                self.process(token);
                Step::Progress
            }
            Work::Returned(entry) => {
                self.admit(entry);
                Step::Progress
            }
            Work::Idle => {
                if self.shared.is_paused() {
                    return Step::Idle;
                }
                if self.advance_clocks() {
                    Step::Progress
                } else {
                    Step::Idle
                }
            }
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            publications: self.publications.clone(),
            errors: self.errors.clone(),
            rounds: self.rounds,
            stale_resumes: self.shared.stale_resumes(),
        }
    }

    /// The program passed to [`Engine::start`].
    pub fn root(&self) -> Option<&NodeRef> {
        self.root.as_ref()
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn live_tokens(&self) -> usize {
        self.live_tokens
    }

    pub fn open_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn live_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn pending_calls(&self) -> usize {
        self.shared.pending_calls()
    }

    pub fn stale_resumes(&self) -> u64 {
        self.shared.stale_resumes()
    }

    pub fn terminate(&self) {
        self.shared.terminate();
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_token;
        self.next_token += 1;
        id
    }

    pub(crate) fn activate(&self, token: Token) {
        self.shared.push_active(token);
    }

    /// Count a new or revived token in its region and on its clock.
    /// Returns false if the region has already closed.
    pub(crate) fn register(&mut self, token: &Token) -> bool {
        if !self.regions.add(token.region) {
            return false;
        }
        self.live_tokens += 1;
        self.clocks.unset_quiescent(token.clock);
        true
    }

    /// Admit a returned token. Each admission is a new round.
    fn admit(&mut self, entry: Returned) {
        self.rounds += 1;
        let (active, returned, pending) = self.shared.queue_lens();
        debug!(round = self.rounds, active, returned, pending, "round");

        let Returned {
            mut token,
            call,
            delivery,
        } = entry;
        if let Some(call) = call {
            self.groups.unpark(token.group, &Parked::Call(call));
        }
        if token.quiescent {
            token.quiescent = false;
            self.clocks.unset_quiescent(token.clock);
        }
        if !self.groups.is_alive(token.group) {
            trace!(token = token.id(), "returned token belongs to a dead group");
            self.kill_token(token);
            return;
        }
        match delivery {
            Delivery::Publish(v) => {
                token.result = v;
                self.activate(token);
            }
            Delivery::Halt => self.kill_token(token),
            Delivery::Throw(v) => self.throw(token, v),
            Delivery::Fail(e) => self.raise(token, e),
        }
    }

    /// Tick every quiescent clock once. Fired tokens go through the
    /// returned queue like any other resumed token.
    fn advance_clocks(&mut self) -> bool {
        let mut fired = Vec::new();
        let progressed = self
            .clocks
            .advance_all(|clock, event, token| fired.push((clock, event, token)));
        for (clock, event, mut token) in fired {
            self.groups.unpark(token.group, &Parked::Event(clock, event));
            if token.quiescent {
                token.quiescent = false;
                self.clocks.unset_quiescent(token.clock);
            }
            self.shared.push_returned(Returned {
                token,
                call: None,
                delivery: Delivery::Publish(Value::Signal),
            });
        }
        if progressed {
            trace!("logical clocks advanced");
        }
        progressed
    }

    pub(crate) fn publish(&mut self, value: Value) {
        debug!(value = %value, "publication");
        self.publications.push(value.clone());
        self.shared.emit(EngineEvent::Published(value));
        let max = self.config.max_publications;
        if max > 0 && self.publications.len() >= max {
            info!(max, "publication limit reached");
            self.shared.terminate();
        }
    }

    pub(crate) fn report_error(&mut self, report: ErrorReport) {
        if report.error.is_fatal() {
            error!(code = report.error.code(), "{report}");
            self.fatal.get_or_insert_with(|| report.clone());
            self.shared.terminate();
        } else {
            warn!(code = report.error.code(), "{report}");
        }
        self.errors.push(report.clone());
        self.shared.emit(EngineEvent::Error(report));
    }

    /// Internal failures that are not attributable to a token position.
    pub(crate) fn internal_error(&mut self, message: &str) {
        self.report_error(ErrorReport {
            error: TokenError::Internal(message.to_string()),
            location: None,
            backtrace: Vec::new(),
        });
    }
}
