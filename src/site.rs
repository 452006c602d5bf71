//! Sites
//!
//! A site is anything outside the engine a token can call. The engine hands
//! the site its arguments and a [`Resumer`]; the site answers exactly once,
//! from any thread, whenever it is ready. Site code never touches tokens or
//! engine tables directly.

use crate::config::EngineConfig;
use crate::engine::EngineEvent;
use crate::error::TokenError;
use crate::executor::{CallId, Delivery, Shared};
use crate::value::Value;
use spin_sleep::SpinSleeper;
use std::sync::Arc;
use std::time::Duration;

pub trait Site: Send + Sync {
    fn name(&self) -> &str;

    /// Start the call. The answer may be given before this returns or later
    /// from another thread.
    fn call(&self, args: Vec<Value>, resumer: Resumer);

    /// Whether a token waiting on this site lets logical clocks advance.
    fn quiescent_while_pending(&self) -> bool {
        false
    }
}

/// One-shot answer channel for a site call.
///
/// Every answering method consumes the resumer. Dropping it unanswered
/// halts the calling token.
pub struct Resumer {
    shared: Arc<Shared>,
    call: CallId,
    site: Arc<str>,
    config: Arc<EngineConfig>,
    answered: bool,
}

impl Resumer {
    pub(crate) fn new(shared: Arc<Shared>, call: CallId, site: &str, config: Arc<EngineConfig>) -> Self {
        Self {
            shared,
            call,
            site: Arc::from(site),
            config,
            answered: false,
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call
    }

    fn deliver(&mut self, delivery: Delivery) {
        self.answered = true;
        self.shared.resume(self.call, delivery);
    }

    /// Resume the token with a value.
    pub fn publish(mut self, value: Value) {
        self.deliver(Delivery::Publish(value));
    }

    /// Finish without a value.
    pub fn halt(mut self) {
        self.deliver(Delivery::Halt);
    }

    /// Raise a catchable exception in the caller.
    pub fn throw(mut self, value: Value) {
        self.deliver(Delivery::Throw(value));
    }

    /// Report an error. Catchable errors become exceptions; anything else is
    /// reported and kills the token.
    pub fn fail(mut self, error: TokenError) {
        self.deliver(Delivery::Fail(error));
    }

    /// Write a line to the engine's print channel.
    pub fn print(&self, text: impl Into<String>) {
        self.shared.emit(EngineEvent::Print(text.into()));
    }

    pub fn require_capability(&self, name: &str) -> Result<(), TokenError> {
        if self.config.capability(name) {
            Ok(())
        } else {
            Err(TokenError::Capability(name.to_string()))
        }
    }

    /// Name of the site being called, for error messages.
    pub fn site_name(&self) -> &str {
        &self.site
    }
}

impl Drop for Resumer {
    fn drop(&mut self) {
        if !self.answered {
            self.deliver(Delivery::Halt);
        }
    }
}

/// A synchronous site backed by a closure.
pub struct FnSite<F> {
    name: String,
    f: F,
}

impl<F> Site for FnSite<F>
where
    F: Fn(Vec<Value>) -> Result<Value, TokenError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: Vec<Value>, resumer: Resumer) {
        match (self.f)(args) {
            Ok(v) => resumer.publish(v),
            Err(e) => resumer.fail(e),
        }
    }
}

pub fn from_fn<F>(name: &str, f: F) -> FnSite<F>
where
    F: Fn(Vec<Value>) -> Result<Value, TokenError> + Send + Sync,
{
    FnSite {
        name: name.to_string(),
        f,
    }
}

fn int_arg(site: &str, args: &[Value], index: usize) -> Result<i64, TokenError> {
    match args.get(index) {
        Some(v) => v.as_int().ok_or_else(|| TokenError::type_mismatch("integer", v)),
        None => Err(TokenError::site(site, format!("missing argument {index}"))),
    }
}

/// Real-time timer: publishes a signal after the given number of
/// milliseconds, measured on a background thread.
#[derive(Default)]
pub struct Rtimer {
    sleeper: SpinSleeper,
}

impl Site for Rtimer {
    fn name(&self) -> &str {
        "Rtimer"
    }

    fn call(&self, args: Vec<Value>, resumer: Resumer) {
        let ms = match int_arg(self.name(), &args, 0) {
            Ok(ms) if ms >= 0 => ms as u64,
            Ok(ms) => {
                resumer.fail(TokenError::site(self.name(), format!("negative delay {ms}")));
                return;
            }
            Err(e) => {
                resumer.fail(e);
                return;
            }
        };
        let sleeper = self.sleeper;
        std::thread::spawn(move || {
            sleeper.sleep(Duration::from_millis(ms));
            resumer.publish(Value::Signal);
        });
    }
}

/// Writes its arguments to the print channel and publishes a signal.
/// Requires the `print` capability.
pub struct Println;

impl Site for Println {
    fn name(&self) -> &str {
        "Println"
    }

    fn call(&self, args: Vec<Value>, resumer: Resumer) {
        if let Err(e) = resumer.require_capability("print") {
            resumer.fail(e);
            return;
        }
        let line = args
            .iter()
            .map(|v| match v {
                Value::Str(s) => s.to_string(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        resumer.print(line);
        resumer.publish(Value::Signal);
    }
}
