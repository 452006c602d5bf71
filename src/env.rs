//! Persistent token environment
//!
//! A singly linked stack of bindings shared between forked tokens. Pushing
//! allocates one link; popping only moves the head. Variables are de Bruijn
//! indices counted from the most recent binding.

use crate::error::TokenError;
use crate::group::Cell;
use crate::value::Value;
use std::sync::Arc;

/// What a variable refers to.
#[derive(Clone, Debug)]
pub enum Binding {
    Value(Value),
    /// The cell of a pruning group, bound once its right side publishes.
    Future(Cell),
}

struct Link {
    binding: Binding,
    next: Option<Arc<Link>>,
}

#[derive(Clone, Default)]
pub struct Env {
    head: Option<Arc<Link>>,
    depth: usize,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn push(&mut self, binding: Binding) {
        let next = self.head.take();
        self.head = Some(Arc::new(Link { binding, next }));
        self.depth += 1;
    }

    /// Drop the `width` most recent bindings.
    pub fn unwind(&mut self, width: usize) -> Result<(), TokenError> {
        if width > self.depth {
            return Err(TokenError::Internal(format!(
                "unwind of {width} bindings from an environment of depth {}",
                self.depth
            )));
        }
        for _ in 0..width {
            self.head = self.head.as_ref().and_then(|link| link.next.clone());
        }
        self.depth -= width;
        Ok(())
    }

    pub fn lookup(&self, index: usize) -> Option<&Binding> {
        let mut link = self.head.as_deref()?;
        for _ in 0..index {
            link = link.next.as_deref()?;
        }
        Some(&link.binding)
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Env(depth={})", self.depth)
    }
}

// Long chains would otherwise drop recursively.
impl Drop for Env {
    fn drop(&mut self) {
        let mut head = self.head.take();
        while let Some(link) = head {
            match Arc::try_unwrap(link) {
                Ok(mut link) => head = link.next.take(),
                Err(_) => break,
            }
        }
    }
}
