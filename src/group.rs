//! Group forest
//!
//! Groups are the unit of cancellation. Killing a group kills its whole
//! subtree at once; tokens check their group before every step and die
//! lazily if it is gone. Tokens that are parked somewhere (a pending site
//! call, a clock event, a future) are recorded on their group so the engine
//! can kill them eagerly instead.
//!
//! A pruning group also owns a [`Cell`]: the future that the left side of
//! the pruning reads and the first publication of the right side binds.

use crate::arena::{Arena, ArenaIndex};
use crate::clock::ClockId;
use crate::executor::CallId;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct GroupId(ArenaIndex);

/// Where a blocked token is waiting.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Parked {
    Call(CallId),
    /// Event id on a logical clock.
    Event(ClockId, u64),
    /// Waiter id on the cell of a pruning group.
    Waiter(GroupId, u64),
}

struct CellInner {
    group: GroupId,
    value: OnceLock<Value>,
}

/// Write-once future owned by a pruning group.
#[derive(Clone)]
pub struct Cell(Arc<CellInner>);

impl Cell {
    fn new(group: GroupId) -> Self {
        Cell(Arc::new(CellInner {
            group,
            value: OnceLock::new(),
        }))
    }

    pub fn group(&self) -> GroupId {
        self.0.group
    }

    pub fn value(&self) -> Option<&Value> {
        self.0.value.get()
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(v) => write!(f, "Cell({v})"),
            None => write!(f, "Cell(<unbound>)"),
        }
    }
}

struct Record<W> {
    parent: Option<GroupId>,
    children: Vec<GroupId>,
    parked: BTreeSet<Parked>,
    cell: Option<Cell>,
    waiters: BTreeMap<u64, W>,
}

/// Everything released when one group died.
pub struct Killed<W> {
    pub id: GroupId,
    pub parked: Vec<Parked>,
    /// Tokens still waiting on this group's cell, with their waiter ids.
    pub waiters: Vec<(u64, W)>,
}

pub struct GroupTable<W> {
    groups: Arena<Record<W>>,
    next_waiter: u64,
}

impl<W> Default for GroupTable<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> GroupTable<W> {
    pub fn new() -> Self {
        Self {
            groups: Arena::new(),
            next_waiter: 0,
        }
    }

    fn insert(&mut self, parent: Option<GroupId>) -> GroupId {
        GroupId(self.groups.insert(Record {
            parent,
            children: Vec::new(),
            parked: BTreeSet::new(),
            cell: None,
            waiters: BTreeMap::new(),
        }))
    }

    pub fn new_root(&mut self) -> GroupId {
        self.insert(None)
    }

    /// Create a child group. A dead parent gets no children.
    pub fn new_child(&mut self, parent: GroupId) -> Option<GroupId> {
        if !self.is_alive(parent) {
            return None;
        }
        let id = self.insert(Some(parent));
        self.groups.get_mut(parent.0)?.children.push(id);
        Some(id)
    }

    /// Create a child group that owns a fresh cell.
    pub fn new_pruning(&mut self, parent: GroupId) -> Option<(GroupId, Cell)> {
        let id = self.new_child(parent)?;
        let cell = Cell::new(id);
        self.groups.get_mut(id.0)?.cell = Some(cell.clone());
        Some((id, cell))
    }

    pub fn is_alive(&self, g: GroupId) -> bool {
        self.groups.contains(g.0)
    }

    pub fn parent(&self, g: GroupId) -> Option<GroupId> {
        self.groups.get(g.0).and_then(|rec| rec.parent)
    }

    pub fn cell(&self, g: GroupId) -> Option<Cell> {
        self.groups.get(g.0).and_then(|rec| rec.cell.clone())
    }

    /// Record that a token of `g` is parked. Fails if `g` is dead.
    pub fn park(&mut self, g: GroupId, p: Parked) -> bool {
        match self.groups.get_mut(g.0) {
            Some(rec) => rec.parked.insert(p),
            None => false,
        }
    }

    pub fn unpark(&mut self, g: GroupId, p: &Parked) -> bool {
        self.groups
            .get_mut(g.0)
            .map(|rec| rec.parked.remove(p))
            .unwrap_or(false)
    }

    /// Queue `waiter` on the cell of `cell_group`. The waiter is handed back
    /// if the group is dead.
    pub fn wait(&mut self, cell_group: GroupId, waiter: W) -> Result<u64, W> {
        let Some(rec) = self.groups.get_mut(cell_group.0) else {
            return Err(waiter);
        };
        let id = self.next_waiter;
        self.next_waiter += 1;
        rec.waiters.insert(id, waiter);
        Ok(id)
    }

    pub fn take_waiter(&mut self, cell_group: GroupId, id: u64) -> Option<W> {
        self.groups.get_mut(cell_group.0)?.waiters.remove(&id)
    }

    /// Bind the cell of `g` and return its waiters in arrival order.
    /// Returns `None` if `g` is dead, has no cell or is already bound.
    pub fn bind(&mut self, g: GroupId, value: Value) -> Option<Vec<(u64, W)>> {
        let rec = self.groups.get_mut(g.0)?;
        let cell = rec.cell.as_ref()?;
        cell.0.value.set(value).ok()?;
        Some(std::mem::take(&mut rec.waiters).into_iter().collect())
    }

    /// Kill `g` and its whole subtree, parents before children. Killing a
    /// dead group returns nothing.
    pub fn kill(&mut self, g: GroupId) -> Vec<Killed<W>> {
        let Some(parent) = self.groups.get(g.0).map(|rec| rec.parent) else {
            return Vec::new();
        };
        if let Some(p) = parent.and_then(|p| self.groups.get_mut(p.0)) {
            p.children.retain(|c| *c != g);
        }

        let mut out = Vec::new();
        let mut stack = vec![g];
        while let Some(id) = stack.pop() {
            let Some(rec) = self.groups.remove(id.0) else {
                continue;
            };
            stack.extend(rec.children.iter().rev().copied());
            out.push(Killed {
                id,
                parked: rec.parked.into_iter().collect(),
                waiters: rec.waiters.into_iter().collect(),
            });
        }
        out
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_is_recursive_and_idempotent() {
        let mut t: GroupTable<()> = GroupTable::new();
        let root = t.new_root();
        let a = t.new_child(root).unwrap();
        let b = t.new_child(a).unwrap();
        let c = t.new_child(root).unwrap();

        let killed: Vec<GroupId> = t.kill(a).into_iter().map(|k| k.id).collect();
        assert_eq!(killed, vec![a, b]);
        assert!(!t.is_alive(a));
        assert!(!t.is_alive(b));
        assert!(t.is_alive(c));
        assert!(t.kill(a).is_empty());
        assert!(t.kill(b).is_empty());
    }

    #[test]
    fn dead_group_gets_no_children() {
        let mut t: GroupTable<()> = GroupTable::new();
        let root = t.new_root();
        let a = t.new_child(root).unwrap();
        t.kill(a);
        assert!(t.new_child(a).is_none());
        assert!(t.new_pruning(a).is_none());
        // A fresh group in the reused slot is not the dead one.
        let d = t.new_child(root).unwrap();
        assert_ne!(d, a);
        assert!(!t.is_alive(a));
    }

    #[test]
    fn kill_releases_parked_and_waiters() {
        let mut t: GroupTable<&str> = GroupTable::new();
        let root = t.new_root();
        let (p, cell) = t.new_pruning(root).unwrap();
        assert_eq!(cell.group(), p);
        let inner = t.new_child(p).unwrap();
        assert!(t.park(inner, Parked::Call(CallId::from_raw(4))));

        t.wait(p, "w1").unwrap();
        t.wait(p, "w2").unwrap();
        let killed = t.kill(p);
        assert_eq!(killed.len(), 2);
        let waiters: Vec<&str> = killed[0].waiters.iter().map(|(_, w)| *w).collect();
        assert_eq!(waiters, vec!["w1", "w2"]);
        assert_eq!(killed[1].parked, vec![Parked::Call(CallId::from_raw(4))]);
        assert_eq!(t.wait(p, "late"), Err("late"));
    }

    #[test]
    fn bind_once_wakes_waiters_in_order() {
        let mut t: GroupTable<u32> = GroupTable::new();
        let root = t.new_root();
        let (p, cell) = t.new_pruning(root).unwrap();
        let first = t.wait(p, 1).unwrap();
        t.wait(p, 2).unwrap();
        assert_eq!(t.take_waiter(p, first), Some(1));
        t.wait(p, 3).unwrap();

        let woken: Vec<u32> = t.bind(p, Value::Int(9)).unwrap().into_iter().map(|(_, w)| w).collect();
        assert_eq!(woken, vec![2, 3]);
        assert_eq!(cell.value(), Some(&Value::Int(9)));
        assert!(t.bind(p, Value::Int(10)).is_none());
        assert_eq!(cell.value(), Some(&Value::Int(9)));
        assert!(t.bind(root, Value::Int(1)).is_none());
    }
}
