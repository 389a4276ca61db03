//! Session registry.
//!
//! Tracks every live session of one worker as a doubly-linked list threaded
//! through an arena of slots. Links are slot indices rather than pointers, and
//! each slot carries a generation so a [`SessionId`] from a removed session can
//! never unlink whatever later reuses its slot.
//!
//! Insertion is always at the head and removal unlinks in place, both O(1).
//! Traversal from the head therefore visits sessions newest first.
//!
//! The registry is owned by the worker and only touched from the worker's own
//! tasks, which all run on one `LocalSet`. It needs no locking: the worker
//! keeps it in a `RefCell` and never holds the borrow across an await point.

use std::{cell::Cell, fmt, rc::Rc};

use crate::wake::WakeSignal;

/// Stable identity of a registered session.
///
/// Ids are never reused: removing a session retires its id for good, even
/// when the underlying slot is handed to a later session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    index: u32,
    generation: u32,
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// The part of a session the worker can see.
pub(crate) struct Entry {
    prev: Option<u32>,
    next: Option<u32>,
    /// Shared with the session's context. The reaper decrements it, the
    /// session resets it when it sees activity.
    liveness: Rc<Cell<i32>>,
    /// Wakes the session's own task.
    wake: WakeSignal,
}

impl Entry {
    pub(crate) fn liveness(&self) -> i32 {
        self.liveness.get()
    }
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Arena-backed intrusive list of live sessions.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    len: usize,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a session at the head of the list.
    ///
    /// Returns the new id and the liveness cell to hand to the session.
    pub(crate) fn insert(&mut self, liveness: i32, wake: WakeSignal) -> (SessionId, Rc<Cell<i32>>) {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot { generation: 0, entry: None });
                (self.slots.len() - 1) as u32
            },
        };

        let cell = Rc::new(Cell::new(liveness));
        let old_head = self.head;

        let slot = &mut self.slots[index as usize];
        slot.entry = Some(Entry { prev: None, next: old_head, liveness: Rc::clone(&cell), wake });
        let id = SessionId { index, generation: slot.generation };

        if let Some(entry) = old_head.and_then(|head| self.entry_mut(head)) {
            entry.prev = Some(index);
        }

        self.head = Some(index);
        self.len += 1;

        (id, cell)
    }

    /// Unlink a session.
    ///
    /// Returns `false` if the id is not (or no longer) registered, so a second
    /// removal of the same session is a no-op.
    pub(crate) fn remove(&mut self, id: SessionId) -> bool {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return false;
        };

        if slot.generation != id.generation {
            return false;
        }

        let Some(entry) = slot.entry.take() else {
            return false;
        };

        // A slot whose generation is exhausted is retired rather than wrapped,
        // so no id can ever match twice.
        if let Some(generation) = slot.generation.checked_add(1) {
            slot.generation = generation;
            self.free.push(id.index);
        }

        match entry.prev {
            Some(prev) => {
                if let Some(prev) = self.entry_mut(prev) {
                    prev.next = entry.next;
                }
            },
            None => self.head = entry.next,
        }

        if let Some(next) = entry.next.and_then(|next| self.entry_mut(next)) {
            next.prev = entry.prev;
        }

        self.len -= 1;
        true
    }

    pub(crate) fn get(&self, id: SessionId) -> Option<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub(crate) fn contains(&self, id: SessionId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Walk the list from the head.
    pub(crate) fn iter(&self) -> Iter<'_> {
        Iter { registry: self, cursor: self.head }
    }

    /// One reaper tick: take a point of liveness from every session and wake
    /// those that reached zero.
    ///
    /// Sessions that still have liveness left are not woken.
    pub(crate) fn decay_liveness(&self) -> Vec<SessionId> {
        let mut expired = Vec::new();

        for (id, entry) in self.iter() {
            let liveness = entry.liveness.get().saturating_sub(1);
            entry.liveness.set(liveness);

            if liveness <= 0 {
                entry.wake.wake();
                expired.push(id);
            }
        }

        expired
    }

    /// Zero every session's liveness and wake it. Returns how many were woken.
    pub(crate) fn expire_all(&self) -> usize {
        let mut woken = 0;

        for (_, entry) in self.iter() {
            entry.liveness.set(0);
            entry.wake.wake();
            woken += 1;
        }

        woken
    }

    fn entry_mut(&mut self, index: u32) -> Option<&mut Entry> {
        self.slots.get_mut(index as usize).and_then(|slot| slot.entry.as_mut())
    }

    /// Verify the list structure: head has no predecessor, links agree in both
    /// directions, no cycles, and every occupied slot is reachable.
    #[cfg(test)]
    pub(crate) fn check_links(&self) -> Result<(), String> {
        let mut prev = None;
        let mut cursor = self.head;
        let mut seen = vec![false; self.slots.len()];
        let mut count = 0;

        while let Some(index) = cursor {
            let entry = self
                .slots
                .get(index as usize)
                .and_then(|slot| slot.entry.as_ref())
                .ok_or(format!("link to empty slot {index}"))?;

            if seen[index as usize] {
                return Err(format!("cycle through slot {index}"));
            }
            seen[index as usize] = true;

            if entry.prev != prev {
                return Err(format!("slot {index} has prev {:?}, expected {prev:?}", entry.prev));
            }

            prev = Some(index);
            cursor = entry.next;
            count += 1;
        }

        let occupied = self.slots.iter().filter(|slot| slot.entry.is_some()).count();
        if count != self.len || occupied != self.len {
            return Err(format!("walked {count}, occupied {occupied}, len {}", self.len));
        }

        Ok(())
    }
}

/// Iterator over registered sessions, newest first.
pub(crate) struct Iter<'a> {
    registry: &'a SessionRegistry,
    cursor: Option<u32>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (SessionId, &'a Entry);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let slot = self.registry.slots.get(index as usize)?;
        let entry = slot.entry.as_ref()?;

        self.cursor = entry.next;
        Some((SessionId { index, generation: slot.generation }, entry))
    }
}
