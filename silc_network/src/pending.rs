//! Correlation of command replies with the protocol flows waiting on them

use crate::wire::Command;
use std::collections::HashMap;

struct Registration<C> {
    continuations: Vec<C>,
    deadline: Option<i64>,
}

/// Suspended continuations keyed by the reply they wait for. Each
/// `(command, ident)` pair is delivered at most once: [`take`](Self::take)
/// and [`expire`](Self::expire) both clear what they return.
pub struct PendingCommands<C> {
    registrations: HashMap<(Command, u16), Registration<C>>,
}

impl<C: PartialEq> PendingCommands<C> {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Register `continuation` to run when the reply to `(command, ident)`
    /// arrives, or with no reply once `deadline` passes. Returns false if an
    /// identical continuation is already waiting on the same reply.
    pub fn register(&mut self, command: Command, ident: u16, continuation: C, deadline: Option<i64>) -> bool {
        let registration = self
            .registrations
            .entry((command, ident))
            .or_insert_with(|| Registration {
                continuations: Vec::new(),
                deadline,
            });

        if registration.continuations.contains(&continuation) {
            return false;
        }

        registration.continuations.push(continuation);
        registration.deadline = match (registration.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        true
    }

    pub fn check(&self, command: Command, ident: u16) -> bool {
        self.registrations.contains_key(&(command, ident))
    }

    /// Remove and return everything waiting on `(command, ident)`
    pub fn take(&mut self, command: Command, ident: u16) -> Vec<C> {
        self.registrations
            .remove(&(command, ident))
            .map(|r| r.continuations)
            .unwrap_or_default()
    }

    /// Remove and return every continuation whose deadline is at or before `now`
    pub fn expire(&mut self, now: i64) -> Vec<(Command, u16, C)> {
        let expired: Vec<(Command, u16)> = self
            .registrations
            .iter()
            .filter(|(_, r)| r.deadline.map_or(false, |d| d <= now))
            .map(|(k, _)| *k)
            .collect();

        let mut out = Vec::new();
        for (command, ident) in expired {
            for c in self.take(command, ident) {
                out.push((command, ident, c));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.registrations.values().map(|r| r.continuations.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl<C: PartialEq> Default for PendingCommands<C> {
    fn default() -> Self {
        Self::new()
    }
}
