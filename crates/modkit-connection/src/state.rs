// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle state machine shared by every network and mock connection.
//!
//! ```text
//! Created ──► Init ──► Executing ──► Disposing ──► Finished
//!    │          │          │             ▲             ▲
//!    │          └──► Inactive ───────────┘             │
//!    └─────────────────────────────────────────────────┘
//! ```
//!
//! Requests for a transition outside the table are ignored and leave the
//! state untouched. Callers that need to check and set atomically take a
//! [`RpcStateGuard`] through [`RpcStateMachine::lock`].

use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

/// Lifecycle state of one RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcState {
    Created,
    Init,
    Executing,
    Inactive,
    Disposing,
    Finished,
}

impl RpcState {
    /// Whether the transition table allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: RpcState) -> bool {
        use RpcState::*;
        match self {
            Created => matches!(next, Init | Disposing | Finished),
            Init => next != Created,
            Executing | Inactive => matches!(next, Disposing | Finished),
            Disposing => next == Finished,
            Finished => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RpcState::Created => "created",
            RpcState::Init => "init",
            RpcState::Executing => "executing",
            RpcState::Inactive => "inactive",
            RpcState::Disposing => "disposing",
            RpcState::Finished => "finished",
        }
    }
}

impl fmt::Display for RpcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutex-guarded [`RpcState`] with change notification.
#[derive(Debug)]
pub struct RpcStateMachine {
    state: Mutex<RpcState>,
    changed: Condvar,
}

impl Default for RpcStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcStateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RpcState::Created),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> RpcState {
        *self.state.lock()
    }

    /// Apply `next` if the table allows it. Returns whether the state changed.
    pub fn set_state(&self, next: RpcState) -> bool {
        self.lock().set(next)
    }

    /// Record a transport failure. See [`RpcStateGuard::fail`].
    pub fn fail(&self) -> bool {
        self.lock().fail()
    }

    /// Hold the state for a composite check-then-set sequence.
    pub fn lock(&self) -> RpcStateGuard<'_> {
        RpcStateGuard {
            state: self.state.lock(),
            changed: &self.changed,
        }
    }

    /// Block until `done` holds for the current state.
    pub fn wait_until(&self, done: impl Fn(RpcState) -> bool) {
        let mut state = self.state.lock();
        while !done(*state) {
            self.changed.wait(&mut state);
        }
    }

    /// Like [`wait_until`](Self::wait_until) with an upper bound. Returns
    /// whether the condition was reached.
    pub fn wait_until_for(&self, done: impl Fn(RpcState) -> bool, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        while !done(*state) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return done(*state);
            }
        }
        true
    }
}

/// Exclusive access to a state machine.
pub struct RpcStateGuard<'a> {
    state: MutexGuard<'a, RpcState>,
    changed: &'a Condvar,
}

impl RpcStateGuard<'_> {
    pub fn get(&self) -> RpcState {
        *self.state
    }

    pub fn set(&mut self, next: RpcState) -> bool {
        let current = *self.state;
        if !current.can_transition_to(next) {
            return false;
        }
        trace!(from = %current, to = %next, "RPC state transition");
        *self.state = next;
        self.changed.notify_all();
        true
    }

    /// A failed transport operation moves an active RPC to `Inactive`, from
    /// where it can still be stopped. Outside `Init`/`Executing` this is a
    /// no-op.
    pub fn fail(&mut self) -> bool {
        match *self.state {
            RpcState::Init | RpcState::Executing => {
                trace!(from = %*self.state, "RPC transport failure");
                *self.state = RpcState::Inactive;
                self.changed.notify_all();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const ALL: [RpcState; 6] = [
        RpcState::Created,
        RpcState::Init,
        RpcState::Executing,
        RpcState::Inactive,
        RpcState::Disposing,
        RpcState::Finished,
    ];

    #[test]
    fn test_initial_state_is_created() {
        assert_eq!(RpcStateMachine::new().state(), RpcState::Created);
    }

    #[test]
    fn test_created_rejects_executing() {
        let machine = RpcStateMachine::new();
        assert!(!machine.set_state(RpcState::Executing));
        assert!(!machine.set_state(RpcState::Inactive));
        assert_eq!(machine.state(), RpcState::Created);
    }

    #[test]
    fn test_finished_is_terminal() {
        for next in ALL {
            let machine = RpcStateMachine::new();
            assert!(machine.set_state(RpcState::Finished));
            assert!(!machine.set_state(next));
            assert!(!machine.fail());
            assert_eq!(machine.state(), RpcState::Finished);
        }
    }

    #[test]
    fn test_transition_table() {
        use RpcState::*;
        let allowed = |from: RpcState| -> Vec<RpcState> {
            ALL.into_iter().filter(|to| from.can_transition_to(*to)).collect()
        };

        assert_eq!(allowed(Created), vec![Init, Disposing, Finished]);
        assert_eq!(allowed(Init), vec![Init, Executing, Inactive, Disposing, Finished]);
        assert_eq!(allowed(Executing), vec![Disposing, Finished]);
        assert_eq!(allowed(Inactive), vec![Disposing, Finished]);
        assert_eq!(allowed(Disposing), vec![Finished]);
        assert!(allowed(Finished).is_empty());
    }

    #[test]
    fn test_full_lifecycle() {
        let machine = RpcStateMachine::new();
        assert!(machine.set_state(RpcState::Init));
        assert!(machine.set_state(RpcState::Executing));
        assert!(machine.set_state(RpcState::Disposing));
        assert!(!machine.set_state(RpcState::Executing));
        assert!(machine.set_state(RpcState::Finished));
    }

    #[test]
    fn test_fail_only_from_active_states() {
        let machine = RpcStateMachine::new();
        assert!(!machine.fail());
        assert_eq!(machine.state(), RpcState::Created);

        machine.set_state(RpcState::Init);
        machine.set_state(RpcState::Executing);
        assert!(machine.fail());
        assert_eq!(machine.state(), RpcState::Inactive);
        assert!(!machine.fail());

        assert!(machine.set_state(RpcState::Disposing));
        assert!(!machine.fail());
        assert_eq!(machine.state(), RpcState::Disposing);
    }

    #[test]
    fn test_guard_check_then_set() {
        let machine = RpcStateMachine::new();
        {
            let mut guard = machine.lock();
            assert_eq!(guard.get(), RpcState::Created);
            assert!(guard.set(RpcState::Init));
            assert!(guard.set(RpcState::Executing));
        }
        assert_eq!(machine.state(), RpcState::Executing);
    }

    #[test]
    fn test_wait_until_wakes_on_transition() {
        let machine = Arc::new(RpcStateMachine::new());
        machine.set_state(RpcState::Init);

        let waiter = {
            let machine = machine.clone();
            std::thread::spawn(move || machine.wait_until(|s| s != RpcState::Init))
        };

        std::thread::sleep(Duration::from_millis(20));
        machine.set_state(RpcState::Executing);
        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_until_for_times_out() {
        let machine = RpcStateMachine::new();
        let reached = machine.wait_until_for(|s| s == RpcState::Finished, Duration::from_millis(20));
        assert!(!reached);
    }

    #[test]
    fn test_display() {
        assert_eq!(RpcState::Disposing.to_string(), "disposing");
    }
}
