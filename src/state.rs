//! Per-node run state, persisted across ticks until the node finishes.
//!
//! States live in an arena keyed by `(frame, node index)` rather than on the
//! nodes themselves, so the tree stays immutable while it is being ticked and
//! a subtree invoked from two places keeps two independent states. Every
//! invocation of a `Reference` node gets its own frame.

use std::collections::HashMap;
use std::time::Duration;

use crate::{blackboard::ScopeId, node::NodeIndex, remote::CallHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub(crate) u32);

impl FrameId {
    pub const ROOT: Self = Self(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    pub frame: FrameId,
    pub node: NodeIndex,
}

impl StateKey {
    pub fn new(frame: FrameId, node: NodeIndex) -> Self {
        Self { frame, node }
    }

    /// Key of a node in the same frame.
    pub fn sibling(self, node: NodeIndex) -> Self {
        Self {
            frame: self.frame,
            node,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RemoteState {
    pub session: bool,
    pub call: Option<CallHandle>,
    /// Requests issued in this activation, including timed out ones.
    pub starts: u32,
    pub poll_failures: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RunState {
    /// Sequence and Selector resume point.
    Child { current: usize },
    /// Repeat starts or Retry attempts.
    Counter { count: i64 },
    ForDuration { deadline: Duration, timed_out: bool },
    Scope(ScopeId),
    Sleep { until: Duration },
    Remote(RemoteState),
    /// Pause epoch observed by RestartWhenPaused on its last tick.
    Epoch(u64),
}

#[derive(Debug, Default)]
pub struct StateArena {
    states: HashMap<StateKey, RunState>,
    frames: HashMap<StateKey, FrameId>,
    next_frame: u32,
}

impl StateArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: StateKey) -> Option<&RunState> {
        self.states.get(&key)
    }

    pub(crate) fn insert(&mut self, key: StateKey, state: RunState) {
        self.states.insert(key, state);
    }

    pub(crate) fn take(&mut self, key: StateKey) -> Option<RunState> {
        self.states.remove(&key)
    }

    pub fn is_active(&self, key: StateKey) -> bool {
        self.states.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Frame of the subtree invoked by the reference node at `key`,
    /// allocated on first use.
    pub(crate) fn frame_for(&mut self, key: StateKey) -> FrameId {
        let next = &mut self.next_frame;
        *self.frames.entry(key).or_insert_with(|| {
            *next += 1;
            FrameId(*next)
        })
    }

    pub(crate) fn child_frame(&self, key: StateKey) -> Option<FrameId> {
        self.frames.get(&key).copied()
    }

    /// Forgets every outstanding remote call so that the owning nodes
    /// re-issue their requests on the next tick. Counters and indices stay;
    /// a detached request does not count as a start attempt.
    pub(crate) fn detach_calls(&mut self) -> Vec<CallHandle> {
        self.states
            .values_mut()
            .filter_map(|state| match state {
                RunState::Remote(remote) => {
                    let call = remote.call.take()?;
                    remote.starts = remote.starts.saturating_sub(1);
                    remote.poll_failures = 0;
                    Some(call)
                }
                _ => None,
            })
            .collect()
    }

    /// Removes every state, handing them back for cleanup.
    pub(crate) fn drain(&mut self) -> Vec<RunState> {
        self.frames.clear();
        self.next_frame = 0;
        self.states.drain().map(|(_, state)| state).collect()
    }
}
