//! The mission runner: load a tree, then play, pause, stop and tick it.
//!
//! The runner owns everything that outlives a tick: the loaded tree, the
//! blackboard, the run state arena, the remote client and the leases. Each
//! call to [`MissionRunner::tick`] lends them to a fresh [`Context`] and
//! ticks the `main` tree once.
//!
//! Pausing freezes the mission between ticks without discarding anything.
//! Stopping additionally cancels outstanding remote calls and gives the
//! leases back; remote nodes re-issue their requests when the mission is
//! played again. Every resume after a pause or stop starts a new pause
//! epoch, which is what `RestartWhenPaused` nodes watch for.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::{
    blackboard::Blackboard,
    clock::{Clock, SystemClock},
    config::MissionConfig,
    context::{Context, NodeReport},
    error::{BlackboardError, MissionError},
    lease::{LeaseProvider, LeaseSet},
    node::{NodeIndex, Tree},
    nodes,
    parser,
    remote::RemoteClient,
    state::{FrameId, StateArena, StateKey},
    value::Value,
    BehaviorResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Nothing has been played since the last load.
    Idle,
    Playing,
    Paused,
    Stopped,
    /// The main tree returned `Success` or `Fail`.
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveNode {
    pub node: NodeIndex,
    pub frame: FrameId,
    pub label: String,
}

/// A snapshot of the mission for operators.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionFeedback {
    pub state: RunnerState,
    /// Result of the last tick.
    pub status: Option<BehaviorResult>,
    /// Innermost node that was running on the last tick.
    pub active: Option<ActiveNode>,
    pub ticks: u64,
    pub elapsed: Duration,
    pub reports: Vec<NodeReport>,
    pub leases: Vec<String>,
}

pub struct MissionRunner {
    config: MissionConfig,
    clock: Box<dyn Clock>,
    remote: RemoteClient,
    leases: LeaseSet,
    tree: Option<Tree>,
    blackboard: Blackboard,
    states: StateArena,
    reports: VecDeque<NodeReport>,
    state: RunnerState,
    status: Option<BehaviorResult>,
    active: Option<StateKey>,
    /// Clock reading at the first play after a load or restart.
    started_at: Option<Duration>,
    pause_epoch: u64,
    ticks: u64,
}

impl MissionRunner {
    pub fn new(
        config: MissionConfig,
        remote: RemoteClient,
        leases: impl LeaseProvider + 'static,
    ) -> Self {
        let leases = LeaseSet::new(leases, config.lease_owner.clone());
        Self {
            config,
            clock: Box::new(SystemClock::default()),
            remote,
            leases,
            tree: None,
            blackboard: Blackboard::new(),
            states: StateArena::new(),
            reports: VecDeque::new(),
            state: RunnerState::Idle,
            status: None,
            active: None,
            started_at: None,
            pause_epoch: 0,
            ticks: 0,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &MissionConfig {
        &self.config
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn status(&self) -> Option<BehaviorResult> {
        self.status
    }

    pub fn tree(&self) -> Option<&Tree> {
        self.tree.as_ref()
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn remote_mut(&mut self) -> &mut RemoteClient {
        &mut self.remote
    }

    /// Mission time: how long ago the mission was first played.
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|start| self.clock.now().saturating_sub(start))
            .unwrap_or_default()
    }

    /// Defines a variable in the root scope, e.g. the latest robot state.
    pub fn define(&mut self, name: &str, value: impl Into<Value>) -> Result<(), BlackboardError> {
        let now = self.elapsed();
        let root = self.blackboard.root();
        self.blackboard.define(root, name, value.into(), now, None)
    }

    /// Updates a root variable and its timestamp.
    pub fn write(&mut self, name: &str, value: impl Into<Value>) -> Result<(), BlackboardError> {
        let now = self.elapsed();
        let root = self.blackboard.root();
        self.blackboard.write(root, name, value.into(), now, None)
    }

    /// Replaces the mission. Whatever was running is stopped first.
    pub fn load(&mut self, tree: Tree) {
        self.stop();
        self.reset();
        self.remote.reset_sessions();
        log::info!(
            "Loaded mission {:?} with {} nodes",
            self.config.name,
            tree.len()
        );
        self.tree = Some(tree);
        self.state = RunnerState::Idle;
    }

    pub fn load_str(&mut self, source: &str) -> Result<(), MissionError> {
        self.load(parser::load_str(source)?);
        Ok(())
    }

    pub fn load_yaml(&mut self, source: &str) -> Result<(), MissionError> {
        self.load(parser::load_yaml(source)?);
        Ok(())
    }

    /// Starts or resumes the mission. Every lease the tree needs must be
    /// acquired first; if any is unavailable nothing changes.
    pub fn play(&mut self) -> Result<(), MissionError> {
        let required = self
            .tree
            .as_ref()
            .ok_or(MissionError::NotLoaded)?
            .lease_resources();
        if self.state == RunnerState::Playing {
            return Ok(());
        }
        self.leases.acquire_all(&required)?;

        match self.state {
            RunnerState::Finished => self.reset(),
            RunnerState::Paused | RunnerState::Stopped => {
                self.pause_epoch += 1;
                if self.config.restart_on_play {
                    self.reset();
                }
            }
            RunnerState::Idle | RunnerState::Playing => (),
        }
        if self.started_at.is_none() {
            self.started_at = Some(self.clock.now());
        }
        self.state = RunnerState::Playing;
        log::info!("Mission {:?} playing", self.config.name);
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state == RunnerState::Playing {
            self.state = RunnerState::Paused;
            log::info!("Mission {:?} paused", self.config.name);
        }
    }

    /// Cancels outstanding remote calls and releases the leases. Run state
    /// is kept, so playing again resumes where the mission left off.
    pub fn stop(&mut self) {
        for call in self.states.detach_calls() {
            self.remote.cancel(call);
        }
        self.remote.cancel_all();
        self.leases.release_all();
        if matches!(self.state, RunnerState::Playing | RunnerState::Paused) {
            self.state = RunnerState::Stopped;
            log::info!("Mission {:?} stopped", self.config.name);
        }
    }

    /// Discards all run state so the next tick starts from the top.
    pub fn restart(&mut self) {
        self.reset();
        if self.state == RunnerState::Finished {
            self.state = RunnerState::Stopped;
        }
        if self.state == RunnerState::Playing {
            self.started_at = Some(self.clock.now());
        }
    }

    fn reset(&mut self) {
        for state in self.states.drain() {
            nodes::release(&mut self.blackboard, &mut self.remote, state);
        }
        self.blackboard.clear_nested_scopes();
        self.reports.clear();
        self.status = None;
        self.active = None;
        self.started_at = None;
        self.ticks = 0;
    }

    /// Ticks the main tree once.
    pub fn tick(&mut self) -> Result<BehaviorResult, MissionError> {
        if self.state != RunnerState::Playing {
            return Err(MissionError::NotPlaying);
        }
        for e in self.leases.retain_all()? {
            log::warn!("Mission {:?}: {e}", self.config.name);
        }
        let now = self.elapsed();
        let tree = self.tree.as_ref().ok_or(MissionError::NotLoaded)?;

        let mut ctx = Context::new(
            tree,
            &mut self.blackboard,
            &mut self.states,
            &mut self.remote,
            &self.config,
            &mut self.reports,
        )
        .at(now)
        .with_pause_epoch(self.pause_epoch);
        let res = nodes::tick(&mut ctx, tree.main());
        let active = ctx.innermost_running();
        self.ticks += 1;

        let status = match res {
            Ok(status) => status,
            Err(e) => {
                log::error!("Mission {:?} aborted: {e}", self.config.name);
                self.stop();
                return Err(e.into());
            }
        };
        self.status = Some(status);
        self.active = active;
        if status != BehaviorResult::Running {
            log::info!("Mission {:?} finished: {status}", self.config.name);
            self.state = RunnerState::Finished;
            self.leases.release_all();
        }
        Ok(status)
    }

    /// Plays the mission and ticks it at the configured period until it
    /// finishes.
    pub fn run(&mut self) -> Result<BehaviorResult, MissionError> {
        self.play()?;
        loop {
            let started = Instant::now();
            let status = self.tick()?;
            if status != BehaviorResult::Running {
                return Ok(status);
            }
            if let Some(rest) = self.config.tick_period.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }

    pub fn feedback(&self) -> MissionFeedback {
        let active = self.active.and_then(|key| {
            let node = self.tree.as_ref()?.node(key.node)?;
            Some(ActiveNode {
                node: key.node,
                frame: key.frame,
                label: node.label(),
            })
        });
        MissionFeedback {
            state: self.state,
            status: self.status,
            active,
            ticks: self.ticks,
            elapsed: self.elapsed(),
            reports: self.reports.iter().cloned().collect(),
            leases: self.leases.held().map(str::to_owned).collect(),
        }
    }
}

impl Drop for MissionRunner {
    fn drop(&mut self) {
        self.remote.cancel_all();
    }
}
