use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::{
    blackboard::{Blackboard, FreshnessRequirement, Lookup, ScopeId},
    config::MissionConfig,
    error::{BindingError, BlackboardError, TickError},
    node::{NodeIndex, Tree, ValueSource},
    remote::RemoteClient,
    state::{FrameId, StateArena, StateKey},
    value::Value,
};

/// A node failure recorded for feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    pub node: NodeIndex,
    pub label: String,
    /// Mission time of the failing tick.
    pub at: Duration,
    pub error: TickError,
}

/// Everything a node can see and touch during one tick.
///
/// The context is rebuilt by the runner for every tick. While descending,
/// the engine moves `scope`, `frame` and the parameter stack in and out as
/// it enters scoped nodes and referenced subtrees.
pub struct Context<'a> {
    pub(crate) tree: &'a Tree,
    pub(crate) blackboard: &'a mut Blackboard,
    pub(crate) states: &'a mut StateArena,
    pub(crate) remote: &'a mut RemoteClient,
    pub(crate) config: &'a MissionConfig,
    pub(crate) reports: &'a mut VecDeque<NodeReport>,
    /// Mission time of this tick.
    pub(crate) now: Duration,
    /// Bumped by the runner whenever it resumes after a pause or stop.
    pub(crate) pause_epoch: u64,
    pub(crate) scope: ScopeId,
    pub(crate) frame: FrameId,
    pub(crate) parameters: Vec<HashMap<String, Value>>,
    pub(crate) innermost_running: Option<StateKey>,
}

impl<'a> Context<'a> {
    pub fn new(
        tree: &'a Tree,
        blackboard: &'a mut Blackboard,
        states: &'a mut StateArena,
        remote: &'a mut RemoteClient,
        config: &'a MissionConfig,
        reports: &'a mut VecDeque<NodeReport>,
    ) -> Self {
        let scope = blackboard.root();
        Self {
            tree,
            blackboard,
            states,
            remote,
            config,
            reports,
            now: Duration::ZERO,
            pause_epoch: 0,
            scope,
            frame: FrameId::ROOT,
            parameters: vec![],
            innermost_running: None,
        }
    }

    pub fn at(mut self, now: Duration) -> Self {
        self.now = now;
        self
    }

    pub fn with_pause_epoch(mut self, epoch: u64) -> Self {
        self.pause_epoch = epoch;
        self
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Deepest node that reported `Running` on this tick.
    pub fn innermost_running(&self) -> Option<StateKey> {
        self.innermost_running
    }

    /// Resolves a bound value, ignoring staleness.
    pub fn get(&self, source: &ValueSource) -> Result<Value, BindingError> {
        match source {
            ValueSource::Constant(value) => Ok(value.clone()),
            ValueSource::Parameter(name) => self
                .parameters
                .last()
                .and_then(|frame| frame.get(name))
                .cloned()
                .ok_or_else(|| BindingError::UnboundParameter(name.clone())),
            ValueSource::Variable(path) => Ok(self.blackboard.resolve_value(self.scope, path)?),
        }
    }

    /// Resolves a bound value, applying a staleness policy to variables.
    pub fn get_fresh(
        &self,
        source: &ValueSource,
        freshness: FreshnessRequirement,
    ) -> Result<Lookup, BindingError> {
        match source {
            ValueSource::Variable(path) => Ok(self
                .blackboard
                .resolve(self.scope, path, freshness, self.now)?),
            _ => self.get(source).map(Lookup::Value),
        }
    }

    /// Mutates an existing variable, as the blackboard mutator nodes do.
    pub fn write(
        &mut self,
        node: NodeIndex,
        name: &str,
        value: Value,
    ) -> Result<(), BlackboardError> {
        self.blackboard
            .write(self.scope, name, value, self.now, Some(node))
    }

    /// Writes an output port if the node maps it. The target variable is
    /// defined in the current scope when nothing defines it yet.
    pub fn set_output(
        &mut self,
        node: NodeIndex,
        port: &str,
        value: Value,
    ) -> Result<(), BlackboardError> {
        let Some(var) = self.tree.node(node).and_then(|n| n.output(port)) else {
            return Ok(());
        };
        match self
            .blackboard
            .write(self.scope, var, value.clone(), self.now, Some(node))
        {
            Err(BlackboardError::UndefinedVariable(_)) => {
                self.blackboard
                    .define(self.scope, var, value, self.now, Some(node))
            }
            res => res,
        }
    }

    pub fn report(&mut self, node: NodeIndex, error: TickError) {
        let label = self
            .tree
            .node(node)
            .map(|n| n.label())
            .unwrap_or_else(|| node.to_string());
        log::warn!("{label} ({node}) failed: {error}");
        while self.reports.len() >= self.config.max_reports.max(1) {
            self.reports.pop_front();
        }
        self.reports.push_back(NodeReport {
            node,
            label,
            at: self.now,
            error,
        });
    }
}
