//! The tick engine.
//!
//! [`tick`] evaluates one node and, through it, its active descendants.
//! Per-kind logic returns a [`Fault`] for anything that goes wrong; node
//! level faults are reported and turn into `Fail`, engine faults abort the
//! tick. Whenever a node finishes, its run state and that of its whole
//! subtree is discarded, so the next tick starts it afresh.

use std::time::Duration;

use crate::{
    binding,
    blackboard::{Blackboard, Lookup},
    context::Context,
    error::{BindingError, BlackboardError, EngineError, RemoteError, TickError},
    node::{ConditionConfig, Node, NodeIndex, NodeKind, RemoteConfig, ValueSource},
    remote::{CallStatus, RemoteClient, RemoteRequest},
    state::{RemoteState, RunState, StateKey},
    value::Value,
    BehaviorResult,
};

enum Fault {
    Node(TickError),
    Engine(EngineError),
}

impl From<EngineError> for Fault {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<TickError> for Fault {
    fn from(e: TickError) -> Self {
        Self::Node(e)
    }
}

impl From<BindingError> for Fault {
    fn from(e: BindingError) -> Self {
        Self::Node(e.into())
    }
}

impl From<BlackboardError> for Fault {
    fn from(e: BlackboardError) -> Self {
        Self::Node(e.into())
    }
}

type TickResult = Result<BehaviorResult, Fault>;

/// Ticks the node at `index` in the context's current frame.
pub fn tick(ctx: &mut Context, index: NodeIndex) -> Result<BehaviorResult, EngineError> {
    let tree = ctx.tree;
    let node = tree.node(index).ok_or(EngineError::InvalidNode(index.0))?;
    let key = StateKey::new(ctx.frame, index);

    let res = binding::effective_kind(node, ctx)
        .map_err(Fault::from)
        .and_then(|kind| tick_kind(ctx, key, node, &kind));
    let res = match res {
        Ok(res) => res,
        Err(Fault::Node(e)) => {
            ctx.report(index, e);
            BehaviorResult::Fail
        }
        Err(Fault::Engine(e)) => return Err(e),
    };
    log::trace!("{} ({index}) -> {res:?}", node.label());

    if res == BehaviorResult::Running {
        // Children return before their parents, so the first one wins.
        if ctx.innermost_running.is_none() {
            ctx.innermost_running = Some(key);
        }
    } else {
        halt(ctx, key)?;
    }
    Ok(res)
}

fn tick_kind(ctx: &mut Context, key: StateKey, node: &Node, kind: &NodeKind) -> TickResult {
    use BehaviorResult::*;
    match kind {
        NodeKind::Sequence { always_restart } => {
            tick_children(ctx, key, &node.children, *always_restart, Fail)
        }
        NodeKind::Selector { always_restart } => {
            tick_children(ctx, key, &node.children, *always_restart, Success)
        }
        NodeKind::Repeat { max_starts } => tick_repeat(ctx, key, child(node, key, 0)?, *max_starts),
        NodeKind::Retry { max_attempts } => {
            tick_retry(ctx, key, child(node, key, 0)?, *max_attempts)
        }
        NodeKind::ForDuration { duration } => tick_for_duration(ctx, key, node, *duration),
        NodeKind::SimpleParallel => {
            let primary = tick(ctx, child(node, key, 0)?)?;
            let running_before = ctx.innermost_running;
            // The secondary's own result never decides anything.
            tick(ctx, child(node, key, 1)?)?;
            if primary != Running {
                // The secondary is halted along with this node.
                ctx.innermost_running = running_before;
            }
            Ok(primary)
        }
        NodeKind::Condition(condition) => tick_condition(ctx, condition),
        NodeKind::RestartWhenPaused => {
            let child = child(node, key, 0)?;
            if let Some(RunState::Epoch(seen)) = ctx.states.get(key) {
                if *seen != ctx.pause_epoch {
                    log::debug!("{}: restarting child after a pause", node.label());
                    halt(ctx, key.sibling(child))?;
                }
            }
            ctx.states.insert(key, RunState::Epoch(ctx.pause_epoch));
            Ok(tick(ctx, child)?)
        }
        NodeKind::DefineBlackboard => tick_define(ctx, key, node),
        NodeKind::SetBlackboard => {
            let values = node
                .assignments
                .iter()
                .map(|(name, source)| Ok((name.as_str(), ctx.get(source)?)))
                .collect::<Result<Vec<_>, BindingError>>()?;
            // Check every target first so that a bad one changes nothing.
            for (name, _) in &values {
                ctx.blackboard
                    .entry(ctx.scope, name)
                    .map_err(|_| BlackboardError::UndefinedVariable(name.to_string()))?;
            }
            for (name, value) in values {
                ctx.write(key.node, name, value)?;
            }
            Ok(Success)
        }
        NodeKind::FormatBlackboard { key: var, format } => {
            let text = ctx.blackboard.format(ctx.scope, format)?;
            ctx.write(key.node, var, Value::String(text))?;
            Ok(Success)
        }
        NodeKind::DateToBlackboard { key: var, format } => {
            let text = format_now(format.as_deref())?;
            ctx.write(key.node, var, Value::String(text))?;
            Ok(Success)
        }
        NodeKind::Sleep { duration } => {
            let until = match ctx.states.get(key) {
                Some(RunState::Sleep { until }) => *until,
                _ => {
                    let until = ctx.now + *duration;
                    ctx.states.insert(key, RunState::Sleep { until });
                    until
                }
            };
            Ok(if ctx.now >= until { Success } else { Running })
        }
        NodeKind::ConstantResult(res) => Ok(*res),
        NodeKind::Reference { target } => tick_reference(ctx, key, node, target),
        NodeKind::Remote(remote) => tick_remote(ctx, key, node, remote),
    }
}

fn child(node: &Node, key: StateKey, i: usize) -> Result<NodeIndex, EngineError> {
    node.children
        .get(i)
        .copied()
        .ok_or(EngineError::MissingChild(key.node.0))
}

/// Sequence stops on the first `Fail`, Selector on the first `Success`.
fn tick_children(
    ctx: &mut Context,
    key: StateKey,
    children: &[NodeIndex],
    always_restart: bool,
    stop_on: BehaviorResult,
) -> TickResult {
    let previous = match ctx.states.get(key) {
        Some(RunState::Child { current }) => Some(*current),
        _ => None,
    };
    let from = if always_restart {
        0
    } else {
        previous.unwrap_or(0)
    };

    for (i, child) in children.iter().enumerate().skip(from) {
        match tick(ctx, *child)? {
            BehaviorResult::Running => {
                // An earlier child took over from the one that was running.
                if let Some(previous) = previous.filter(|p| *p > i) {
                    for abandoned in &children[i + 1..=previous] {
                        halt(ctx, key.sibling(*abandoned))?;
                    }
                }
                ctx.states.insert(key, RunState::Child { current: i });
                return Ok(BehaviorResult::Running);
            }
            res if res == stop_on => return Ok(res),
            _ => (),
        }
    }
    Ok(match stop_on {
        BehaviorResult::Fail => BehaviorResult::Success,
        _ => BehaviorResult::Fail,
    })
}

fn counter(ctx: &Context, key: StateKey) -> Option<i64> {
    match ctx.states.get(key) {
        Some(RunState::Counter { count }) => Some(*count),
        _ => None,
    }
}

fn tick_repeat(ctx: &mut Context, key: StateKey, child: NodeIndex, max_starts: i64) -> TickResult {
    if max_starts == 0 {
        return Ok(BehaviorResult::Success);
    }
    let starts = match counter(ctx, key) {
        Some(starts) => starts,
        None => {
            ctx.set_output(key.node, "start_counter", Value::Int(0))?;
            0
        }
    };
    match tick(ctx, child)? {
        BehaviorResult::Success => {
            let starts = starts + 1;
            if 0 < max_starts && max_starts <= starts {
                return Ok(BehaviorResult::Success);
            }
            ctx.set_output(key.node, "start_counter", Value::Int(starts))?;
            ctx.states.insert(key, RunState::Counter { count: starts });
            Ok(BehaviorResult::Running)
        }
        BehaviorResult::Running => {
            ctx.states.insert(key, RunState::Counter { count: starts });
            Ok(BehaviorResult::Running)
        }
        BehaviorResult::Fail => Ok(BehaviorResult::Fail),
    }
}

fn tick_retry(ctx: &mut Context, key: StateKey, child: NodeIndex, max_attempts: i64) -> TickResult {
    let failures = counter(ctx, key).unwrap_or(0);
    match tick(ctx, child)? {
        BehaviorResult::Fail => {
            let failures = failures + 1;
            if max_attempts <= failures {
                return Ok(BehaviorResult::Fail);
            }
            log::debug!("{}: attempt {failures} of {max_attempts} failed", key.node);
            ctx.set_output(key.node, "attempt", Value::Int(failures))?;
            ctx.states.insert(key, RunState::Counter { count: failures });
            Ok(BehaviorResult::Running)
        }
        BehaviorResult::Running => {
            ctx.states.insert(key, RunState::Counter { count: failures });
            Ok(BehaviorResult::Running)
        }
        BehaviorResult::Success => Ok(BehaviorResult::Success),
    }
}

fn tick_for_duration(ctx: &mut Context, key: StateKey, node: &Node, duration: Duration) -> TickResult {
    let (deadline, timed_out) = match ctx.states.get(key) {
        Some(RunState::ForDuration {
            deadline,
            timed_out,
        }) => (*deadline, *timed_out),
        _ => (ctx.now + duration, false),
    };
    let main = child(node, key, 0)?;

    if !timed_out && ctx.now < deadline {
        let remaining = deadline - ctx.now;
        ctx.set_output(key.node, "time_remaining", Value::Float(remaining.as_secs_f64()))?;
        ctx.states.insert(
            key,
            RunState::ForDuration {
                deadline,
                timed_out,
            },
        );
        return Ok(tick(ctx, main)?);
    }

    if !timed_out {
        log::info!("{}: timed out after {duration:?}", node.label());
        halt(ctx, key.sibling(main))?;
        ctx.set_output(key.node, "time_remaining", Value::Float(0.))?;
    }
    let Some(timeout_child) = node.children.get(1).copied() else {
        return Ok(BehaviorResult::Fail);
    };
    ctx.states.insert(
        key,
        RunState::ForDuration {
            deadline,
            timed_out: true,
        },
    );
    Ok(tick(ctx, timeout_child)?)
}

fn tick_condition(ctx: &mut Context, condition: &ConditionConfig) -> TickResult {
    let resolve = |ctx: &Context, source: &ValueSource| ctx.get_fresh(source, condition.freshness);
    let Lookup::Value(lhs) = resolve(ctx, &condition.lhs)? else {
        return Ok(BehaviorResult::Running);
    };
    let Lookup::Value(rhs) = resolve(ctx, &condition.rhs)? else {
        return Ok(BehaviorResult::Running);
    };
    match lhs.compare(condition.operation, &rhs) {
        Some(true) => Ok(BehaviorResult::Success),
        Some(false) => Ok(BehaviorResult::Fail),
        None => Err(BindingError::Incomparable {
            lhs: lhs.ty(),
            rhs: rhs.ty(),
        }
        .into()),
    }
}

fn tick_define(ctx: &mut Context, key: StateKey, node: &Node) -> TickResult {
    let child = child(node, key, 0)?;
    let scope = match ctx.states.get(key) {
        Some(RunState::Scope(scope)) if ctx.blackboard.is_alive(*scope) => *scope,
        _ => {
            let scope = ctx.blackboard.create_scope(ctx.scope)?;
            // Recorded before defining, so a failed definition still tears it down.
            ctx.states.insert(key, RunState::Scope(scope));
            let outer = std::mem::replace(&mut ctx.scope, scope);
            let defined = define_all(ctx, key.node, &node.assignments);
            ctx.scope = outer;
            defined?;
            scope
        }
    };

    let outer = std::mem::replace(&mut ctx.scope, scope);
    let res = tick(ctx, child);
    ctx.scope = outer;
    Ok(res?)
}

/// Later definitions may refer to earlier ones.
fn define_all(
    ctx: &mut Context,
    node: NodeIndex,
    assignments: &[(String, ValueSource)],
) -> Result<(), Fault> {
    for (name, source) in assignments {
        let value = ctx.get(source)?;
        ctx.blackboard
            .define(ctx.scope, name, value, ctx.now, Some(node))?;
    }
    Ok(())
}

fn format_now(format: Option<&str>) -> Result<String, BindingError> {
    use chrono::format::{Item, StrftimeItems};
    let now = chrono::Utc::now();
    let Some(format) = format else {
        return Ok(now.to_rfc3339());
    };
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(BindingError::InvalidValue {
            field: "format".to_owned(),
            value: format.to_owned(),
        });
    }
    Ok(now.format_with_items(StrftimeItems::new(format)).to_string())
}

fn tick_reference(ctx: &mut Context, key: StateKey, node: &Node, target: &str) -> TickResult {
    let tree = ctx.tree;
    let root = tree
        .lookup(target)
        .ok_or_else(|| EngineError::MissingTree(target.to_owned()))?;
    let decls = &tree
        .node(root)
        .ok_or(EngineError::InvalidNode(root.0))?
        .parameters;
    let parameters = binding::bind_parameters(decls, &node.parameter_values, ctx)?;

    let frame = ctx.states.frame_for(key);
    let outer = std::mem::replace(&mut ctx.frame, frame);
    ctx.parameters.push(parameters);
    let res = tick(ctx, root);
    ctx.parameters.pop();
    ctx.frame = outer;
    Ok(res?)
}

fn tick_remote(ctx: &mut Context, key: StateKey, node: &Node, remote: &RemoteConfig) -> TickResult {
    let mut state = match ctx.states.take(key) {
        Some(RunState::Remote(state)) => state,
        _ => RemoteState::default(),
    };
    let res = advance_remote(ctx, key, node, remote, &mut state);
    if matches!(res, Ok(BehaviorResult::Running)) {
        ctx.states.insert(key, RunState::Remote(state));
    } else if let Some(call) = state.call {
        ctx.remote.cancel(call);
    }
    res
}

fn advance_remote(
    ctx: &mut Context,
    key: StateKey,
    node: &Node,
    remote: &RemoteConfig,
    state: &mut RemoteState,
) -> TickResult {
    if !state.session {
        ctx.remote
            .ensure_session(&remote.service, &remote.host)
            .map_err(TickError::RemoteSession)?;
        state.session = true;
    }
    let retry = ctx.config.retry;

    let call = match state.call {
        Some(call) => call,
        None => {
            state.starts += 1;
            let request = RemoteRequest {
                op: remote.op,
                service: remote.service.clone(),
                host: remote.host.clone(),
                node: node.label(),
                fields: remote.request.clone(),
            };
            let timeout = remote.timeout.or(ctx.config.default_timeout);
            match ctx.remote.start(&request, timeout, ctx.now) {
                Ok(call) => {
                    state.poll_failures = 0;
                    state.call = Some(call);
                    call
                }
                Err(e) if state.starts < retry.start.max_attempts => {
                    log::debug!("{}: {e}; will retry", request.node);
                    return Ok(BehaviorResult::Running);
                }
                Err(source) => {
                    return Err(TickError::RemoteCall {
                        source,
                        attempts: state.starts,
                    }
                    .into())
                }
            }
        }
    };

    match ctx.remote.poll(call, ctx.now) {
        Ok(CallStatus::Pending(feedback)) => {
            state.poll_failures = 0;
            if let Some(feedback) = feedback {
                ctx.set_output(key.node, "feedback", feedback)?;
            }
            Ok(BehaviorResult::Running)
        }
        Ok(CallStatus::Succeeded(response)) => {
            state.call = None;
            ctx.set_output(key.node, "response", response)?;
            Ok(BehaviorResult::Success)
        }
        Ok(CallStatus::Failed(message)) => {
            state.call = None;
            Err(TickError::RemoteOperation(RemoteError::Operation {
                service: remote.service.clone(),
                message,
            })
            .into())
        }
        Err(source @ RemoteError::Timeout { .. }) => {
            // The client already cancelled the request.
            state.call = None;
            if state.starts < retry.start.max_attempts {
                log::warn!("{}: {source}; reissuing", node.label());
                Ok(BehaviorResult::Running)
            } else {
                Err(TickError::RemoteCall {
                    source,
                    attempts: state.starts,
                }
                .into())
            }
        }
        Err(source) => {
            state.poll_failures += 1;
            if state.poll_failures < retry.poll.max_attempts {
                log::debug!("{}: {source}; polling again", node.label());
                Ok(BehaviorResult::Running)
            } else {
                Err(TickError::RemoteCall {
                    source,
                    attempts: state.poll_failures,
                }
                .into())
            }
        }
    }
}

/// Discards the run state of a node and its whole active subtree,
/// cancelling remote calls and tearing down scopes on the way.
pub(crate) fn halt(ctx: &mut Context, key: StateKey) -> Result<(), EngineError> {
    let tree = ctx.tree;
    let node = tree.node(key.node).ok_or(EngineError::InvalidNode(key.node.0))?;
    if let Some(state) = ctx.states.take(key) {
        release(ctx.blackboard, ctx.remote, state);
    }
    match &node.kind {
        Some(NodeKind::Reference { target }) => {
            if let Some(frame) = ctx.states.child_frame(key) {
                let root = tree
                    .lookup(target)
                    .ok_or_else(|| EngineError::MissingTree(target.clone()))?;
                halt(ctx, StateKey::new(frame, root))?;
            }
        }
        _ => {
            for child in &node.children {
                halt(ctx, key.sibling(*child))?;
            }
        }
    }
    Ok(())
}

/// Frees what a run state holds outside the state arena.
pub(crate) fn release(blackboard: &mut Blackboard, remote: &mut RemoteClient, state: RunState) {
    match state {
        RunState::Scope(scope) => {
            blackboard.destroy_scope(scope);
        }
        RunState::Remote(RemoteState {
            call: Some(call), ..
        }) => remote.cancel(call),
        _ => (),
    }
}

#[cfg(test)]
mod test;
