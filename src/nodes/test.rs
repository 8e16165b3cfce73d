use super::*;
use crate::{
    config::MissionConfig,
    context::NodeReport,
    error::{BindingError, BlackboardError, RemoteError, TickError},
    node::Tree,
    parser::load_str,
    remote::{CallId, RemoteService},
    state::{FrameId, StateArena},
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use BehaviorResult::*;

/// Scripted behavior of the fake remote service, shared with the test.
#[derive(Default)]
struct Script {
    /// Pending polls before a call completes.
    polls: u32,
    /// `None` succeeds with the call id.
    outcome: Option<Result<Value, String>>,
    never_finish: bool,
    refuse_sessions: bool,
    start_failures: u32,
    poll_failures: u32,
    sessions: u32,
    started: Vec<RemoteRequest>,
    cancelled: Vec<CallId>,
    pending: HashMap<CallId, u32>,
}

#[derive(Clone, Default)]
struct Fake(Arc<Mutex<Script>>);

impl RemoteService for Fake {
    fn open_session(&mut self, host: &str) -> Result<(), String> {
        let mut s = self.0.lock();
        s.sessions += 1;
        if s.refuse_sessions {
            Err(format!("{host:?} unreachable"))
        } else {
            Ok(())
        }
    }

    fn start(&mut self, request: &RemoteRequest) -> Result<CallId, String> {
        let mut s = self.0.lock();
        if s.start_failures > 0 {
            s.start_failures -= 1;
            return Err("busy".to_owned());
        }
        s.started.push(request.clone());
        let call = CallId(s.started.len() as u64);
        let polls = s.polls;
        s.pending.insert(call, polls);
        Ok(call)
    }

    fn poll(&mut self, call: CallId) -> Result<CallStatus, String> {
        let mut s = self.0.lock();
        if s.poll_failures > 0 {
            s.poll_failures -= 1;
            return Err("link down".to_owned());
        }
        if s.never_finish {
            return Ok(CallStatus::Pending(None));
        }
        let left = s.pending.get_mut(&call).ok_or("unknown call")?;
        if *left > 0 {
            *left -= 1;
            let left = *left;
            return Ok(CallStatus::Pending(Some(Value::Int(left as i64))));
        }
        s.pending.remove(&call);
        Ok(match s.outcome.clone() {
            Some(Ok(value)) => CallStatus::Succeeded(value),
            Some(Err(message)) => CallStatus::Failed(message),
            None => CallStatus::Succeeded(Value::Int(call.0 as i64)),
        })
    }

    fn cancel(&mut self, call: CallId) -> Result<(), String> {
        let mut s = self.0.lock();
        s.pending.remove(&call);
        s.cancelled.push(call);
        Ok(())
    }
}

struct Harness {
    tree: Tree,
    blackboard: Blackboard,
    states: StateArena,
    remote: RemoteClient,
    config: MissionConfig,
    reports: VecDeque<NodeReport>,
    now: Duration,
    epoch: u64,
    innermost: Option<StateKey>,
    fake: Fake,
}

impl Harness {
    fn new(source: &str) -> Self {
        let fake = Fake::default();
        let remote = RemoteClient::new()
            .with_service("graph-nav", fake.clone())
            .with_service("robot-command", fake.clone());
        Self {
            tree: load_str(source).unwrap(),
            blackboard: Blackboard::new(),
            states: StateArena::new(),
            remote,
            config: MissionConfig::default(),
            reports: VecDeque::new(),
            now: Duration::ZERO,
            epoch: 0,
            innermost: None,
            fake,
        }
    }

    fn script(&self) -> parking_lot::MutexGuard<Script> {
        self.fake.0.lock()
    }

    fn tick(&mut self) -> BehaviorResult {
        let mut ctx = Context::new(
            &self.tree,
            &mut self.blackboard,
            &mut self.states,
            &mut self.remote,
            &self.config,
            &mut self.reports,
        )
        .at(self.now)
        .with_pause_epoch(self.epoch);
        let res = tick(&mut ctx, self.tree.main()).unwrap();
        self.innermost = ctx.innermost_running();
        res
    }

    fn at(&mut self, seconds: f64) -> &mut Self {
        self.now = Duration::from_secs_f64(seconds);
        self
    }

    fn define(&mut self, name: &str, value: impl Into<Value>) {
        let root = self.blackboard.root();
        self.blackboard
            .define(root, name, value.into(), self.now, None)
            .unwrap();
    }

    fn write(&mut self, name: &str, value: impl Into<Value>) {
        let root = self.blackboard.root();
        self.blackboard
            .write(root, name, value.into(), self.now, None)
            .unwrap();
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.blackboard.get(self.blackboard.root(), name).cloned()
    }

    fn last_error(&self) -> Option<&TickError> {
        self.reports.back().map(|report| &report.error)
    }

    fn child(&self, parent: NodeIndex, i: usize) -> NodeIndex {
        self.tree.node(parent).unwrap().children()[i]
    }
}

#[test]
fn test_sequence_resumes_running_child() {
    let mut h = Harness::new(
        r#"
tree main = Sequence {
    SetBlackboard (count <- 1)
    Sleep (seconds <- 1)
    ConstantResult (result <- "success")
}
"#,
    );
    h.define("count", 0);

    assert_eq!(h.tick(), Running);
    assert_eq!(h.get("count"), Some(Value::Int(1)));

    // Earlier children are not ticked again while a later one runs.
    h.write("count", 5);
    assert_eq!(h.at(0.5).tick(), Running);
    assert_eq!(h.get("count"), Some(Value::Int(5)));

    assert_eq!(h.at(1.5).tick(), Success);
    assert!(h.states.is_empty());
}

#[test]
fn test_sequence_and_selector_results() {
    let mut h = Harness::new(
        r#"
tree main = Selector {
    Sequence {
        ConstantResult (result <- "success")
        ConstantResult (result <- "failure")
    }
    ConstantResult (result <- "failure")
}
"#,
    );
    assert_eq!(h.tick(), Fail);

    let mut h = Harness::new(
        r#"
tree main = Sequence {
    ConstantResult (result <- "success")
    ConstantResult (result <- "failure")
    SetBlackboard (reached <- true)
}
"#,
    );
    h.define("reached", false);
    assert_eq!(h.tick(), Fail);
    assert_eq!(h.get("reached"), Some(Value::Bool(false)));

    let mut h = Harness::new(
        r#"
tree main = Selector {
    ConstantResult (result <- "failure")
    ConstantResult (result <- "success")
    SetBlackboard (reached <- true)
}
"#,
    );
    h.define("reached", false);
    assert_eq!(h.tick(), Success);
    assert_eq!(h.get("reached"), Some(Value::Bool(false)));

    assert_eq!(Harness::new("tree main = Sequence").tick(), Success);
    assert_eq!(Harness::new("tree main = Selector").tick(), Fail);
}

#[test]
fn test_earlier_child_takes_over() {
    let mut h = Harness::new(
        r#"
tree main = Sequence (always_restart <- true) {
    Condition (
        lhs <- battery
        operation <- ">"
        rhs <- 20
        handle_staleness <- "block_until_fresh"
        max_age <- 1
    )
    NavigateTo (destination_waypoint_id <- "dock")
}
"#,
    );
    h.script().never_finish = true;
    h.define("battery", 80);

    assert_eq!(h.tick(), Running);
    assert_eq!(h.script().started.len(), 1);

    // The battery reading went stale, so the condition blocks and the
    // navigation it guarded is halted.
    assert_eq!(h.at(2.).tick(), Running);
    assert_eq!(h.script().cancelled.len(), 1);
    assert_eq!(h.remote.outstanding(), 0);
    assert_eq!(h.innermost.map(|key| key.node), Some(h.child(h.tree.main(), 0)));

    h.write("battery", 80);
    assert_eq!(h.tick(), Running);
    assert_eq!(h.script().started.len(), 2);
}

#[test]
fn test_repeat() {
    let mut h = Harness::new(
        r#"
tree main = Repeat (max_starts <- 3, start_counter -> starts) {
    ConstantResult (result <- "success")
}
"#,
    );
    assert_eq!(h.tick(), Running);
    assert_eq!(h.get("starts"), Some(Value::Int(1)));
    assert_eq!(h.tick(), Running);
    assert_eq!(h.get("starts"), Some(Value::Int(2)));
    assert_eq!(h.tick(), Success);
    assert!(h.states.is_empty());

    // A fresh activation counts from zero again.
    assert_eq!(h.tick(), Running);
    assert_eq!(h.get("starts"), Some(Value::Int(1)));
}

#[test]
fn test_repeat_limits() {
    let mut h = Harness::new(
        "tree main = Repeat (max_starts <- 0) { SetBlackboard (touched <- true) }",
    );
    h.define("touched", false);
    assert_eq!(h.tick(), Success);
    assert_eq!(h.get("touched"), Some(Value::Bool(false)));

    let mut h = Harness::new(
        "tree main = Repeat (max_starts <- -1) { ConstantResult (result <- \"success\") }",
    );
    for _ in 0..10 {
        assert_eq!(h.tick(), Running);
    }

    let mut h = Harness::new(
        "tree main = Repeat (max_starts <- 5) { ConstantResult (result <- \"failure\") }",
    );
    assert_eq!(h.tick(), Fail);
}

#[test]
fn test_retry() {
    let source = r#"
tree main = Retry (max_attempts <- 3, attempt -> tries) {
    Condition (lhs <- ready, operation <- "==", rhs <- true)
}
"#;
    let mut h = Harness::new(source);
    h.define("ready", false);
    assert_eq!(h.tick(), Running);
    assert_eq!(h.get("tries"), Some(Value::Int(1)));
    assert_eq!(h.tick(), Running);
    assert_eq!(h.get("tries"), Some(Value::Int(2)));
    h.write("ready", true);
    assert_eq!(h.tick(), Success);

    let mut h = Harness::new(source);
    h.define("ready", false);
    assert_eq!(h.tick(), Running);
    assert_eq!(h.tick(), Running);
    assert_eq!(h.tick(), Fail);
    assert!(h.states.is_empty());
}

#[test]
fn test_override_from_blackboard() {
    let source = r#"
tree main = Retry (max_attempts <- limit) {
    ConstantResult (result <- "failure")
}
"#;
    let mut h = Harness::new(source);
    h.define("limit", 1);
    assert_eq!(h.tick(), Fail);

    h.write("limit", 2);
    assert_eq!(h.tick(), Running);
    assert_eq!(h.tick(), Fail);

    h.write("limit", "many");
    assert_eq!(h.tick(), Fail);
    assert!(matches!(
        h.last_error(),
        Some(TickError::Binding(BindingError::TypeMismatch { field, .. })) if field == "max_attempts"
    ));
}

#[test]
fn test_for_duration_times_out() {
    let mut h = Harness::new(
        r#"
tree main = ForDuration (duration <- 2, time_remaining -> left) {
    Sleep (seconds <- 10)
}
"#,
    );
    assert_eq!(h.tick(), Running);
    assert_eq!(h.get("left"), Some(Value::Float(2.)));
    assert_eq!(h.at(1.).tick(), Running);
    assert_eq!(h.get("left"), Some(Value::Float(1.)));
    assert_eq!(h.at(2.5).tick(), Fail);
    assert_eq!(h.get("left"), Some(Value::Float(0.)));
    assert!(h.states.is_empty());
}

#[test]
fn test_for_duration_finishes_in_time() {
    let mut h = Harness::new("tree main = ForDuration (duration <- 5) { Sleep (seconds <- 1) }");
    assert_eq!(h.tick(), Running);
    assert_eq!(h.at(1.).tick(), Success);
}

#[test]
fn test_for_duration_timeout_child() {
    let mut h = Harness::new(
        r#"
tree main = ForDuration (duration <- 1) {
    NavigateTo (destination_waypoint_id <- "a")
    SetBlackboard (timed_out <- true)
}
"#,
    );
    h.script().never_finish = true;
    h.define("timed_out", false);

    assert_eq!(h.tick(), Running);
    assert_eq!(h.at(2.).tick(), Success);
    assert_eq!(h.get("timed_out"), Some(Value::Bool(true)));
    assert_eq!(h.script().cancelled.len(), 1);
}

#[test]
fn test_simple_parallel_halts_secondary() {
    let mut h = Harness::new(
        r#"
tree main = SimpleParallel {
    Sleep (seconds <- 2)
    NavigateTo (destination_waypoint_id <- "a")
}
"#,
    );
    h.script().never_finish = true;

    assert_eq!(h.tick(), Running);
    assert_eq!(h.at(1.).tick(), Running);
    assert_eq!(h.remote.outstanding(), 1);

    assert_eq!(h.at(2.5).tick(), Success);
    let script = h.script();
    assert_eq!(script.started.len(), 1);
    assert_eq!(script.cancelled.len(), 1);
    drop(script);
    assert_eq!(h.remote.outstanding(), 0);
}

#[test]
fn test_simple_parallel_ignores_secondary_result() {
    let mut h = Harness::new(
        r#"
tree main = SimpleParallel {
    Sleep (seconds <- 1)
    ConstantResult (result <- "failure")
}
"#,
    );
    assert_eq!(h.tick(), Running);
    assert_eq!(h.at(1.).tick(), Success);
}

#[test]
fn test_simple_parallel_ticks_secondary_on_last_cycle() {
    let mut h = Harness::new(
        r#"
tree main = SimpleParallel {
    ConstantResult (result <- "failure")
    SetBlackboard (touched <- true)
}
"#,
    );
    h.define("touched", false);
    assert_eq!(h.tick(), Fail);
    assert_eq!(h.get("touched"), Some(Value::Bool(true)));

    let mut h = Harness::new(
        r#"
tree main = SimpleParallel {
    ConstantResult (result <- "success")
    Sleep (seconds <- 5)
}
"#,
    );
    assert_eq!(h.tick(), Success);
    assert!(h.states.is_empty());
    assert_eq!(h.innermost, None);
}

#[test]
fn test_condition_staleness() {
    let mut h = Harness::new(
        r#"
tree main = Condition (
    lhs <- battery
    operation <- ">"
    rhs <- 20
    handle_staleness <- "fail_if_stale"
    max_age <- 1
)
"#,
    );
    h.define("battery", 50);
    assert_eq!(h.at(0.5).tick(), Success);
    assert_eq!(h.at(2.).tick(), Fail);
    assert!(matches!(
        h.last_error(),
        Some(TickError::Binding(BindingError::Blackboard(
            BlackboardError::StaleValue { .. }
        )))
    ));

    let mut h = Harness::new(
        r#"
tree main = Condition (
    lhs <- battery
    operation <- ">"
    rhs <- 20
    handle_staleness <- "block_until_fresh"
    max_age <- 1
)
"#,
    );
    h.define("battery", 50);
    assert_eq!(h.at(2.).tick(), Running);
    h.write("battery", 10);
    assert_eq!(h.tick(), Fail);
    assert!(h.reports.is_empty());
}

#[test]
fn test_condition_field_path() {
    let mut h = Harness::new(
        r#"tree main = Condition (lhs <- state.power.charge, operation <- ">=", rhs <- 30)"#,
    );
    h.define(
        "state",
        serde_json::json!({ "power": { "charge": 30, "charging": false } }),
    );
    assert_eq!(h.tick(), Success);

    let mut h = Harness::new(r#"tree main = Condition (lhs <- missing, operation <- "==", rhs <- 1)"#);
    assert_eq!(h.tick(), Fail);
    assert_eq!(h.reports.len(), 1);
}

#[test]
fn test_define_blackboard_scope() {
    let mut h = Harness::new(
        r#"
tree main = DefineBlackboard (count <- 1, label <- "inner", copy <- count) {
    Sequence {
        FormatBlackboard (key <- "report", format <- "{label}: {copy}")
        Sleep (seconds <- 1)
    }
}
"#,
    );
    h.define("label", "outer");
    h.define("report", "");

    assert_eq!(h.tick(), Running);
    assert_eq!(h.get("report"), Some(Value::from("inner: 1")));
    // The inner definition shadows the outer one without touching it.
    assert_eq!(h.get("label"), Some(Value::from("outer")));
    assert_eq!(h.get("count"), None);

    let key = StateKey::new(FrameId::ROOT, h.tree.main());
    let Some(RunState::Scope(scope)) = h.states.get(key).cloned() else {
        panic!("expected a scope");
    };
    assert!(h.blackboard.is_alive(scope));

    assert_eq!(h.at(1.).tick(), Success);
    assert!(!h.blackboard.is_alive(scope));
}

#[test]
fn test_define_blackboard_failure() {
    let mut h = Harness::new(
        "tree main = DefineBlackboard (x <- nowhere) { ConstantResult (result <- \"success\") }",
    );
    assert_eq!(h.tick(), Fail);
    assert!(h.states.is_empty());
    assert_eq!(h.blackboard.visible(h.blackboard.root()).len(), 0);
}

#[test]
fn test_set_blackboard_is_atomic() {
    let mut h = Harness::new("tree main = SetBlackboard (a <- 1, ghost <- 2)");
    h.define("a", 0);
    assert_eq!(h.tick(), Fail);
    assert_eq!(h.get("a"), Some(Value::Int(0)));
    assert_eq!(
        h.last_error(),
        Some(&TickError::Blackboard(BlackboardError::UndefinedVariable(
            "ghost".to_owned()
        )))
    );

    let mut h = Harness::new("tree main = SetBlackboard (a <- b)");
    h.define("a", 0);
    h.define("b", "copied");
    assert_eq!(h.tick(), Success);
    assert_eq!(h.get("a"), Some(Value::from("copied")));
}

#[test]
fn test_format_blackboard() {
    let mut h = Harness::new(
        r#"tree main = FormatBlackboard (key <- "line", format <- "{robot} at {battery:.1f}%")"#,
    );
    h.define("robot", "spot");
    h.define("battery", 42.5);
    h.define("line", "");
    assert_eq!(h.tick(), Success);
    assert_eq!(h.get("line"), Some(Value::from("spot at 42.5%")));

    // Mutators never create variables.
    let mut h = Harness::new(r#"tree main = FormatBlackboard (key <- "line", format <- "x")"#);
    assert_eq!(h.tick(), Fail);
}

#[test]
fn test_date_to_blackboard() {
    let mut h = Harness::new(r#"tree main = DateToBlackboard (key <- "year", format <- "%Y")"#);
    h.define("year", "");
    assert_eq!(h.tick(), Success);
    let Some(Value::String(year)) = h.get("year") else {
        panic!("expected a string");
    };
    assert_eq!(year.len(), 4);
    assert!(year.chars().all(|c| c.is_ascii_digit()));

    let mut h = Harness::new(r#"tree main = DateToBlackboard (key <- "year", format <- "%Q")"#);
    h.define("year", "");
    assert_eq!(h.tick(), Fail);
    assert_eq!(h.get("year"), Some(Value::from("")));
}

#[test]
fn test_reference_parameters() {
    let mut h = Harness::new(
        r#"
tree main = Sequence {
    go (target <- "a")
    go (target <- next, speed <- 1)
}

tree go(target: string, speed: float = 0.5) = Sequence {
    SetBlackboard (last <- $target, last_speed <- $speed)
    Sleep (seconds <- 1)
}
"#,
    );
    h.define("next", "b");
    h.define("last", "");
    h.define("last_speed", 0.);

    assert_eq!(h.tick(), Running);
    assert_eq!(h.get("last"), Some(Value::from("a")));
    assert_eq!(h.get("last_speed"), Some(Value::Float(0.5)));

    assert_eq!(h.at(1.5).tick(), Running);
    assert_eq!(h.get("last"), Some(Value::from("b")));
    assert_eq!(h.get("last_speed"), Some(Value::Float(1.)));

    assert_eq!(h.at(3.).tick(), Success);
}

#[test]
fn test_references_keep_separate_state() {
    let mut h = Harness::new(
        r#"
tree main = SimpleParallel {
    wait (s <- 2)
    wait (s <- 1)
}

tree wait(s: float) = Sleep (seconds <- $s)
"#,
    );
    assert_eq!(h.tick(), Running);
    assert_eq!(h.states.len(), 2);

    // The secondary's sleep finished and was cleared; the primary's did not.
    assert_eq!(h.at(1.2).tick(), Running);
    assert_eq!(h.states.len(), 1);
    assert_eq!(h.at(2.).tick(), Success);
    assert!(h.states.is_empty());
}

#[test]
fn test_restart_when_paused() {
    let mut h = Harness::new("tree main = RestartWhenPaused { Sleep (seconds <- 2) }");
    assert_eq!(h.tick(), Running);
    assert_eq!(h.at(1.).tick(), Running);

    h.epoch += 1;
    // Without the restart the sleep would have finished by now.
    assert_eq!(h.at(2.5).tick(), Running);
    assert_eq!(h.at(4.).tick(), Running);
    assert_eq!(h.at(4.5).tick(), Success);
}

#[test]
fn test_remote_success() {
    let mut h = Harness::new(
        r#"
tree main = NavigateTo (
    destination_waypoint_id <- "dock"
    travel_speed <- 0.5
    response -> result
    feedback -> progress
)
"#,
    );
    {
        let mut script = h.script();
        script.polls = 2;
        script.outcome = Some(Ok(Value::from("arrived")));
    }

    assert_eq!(h.tick(), Running);
    assert_eq!(h.get("progress"), Some(Value::Int(1)));
    assert_eq!(h.innermost.map(|key| key.node), Some(h.tree.main()));
    assert_eq!(h.tick(), Running);
    assert_eq!(h.get("progress"), Some(Value::Int(0)));
    assert_eq!(h.tick(), Success);
    assert_eq!(h.get("result"), Some(Value::from("arrived")));
    assert_eq!(h.innermost, None);

    let script = h.script();
    assert_eq!(script.sessions, 1);
    assert_eq!(script.started.len(), 1);
    let request = &script.started[0];
    assert_eq!(request.service, "graph-nav");
    assert_eq!(request.fields["destination_waypoint_id"], serde_json::json!("dock"));
    assert_eq!(request.fields["travel_speed"], serde_json::json!(0.5));
}

#[test]
fn test_remote_operation_failure() {
    let mut h = Harness::new(r#"tree main = RobotCommand (command <- "sit")"#);
    h.script().outcome = Some(Err("motors off".to_owned()));
    assert_eq!(h.tick(), Fail);
    assert!(matches!(
        h.last_error(),
        Some(TickError::RemoteOperation(RemoteError::Operation { message, .. })) if message == "motors off"
    ));
}

#[test]
fn test_remote_session_failure() {
    let mut h = Harness::new(r#"tree main = NavigateTo (destination_waypoint_id <- "a")"#);
    h.script().refuse_sessions = true;
    assert_eq!(h.tick(), Fail);
    assert!(matches!(h.last_error(), Some(TickError::RemoteSession(_))));

    // Tried once per activation.
    assert_eq!(h.tick(), Fail);
    assert_eq!(h.script().sessions, 2);
    assert!(h.script().started.is_empty());

    let mut h = Harness::new(r#"tree main = RemoteGrpc (service <- "nope")"#);
    assert_eq!(h.tick(), Fail);
    assert_eq!(
        h.last_error(),
        Some(&TickError::RemoteSession(RemoteError::UnknownService(
            "nope".to_owned()
        )))
    );
}

#[test]
fn test_remote_start_retries() {
    let source = r#"tree main = NavigateTo (destination_waypoint_id <- "a")"#;
    let mut h = Harness::new(source);
    h.script().start_failures = 2;
    assert_eq!(h.tick(), Running);
    assert_eq!(h.tick(), Running);
    assert_eq!(h.tick(), Success);

    let mut h = Harness::new(source);
    h.script().start_failures = 3;
    assert_eq!(h.tick(), Running);
    assert_eq!(h.tick(), Running);
    assert_eq!(h.tick(), Fail);
    assert!(matches!(
        h.last_error(),
        Some(TickError::RemoteCall { attempts: 3, .. })
    ));
}

#[test]
fn test_remote_timeout_reissues() {
    let mut h = Harness::new(r#"tree main = NavigateTo (destination_waypoint_id <- "a", timeout <- 1)"#);
    h.script().never_finish = true;

    assert_eq!(h.tick(), Running);
    assert_eq!(h.at(1.5).tick(), Running);
    assert_eq!(h.at(1.6).tick(), Running);
    assert_eq!(h.at(3.).tick(), Running);
    assert_eq!(h.at(3.1).tick(), Running);
    assert_eq!(h.at(5.).tick(), Fail);
    assert!(matches!(
        h.last_error(),
        Some(TickError::RemoteCall {
            source: RemoteError::Timeout { .. },
            attempts: 3,
        })
    ));

    let script = h.script();
    assert_eq!(script.started.len(), 3);
    assert_eq!(script.cancelled.len(), 3);
}

#[test]
fn test_remote_poll_failures() {
    let source = r#"tree main = NavigateTo (destination_waypoint_id <- "a")"#;
    let mut h = Harness::new(source);
    h.script().poll_failures = 2;
    assert_eq!(h.tick(), Running);
    assert_eq!(h.tick(), Running);
    assert_eq!(h.tick(), Success);

    let mut h = Harness::new(source);
    h.script().poll_failures = 5;
    for _ in 0..4 {
        assert_eq!(h.tick(), Running);
    }
    assert_eq!(h.tick(), Fail);
    assert!(matches!(
        h.last_error(),
        Some(TickError::RemoteCall { attempts: 5, .. })
    ));
    assert_eq!(h.script().cancelled.len(), 1);
}

#[test]
fn test_innermost_running() {
    let mut h = Harness::new(
        r#"
tree main = Sequence {
    ConstantResult (result <- "success")
    Retry (max_attempts <- 2) {
        Sleep (seconds <- 1)
    }
}
"#,
    );
    let retry = h.child(h.tree.main(), 1);
    let sleep = h.child(retry, 0);
    assert_eq!(h.tick(), Running);
    assert_eq!(h.innermost, Some(StateKey::new(FrameId::ROOT, sleep)));
}

#[test]
fn test_reports_are_capped() {
    let mut h = Harness::new(r#"tree main = Condition (lhs <- missing, operation <- "==", rhs <- 1)"#);
    h.config.max_reports = 2;
    for _ in 0..5 {
        assert_eq!(h.tick(), Fail);
    }
    assert_eq!(h.reports.len(), 2);
}
