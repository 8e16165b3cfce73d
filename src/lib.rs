//! # mission-tree-lite (Rust crate)
//!
//! A tick-driven behavior tree interpreter for scripted robot missions.
//!
//!
//! ## Overview
//!
//! A mission is a behavior tree loaded from text at runtime. The
//! [`MissionRunner`] ticks it periodically; each tick walks the active part of
//! the tree and returns `Success`, `Fail` or `Running`. Leaves either act on
//! the blackboard (a scoped key-value store shared by the whole mission) or
//! delegate work to remote robot services, which they start once and then
//! poll on every tick without ever blocking.
//!
//! Trees are immutable once loaded. The progress of running nodes is kept in
//! a separate state arena, so a mission can be paused, stopped, resumed or
//! restarted from the top at any point between ticks.
//!
//!
//! ## How it looks like
//!
//! ```rust
//! use mission_tree_lite::{
//!     BehaviorResult, LocalLeaseProvider, MissionConfig, MissionRunner, RemoteClient,
//! };
//!
//! let mut runner = MissionRunner::new(
//!     MissionConfig::default(),
//!     RemoteClient::new(),
//!     LocalLeaseProvider::new(),
//! );
//! runner.define("battery", 80).unwrap();
//! runner
//!     .load_str(
//!         r#"
//! tree main = Sequence {
//!     Condition (lhs <- battery, operation <- ">", rhs <- 20)
//!     ConstantResult (result <- "success")
//! }
//! "#,
//!     )
//!     .unwrap();
//! runner.play().unwrap();
//! assert_eq!(runner.tick().unwrap(), BehaviorResult::Success);
//! ```
//!
//! Remote services are registered on the [`RemoteClient`] under the service
//! name the nodes refer to. Anything that can do its work in a blocking
//! function can be wrapped in a [`ThreadedService`]:
//!
//! ```rust
//! use mission_tree_lite::{RemoteClient, ThreadedService, Value};
//!
//! let nav = ThreadedService::new(|request, progress| {
//!     progress.feedback(Value::from("moving"));
//!     Ok(Value::from(format!("reached {}", request.fields["destination_waypoint_id"])))
//! });
//! let client = RemoteClient::new().with_service("graph-nav", nav);
//! ```
//!
//!
//! ## The mission file format
//!
//! ```raw
//! # Patrol two waypoints, then go home.
//! tree main = Sequence {
//!     visit (target <- "tank-1")
//!     visit (target <- "tank-2", speed <- 1.0)
//!     Dock (docking_station_id <- 520)
//! }
//!
//! tree visit(target: string, speed: float = 0.5) = Retry (max_attempts <- 3) {
//!     NavigateTo (
//!         destination_waypoint_id <- $target
//!         travel_speed <- $speed
//!         response -> nav_result
//!     )
//! }
//! ```
//!
//! A file is a list of `tree` definitions, one of which must be called
//! `main`. Anything after a `#` up to the end of the line is a comment.
//!
//! ### Nodes
//!
//! A node starts with its type, optionally followed by a quoted label used in
//! logs and feedback, a port list in parentheses and children in braces.
//! Port entries are separated by commas or newlines.
//!
//! ```raw
//! Sleep "settle" (seconds <- 2)
//! ```
//!
//! The arrow says which way data flows.
//!
//! ```raw
//! a <- "text"     configure field `a` with a literal
//! a <- 42         numbers and `true` / `false` need no quotes
//! a <- state.x    read field `a` from a blackboard variable (or a path into one)
//! a <- $param     read field `a` from a parameter of the enclosing tree
//! a -> var        write output port `a` to blackboard variable `var`
//! ```
//!
//! A field bound to a variable or parameter is an override: it is resolved
//! and type checked on every tick, so the node always runs with the latest
//! value. Everything else is checked when the file is loaded.
//!
//! ### Subtrees
//!
//! Any tree can be used as a node by name. Its parameters are typed
//! (`bool`, `int`, `float`, `string`, `message`) and may have a default.
//! Arguments are evaluated in the caller's scope every time the subtree is
//! entered. A subtree used in several places is stored once, but every use
//! keeps its own run state.
//!
//! ### Node types
//!
//! | Node | Children | Fields | Outputs |
//! |------|----------|--------|---------|
//! | `Sequence`, `Selector` | any | `always_restart` | |
//! | `Repeat` | 1 | `max_starts` (negative repeats forever) | `start_counter` |
//! | `Retry` | 1 | `max_attempts` | `attempt` |
//! | `ForDuration` | 1, plus an optional timeout child | `duration` | `time_remaining` |
//! | `SimpleParallel` | 2 | | |
//! | `Condition` | | `lhs`, `operation`, `rhs`, `handle_staleness`, `max_age` | |
//! | `RestartWhenPaused` | 1 | | |
//! | `DefineBlackboard` | 1 | variables to define | |
//! | `SetBlackboard` | | variables to assign | |
//! | `FormatBlackboard` | | `key`, `format` | |
//! | `DateToBlackboard` | | `key`, `format` | |
//! | `Sleep` | | `seconds` | |
//! | `ConstantResult` | | `result` | |
//! | `RemoteGrpc`, `NavigateTo`, `NavigateRoute`, `Localize`, `RobotCommand`, `Dock`, `PowerCommand`, `DataAcquisition`, `Prompt`, `Ptz` | | request fields, `service`, `host`, `timeout`, `leases` | `response`, `feedback` |
//!
//! ### Loading from YAML
//!
//! The same trees can be written in YAML; see [`parser::load_yaml`].
//!
//! ```yaml
//! behavior_tree:
//!   main:
//!     type: Sequence
//!     children:
//!       - type: visit
//!         ports: { target: tank-1 }
//!   visit:
//!     parameters:
//!       target: string
//!     type: NavigateTo
//!     ports:
//!       destination_waypoint_id: $target
//! ```

pub(crate) mod binding;
pub mod blackboard;
pub mod clock;
pub mod config;
mod context;
pub mod error;
mod format;
pub mod lease;
mod mission;
pub mod node;
mod nodes;
pub mod parser;
pub mod remote;
pub mod state;
pub mod value;

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

pub use crate::{
    blackboard::{Blackboard, Freshness, FreshnessRequirement},
    clock::{Clock, ManualClock, SystemClock},
    config::{MissionConfig, RetryPolicies, RetryPolicy},
    context::{Context, NodeReport},
    error::{LoadError, MissionError},
    format::render,
    lease::{LeaseProvider, LeaseSet, LocalLeaseProvider},
    mission::{ActiveNode, MissionFeedback, MissionRunner, RunnerState},
    node::{NodeIndex, Tree},
    nodes::tick,
    parser::{load_str, load_yaml, parse_file},
    remote::{CallStatus, Progress, RemoteClient, RemoteRequest, RemoteService, ThreadedService},
    value::Value,
};

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum BehaviorResult {
    Success,
    Fail,
    /// The node should keep running in the next tick
    Running,
}

impl FromStr for BehaviorResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "fail" | "failure" => Ok(Self::Fail),
            "running" => Ok(Self::Running),
            _ => Err(s.to_owned()),
        }
    }
}

impl Display for BehaviorResult {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Fail => "failure",
            Self::Running => "running",
        })
    }
}
