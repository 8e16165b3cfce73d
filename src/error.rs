use std::time::Duration;
use thiserror::Error;

use crate::value::ValueType;

#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum BlackboardError {
    #[error("Variable {0:?} is not defined in any enclosing scope")]
    NotFound(String),
    #[error("Variable {0:?} is already defined in this scope")]
    DuplicateDefinition(String),
    #[error("Cannot write to undefined variable {0:?}")]
    UndefinedVariable(String),
    #[error("Variable {name:?} is stale: written {age:?} ago, max age {max_age:?}")]
    StaleValue {
        name: String,
        age: Duration,
        max_age: Duration,
    },
    #[error("Variable {name:?} has no field {segment:?}")]
    InvalidPath { name: String, segment: String },
    #[error("Variable {name:?} holds a {found}, which cannot be used as {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: ValueType,
    },
    #[error("Malformed format string {0:?}")]
    MalformedFormat(String),
    #[error("Blackboard scope was already torn down")]
    ScopeGone,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum BindingError {
    #[error(transparent)]
    Blackboard(#[from] BlackboardError),
    #[error("Parameter {0:?} is not bound in this invocation")]
    UnboundParameter(String),
    #[error("Field {field:?} expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: ValueType,
        found: ValueType,
    },
    #[error("Field {0:?} is required but has no value")]
    MissingField(String),
    #[error("Field {field:?} has invalid value {value:?}")]
    InvalidValue { field: String, value: String },
    #[error("Cannot compare {lhs} with {rhs}")]
    Incomparable { lhs: ValueType, rhs: ValueType },
}

#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("No remote service registered as {0:?}")]
    UnknownService(String),
    #[error("Could not establish a session with {service:?}: {message}")]
    Session { service: String, message: String },
    #[error("Request to {service:?} failed: {message}")]
    Call { service: String, message: String },
    #[error("Request to {service:?} timed out after {after:?}")]
    Timeout { service: String, after: Duration },
    #[error("{service:?} reported the operation failed: {message}")]
    Operation { service: String, message: String },
}

/// Node-local failure, reported through feedback and never fatal to the runner.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum TickError {
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Blackboard(#[from] BlackboardError),
    #[error(transparent)]
    RemoteSession(RemoteError),
    #[error("{source} (retries exhausted after {attempts} attempts)")]
    RemoteCall { source: RemoteError, attempts: u32 },
    #[error(transparent)]
    RemoteOperation(RemoteError),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("The main tree does not exist")]
    MissingTree,
    #[error("Tree {0:?} is defined more than once")]
    DuplicateTree(String),
    #[error("Node type or subtree name not found {0:?}")]
    MissingNode(String),
    #[error("Infinite recursion detected in subtree {node:?}")]
    InfiniteRecursion { node: String },
    #[error("Node {node:?} has no field {field:?}")]
    UnknownField { node: String, field: String },
    #[error("Node {node:?} requires field {field:?}")]
    MissingField { node: String, field: String },
    #[error("Field {field:?} of node {node:?} expects {expected}, got {literal:?}")]
    InvalidLiteral {
        node: String,
        field: String,
        expected: ValueType,
        literal: String,
    },
    #[error("Node {node:?}: {source}")]
    Invalid { node: String, source: BindingError },
    #[error("Node {node:?} has no output port {port:?}")]
    UnknownOutput { node: String, port: String },
    #[error("Field {field:?} of node {node:?} must be a literal")]
    StaticField { node: String, field: String },
    #[error("Node {node:?} cannot write an output to a literal")]
    LiteralOutput { node: String },
    #[error("Tree {tree:?} references undeclared parameter ${parameter}")]
    UndeclaredParameter { tree: String, parameter: String },
    #[error("Subtree {node:?} has no parameter {parameter:?}")]
    UnknownParameter { node: String, parameter: String },
    #[error("Subtree {node:?} requires parameter {parameter:?}")]
    MissingParameter { node: String, parameter: String },
    #[error("Parameter {parameter:?} of {tree:?} has unknown type {ty:?}")]
    UnknownParameterType {
        tree: String,
        parameter: String,
        ty: String,
    },
    #[error("Node {node:?} takes {expected} children, got {found}")]
    ChildCount {
        node: String,
        expected: &'static str,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum LeaseError {
    #[error("Lease for resource {resource:?} is held by {holder:?}")]
    Unavailable { resource: String, holder: String },
    #[error("Lease for resource {0:?} was revoked")]
    Revoked(String),
    #[error("Lease for resource {0:?} is not held")]
    NotHeld(String),
}

/// Broken internal invariant. These stop the runner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("Node index {0} is out of range")]
    InvalidNode(usize),
    #[error("Node {0} is missing a child")]
    MissingChild(usize),
    #[error("Reference target {0:?} disappeared from the loaded tree")]
    MissingTree(String),
    #[error("Lease bookkeeping is corrupted: {0}")]
    LeaseBookkeeping(String),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MissionError {
    #[error("No mission tree is loaded")]
    NotLoaded,
    #[error("The mission is not playing")]
    NotPlaying,
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Configuration error: {0}")]
    Config(String),
}
