//! The mission tree as an index-addressed table of node definitions.
//!
//! Node kinds form a closed set ([`NodeType`]). Each kind declares a fixed
//! field schema, the output ports it may write and how many children it
//! takes. A node keeps its static configuration both as the typed
//! [`NodeKind`] used on most ticks and as the raw field map, which is what
//! overrides are merged into when a tick needs a rewritten configuration.
//!
//! Subtrees are shared, never copied: a `tree` definition is stored once and
//! invoked through lightweight [`NodeKind::Reference`] nodes that look the
//! target up by id at tick time.

use once_cell::sync::Lazy;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use crate::{
    blackboard::{Freshness, FreshnessRequirement},
    error::BindingError,
    value::{CompareOp, Value, ValueType},
    BehaviorResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub(crate) usize);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for NodeIndex {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a bound value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    Constant(Value),
    /// A declared parameter of the enclosing tree, written `$name`.
    Parameter(String),
    /// A blackboard variable or a dotted field path into one.
    Variable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDecl {
    pub name: String,
    pub ty: ValueType,
    pub default: Option<Value>,
}

/// Binds a declared parameter of a referenced tree at the call site.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterValue {
    pub name: String,
    pub source: ValueSource,
}

/// Rewrites one configuration field for the duration of a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub field: String,
    pub source: ValueSource,
}

pub type FieldMap = BTreeMap<String, ValueSource>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Grpc,
    NavigateTo,
    NavigateRoute,
    Localize,
    RobotCommand,
    Dock,
    Power,
    DataAcquisition,
    Prompt,
    Ptz,
}

impl RemoteOp {
    /// Service a node of this kind talks to unless `service` is set.
    pub fn default_service(self) -> &'static str {
        match self {
            Self::Grpc => "",
            Self::NavigateTo | Self::NavigateRoute | Self::Localize => "graph-nav",
            Self::RobotCommand => "robot-command",
            Self::Dock => "docking",
            Self::Power => "power",
            Self::DataAcquisition => "data-acquisition",
            Self::Prompt => "prompt",
            Self::Ptz => "ptz",
        }
    }

    /// Resources that must be leased before a node of this kind may run,
    /// unless `leases` is set.
    pub fn default_leases(self) -> &'static [&'static str] {
        match self {
            Self::NavigateTo | Self::NavigateRoute | Self::RobotCommand | Self::Dock => &["body"],
            Self::Power => &["body"],
            Self::Ptz => &["ptz"],
            Self::Grpc | Self::Localize | Self::DataAcquisition | Self::Prompt => &[],
        }
    }

    fn request_fields(self) -> &'static [FieldSpec] {
        match self {
            Self::Grpc => GRPC_FIELDS,
            Self::NavigateTo => NAVIGATE_TO_FIELDS,
            Self::NavigateRoute => NAVIGATE_ROUTE_FIELDS,
            Self::Localize => LOCALIZE_FIELDS,
            Self::RobotCommand => ROBOT_COMMAND_FIELDS,
            Self::Dock => DOCK_FIELDS,
            Self::Power => POWER_FIELDS,
            Self::DataAcquisition => DATA_ACQUISITION_FIELDS,
            Self::Prompt => PROMPT_FIELDS,
            Self::Ptz => PTZ_FIELDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Sequence,
    Selector,
    Repeat,
    Retry,
    ForDuration,
    SimpleParallel,
    Condition,
    RestartWhenPaused,
    DefineBlackboard,
    SetBlackboard,
    FormatBlackboard,
    DateToBlackboard,
    Sleep,
    ConstantResult,
    Reference,
    Remote(RemoteOp),
}

static NODE_TYPES: Lazy<HashMap<&'static str, NodeType>> = Lazy::new(|| {
    use NodeType::*;
    [
        ("Sequence", Sequence),
        ("Selector", Selector),
        ("Repeat", Repeat),
        ("Retry", Retry),
        ("ForDuration", ForDuration),
        ("SimpleParallel", SimpleParallel),
        ("Condition", Condition),
        ("RestartWhenPaused", RestartWhenPaused),
        ("DefineBlackboard", DefineBlackboard),
        ("SetBlackboard", SetBlackboard),
        ("FormatBlackboard", FormatBlackboard),
        ("DateToBlackboard", DateToBlackboard),
        ("Sleep", Sleep),
        ("ConstantResult", ConstantResult),
        ("RemoteGrpc", Remote(RemoteOp::Grpc)),
        ("NavigateTo", Remote(RemoteOp::NavigateTo)),
        ("NavigateRoute", Remote(RemoteOp::NavigateRoute)),
        ("Localize", Remote(RemoteOp::Localize)),
        ("RobotCommand", Remote(RemoteOp::RobotCommand)),
        ("Dock", Remote(RemoteOp::Dock)),
        ("PowerCommand", Remote(RemoteOp::Power)),
        ("DataAcquisition", Remote(RemoteOp::DataAcquisition)),
        ("Prompt", Remote(RemoteOp::Prompt)),
        ("Ptz", Remote(RemoteOp::Ptz)),
    ]
    .into_iter()
    .collect()
});

/// How many children a node kind takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    One,
    /// A child plus an optional fallback child.
    OneOrTwo,
    Two,
    Any,
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Self::None => n == 0,
            Self::One => n == 1,
            Self::OneOrTwo => n == 1 || n == 2,
            Self::Two => n == 2,
            Self::Any => true,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::None => "no",
            Self::One => "exactly one",
            Self::OneOrTwo => "one or two",
            Self::Two => "exactly two",
            Self::Any => "any number of",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Value(ValueType),
    /// Kept as a [`ValueSource`] and resolved by the node itself, so that it
    /// can apply its own staleness policy.
    Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
}

impl FieldSpec {
    const fn req(name: &'static str, ty: ValueType) -> Self {
        Self {
            name,
            ty: FieldType::Value(ty),
            required: true,
        }
    }

    const fn opt(name: &'static str, ty: ValueType) -> Self {
        Self {
            name,
            ty: FieldType::Value(ty),
            required: false,
        }
    }

    const fn operand(name: &'static str) -> Self {
        Self {
            name,
            ty: FieldType::Operand,
            required: true,
        }
    }
}

const REMOTE_COMMON: &[FieldSpec] = &[
    FieldSpec::opt("service", ValueType::String),
    FieldSpec::opt("host", ValueType::String),
    FieldSpec::opt("timeout", ValueType::Float),
    FieldSpec::opt("leases", ValueType::String),
];

const GRPC_FIELDS: &[FieldSpec] = &[
    FieldSpec::req("service", ValueType::String),
    FieldSpec::opt("input", ValueType::Message),
];
const NAVIGATE_TO_FIELDS: &[FieldSpec] = &[
    FieldSpec::req("destination_waypoint_id", ValueType::String),
    FieldSpec::opt("travel_speed", ValueType::Float),
];
const NAVIGATE_ROUTE_FIELDS: &[FieldSpec] = &[FieldSpec::req("waypoint_ids", ValueType::String)];
const LOCALIZE_FIELDS: &[FieldSpec] = &[FieldSpec::req("waypoint_id", ValueType::String)];
const ROBOT_COMMAND_FIELDS: &[FieldSpec] = &[
    FieldSpec::req("command", ValueType::String),
    FieldSpec::opt("params", ValueType::Message),
];
const DOCK_FIELDS: &[FieldSpec] = &[FieldSpec::req("docking_station_id", ValueType::Int)];
const POWER_FIELDS: &[FieldSpec] = &[FieldSpec::req("request", ValueType::String)];
const DATA_ACQUISITION_FIELDS: &[FieldSpec] = &[
    FieldSpec::req("action_name", ValueType::String),
    FieldSpec::opt("capabilities", ValueType::String),
];
const PROMPT_FIELDS: &[FieldSpec] = &[
    FieldSpec::req("text", ValueType::String),
    FieldSpec::opt("options", ValueType::String),
];
const PTZ_FIELDS: &[FieldSpec] = &[
    FieldSpec::opt("ptz_name", ValueType::String),
    FieldSpec::opt("pan", ValueType::Float),
    FieldSpec::opt("tilt", ValueType::Float),
    FieldSpec::opt("zoom", ValueType::Float),
];

impl NodeType {
    pub fn from_name(name: &str) -> Option<Self> {
        NODE_TYPES.get(name).copied()
    }

    pub fn arity(self) -> Arity {
        match self {
            Self::Sequence | Self::Selector => Arity::Any,
            Self::Repeat | Self::Retry | Self::RestartWhenPaused | Self::DefineBlackboard => {
                Arity::One
            }
            Self::ForDuration => Arity::OneOrTwo,
            Self::SimpleParallel => Arity::Two,
            Self::Condition
            | Self::SetBlackboard
            | Self::FormatBlackboard
            | Self::DateToBlackboard
            | Self::Sleep
            | Self::ConstantResult
            | Self::Reference
            | Self::Remote(_) => Arity::None,
        }
    }

    pub fn outputs(self) -> &'static [&'static str] {
        match self {
            Self::Repeat => &["start_counter"],
            Self::Retry => &["attempt"],
            Self::ForDuration => &["time_remaining"],
            Self::Remote(_) => &["response", "feedback"],
            _ => &[],
        }
    }

    /// Kinds whose port entries are blackboard assignments rather than fields.
    pub fn takes_assignments(self) -> bool {
        matches!(self, Self::DefineBlackboard | Self::SetBlackboard)
    }

    /// Field schema. Remote kinds concatenate the common remote fields with
    /// their request fields, so this returns owned specs.
    pub fn fields(self) -> Vec<FieldSpec> {
        use FieldSpec as F;
        match self {
            Self::Sequence | Self::Selector => vec![F::opt("always_restart", ValueType::Bool)],
            Self::Repeat => vec![F::req("max_starts", ValueType::Int)],
            Self::Retry => vec![F::req("max_attempts", ValueType::Int)],
            Self::ForDuration => vec![F::req("duration", ValueType::Float)],
            Self::Condition => vec![
                F::operand("lhs"),
                F::operand("rhs"),
                F::req("operation", ValueType::String),
                F::opt("handle_staleness", ValueType::String),
                F::opt("max_age", ValueType::Float),
            ],
            Self::FormatBlackboard => vec![
                F::req("key", ValueType::String),
                F::req("format", ValueType::String),
            ],
            Self::DateToBlackboard => vec![
                F::req("key", ValueType::String),
                F::opt("format", ValueType::String),
            ],
            Self::Sleep => vec![F::req("seconds", ValueType::Float)],
            Self::ConstantResult => vec![F::req("result", ValueType::String)],
            Self::Remote(op) => {
                let mut fields = REMOTE_COMMON.to_vec();
                for spec in op.request_fields() {
                    // RemoteGrpc makes `service` mandatory.
                    if let Some(common) = fields.iter_mut().find(|f| f.name == spec.name) {
                        *common = *spec;
                    } else {
                        fields.push(*spec);
                    }
                }
                fields
            }
            Self::SimpleParallel
            | Self::RestartWhenPaused
            | Self::DefineBlackboard
            | Self::SetBlackboard
            | Self::Reference => vec![],
        }
    }

    pub fn field(self, name: &str) -> Option<FieldSpec> {
        self.fields().into_iter().find(|f| f.name == name)
    }

    /// Builds the typed configuration from a field map whose value fields
    /// are all constants.
    pub fn configure(self, fields: &FieldMap) -> Result<NodeKind, BindingError> {
        let f = Fields(fields);
        Ok(match self {
            Self::Sequence => NodeKind::Sequence {
                always_restart: f.bool_or("always_restart", false)?,
            },
            Self::Selector => NodeKind::Selector {
                always_restart: f.bool_or("always_restart", false)?,
            },
            Self::Repeat => NodeKind::Repeat {
                max_starts: f.int("max_starts")?,
            },
            Self::Retry => NodeKind::Retry {
                max_attempts: f.int("max_attempts")?,
            },
            Self::ForDuration => NodeKind::ForDuration {
                duration: f.seconds("duration")?,
            },
            Self::SimpleParallel => NodeKind::SimpleParallel,
            Self::Condition => NodeKind::Condition(ConditionConfig::configure(&f)?),
            Self::RestartWhenPaused => NodeKind::RestartWhenPaused,
            Self::DefineBlackboard => NodeKind::DefineBlackboard,
            Self::SetBlackboard => NodeKind::SetBlackboard,
            Self::FormatBlackboard => NodeKind::FormatBlackboard {
                key: f.string("key")?,
                format: f.string("format")?,
            },
            Self::DateToBlackboard => NodeKind::DateToBlackboard {
                key: f.string("key")?,
                format: f.opt_string("format")?,
            },
            Self::Sleep => NodeKind::Sleep {
                duration: f.seconds("seconds")?,
            },
            Self::ConstantResult => {
                let result = f.string("result")?;
                NodeKind::ConstantResult(result.parse().map_err(|_| {
                    BindingError::InvalidValue {
                        field: "result".to_owned(),
                        value: result,
                    }
                })?)
            }
            Self::Reference => return Err(BindingError::MissingField("target".to_owned())),
            Self::Remote(op) => NodeKind::Remote(RemoteConfig::configure(op, &f)?),
        })
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = NODE_TYPES
            .iter()
            .find(|(_, ty)| *ty == self)
            .map(|(name, _)| *name)
            .unwrap_or("Reference");
        f.write_str(name)
    }
}

/// Typed accessors over a field map.
struct Fields<'a>(&'a FieldMap);

impl<'a> Fields<'a> {
    fn constant(&self, name: &str, ty: ValueType) -> Result<Option<Value>, BindingError> {
        match self.0.get(name) {
            None => Ok(None),
            Some(ValueSource::Constant(value)) => {
                let found = value.ty();
                value
                    .clone()
                    .coerce(ty)
                    .map(Some)
                    .ok_or_else(|| BindingError::TypeMismatch {
                        field: name.to_owned(),
                        expected: ty,
                        found,
                    })
            }
            // Unresolved sources never reach here for value fields.
            Some(_) => Err(BindingError::MissingField(name.to_owned())),
        }
    }

    fn required(&self, name: &str, ty: ValueType) -> Result<Value, BindingError> {
        self.constant(name, ty)?
            .ok_or_else(|| BindingError::MissingField(name.to_owned()))
    }

    fn int(&self, name: &str) -> Result<i64, BindingError> {
        Ok(self.required(name, ValueType::Int)?.as_int().unwrap_or_default())
    }

    fn bool_or(&self, name: &str, default: bool) -> Result<bool, BindingError> {
        Ok(self
            .constant(name, ValueType::Bool)?
            .and_then(|v| v.as_bool())
            .unwrap_or(default))
    }

    fn float(&self, name: &str) -> Result<Option<f64>, BindingError> {
        Ok(self
            .constant(name, ValueType::Float)?
            .and_then(|v| v.as_f64()))
    }

    fn seconds(&self, name: &str) -> Result<Duration, BindingError> {
        let seconds = self
            .float(name)?
            .ok_or_else(|| BindingError::MissingField(name.to_owned()))?;
        to_duration(name, seconds)
    }

    fn opt_seconds(&self, name: &str) -> Result<Option<Duration>, BindingError> {
        self.float(name)?
            .map(|seconds| to_duration(name, seconds))
            .transpose()
    }

    fn string(&self, name: &str) -> Result<String, BindingError> {
        self.opt_string(name)?
            .ok_or_else(|| BindingError::MissingField(name.to_owned()))
    }

    fn opt_string(&self, name: &str) -> Result<Option<String>, BindingError> {
        Ok(self.constant(name, ValueType::String)?.map(|v| v.to_string()))
    }

    fn source(&self, name: &str) -> Result<ValueSource, BindingError> {
        self.0
            .get(name)
            .cloned()
            .ok_or_else(|| BindingError::MissingField(name.to_owned()))
    }
}

fn to_duration(field: &str, seconds: f64) -> Result<Duration, BindingError> {
    if seconds.is_finite() && seconds >= 0. {
        Ok(Duration::from_secs_f64(seconds))
    } else {
        Err(BindingError::InvalidValue {
            field: field.to_owned(),
            value: seconds.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionConfig {
    pub lhs: ValueSource,
    pub rhs: ValueSource,
    pub operation: CompareOp,
    pub freshness: FreshnessRequirement,
}

impl ConditionConfig {
    fn configure(f: &Fields) -> Result<Self, BindingError> {
        let operation = f.string("operation")?;
        let operation = operation
            .parse()
            .map_err(|value| BindingError::InvalidValue {
                field: "operation".to_owned(),
                value,
            })?;
        let policy = match f.opt_string("handle_staleness")?.as_deref() {
            None | Some("read_anyway") => Freshness::ReadAnyway,
            Some("block_until_fresh") => Freshness::BlockUntilFresh,
            Some("fail_if_stale") => Freshness::FailIfStale,
            Some(other) => {
                return Err(BindingError::InvalidValue {
                    field: "handle_staleness".to_owned(),
                    value: other.to_owned(),
                })
            }
        };
        Ok(Self {
            lhs: f.source("lhs")?,
            rhs: f.source("rhs")?,
            operation,
            freshness: FreshnessRequirement {
                policy,
                max_age: f.opt_seconds("max_age")?,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub op: RemoteOp,
    pub service: String,
    pub host: String,
    /// Bounds a single outstanding request, not the node's whole run.
    pub timeout: Option<Duration>,
    pub leases: Vec<String>,
    pub request: serde_json::Map<String, serde_json::Value>,
}

impl RemoteConfig {
    fn configure(op: RemoteOp, f: &Fields) -> Result<Self, BindingError> {
        let service = f
            .opt_string("service")?
            .unwrap_or_else(|| op.default_service().to_owned());
        if service.is_empty() {
            return Err(BindingError::MissingField("service".to_owned()));
        }
        let leases = match f.opt_string("leases")? {
            Some(list) => split_leases(&list),
            None => op.default_leases().iter().map(|s| s.to_string()).collect(),
        };
        let mut request = serde_json::Map::new();
        for spec in op.request_fields() {
            let FieldType::Value(ty) = spec.ty else {
                continue;
            };
            if spec.name == "service" {
                continue;
            }
            match f.constant(spec.name, ty)? {
                Some(value) => {
                    request.insert(spec.name.to_owned(), value.to_json());
                }
                None if spec.required => {
                    return Err(BindingError::MissingField(spec.name.to_owned()))
                }
                None => (),
            }
        }
        Ok(Self {
            op,
            service,
            host: f.opt_string("host")?.unwrap_or_default(),
            timeout: f.opt_seconds("timeout")?,
            leases,
            request,
        })
    }
}

fn split_leases(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Typed configuration of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Sequence { always_restart: bool },
    Selector { always_restart: bool },
    /// `max_starts < 0` repeats forever.
    Repeat { max_starts: i64 },
    Retry { max_attempts: i64 },
    ForDuration { duration: Duration },
    SimpleParallel,
    Condition(ConditionConfig),
    RestartWhenPaused,
    DefineBlackboard,
    SetBlackboard,
    FormatBlackboard { key: String, format: String },
    DateToBlackboard { key: String, format: Option<String> },
    Sleep { duration: Duration },
    ConstantResult(BehaviorResult),
    Reference { target: String },
    Remote(RemoteConfig),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: Option<String>,
    /// Set on the root of a `tree` definition; references look nodes up by it.
    pub(crate) id: Option<String>,
    pub(crate) ty: NodeType,
    /// `None` when a required field is only ever supplied by an override, in
    /// which case the configuration is built on every tick.
    pub(crate) kind: Option<NodeKind>,
    pub(crate) fields: FieldMap,
    pub(crate) children: Vec<NodeIndex>,
    pub(crate) parameters: Vec<ParameterDecl>,
    pub(crate) parameter_values: Vec<ParameterValue>,
    pub(crate) overrides: Vec<Override>,
    pub(crate) outputs: BTreeMap<String, String>,
    pub(crate) assignments: Vec<(String, ValueSource)>,
}

impl Node {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn node_type(&self) -> NodeType {
        self.ty
    }

    pub fn kind(&self) -> Option<&NodeKind> {
        self.kind.as_ref()
    }

    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    pub fn parameters(&self) -> &[ParameterDecl] {
        &self.parameters
    }

    pub fn overrides(&self) -> &[Override] {
        &self.overrides
    }

    /// Blackboard variable an output port writes to, if mapped.
    pub fn output(&self, port: &str) -> Option<&str> {
        self.outputs.get(port).map(String::as_str)
    }

    /// Human readable label for logs and feedback.
    pub fn label(&self) -> String {
        match (&self.name, &self.kind) {
            (Some(name), _) => name.clone(),
            (None, Some(NodeKind::Reference { target })) => target.clone(),
            (None, _) => self.ty.to_string(),
        }
    }

    /// Lease resources a remote node needs. Taken from the static `leases`
    /// field, which cannot be overridden, or the kind's defaults.
    pub fn lease_resources(&self) -> Vec<String> {
        let NodeType::Remote(op) = self.ty else {
            return vec![];
        };
        match self.fields.get("leases") {
            Some(ValueSource::Constant(list)) => split_leases(&list.to_string()),
            _ => op.default_leases().iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A loaded, validated mission tree.
#[derive(Debug, Clone)]
pub struct Tree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) trees: HashMap<String, NodeIndex>,
    pub(crate) main: NodeIndex,
}

impl Tree {
    pub fn main(&self) -> NodeIndex {
        self.main
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.0)
    }

    /// Finds the root of the tree definition named `id`.
    pub fn lookup(&self, id: &str) -> Option<NodeIndex> {
        self.trees.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIndex(i), n))
    }

    /// Every distinct lease resource named by a remote node anywhere in the tree.
    pub fn lease_resources(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .flat_map(|node| node.lease_resources())
            .collect()
    }
}

#[cfg(test)]
mod test;
