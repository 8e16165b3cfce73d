//! Mission trees written in YAML.
//!
//! ```yaml
//! behavior_tree:
//!   main:
//!     type: Sequence
//!     children:
//!       - type: go
//!         ports: { target: dock }
//!   go:
//!     parameters:
//!       target: string
//!       speed: { type: float, default: 0.5 }
//!     type: NavigateTo
//!     ports:
//!       destination_waypoint_id: $target
//!       travel_speed: $speed
//!     outputs:
//!       response: nav_result
//! ```
//!
//! Port values are literals, except `$name` which refers to a parameter and
//! `{ var: path }` which refers to a blackboard variable.

use serde_yaml::Value as Yaml;

use super::{
    loader::load,
    nom_parser::{BlackboardValue, ParamDef, PortMap, TreeDef, TreeRootDef, TreeSource},
};
use crate::{error::LoadError, node::Tree, value::Value};

fn malformed(what: impl std::fmt::Display) -> LoadError {
    LoadError::Parse(format!("malformed YAML mission: {what}"))
}

fn literal(value: &Yaml) -> Result<Value, LoadError> {
    let json: serde_json::Value = serde_yaml::from_value(value.clone())?;
    Ok(Value::from_json(json))
}

fn port_value(value: &Yaml) -> Result<BlackboardValue, LoadError> {
    if let Some(var) = value.get("var") {
        let path = var
            .as_str()
            .ok_or_else(|| malformed("`var` must be a string"))?;
        return Ok(BlackboardValue::Ref(path.to_owned()));
    }
    if let Some(param) = value.as_str().and_then(|s| s.strip_prefix('$')) {
        return Ok(BlackboardValue::Param(param.to_owned()));
    }
    Ok(BlackboardValue::Literal(literal(value)?))
}

fn recurse_parse(value: &Yaml) -> Result<TreeDef, LoadError> {
    let ty = value
        .get("type")
        .and_then(Yaml::as_str)
        .ok_or_else(|| malformed("node without a `type`"))?;
    let mut node = TreeDef::new(ty);

    if let Some(name) = value.get("name") {
        let name = name
            .as_str()
            .ok_or_else(|| malformed(format!("name of {ty} must be a string")))?;
        node = node.with_name(name);
    }

    let mut port_maps = vec![];
    if let Some(Yaml::Mapping(ports)) = value.get("ports") {
        for (key, value) in ports {
            let key = key
                .as_str()
                .ok_or_else(|| malformed(format!("port names of {ty} must be strings")))?;
            port_maps.push(PortMap::input(key, port_value(value)?));
        }
    }
    if let Some(Yaml::Mapping(outputs)) = value.get("outputs") {
        for (key, value) in outputs {
            let (Some(key), Some(var)) = (key.as_str(), value.as_str()) else {
                return Err(malformed(format!("outputs of {ty} must map names to variables")));
            };
            port_maps.push(PortMap::output(key, var));
        }
    }

    let mut children = vec![];
    if let Some(Yaml::Sequence(items)) = value.get("children") {
        for child in items {
            children.push(recurse_parse(child)?);
        }
    }

    Ok(node.with_ports(port_maps).with_children(children))
}

fn param_defs(value: &Yaml) -> Result<Vec<ParamDef>, LoadError> {
    let Some(Yaml::Mapping(params)) = value.get("parameters") else {
        return Ok(vec![]);
    };
    params
        .iter()
        .map(|(name, decl)| {
            let name = name
                .as_str()
                .ok_or_else(|| malformed("parameter names must be strings"))?;
            let (ty, default) = match decl {
                Yaml::String(ty) => (ty.as_str(), None),
                _ => (
                    decl.get("type")
                        .and_then(Yaml::as_str)
                        .ok_or_else(|| malformed(format!("parameter {name} has no type")))?,
                    decl.get("default").map(literal).transpose()?,
                ),
            };
            Ok(ParamDef {
                name: name.to_owned(),
                ty: ty.to_owned(),
                default,
            })
        })
        .collect()
}

pub fn parse_yaml(yaml: &str) -> Result<TreeSource, LoadError> {
    let yaml: Yaml = serde_yaml::from_str(yaml)?;
    let Some(Yaml::Mapping(roots)) = yaml.get("behavior_tree") else {
        return Err(malformed("missing `behavior_tree` mapping"));
    };
    let tree_defs = roots
        .iter()
        .map(|(name, value)| {
            let name = name
                .as_str()
                .ok_or_else(|| malformed("tree names must be strings"))?;
            Ok(TreeRootDef {
                name: name.to_owned(),
                params: param_defs(value)?,
                root: recurse_parse(value)?,
            })
        })
        .collect::<Result<_, LoadError>>()?;
    Ok(TreeSource { tree_defs })
}

pub fn load_yaml(yaml: &str) -> Result<Tree, LoadError> {
    load(&parse_yaml(yaml)?)
}
