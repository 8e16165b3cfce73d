mod loader;
mod nom_parser;
mod yaml_parser;

pub use self::{
    loader::load,
    nom_parser::{
        parse_file, parse_mission, BlackboardValue, ParamDef, PortMap, PortType, TreeDef,
        TreeRootDef, TreeSource,
    },
    yaml_parser::{load_yaml, parse_yaml},
};

use crate::{error::LoadError, node::Tree};

/// Parses and loads a mission written in the tree DSL.
pub fn load_str(source: &str) -> Result<Tree, LoadError> {
    load(&parse_mission(source)?)
}
