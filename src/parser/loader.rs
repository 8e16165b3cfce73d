use std::collections::{BTreeMap, HashMap, HashSet};

use super::nom_parser::{BlackboardValue, ParamDef, PortType, TreeDef, TreeRootDef, TreeSource};
use crate::{
    error::LoadError,
    node::{
        FieldMap, FieldType, Node, NodeIndex, NodeKind, NodeType, Override, ParameterDecl,
        ParameterValue, Tree, ValueSource,
    },
    value::{Value, ValueType},
};

/// Validates a parsed mission and lays it out as a node table.
///
/// Everything that can be checked without a blackboard is checked here:
/// node types and subtree names, field names and literal types, output
/// ports, child counts, parameter declarations and subtree recursion.
pub fn load(tree_source: &TreeSource) -> Result<Tree, LoadError> {
    let mut decls: HashMap<&str, Vec<ParameterDecl>> = HashMap::new();
    for tree in &tree_source.tree_defs {
        if decls.contains_key(tree.name.as_str()) {
            return Err(LoadError::DuplicateTree(tree.name.clone()));
        }
        decls.insert(&tree.name, param_decls(tree)?);
    }
    if !decls.contains_key("main") {
        return Err(LoadError::MissingTree);
    }

    let mut builder = Builder {
        nodes: vec![],
        decls: &decls,
    };
    let mut trees = HashMap::new();
    for tree in &tree_source.tree_defs {
        let root = builder.build(&tree.root, tree)?;
        let node = &mut builder.nodes[root.0];
        node.id = Some(tree.name.clone());
        node.parameters = decls[tree.name.as_str()].clone();
        trees.insert(tree.name.clone(), root);
    }

    let tree = Tree {
        nodes: builder.nodes,
        main: trees["main"],
        trees,
    };

    let mut verified = HashSet::new();
    for def in &tree_source.tree_defs {
        let top = TreeStack {
            name: &def.name,
            parent: None,
        };
        check_recursion(&tree, tree.trees[&def.name], &top, &mut verified)?;
        verified.insert(def.name.as_str());
    }

    Ok(tree)
}

fn param_decls(tree: &TreeRootDef) -> Result<Vec<ParameterDecl>, LoadError> {
    tree.params
        .iter()
        .map(|ParamDef { name, ty, default }| {
            let ty: ValueType = ty.parse().map_err(|_| LoadError::UnknownParameterType {
                tree: tree.name.clone(),
                parameter: name.clone(),
                ty: ty.clone(),
            })?;
            let default = default
                .clone()
                .map(|value| coerce_literal(&tree.name, name, value, ty))
                .transpose()?;
            Ok(ParameterDecl {
                name: name.clone(),
                ty,
                default,
            })
        })
        .collect()
}

fn coerce_literal(node: &str, field: &str, value: Value, ty: ValueType) -> Result<Value, LoadError> {
    let literal = value.to_string();
    value.coerce(ty).ok_or_else(|| LoadError::InvalidLiteral {
        node: node.to_owned(),
        field: field.to_owned(),
        expected: ty,
        literal,
    })
}

struct Builder<'a> {
    nodes: Vec<Node>,
    decls: &'a HashMap<&'a str, Vec<ParameterDecl>>,
}

impl<'a> Builder<'a> {
    /// Children are pushed before their parent, so a parent's index is
    /// always greater than its children's.
    fn build(&mut self, def: &TreeDef, tree: &TreeRootDef) -> Result<NodeIndex, LoadError> {
        let children = def
            .children
            .iter()
            .map(|child| self.build(child, tree))
            .collect::<Result<Vec<_>, _>>()?;

        let node = if let Some(ty) = NodeType::from_name(&def.ty) {
            self.configure(def, ty, children, tree)?
        } else if let Some(params) = self.decls.get(def.ty.as_str()) {
            reference(def, params, children, tree)?
        } else {
            return Err(LoadError::MissingNode(def.ty.clone()));
        };

        self.nodes.push(node);
        Ok(NodeIndex(self.nodes.len() - 1))
    }

    fn configure(
        &self,
        def: &TreeDef,
        ty: NodeType,
        children: Vec<NodeIndex>,
        tree: &TreeRootDef,
    ) -> Result<Node, LoadError> {
        let label = label(def);
        if !ty.arity().accepts(children.len()) {
            return Err(LoadError::ChildCount {
                node: label,
                expected: ty.arity().describe(),
                found: children.len(),
            });
        }

        let mut fields = FieldMap::new();
        let mut overrides = vec![];
        let mut outputs = BTreeMap::new();
        let mut assignments = vec![];

        for entry in &def.port_maps {
            let port = entry.node_port.as_str();
            if entry.ty == PortType::Output {
                let BlackboardValue::Ref(var) = &entry.blackboard_value else {
                    return Err(LoadError::LiteralOutput { node: label });
                };
                if !ty.outputs().contains(&port) {
                    return Err(LoadError::UnknownOutput {
                        node: label,
                        port: port.to_owned(),
                    });
                }
                outputs.insert(port.to_owned(), var.clone());
                continue;
            }

            let source = value_source(&entry.blackboard_value, tree)?;
            if ty.takes_assignments() {
                assignments.push((port.to_owned(), source));
                continue;
            }

            let spec = ty.field(port).ok_or_else(|| LoadError::UnknownField {
                node: label.clone(),
                field: port.to_owned(),
            })?;
            match (spec.ty, source) {
                (FieldType::Operand, source) => {
                    fields.insert(port.to_owned(), source);
                }
                (FieldType::Value(vt), ValueSource::Constant(value)) => {
                    let value = coerce_literal(&label, port, value, vt)?;
                    fields.insert(port.to_owned(), ValueSource::Constant(value));
                }
                (FieldType::Value(_), _) if port == "leases" => {
                    return Err(LoadError::StaticField {
                        node: label,
                        field: port.to_owned(),
                    });
                }
                (FieldType::Value(_), source) => overrides.push(Override {
                    field: port.to_owned(),
                    source,
                }),
            }
        }

        for spec in ty.fields().into_iter().filter(|spec| spec.required) {
            let overridden = overrides.iter().any(|o| o.field == spec.name);
            if !fields.contains_key(spec.name) && !overridden {
                return Err(LoadError::MissingField {
                    node: label,
                    field: spec.name.to_owned(),
                });
            }
        }

        let kind = match ty.configure(&fields) {
            Ok(kind) => Some(kind),
            // Completed by the overrides on every tick.
            Err(_) if !overrides.is_empty() => None,
            Err(source) => return Err(LoadError::Invalid { node: label, source }),
        };

        Ok(Node {
            name: def.name.clone(),
            id: None,
            ty,
            kind,
            fields,
            children,
            parameters: vec![],
            parameter_values: vec![],
            overrides,
            outputs,
            assignments,
        })
    }
}

fn label(def: &TreeDef) -> String {
    def.name.clone().unwrap_or_else(|| def.ty.clone())
}

fn value_source(value: &BlackboardValue, tree: &TreeRootDef) -> Result<ValueSource, LoadError> {
    Ok(match value {
        BlackboardValue::Literal(value) => ValueSource::Constant(value.clone()),
        BlackboardValue::Ref(path) => ValueSource::Variable(path.clone()),
        BlackboardValue::Param(name) => {
            if !tree.params.iter().any(|p| p.name == *name) {
                return Err(LoadError::UndeclaredParameter {
                    tree: tree.name.clone(),
                    parameter: name.clone(),
                });
            }
            ValueSource::Parameter(name.clone())
        }
    })
}

/// A call site of another tree. Its port entries bind the target's parameters.
fn reference(
    def: &TreeDef,
    params: &[ParameterDecl],
    children: Vec<NodeIndex>,
    tree: &TreeRootDef,
) -> Result<Node, LoadError> {
    let label = label(def);
    if !children.is_empty() {
        return Err(LoadError::ChildCount {
            node: label,
            expected: "no",
            found: children.len(),
        });
    }

    let mut parameter_values = vec![];
    for entry in &def.port_maps {
        if entry.ty == PortType::Output {
            return Err(LoadError::UnknownOutput {
                node: label,
                port: entry.node_port.clone(),
            });
        }
        let decl = params
            .iter()
            .find(|p| p.name == entry.node_port)
            .ok_or_else(|| LoadError::UnknownParameter {
                node: label.clone(),
                parameter: entry.node_port.clone(),
            })?;
        let source = match value_source(&entry.blackboard_value, tree)? {
            ValueSource::Constant(value) => {
                ValueSource::Constant(coerce_literal(&label, &decl.name, value, decl.ty)?)
            }
            source => source,
        };
        parameter_values.push(ParameterValue {
            name: decl.name.clone(),
            source,
        });
    }

    if let Some(missing) = params
        .iter()
        .find(|p| p.default.is_none() && !parameter_values.iter().any(|v| v.name == p.name))
    {
        return Err(LoadError::MissingParameter {
            node: label,
            parameter: missing.name.clone(),
        });
    }

    Ok(Node {
        name: def.name.clone(),
        id: None,
        ty: NodeType::Reference,
        kind: Some(NodeKind::Reference {
            target: def.ty.clone(),
        }),
        fields: FieldMap::new(),
        children,
        parameters: vec![],
        parameter_values,
        overrides: vec![],
        outputs: BTreeMap::new(),
        assignments: vec![],
    })
}

/// The chain of subtrees being expanded, kept on the call stack. A subtree
/// that is already somewhere up the chain would expand forever.
struct TreeStack<'a, 'src> {
    name: &'src str,
    parent: Option<&'a TreeStack<'a, 'src>>,
}

impl<'a, 'src> TreeStack<'a, 'src> {
    fn find(&self, name: &str) -> bool {
        if self.name == name {
            true
        } else if let Some(parent) = self.parent {
            parent.find(name)
        } else {
            false
        }
    }
}

fn check_recursion<'src>(
    tree: &'src Tree,
    index: NodeIndex,
    stack: &TreeStack<'_, 'src>,
    verified: &mut HashSet<&'src str>,
) -> Result<(), LoadError> {
    let node = &tree.nodes[index.0];
    if let Some(NodeKind::Reference { target }) = &node.kind {
        if stack.find(target) {
            return Err(LoadError::InfiniteRecursion {
                node: target.clone(),
            });
        }
        if verified.contains(target.as_str()) {
            return Ok(());
        }
        let root = tree
            .lookup(target)
            .ok_or_else(|| LoadError::MissingNode(target.clone()))?;
        let frame = TreeStack {
            name: target,
            parent: Some(stack),
        };
        check_recursion(tree, root, &frame, verified)?;
        verified.insert(target);
        return Ok(());
    }
    for child in &node.children {
        check_recursion(tree, *child, stack, verified)?;
    }
    Ok(())
}

#[cfg(test)]
mod test;
