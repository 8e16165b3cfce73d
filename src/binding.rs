//! Values that are only known at tick time: overridden configuration fields
//! and the parameters of an invoked subtree.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::{
    context::Context,
    error::BindingError,
    node::{FieldType, Node, NodeKind, ParameterDecl, ParameterValue, ValueSource},
    value::Value,
};

/// The configuration a node runs with on this tick.
///
/// Nodes without overrides use their static configuration. Otherwise every
/// override is resolved, coerced to its field's type and merged into a copy
/// of the static fields, which is discarded after the tick.
pub(crate) fn effective_kind<'n>(
    node: &'n Node,
    ctx: &Context,
) -> Result<Cow<'n, NodeKind>, BindingError> {
    if node.overrides.is_empty() {
        if let Some(kind) = &node.kind {
            return Ok(Cow::Borrowed(kind));
        }
    }

    let mut fields = node.fields.clone();
    for over in &node.overrides {
        let value = ctx.get(&over.source)?;
        let value = match node.ty.field(&over.field).map(|spec| spec.ty) {
            Some(FieldType::Value(ty)) => coerce(&over.field, value, ty)?,
            _ => value,
        };
        fields.insert(over.field.clone(), ValueSource::Constant(value));
    }
    Ok(Cow::Owned(node.ty.configure(&fields)?))
}

/// Evaluates a reference node's arguments in the caller's context.
pub(crate) fn bind_parameters(
    decls: &[ParameterDecl],
    values: &[ParameterValue],
    ctx: &Context,
) -> Result<HashMap<String, Value>, BindingError> {
    decls
        .iter()
        .map(|decl| {
            let value = match values.iter().find(|v| v.name == decl.name) {
                Some(bound) => ctx.get(&bound.source)?,
                None => decl
                    .default
                    .clone()
                    .ok_or_else(|| BindingError::UnboundParameter(decl.name.clone()))?,
            };
            Ok((decl.name.clone(), coerce(&decl.name, value, decl.ty)?))
        })
        .collect()
}

fn coerce(field: &str, value: Value, ty: crate::value::ValueType) -> Result<Value, BindingError> {
    let found = value.ty();
    value.coerce(ty).ok_or_else(|| BindingError::TypeMismatch {
        field: field.to_owned(),
        expected: ty,
        found,
    })
}
