//! Template strings with blackboard placeholders, e.g. `"battery at {charge:.1f}%"`.
//!
//! Placeholders are `{name}` or `{name:.Nf}`, where `name` may be a dotted
//! field path into a structured value. `{{` and `}}` produce literal braces.
//! Rendering is all-or-nothing: any placeholder that fails to resolve fails
//! the whole template and no partial string is returned.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while1},
    character::complete::{alpha1, alphanumeric1, char, digit1, space0},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};

use crate::{error::BlackboardError, value::Value};

pub(crate) fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

/// A variable name optionally followed by `.field` segments. Segments may be
/// numeric to index into arrays.
pub(crate) fn var_path(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        identifier,
        many0(preceded(
            char('.'),
            take_while1(|c: char| c.is_alphanumeric() || c == '_'),
        )),
    ))(input)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Piece<'src> {
    Text(&'src str),
    Var {
        path: &'src str,
        precision: Option<usize>,
    },
}

fn text(i: &str) -> IResult<&str, Piece> {
    alt((
        value(Piece::Text("{"), tag("{{")),
        value(Piece::Text("}"), tag("}}")),
        map(is_not("{}"), Piece::Text),
    ))(i)
}

fn placeholder(i: &str) -> IResult<&str, Piece> {
    let (i, _) = char('{')(i)?;
    let (i, path) = delimited(space0, var_path, space0)(i)?;
    let (i, precision) = opt(delimited(
        tag(":."),
        map_res(digit1, |digits: &str| digits.parse::<usize>()),
        char('f'),
    ))(i)?;
    let (i, _) = preceded(space0, char('}'))(i)?;
    Ok((i, Piece::Var { path, precision }))
}

pub(crate) fn parse_template(template: &str) -> Result<Vec<Piece>, BlackboardError> {
    all_consuming(many0(alt((text, placeholder))))(template)
        .map(|(_, pieces)| pieces)
        .map_err(|_| BlackboardError::MalformedFormat(template.to_owned()))
}

/// Renders `template`, resolving each placeholder path through `lookup`.
pub fn render(
    template: &str,
    mut lookup: impl FnMut(&str) -> Result<Value, BlackboardError>,
) -> Result<String, BlackboardError> {
    let mut out = String::with_capacity(template.len());
    for piece in parse_template(template)? {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Var {
                path,
                precision: None,
            } => out.push_str(&lookup(path)?.to_string()),
            Piece::Var {
                path,
                precision: Some(precision),
            } => {
                let value = lookup(path)?;
                let number = value.as_f64().ok_or_else(|| BlackboardError::TypeMismatch {
                    name: path.to_owned(),
                    expected: "a number",
                    found: value.ty(),
                })?;
                out.push_str(&format!("{:.*}", precision, number));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod test;
