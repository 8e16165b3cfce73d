use nom::{
    branch::alt,
    bytes::complete::{is_not, tag},
    character::complete::{
        char, digit1, multispace0, newline, none_of, one_of, satisfy, space0,
    },
    combinator::{not, opt, peek, recognize, value},
    multi::{many0, many1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::{
    error::LoadError,
    format::{identifier, var_path},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    /// `field <- source`
    Input,
    /// `port -> variable`
    Output,
}

/// Right hand side of a port mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum BlackboardValue {
    Literal(Value),
    /// A blackboard variable, possibly a dotted field path.
    Ref(String),
    /// `$name`, a parameter of the enclosing tree.
    Param(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortMap {
    pub(crate) ty: PortType,
    pub(crate) node_port: String,
    pub(crate) blackboard_value: BlackboardValue,
}

impl PortMap {
    pub fn input(node_port: impl Into<String>, blackboard_value: BlackboardValue) -> Self {
        Self {
            ty: PortType::Input,
            node_port: node_port.into(),
            blackboard_value,
        }
    }

    pub fn output(node_port: impl Into<String>, var: impl Into<String>) -> Self {
        Self {
            ty: PortType::Output,
            node_port: node_port.into(),
            blackboard_value: BlackboardValue::Ref(var.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeDef {
    pub(crate) ty: String,
    pub(crate) name: Option<String>,
    pub(crate) port_maps: Vec<PortMap>,
    pub(crate) children: Vec<TreeDef>,
}

impl TreeDef {
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            name: None,
            port_maps: vec![],
            children: vec![],
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_ports(mut self, port_maps: Vec<PortMap>) -> Self {
        self.port_maps = port_maps;
        self
    }

    pub fn with_children(mut self, children: Vec<TreeDef>) -> Self {
        self.children = children;
        self
    }
}

/// A declared parameter of a tree, `name: type = default`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub(crate) name: String,
    pub(crate) ty: String,
    pub(crate) default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeRootDef {
    pub(crate) name: String,
    pub(crate) params: Vec<ParamDef>,
    pub(crate) root: TreeDef,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TreeSource {
    pub tree_defs: Vec<TreeRootDef>,
}

fn newlines(i: &str) -> IResult<&str, ()> {
    delimited(space0, many1(one_of("\r\n")), space0)(i).map(|(rest, _)| (rest, ()))
}

fn open_paren(i: &str) -> IResult<&str, ()> {
    value((), delimited(space0, char('('), space0))(i)
}

fn close_paren(i: &str) -> IResult<&str, ()> {
    value((), delimited(multispace0, char(')'), space0))(i)
}

fn open_brace(i: &str) -> IResult<&str, ()> {
    value((), delimited(space0, char('{'), space0))(i)
}

fn close_brace(i: &str) -> IResult<&str, ()> {
    value((), delimited(space0, char('}'), space0))(i)
}

fn line_comment(i: &str) -> IResult<&str, ()> {
    value((), tuple((space0, char('#'), opt(is_not("\n\r")))))(i)
}

fn quoted(input: &str) -> IResult<&str, String> {
    let (r, val) = delimited(char('"'), many0(none_of("\"")), char('"'))(input)?;
    Ok((
        r,
        val.iter()
            .collect::<String>()
            .replace("\\\\", "\\")
            .replace("\\n", "\n"),
    ))
}

/// Not followed by anything that would continue an identifier.
fn word_end(i: &str) -> IResult<&str, ()> {
    not(peek(satisfy(|c: char| c.is_alphanumeric() || c == '_')))(i)
}

fn number(i: &str) -> IResult<&str, Value> {
    let (r, text) = terminated(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        word_end,
    )(i)?;
    Ok((r, Value::parse_literal(text)))
}

fn boolean(i: &str) -> IResult<&str, Value> {
    terminated(
        alt((
            value(Value::Bool(true), tag("true")),
            value(Value::Bool(false), tag("false")),
        )),
        word_end,
    )(i)
}

fn literal(i: &str) -> IResult<&str, Value> {
    alt((
        |i| quoted(i).map(|(r, s)| (r, Value::String(s))),
        number,
        boolean,
    ))(i)
}

fn bb_value(i: &str) -> IResult<&str, BlackboardValue> {
    alt((
        |i| literal(i).map(|(r, v)| (r, BlackboardValue::Literal(v))),
        |i| {
            preceded(char('$'), identifier)(i)
                .map(|(r, name)| (r, BlackboardValue::Param(name.to_owned())))
        },
        |i| var_path(i).map(|(r, path)| (r, BlackboardValue::Ref(path.to_owned()))),
    ))(i)
}

fn port_map(i: &str) -> IResult<&str, PortMap> {
    let (i, node_port) = delimited(space0, identifier, space0)(i)?;

    let (i, arrow) = delimited(space0, alt((tag("<-"), tag("->"))), space0)(i)?;

    let (i, blackboard_value) = delimited(space0, bb_value, space0)(i)?;

    let ty = if arrow == "<-" {
        PortType::Input
    } else {
        PortType::Output
    };

    // Outputs go to variables only. It is a parse error rather than a load error.
    if ty == PortType::Output && !matches!(blackboard_value, BlackboardValue::Ref(_)) {
        return Err(nom::Err::Failure(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Verify,
        )));
    }

    Ok((
        i,
        PortMap {
            ty,
            node_port: node_port.to_owned(),
            blackboard_value,
        },
    ))
}

fn port_maps(i: &str) -> IResult<&str, Vec<PortMap>> {
    many0(delimited(
        multispace0,
        port_map,
        many0(pair(multispace0, char(','))),
    ))(i)
}

fn tree_children(i: &str) -> IResult<&str, Vec<TreeDef>> {
    let (i, _) = many0(newlines)(i)?;

    let (i, v) = many0(delimited(
        space0,
        alt((
            value(None, line_comment),
            |i| parse_tree_node(i).map(|(r, node)| (r, Some(node))),
        )),
        many0(newlines),
    ))(i)?;

    let (i, _) = many0(newlines)(i)?;

    Ok((i, v.into_iter().flatten().collect()))
}

/// `Type "optional label" (ports) { children }`
fn parse_tree_node(i: &str) -> IResult<&str, TreeDef> {
    let (i, ty) = delimited(space0, identifier, space0)(i)?;

    let (i, name) = opt(delimited(space0, quoted, space0))(i)?;

    let (i, port_maps) = opt(delimited(open_paren, port_maps, close_paren))(i)?;

    let (i, children) = opt(delimited(open_brace, tree_children, close_brace))(i)?;

    let (i, _) = opt(line_comment)(i)?;

    Ok((
        i,
        TreeDef {
            ty: ty.to_owned(),
            name,
            port_maps: port_maps.unwrap_or_default(),
            children: children.unwrap_or_default(),
        },
    ))
}

fn param_def(i: &str) -> IResult<&str, ParamDef> {
    let (i, name) = delimited(multispace0, identifier, space0)(i)?;
    let (i, ty) = preceded(delimited(space0, char(':'), space0), identifier)(i)?;
    let (i, default) = opt(preceded(delimited(space0, char('='), space0), literal))(i)?;
    let (i, _) = multispace0(i)?;
    Ok((
        i,
        ParamDef {
            name: name.to_owned(),
            ty: ty.to_owned(),
            default,
        },
    ))
}

fn params_def(i: &str) -> IResult<&str, Vec<ParamDef>> {
    delimited(
        open_paren,
        many0(terminated(param_def, opt(char(',')))),
        close_paren,
    )(i)
}

fn parse_tree(i: &str) -> IResult<&str, TreeRootDef> {
    let (i, _) = delimited(multispace0, tag("tree"), space0)(i)?;

    let (i, name) = delimited(space0, identifier, space0)(i)?;

    let (i, params) = opt(params_def)(i)?;

    let (i, _) = delimited(space0, tag("="), multispace0)(i)?;

    let (i, root) = parse_tree_node(i)?;

    Ok((
        i,
        TreeRootDef {
            name: name.to_owned(),
            params: params.unwrap_or_default(),
            root,
        },
    ))
}

pub fn parse_file(i: &str) -> IResult<&str, TreeSource> {
    let (i, stmts) = many0(alt((
        value(None, delimited(multispace0, line_comment, newline)),
        |i| parse_tree(i).map(|(r, tree)| (r, Some(tree))),
    )))(i)?;

    // Eat up trailing whitespace and a final comment
    let (i, _) = multispace0(i)?;
    let (i, _) = opt(line_comment)(i)?;
    let (i, _) = multispace0(i)?;

    Ok((
        i,
        TreeSource {
            tree_defs: stmts.into_iter().flatten().collect(),
        },
    ))
}

/// Parses a whole mission source, failing on anything left unconsumed.
pub fn parse_mission(source: &str) -> Result<TreeSource, LoadError> {
    let position = |rest: &str| {
        let offset = source.len() - rest.len();
        let line = source[..offset].matches('\n').count() + 1;
        let snippet: String = rest.chars().take(24).collect();
        format!("line {line}, near {snippet:?}")
    };
    match parse_file(source) {
        Ok(("", tree_source)) => Ok(tree_source),
        Ok((rest, _)) => Err(LoadError::Parse(format!(
            "unexpected input at {}",
            position(rest)
        ))),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(LoadError::Parse(format!(
            "{:?} at {}",
            e.code,
            position(e.input)
        ))),
        Err(nom::Err::Incomplete(_)) => Err(LoadError::Parse("incomplete input".to_owned())),
    }
}
