use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, opt, recognize},
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

use crate::error::ParserError;
use crate::models::Schema;

/// Coarse classification of a Go type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Primitive,
    Interface,
    Unknown,
}

pub fn classify(type_name: &str) -> TypeClass {
    if primitive_mapping(type_name).is_some() {
        TypeClass::Primitive
    } else if is_interface_type(type_name) {
        TypeClass::Interface
    } else {
        TypeClass::Unknown
    }
}

pub fn is_basic_go_type(type_name: &str) -> bool {
    classify(type_name) == TypeClass::Primitive
}

pub fn is_interface_type(type_name: &str) -> bool {
    matches!(
        type_name.replace(' ', "").as_str(),
        "interface{}" | "any" | "error"
    )
}

/// OpenAPI `(type, format)` for a Go primitive.
pub fn primitive_mapping(type_name: &str) -> Option<(&'static str, Option<&'static str>)> {
    let mapping = match type_name {
        "bool" => ("boolean", None),
        "int" | "uint" | "int8" | "uint8" | "int16" | "uint16" | "byte" | "uintptr" => {
            ("integer", None)
        }
        "int32" | "uint32" | "rune" => ("integer", Some("int32")),
        "int64" | "uint64" => ("integer", Some("int64")),
        "float32" => ("number", Some("float")),
        "float64" => ("number", Some("double")),
        "complex64" | "complex128" => ("number", None),
        "string" => ("string", None),
        "time.Time" => ("string", Some("date-time")),
        _ => return None,
    };
    Some(mapping)
}

/// Inline schema for a Go primitive, if it is one.
pub fn primitive_schema(type_name: &str) -> Option<Schema> {
    primitive_mapping(type_name).map(|(type_, format)| Schema {
        type_: Some(type_.to_string()),
        format: format.map(str::to_string),
        ..Default::default()
    })
}

/// A parsed Go type expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoType {
    Named { package: Option<String>, name: String },
    Pointer(Box<GoType>),
    Array(Box<GoType>),
    Map { key: Box<GoType>, value: Box<GoType> },
    Interface,
    Struct,
}

impl GoType {
    pub fn parse(input: &str) -> Result<Self, ParserError> {
        let trimmed = input.trim();
        all_consuming(go_type)(trimmed)
            .map(|(_, parsed)| parsed)
            .map_err(|_| ParserError::TypeSyntaxError(input.to_string()))
    }

    pub fn named(package: Option<&str>, name: &str) -> Self {
        GoType::Named {
            package: package.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// `pkg.Name` or `Name` for named types.
    pub fn qualified_name(&self) -> Option<String> {
        match self {
            GoType::Named {
                package: Some(package),
                name,
            } => Some(format!("{}.{}", package, name)),
            GoType::Named { package: None, name } => Some(name.clone()),
            _ => None,
        }
    }

    /// Strips any number of pointer indirections.
    pub fn deref(&self) -> &GoType {
        match self {
            GoType::Pointer(inner) => inner.deref(),
            other => other,
        }
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Consumes a `{ ... }` block with nested braces.
fn braced_block(input: &str) -> IResult<&str, &str> {
    let (rest, _) = char('{')(input)?;
    let mut depth = 1usize;
    for (idx, c) in rest.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&rest[idx + 1..], &rest[..idx]));
                }
            }
            _ => {}
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::TakeUntil,
    )))
}

fn named_type(input: &str) -> IResult<&str, GoType> {
    map(
        pair(identifier, opt(preceded(char('.'), identifier))),
        |(first, second)| match second {
            Some(name) => GoType::named(Some(first), name),
            None => GoType::named(None, first),
        },
    )(input)
}

fn pointer_type(input: &str) -> IResult<&str, GoType> {
    map(preceded(char('*'), go_type), |inner| {
        GoType::Pointer(Box::new(inner))
    })(input)
}

fn array_type(input: &str) -> IResult<&str, GoType> {
    map(
        preceded(
            delimited(
                char('['),
                take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.'),
                char(']'),
            ),
            go_type,
        ),
        |inner| GoType::Array(Box::new(inner)),
    )(input)
}

fn map_type(input: &str) -> IResult<&str, GoType> {
    map(
        pair(
            delimited(tag("map["), go_type, char(']')),
            go_type,
        ),
        |(key, value)| GoType::Map {
            key: Box::new(key),
            value: Box::new(value),
        },
    )(input)
}

fn interface_type(input: &str) -> IResult<&str, GoType> {
    map(
        preceded(terminated(tag("interface"), multispace0), braced_block),
        |_| GoType::Interface,
    )(input)
}

fn struct_type(input: &str) -> IResult<&str, GoType> {
    map(
        preceded(terminated(tag("struct"), multispace0), braced_block),
        |_| GoType::Struct,
    )(input)
}

fn go_type(input: &str) -> IResult<&str, GoType> {
    delimited(
        multispace0,
        alt((
            pointer_type,
            map_type,
            array_type,
            interface_type,
            struct_type,
            named_type,
        )),
        multispace0,
    )(input)
}
