use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ParserError;
use crate::models::HttpMethod;

static ROUTE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\w./\-{}]+)[^\[]+\[([^\]]+)").unwrap());

static RESPONSE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\d+)\s*([\w{}]+)?\s+([\w\-./\[\]*]+(?:\{[^}"]*\})?)?[^"]*(.*)?"#).unwrap()
});

static PARAM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([-\w]+)\s+(\w+)\s+([\w\-./\[\]*]+(?:\{[^}"]*\})?)\s+(\w+)\s+"([^"]*)""#).unwrap()
});

static HEADER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(\S+)\s+(\S+)\s+(\S+)\s+"([^"]*)""#).unwrap());

/// The directives an operation comment block may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Title,
    Description,
    Param,
    Header,
    Success,
    Failure,
    Tag,
    Route,
    OperationId,
    Other,
}

impl From<&str> for DirectiveKind {
    fn from(keyword: &str) -> Self {
        match keyword.to_lowercase().as_str() {
            "@title" => Self::Title,
            "@description" => Self::Description,
            "@param" => Self::Param,
            "@header" => Self::Header,
            "@success" => Self::Success,
            "@failure" => Self::Failure,
            "@resource" | "@tag" => Self::Tag,
            "@route" | "@router" => Self::Route,
            "@operationid" => Self::OperationId,
            _ => Self::Other,
        }
    }
}

/// One normalized comment line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive<'a> {
    pub kind: DirectiveKind,
    pub keyword: &'a str,
    pub rest: &'a str,
}

impl<'a> Directive<'a> {
    /// Strips the comment markers; blank lines yield `None`.
    pub fn parse(line: &'a str) -> Option<Self> {
        let text = line.trim().trim_start_matches('/').trim();
        if text.is_empty() {
            return None;
        }
        let (keyword, rest) = match text.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (text, ""),
        };
        Some(Self {
            kind: DirectiveKind::from(keyword),
            keyword,
            rest,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub path: String,
    /// Upper-cased verb as written.
    pub method: String,
}

impl RouteSpec {
    pub fn http_method(&self) -> Option<HttpMethod> {
        HttpMethod::from_upper(&self.method)
    }
}

/// `/path/{id} [get]`
pub fn parse_route(text: &str) -> Result<RouteSpec, ParserError> {
    let caps = ROUTE_REGEX
        .captures(text)
        .ok_or_else(|| ParserError::RouterParseError(text.to_string()))?;
    Ok(RouteSpec {
        path: caps[1].to_string(),
        method: caps[2].trim().to_uppercase(),
    })
}

/// How a response's jsonType is documented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Resolved from a Go type.
    Complex,
    /// Literal primitive schema.
    Simple(&'static str),
    Empty,
}

pub fn response_kind(json_type: &str) -> Result<ResponseKind, ParserError> {
    match json_type {
        "" => Ok(ResponseKind::Empty),
        "object" | "array" | "{object}" | "{array}" => Ok(ResponseKind::Complex),
        other => primitive_json_type(other)
            .map(ResponseKind::Simple)
            .ok_or_else(|| ParserError::InvalidJsonType(other.to_string())),
    }
}

/// `string`, `integer`, `number` or `boolean`, bare or braced.
pub fn primitive_json_type(json_type: &str) -> Option<&'static str> {
    let bare = json_type
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(json_type);
    match bare {
        "string" => Some("string"),
        "integer" => Some("integer"),
        "number" => Some("number"),
        "boolean" => Some("boolean"),
        _ => None,
    }
}

pub fn validate_status(status: &str) -> Result<u16, ParserError> {
    status
        .parse::<u16>()
        .ok()
        .filter(|code| (100..=599).contains(code))
        .ok_or_else(|| ParserError::InvalidStatusCode(status.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSpec {
    pub status: String,
    pub kind: ResponseKind,
    pub type_ref: Option<String>,
    pub description: String,
}

/// `<status> <jsonType>? <goType>? "<description>"?`
pub fn parse_response(text: &str) -> Result<ResponseSpec, ParserError> {
    let caps = RESPONSE_REGEX
        .captures(text)
        .ok_or_else(|| ParserError::ResponseParseError(text.to_string()))?;

    let status = caps[1].to_string();
    validate_status(&status)?;

    let json_type = caps.get(2).map_or("", |m| m.as_str());
    let kind = response_kind(json_type)?;

    Ok(ResponseSpec {
        status,
        kind,
        type_ref: caps.get(3).map(|m| m.as_str().to_string()),
        description: caps
            .get(4)
            .map_or("", |m| m.as_str())
            .trim()
            .trim_matches('"')
            .to_string(),
    })
}

/// Where a `@param` lands in the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
    Form,
    File,
}

impl ParamLocation {
    pub fn parse(name: &str, location: &str) -> Result<Self, ParserError> {
        match location {
            "path" => Ok(Self::Path),
            "query" => Ok(Self::Query),
            "header" => Ok(Self::Header),
            "cookie" => Ok(Self::Cookie),
            "body" => Ok(Self::Body),
            "form" => Ok(Self::Form),
            "file" => Ok(Self::File),
            _ => Err(ParserError::InvalidParameterLocation {
                name: name.to_string(),
                location: location.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
            Self::Body => "body",
            Self::Form => "form",
            Self::File => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub location: ParamLocation,
    pub type_ref: String,
    pub required: bool,
    pub description: String,
}

/// `<name> <in> <goType> <required> "<description>"`
pub fn parse_param(text: &str) -> Result<ParamSpec, ParserError> {
    let caps = PARAM_REGEX
        .captures(text)
        .ok_or_else(|| ParserError::ParameterParseError(text.to_string()))?;

    let name = caps[1].to_string();
    let location = ParamLocation::parse(&name, &caps[2])?;
    let required = location == ParamLocation::Path || caps[4].eq_ignore_ascii_case("true");

    Ok(ParamSpec {
        name,
        location,
        type_ref: caps[3].to_string(),
        required,
        description: caps[5].to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderTarget {
    All,
    Statuses(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSpec {
    pub target: HeaderTarget,
    pub json_type: &'static str,
    pub name: String,
    pub description: String,
}

/// `<status[,status..]|all> <jsonType> <name> "<description>"`
pub fn parse_header(text: &str) -> Result<HeaderSpec, ParserError> {
    let caps = HEADER_REGEX
        .captures(text)
        .ok_or_else(|| ParserError::HeaderParseError(text.to_string()))?;

    let target = if caps[1].eq_ignore_ascii_case("all") {
        HeaderTarget::All
    } else {
        let statuses = caps[1]
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| validate_status(s).map(|_| s.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        HeaderTarget::Statuses(statuses)
    };
    let json_type = primitive_json_type(&caps[2])
        .ok_or_else(|| ParserError::InvalidJsonType(caps[2].to_string()))?;

    Ok(HeaderSpec {
        target,
        json_type,
        name: caps[3].to_string(),
        description: caps[4].to_string(),
    })
}

/// Comma-separated tag names.
pub fn parse_tags(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|tag| !tag.is_empty())
}
