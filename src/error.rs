use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Failed to read source: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Can not parse router comment \"{0}\"")]
    RouterParseError(String),

    #[error("Can not parse response comment \"{0}\"")]
    ResponseParseError(String),

    #[error("Can not parse param comment \"{0}\"")]
    ParameterParseError(String),

    #[error("Can not parse header comment \"{0}\"")]
    HeaderParseError(String),

    #[error("Invalid http status code {0}")]
    InvalidStatusCode(String),

    #[error("Invalid jsonType {0}")]
    InvalidJsonType(String),

    #[error("Invalid parameter location {location} for parameter {name}")]
    InvalidParameterLocation { name: String, location: String },

    #[error("operation ID '{0}' is not unique")]
    DuplicateOperationId(String),

    #[error("Can not parse type reference \"{0}\"")]
    TypeSyntaxError(String),

    #[error("Unknown package alias {alias} referenced from {}", .from.display())]
    UnknownPackage { alias: String, from: PathBuf },

    #[error("Type {type_name} not found in package {}", .package.display())]
    TypeNotFound { type_name: String, package: PathBuf },

    #[error("Failed to resolve field {field} of {type_name}: {source}")]
    FieldResolution {
        type_name: String,
        field: String,
        #[source]
        source: Box<ParserError>,
    },
}
