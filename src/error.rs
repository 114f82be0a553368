//! Crate-wide error type.
//!
//! Every fallible operation in the crate returns [`Result`]. Parse errors
//! carry the line number of the offending input; validation errors carry the
//! category and, when known, the item they refer to.

/// Errors produced while parsing, validating, or mutating CIF data.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed syntax: unterminated string or text field, an invalid
    /// character in context, or an unexpected token.
    #[error("parse error at line {line}: {message}")]
    Parse { line: u32, message: String },

    /// A value failed its type regex, enumeration, or mandatory-field check,
    /// or an unknown tag was used under a strict validator.
    #[error("validation error in {category}{}: {message}", item_suffix(.item))]
    Validation {
        category: String,
        item: Option<String>,
        message: String,
    },

    /// A row insert or key rewrite would duplicate a primary key.
    #[error("duplicate key in category {category}: {key}")]
    DuplicateKey { category: String, key: String },

    /// A link validator references an unknown category or tag.
    #[error("link error between {parent} and {child}: {message}")]
    Link {
        parent: String,
        child: String,
        message: String,
    },

    /// Structural problem in a dictionary being parsed.
    #[error("dictionary error: {0}")]
    Dictionary(String),

    /// A query expected a different number of hits than it found.
    #[error("query error: {0}")]
    Query(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn item_suffix(item: &Option<String>) -> String {
    match item {
        Some(i) => format!(".{i}"),
        None => String::new(),
    }
}

impl Error {
    pub(crate) fn parse(line: u32, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn validation(
        category: impl Into<String>,
        item: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Error::Validation {
            category: category.into(),
            item: item.map(str::to_owned),
            message: message.into(),
        }
    }
}
