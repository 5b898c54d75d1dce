use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Zero-padded width of the sequence segment.
pub const SEQUENCE_WIDTH: usize = 4;
/// Largest sequence representable in [`SEQUENCE_WIDTH`] digits.
pub const MAX_SEQUENCE: u32 = 9_999;

const INQUIRY_MARKER: &str = "INQ";

/// Which independent counter family a code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeKind {
    /// `{prefix}-INQ-{year}-{seq}` temporary ids issued at inquiry time.
    Inquiry,
    /// `{prefix}-{year}-{seq}` student codes issued at enrollment.
    Student,
}

/// Key under which a sequential counter is maintained.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeScope {
    pub prefix: String,
    pub kind: CodeKind,
    pub year: i32,
}

impl CodeScope {
    pub fn inquiry(prefix: impl Into<String>, year: i32) -> Self {
        Self {
            prefix: prefix.into(),
            kind: CodeKind::Inquiry,
            year,
        }
    }

    pub fn student(prefix: impl Into<String>, year: i32) -> Self {
        Self {
            prefix: prefix.into(),
            kind: CodeKind::Student,
            year,
        }
    }
}

impl fmt::Display for CodeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CodeKind::Inquiry => write!(f, "{}-{}-{}", self.prefix, INQUIRY_MARKER, self.year),
            CodeKind::Student => write!(f, "{}-{}", self.prefix, self.year),
        }
    }
}

/// Reasons a string is not a well-formed code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeFormatError {
    #[error("code is empty")]
    Empty,
    #[error("code must have the shape PREFIX-YYYY-NNNN or PREFIX-INQ-YYYY-NNNN")]
    Shape,
    #[error("prefix must be uppercase letters or digits")]
    Prefix,
    #[error("year must be exactly four digits")]
    Year,
    #[error("sequence must be exactly four digits")]
    Sequence,
    #[error("sequence {0} is outside 1..=9999")]
    OutOfRange(u32),
}

/// A formatted sequential code: student code or inquiry temporary id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SequentialCode {
    scope: CodeScope,
    sequence: u32,
}

impl SequentialCode {
    pub fn new(scope: CodeScope, sequence: u32) -> Result<Self, CodeFormatError> {
        if sequence == 0 || sequence > MAX_SEQUENCE {
            return Err(CodeFormatError::OutOfRange(sequence));
        }
        if !is_valid_prefix(&scope.prefix) {
            return Err(CodeFormatError::Prefix);
        }
        if !(1000..=9999).contains(&scope.year) {
            return Err(CodeFormatError::Year);
        }
        Ok(Self { scope, sequence })
    }

    pub fn parse(raw: &str) -> Result<Self, CodeFormatError> {
        if raw.is_empty() {
            return Err(CodeFormatError::Empty);
        }

        let parts: Vec<&str> = raw.split('-').collect();
        let (prefix, kind, year, sequence) = match parts.as_slice() {
            [prefix, year, sequence] => (*prefix, CodeKind::Student, *year, *sequence),
            [prefix, marker, year, sequence] if *marker == INQUIRY_MARKER => {
                (*prefix, CodeKind::Inquiry, *year, *sequence)
            }
            _ => return Err(CodeFormatError::Shape),
        };

        if !is_valid_prefix(prefix) {
            return Err(CodeFormatError::Prefix);
        }
        let year = four_digits(year).ok_or(CodeFormatError::Year)?;
        let sequence = four_digits(sequence).ok_or(CodeFormatError::Sequence)?;

        Self::new(
            CodeScope {
                prefix: prefix.to_string(),
                kind,
                year: year as i32,
            },
            sequence,
        )
    }

    pub fn scope(&self) -> &CodeScope {
        &self.scope
    }

    pub fn prefix(&self) -> &str {
        &self.scope.prefix
    }

    pub fn kind(&self) -> CodeKind {
        self.scope.kind
    }

    pub fn year(&self) -> i32 {
        self.scope.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Login name derived from the code: lower-cased, `-` replaced by `.`.
    pub fn username(&self) -> String {
        self.to_string().to_ascii_lowercase().replace('-', ".")
    }
}

impl fmt::Display for SequentialCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:0width$}",
            self.scope,
            self.sequence,
            width = SEQUENCE_WIDTH
        )
    }
}

impl FromStr for SequentialCode {
    type Err = CodeFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SequentialCode {
    type Error = CodeFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SequentialCode> for String {
    fn from(value: SequentialCode) -> Self {
        value.to_string()
    }
}

/// True when `raw` parses as either code shape.
pub fn validate_format(raw: &str) -> bool {
    SequentialCode::parse(raw).is_ok()
}

fn is_valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

fn four_digits(segment: &str) -> Option<u32> {
    if segment.len() == SEQUENCE_WIDTH && segment.chars().all(|c| c.is_ascii_digit()) {
        segment.parse().ok()
    } else {
        None
    }
}
