//! Attribute descriptors: the dependency fingerprint of one data access.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::key::CacheKey;
use crate::recorder::Call;

/// One argument of a recorded call.
///
/// Arguments must be comparable for the reverse index to work, so only
/// scalar values are accepted. Each token normalizes to a single string
/// segment of an [`Attribute`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Token {
    /// The string segment this token contributes to an attribute.
    pub fn normalized(&self) -> String {
        match self {
            Token::Null => "null".to_string(),
            Token::Bool(b) => b.to_string(),
            Token::Int(i) => i.to_string(),
            Token::Str(s) => s.clone(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized())
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Token::Str(value.to_string())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Token::Str(value)
    }
}

impl From<&String> for Token {
    fn from(value: &String) -> Self {
        Token::Str(value.clone())
    }
}

impl From<&CacheKey> for Token {
    fn from(value: &CacheKey) -> Self {
        Token::Str(value.as_str().to_string())
    }
}

impl From<i64> for Token {
    fn from(value: i64) -> Self {
        Token::Int(value)
    }
}

impl From<i32> for Token {
    fn from(value: i32) -> Self {
        Token::Int(i64::from(value))
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token::Int(i64::from(value))
    }
}

impl From<bool> for Token {
    fn from(value: bool) -> Self {
        Token::Bool(value)
    }
}

impl<T: Into<Token>> From<Option<T>> for Token {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Token::Null)
    }
}

/// Attribute descriptor: `[identity-path..., operation, arguments...]`.
///
/// Two accesses made through the same collaborator identity, with the same
/// operation and the same arguments, produce equal descriptors. The
/// descriptor says nothing about the value that was returned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Attribute(Vec<String>);

impl Attribute {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Build the descriptor for a recorded call.
    pub fn from_call(call: &Call) -> Self {
        let mut segments = Vec::with_capacity(call.receiver.len() + 1 + call.arguments.len());
        segments.extend(call.receiver.iter().cloned());
        segments.push(call.operation.clone());
        segments.extend(call.arguments.iter().map(Token::normalized));
        Self(segments)
    }

    /// Build a descriptor from an identity path, operation and arguments.
    pub fn for_operation(identity: &[String], operation: &str, arguments: &[Token]) -> Self {
        let mut segments = identity.to_vec();
        segments.push(operation.to_string());
        segments.extend(arguments.iter().map(Token::normalized));
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn into_segments(self) -> Vec<String> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

impl From<Vec<String>> for Attribute {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}
