//! # Policies
//!
//! Behavioral switches for the edge cases of a provisioning run.

use std::fmt;
use std::str::FromStr;

/// What the credential locator does when no secret matches the prefix
/// (or the matched secret lacks the requested data key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotFoundPolicy {
    /// Fail the lookup with a not-found error
    Fail,
    /// Return an empty credential and carry on
    #[default]
    Empty,
}

/// How the credential locator chooses between several prefix matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchOrder {
    /// First match in the order the cluster API listed the secrets.
    /// The API does not guarantee this order across versions.
    #[default]
    Listing,
    /// Lexicographically smallest matching name
    Lexicographic,
}

/// What a failed destroy does to the exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestroyErrorPolicy {
    /// Report the failure and exit successfully
    #[default]
    Continue,
    /// Report the failure and exit with a non-zero status
    Fail,
}

/// Error returned when a policy string is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}' (expected one of: {expected})")]
pub struct ParsePolicyError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl ParsePolicyError {
    fn new(kind: &'static str, value: &str, expected: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            expected,
        }
    }
}

impl FromStr for NotFoundPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "empty" => Ok(Self::Empty),
            _ => Err(ParsePolicyError::new("not-found policy", s, "fail, empty")),
        }
    }
}

impl FromStr for MatchOrder {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "listing" => Ok(Self::Listing),
            "lexicographic" => Ok(Self::Lexicographic),
            _ => Err(ParsePolicyError::new(
                "match order",
                s,
                "listing, lexicographic",
            )),
        }
    }
}

impl FromStr for DestroyErrorPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "fail" => Ok(Self::Fail),
            _ => Err(ParsePolicyError::new(
                "destroy error policy",
                s,
                "continue, fail",
            )),
        }
    }
}

impl fmt::Display for NotFoundPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail => write!(f, "fail"),
            Self::Empty => write!(f, "empty"),
        }
    }
}

impl fmt::Display for MatchOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listing => write!(f, "listing"),
            Self::Lexicographic => write!(f, "lexicographic"),
        }
    }
}

impl fmt::Display for DestroyErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Fail => write!(f, "fail"),
        }
    }
}
