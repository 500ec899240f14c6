//! Error types for the commissioning client
//!
//! Every fallible operation returns [`ClientResult`]. The variants map onto the
//! three ways a request can go wrong plus configuration problems:
//!
//! | Variant | Raised when | Connection afterwards |
//! |---------|-------------|-----------------------|
//! | [`ClientError::Validation`] | a parameter is out of range, before any I/O | untouched |
//! | [`ClientError::InvalidOption`] | an option name is not recognised | untouched |
//! | [`ClientError::Connection`] | connect failed, no response, transport failure | closed |
//! | [`ClientError::Protocol`] | the device answered with an exception | open |
//! | [`ClientError::Configuration`] | endpoint or config file values are invalid | n/a |

use std::fmt;

use thiserror::Error;

/// Result type used throughout the crate
pub type ClientResult<T> = Result<T, ClientError>;

/// Inclusive range a validated field must fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidRange {
    pub min: i64,
    pub max: i64,
}

impl ValidRange {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, value: i64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl fmt::Display for ValidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.min, self.max)
    }
}

/// Errors surfaced by the client, the service requests and the device panel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// A request parameter is outside its declared range
    #[error("{field} must be in range {range} (got {value})")]
    Validation {
        field: &'static str,
        range: ValidRange,
        value: i64,
    },

    /// A named option is not one of the accepted choices
    #[error("{field} must be one of {options:?} (got '{value}')")]
    InvalidOption {
        field: &'static str,
        options: &'static [&'static str],
        value: String,
    },

    /// Connect failure, missing response or broken transport
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The device (or gateway) reported a fault
    #[error("Modbus {operation} error: {message}")]
    Protocol {
        operation: &'static str,
        message: String,
    },

    /// Invalid endpoint or configuration file
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ClientError {
    /// Create a validation error for `field`
    pub fn validation(field: &'static str, range: ValidRange, value: i64) -> Self {
        Self::Validation {
            field,
            range,
            value,
        }
    }

    /// Create an error for an unrecognised option name
    pub fn invalid_option<S: Into<String>>(
        field: &'static str,
        options: &'static [&'static str],
        value: S,
    ) -> Self {
        Self::InvalidOption {
            field,
            options,
            value: value.into(),
        }
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a protocol error for the named operation
    pub fn protocol<S: Into<String>>(operation: &'static str, message: S) -> Self {
        Self::Protocol {
            operation,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::InvalidOption { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::connection(err.to_string())
    }
}

impl From<serde_yaml::Error> for ClientError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

/// Check `value` against `range`, naming `field` on failure.
pub fn check_range(field: &'static str, value: i64, range: ValidRange) -> ClientResult<i64> {
    if range.contains(value) {
        Ok(value)
    } else {
        Err(ClientError::validation(field, range, value))
    }
}
