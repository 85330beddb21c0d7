// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for parsing, batching, sinks, and the listener.

use std::time::Duration;

/// Why a single datagram could not be turned into a record.
///
/// Parse errors never leave the ingestion loop: they are logged, counted, and
/// the datagram is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("datagram is not valid UTF-8: {0}")]
    Decode(#[from] std::str::Utf8Error),

    #[error("malformed timestamp: '{0}'")]
    MalformedTimestamp(String),

    #[error("missing ': ' separator between process and message")]
    MissingMessageSeparator,

    #[error("missing mandatory field '{0}'")]
    MissingMandatoryField(&'static str),
}

/// Failure to hand a rotated batch to its sink. The batch is dropped.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sink write timed out after {0:?}")]
    Timeout(Duration),

    #[error("sink rejected batch: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("couldn't bind to address {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("giving up after repeated receive errors: {0}")]
    Receive(std::io::Error),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Creation {
    #[error("batch capacity must be at least 1")]
    ZeroCapacity,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        assert_eq!(
            ParseError::MissingMandatoryField("device_name").to_string(),
            "missing mandatory field 'device_name'"
        );
        assert_eq!(
            ParseError::MalformedTimestamp("2024 Foo 01 10:00:00".to_string()).to_string(),
            "malformed timestamp: '2024 Foo 01 10:00:00'"
        );
    }

    #[test]
    fn test_decode_error_from_utf8() {
        let bytes = [0x66, 0x6f, 0xff];
        let err: ParseError = std::str::from_utf8(&bytes).unwrap_err().into();
        assert!(matches!(err, ParseError::Decode(_)));
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Invalid("port must be greater than 0".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: port must be greater than 0"
        );
    }
}
