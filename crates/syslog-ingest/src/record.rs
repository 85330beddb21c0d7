// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured records produced by the dialect parser.
//!
//! A [`Record`] is one log event. Its shape depends on the dialect it was
//! parsed from, but every record knows which sender it came from and carries a
//! human-readable payload. Records are immutable: fields are only reachable
//! through accessors.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::SocketAddr;

use chrono::NaiveDateTime;
use serde::Serialize;

/// Column order of the BSD dialect sink schema.
pub const BSD_SCHEMA: [&str; 7] = [
    "timestamp",
    "hostname",
    "process_name",
    "pid",
    "message",
    "host",
    "port",
];

/// Reserved key under which key-value records nest their non-mandatory fields.
pub const NESTED_LOG_KEY: &str = "log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Bsd(BsdRecord),
    KeyValue(KeyValueRecord),
}

impl Record {
    /// Address of the sender the datagram was received from.
    #[must_use]
    pub fn host(&self) -> &str {
        match self {
            Record::Bsd(r) => &r.host,
            Record::KeyValue(r) => &r.host,
        }
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        match self {
            Record::Bsd(r) => r.port,
            Record::KeyValue(r) => r.port,
        }
    }

    /// Human-readable payload of the event.
    ///
    /// Key-value records use their `msg` or `message` field when present and
    /// otherwise fall back to the full `key=value` rendering.
    #[must_use]
    pub fn message(&self) -> Cow<'_, str> {
        match self {
            Record::Bsd(r) => Cow::Borrowed(r.message.as_str()),
            Record::KeyValue(r) => match r.log.get("msg").or_else(|| r.log.get("message")) {
                Some(msg) => Cow::Borrowed(msg.as_str()),
                None => Cow::Owned(r.to_wire(None)),
            },
        }
    }

    /// Renders the record back into the wire form of its dialect.
    #[must_use]
    pub fn to_wire(&self, priority: Option<u8>) -> String {
        match self {
            Record::Bsd(r) => r.to_wire(priority),
            Record::KeyValue(r) => r.to_wire(priority),
        }
    }
}

/// Event in the traditional positional syslog layout
/// (`Mon D HH:MM:SS hostname process[pid]: message`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BsdRecord {
    timestamp: NaiveDateTime,
    hostname: String,
    process_name: String,
    pid: Option<String>,
    message: String,
    host: String,
    port: u16,
}

impl BsdRecord {
    #[must_use]
    pub fn new(
        timestamp: NaiveDateTime,
        hostname: impl Into<String>,
        process_name: impl Into<String>,
        pid: Option<String>,
        message: impl Into<String>,
        sender: SocketAddr,
    ) -> Self {
        BsdRecord {
            timestamp,
            hostname: hostname.into(),
            process_name: process_name.into(),
            pid,
            message: message.into(),
            host: sender.ip().to_string(),
            port: sender.port(),
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    #[must_use]
    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    #[must_use]
    pub fn pid(&self) -> Option<&str> {
        self.pid.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The year is not part of the wire form; re-parsing needs the same year
    /// context to reproduce the timestamp.
    #[must_use]
    pub fn to_wire(&self, priority: Option<u8>) -> String {
        let mut out = String::new();
        if let Some(pri) = priority {
            let _ = write!(out, "<{pri}>");
        }
        let _ = write!(
            out,
            "{} {} {}",
            self.timestamp.format("%b %e %H:%M:%S"),
            self.hostname,
            self.process_name
        );
        if let Some(pid) = &self.pid {
            let _ = write!(out, "[{pid}]");
        }
        let _ = write!(out, ": {}", self.message);
        out
    }
}

/// Event in the `key=value` structured layout emitted by network appliances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValueRecord {
    device_name: String,
    timestamp: String,
    severity: String,
    log: BTreeMap<String, String>,
    host: String,
    port: u16,
}

impl KeyValueRecord {
    #[must_use]
    pub fn new(
        device_name: impl Into<String>,
        timestamp: impl Into<String>,
        severity: impl Into<String>,
        log: BTreeMap<String, String>,
        sender: SocketAddr,
    ) -> Self {
        KeyValueRecord {
            device_name: device_name.into(),
            timestamp: timestamp.into(),
            severity: severity.into(),
            log,
            host: sender.ip().to_string(),
            port: sender.port(),
        }
    }

    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Raw timestamp text as sent; not interpreted.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    #[must_use]
    pub fn severity(&self) -> &str {
        &self.severity
    }

    /// Every non-mandatory field, keyed by field name.
    #[must_use]
    pub fn log(&self) -> &BTreeMap<String, String> {
        &self.log
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Values containing a double quote cannot be represented on the wire and
    /// will not survive a round trip.
    #[must_use]
    pub fn to_wire(&self, priority: Option<u8>) -> String {
        let mut out = String::new();
        if let Some(pri) = priority {
            let _ = write!(out, "<{pri}>");
        }
        let mandatory = [
            ("device_name", &self.device_name),
            ("timestamp", &self.timestamp),
            ("severity", &self.severity),
        ];
        let pairs = mandatory
            .into_iter()
            .chain(self.log.iter().map(|(k, v)| (k.as_str(), v)));
        for (i, (key, value)) in pairs.enumerate() {
            if i > 0 {
                out.push(' ');
            }
            if value.is_empty() || value.contains(char::is_whitespace) {
                let _ = write!(out, "{key}=\"{value}\"");
            } else {
                let _ = write!(out, "{key}={value}");
            }
        }
        out
    }
}
