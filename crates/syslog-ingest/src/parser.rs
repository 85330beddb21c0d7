// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog dialect detection and parsing.
//!
//! Two dialects are recognized:
//!
//! - **BSD**: `<PRI>Mon D HH:MM:SS hostname process[pid]: message`. The year is
//!   not on the wire and is supplied by the caller.
//! - **Key-value**: `<PRI>device_name=fw01 timestamp="..." severity=info k=v ...`
//!   with optionally quoted values.
//!
//! The dialect is chosen from the shape of the first token, never from
//! configuration. Parsing is pure: no I/O and no shared state.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::constants::MANDATORY_FIELDS;
use crate::errors::ParseError;
use crate::record::{BsdRecord, KeyValueRecord, Record};

const BSD_TIMESTAMP_FORMAT: &str = "%Y %b %d %H:%M:%S";

#[allow(clippy::expect_used)]
fn priority_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<\d{1,3}>").expect("failed creating regex"))
}

#[allow(clippy::expect_used)]
fn key_value_detect_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:<\d{1,3}>)?\s*[A-Za-z_][\w.-]*=").expect("failed creating regex")
    })
}

#[allow(clippy::expect_used)]
fn key_value_pair_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:^|\s)([A-Za-z_][\w.-]*)=(?:"([^"]*)"|(\S*))"#)
            .expect("failed creating regex")
    })
}

/// The closed set of wire layouts the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Bsd,
    KeyValue,
}

impl Dialect {
    /// Picks the dialect from the shape of the text: a first token of the form
    /// `key=...` (after an optional priority) means key-value, anything else is
    /// treated as BSD.
    #[must_use]
    pub fn detect(text: &str) -> Dialect {
        if key_value_detect_regex().is_match(text) {
            Dialect::KeyValue
        } else {
            Dialect::Bsd
        }
    }

    /// Parses already decoded text with this dialect's strategy.
    pub fn parse(self, text: &str, sender: SocketAddr, year: i32) -> Result<Record, ParseError> {
        match self {
            Dialect::Bsd => parse_bsd(text, sender, year).map(Record::Bsd),
            Dialect::KeyValue => parse_key_value(text, sender).map(Record::KeyValue),
        }
    }
}

/// Decodes a raw datagram and parses it with the detected dialect.
///
/// `year` fills in the year that BSD timestamps leave out.
pub fn parse(raw: &[u8], sender: SocketAddr, year: i32) -> Result<Record, ParseError> {
    let text = std::str::from_utf8(raw)?;
    let text = text.trim_end_matches(['\r', '\n', '\0']);
    Dialect::detect(text).parse(text, sender, year)
}

fn strip_priority(text: &str) -> &str {
    match priority_regex().find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

// Senders pad fields inconsistently ("Jan  5", double spaces before the host).
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn split_process(process_part: &str) -> (&str, Option<&str>) {
    if let Some((name, tail)) = process_part.split_once('[') {
        if let Some(end) = tail.find(']') {
            return (name, Some(&tail[..end]));
        }
    }
    (process_part, None)
}

fn parse_bsd(text: &str, sender: SocketAddr, year: i32) -> Result<BsdRecord, ParseError> {
    let line = collapse_whitespace(strip_priority(text));
    let mut parts = line.splitn(5, ' ');

    let (Some(month), Some(day), Some(time)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ParseError::MalformedTimestamp(line.clone()));
    };
    let stamp = format!("{year} {month} {day:0>2} {time}");
    let timestamp = NaiveDateTime::parse_from_str(&stamp, BSD_TIMESTAMP_FORMAT)
        .map_err(|_| ParseError::MalformedTimestamp(stamp))?;

    let (Some(hostname), Some(rest)) = (parts.next(), parts.next()) else {
        return Err(ParseError::MissingMessageSeparator);
    };
    let (process_part, message) = rest
        .split_once(": ")
        .ok_or(ParseError::MissingMessageSeparator)?;
    let (process_name, pid) = split_process(process_part);

    Ok(BsdRecord::new(
        timestamp,
        hostname,
        process_name,
        pid.map(str::to_string),
        message,
        sender,
    ))
}

fn parse_key_value(text: &str, sender: SocketAddr) -> Result<KeyValueRecord, ParseError> {
    let body = strip_priority(text);

    let mut mandatory: [Option<String>; 3] = [None, None, None];
    let mut log = BTreeMap::new();
    for caps in key_value_pair_regex().captures_iter(body) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2).or_else(|| caps.get(3))) else {
            continue;
        };
        let (key, value) = (key.as_str(), value.as_str().to_string());
        match MANDATORY_FIELDS.iter().position(|field| *field == key) {
            Some(idx) => mandatory[idx] = Some(value),
            None => {
                log.insert(key.to_string(), value);
            }
        }
    }

    let [device_name, timestamp, severity] = mandatory;
    let device_name = device_name.ok_or(ParseError::MissingMandatoryField(MANDATORY_FIELDS[0]))?;
    let timestamp = timestamp.ok_or(ParseError::MissingMandatoryField(MANDATORY_FIELDS[1]))?;
    let severity = severity.ok_or(ParseError::MissingMandatoryField(MANDATORY_FIELDS[2]))?;

    Ok(KeyValueRecord::new(
        device_name,
        timestamp,
        severity,
        log,
        sender,
    ))
}
