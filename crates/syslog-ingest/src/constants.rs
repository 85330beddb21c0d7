// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Largest datagram read from the socket. Longer datagrams are truncated by the
/// transport and usually fail to parse.
pub const BUFFER_SIZE: usize = 2048;

/// Number of records a batch holds before it is rotated into the sink.
pub const DEFAULT_BATCH_CAPACITY: usize = 50_000;

pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Historically 514; moved off the privileged range.
pub const DEFAULT_PORT: u16 = 1111;

pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_SINK_DIR: &str = "./batches";

/// Parse failures between two `warn!` summaries emitted by the listener.
pub const PARSE_FAILURE_REPORT_INTERVAL: u64 = 1_000;

/// Fields that every key-value record must carry, in reporting order.
pub const MANDATORY_FIELDS: [&str; 3] = ["device_name", "timestamp", "severity"];

/// Sink writes allowed to run at once. A batch rotated while every slot is
/// busy is dropped.
pub const MAX_IN_FLIGHT_WRITES: usize = 4;
