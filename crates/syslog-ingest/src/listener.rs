// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog UDP listener.
//!
//! Receives datagrams, parses each one with the dialect parser, and forwards
//! the resulting records to the batch service. Malformed datagrams are counted
//! and dropped without affecting anything else.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Datelike;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::batch_service::BatchHandle;
use crate::constants::{BUFFER_SIZE, PARSE_FAILURE_REPORT_INTERVAL};
use crate::errors::ListenerError;
use crate::parser::parse;

// Backoff formula: 10ms * 2^error_count
// With MAX = 5: backoffs are 20ms, 40ms, 80ms, 160ms before giving up on the fifth error
const MAX_CONSECUTIVE_RECEIVE_ERRORS: u32 = 5;

/// Configuration for the syslog listener
#[derive(Debug, Clone)]
pub struct SyslogListenerConfig {
    /// Host to bind UDP socket to (e.g., "0.0.0.0")
    pub host: String,
    /// Port to bind UDP socket to; 0 picks an ephemeral port
    pub port: u16,
}

/// Counters shared between the listener task and whoever wants to report on it.
#[derive(Debug, Default)]
pub struct ListenerStats {
    received: AtomicU64,
    parsed: AtomicU64,
    parse_failures: AtomicU64,
}

impl ListenerStats {
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn parsed(&self) -> u64 {
        self.parsed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }
}

// BufferReader abstracts where datagrams come from.
enum BufferReader {
    UdpSocket(tokio::net::UdpSocket),

    /// Mirror reader for testing - replays a fixed buffer
    #[cfg(test)]
    MirrorTest(Vec<u8>, SocketAddr),

    /// Fails every read with the given error kind
    #[cfg(test)]
    FailingTest(std::io::ErrorKind),
}

impl BufferReader {
    async fn read(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        match self {
            BufferReader::UdpSocket(socket) => {
                let mut buf = [0; BUFFER_SIZE];
                let (amt, src) = socket.recv_from(&mut buf).await?;
                Ok((buf[..amt].to_owned(), src))
            }
            #[cfg(test)]
            BufferReader::MirrorTest(data, src) => Ok((data.clone(), *src)),
            #[cfg(test)]
            BufferReader::FailingTest(kind) => Err(std::io::Error::from(*kind)),
        }
    }
}

/// Syslog server to receive, parse, and forward records.
pub struct SyslogListener {
    cancel_token: CancellationToken,
    batch_handle: BatchHandle,
    buffer_reader: BufferReader,
    stats: Arc<ListenerStats>,
}

impl SyslogListener {
    /// Binds the UDP socket. A bind failure is returned rather than retried.
    pub async fn new(
        config: &SyslogListenerConfig,
        batch_handle: BatchHandle,
        cancel_token: CancellationToken,
    ) -> Result<SyslogListener, ListenerError> {
        let addr = format!("{}:{}", config.host, config.port);
        let socket = tokio::net::UdpSocket::bind(&addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;

        Ok(SyslogListener {
            cancel_token,
            batch_handle,
            buffer_reader: BufferReader::UdpSocket(socket),
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Address the socket is actually bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.buffer_reader {
            BufferReader::UdpSocket(socket) => socket.local_addr().ok(),
            #[cfg(test)]
            BufferReader::MirrorTest(..) | BufferReader::FailingTest(_) => None,
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Main loop: receive until cancelled. The socket is closed when this
    /// returns, on every path.
    pub async fn spin(self) -> Result<(), ListenerError> {
        let mut consecutive_errors = 0;
        loop {
            let read = tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                read = self.buffer_reader.read() => read,
            };

            match read {
                Ok((buf, src)) => {
                    consecutive_errors = 0;
                    self.insert_record(&buf, src);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!("Failed to receive datagram: {}", e);
                    if consecutive_errors >= MAX_CONSECUTIVE_RECEIVE_ERRORS {
                        return Err(ListenerError::Receive(e));
                    }
                    let backoff_ms = 10u64 * (1 << consecutive_errors);
                    tokio::select! {
                        _ = sleep(Duration::from_millis(backoff_ms)) => {}
                        _ = self.cancel_token.cancelled() => break,
                    }
                }
            }
        }
        debug!(
            "Syslog listener stopped after {} datagrams ({} malformed)",
            self.stats.received(),
            self.stats.parse_failures()
        );
        Ok(())
    }

    /// Receive and process a single datagram.
    #[cfg(test)]
    async fn consume_datagram(&self) {
        match self.buffer_reader.read().await {
            Ok((buf, src)) => self.insert_record(&buf, src),
            Err(e) => error!("Failed to receive datagram: {}", e),
        }
    }

    fn insert_record(&self, buf: &[u8], src: SocketAddr) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        trace!("Received {} bytes from {}", buf.len(), src);

        let year = chrono::Local::now().year();
        match parse(buf, src, year) {
            Ok(record) => {
                self.stats.parsed.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.batch_handle.insert_batch(vec![record]) {
                    error!("Failed to send record to batch service: {}", e);
                }
            }
            Err(e) => {
                let failures = self.stats.parse_failures.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Failed to parse datagram from {}: {}", src, e);
                if failures % PARSE_FAILURE_REPORT_INTERVAL == 1 {
                    warn!("Dropped malformed datagram from {} ({} so far): {}", src, failures, e);
                }
            }
        }
    }
}
