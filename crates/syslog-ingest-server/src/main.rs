// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use syslog_ingest::{
    batch_service::BatchService,
    config::ServerConfig,
    errors::ListenerError,
    listener::SyslogListener,
    sink::{DiscardSink, JsonLinesSink, Sink, SinkKind},
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // no subscriber yet
            eprintln!("Error creating config on syslog ingest server startup: {e}");
            return ExitCode::FAILURE;
        }
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    let sink: Arc<dyn Sink> = match config.sink {
        SinkKind::Discard => Arc::new(DiscardSink),
        SinkKind::JsonLines => {
            info!("Writing batches to {}", config.sink_dir.display());
            Arc::new(JsonLinesSink::new(config.sink_dir.clone()))
        }
    };

    let (service, batch_handle) =
        match BatchService::new(config.batch_capacity, sink, config.sink_timeout) {
            Ok(created) => created,
            Err(e) => {
                error!("Failed to create batch service: {e}");
                return ExitCode::FAILURE;
            }
        };
    let service_task = tokio::spawn(service.with_flush_on_shutdown(config.flush_on_shutdown).run());

    let cancel_token = CancellationToken::new();
    let listener = match SyslogListener::new(
        &config.listener_config(),
        batch_handle.clone(),
        cancel_token.clone(),
    )
    .await
    {
        Ok(listener) => listener,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let listener_stats = listener.stats();
    info!(
        "Listening for syslog messages on {}:{} (batch capacity {})",
        config.host, config.port, config.batch_capacity
    );

    let listener_task = tokio::spawn(listener.spin());

    let exit_code =
        match wait_for_shutdown(tokio::signal::ctrl_c(), listener_task, &cancel_token).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e}");
                ExitCode::FAILURE
            }
        };

    if let Err(e) = batch_handle.shutdown() {
        error!("Failed to stop batch service: {e}");
    }
    if let Err(e) = service_task.await {
        error!("Batch service task failed: {e}");
    }

    info!(
        "Syslog listener stopped: {} datagrams received, {} parsed, {} malformed",
        listener_stats.received(),
        listener_stats.parsed(),
        listener_stats.parse_failures()
    );
    exit_code
}

/// Runs until the shutdown signal fires or the listener ends on its own, and
/// leaves the listener stopped either way. A signal handler that cannot be
/// installed counts as a failure.
async fn wait_for_shutdown<S>(
    shutdown_signal: S,
    mut listener_task: JoinHandle<Result<(), ListenerError>>,
    cancel_token: &CancellationToken,
) -> Result<(), String>
where
    S: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        signal = shutdown_signal => {
            info!("Syslog listener stopping");
            cancel_token.cancel();
            if let Err(e) = (&mut listener_task).await {
                error!("Listener task failed: {e}");
            }
            signal.map_err(|e| format!("Failed to listen for shutdown signal: {e}"))
        }
        result = &mut listener_task => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("Syslog listener failed: {e}")),
            Err(e) => Err(format!("Listener task failed: {e}")),
        },
    }
}
