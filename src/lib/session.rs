use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::time::Instant;
use tracing::*;

use crate::{
    accumulator::FoldOutcome,
    parser::{self, FieldLayout, ParseError},
    registry::{SessionRegistry, SharedAccumulator},
    sink::{ResultSink, SessionResult},
};

/// Optional first data line, discarded once
pub const HEADER_MARKER: &str = "FUEL TOTAL QUANTITY";
/// Last line of a well-behaved session
pub const SENTINEL: &str = "EOF";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    AwaitIdentifier,
    AwaitHeaderOrData { header_skipped: bool },
    Streaming,
    Finalized,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] std::io::Error),

    #[error("no line received for {0:?}")]
    Timeout(Duration),

    #[error("session registry unavailable: {0:#}")]
    Registry(anyhow::Error),
}

/// How the line stream of a session came to an end
#[derive(Debug)]
pub enum Termination {
    Sentinel,
    /// Peer closed the connection without sending the sentinel
    EndOfStream,
    Failed(SessionError),
}

impl Termination {
    pub fn is_clean(&self) -> bool {
        matches!(self, Termination::Sentinel)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub lines: u64,
    pub readings: u64,
    pub malformed_records: u64,
    pub invalid_values: u64,
}

/// Everything a session needs from the outside world
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub registry: SessionRegistry,
    pub sink: Arc<dyn ResultSink>,
    pub layout: FieldLayout,
    pub inactivity_timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub identifier: Option<String>,
    pub termination: Termination,
    /// Recorded average, `None` when the peer never identified itself
    pub result: Option<SessionResult>,
    pub counters: SessionCounters,
}

/// Drives the protocol of a single connection and finalizes it exactly once
#[derive(Debug)]
pub struct SessionHandler {
    peer: String,
    context: SessionContext,
    state: SessionState,
    identifier: Option<String>,
    accumulator: Option<SharedAccumulator>,
    counters: SessionCounters,
    last_activity: Instant,
}

impl SessionHandler {
    pub fn new(peer: &str, context: SessionContext) -> Self {
        Self {
            peer: peer.to_string(),
            context,
            state: SessionState::AwaitIdentifier,
            identifier: None,
            accumulator: None,
            counters: SessionCounters::default(),
            last_activity: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn identifier(&self) -> &str {
        self.identifier.as_deref().unwrap_or_default()
    }

    /// Consumes lines until the session terminates, then finalizes it
    #[instrument(level = "debug", skip_all, fields(peer = %self.peer))]
    pub async fn run<T>(mut self, reader: &mut T) -> SessionOutcome
    where
        T: Stream<Item = std::io::Result<String>> + std::marker::Unpin,
    {
        let termination = self.receive(reader).await;
        self.finalize(termination).await
    }

    async fn receive<T>(&mut self, reader: &mut T) -> Termination
    where
        T: Stream<Item = std::io::Result<String>> + std::marker::Unpin,
    {
        loop {
            let next = match self.context.inactivity_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, reader.next()).await {
                    Ok(next) => next,
                    Err(_elapsed) => {
                        return Termination::Failed(SessionError::Timeout(timeout));
                    }
                },
                None => reader.next().await,
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(error)) => return Termination::Failed(SessionError::ConnectionLost(error)),
                None => return Termination::EndOfStream,
            };

            self.last_activity = Instant::now();

            match self.handle_line(line).await {
                Ok(SessionState::Finalized) => return Termination::Sentinel,
                Ok(_) => (),
                Err(error) => return Termination::Failed(SessionError::Registry(error)),
            }
        }
    }

    /// Advances the state machine by one line
    pub async fn handle_line(&mut self, line: String) -> Result<SessionState> {
        match self.state {
            SessionState::AwaitIdentifier => {
                info!("Client connected: {line:?} ({})", self.peer);
                self.identifier = Some(line);
                self.state = SessionState::AwaitHeaderOrData {
                    header_skipped: false,
                };
            }
            SessionState::AwaitHeaderOrData { header_skipped } => {
                if !header_skipped && line.starts_with(HEADER_MARKER) {
                    debug!("Header skipped for {}", self.identifier());
                    self.state = SessionState::AwaitHeaderOrData {
                        header_skipped: true,
                    };
                } else if !line.trim().is_empty() {
                    self.state = SessionState::Streaming;
                    self.handle_data_line(&line).await?;
                }
            }
            SessionState::Streaming => self.handle_data_line(&line).await?,
            SessionState::Finalized => {
                warn!("Ignoring line received after finalization: {line:?}");
            }
        }

        Ok(self.state)
    }

    async fn handle_data_line(&mut self, line: &str) -> Result<()> {
        if line == SENTINEL {
            info!("[EOF] received for {}", self.identifier());
            self.state = SessionState::Finalized;
            return Ok(());
        }

        if line.trim().is_empty() {
            return Ok(());
        }

        self.counters.lines += 1;

        let reading = match parser::parse_line(line, &self.context.layout) {
            Ok(reading) => reading,
            Err(error) => {
                match error {
                    ParseError::MalformedRecord { .. } => self.counters.malformed_records += 1,
                    ParseError::InvalidValue { .. } => self.counters.invalid_values += 1,
                }
                warn!("Skipping line from {}: {error}: {line:?}", self.identifier());
                return Ok(());
            }
        };

        let accumulator = self.accumulator().await?;
        let outcome = accumulator.lock().await.fold(reading);
        self.counters.readings += 1;

        match outcome {
            FoldOutcome::Baseline | FoldOutcome::Accumulated { .. } => {
                trace!("[{}] {reading:?}: {outcome:?}", self.identifier());
            }
            FoldOutcome::Discarded { .. } => {
                debug!("[{}] {reading:?} discarded: {outcome:?}", self.identifier());
            }
        }

        Ok(())
    }

    /// Accumulator of this session, fetched from the registry on first use
    async fn accumulator(&mut self) -> Result<SharedAccumulator> {
        if let Some(accumulator) = &self.accumulator {
            return Ok(accumulator.clone());
        }

        let identifier = self
            .identifier
            .as_deref()
            .context("Data received before the session identifier")?;
        let accumulator = self.context.registry.get_or_create(identifier).await?;
        self.accumulator = Some(accumulator.clone());

        Ok(accumulator)
    }

    async fn finalize(mut self, termination: Termination) -> SessionOutcome {
        self.state = SessionState::Finalized;

        match &termination {
            Termination::Sentinel => (),
            Termination::EndOfStream => {
                warn!("Connection closed by {} without {SENTINEL:?}", self.peer)
            }
            Termination::Failed(error) => warn!(
                "Session from {} ended abnormally after {:?} idle: {error}",
                self.peer,
                self.last_activity.elapsed()
            ),
        }

        let Some(identifier) = self.identifier.take() else {
            warn!("Connection from {} ended before identifying itself", self.peer);
            return SessionOutcome {
                identifier: None,
                termination,
                result: None,
                counters: self.counters,
            };
        };

        if let Err(error) = self.context.registry.remove(&identifier).await {
            error!("Failed releasing accumulator of {identifier:?}: {error:?}");
        }

        let average_rate = match self.accumulator.take() {
            Some(accumulator) => accumulator.lock().await.average(),
            None => 0.0,
        };

        let result = SessionResult::new(&identifier, average_rate);
        info!(
            "[{identifier}] Average consumption: {average_rate:.4}/min ({:?})",
            self.counters
        );
        self.context.sink.record(&result).await;

        SessionOutcome {
            identifier: Some(identifier),
            termination,
            result: Some(result),
            counters: self.counters,
        }
    }
}
