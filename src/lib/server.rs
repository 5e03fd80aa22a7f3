use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tracing::*;
use uuid::Uuid;

use crate::{
    codec::TelemetryLineCodec,
    parser::FieldLayout,
    registry::SessionRegistry,
    session::{SessionContext, SessionHandler},
    sink::{CsvResultSink, ResultSink},
};

pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(3);
/// Lines longer than this are discarded
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub local_addr: String,
    pub inactivity_timeout: Option<Duration>,
    pub layout: FieldLayout,
    pub results_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            local_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            inactivity_timeout: Some(DEFAULT_INACTIVITY_TIMEOUT),
            layout: FieldLayout::default(),
            results_path: PathBuf::from("Results.csv"),
        }
    }
}

#[derive(Debug)]
pub struct TelemetryServer {
    pub local_addr: String,
    registry: SessionRegistry,
    sink: Arc<dyn ResultSink>,
    layout: FieldLayout,
    inactivity_timeout: Option<Duration>,
    active_sessions: Arc<AtomicUsize>,
}

pub struct TelemetryServerBuilder(TelemetryServer);

impl TelemetryServerBuilder {
    pub fn build(self) -> TelemetryServer {
        self.0
    }

    pub fn layout(mut self, layout: FieldLayout) -> Self {
        self.0.layout = layout;
        self
    }

    pub fn inactivity_timeout(mut self, inactivity_timeout: Option<Duration>) -> Self {
        self.0.inactivity_timeout = inactivity_timeout;
        self
    }
}

impl TelemetryServer {
    /// Creates a builder with its own session registry, must be called from within a tokio runtime
    #[instrument(level = "debug", skip(sink))]
    pub fn builder(local_addr: &str, sink: Arc<dyn ResultSink>) -> TelemetryServerBuilder {
        TelemetryServerBuilder(Self {
            local_addr: local_addr.to_string(),
            registry: SessionRegistry::new(),
            sink,
            layout: FieldLayout::default(),
            inactivity_timeout: Some(DEFAULT_INACTIVITY_TIMEOUT),
            active_sessions: Arc::new(AtomicUsize::new(0)),
        })
    }

    #[instrument(level = "debug")]
    pub fn from_config(config: &ServerConfig) -> Self {
        let sink = Arc::new(CsvResultSink::new(config.results_path.clone()));

        Self::builder(&config.local_addr, sink)
            .layout(config.layout)
            .inactivity_timeout(config.inactivity_timeout)
            .build()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Number of connections currently being handled
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.local_addr)
            .await
            .with_context(|| format!("Failed binding to {}", self.local_addr))
    }

    /// Binds to the configured address and accepts connections forever
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accepts connections from `listener`, one independent task per client
    #[instrument(level = "debug", skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("Listening for telemetry on {}", listener.local_addr()?);

        loop {
            match listener.accept().await {
                Ok((socket, remote_addr)) => {
                    let context = SessionContext {
                        registry: self.registry.clone(),
                        sink: self.sink.clone(),
                        layout: self.layout,
                        inactivity_timeout: self.inactivity_timeout,
                    };
                    let guard = ActiveSession::new(self.active_sessions.clone());

                    tokio::spawn(TelemetryServer::handle_client(
                        socket,
                        remote_addr.to_string(),
                        Uuid::new_v4(),
                        context,
                        guard,
                    ));
                }
                Err(error) => {
                    error!("Failed to accept TCP connection: {error:?}");
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Handles communication with a single client
    #[instrument(level = "debug", skip(socket, context, _guard))]
    async fn handle_client(
        socket: TcpStream,
        remote_addr: String,
        connection: Uuid,
        context: SessionContext,
        _guard: ActiveSession,
    ) {
        let mut reader = FramedRead::new(
            socket,
            TelemetryLineCodec::new_with_max_length(MAX_LINE_LENGTH),
        );

        let outcome = SessionHandler::new(&remote_addr, context)
            .run(&mut reader)
            .await;

        debug!(
            "Finished handling connection with {remote_addr} ({:?}): {:?}",
            outcome.identifier, outcome.termination
        );
    }
}

/// Counts a session as active for as long as it is alive
#[derive(Debug)]
struct ActiveSession(Arc<AtomicUsize>);

impl ActiveSession {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
