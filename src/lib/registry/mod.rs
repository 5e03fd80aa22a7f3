mod actor;
mod protocol;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::accumulator::Accumulator;

use actor::RegistryActor;
use protocol::RegistryCommand;

pub type SharedAccumulator = Arc<Mutex<Accumulator>>;

/// Handle to the map of live session accumulators, keyed by session identifier.
///
/// Cloning the handle is cheap, every clone talks to the same registry. The
/// registry stops once the last handle is dropped.
#[derive(Clone, Debug)]
pub struct SessionRegistry {
    sender: mpsc::Sender<RegistryCommand>,
    _task: Arc<tokio::task::JoinHandle<()>>,
}

impl SessionRegistry {
    /// Spawns the registry task, must be called from within a tokio runtime
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(1024);
        let _task = Arc::new(tokio::spawn(RegistryActor::default().start(receiver)));
        Self { sender, _task }
    }

    /// Returns the accumulator registered for `identifier`, creating an empty one if needed
    pub async fn get_or_create(&self, identifier: &str) -> Result<SharedAccumulator> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::GetOrCreate {
                identifier: identifier.to_string(),
                response: response_tx,
            })
            .await
            .context("Session registry is closed")?;
        Ok(response_rx.await?)
    }

    /// Unregisters `identifier`, the next `get_or_create` starts from scratch
    pub async fn remove(&self, identifier: &str) -> Result<Option<SharedAccumulator>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::Remove {
                identifier: identifier.to_string(),
                response: response_tx,
            })
            .await
            .context("Session registry is closed")?;
        Ok(response_rx.await?)
    }

    pub async fn identifiers(&self) -> Result<Vec<String>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::GetIdentifiers {
                response: response_tx,
            })
            .await
            .context("Session registry is closed")?;
        Ok(response_rx.await?)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
