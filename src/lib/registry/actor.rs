use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{Mutex, mpsc};
use tracing::*;

use crate::accumulator::Accumulator;

use super::{SharedAccumulator, protocol::RegistryCommand};

/// Sole owner of the identifier map. Commands are handled one at a time, which
/// is what makes `GetOrCreate` and `Remove` atomic per key.
#[derive(Default)]
pub struct RegistryActor {
    accumulators: IndexMap<String, SharedAccumulator>,
}

impl RegistryActor {
    pub async fn start(mut self, mut receiver: mpsc::Receiver<RegistryCommand>) {
        while let Some(command) = receiver.recv().await {
            match command {
                RegistryCommand::GetOrCreate {
                    identifier,
                    response,
                } => {
                    let accumulator = self.get_or_create(identifier);
                    let _ = response.send(accumulator);
                }
                RegistryCommand::Remove {
                    identifier,
                    response,
                } => {
                    let accumulator = self.remove(&identifier);
                    let _ = response.send(accumulator);
                }
                RegistryCommand::GetIdentifiers { response } => {
                    let _ = response.send(self.accumulators.keys().cloned().collect());
                }
            }
        }

        debug!("Session registry stopped");
    }

    #[instrument(level = "trace", skip(self))]
    fn get_or_create(&mut self, identifier: String) -> SharedAccumulator {
        self.accumulators
            .entry(identifier)
            .or_insert_with_key(|identifier| {
                debug!("Creating accumulator for {identifier:?}");
                Arc::new(Mutex::new(Accumulator::new()))
            })
            .clone()
    }

    #[instrument(level = "trace", skip(self))]
    fn remove(&mut self, identifier: &str) -> Option<SharedAccumulator> {
        let removed = self.accumulators.shift_remove(identifier);
        if removed.is_none() {
            trace!("No accumulator registered for {identifier:?}");
        }
        removed
    }
}
