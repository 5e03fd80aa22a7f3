use tokio::sync::oneshot;

use super::SharedAccumulator;

pub enum RegistryCommand {
    GetOrCreate {
        identifier: String,
        response: oneshot::Sender<SharedAccumulator>,
    },
    Remove {
        identifier: String,
        response: oneshot::Sender<Option<SharedAccumulator>>,
    },
    GetIdentifiers {
        response: oneshot::Sender<Vec<String>>,
    },
}
