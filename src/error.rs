use thiserror::Error;

use crate::store::StoreError;

/// errors that stop a chat session from starting.
///
/// transport failures are not in here: they never escape the controller,
/// they become transcript turns (see `ChatController::settle`).
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no entropy source available for the client id: {0}")]
    Entropy(String),
}
