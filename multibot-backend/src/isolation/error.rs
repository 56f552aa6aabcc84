use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    #[error("conversation store: {0}")]
    Store(#[from] StoreError),
    #[error("persona subsystem: {0}")]
    Persona(String),
}
