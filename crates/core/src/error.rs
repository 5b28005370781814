use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("resource kind is not registered or could not be resolved")]
    UnknownKind,
}
