use thiserror::Error;

pub type HardwareResult<T> = std::result::Result<T, HardwareError>;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("probe failed: {0}")]
    Probe(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
