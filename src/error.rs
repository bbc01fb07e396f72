use crate::dataset::DatasetError;

/// Errors raised while preparing data, training or running inference.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The CSV input could not be turned into digit items.
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// A training config could not be loaded.
    #[error("{0}")]
    Config(#[from] burn::config::ConfigError),

    /// A model record could not be saved or loaded.
    #[error("{0}")]
    Record(#[from] burn::record::RecorderError),

    /// Artifact files could not be written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The submission file could not be written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
