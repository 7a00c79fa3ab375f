use burn::{config::ConfigError, record::RecorderError};

/// Errors raised while preparing data, training or saving artifacts.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Tensor data error: {0}")]
    Data(String),

    #[error("invalid train ratio {0}, expected a value strictly between 0 and 1")]
    InvalidSplit(f64),

    #[error("dataset `{0}` is empty")]
    EmptyDataset(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
