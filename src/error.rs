use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChangeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("GPIO daemon unavailable at {0}")]
    DaemonUnavailable(String),
    #[error("invalid setting `{key}`: {value:?}")]
    InvalidSetting { key: String, value: String },
    #[error("a dispense operation is already in progress")]
    DispenserBusy,
}

pub type Result<T> = std::result::Result<T, ChangeError>;
