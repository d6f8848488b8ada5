use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("driver start failed: {0}")]
    Start(String),

    #[error("driver stop failed: {0}")]
    Stop(String),

    #[error("driver read failed: {0}")]
    Read(String),

    #[error("driver write failed: {0}")]
    Write(String),

    #[error("driver wait failed: {0}")]
    Wait(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;
