use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown register(s) {}; valid registers: {}", .names.join(", "), .universe.join(", "))]
    InvalidRegister {
        names: Vec<String>,
        universe: Vec<String>,
    },

    #[error("internal consistency error: {0}")]
    InternalConsistency(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
