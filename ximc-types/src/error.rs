pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid device locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("Unknown device scheme: {0}")]
    UnknownScheme(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
