use thiserror::Error;

#[derive(Debug, Error)]
pub enum LadderbotError {
    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Credibility error: {0}")]
    CredibilityError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Oracle error: {0}")]
    OracleError(String),

    #[error("Position error: {0}")]
    PositionError(String),
}
