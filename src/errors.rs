/// Structured error types for volumebot
///
/// Errors are split by the layer that produces them. The propagation policy
/// is: per-operation and per-wallet errors are caught at the batch boundary
/// and converted into accounted results; only configuration and venue
/// resolution errors terminate a session.

// =============================================================================
// CONFIGURATION ERRORS - fatal before a session starts
// =============================================================================

#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidConfig { field: String, reason: String },
    InvalidRange { field: String, reason: String },
    InvalidPrivateKey { reason: String },
    FileNotFound { path: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidConfig { field, reason } => {
                write!(f, "Invalid config field '{}': {}", field, reason)
            }
            ConfigError::InvalidRange { field, reason } => {
                write!(f, "Invalid range '{}': {}", field, reason)
            }
            ConfigError::InvalidPrivateKey { reason } => {
                write!(f, "Invalid private key: {}", reason)
            }
            ConfigError::FileNotFound { path, reason } => {
                write!(f, "Config file not found at '{}': {}", path, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// =============================================================================
// RPC TRANSPORT ERRORS
// =============================================================================

#[derive(Debug, Clone)]
pub enum RpcError {
    Network { message: String },
    HttpStatus { status: u16, body: String },
    RpcResponse { message: String },
    InvalidResponse { message: String },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Network { message } => write!(f, "Network error: {}", message),
            RpcError::HttpStatus { status, body } => {
                write!(f, "HTTP {}: {}", status, body)
            }
            RpcError::RpcResponse { message } => write!(f, "RPC error: {}", message),
            RpcError::InvalidResponse { message } => {
                write!(f, "Invalid RPC response: {}", message)
            }
        }
    }
}

impl std::error::Error for RpcError {}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        RpcError::Network {
            message: err.to_string(),
        }
    }
}

// =============================================================================
// POOL ORACLE ERRORS
// =============================================================================

#[derive(Debug, Clone)]
pub enum OracleError {
    PoolNotFound { mint: String },
    RouteUnavailable { mint: String, reason: String },
    Api { message: String },
    Parse { message: String },
}

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleError::PoolNotFound { mint } => {
                write!(f, "No tradable pool found for mint {}", mint)
            }
            OracleError::RouteUnavailable { mint, reason } => {
                write!(f, "Swap route unavailable for {}: {}", mint, reason)
            }
            OracleError::Api { message } => write!(f, "Router API error: {}", message),
            OracleError::Parse { message } => write!(f, "Router response parse error: {}", message),
        }
    }
}

impl std::error::Error for OracleError {}

// =============================================================================
// EXECUTION ENGINE ERRORS
// =============================================================================

#[derive(Debug, Clone)]
pub enum ExecutorError {
    /// All retry attempts were consumed without a confirmed transaction
    SubmissionExhausted { attempts: u32, last_error: String },
    Submission { message: String },
    Signing { message: String },
    Simulation { message: String },
    Confirmation { signature: String, message: String },
}

impl std::fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorError::SubmissionExhausted {
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "Submission exhausted after {} attempts, last error: {}",
                    attempts, last_error
                )
            }
            ExecutorError::Submission { message } => write!(f, "Submission failed: {}", message),
            ExecutorError::Signing { message } => write!(f, "Signing error: {}", message),
            ExecutorError::Simulation { message } => write!(f, "Simulation failed: {}", message),
            ExecutorError::Confirmation { signature, message } => {
                write!(f, "Confirmation failed for {}: {}", signature, message)
            }
        }
    }
}

impl std::error::Error for ExecutorError {}

// =============================================================================
// WALLET LIFECYCLE ERRORS
// =============================================================================

#[derive(Debug, Clone)]
pub enum WalletError {
    Persistence { public_key: String, reason: String },
    Reclaim { public_key: String, reason: String },
    NotFound { public_key: String },
    Archive { public_key: String, reason: String },
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletError::Persistence { public_key, reason } => {
                write!(f, "Failed to persist wallet {}: {}", public_key, reason)
            }
            WalletError::Reclaim { public_key, reason } => {
                write!(f, "Failed to reclaim funds from {}: {}", public_key, reason)
            }
            WalletError::NotFound { public_key } => {
                write!(f, "Wallet not found: {}", public_key)
            }
            WalletError::Archive { public_key, reason } => {
                write!(f, "Failed to archive wallet {}: {}", public_key, reason)
            }
        }
    }
}

impl std::error::Error for WalletError {}

// =============================================================================
// SESSION ERRORS - the only ones that abort a running session
// =============================================================================

#[derive(Debug, Clone)]
pub enum SessionError {
    Config(ConfigError),
    VenueUnavailable { mint: String, reason: String },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Config(e) => write!(f, "Configuration error: {}", e),
            SessionError::VenueUnavailable { mint, reason } => {
                write!(f, "Venue unavailable for {}: {}", mint, reason)
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        SessionError::Config(err)
    }
}
