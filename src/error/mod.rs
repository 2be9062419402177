use thiserror::Error;

/// Exit codes for the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Run completed (every target reachable, or `--strict` not requested)
    Success = 0,
    /// Some targets were unreachable and `--strict` was requested
    TargetsUnreachable = 1,
    /// The preflight check failed through a user-supplied proxy
    PreflightFailure = 2,
    /// Network failure outside of a per-target probe
    NetworkFailure = 3,
    /// Configuration error, including an unusable proxy URL
    ConfigError = 4,
    /// Invalid input
    InvalidInput = 5,
    /// Interrupted by the user
    Interrupted = 130,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid proxy '{proxy}': {reason}")]
    ProxyConfig { proxy: String, reason: String },

    #[error("Preflight check failed: {url} is not reachable through proxy {proxy}: {reason}")]
    Preflight {
        url: String,
        proxy: String,
        reason: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Interrupted")]
    Interrupted,
}

impl AppError {
    pub fn proxy(proxy: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::ProxyConfig {
            proxy: proxy.into(),
            reason: reason.into(),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::Config(_) | AppError::ProxyConfig { .. } | AppError::TomlParse(_) => {
                ExitCode::ConfigError
            }
            AppError::Preflight { .. } => ExitCode::PreflightFailure,
            AppError::Network(_) => ExitCode::NetworkFailure,
            AppError::FileNotFound(_) | AppError::Io(_) => ExitCode::InvalidInput,
            AppError::Interrupted => ExitCode::Interrupted,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
