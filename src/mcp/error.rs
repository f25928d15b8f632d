use std::error::Error as StdError;
use std::fmt;

/// User-facing message shown when no account is logged in.
pub const NOT_LOGGED_IN_MESSAGE: &str = "Please log in to connect to servers";

/// Message shown when the active account carries no usable signer.
pub const NO_SIGNER_MESSAGE: &str = "Failed to get signer from account";

/// Failures surfaced by the MCP client layer.
///
/// Connection-lifecycle failures are captured into per-server
/// [`crate::mcp::session::ConnectionState`] and swallowed; request failures
/// are raised to the caller; parse failures degrade to "no data".
#[derive(Debug)]
pub enum McpError {
    /// No active signer: the user is not logged in, or the account has no
    /// signing capability.
    AuthenticationRequired { message: String },

    /// The connection handshake failed.
    ConnectionFailed { message: String },

    /// A request was attempted without a usable client.
    NotConnected,

    /// The underlying protocol call was rejected: timeout, server error,
    /// or malformed response.
    RequestFailed { message: String },

    /// Announcement or notification content failed validation.
    Parse { message: String },
}

impl McpError {
    pub fn not_logged_in() -> Self {
        McpError::AuthenticationRequired {
            message: NOT_LOGGED_IN_MESSAGE.to_string(),
        }
    }

    pub fn no_signer() -> Self {
        McpError::AuthenticationRequired {
            message: NO_SIGNER_MESSAGE.to_string(),
        }
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::AuthenticationRequired { message } => write!(f, "{message}"),
            McpError::ConnectionFailed { message } => write!(f, "{message}"),
            McpError::NotConnected => write!(f, "Not connected to server"),
            McpError::RequestFailed { message } => write!(f, "{message}"),
            McpError::Parse { message } => write!(f, "{message}"),
        }
    }
}

impl StdError for McpError {}
