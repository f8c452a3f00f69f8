//! Fauna Client Library
//!
//! Blocking client for the Fauna REST API. Requests run inside a scoped
//! [`Client::context`], which binds a per-thread resource cache to a
//! [`Connection`]:
//!
//! ```rust,no_run
//! use fauna_rs::{Client, Config, Connection};
//! use serde_json::json;
//!
//! fn main() -> fauna_rs::Result<()> {
//!     let connection = Connection::new(&Config::with_token("secret"))?;
//!     Client::context(connection, || -> fauna_rs::Result<()> {
//!         let user = Client::post("users", &json!({"email": "a@example.com", "password": "pw"}))?;
//!         let again = Client::get(user["ref"].as_str().unwrap_or_default())?;
//!         println!("{:?}", again);
//!         Ok(())
//!     })
//! }
//! ```

mod client;
mod connection;
mod context;
pub mod resource;
pub mod telemetry;

pub use client::{Client, ContextGuard};
pub use connection::{Connection, HttpBackend, HttpRequest, HttpResponse, ReqwestBackend, API_VERSION};
pub use context::CachingContext;
pub use fauna_core::{Config, Credentials, Diagnostics, ErrorBody, ErrorData, Failure, Payload};
pub use resource::Resource;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Bad request: {0}")]
    BadRequest(ErrorBody),

    #[error("Unauthorized: {0}")]
    Unauthorized(ErrorBody),

    #[error("Not found: {0}")]
    NotFound(ErrorBody),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(ErrorBody),

    /// Any other non-2xx status, or a failure before a response arrived
    #[error("Network error: {message}")]
    Network {
        status: Option<u16>,
        body: Option<ErrorBody>,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("You must be within a Client::context block to perform operations")]
    NoContext,

    /// The current context is already borrowed further up the call stack
    #[error("The current context is in use by an enclosing call")]
    ContextBusy,

    #[error("Invalid reference {0:?}")]
    InvalidReference(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("Resource {0} is deleted and can no longer be modified")]
    Frozen(String),
}

impl Error {
    /// Classify a non-2xx response.
    pub(crate) fn from_status(status: u16, body: &str) -> Self {
        let parsed = ErrorBody::parse(body);
        match status {
            400 => Error::BadRequest(parsed),
            401 => Error::Unauthorized(parsed),
            404 => Error::NotFound(parsed),
            405 => Error::MethodNotAllowed(parsed),
            _ => Error::Network {
                status: Some(status),
                message: format!("status {} - {}", status, parsed),
                body: Some(parsed),
            },
        }
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Error::Network {
            status: None,
            body: None,
            message: err.to_string(),
        }
    }

    /// HTTP status behind this error, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::BadRequest(_) => Some(400),
            Error::Unauthorized(_) => Some(401),
            Error::NotFound(_) => Some(404),
            Error::MethodNotAllowed(_) => Some(405),
            Error::Network { status, .. } => *status,
            _ => None,
        }
    }

    /// Server error body, when one was received.
    pub fn body(&self) -> Option<&ErrorBody> {
        match self {
            Error::BadRequest(body)
            | Error::Unauthorized(body)
            | Error::NotFound(body)
            | Error::MethodNotAllowed(body) => Some(body),
            Error::Network { body, .. } => body.as_ref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
