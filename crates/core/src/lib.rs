//! Shared building blocks for the notification gateway: configuration,
//! error taxonomy, the request/admission data model and cancellation.

pub mod cancel;
pub mod config;
pub mod error;
pub mod types;

pub use cancel::CancellationToken;
pub use config::AppConfig;
pub use error::{GatewayError, GatewayResult};
pub use types::{Admission, EngineState, NotificationRequest, OutboundMessage};
