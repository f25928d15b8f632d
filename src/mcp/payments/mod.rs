//! CEP-8 payment surface: tag parsing, notification registry, and the
//! UI-only handler. Payment execution is deliberately absent.

pub mod handler;
pub mod notifications;
pub mod tags;

pub use handler::{PaymentHandler, PaymentHandlerRequest, UiOnlyPaymentHandler};
pub use notifications::{
    PaymentNotification, PaymentNotificationRegistry, PaymentStatus, PaymentUiState,
};
