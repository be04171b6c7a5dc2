//! Payment provider integration

pub mod gateway;
pub mod paystack;
pub mod webhook;

pub use gateway::{GatewayError, GatewayStatus, PaymentStatusGateway};
pub use paystack::PaystackGateway;
pub use webhook::{PaymentNotification, WebhookError};
