//! Middleware modules
//!
//! Request/response logging and timing wrappers for outbound calls

pub mod logging;
