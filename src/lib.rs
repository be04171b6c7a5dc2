//! EstateHub payment verification backend
//!
//! Confirms bookings, investment positions and gift codes after a payment
//! gateway redirect, exactly once per payment reference.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod verification;
