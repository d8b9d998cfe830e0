//! Payment reconciliation for property bookings.
//!
//! Payments are opened against the Chapa hosted checkout and settled by
//! whichever signal reaches the service first: the gateway webhook, an
//! explicit verify call from the customer, or the background scheduler.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
