//! Request handlers for the REST surface.

pub mod applications;
pub mod deliveries;
pub mod endpoints;
pub mod health;
pub mod messages;
pub mod stats;
