//! Request handlers

pub mod health;
pub mod queries;
pub mod stats;
