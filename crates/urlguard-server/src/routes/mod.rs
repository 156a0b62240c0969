//! HTTP routes

pub mod evaluate;
pub mod health;
pub mod stats;
