//! Shared domain and wire protocol for the order-tracking service.

pub mod error;
pub mod ids;
pub mod order;
pub mod rest;
pub mod tracking;
pub mod wire;
