//! Request handlers

pub mod beacon;
