//! Route definitions

pub mod beacon;
