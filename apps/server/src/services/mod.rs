//! Request orchestration and response population

pub mod beacon;
pub mod response;

pub use beacon::{BeaconService, QueryTarget};
pub use response::ResponseBuilder;
