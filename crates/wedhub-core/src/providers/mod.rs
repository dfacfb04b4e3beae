// Gateway implementations - hosted backend, local SQLite, and in-memory
pub mod local;
pub mod memory;
pub mod rest;

pub use local::LocalGateway;
pub use memory::{GatewayCalls, InMemoryGateway};
pub use rest::RestGateway;
