//! XML deserialization for Azure Blob Storage API responses.

pub mod deserialize;

pub use deserialize::*;
