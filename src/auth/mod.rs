//! Request authorization for the Azure Blob Storage API.

mod sas;
mod shared_key;

pub use sas::*;
pub use shared_key::*;
