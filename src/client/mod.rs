//! Model endpoint client: credential rotation, HTTP transport, retrying executor.

mod credentials;
mod endpoint;
mod executor;
mod ledger;
mod registry;

#[cfg(test)]
pub(crate) mod mock;

pub use credentials::*;
pub use endpoint::*;
pub use executor::*;
pub use ledger::*;
pub use registry::*;
