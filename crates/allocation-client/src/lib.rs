mod aggregate;
mod batch;
mod executor;
mod outcome;
mod proxy;
mod query;
mod transport;

pub use aggregate::*;
pub use batch::*;
pub use executor::*;
pub use outcome::*;
pub use proxy::*;
pub use query::*;
pub use transport::*;

#[cfg(test)]
pub(crate) mod test_utils;
