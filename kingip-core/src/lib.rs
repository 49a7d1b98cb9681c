pub mod error;
pub mod logging;
pub mod proto;
pub mod quic;
pub mod registry;
pub mod splice;
pub mod store;
pub mod transport;
pub mod upstream;

pub use error::{CoreError, CoreResult};
