mod config;
mod errors;
mod metrics;
mod mux;
mod receiver;
mod resource;
mod subscription;
mod timer;
mod transport;
pub mod utils;
mod watch;

pub use self::config::*;
pub use errors::*;
pub use metrics::*;
pub use mux::*;
pub use receiver::*;
pub use resource::*;
pub use subscription::*;
pub use timer::*;
pub use transport::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
