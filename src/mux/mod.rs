mod mux;
pub use mux::*;
