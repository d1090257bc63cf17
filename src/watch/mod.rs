mod watch_map;
pub use watch_map::*;
