mod callbacks;
mod facade;
mod factory;
pub use callbacks::*;
pub use facade::*;
pub use factory::*;

#[cfg(test)]
mod factory_test;
