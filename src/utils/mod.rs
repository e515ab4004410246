//! contains utils used in configuring the gateway and scanning genome dirs

pub mod files;
pub mod parameters;

pub use files::*;
pub use parameters::*;
