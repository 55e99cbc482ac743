pub mod container;
pub mod host;
pub mod session;
