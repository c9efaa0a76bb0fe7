//! Database bootstrap shared by every binary

pub mod init;

pub use init::*;
