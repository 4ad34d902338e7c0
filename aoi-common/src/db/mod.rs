//! Database schema, initialization and record decoding

pub mod init;
pub mod records;

pub use init::*;
pub use records::*;
