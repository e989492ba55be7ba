pub mod conversion;
pub mod protocol;


pub use conversion::ProtocolError;
pub use protocol::*;
