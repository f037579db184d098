//! Message type codes, POSIX-style error codes, and the pipe-delimited
//! payload codec shared by every SimpliDFS component that speaks the
//! framed transport.

mod error_code;
mod message_type;
mod payload;

pub use error_code::{ErrorCode, UnknownErrorCode};
pub use message_type::{MessageType, UnknownMessageType};
pub use payload::Payload;
