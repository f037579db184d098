//! Length-framed request/response transport shared by every SimpliDFS
//! component (`spec.md` §4.1).

mod error;
mod framed;
mod server;

pub use error::TransportError;
pub use framed::{connect_with_retry, FramedConnection, MAX_PAYLOAD_BYTES};
pub use server::Server;
