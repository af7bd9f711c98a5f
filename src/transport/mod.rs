//! Local TCP transports between an adapter and a CAD application.
//!
//! [`SocketClient`] dials a command socket hosted by the CAD application.
//! [`SocketServer`] is the reverse: it runs inside the CAD process and hands
//! commands to the application's own execution thread.

mod socket_client;
mod socket_server;

pub use socket_client::SocketClient;
pub use socket_server::{PendingOperation, SocketServer};

pub(crate) const OPERATION_TIMED_OUT: &str = "Operation timed out";
