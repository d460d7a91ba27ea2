// Remote viewer side: transport, connection lifecycle and the stream bridge
// A viewer opens one StreamBridge per session it displays

pub mod bridge;
pub mod clean;
pub mod connection;
pub mod memory;
pub mod protocol;
pub mod transport;

pub use bridge::{BridgeConfig, StreamBridge, StreamCursor, ViewerEvent};
pub use connection::{ConnectionMachine, ConnectionState, Connector, HostLink};
pub use memory::MemoryTransport;
pub use transport::{ContentUpdate, SocketTransport, TokenSource, Transport};
