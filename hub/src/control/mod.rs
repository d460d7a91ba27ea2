// Local control surface of the host daemon
// Requests from the CLI that read or change the registry

pub mod client;
pub mod protocol;
pub mod server;

pub use protocol::{ControlErrorCode, ControlRequest, ControlResponse};
pub use server::{bind_control_socket, serve_control, ControlState};
