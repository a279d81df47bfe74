// Connection gateway: WebSocket upgrade, per-connection event loop, and the
// room registry shared by all connections.

mod handler;
mod protocol;
mod registry;
mod session;

pub use handler::{router, RelayState};
pub use registry::RoomRegistry;
