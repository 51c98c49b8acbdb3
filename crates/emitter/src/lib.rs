pub mod in_process;
pub mod protocol;
pub mod reconnect;
pub mod websocket;

pub use in_process::{route_inbound, ClientSink, EchoSink, InProcessEmitter};
pub use protocol::{BatchedTask, ClientMessage, GatewayMessage};
pub use reconnect::ReconnectBackoff;
pub use websocket::WebSocketEmitter;
