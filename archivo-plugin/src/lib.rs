pub mod connect;
pub mod connection;
pub mod pre_upstream;

pub use connect::{interception_decision, on_connect, ConnectDecision};
pub use connection::ConnectionConfig;
pub use pre_upstream::{pre_upstream, RenderedResponse};
