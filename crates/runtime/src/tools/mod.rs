//! Tool server management and the tool host boundary.

mod errors;
mod host;
mod manager;
mod server;
mod types;

pub use errors::ToolError;
pub use host::ToolHost;
pub use manager::ToolServerManager;
pub use server::{CONNECT_TIMEOUT, ToolServer};
pub use types::ToolDescriptor;
