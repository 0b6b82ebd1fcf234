//! Tool host trait.

use super::{ToolDescriptor, ToolError};
use async_trait::async_trait;
use serde_json::Value;

/// Read-only capability over the live tool-server set.
///
/// This is the boundary between the model loop and side effects: holders can
/// enumerate tools and invoke them, but cannot start or stop servers.
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// All advertised tools, in configured server order.
    fn descriptors(&self) -> Vec<ToolDescriptor>;

    /// Invoke a tool by name.
    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError>;
}
