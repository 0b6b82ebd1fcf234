//! Tool-related types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool advertised by a tool server.
///
/// Descriptors are fetched once at connect time and cached by the owning
/// [`ToolServer`](super::ToolServer); schema repair mutates that cache in
/// place so every later read sees the repaired form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for input parameters.
    pub input_schema: Value,
}
