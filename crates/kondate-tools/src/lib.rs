//! Static tool catalog and the dispatch transport.
//!
//! The registry knows every callable backend tool, which server owns it,
//! its parameter contract, and whether it may answer with an ambiguity
//! question. Dispatch goes over a pluggable [`ToolTransport`]; production
//! uses JSON-RPC 2.0 `tools/call` over HTTP, the native protocol of the
//! configured tool servers.

pub mod descriptor;
pub mod error;
pub mod registry;
pub mod transport;

pub use descriptor::{ParamKind, ParamSpec, ServerKind, ToolDescriptor};
pub use error::{Result, ToolError};
pub use registry::ToolRegistry;
pub use transport::{JsonRpcTransport, ToolTransport};
