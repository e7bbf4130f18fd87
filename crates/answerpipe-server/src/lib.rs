//! answerpipe server internals: tool registry, fan-out coordinator,
//! request orchestration, and the HTTP/SSE surface.

pub mod coordinator;
pub mod encoder;
pub mod orchestrator;
pub mod registry;
pub mod server;
