pub mod classify;
pub mod client;
pub mod failover;
pub mod sse;

pub use classify::{Classification, classify};
pub use client::{VertexClient, upstream_method};
pub use failover::{FailoverSuccess, RegionAttempt, run as run_failover};
pub use sse::{SseLineBuffer, decode_anthropic, decode_gemini};
