//! HLS streaming reverse proxy.
//!
//! Sits between media players and third-party streaming origins: rewrites
//! manifests so every nested playlist, encryption key, and segment is
//! re-fetched through this process (with upstream auth headers the player
//! cannot supply itself), streams segments with byte-range support, and
//! defends itself with per-client throttling, URL-smuggling checks, and a
//! host allowlist.

pub mod cache;
pub mod config;
pub mod error;
pub mod hls;
pub mod metrics;
pub mod policy;
pub mod resolver;
pub mod server;
pub mod upstream;
pub mod url_safety;
