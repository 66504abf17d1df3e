//! Double buffering for non-realtime endpoints
//!
//! [`ProxyServer`] runs a background I/O thread that keeps a [`ProxyRing`]
//! per registered endpoint filled (inputs) or drained (outputs).
//! [`ProxiedEndpoint`] wraps such an endpoint for the engine, which then
//! only copies sample buffers in and out of memory.
//!
//! ```text
//!  engine thread                 proxy-io thread
//!  ─────────────                 ───────────────
//!  ProxiedEndpoint::read  <──ring──  endpoint.read_buffer
//!  ProxiedEndpoint::write ──ring──>  endpoint.write_buffer
//! ```

mod buffered;
mod ring;
mod server;

pub use buffered::ProxiedEndpoint;
pub use ring::ProxyRing;
pub use server::{ClientSlot, ProxyServer, WAIT_TIMEOUT};
