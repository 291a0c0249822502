//! Resilient outbound dispatch
//!
//! Everything between a shaped upstream request and its response body:
//! endpoint pool, retry/backoff, header synthesis, and translation of the
//! upstream's newline-delimited event stream.

pub mod collect;
pub mod dispatch;
pub mod headers;
pub mod pool;
pub mod source;
pub mod stream;

pub use collect::collect_content;
pub use dispatch::{DispatchConfig, Dispatcher, OutboundTransport, ResolvedTransport};
pub use pool::{ProxyEndpoint, ProxyPool};
pub use source::{EndpointSource, HttpAddressSource};
pub use stream::{Fragment, FragmentStream};
