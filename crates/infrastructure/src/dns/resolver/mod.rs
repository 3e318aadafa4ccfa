//! Resolver engine: the frame-stack recursive resolver, forwarding
//! fan-out, per-server exchange and response sanitization.

pub mod fanout;
pub mod frame;
pub mod query;
pub mod recursive;
pub mod sanitize;

pub use frame::{FramePurpose, FrameStack, ResolveFrame};
pub use recursive::{RecursiveResolver, ResolverMetrics};
