//! chatgate: a multi-tenant gateway that unifies heterogeneous conversational
//! AI backends behind one client-facing SSE streaming API.
//!
//! A turn flows through the session resolver (cached config and history),
//! the backend invoker (uniform chunk stream), the turn aggregator (content
//! accumulation, multi-message splitting, finalization), and the session
//! reconciler (post-turn cache update). The transport layer frames the turn
//! as typed signals encoded over SSE.

pub mod agent;
pub mod background;
pub mod cache;
pub mod config;
pub mod handlers;
pub mod models;
pub mod platform;
pub mod server;
pub mod sse_codec;
pub mod store;
pub mod transport;
pub mod turn;
