//! Pyramid construction.
//!
//! The engine walks the tree depth-first, renders leaves from tiles and composes parents from
//! their children, handing each finished node to a [`sink::NodeSink`].

/// Traversal, leaf rendering and parent composition.
pub mod engine;
/// Anti-aliasing filters.
pub mod filter;
/// Build options.
pub mod opts;
/// Reusable node buffers.
pub mod pool;
/// Node consumers and loaders.
pub mod sink;
pub(crate) mod splitter;
