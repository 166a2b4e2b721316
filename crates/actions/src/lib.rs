//! # Probe Actions
//!
//! The out-of-process action layer: the typed plugin RPC protocol, the
//! dispatcher the engine uses as its [`probe_engine::ActionRunner`], the
//! plugin server loop, and the built-in actions it serves (`hello`,
//! `shell`, `http`).
//!
//! The host executable re-invokes itself as
//! `probe builtin-actions <action>`; the dispatcher and the server speak
//! line-framed JSON over the child's stdio behind a version-and-cookie
//! handshake.

pub mod builtin;
pub mod dispatch;
pub mod protocol;
pub mod server;

pub use dispatch::PluginDispatcher;
pub use protocol::{COOKIE_ENV, COOKIE_KEY, COOKIE_VALUE, PLUGIN_SUBCOMMAND, PROTOCOL_VERSION};
pub use server::serve;
