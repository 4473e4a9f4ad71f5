//! A static file server with server-side includes.
//!
//! This crate contains all the moving parts of the server. The application
//! itself, via `main.rs`, is only a very tiny frontend.
//!
//! Requests are answered by a [`Server`] which resolves the request path
//! against a root directory and produces a redirect, a directory listing,
//! a file, or a document with its server-side includes processed. Servers
//! can be used without networking via [`Server::serve`] or bound to a
//! socket via [`listen`].

pub use self::config::Config;
pub use self::error::{ExitError, Failed};
pub use self::http::{listen, ListenOptions, Listening, Server, ServerOptions};
pub use self::operation::Operation;

pub mod config;
pub mod error;
pub mod http;
pub mod log;
pub mod mime;
pub mod operation;
pub mod resolve;
pub mod ssi;
pub mod utils;
