//! The HTTP server.
//!
//! The module provides the [`Server`] that answers requests for the files
//! under a root directory, and [`listen`] which binds a socket and returns
//! a future that drives a server on it.
//!
//! Requests can also be answered without any networking by handing them
//! to [`Server::serve`] directly.

pub use self::dispatch::{default_request_log, RequestLog, Server, ServerOptions};
pub use self::listener::{listen, AddressFamily, ListenOptions, Listening};
pub use self::request::Request;
pub use self::response::{Response, ResponseBuilder};

mod dispatch;
mod listener;
mod listing;
mod request;
mod response;
