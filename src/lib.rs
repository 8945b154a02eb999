//! hyperbeam - security-first HTTP/1.1 server core with WebSocket upgrade and TLS
//!
//! A connection-pipeline library that sits one level above a raw socket and one level
//! below an application router: it owns request parsing, keep-alive bookkeeping, the
//! response writer, protocol-upgrade negotiation (WebSocket), and optional TLS
//! termination, and hands a plain `(request, response)` pair to an application-supplied
//! handler.
//!
//! # Protocol support
//!
//! - **HTTP/1.1**: persistent connections, pipelining (strict FIFO response order)
//! - **HTTP/1.0**: basic support for legacy clients
//! - **WebSocket**: RFC 6455 upgrade negotiation (`Sec-WebSocket-Accept` computation);
//!   frame codec itself is out of scope, a registered [`ProtocolHandlerFactory`] takes
//!   over the connection after the `101` response
//!
//! # Features
//!
//! - **Built-in DoS protection** - request size and connection-count limits, enabled by
//!   default, enforced before the application handler ever runs.
//! - **Fully configurable limits and timeouts** for requests, responses, and connections.
//! - **Custom connection filtering** - implement [`ConnectionFilter`] to reject
//!   unwanted connections at the TCP level.
//! - **TLS termination** - attach a [`TlsConfig`] to a listener; handshakes run off the
//!   accept path so a stalling client can't block other connections.
//! - **Graceful shutdown** - [`Server::stop`] quiesces in-flight responses before the
//!   process exits.
//! - **Storing data between requests** - the [`ConnectionData`] trait.
//!
//! # Quick start
//!
//! ```no_run
//! use hyperbeam::{Server, Handler, Request, Response, Handled, StatusCode};
//! use tokio::net::TcpListener;
//!
//! struct MyHandler;
//!
//! impl Handler for MyHandler {
//!     async fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
//!         resp.status(StatusCode::Ok).body("Hello World!")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
pub(crate) mod buffer;
pub(crate) mod http {
    pub(crate) mod headers;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod keepalive;
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod lifecycle;
    pub(crate) mod server_impl;
    pub(crate) mod tls;
    pub(crate) mod upgrade;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    http::{
        headers::HeadersContainer,
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    keepalive::KeepAliveState,
    server::{
        connection::{ConnectionData, ConnectionFilter},
        lifecycle::ServerLifecycleListener,
        server_impl::{Handler, Server, ServerBuilder},
        tls::TlsConfig,
        upgrade::{ConnectionUpgrader, ProtocolHandlerFactory, WebSocketAccept},
    },
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&mut Request, &mut Response) -> Handled>(f: F) {
    f(
        &mut Request::new(&crate::limits::ReqLimits::default()),
        &mut Response::new(&crate::limits::RespLimits::default()),
    );
}

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use hyperbeam::{Handled, Handler, Request, Response, StatusCode};
        struct $name;

        // `<()>` to check functionality
        impl Handler<()> for $name {
            async fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
                resp.status(StatusCode::Ok).body("Hello world!")
            }
        }
    };
}

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str(value: Option<&[u8]>) -> Option<&str> {
        Some(from_utf8(value?).unwrap())
    }

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub(crate) fn str_2<'a>(value: (&'a [u8], &'a [u8])) -> (&'a str, &'a str) {
        (from_utf8(value.0).unwrap(), from_utf8(value.1).unwrap())
    }
}
