use crate::{
    errors::ErrorKind,
    http::{
        request::{Parser, Request},
        response::Response,
        types::Version,
    },
    keepalive::KeepAliveState,
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    server::{
        server_impl::{AllLimits, Handler},
        upgrade::ConnectionUpgrader,
    },
    Handled,
};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Instant};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::sleep,
};

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    connection_data: S,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
    pub(crate) keep_alive_state: KeepAliveState,
    pub(crate) upgrader: Arc<ConnectionUpgrader>,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(
        handler: Arc<H>,
        upgrader: Arc<ConnectionUpgrader>,
        limits: AllLimits,
    ) -> Self {
        Self {
            handler,
            connection_data: S::new(),

            connection: Connection::new(),
            parser: Parser::new(&limits.2),
            request: Request::new(&limits.2),
            response: Response::new(&limits.3),

            server_limits: limits.0,
            conn_limits: limits.1,
            req_limits: limits.2,
            resp_limits: limits.3,
            keep_alive_state: limits.4,
            upgrader,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    /// Drives a single accepted, plaintext connection from its first byte to disconnection.
    ///
    /// `remote_addr`/`local_addr` are recorded on every parsed [`Request`]. Takes `stream`
    /// by value: on a successful WebSocket upgrade, ownership passes to the registered
    /// [`crate::server::upgrade::ProtocolHandlerFactory`] and never returns here.
    #[inline]
    pub(crate) async fn run(
        &mut self,
        mut stream: TcpStream,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Result<(), io::Error> {
        match self
            .impl_run(&mut stream, remote_addr, local_addr, false)
            .await
        {
            Ok(None) => Ok(()),
            Ok(Some(factory)) => {
                factory.handle(&self.request, stream).await;
                Ok(())
            }
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                error.trace();

                self.conn_limits
                    .send_error(
                        &mut stream,
                        error,
                        self.request.version(),
                        self.server_limits.json_errors,
                    )
                    .await
            }
        }
    }

    /// Drives a single accepted, TLS-terminated connection. Unlike [`Self::run`], a
    /// successful WebSocket upgrade here cannot hand the socket to a
    /// [`crate::server::upgrade::ProtocolHandlerFactory`] (which is specified in terms of a
    /// bare [`TcpStream`]); such a request is instead failed with [`ErrorKind::UpgradeFailure`].
    #[inline]
    pub(crate) async fn run_tls(
        &mut self,
        mut stream: tokio_rustls::server::TlsStream<TcpStream>,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Result<(), io::Error> {
        match self.impl_run(&mut stream, remote_addr, local_addr, true).await {
            Ok(None) => Ok(()),
            Ok(Some(_factory)) => {
                ErrorKind::UpgradeFailure.trace();
                self.conn_limits
                    .send_error(
                        &mut stream,
                        ErrorKind::UpgradeFailure,
                        self.request.version(),
                        self.server_limits.json_errors,
                    )
                    .await
            }
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                error.trace();

                self.conn_limits
                    .send_error(
                        &mut stream,
                        error,
                        self.request.version(),
                        self.server_limits.json_errors,
                    )
                    .await
            }
        }
    }

    /// Drives a single accepted Unix-domain connection. Has no remote/local network
    /// address, so `set_peer` records an unspecified placeholder for both; like
    /// [`Self::run_tls`], a requested WebSocket upgrade cannot be handed off and fails
    /// with [`ErrorKind::UpgradeFailure`].
    #[inline]
    pub(crate) async fn run_unix(
        &mut self,
        mut stream: tokio::net::UnixStream,
    ) -> Result<(), io::Error> {
        const UNSPECIFIED: SocketAddr =
            SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0);

        match self.impl_run(&mut stream, UNSPECIFIED, UNSPECIFIED, false).await {
            Ok(None) => Ok(()),
            Ok(Some(_factory)) => {
                ErrorKind::UpgradeFailure.trace();
                self.conn_limits
                    .send_error(
                        &mut stream,
                        ErrorKind::UpgradeFailure,
                        self.request.version(),
                        self.server_limits.json_errors,
                    )
                    .await
            }
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                error.trace();

                self.conn_limits
                    .send_error(
                        &mut stream,
                        error,
                        self.request.version(),
                        self.server_limits.json_errors,
                    )
                    .await
            }
        }
    }

    /// Runs the request/response loop on a borrowed socket. Returns `Ok(Some(factory))`
    /// when the connection ended in a successful protocol upgrade — the caller then hands
    /// its owned `stream` to `factory` — or `Ok(None)` for an ordinary close.
    #[inline]
    pub(crate) async fn impl_run<Socket: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        stream: &mut Socket,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        enable_tls: bool,
    ) -> Result<Option<Arc<dyn crate::server::upgrade::ProtocolHandlerFactory>>, ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        loop {
            if self.is_expired() {
                return Ok(None);
            }

            self.reset_request_response();
            self.request.set_peer(remote_addr, local_addr, enable_tls);

            if self
                .parser
                .fill_buffer(stream, self.conn_limits.socket_read_timeout)
                .await?
                == 0
            {
                return Ok(None);
            }

            self.response.version = self.parse()?;
            self.response.configure_keep_alive(
                self.conn_limits.connection_lifetime.as_secs(),
                self.keep_alive_state.requests_remaining(),
            );

            if let Some(factory) = self.diversion_factory() {
                self.perform_upgrade(stream).await?;
                return Ok(Some(factory));
            }

            self.handler
                .handle(&mut self.connection_data, &mut self.request, &mut self.response)
                .await;

            self.conn_limits
                .write_bytes(stream, self.response.buffer())
                .await?;

            self.keep_alive_state.decrement();

            if !self.response.keep_alive || self.keep_alive_state.is_exhausted() {
                return Ok(None);
            }

            self.connection.request_count += 1;
        }
    }

    /// Returns the registered upgrade factory when the current request is a recognized,
    /// well-formed WebSocket handshake. Malformed-but-intended upgrades are left for the
    /// handler to reject normally; this crate only diverts requests it can actually serve.
    #[inline]
    fn diversion_factory(&self) -> Option<Arc<dyn crate::server::upgrade::ProtocolHandlerFactory>> {
        if !ConnectionUpgrader::is_websocket_upgrade(&self.request) {
            return None;
        }

        self.upgrader.websocket_factory().cloned()
    }

    #[inline]
    async fn perform_upgrade<Socket: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        stream: &mut Socket,
    ) -> Result<(), ErrorKind> {
        let Some(accept) = self
            .request
            .header(b"sec-websocket-key")
            .and_then(crate::server::upgrade::WebSocketAccept::compute)
        else {
            return Err(ErrorKind::UpgradeFailure);
        };

        self.response
            .status(crate::StatusCode::SwitchingProtocols)
            .header(b"upgrade", b"websocket")
            .header(b"connection", b"Upgrade")
            .header(b"sec-websocket-accept", accept);

        self.conn_limits
            .write_bytes(stream, self.response.buffer())
            .await?;

        Ok(())
    }
}

impl ConnLimits {
    #[inline]
    pub(crate) async fn send_error<Socket: AsyncWrite + Unpin>(
        &self,
        stream: &mut Socket,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version, json_errors))
            .await
    }

    #[inline]
    pub(crate) async fn write_bytes<Socket: AsyncWrite + Unpin>(
        &self,
        stream: &mut Socket,
        response: &[u8],
    ) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => result,
            _ = sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            },
        }
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn is_expired(&self) -> bool {
        !self.response.keep_alive
            || self.keep_alive_state.is_exhausted()
            || self.connection.request_count >= self.conn_limits.max_requests_per_connection
            || self.connection.created.elapsed() > self.conn_limits.connection_lifetime
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use hyperbeam::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use hyperbeam::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// File-based IP blacklist:
/// ```
/// use std::net::SocketAddr;
/// use hyperbeam::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     db: DatabaseClient
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
///         Ok(())
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM            Tokio Task |
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                 /\                    |
/// |       || Ok(())                          ||                    |
/// |       \/                Err(Handled)     ||                    |
/// |   [--------------] ========================/                   |
/// |   [ filter_async ]                             [-----------]   |
/// |   [--------------] ==========================> [  Handler  ]   |
/// |                             Ok(())             [-----------]   |
/// |                                                                |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    ///
    /// Use for:
    /// - IP blacklist/whitelist (in-memory cache)
    /// - Geographic IP restrictions
    /// - Rate limiting counters
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds.Executes asynchronously within
    /// the Tokio runtime.
    ///
    /// Use for:
    /// - Database lookups
    /// - External API calls
    /// - File system operations
    /// - Complex business logic
    /// - Machine learning inference
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//

#[cfg(test)]
mod def_handler {
    use super::*;
    use crate::{Handled, StatusCode};

    pub(crate) struct DefHandler;

    impl Handler<()> for DefHandler {
        async fn handle(&self, _: &mut (), _: &mut Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("test")
        }
    }

    impl HttpConnection<DefHandler, ()> {
        #[inline]
        pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();

            Self {
                handler: Arc::new(DefHandler),
                connection_data: (),

                connection: Connection::new(),
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,
                keep_alive_state: KeepAliveState::default(),
                upgrader: Arc::new(ConnectionUpgrader::new()),
            }
        }
    }
}
