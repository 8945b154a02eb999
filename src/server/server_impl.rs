use crate::{
    errors::ErrorKind,
    http::{
        request::Request,
        response::{Handled, Response},
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy},
    server::{
        connection::{ConnectionData, HttpConnection},
        lifecycle::ServerLifecycleListener,
        tls::TlsConfig,
        upgrade::ConnectionUpgrader,
    },
    keepalive::KeepAliveState,
    ConnectionFilter, Version,
};
use crossbeam::queue::SegQueue;
use std::{
    future::Future,
    marker::PhantomData,
    net::SocketAddr,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream, UnixListener, UnixStream},
    sync::Notify,
    task::yield_now,
    time::sleep as tokio_sleep,
};

/// A trait for handling HTTP requests and generating responses.
///
/// You can use:
/// - `&self` for shared immutable data (e.g. database connection pool, router configuration)
/// - `&mut S` for connection-specific mutable state (e.g. authentication tokens, session data)
///
/// # Examples
///
/// Basic Request Handler
/// ```
/// use hyperbeam::{Handler, Request, Response, Handled, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), req: &mut Request, resp: &mut Response) -> Handled {
///         // Simple echo handler
///         if req.url().target() == b"/echo" {
///             resp.status(StatusCode::Ok).body("Echo response")
///         } else {
///             resp.status(StatusCode::NotFound).body("Not found :(")
///         }
///     }
/// }
/// ```
/// Handler with [`ConnectionData`]
/// ```
/// use hyperbeam::{Handler, ConnectionData, Request, Response, Handled, StatusCode};
///
/// struct CountingHandler;
///
/// impl Handler<State> for CountingHandler {
///     async fn handle(&self, data: &mut State, req: &mut Request, resp: &mut Response) -> Handled {
///         data.request_count += 1;
///
///         resp.status(StatusCode::Ok)
///             .body(format!("Request #{}", data.request_count))
///     }
/// }
///
/// struct State {
///     request_count: usize,
/// }
///
/// impl ConnectionData for State {
///     fn new() -> Self {
///         Self { request_count: 0 }
///     }
///
///     fn reset(&mut self) {
///         self.request_count = 0;
///     }
/// }
/// ```
pub trait Handler<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    /// Processes an HTTP request and generates a response.
    ///
    /// # Parameters
    ///
    /// - `connection_data`: Mutable reference to connection-specific state
    /// - `req`: Mutable reference to the parsed HTTP request, so the body reader
    ///   (`read`/`read_all`/`read_string`) can drain it
    /// - `resp`: Mutable response builder for constructing the response
    ///
    /// # Returns
    ///
    /// `Handled` indicating whether the request was fully processed or
    /// requires further handling by other middleware.
    ///
    /// # Errors
    ///
    /// Implementations should handle errors internally and set appropriate
    /// HTTP status codes on the response. Panics will terminate the connection.
    fn handle(
        &self,
        connection_data: &mut S,
        request: &mut Request,
        response: &mut Response,
    ) -> impl Future<Output = Handled> + Send;
}

/// What a worker pulled off the admission queue: an accepted socket plus whatever
/// address information that transport actually has.
enum Transport {
    Tcp(TcpStream, SocketAddr),
    Unix(UnixStream),
}

/// Either kind of bound listener this server can accept connections on.
enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    #[inline]
    async fn accept(&self) -> std::io::Result<Transport> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                let _ = stream.set_nodelay(true);
                Ok(Transport::Tcp(stream, addr))
            }
            Listener::Unix(listener) => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Transport::Unix(stream))
            }
        }
    }
}

/// An HTTP server that processes incoming connections and requests.
///
/// The server uses a pre-allocated connection pool for maximum performance
/// and implements graceful connection handling with configurable limits.
///
/// # Examples
///
/// ```no_run
/// use hyperbeam::{Server, Handler, Request, Response, Handled, StatusCode};
/// use tokio::net::TcpListener;
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("Hello world!")
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .handler(MyHandler)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server {
    listener: Listener,
    stream_queue: ConnQueue,
    error_queue: ConnQueue,
    server_limits: ServerLimits,
    lifecycle: Arc<ServerLifecycleListener>,
    active_connections: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hyperbeam::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use hyperbeam::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build();
    /// # }
    /// ```
    #[inline]
    pub fn builder<H, S>() -> ServerBuilder<H, S, ()>
    where
        H: Handler<S>,
        S: ConnectionData,
    {
        ServerBuilder {
            listener: None,
            unix_listener: None,
            handler: None,
            connection_filter: Arc::new(()),
            _marker: PhantomData,

            server_limits: None,
            request_limits: None,
            response_limits: None,
            connection_limits: None,
            keep_alive_state: None,
            tls: None,
            upgrader: ConnectionUpgrader::new(),
            lifecycle: Arc::new(ServerLifecycleListener::new()),
        }
    }

    /// Starts the server and begins accepting incoming connections.
    ///
    /// Returns once [`Self::stop`] has been called (on a clone of this `Server` reached
    /// via `Arc`) and every in-flight request has finished.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hyperbeam::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use hyperbeam::Server;
    /// use tokio::net::TcpListener;
    ///
    /// Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build()
    ///     .launch()
    ///     .await
    /// # }
    /// ```
    #[inline]
    pub async fn launch(&self) {
        self.lifecycle.started();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,
                accepted = self.listener.accept() => {
                    let value = match accepted {
                        Ok(value) => value,
                        Err(e) => {
                            self.lifecycle.failed(&e.to_string());
                            continue;
                        }
                    };

                    match self.stream_queue.len() < self.server_limits.max_pending_connections {
                        true => self.stream_queue.push(value),
                        false => self.error_queue.push(value),
                    }
                }
            }
        }

        while self.active_connections.load(Ordering::Acquire) > 0 {
            tokio_sleep(Duration::from_millis(20)).await;
        }

        self.lifecycle.stopped();
    }

    /// Initiates a graceful shutdown: stops accepting new connections and waits for
    /// in-flight responses to finish before [`Self::launch`] returns.
    ///
    /// Requires the caller to hold this `Server` behind an `Arc` shared with the task
    /// running `launch`, since `launch` runs for the server's whole lifetime.
    #[inline]
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    #[inline]
    async fn get_stream(queue: &ConnQueue, wait: &WaitStrategy) -> Transport {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    listener: Option<TcpListener>,
    unix_listener: Option<UnixListener>,
    handler: Option<Arc<H>>,
    connection_filter: Arc<F>,
    _marker: PhantomData<S>,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
    keep_alive_state: Option<KeepAliveState>,
    tls: Option<TlsConfig>,
    upgrader: ConnectionUpgrader,
    lifecycle: Arc<ServerLifecycleListener>,
}

impl<H, S, F> ServerBuilder<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **Exactly one of [`Self::listener`] or [`Self::unix_listener`] must be called.**
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hyperbeam::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use hyperbeam::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Binds a Unix domain socket at `path` for the server to accept connections on,
    /// instead of a TCP listener.
    ///
    /// A pre-existing file at `path` is unlinked before binding, matching the usual
    /// Unix-socket server convention of not surviving a previous unclean shutdown.
    ///
    /// # Errors
    ///
    /// Returns the underlying `std::io::Error` from unlinking or binding.
    #[inline]
    pub fn unix_listener(mut self, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path: &Path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        self.unix_listener = Some(UnixListener::bind(path)?);
        Ok(self)
    }

    /// Binds a TCP listener at `addr` with the socket options this server expects in
    /// production: `SO_REUSEADDR` always set, `SO_REUSEPORT` set only when
    /// `allow_port_reuse` is true, and a listen backlog of 512.
    ///
    /// Equivalent to building the socket with [`socket2::Socket`] yourself and passing it
    /// to [`Self::listener`]; provided so callers don't have to reach for `socket2`
    /// directly for the common case.
    #[inline]
    pub fn bind(self, addr: SocketAddr, allow_port_reuse: bool) -> std::io::Result<Self> {
        use socket2::{Domain, Protocol, Socket, Type};

        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(allow_port_reuse)?;
        #[cfg(not(unix))]
        let _ = allow_port_reuse;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(512)?;

        Ok(self.listener(TcpListener::from_std(socket.into())?))
    }

    /// Sets the request handler that will process incoming requests.
    ///
    /// **This is a required component.**
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hyperbeam::{Server, Handler, Request, Response, Handled, StatusCode};
    /// use tokio::net::TcpListener;
    ///
    /// struct MyStruct;
    ///
    /// impl Handler for MyStruct {
    ///     async fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
    ///         resp.status(StatusCode::Ok).body("Hello World!")
    ///     }
    /// }
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct)
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Installs a connection filter to check incoming TCP connections
    /// before using it.
    ///
    /// Allows early rejection of unwanted IP addresses (before the
    /// first read). Can be used for DDoS protection, geobanning, etc.
    ///
    /// For more information, see [ConnectionFilter](crate::ConnectionFilter)
    #[inline(always)]
    pub fn conn_filter<NewF>(self, filter: NewF) -> ServerBuilder<H, S, NewF>
    where
        NewF: ConnectionFilter,
    {
        ServerBuilder {
            listener: self.listener,
            unix_listener: self.unix_listener,
            handler: self.handler,
            connection_filter: Arc::new(filter),
            _marker: self._marker,
            server_limits: self.server_limits,
            request_limits: self.request_limits,
            response_limits: self.response_limits,
            connection_limits: self.connection_limits,
            keep_alive_state: self.keep_alive_state,
            tls: self.tls,
            upgrader: self.upgrader,
            lifecycle: self.lifecycle,
        }
    }

    /// Configures server-level concurrency, queueing, and overload behavior.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hyperbeam::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use hyperbeam::{Server, limits::ServerLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .server_limits(ServerLimits {
    ///         // Your changes
    ///         max_connections: 2500,
    ///         max_pending_connections: 10000,
    ///         ..ServerLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures connection-level timeouts and per-connection request limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hyperbeam::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use hyperbeam::{Server, limits::ConnLimits};
    /// use tokio::net::TcpListener;
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .connection_limits(ConnLimits {
    ///         // Your changes
    ///         socket_read_timeout: Duration::from_secs(5),
    ///         socket_write_timeout: Duration::from_secs(2),
    ///         connection_lifetime: Duration::from_secs(200),
    ///         ..ConnLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Caps the number of requests a single keep-alive connection may serve before the
    /// server closes it (default: unlimited, bounded only by
    /// [`ConnLimits::max_requests_per_connection`]).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hyperbeam::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use hyperbeam::{Server, KeepAliveState};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .keep_alive_state(KeepAliveState::Limited(1000))
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn keep_alive_state(mut self, state: KeepAliveState) -> Self {
        self.keep_alive_state = Some(state);
        self
    }

    /// Attaches TLS termination. Accepted TCP sockets are handshaken inside the
    /// per-connection worker task, never on the accept path, so a stalling non-TLS
    /// client cannot block concurrent TLS handshakes from completing.
    ///
    /// Not supported together with [`Self::unix_listener`].
    #[inline(always)]
    pub fn tls(mut self, config: TlsConfig) -> Self {
        self.tls = Some(config);
        self
    }

    /// Registers protocol-upgrade handlers (currently: WebSocket) with the server.
    #[inline(always)]
    pub fn upgrader(mut self, upgrader: ConnectionUpgrader) -> Self {
        self.upgrader = upgrader;
        self
    }

    /// Registers lifecycle callbacks (`started`/`stopped`/`failed`/
    /// `client_connection_failed`) with the server.
    #[inline(always)]
    pub fn lifecycle(mut self, lifecycle: ServerLifecycleListener) -> Self {
        self.lifecycle = Arc::new(lifecycle);
        self
    }

    /// Configures request parsing and processing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hyperbeam::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use hyperbeam::{Server, limits::ReqLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .request_limits(ReqLimits {
    ///         // Your changes
    ///         url_size: 1024,
    ///         url_query_parts: 32,
    ///         url_parts: 20,
    ///         ..ReqLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response processing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hyperbeam::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use hyperbeam::{Server, limits::RespLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .response_limits(RespLimits {
    ///         // Your changes
    ///         default_capacity: 1024,
    ///         max_capacity: 4096,
    ///         ..RespLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``Either \`listener\` or \`unix_listener\` must be called to create``
    /// - ``The \`handler\` method must be called to create``
    ///
    /// Panics when:
    /// - Neither `listener` nor `unix_listener` was called.
    /// - The `handler` method was not called.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # hyperbeam::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use hyperbeam::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build();
    /// # }
    /// ```
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let (listener, handler, filter, upgrader, lifecycle, tls, limits) = self.get_all_parts();

        let stream_queue = Arc::new(SegQueue::new());
        let error_queue = Arc::new(SegQueue::new());
        let active_connections = Arc::new(AtomicUsize::new(0));

        for _ in 0..limits.0.max_connections {
            Self::spawn_worker(
                &stream_queue,
                &limits,
                &filter,
                &handler,
                &upgrader,
                &tls,
                &active_connections,
                &lifecycle,
            );
        }
        if limits.0.count_503_handlers != 0 {
            for _ in 0..limits.0.count_503_handlers {
                Self::spawn_alarmist(&error_queue, &limits);
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, &limits);
        }

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits: limits.0,
            lifecycle,
            active_connections,
            shutdown: Arc::new(Notify::new()),
        }
    }

    #[inline]
    fn spawn_worker(
        queue: &ConnQueue,
        limits: &AllLimits,
        filter: &Arc<F>,
        handler: &Arc<H>,
        upgrader: &Arc<ConnectionUpgrader>,
        tls: &Option<Arc<TlsConfig>>,
        active_connections: &Arc<AtomicUsize>,
        lifecycle: &Arc<ServerLifecycleListener>,
    ) {
        let queue = queue.clone();
        let filter = filter.clone();
        let upgrader = upgrader.clone();
        let tls = tls.clone();
        let active_connections = active_connections.clone();
        let lifecycle = lifecycle.clone();
        let mut conn = HttpConnection::new(handler.clone(), upgrader, limits.clone());

        tokio::spawn(async move {
            loop {
                let transport =
                    Server::get_stream(&queue, &conn.server_limits.wait_strategy).await;

                match transport {
                    Transport::Tcp(mut stream, addr) => {
                        let Ok(local_addr) = stream.local_addr() else {
                            continue;
                        };

                        if filter.filter(addr, local_addr, &mut conn.response).is_err()
                            || filter
                                .filter_async(addr, local_addr, &mut conn.response)
                                .await
                                .is_err()
                        {
                            let _ = conn
                                .conn_limits
                                .write_bytes(&mut stream, conn.response.buffer())
                                .await;

                            conn.response.reset(&conn.resp_limits);
                            continue;
                        }

                        active_connections.fetch_add(1, Ordering::AcqRel);
                        match &tls {
                            Some(tls) => match tls.acceptor().accept(stream).await {
                                Ok(tls_stream) => {
                                    if let Err(e) =
                                        conn.run_tls(tls_stream, addr, local_addr).await
                                    {
                                        lifecycle.client_connection_failed(addr, &e.to_string());
                                    }
                                }
                                Err(e) => {
                                    ErrorKind::TlsHandshakeFailure.trace();
                                    lifecycle.client_connection_failed(addr, &e.to_string());
                                }
                            },
                            None => {
                                if let Err(e) = conn.run(stream, addr, local_addr).await {
                                    lifecycle.client_connection_failed(addr, &e.to_string());
                                }
                            }
                        }
                        active_connections.fetch_sub(1, Ordering::AcqRel);
                    }
                    Transport::Unix(stream) => {
                        active_connections.fetch_add(1, Ordering::AcqRel);
                        let _ = conn.run_unix(stream).await;
                        active_connections.fetch_sub(1, Ordering::AcqRel);
                    }
                }
            }
        });
    }

    #[inline]
    fn spawn_alarmist(queue: &ConnQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, conn_limits, ..) = limits.clone();

        tokio::spawn(async move {
            loop {
                let transport =
                    Server::get_stream(&queue, &server_limits.wait_strategy).await;

                match transport {
                    Transport::Tcp(mut stream, _) => {
                        let _ = conn_limits
                            .send_error(
                                &mut stream,
                                ErrorKind::ServiceUnavailable,
                                Version::Http11,
                                server_limits.json_errors,
                            )
                            .await;
                    }
                    Transport::Unix(mut stream) => {
                        let _ = conn_limits
                            .send_error(
                                &mut stream,
                                ErrorKind::ServiceUnavailable,
                                Version::Http11,
                                server_limits.json_errors,
                            )
                            .await;
                    }
                }
            }
        });
    }

    #[inline]
    fn spawn_quiet_alarmist(queue: &ConnQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, ..) = limits.clone();

        tokio::spawn(async move {
            loop {
                let transport = Server::get_stream(&queue, &server_limits.wait_strategy).await;

                drop(transport);
            }
        });
    }

    #[inline]
    #[track_caller]
    #[allow(clippy::type_complexity)]
    fn get_all_parts(
        self,
    ) -> (
        Listener,
        Arc<H>,
        Arc<F>,
        Arc<ConnectionUpgrader>,
        Arc<ServerLifecycleListener>,
        Option<Arc<TlsConfig>>,
        AllLimits,
    ) {
        let listener = match (self.listener, self.unix_listener) {
            (Some(tcp), None) => Listener::Tcp(tcp),
            (None, Some(unix)) => Listener::Unix(unix),
            (None, None) => panic!("Either `listener` or `unix_listener` must be called to create"),
            (Some(_), Some(_)) => {
                panic!("`listener` and `unix_listener` are mutually exclusive")
            }
        };

        (
            listener,
            self.handler
                .expect("The `handler` method must be called to create"),
            self.connection_filter,
            Arc::new(self.upgrader),
            self.lifecycle,
            self.tls.map(Arc::new),
            (
                self.server_limits.clone().unwrap_or_default(),
                self.connection_limits.clone().unwrap_or_default(),
                self.request_limits
                    .clone()
                    .unwrap_or_default()
                    .precalculate(),
                self.response_limits.clone().unwrap_or_default(),
                self.keep_alive_state.unwrap_or_default(),
            ),
        )
    }
}

type ConnQueue = Arc<SegQueue<Transport>>;
pub(crate) type AllLimits = (
    ServerLimits,
    ConnLimits,
    ReqLimits,
    RespLimits,
    KeepAliveState,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Handled, Request, Response, StatusCode};

    struct DefHandler;

    impl Handler<()> for DefHandler {
        async fn handle(&self, _: &mut (), _: &mut Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("test")
        }
    }

    #[test]
    #[should_panic(expected = "Either `listener` or `unix_listener` must be called")]
    fn build_without_listener_panics() {
        Server::builder::<DefHandler, ()>().handler(DefHandler).build();
    }

    #[tokio::test]
    #[should_panic(expected = "The `handler` method must be called")]
    async fn build_without_handler_panics() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Server::builder::<DefHandler, ()>().listener(listener).build();
    }

    #[tokio::test]
    async fn bind_sets_nonblocking_and_listens() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let builder = Server::builder::<DefHandler, ()>()
            .bind(addr, false)
            .expect("bind should succeed on an ephemeral port")
            .handler(DefHandler);
        let server = builder.build();
        // A built server with a fresh `AtomicUsize` counter starts with no active
        // connections and accepts no pending ones yet.
        assert_eq!(server.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn stop_unblocks_launch_with_no_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Arc::new(
            Server::builder::<DefHandler, ()>()
                .listener(listener)
                .handler(DefHandler)
                .build(),
        );

        let launched = server.clone();
        let handle = tokio::spawn(async move { launched.launch().await });

        server.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("launch should return promptly after stop")
            .unwrap();
    }
}
