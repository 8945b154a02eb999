use crate::{query, Version};
use std::{error, fmt, io};

#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,

    InvalidUrl,
    #[allow(dead_code)]
    Query(query::Error),

    InvalidVersion,
    UnsupportedVersion,

    InvalidHeader,
    TooManyHeaders,
    InvalidContentLength,
    InvalidConnection,

    BodyTooLarge,
    #[allow(dead_code)]
    BodyMismatch {
        expected: usize,
        available: usize,
    },
    #[allow(dead_code)]
    UnexpectedBody(usize),

    ServiceUnavailable,
    /// A listener could not be bound (address in use, permission denied, bad interface).
    #[allow(dead_code)]
    BindFailure,
    /// A registered upgrade was accepted at the handshake level but the protocol handler
    /// factory rejected or failed to take over the connection.
    #[allow(dead_code)]
    UpgradeFailure,
    /// The application handler returned without ever calling a terminal `Response` method.
    #[allow(dead_code)]
    HandlerIoFailure,
    /// A connection sat idle (no bytes either direction) past its configured timeout.
    IdleTimeout,
    /// TLS handshake failed (bad cert, unsupported cipher, client abort mid-handshake).
    #[allow(dead_code)]
    TlsHandshakeFailure,
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(
            &self,
            version: Version,
            json: bool,
        ) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;

        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        Query: "400 Bad Request", "55"
            => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#;

        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;

        BodyTooLarge: "413 Request Entity Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: "400 Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        BindFailure: "500 Internal Server Error", "53"
            => r#"{"error":"Listener bind failed","code":"BIND_FAILURE"}"#;
        UpgradeFailure: "400 Bad Request", "56"
            => r#"{"error":"Protocol upgrade failed","code":"UPGRADE_FAILURE"}"#;
        HandlerIoFailure: "500 Internal Server Error", "59"
            => r#"{"error":"Handler produced no response","code":"HANDLER_IO_FAILURE"}"#;
        IdleTimeout: "408 Request Timeout", "51"
            => r#"{"error":"Connection idle timeout","code":"IDLE_TIMEOUT"}"#;
        TlsHandshakeFailure: "400 Bad Request", "55"
            => r#"{"error":"TLS handshake failed","code":"TLS_HANDSHAKE_FAILURE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }

    /// Emits a `tracing` event at a severity matching how surprising this error is in
    /// normal operation: client-caused protocol errors are `debug`, resource exhaustion
    /// and idle timeouts are `warn`, anything implying a bug or host failure is `error`.
    pub(crate) fn trace(&self) {
        match self {
            ErrorKind::InvalidMethod
            | ErrorKind::InvalidUrl
            | ErrorKind::Query(_)
            | ErrorKind::InvalidVersion
            | ErrorKind::UnsupportedVersion
            | ErrorKind::InvalidHeader
            | ErrorKind::InvalidContentLength
            | ErrorKind::InvalidConnection
            | ErrorKind::BodyMismatch { .. }
            | ErrorKind::UnexpectedBody(_)
            | ErrorKind::UpgradeFailure => {
                tracing::debug!(error = %self, "rejected malformed request");
            }
            ErrorKind::TooManyHeaders | ErrorKind::BodyTooLarge | ErrorKind::IdleTimeout => {
                tracing::warn!(error = %self, "connection rejected by a configured limit");
            }
            ErrorKind::ServiceUnavailable => {
                tracing::warn!(error = %self, "rejected connection: server at capacity");
            }
            ErrorKind::BindFailure
            | ErrorKind::HandlerIoFailure
            | ErrorKind::TlsHandshakeFailure
            | ErrorKind::Io(_) => {
                tracing::error!(error = %self, "connection failed");
            }
        }
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
