use roslibrust_common::Error as CommonError;

/// Errors that can arise while reading/writing the TCPROS wire protocol: connection headers,
/// handshakes, and framed message bodies.
///
/// This is the HANDSHAKE_MISMATCH / TRANSPORT_ERROR / MALFORMED_HEADER split called out in the
/// error handling design: a malformed header is folded into the same bucket as any other
/// transport failure since both are fatal to the connection and not distinguishable to a caller
/// in any actionable way.
#[derive(thiserror::Error, Debug)]
pub enum TcprosError {
    #[error("connection header was malformed: {0}")]
    MalformedHeader(String),
    #[error("required connection header field missing: {0}")]
    MissingField(&'static str),
    #[error(
        "md5sum mismatch during handshake: local = {local}, remote = {remote} (topic/service = {name})"
    )]
    HandshakeMismatch {
        name: String,
        local: String,
        remote: String,
    },
    #[error("handshake did not complete within the configured timeout")]
    HandshakeTimeout,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize/deserialize message body: {0}")]
    Serialization(String),
    #[error("requestTopic call to publisher failed: {0}")]
    RequestTopic(String),
}

impl From<TcprosError> for CommonError {
    fn from(value: TcprosError) -> Self {
        match value {
            TcprosError::HandshakeMismatch { .. } => CommonError::SerializationError(value.to_string()),
            TcprosError::Io(e) => CommonError::IoError(e),
            TcprosError::Serialization(s) => CommonError::SerializationError(s),
            TcprosError::RequestTopic(s) => CommonError::ServerError(s),
            other => CommonError::Unexpected(anyhow::anyhow!(other.to_string())),
        }
    }
}

/// Errors that can arise while registering/unregistering with the master, or while decoding its
/// XML-RPC responses.
#[derive(thiserror::Error, Debug)]
pub enum RegistrationError {
    #[error("master reported failure (status {status}): {message}")]
    MasterError { status: i32, message: String },
    #[error("master response did not have the expected shape: {0}")]
    UnexpectedResponseShape(String),
    #[error("xmlrpc transport error: {0}")]
    XmlRpcTransport(String),
    #[error("registration was cancelled by node shutdown")]
    Cancelled,
}

impl From<RegistrationError> for CommonError {
    fn from(value: RegistrationError) -> Self {
        match value {
            RegistrationError::Cancelled => {
                CommonError::Unexpected(anyhow::anyhow!("registration cancelled"))
            }
            other => CommonError::ServerError(other.to_string()),
        }
    }
}

/// Returned when a second service server is advertised for a name already owned by this node.
#[derive(thiserror::Error, Debug)]
#[error("a service server for {0:?} is already advertised on this node")]
pub struct DuplicateServiceError(pub String);

impl From<DuplicateServiceError> for CommonError {
    fn from(value: DuplicateServiceError) -> Self {
        CommonError::Unexpected(anyhow::anyhow!(value.to_string()))
    }
}
