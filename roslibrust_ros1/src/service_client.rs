//! C6, client side: a persistent connection to a service, with a FIFO queue of in-flight calls
//! matched to responses strictly in request order (TCPROS services are single-stream
//! request/response pairs, not a multiplexed protocol).

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use abort_on_drop::ChildTask;
use log::{debug, warn};
use roslibrust_common::{Result as RosResult, RosServiceType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::names::Name;
use crate::tcpros::{self, ConnectionHeader};

type PendingReply = oneshot::Sender<Result<Vec<u8>, String>>;
type Call = (Vec<u8>, PendingReply);

struct Connection {
    call_tx: mpsc::Sender<Call>,
    _io_task: ChildTask<()>,
}

/// A handle returned by [crate::NodeHandle::service_client]. Holds at most one persistent
/// connection at a time (per §3/§4.6); concurrent calls share it without serializing on each
/// other's round trip. If the connection has died (the peer closed it, or any I/O error), the
/// next `call` transparently re-dials and re-handshakes rather than failing forever.
pub struct ServiceClient<T> {
    caller_id: Name,
    service: String,
    service_uri: String,
    conn: RwLock<Arc<Connection>>,
    phantom: PhantomData<T>,
}

impl<T: RosServiceType> ServiceClient<T> {
    /// Dials `service_uri` (a `rosrpc://host:port` URI as returned by `lookupService`), performs
    /// the TCPROS service handshake, and returns a client that can place calls immediately (the
    /// TCP dial and handshake are complete by the time this returns).
    pub(crate) async fn connect(
        caller_id: &Name,
        service: &str,
        service_uri: &str,
    ) -> Result<Self, crate::error::TcprosError> {
        let conn = Self::dial(caller_id, service, service_uri).await?;
        Ok(Self {
            caller_id: caller_id.clone(),
            service: service.to_owned(),
            service_uri: service_uri.to_owned(),
            conn: RwLock::new(Arc::new(conn)),
            phantom: PhantomData,
        })
    }

    async fn dial(caller_id: &Name, service: &str, service_uri: &str) -> Result<Connection, crate::error::TcprosError> {
        let (host, port) = parse_rosrpc_uri(service_uri)?;
        let mut stream = TcpStream::connect((host.as_str(), port)).await?;

        let header = ConnectionHeader::for_service_client(
            caller_id.to_string(),
            service,
            T::ROS_SERVICE_NAME,
            T::MD5SUM,
            true,
        );
        tcpros::with_handshake_timeout(tcpros::send_header(&mut stream, &header)).await?;
        let reply = tcpros::with_handshake_timeout(tcpros::receive_header(&mut stream)).await?;
        if let Some(error) = reply.error {
            return Err(crate::error::TcprosError::MalformedHeader(error));
        }
        tcpros::check_digest_compatible(service, T::MD5SUM, &reply.md5sum)?;

        let (call_tx, call_rx) = mpsc::channel(16);
        let io_task = tokio::spawn(io_task(stream, call_rx));
        Ok(Connection {
            call_tx,
            _io_task: io_task.into(),
        })
    }

    /// Places one call and waits for its response. If the current connection has died since the
    /// last call, transparently redials before retrying once.
    pub async fn call(&self, request: &T::Request) -> RosResult<T::Response> {
        let body = roslibrust_serde_rosmsg::to_vec(request)
            .map_err(|e| roslibrust_common::Error::SerializationError(e.to_string()))?;
        let response_body = self.call_with_reconnect(body).await?;
        roslibrust_serde_rosmsg::from_slice(&response_body)
            .map_err(|e| roslibrust_common::Error::SerializationError(e.to_string()))
    }

    async fn call_with_reconnect(&self, body: Vec<u8>) -> RosResult<Vec<u8>> {
        let conn = self.conn.read().await.clone();
        match Self::send_on(&conn, body.clone()).await {
            Ok(response) => Ok(response),
            Err(_dead) => {
                debug!("service connection to {} is dead, reconnecting", self.service);
                let mut guard = self.conn.write().await;
                // Another concurrent caller may have already redialed while we waited for the
                // write lock; only dial again if the connection is still the one we found dead.
                if Arc::ptr_eq(&*guard, &conn) {
                    let fresh = Self::dial(&self.caller_id, &self.service, &self.service_uri)
                        .await
                        .map_err(roslibrust_common::Error::from)?;
                    *guard = Arc::new(fresh);
                }
                let conn = guard.clone();
                drop(guard);
                Self::send_on(&conn, body).await
            }
        }
    }

    async fn send_on(conn: &Connection, body: Vec<u8>) -> RosResult<Vec<u8>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        conn.call_tx
            .send((body, reply_tx))
            .await
            .map_err(|_| roslibrust_common::Error::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| roslibrust_common::Error::Disconnected)?
            .map_err(roslibrust_common::Error::ServerError)
    }
}

fn parse_rosrpc_uri(uri: &str) -> Result<(String, u16), crate::error::TcprosError> {
    let rest = uri
        .strip_prefix("rosrpc://")
        .ok_or_else(|| crate::error::TcprosError::MalformedHeader(format!("not a rosrpc uri: {uri}")))?;
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| crate::error::TcprosError::MalformedHeader(format!("missing port in: {uri}")))?;
    let port: u16 = port
        .trim_end_matches('/')
        .parse()
        .map_err(|_| crate::error::TcprosError::MalformedHeader(format!("bad port in: {uri}")))?;
    Ok((host.to_string(), port))
}

async fn io_task(stream: TcpStream, mut call_rx: mpsc::Receiver<Call>) {
    let (read_half, mut write_half) = stream.into_split();
    let pending: Arc<Mutex<VecDeque<PendingReply>>> = Arc::new(Mutex::new(VecDeque::new()));

    let reader_pending = pending.clone();
    let reader = tokio::spawn(reader_task(read_half, reader_pending));

    while let Some((body, reply_tx)) = call_rx.recv().await {
        pending.lock().await.push_back(reply_tx);
        // `body` is already length-prefixed by `roslibrust_serde_rosmsg::to_vec`; written as-is.
        if let Err(e) = write_half.write_all(&body).await {
            warn!("service connection write failed: {e}");
            if let Some(tx) = pending.lock().await.pop_back() {
                let _ = tx.send(Err(format!("transport error: {e}")));
            }
            break;
        }
    }
    reader.abort();
    drain(&pending, "service connection closed").await;
}

async fn reader_task(mut read_half: OwnedReadHalf, pending: Arc<Mutex<VecDeque<PendingReply>>>) {
    loop {
        let ok_byte = match read_half.read_u8().await {
            Ok(b) => b,
            Err(e) => {
                debug!("service connection reader stopped: {e}");
                drain(&pending, &format!("transport error: {e}")).await;
                return;
            }
        };
        let body = match tcpros::read_frame(&mut read_half).await {
            Ok(body) => body,
            Err(e) => {
                drain(&pending, &format!("transport error: {e}")).await;
                return;
            }
        };
        if let Some(tx) = pending.lock().await.pop_front() {
            let result = if ok_byte == 1 {
                // Reattach the length prefix `from_slice` expects, mirroring `to_vec`'s output;
                // an error reply's body is a plain UTF-8 string, not a serialized message, so it's
                // used as-is.
                let mut framed = Vec::with_capacity(body.len() + 4);
                framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
                framed.extend_from_slice(&body);
                Ok(framed)
            } else {
                Err(String::from_utf8_lossy(&body).into_owned())
            };
            let _ = tx.send(result);
        }
    }
}

async fn drain(pending: &Arc<Mutex<VecDeque<PendingReply>>>, message: &str) {
    let mut pending = pending.lock().await;
    while let Some(tx) = pending.pop_front() {
        let _ = tx.send(Err(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rosrpc_uri() {
        assert_eq!(
            parse_rosrpc_uri("rosrpc://localhost:1234").unwrap(),
            ("localhost".to_string(), 1234)
        );
    }

    #[test]
    fn rejects_non_rosrpc_uri() {
        assert!(parse_rosrpc_uri("http://localhost:1234").is_err());
    }
}
