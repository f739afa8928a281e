//! C6, server side: accepts service connections, mirrors the handshake, and invokes the
//! registered handler once per request. Connections are persistent: a client may issue any number
//! of requests over one connection, each answered before the next is read.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use abort_on_drop::ChildTask;
use log::{debug, error, info, warn};
use roslibrust_common::RosServiceType;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::names::Name;
use crate::node::actor::NodeServerHandle;
use crate::tcpros::{self, ConnectionHeader};

type Handler<T> =
    Arc<dyn Fn(<T as RosServiceType>::Request) -> Result<<T as RosServiceType>::Response, Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Owns the accept loop for one advertised service. Dropping this drops the accept task and
/// enqueues unregistration from the master, matching [crate::publisher::Publication].
pub(crate) struct ServiceServerLink {
    _accept_task: ChildTask<()>,
    node_handle: NodeServerHandle,
    service: String,
}

impl ServiceServerLink {
    pub(crate) async fn bind<T: RosServiceType>(
        node_name: &Name,
        service: &str,
        host_addr: Ipv4Addr,
        handler: Handler<T>,
        node_handle: NodeServerHandle,
    ) -> Result<(Self, u16), std::io::Error> {
        let listener = TcpListener::bind(SocketAddr::from((host_addr, 0))).await?;
        let port = listener.local_addr()?.port();

        let responding_header = ConnectionHeader::for_service_server(
            node_name.to_string(),
            service,
            T::ROS_SERVICE_NAME,
            T::MD5SUM,
        );

        let service_name = service.to_owned();
        let accept_task = tokio::spawn(accept_loop(listener, responding_header, handler, service_name));

        Ok((
            Self {
                _accept_task: accept_task.into(),
                node_handle,
                service: service.to_owned(),
            },
            port,
        ))
    }
}

impl Drop for ServiceServerLink {
    fn drop(&mut self) {
        debug!("dropping service server for {}", self.service);
        let node_handle = self.node_handle.clone();
        let service = self.service.clone();
        tokio::spawn(async move {
            node_handle.unregister_service(service).await;
        });
    }
}

async fn accept_loop<T: RosServiceType>(
    listener: TcpListener,
    responding_header: ConnectionHeader,
    handler: Handler<T>,
    service: String,
) {
    debug!("service accept loop started for {service}");
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed on service listener for {service}: {e}");
                continue;
            }
        };
        info!("client {peer_addr} connecting to service {service}");
        let responding_header = responding_header.clone();
        let handler = handler.clone();
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, responding_header, handler).await {
                debug!("service connection to {service} from {peer_addr} ended: {e}");
            }
        });
    }
}

async fn serve_connection<T: RosServiceType>(
    mut stream: TcpStream,
    responding_header: ConnectionHeader,
    handler: Handler<T>,
) -> Result<(), crate::error::TcprosError> {
    let request_header = tcpros::with_handshake_timeout(tcpros::receive_header(&mut stream)).await?;
    let check = tcpros::check_digest_compatible(
        responding_header.service.as_deref().unwrap_or_default(),
        &responding_header.md5sum,
        &request_header.md5sum,
    );
    if let Err(e) = check {
        let error_header = ConnectionHeader::error_reply(e.to_string());
        let _ = tcpros::send_header(&mut stream, &error_header).await;
        let _ = stream.shutdown().await;
        return Err(e);
    }
    tcpros::with_handshake_timeout(tcpros::send_header(&mut stream, &responding_header)).await?;

    loop {
        // `read_message` reattaches the length prefix `from_slice` expects, mirroring `to_vec`.
        let request_bytes = tcpros::read_message(&mut stream).await?;
        let request: T::Request = roslibrust_serde_rosmsg::from_slice(&request_bytes)
            .map_err(|e| crate::error::TcprosError::Serialization(e.to_string()))?;

        let outcome = handler(request);
        match outcome {
            Ok(response) => {
                // Already length-prefixed by `to_vec`; written as-is after the ok byte.
                let body = roslibrust_serde_rosmsg::to_vec(&response)
                    .map_err(|e| crate::error::TcprosError::Serialization(e.to_string()))?;
                stream.write_u8(1).await?;
                stream.write_all(&body).await?;
            }
            Err(e) => {
                error!("service handler returned an error: {e}");
                let message = e.to_string().into_bytes();
                stream.write_u8(0).await?;
                tcpros::write_frame(&mut stream, &message).await?;
            }
        }
    }
}

/// Converts a type implementing [roslibrust_common::ServiceFn] into the boxed form
/// [ServiceServerLink] stores internally.
pub(crate) fn into_handler<T, F>(server: F) -> Handler<T>
where
    T: RosServiceType,
    F: roslibrust_common::ServiceFn<T>,
{
    Arc::new(move |request| server(request))
}
