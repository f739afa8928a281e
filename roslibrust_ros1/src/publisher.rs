//! C3: the outgoing message queue for one advertised topic.
//!
//! Generalizes the teacher's `Publication`: a TCP accept loop that performs the handshake and
//! attaches new subscriber connections, and a publish loop that fans each message out to every
//! attached connection. The one real change from the teacher's version is *how* fan-out happens:
//! the teacher writes to every socket synchronously from the publish loop (so one slow subscriber
//! stalls delivery to all the others); here each connection gets its own [RingBuffer] (C1) and
//! writer task, so a slow connection only ever drops its own oldest buffered frames.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use abort_on_drop::ChildTask;
use log::{debug, error, info, trace, warn};
use roslibrust_common::{Result as RosResult, RosMessageType};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};

use crate::names::Name;
use crate::node::actor::NodeServerHandle;
use crate::options::DEFAULT_PUBLISHER_QUEUE_SIZE;
use crate::ring_buffer::RingBuffer;
use crate::tcpros::{self, ConnectionHeader};

/// A handle returned by [crate::NodeHandle::advertise]. Cloning is not supported by design:
/// multiple independent publish handles for the same topic are created by calling `advertise`
/// again, each owning its own queued-message accounting, matching the teacher's `Publisher<T>`.
pub struct Publisher<T> {
    topic_name: String,
    sender: mpsc::Sender<Vec<u8>>,
    /// Keeps the accept/publish tasks (and the master registration they imply) alive for exactly
    /// as long as this handle is held; dropping it tears the publication down.
    _publication: Publication,
    phantom: PhantomData<T>,
}

impl<T: RosMessageType> Publisher<T> {
    pub(crate) fn new(topic_name: &str, sender: mpsc::Sender<Vec<u8>>, publication: Publication) -> Self {
        Self {
            topic_name: topic_name.to_owned(),
            sender,
            _publication: publication,
            phantom: PhantomData,
        }
    }

    /// Queues `data` to be serialized and sent to every subscriber currently (or in the future)
    /// attached to this topic. Returns once the message is queued, not once any subscriber has
    /// received it.
    pub async fn publish(&self, data: &T) -> RosResult<()> {
        let bytes = roslibrust_serde_rosmsg::to_vec(&data)
            .map_err(|e| roslibrust_common::Error::SerializationError(e.to_string()))?;
        self.sender
            .send(bytes)
            .await
            .map_err(|_| roslibrust_common::Error::Disconnected)?;
        trace!("queued message for publish on {}", self.topic_name);
        Ok(())
    }
}

impl<T> roslibrust_common::Publish<T> for Publisher<T>
where
    T: RosMessageType,
{
    async fn publish(&self, data: &T) -> RosResult<()> {
        Publisher::publish(self, data).await
    }
}

struct SubscriberConnection {
    ring: Arc<RingBuffer<Arc<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
    _writer_task: ChildTask<()>,
}

/// Owns the TCP listener, accept loop, and per-connection fan-out for one advertised topic.
pub(crate) struct Publication {
    listener_port: u16,
    _accept_task: ChildTask<()>,
    _publish_task: ChildTask<()>,
    publish_sender: mpsc::WeakSender<Vec<u8>>,
}

impl Publication {
    /// Binds a fresh TCP listener, spawns the accept and publish tasks, and returns a handle plus
    /// the strong sender end of the publish queue. Dropping every clone of that sender eventually
    /// tears the publication down (detected by the publish task observing the channel close).
    pub(crate) async fn new(
        node_name: &Name,
        latching: bool,
        topic_name: &str,
        host_addr: Ipv4Addr,
        queue_size: usize,
        msg_definition: &str,
        md5sum: &str,
        topic_type: &str,
        node_handle: NodeServerHandle,
    ) -> Result<(Self, mpsc::Sender<Vec<u8>>), std::io::Error> {
        let bind_addr = SocketAddr::from((host_addr, 0));
        let tcp_listener = TcpListener::bind(bind_addr).await?;
        let listener_port = tcp_listener.local_addr()?.port();

        let queue_size = if queue_size == 0 {
            DEFAULT_PUBLISHER_QUEUE_SIZE
        } else {
            queue_size
        };
        let (sender, receiver) = mpsc::channel::<Vec<u8>>(queue_size);

        let responding_header = ConnectionHeader::for_publisher(
            node_name.to_string(),
            topic_name,
            topic_type,
            md5sum,
            msg_definition,
            latching,
        );
        trace!("publisher connection header: {responding_header:?}");

        let connections: Arc<RwLock<HashMap<u64, SubscriberConnection>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let last_message: Arc<RwLock<Option<Arc<Vec<u8>>>>> = Arc::new(RwLock::new(None));
        let next_connection_id = Arc::new(AtomicU64::new(0));

        let accept_task = tokio::spawn(Self::accept_task(
            tcp_listener,
            connections.clone(),
            last_message.clone(),
            next_connection_id,
            topic_name.to_owned(),
            responding_header,
            queue_size,
        ));

        let publish_task = tokio::spawn(Self::publish_task(
            receiver,
            connections,
            last_message,
            node_handle,
            topic_name.to_owned(),
        ));

        let sender_copy = sender.clone();
        Ok((
            Self {
                listener_port,
                _accept_task: accept_task.into(),
                _publish_task: publish_task.into(),
                publish_sender: sender.downgrade(),
            },
            sender_copy,
        ))
    }

    pub(crate) fn port(&self) -> u16 {
        self.listener_port
    }

    /// Returns a strong sender if the publication is still alive (see the teacher's note on
    /// `WeakSender`/`Sender` for why this can transiently be `None` right as the last handle
    /// drops).
    pub(crate) fn get_sender(&self) -> Option<mpsc::Sender<Vec<u8>>> {
        self.publish_sender.upgrade()
    }

    async fn publish_task(
        mut rx: mpsc::Receiver<Vec<u8>>,
        connections: Arc<RwLock<HashMap<u64, SubscriberConnection>>>,
        last_message: Arc<RwLock<Option<Arc<Vec<u8>>>>>,
        node_handle: NodeServerHandle,
        topic: String,
    ) {
        debug!("publish task started for {topic}");
        loop {
            match rx.recv().await {
                Some(body) => {
                    // `body` is already length-prefixed by `roslibrust_serde_rosmsg::to_vec`; sent
                    // to the socket as-is, matching the single `u32`-length-then-body wire frame.
                    let framed = Arc::new(body);

                    let mut conns = connections.write().await;
                    let mut dead = Vec::new();
                    for (id, conn) in conns.iter() {
                        if conn.closed.load(Ordering::Relaxed) {
                            dead.push(*id);
                            continue;
                        }
                        conn.ring.put(framed.clone());
                    }
                    for id in dead {
                        conns.remove(&id);
                    }
                    drop(conns);

                    *last_message.write().await = Some(framed);
                }
                None => {
                    debug!("all publish handles dropped for {topic}, tearing down");
                    let node_handle = node_handle.clone();
                    let topic = topic.clone();
                    tokio::spawn(async move {
                        node_handle.unregister_publisher(topic).await;
                    });
                    break;
                }
            }
        }
        debug!("publish task exited for {topic}");
    }

    async fn accept_task(
        listener: TcpListener,
        connections: Arc<RwLock<HashMap<u64, SubscriberConnection>>>,
        last_message: Arc<RwLock<Option<Arc<Vec<u8>>>>>,
        next_connection_id: Arc<AtomicU64>,
        topic_name: String,
        responding_header: ConnectionHeader,
        queue_size: usize,
    ) {
        debug!("accept task started for {topic_name}");
        loop {
            let (mut stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept failed on publisher listener for {topic_name}: {e}");
                    continue;
                }
            };
            info!("subscriber {peer_addr} connecting to {topic_name}");

            let result: Result<(), crate::error::TcprosError> = async {
                let header = tcpros::with_handshake_timeout(tcpros::receive_header(&mut stream)).await?;
                tcpros::check_digest_compatible(&topic_name, &responding_header.md5sum, &header.md5sum)?;
                tcpros::with_handshake_timeout(tcpros::send_header(&mut stream, &responding_header)).await
            }
            .await;

            if let Err(e) = result {
                warn!("handshake failed with {peer_addr} for {topic_name}: {e}");
                let _ = stream.shutdown().await;
                continue;
            }

            if responding_header.latching {
                if let Some(latched) = last_message.read().await.as_ref() {
                    if let Err(e) = stream.write_all(latched).await {
                        error!("failed to send latched message to {peer_addr}: {e}");
                    }
                }
            }

            let ring = Arc::new(RingBuffer::new(queue_size));
            let closed = Arc::new(AtomicBool::new(false));
            let writer_task = tokio::spawn(Self::writer_task(stream, ring.clone(), closed.clone()));

            let id = next_connection_id.fetch_add(1, Ordering::Relaxed);
            connections.write().await.insert(
                id,
                SubscriberConnection {
                    ring,
                    closed,
                    _writer_task: writer_task.into(),
                },
            );
            debug!("attached subscriber {peer_addr} to {topic_name}");
        }
    }

    async fn writer_task(
        mut stream: tokio::net::TcpStream,
        ring: Arc<RingBuffer<Arc<Vec<u8>>>>,
        closed: Arc<AtomicBool>,
    ) {
        loop {
            let frame = ring.take().await;
            if let Err(e) = stream.write_all(&frame).await {
                debug!("subscriber connection closed: {e}");
                closed.store(true, Ordering::Relaxed);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn length_prefixed(body: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(body.len() + 4);
        framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
        framed.extend_from_slice(body);
        framed
    }

    #[tokio::test]
    async fn subscriber_receives_published_messages_in_order() {
        let node_handle = NodeServerHandle::spawn(crate::master_client::MasterClient::new(
            "http://127.0.0.1:1",
            "/test",
            "http://127.0.0.1:2/",
        ));
        let (publication, sender) = Publication::new(
            &Name::new("/talker"),
            false,
            "/chatter",
            Ipv4Addr::LOCALHOST,
            8,
            "string data\n",
            "992ce8a1687cec8c8bd883ec73ca41d1",
            "std_msgs/String",
            node_handle,
        )
        .await
        .unwrap();

        let mut client = tokio::net::TcpStream::connect((Ipv4Addr::LOCALHOST, publication.port()))
            .await
            .unwrap();
        let client_header = ConnectionHeader::for_subscriber(
            "/listener",
            "/chatter",
            "std_msgs/String",
            "992ce8a1687cec8c8bd883ec73ca41d1",
            "string data\n",
        );
        tcpros::send_header(&mut client, &client_header).await.unwrap();
        let _reply = tcpros::receive_header(&mut client).await.unwrap();

        // `sender` carries whatever `roslibrust_serde_rosmsg::to_vec` produces, which is itself
        // already length-prefixed; simulate that here instead of depending on the serializer.
        sender.send(length_prefixed(b"hello")).await.unwrap();
        sender.send(length_prefixed(b"world")).await.unwrap();

        let first = tcpros::read_frame(&mut client).await.unwrap();
        let second = tcpros::read_frame(&mut client).await.unwrap();
        assert_eq!(first, b"hello");
        assert_eq!(second, b"world");
        let _ = publication;
    }

    #[tokio::test]
    async fn late_subscriber_to_latched_topic_receives_last_message() {
        let node_handle = NodeServerHandle::spawn(crate::master_client::MasterClient::new(
            "http://127.0.0.1:1",
            "/test",
            "http://127.0.0.1:2/",
        ));
        let (publication, sender) = Publication::new(
            &Name::new("/talker"),
            true,
            "/chatter",
            Ipv4Addr::LOCALHOST,
            8,
            "string data\n",
            "992ce8a1687cec8c8bd883ec73ca41d1",
            "std_msgs/String",
            node_handle,
        )
        .await
        .unwrap();

        sender.send(length_prefixed(b"first")).await.unwrap();
        // Give the publish task a moment to record the latched value.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut client = tokio::net::TcpStream::connect((Ipv4Addr::LOCALHOST, publication.port()))
            .await
            .unwrap();
        let client_header = ConnectionHeader::for_subscriber(
            "/listener",
            "/chatter",
            "std_msgs/String",
            "992ce8a1687cec8c8bd883ec73ca41d1",
            "string data\n",
        );
        tcpros::send_header(&mut client, &client_header).await.unwrap();
        let _reply = tcpros::receive_header(&mut client).await.unwrap();

        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        client.read_exact(&mut body).await.unwrap();
        assert_eq!(body, b"first");
    }
}
