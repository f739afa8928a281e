//! C4 (incoming message queue) and C5 (subscriber connection manager) combined: a `Subscriber<T>`
//! owns a shared [RingBuffer] fed by one reader task per connected publisher, and a reconcile task
//! that keeps the connected-publisher set equal to whatever the master last reported.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use abort_on_drop::ChildTask;
use log::{debug, trace, warn};
use roslibrust_common::{Result as RosResult, RosMessageType};
use tokio::sync::{mpsc, RwLock};

use crate::error::TcprosError;
use crate::node::actor::NodeServerHandle;
use crate::options::DEFAULT_SUBSCRIBER_QUEUE_SIZE;
use crate::ring_buffer::RingBuffer;
use crate::slave_client;
use crate::tcpros::{self, ConnectionHeader};

const RECONCILE_PERIOD: Duration = Duration::from_secs(5);

/// A handle returned by [crate::NodeHandle::subscribe].
pub struct Subscriber<T> {
    queue: Arc<RingBuffer<Vec<u8>>>,
    _subscription: Subscription,
    phantom: PhantomData<T>,
}

impl<T: RosMessageType> Subscriber<T> {
    pub(crate) fn from_parts(queue: Arc<RingBuffer<Vec<u8>>>, subscription: Subscription) -> Self {
        Self {
            queue,
            _subscription: subscription,
            phantom: PhantomData,
        }
    }

    /// Waits for and returns the next available message, deserialized as `T`.
    ///
    /// Never returns `None` in the current implementation: a subscriber lives exactly as long as
    /// its handle is held, and nothing currently tears a live subscription down out from under a
    /// caller that's still polling it.
    pub async fn next(&mut self) -> Option<RosResult<T>> {
        let bytes = self.queue.take().await;
        match roslibrust_serde_rosmsg::from_slice(&bytes) {
            Ok(value) => Some(Ok(value)),
            Err(e) => Some(Err(roslibrust_common::Error::SerializationError(e.to_string()))),
        }
    }
}

impl<T> roslibrust_common::Subscribe<T> for Subscriber<T>
where
    T: RosMessageType,
{
    async fn next(&mut self) -> Option<RosResult<T>> {
        Subscriber::next(self).await
    }
}

struct ReconcileContext {
    http: reqwest::Client,
    caller_id: String,
    topic: String,
    topic_type: String,
    md5sum: String,
    msg_definition: String,
    queue: Arc<RingBuffer<Vec<u8>>>,
}

pub(crate) struct Subscription {
    _reconcile_task: ChildTask<()>,
    node_handle: NodeServerHandle,
    topic: String,
}

impl Subscription {
    /// Registers `topic` with the master, then spawns the C5 reconcile task seeded with the
    /// master's initial publisher set. Returns the subscription handle and the shared incoming
    /// queue (C4) that every connected publisher's reader task feeds.
    pub(crate) async fn new(
        caller_id: impl Into<String>,
        topic: impl Into<String>,
        topic_type: impl Into<String>,
        md5sum: impl Into<String>,
        msg_definition: impl Into<String>,
        queue_size: usize,
        node_handle: NodeServerHandle,
    ) -> (Self, Arc<RingBuffer<Vec<u8>>>) {
        let topic = topic.into();
        let topic_type = topic_type.into();
        let queue_size = if queue_size == 0 {
            DEFAULT_SUBSCRIBER_QUEUE_SIZE
        } else {
            queue_size
        };
        let queue = Arc::new(RingBuffer::new(queue_size));

        let (update_tx, update_rx) = mpsc::channel(8);
        let initial = node_handle
            .register_subscriber(topic.clone(), topic_type.clone(), update_tx)
            .await;

        let context = Arc::new(ReconcileContext {
            http: reqwest::Client::new(),
            caller_id: caller_id.into(),
            topic: topic.clone(),
            topic_type,
            md5sum: md5sum.into(),
            msg_definition: msg_definition.into(),
            queue: queue.clone(),
        });
        let reconcile_task = tokio::spawn(reconcile_task(context, update_rx, initial));

        (
            Self {
                _reconcile_task: reconcile_task.into(),
                node_handle,
                topic,
            },
            queue,
        )
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!("dropping subscription for {}", self.topic);
        let node_handle = self.node_handle.clone();
        let topic = self.topic.clone();
        // Spawn rather than block in Drop; mirrors the teacher's publish-task teardown, which
        // does the same to avoid a drop-loop race.
        tokio::spawn(async move {
            node_handle.unregister_subscriber(topic).await;
        });
    }
}

async fn reconcile_task(
    context: Arc<ReconcileContext>,
    mut updates: mpsc::Receiver<Vec<String>>,
    initial: Vec<String>,
) {
    let connected: Arc<RwLock<HashMap<String, ChildTask<()>>>> = Arc::new(RwLock::new(HashMap::new()));
    let mut target = initial;
    let mut tick = tokio::time::interval(RECONCILE_PERIOD);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        reconcile_once(&context, &connected, &target).await;
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Some(new_target) => target = new_target,
                    None => break,
                }
            }
            _ = tick.tick() => {}
        }
    }
    debug!("reconcile task for {} exiting", context.topic);
}

/// Brings the connected-publisher set to exactly `target`: drops connections to publishers no
/// longer present, and spawns connect tasks for newly-added ones. Runs under a single write-lock
/// acquisition so no observer ever sees a torn intermediate set.
async fn reconcile_once(
    context: &Arc<ReconcileContext>,
    connected: &Arc<RwLock<HashMap<String, ChildTask<()>>>>,
    target: &[String],
) {
    let target_set: HashSet<&String> = target.iter().collect();
    let mut conns = connected.write().await;
    conns.retain(|uri, _| target_set.contains(uri));
    for uri in target {
        if conns.contains_key(uri) {
            continue;
        }
        let context = context.clone();
        let connected = connected.clone();
        let uri = uri.clone();
        let task = tokio::spawn(async move {
            let uri_for_cleanup = uri.clone();
            if let Err(e) = connect_and_stream(&context, &uri).await {
                warn!("connection to publisher {uri} for {} failed: {e}", context.topic);
            }
            connected.write().await.remove(&uri_for_cleanup);
        });
        conns.insert(uri.clone(), task.into());
    }
}

async fn connect_and_stream(context: &ReconcileContext, publisher_uri: &str) -> Result<(), TcprosError> {
    let (host, port) = slave_client::request_topic(&context.http, publisher_uri, &context.caller_id, &context.topic)
        .await
        .map_err(|e| TcprosError::RequestTopic(e.to_string()))?;

    let mut stream = tokio::net::TcpStream::connect((host.as_str(), port)).await?;
    trace!("connected to publisher {publisher_uri} for {}", context.topic);

    let header = ConnectionHeader::for_subscriber(
        &context.caller_id,
        &context.topic,
        &context.topic_type,
        &context.md5sum,
        &context.msg_definition,
    );
    tcpros::with_handshake_timeout(tcpros::send_header(&mut stream, &header)).await?;
    let reply = tcpros::with_handshake_timeout(tcpros::receive_header(&mut stream)).await?;
    tcpros::check_digest_compatible(&context.topic, &context.md5sum, &reply.md5sum)?;

    loop {
        let message = tcpros::read_message(&mut stream).await?;
        context.queue.put(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Uses test-log so a failure here shows the warn! from the doomed connect attempt.
    #[test_log::test(tokio::test)]
    async fn reconcile_connects_and_disconnects_to_match_target() {
        let context = Arc::new(ReconcileContext {
            http: reqwest::Client::new(),
            caller_id: "/listener".to_string(),
            topic: "/chatter".to_string(),
            topic_type: "std_msgs/String".to_string(),
            md5sum: "*".to_string(),
            msg_definition: String::new(),
            queue: Arc::new(RingBuffer::new(8)),
        });
        let connected: Arc<RwLock<HashMap<String, ChildTask<()>>>> = Arc::new(RwLock::new(HashMap::new()));

        // A bogus target that will fail to connect; just checking the map converges to empty
        // keys being tracked as "attempted" then pruned once the connect attempt fails.
        reconcile_once(&context, &connected, &["http://127.0.0.1:1/".to_string()]).await;
        assert_eq!(connected.read().await.len(), 1);

        // Give the doomed connect attempt a moment to fail and prune itself.
        tokio::time::sleep(Duration::from_millis(50)).await;
        reconcile_once(&context, &connected, &[]).await;
        assert_eq!(connected.read().await.len(), 0);
    }
}
