//! C8: the single task that owns a node's mutable bookkeeping.
//!
//! Every other piece of a running node (publications, subscriptions, services, the per-node
//! XML-RPC server) reaches this state through [NodeServerHandle], a cheaply-`Clone`-able command
//! sender. This mirrors the teacher's `Publication`/`PublisherAny` split: real mutable state lives
//! in exactly one place, and everyone else holds a handle.
//!
//! Registration with the master (C7) does *not* run inside this actor: it is a separately
//! spawned, retrying background task (see [crate::registration]) so that a master outage stalls
//! only the registrant waiting on it, never the rest of the node's bookkeeping. This actor only
//! ever sees the *result* of a registration as an infallible bookkeeping update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::error::{DuplicateServiceError, RegistrationError};
use crate::master_client::MasterClient;
use crate::registration::{self, BoxFuture, Listener, RegistrationEvent};

/// A fan-out target for `publisherUpdate` notifications: the subscriber reconcile task for one
/// topic, fed the master's current list of publisher XML-RPC URIs for that topic.
pub type PublisherUpdateSink = mpsc::Sender<Vec<String>>;

enum NodeCommand {
    RecordPublication {
        topic: String,
        port: u16,
    },
    ForgetPublication {
        topic: String,
    },
    LookupPublicationPort {
        topic: String,
        reply: oneshot::Sender<Option<u16>>,
    },
    RecordSubscription {
        topic: String,
        sink: PublisherUpdateSink,
    },
    ForgetSubscription {
        topic: String,
    },
    PublisherUpdate {
        topic: String,
        publishers: Vec<String>,
    },
    ReserveService {
        name: String,
        reply: oneshot::Sender<Result<(), DuplicateServiceError>>,
    },
    RecordService {
        name: String,
        uri: String,
    },
    ForgetService {
        name: String,
    },
    LookupServiceUri {
        name: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Snapshot {
        reply: oneshot::Sender<NodeSnapshot>,
    },
}

/// A point-in-time view of a node's bookkeeping, used to answer `getBusInfo`/`getBusStats`.
#[derive(Debug, Clone, Default)]
pub struct NodeSnapshot {
    pub publications: Vec<(String, u16)>,
    pub subscriptions: Vec<String>,
    pub services: Vec<(String, String)>,
}

struct NodeActor {
    commands: mpsc::Receiver<NodeCommand>,
    publications: HashMap<String, u16>,
    subscriptions: HashMap<String, PublisherUpdateSink>,
    services: HashMap<String, String>,
    /// Names reserved by `ReserveService` but not yet confirmed registered; prevents a second
    /// `advertise_service` call for the same name from racing in while the first is still
    /// waiting on the master.
    reserved_services: HashMap<String, ()>,
}

impl NodeActor {
    async fn run(mut self) {
        while let Some(cmd) = self.commands.recv().await {
            self.handle(cmd);
        }
        debug!("node actor shutting down: all handles dropped");
    }

    fn handle(&mut self, cmd: NodeCommand) {
        match cmd {
            NodeCommand::RecordPublication { topic, port } => {
                trace!("recording local publication {topic} on port {port}");
                self.publications.insert(topic, port);
            }
            NodeCommand::ForgetPublication { topic } => {
                self.publications.remove(&topic);
            }
            NodeCommand::LookupPublicationPort { topic, reply } => {
                let _ = reply.send(self.publications.get(&topic).copied());
            }
            NodeCommand::RecordSubscription { topic, sink } => {
                self.subscriptions.insert(topic, sink);
            }
            NodeCommand::ForgetSubscription { topic } => {
                self.subscriptions.remove(&topic);
            }
            NodeCommand::PublisherUpdate { topic, publishers } => {
                if let Some(sink) = self.subscriptions.get(&topic) {
                    let sink = sink.clone();
                    tokio::spawn(async move {
                        // The reconcile task on the other end owns its own backpressure; if it
                        // has gone away the subscription is being torn down and this update is
                        // moot.
                        let _ = sink.send(publishers).await;
                    });
                } else {
                    trace!("publisherUpdate for topic {topic} with no local subscription, ignoring");
                }
            }
            NodeCommand::ReserveService { name, reply } => {
                if self.services.contains_key(&name) || self.reserved_services.contains_key(&name) {
                    let _ = reply.send(Err(DuplicateServiceError(name)));
                } else {
                    self.reserved_services.insert(name, ());
                    let _ = reply.send(Ok(()));
                }
            }
            NodeCommand::RecordService { name, uri } => {
                self.reserved_services.remove(&name);
                self.services.insert(name, uri);
            }
            NodeCommand::ForgetService { name } => {
                self.reserved_services.remove(&name);
                self.services.remove(&name);
            }
            NodeCommand::LookupServiceUri { name, reply } => {
                let _ = reply.send(self.services.get(&name).cloned());
            }
            NodeCommand::Snapshot { reply } => {
                let snapshot = NodeSnapshot {
                    publications: self.publications.iter().map(|(k, v)| (k.clone(), *v)).collect(),
                    subscriptions: self.subscriptions.keys().cloned().collect(),
                    services: self.services.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                };
                let _ = reply.send(snapshot);
            }
        }
    }
}

/// A cheap, `Clone`-able reference to a running node's bookkeeping actor and its master client.
///
/// Dropping every clone of a `NodeServerHandle` drops the actor's command channel, which ends
/// its run loop. A node's publications and subscriptions hold their own [abort_on_drop] tasks for
/// the network side of teardown; this handle is only for the master-registration and directory
/// bookkeeping side.
#[derive(Clone)]
pub struct NodeServerHandle {
    commands: mpsc::Sender<NodeCommand>,
    master: MasterClient,
    next_id: Arc<AtomicU32>,
}

impl NodeServerHandle {
    /// Spawns the actor task and returns a handle to it.
    pub fn spawn(master: MasterClient) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let actor = NodeActor {
            commands: rx,
            publications: HashMap::new(),
            subscriptions: HashMap::new(),
            services: HashMap::new(),
            reserved_services: HashMap::new(),
        };
        tokio::spawn(actor.run());
        Self {
            commands: tx,
            master,
            next_id: Arc::new(AtomicU32::new(1)),
        }
    }

    /// A process-unique, monotonically increasing id (used for service-call goal ids and the
    /// like). Never reused, never zero.
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Starts the C7 registration background task for a freshly bound publication and returns
    /// immediately: a publisher is already usable (its TCP listener is live) before the master
    /// has acknowledged it, and publishers never act on the master's returned subscriber list, so
    /// there is nothing for the caller to usefully wait on here.
    pub fn register_publisher(&self, topic: impl Into<String>, topic_type: impl Into<String>, port: u16) {
        let topic = topic.into();
        let topic_type = topic_type.into();
        let commands = self.commands.clone();
        let listeners: Arc<RwLock<Vec<Listener<()>>>> = Arc::new(RwLock::new(Vec::new()));
        let bookkeeping_topic = topic.clone();
        let bookkeeping: Listener<()> = Arc::new(move |event| {
            if let RegistrationEvent::Success(()) = event {
                let commands = commands.clone();
                let topic = bookkeeping_topic.clone();
                tokio::spawn(async move {
                    let _ = commands.send(NodeCommand::RecordPublication { topic, port }).await;
                });
            }
        });
        let master = self.master.clone();
        tokio::spawn(async move {
            listeners.write().await.push(bookkeeping);
            registration::run_registration(
                move || -> BoxFuture<'static, ()> {
                    let master = master.clone();
                    let topic = topic.clone();
                    let topic_type = topic_type.clone();
                    Box::pin(async move {
                        master.register_publisher(&topic, &topic_type).await.map(|_| ())
                    })
                },
                listeners,
            )
            .await;
        });
    }

    pub async fn unregister_publisher(&self, topic: impl Into<String>) {
        let topic = topic.into();
        let _ = self
            .commands
            .send(NodeCommand::ForgetPublication { topic: topic.clone() })
            .await;
        let master = self.master.clone();
        registration::run_unregistration(
            async move { master.unregister_publisher(&topic).await.map(|_| ()) },
            Arc::new(RwLock::new(Vec::new())),
        )
        .await;
    }

    /// Answers `requestTopic`: which local port is this topic's publisher listening on?
    pub async fn lookup_publication_port(&self, topic: &str) -> Option<u16> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::LookupPublicationPort {
                topic: topic.to_string(),
                reply: reply_tx,
            })
            .await
            .ok()?;
        reply_rx.await.ok().flatten()
    }

    /// Registers a subscription with the master, retrying on failure, and returns once the first
    /// attempt succeeds with the master's initial list of publisher XML-RPC URIs -- C5 needs this
    /// concrete set to seed its first reconcile pass. Future changes arrive as `publisherUpdate`
    /// calls and are routed to `sink`.
    pub async fn register_subscriber(
        &self,
        topic: impl Into<String>,
        topic_type: impl Into<String>,
        sink: PublisherUpdateSink,
    ) -> Vec<String> {
        let topic = topic.into();
        let topic_type = topic_type.into();
        let master = self.master.clone();
        let register_topic = topic.clone();
        let register_type = topic_type.clone();
        let handle = tokio::spawn(registration::run_registration(
            move || -> BoxFuture<'static, Vec<String>> {
                let master = master.clone();
                let topic = register_topic.clone();
                let topic_type = register_type.clone();
                Box::pin(async move { master.register_subscriber(&topic, &topic_type).await })
            },
            Arc::new(RwLock::new(Vec::new())),
        ));
        let publisher_uris = handle.await.unwrap_or_default();
        let _ = self
            .commands
            .send(NodeCommand::RecordSubscription { topic, sink })
            .await;
        publisher_uris
    }

    pub async fn unregister_subscriber(&self, topic: impl Into<String>) {
        let topic = topic.into();
        let _ = self
            .commands
            .send(NodeCommand::ForgetSubscription { topic: topic.clone() })
            .await;
        let master = self.master.clone();
        registration::run_unregistration(
            async move { master.unregister_subscriber(&topic).await.map(|_| ()) },
            Arc::new(RwLock::new(Vec::new())),
        )
        .await;
    }

    /// Delivers a `publisherUpdate` call received from the master to the matching subscription's
    /// reconcile task, if this node has one for `topic`.
    pub async fn dispatch_publisher_update(&self, topic: impl Into<String>, publishers: Vec<String>) {
        let _ = self
            .commands
            .send(NodeCommand::PublisherUpdate {
                topic: topic.into(),
                publishers,
            })
            .await;
    }

    /// Reserves `name` locally (rejecting a second concurrent advertise of the same service),
    /// then registers it with the master. Unlike publishers/subscribers, a failed service
    /// registration is reported back to the caller rather than retried silently: advertising the
    /// same handler twice by accident is a programmer error the caller should see immediately.
    pub async fn register_service(
        &self,
        name: impl Into<String>,
        service_uri: impl Into<String>,
    ) -> Result<(), RegistrationError> {
        let name = name.into();
        let service_uri = service_uri.into();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::ReserveService {
                name: name.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| RegistrationError::Cancelled)?;
        if reply_rx
            .await
            .unwrap_or(Err(DuplicateServiceError(name.clone())))
            .is_err()
        {
            return Err(RegistrationError::MasterError {
                status: 0,
                message: format!("a service server for {name:?} is already advertised on this node"),
            });
        }

        match self.master.register_service(&name, &service_uri).await {
            Ok(()) => {
                let _ = self
                    .commands
                    .send(NodeCommand::RecordService {
                        name,
                        uri: service_uri,
                    })
                    .await;
                Ok(())
            }
            Err(e) => {
                warn!("failed to register service {name} with master: {e}");
                let _ = self.commands.send(NodeCommand::ForgetService { name }).await;
                Err(e)
            }
        }
    }

    pub async fn unregister_service(&self, name: impl Into<String>) {
        let name = name.into();
        let uri = {
            let (reply_tx, reply_rx) = oneshot::channel();
            if self
                .commands
                .send(NodeCommand::LookupServiceUri {
                    name: name.clone(),
                    reply: reply_tx,
                })
                .await
                .is_err()
            {
                return;
            }
            reply_rx.await.ok().flatten()
        };
        let _ = self
            .commands
            .send(NodeCommand::ForgetService { name: name.clone() })
            .await;
        if let Some(uri) = uri {
            let master = self.master.clone();
            registration::run_unregistration(
                async move { master.unregister_service(&name, &uri).await.map(|_| ()) },
                Arc::new(RwLock::new(Vec::new())),
            )
            .await;
        }
    }

    pub async fn snapshot(&self) -> NodeSnapshot {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(NodeCommand::Snapshot { reply: reply_tx })
            .await
            .is_err()
        {
            return NodeSnapshot::default();
        }
        reply_rx.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master() -> MasterClient {
        // No master is listening on this address in these tests; the cases below only exercise
        // code paths that don't require the RPC to actually succeed.
        MasterClient::new("http://127.0.0.1:1", "/test_node", "http://127.0.0.1:2/")
    }

    #[tokio::test]
    async fn unknown_publication_port_lookup_returns_none() {
        let handle = NodeServerHandle::spawn(test_master());
        assert_eq!(handle.lookup_publication_port("/chatter").await, None);
    }

    #[tokio::test]
    async fn publisher_update_with_no_subscription_is_a_no_op() {
        let handle = NodeServerHandle::spawn(test_master());
        handle
            .dispatch_publisher_update("/chatter", vec!["http://pub:1".to_string()])
            .await;
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_never_zero() {
        let handle = NodeServerHandle::spawn(test_master());
        let a = handle.next_id();
        let b = handle.next_id();
        assert_ne!(a, 0);
        assert!(b > a);
    }

    #[tokio::test]
    async fn snapshot_reflects_no_state_when_empty() {
        let handle = NodeServerHandle::spawn(test_master());
        let snapshot = handle.snapshot().await;
        assert!(snapshot.publications.is_empty());
        assert!(snapshot.subscriptions.is_empty());
        assert!(snapshot.services.is_empty());
    }

    #[tokio::test]
    async fn second_advertise_of_same_service_name_is_rejected_before_any_master_call() {
        let handle = NodeServerHandle::spawn(test_master());
        let (tx, reply) = oneshot::channel();
        handle
            .commands
            .send(NodeCommand::ReserveService {
                name: "/add_two_ints".to_string(),
                reply: tx,
            })
            .await
            .unwrap();
        assert!(reply.await.unwrap().is_ok());

        let (tx2, reply2) = oneshot::channel();
        handle
            .commands
            .send(NodeCommand::ReserveService {
                name: "/add_two_ints".to_string(),
                reply: tx2,
            })
            .await
            .unwrap();
        assert!(reply2.await.unwrap().is_err());
    }
}
