//! [NodeHandle]: the public facade tying together the per-node XML-RPC server (§6), the C8
//! bookkeeping actor, and the master client into a single thing application code talks to.

pub(crate) mod actor;

use std::net::Ipv4Addr;
use std::sync::Arc;

use abort_on_drop::ChildTask;
use log::{debug, info};
use roslibrust_common::{Result as RosResult, RosMessageType, RosServiceType, ServiceFn};
use tokio::sync::Mutex;

use crate::master_client::MasterClient;
use crate::names::Name;
use crate::options::DEFAULT_PUBLISHER_QUEUE_SIZE;
use crate::publisher::{Publication, Publisher};
use crate::service_client::ServiceClient;
use crate::service_server::{self, ServiceServerLink};
use crate::subscriber::{Subscriber, Subscription};
use crate::xmlrpc_server;

use actor::NodeServerHandle;

/// A running ROS1 node: owns a master client, a slave (per-node) XML-RPC server, and the
/// bookkeeping actor every publication/subscription/service registers itself with.
///
/// Cloning is cheap (every field is a handle); all clones refer to the same node identity and
/// the same slave API server. Advertised services live as long as any clone of the `NodeHandle`
/// they were created through does.
#[derive(Clone)]
pub struct NodeHandle {
    name: Name,
    host_addr: Ipv4Addr,
    advertised_host: String,
    master: MasterClient,
    node_handle: NodeServerHandle,
    xmlrpc_port: u16,
    services: Arc<Mutex<Vec<ServiceServerLink>>>,
    _xmlrpc_task: Arc<ChildTask<()>>,
}

impl NodeHandle {
    /// Resolves this node's advertised host/port, starts its slave XML-RPC server, and connects
    /// to `master_uri`. Returns once the server is accepting connections.
    pub async fn new(master_uri: &str, node_name: &str) -> RosResult<Self> {
        let name = Name::new(node_name.to_owned());
        let advertised_host = resolve_advertised_host();
        let bind_addr = Ipv4Addr::UNSPECIFIED;

        let (listener, xmlrpc_port) = xmlrpc_server::bind(bind_addr);
        let slave_uri = format!("http://{advertised_host}:{xmlrpc_port}/");
        info!("node {node_name} slave api listening on {slave_uri}");

        let master = MasterClient::new(master_uri, node_name, slave_uri);
        let node_handle = NodeServerHandle::spawn(master.clone());
        let xmlrpc_task = xmlrpc_server::serve(listener, advertised_host.clone(), node_handle.clone());

        Ok(Self {
            name,
            host_addr: bind_addr,
            advertised_host,
            master,
            node_handle,
            xmlrpc_port,
            services: Arc::new(Mutex::new(Vec::new())),
            _xmlrpc_task: Arc::new(xmlrpc_task),
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn slave_api_port(&self) -> u16 {
        self.xmlrpc_port
    }
}

impl roslibrust_common::TopicProvider for NodeHandle {
    type Publisher<T: RosMessageType> = Publisher<T>;
    type Subscriber<T: RosMessageType> = Subscriber<T>;

    async fn advertise<T: RosMessageType>(&self, topic: &str) -> RosResult<Self::Publisher<T>> {
        let (publication, sender) = Publication::new(
            &self.name,
            false,
            topic,
            self.host_addr,
            DEFAULT_PUBLISHER_QUEUE_SIZE,
            T::DEFINITION,
            T::MD5SUM,
            T::ROS_TYPE_NAME,
            self.node_handle.clone(),
        )
        .await
        .map_err(roslibrust_common::Error::IoError)?;

        self.node_handle
            .register_publisher(topic.to_owned(), T::ROS_TYPE_NAME.to_owned(), publication.port());
        debug!("advertised {topic} ({})", T::ROS_TYPE_NAME);
        Ok(Publisher::new(topic, sender, publication))
    }

    async fn subscribe<T: RosMessageType>(&self, topic: &str) -> RosResult<Self::Subscriber<T>> {
        let (subscription, queue) = Subscription::new(
            self.name.to_string(),
            topic,
            T::ROS_TYPE_NAME,
            T::MD5SUM,
            T::DEFINITION,
            0,
            self.node_handle.clone(),
        )
        .await;
        debug!("subscribed to {topic} ({})", T::ROS_TYPE_NAME);
        Ok(Subscriber::from_parts(queue, subscription))
    }
}

impl roslibrust_common::ServiceProvider for NodeHandle {
    type ServiceClient<T: RosServiceType> = ServiceClient<T>;

    async fn service_client<T: RosServiceType>(&self, service: &str) -> RosResult<Self::ServiceClient<T>> {
        let service_uri = self.master.lookup_service(service).await.map_err(roslibrust_common::Error::from)?;
        ServiceClient::connect(&self.name, service, &service_uri)
            .await
            .map_err(roslibrust_common::Error::from)
    }

    async fn advertise_service<T: RosServiceType, F: ServiceFn<T>>(
        &self,
        service: &str,
        server: F,
    ) -> RosResult<()> {
        let handler = service_server::into_handler(server);
        let (link, port) = ServiceServerLink::bind::<T>(
            &self.name,
            service,
            self.host_addr,
            handler,
            self.node_handle.clone(),
        )
        .await
        .map_err(roslibrust_common::Error::IoError)?;

        let service_uri = format!("rosrpc://{}:{port}/", self.advertised_host);
        self.node_handle
            .register_service(service.to_owned(), service_uri)
            .await
            .map_err(roslibrust_common::Error::from)?;
        self.services.lock().await.push(link);
        Ok(())
    }
}

fn resolve_advertised_host() -> String {
    if let Ok(ip) = std::env::var("ROS_IP") {
        return ip;
    }
    if let Ok(hostname) = std::env::var("ROS_HOSTNAME") {
        return hostname;
    }
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "localhost".to_string())
}
