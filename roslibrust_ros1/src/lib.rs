//! A native ROS1 client library: publishers, subscribers, and services talking TCPROS directly
//! to a ROS1 master, with no dependency on a ROS installation or `rosbridge`.
//!
//! [NodeHandle] is the entry point; it implements [roslibrust_common::TopicProvider] and
//! [roslibrust_common::ServiceProvider] so application code can be written against those traits
//! and run against this backend or any other roslibrust backend unmodified.

mod error;
mod names;
mod options;
mod registration;
mod ring_buffer;
mod slave_client;
mod tcpros;

mod master_client;
mod node;
mod publisher;
mod service_client;
mod service_server;
mod subscriber;
mod xmlrpc_server;

pub use error::{DuplicateServiceError, RegistrationError, TcprosError};
pub use names::Name;
pub use node::NodeHandle;
pub use publisher::Publisher;
pub use service_client::ServiceClient;
pub use subscriber::Subscriber;

// Re-exported so downstream crates can write message/service types without a direct dependency.
pub use roslibrust_common::{Error, Result, RosMessageType, RosServiceType, ServiceFn};
