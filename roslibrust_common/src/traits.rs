//! Generic, backend-agnostic traits describing "a thing that behaves like a ROS graph node".
//!
//! These traits exist so that application code can be written once against [TopicProvider] /
//! [ServiceProvider] and run unmodified against any concrete backend (native ROS1, rosbridge,
//! a test mock, ...). `roslibrust_ros1::NodeHandle` is the implementation this workspace ships.

use crate::{Result, RosMessageType, RosServiceType, ServiceFn};

/// A single outgoing message channel for a statically-typed topic.
///
/// Implementations queue the message for delivery; a successful return only promises the
/// message was accepted for sending, not that any subscriber has received it.
pub trait Publish<T: RosMessageType> {
    /// Queue `data` to be sent to all current (and future, once attached) subscribers.
    async fn publish(&self, data: &T) -> Result<()>;
}

/// A single incoming message stream for a statically-typed topic.
///
/// Calling [Subscribe::next] repeatedly yields every message this subscription has observed,
/// in wire order, blocking when none is yet available.
pub trait Subscribe<T: RosMessageType> {
    /// Wait for and return the next available message.
    ///
    /// Returns `None` only when the underlying connection has been permanently shut down.
    async fn next(&mut self) -> Option<Result<T>>;
}

/// Backend capable of creating publishers and subscribers for statically-typed topics.
pub trait TopicProvider {
    /// Concrete publisher handle type returned by [TopicProvider::advertise].
    type Publisher<T: RosMessageType>: Publish<T>;
    /// Concrete subscriber handle type returned by [TopicProvider::subscribe].
    type Subscriber<T: RosMessageType>: Subscribe<T>;

    /// Advertise `topic`, returning a handle that can publish messages of type `T`.
    async fn advertise<T: RosMessageType>(&self, topic: &str) -> Result<Self::Publisher<T>>;

    /// Subscribe to `topic`, returning a handle that can receive messages of type `T`.
    async fn subscribe<T: RosMessageType>(&self, topic: &str) -> Result<Self::Subscriber<T>>;
}

/// Backend capable of calling and serving request/response services.
pub trait ServiceProvider {
    /// Concrete service-client handle type returned by [ServiceProvider::service_client].
    type ServiceClient<T: RosServiceType>;

    /// Create a client for the named service.
    ///
    /// Implementations are free to defer the actual TCP dial until the first call.
    async fn service_client<T: RosServiceType>(&self, service: &str)
        -> Result<Self::ServiceClient<T>>;

    /// Advertise `service`, invoking `server` once per incoming request.
    ///
    /// `server` runs synchronously with respect to the request that triggered it; a slow
    /// handler delays only the connection it was invoked on.
    async fn advertise_service<T: RosServiceType, F: ServiceFn<T>>(
        &self,
        service: &str,
        server: F,
    ) -> Result<()>;
}
