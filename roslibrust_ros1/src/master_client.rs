//! A thin XML-RPC client for the master's registration RPC surface (§6).
//!
//! The master is an external collaborator: this module only speaks its wire contract. Every
//! call follows the same shape -- `caller_id` is always the first parameter, and the response is
//! always a 3-tuple `[status_code, status_message, value]` where `status_code` of `1` means
//! success and anything else is a [RegistrationError::MasterError].

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::RegistrationError;

/// A raw XML-RPC response envelope: `[status_code, status_message, value]`.
#[derive(Debug, serde::Deserialize)]
struct Response<T> {
    status_code: i32,
    status_message: String,
    value: T,
}

// serde_xmlrpc encodes top level responses as an untagged sequence; we decode into this
// positional tuple and then re-pack it into the named `Response` above for readability at call
// sites.
type RawResponse<T> = (i32, String, T);

/// Client for the master's XML-RPC registration API.
#[derive(Clone)]
pub struct MasterClient {
    http: reqwest::Client,
    master_uri: String,
    caller_id: String,
    slave_uri: String,
}

impl MasterClient {
    pub fn new(master_uri: impl Into<String>, caller_id: impl Into<String>, slave_uri: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            master_uri: master_uri.into(),
            caller_id: caller_id.into(),
            slave_uri: slave_uri.into(),
        }
    }

    async fn call<P, T>(&self, method: &str, params: P) -> Result<T, RegistrationError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let body = serde_xmlrpc::request_to_string(method, params)
            .map_err(|e| RegistrationError::XmlRpcTransport(e.to_string()))?;
        let response_xml = self
            .http
            .post(&self.master_uri)
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| RegistrationError::XmlRpcTransport(e.to_string()))?
            .text()
            .await
            .map_err(|e| RegistrationError::XmlRpcTransport(e.to_string()))?;

        let (status_code, status_message, value): RawResponse<T> =
            serde_xmlrpc::response_from_str(&response_xml)
                .map_err(|e| RegistrationError::UnexpectedResponseShape(e.to_string()))?;

        let response = Response {
            status_code,
            status_message,
            value,
        };

        if response.status_code == 1 {
            Ok(response.value)
        } else {
            Err(RegistrationError::MasterError {
                status: response.status_code,
                message: response.status_message,
            })
        }
    }

    /// `registerPublisher(caller_id, topic, type, caller_api) -> [subscriber_uri]`
    pub async fn register_publisher(
        &self,
        topic: &str,
        topic_type: &str,
    ) -> Result<Vec<String>, RegistrationError> {
        self.call(
            "registerPublisher",
            (&self.caller_id, topic, topic_type, &self.slave_uri),
        )
        .await
    }

    /// `unregisterPublisher(caller_id, topic, caller_api) -> num_unregistered`
    pub async fn unregister_publisher(&self, topic: &str) -> Result<i32, RegistrationError> {
        self.call(
            "unregisterPublisher",
            (&self.caller_id, topic, &self.slave_uri),
        )
        .await
    }

    /// `registerSubscriber(caller_id, topic, type, caller_api) -> [publisher_uri]`
    pub async fn register_subscriber(
        &self,
        topic: &str,
        topic_type: &str,
    ) -> Result<Vec<String>, RegistrationError> {
        self.call(
            "registerSubscriber",
            (&self.caller_id, topic, topic_type, &self.slave_uri),
        )
        .await
    }

    /// `unregisterSubscriber(caller_id, topic, caller_api) -> num_unregistered`
    pub async fn unregister_subscriber(&self, topic: &str) -> Result<i32, RegistrationError> {
        self.call(
            "unregisterSubscriber",
            (&self.caller_id, topic, &self.slave_uri),
        )
        .await
    }

    /// `registerService(caller_id, service, service_api, caller_api) -> ignored`
    pub async fn register_service(
        &self,
        service: &str,
        service_uri: &str,
    ) -> Result<(), RegistrationError> {
        self.call(
            "registerService",
            (&self.caller_id, service, service_uri, &self.slave_uri),
        )
        .await
    }

    /// `unregisterService(caller_id, service, service_api) -> num_unregistered`
    pub async fn unregister_service(
        &self,
        service: &str,
        service_uri: &str,
    ) -> Result<i32, RegistrationError> {
        self.call(
            "unregisterService",
            (&self.caller_id, service, service_uri),
        )
        .await
    }

    /// `lookupNode(caller_id, node_name) -> uri`
    pub async fn lookup_node(&self, node_name: &str) -> Result<String, RegistrationError> {
        self.call("lookupNode", (&self.caller_id, node_name)).await
    }

    /// `lookupService(caller_id, service) -> uri`
    pub async fn lookup_service(&self, service: &str) -> Result<String, RegistrationError> {
        self.call("lookupService", (&self.caller_id, service)).await
    }

    /// `getPublishedTopics(caller_id, subgraph) -> [[topic, type]]`
    pub async fn get_published_topics(
        &self,
        subgraph: &str,
    ) -> Result<Vec<(String, String)>, RegistrationError> {
        self.call("getPublishedTopics", (&self.caller_id, subgraph))
            .await
    }

    /// `getTopicTypes(caller_id) -> [[topic, type]]`
    pub async fn get_topic_types(&self) -> Result<Vec<(String, String)>, RegistrationError> {
        self.call("getTopicTypes", (&self.caller_id,)).await
    }

    /// `getSystemState(caller_id) -> [publishers, subscribers, services]`
    pub async fn get_system_state(&self) -> Result<serde_xmlrpc::Value, RegistrationError> {
        self.call("getSystemState", (&self.caller_id,)).await
    }

    /// `getUri(caller_id) -> master_uri`
    pub async fn get_uri(&self) -> Result<String, RegistrationError> {
        self.call("getUri", (&self.caller_id,)).await
    }
}
