use super::header_codec::{self, HeaderFields};
use crate::error::TcprosError;

/// Field-name constants for the TCPROS / service wire protocols (see roslibrust_ros1::tcpros).
pub mod field {
    pub const CALLER_ID: &str = "callerid";
    pub const TOPIC: &str = "topic";
    pub const SERVICE: &str = "service";
    pub const TYPE: &str = "type";
    pub const MD5SUM: &str = "md5sum";
    pub const MESSAGE_DEFINITION: &str = "message_definition";
    pub const LATCHING: &str = "latching";
    pub const TCP_NODELAY: &str = "tcp_nodelay";
    pub const PERSISTENT: &str = "persistent";
    pub const ERROR: &str = "error";
}

/// A parsed TCPROS/service connection header.
///
/// Mirrors the wire fields of §6: mandatory `callerid`/`md5sum`/`type`, exactly one of
/// `topic`/`service` depending on connection kind, an optional `message_definition` (only
/// meaningful for topic connections), and the optional `latching`/`tcp_nodelay`/`persistent`
/// flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHeader {
    pub caller_id: String,
    pub topic: Option<String>,
    pub service: Option<String>,
    pub topic_type: String,
    pub md5sum: String,
    pub msg_definition: String,
    pub latching: bool,
    pub tcp_nodelay: bool,
    pub persistent: bool,
    /// Present on a server's handshake reply when the handshake failed (e.g. unknown service);
    /// absent otherwise.
    pub error: Option<String>,
}

impl ConnectionHeader {
    /// Builds the header a publisher sends in reply to a subscriber's connection.
    pub fn for_publisher(
        caller_id: impl Into<String>,
        topic: impl Into<String>,
        topic_type: impl Into<String>,
        md5sum: impl Into<String>,
        msg_definition: impl Into<String>,
        latching: bool,
    ) -> Self {
        Self {
            caller_id: caller_id.into(),
            topic: Some(topic.into()),
            service: None,
            topic_type: topic_type.into(),
            md5sum: md5sum.into(),
            msg_definition: msg_definition.into(),
            latching,
            tcp_nodelay: false,
            persistent: false,
            error: None,
        }
    }

    /// Builds the header a subscriber sends to initiate a topic connection.
    pub fn for_subscriber(
        caller_id: impl Into<String>,
        topic: impl Into<String>,
        topic_type: impl Into<String>,
        md5sum: impl Into<String>,
        msg_definition: impl Into<String>,
    ) -> Self {
        Self {
            caller_id: caller_id.into(),
            topic: Some(topic.into()),
            service: None,
            topic_type: topic_type.into(),
            md5sum: md5sum.into(),
            msg_definition: msg_definition.into(),
            latching: false,
            tcp_nodelay: false,
            persistent: false,
            error: None,
        }
    }

    /// Builds the header a service server sends in reply to a service client's connection.
    pub fn for_service_server(
        caller_id: impl Into<String>,
        service: impl Into<String>,
        service_type: impl Into<String>,
        md5sum: impl Into<String>,
    ) -> Self {
        Self {
            caller_id: caller_id.into(),
            topic: None,
            service: Some(service.into()),
            topic_type: service_type.into(),
            md5sum: md5sum.into(),
            msg_definition: String::new(),
            latching: false,
            tcp_nodelay: false,
            persistent: false,
            error: None,
        }
    }

    /// Builds the header a service server sends back when it cannot serve the connection (e.g.
    /// digest mismatch, unknown service name).
    pub fn error_reply(error: impl Into<String>) -> Self {
        Self {
            caller_id: String::new(),
            topic: None,
            service: None,
            topic_type: String::new(),
            md5sum: String::new(),
            msg_definition: String::new(),
            latching: false,
            tcp_nodelay: false,
            persistent: false,
            error: Some(error.into()),
        }
    }

    /// Builds the header a service client sends to initiate a service connection.
    pub fn for_service_client(
        caller_id: impl Into<String>,
        service: impl Into<String>,
        service_type: impl Into<String>,
        md5sum: impl Into<String>,
        persistent: bool,
    ) -> Self {
        Self {
            caller_id: caller_id.into(),
            topic: None,
            service: Some(service.into()),
            topic_type: service_type.into(),
            md5sum: md5sum.into(),
            msg_definition: String::new(),
            latching: false,
            tcp_nodelay: false,
            persistent,
            error: None,
        }
    }

    pub fn to_fields(&self) -> HeaderFields {
        let mut fields = HeaderFields::new();
        fields.push((field::CALLER_ID.to_string(), self.caller_id.clone()));
        if let Some(topic) = &self.topic {
            fields.push((field::TOPIC.to_string(), topic.clone()));
        }
        if let Some(service) = &self.service {
            fields.push((field::SERVICE.to_string(), service.clone()));
        }
        fields.push((field::TYPE.to_string(), self.topic_type.clone()));
        fields.push((field::MD5SUM.to_string(), self.md5sum.clone()));
        if !self.msg_definition.is_empty() {
            fields.push((
                field::MESSAGE_DEFINITION.to_string(),
                self.msg_definition.clone(),
            ));
        }
        if self.latching {
            fields.push((field::LATCHING.to_string(), "1".to_string()));
        }
        if self.tcp_nodelay {
            fields.push((field::TCP_NODELAY.to_string(), "1".to_string()));
        }
        if self.persistent {
            fields.push((field::PERSISTENT.to_string(), "1".to_string()));
        }
        if let Some(error) = &self.error {
            fields.push((field::ERROR.to_string(), error.clone()));
        }
        fields
    }

    pub fn from_fields(fields: HeaderFields) -> Result<Self, TcprosError> {
        let mut caller_id = None;
        let mut topic = None;
        let mut service = None;
        let mut topic_type = None;
        let mut md5sum = None;
        let mut msg_definition = String::new();
        let mut latching = false;
        let mut tcp_nodelay = false;
        let mut persistent = false;
        let mut error = None;

        for (key, value) in fields {
            match key.as_str() {
                field::CALLER_ID => caller_id = Some(value),
                field::TOPIC => topic = Some(value),
                field::SERVICE => service = Some(value),
                field::TYPE => topic_type = Some(value),
                field::MD5SUM => md5sum = Some(value),
                field::MESSAGE_DEFINITION => msg_definition = value,
                field::LATCHING => latching = value == "1",
                field::TCP_NODELAY => tcp_nodelay = value == "1",
                field::PERSISTENT => persistent = value == "1",
                field::ERROR => error = Some(value),
                // Unrecognized fields are preserved on the wire already having been parsed;
                // ROS tooling is tolerant of vendor extensions here, so we just ignore them.
                _ => {}
            }
        }

        // A handshake-failure reply from a server may carry only `error`; everything else is
        // optional in that case.
        if let Some(error) = error {
            return Ok(Self {
                caller_id: caller_id.unwrap_or_default(),
                topic,
                service,
                topic_type: topic_type.unwrap_or_default(),
                md5sum: md5sum.unwrap_or_default(),
                msg_definition,
                latching,
                tcp_nodelay,
                persistent,
                error: Some(error),
            });
        }

        Ok(Self {
            caller_id: caller_id.ok_or(TcprosError::MissingField(field::CALLER_ID))?,
            topic,
            service,
            topic_type: topic_type.ok_or(TcprosError::MissingField(field::TYPE))?,
            md5sum: md5sum.ok_or(TcprosError::MissingField(field::MD5SUM))?,
            msg_definition,
            latching,
            tcp_nodelay,
            persistent,
            error: None,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        header_codec::encode(&self.to_fields())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TcprosError> {
        Self::from_fields(header_codec::decode(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let header = ConnectionHeader::for_publisher(
            "/talker",
            "/chatter",
            "std_msgs/String",
            "992ce8a1687cec8c8bd883ec73ca41d1",
            "string data\n",
            true,
        );
        let bytes = header.to_bytes();
        // The leading u32 is the total-length prefix; decode() expects that stripped already.
        let decoded = ConnectionHeader::from_bytes(&bytes[4..]).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn error_reply_only_requires_error_field() {
        let mut fields = HeaderFields::new();
        fields.push(("error".to_string(), "no such service".to_string()));
        let header = ConnectionHeader::from_fields(fields).unwrap();
        assert_eq!(header.error.as_deref(), Some("no such service"));
    }

    #[test]
    fn missing_mandatory_field_is_rejected() {
        let mut fields = HeaderFields::new();
        fields.push(("callerid".to_string(), "/talker".to_string()));
        assert!(ConnectionHeader::from_fields(fields).is_err());
    }
}
