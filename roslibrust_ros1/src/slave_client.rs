//! A client for calling `requestTopic` on a *peer node's* XML-RPC server (as opposed to
//! [crate::master_client], which talks to the master). A subscriber's C5 reconcile task uses this
//! once per newly-targeted publisher to find out which host/port to dial for the TCPROS
//! connection.

use crate::error::RegistrationError;

/// `requestTopic(caller_id, topic, protocols) -> [protocol, host, port]`.
///
/// `protocols` is always `[["TCPROS"]]` here: this crate speaks no other transport.
pub async fn request_topic(
    http: &reqwest::Client,
    publisher_uri: &str,
    caller_id: &str,
    topic: &str,
) -> Result<(String, u16), RegistrationError> {
    let params = (caller_id, topic, (("TCPROS",),));
    let body = serde_xmlrpc::request_to_string("requestTopic", params)
        .map_err(|e| RegistrationError::XmlRpcTransport(e.to_string()))?;

    let response_xml = http
        .post(publisher_uri)
        .header("Content-Type", "text/xml")
        .body(body)
        .send()
        .await
        .map_err(|e| RegistrationError::XmlRpcTransport(e.to_string()))?
        .text()
        .await
        .map_err(|e| RegistrationError::XmlRpcTransport(e.to_string()))?;

    let (status_code, status_message, (_protocol, host, port)): (i32, String, (String, String, u16)) =
        serde_xmlrpc::response_from_str(&response_xml)
            .map_err(|e| RegistrationError::UnexpectedResponseShape(e.to_string()))?;

    if status_code != 1 {
        return Err(RegistrationError::MasterError {
            status: status_code,
            message: status_message,
        });
    }

    Ok((host, port))
}
