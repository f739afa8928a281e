//! The per-node XML-RPC server: the "slave API" every ROS1 node exposes so the master and peer
//! nodes can call back into it (`requestTopic`, `publisherUpdate`, and the bus-introspection
//! calls). This is the mirror image of [crate::master_client]: there we are the XML-RPC client,
//! here we are the server.

use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use log::{debug, trace, warn};
use serde_xmlrpc::Value;

use crate::node::actor::NodeServerHandle;

/// Shared state handed to every incoming request.
#[derive(Clone)]
struct ServerContext {
    node_handle: NodeServerHandle,
    /// Hostname/IP this node advertises to the rest of the graph; used to fill in the `host` field
    /// of a `requestTopic` reply (the peer dials *us* back on this address, not the bind address).
    advertised_host: String,
}

/// Binds the slave API listener and returns it along with the port the OS assigned. Split from
/// [serve] because the caller (see [crate::node::NodeHandle::new]) needs the port to build its
/// master client's `caller_api` URI before a [NodeServerHandle] (which that client feeds into)
/// exists to actually serve requests.
pub(crate) fn bind(host_addr: Ipv4Addr) -> (std::net::TcpListener, u16) {
    let addr = SocketAddr::from((host_addr, 0));
    let std_listener = std::net::TcpListener::bind(addr).expect("failed to bind slave xmlrpc listener");
    std_listener.set_nonblocking(true).expect("failed to set nonblocking");
    let port = std_listener.local_addr().expect("bound listener has a local addr").port();
    (std_listener, port)
}

/// Starts serving the slave API on an already-[bind]-ed listener.
pub(crate) fn serve(
    listener: std::net::TcpListener,
    advertised_host: String,
    node_handle: NodeServerHandle,
) -> abort_on_drop::ChildTask<()> {
    let context = ServerContext {
        node_handle,
        advertised_host,
    };
    let make_svc = make_service_fn(move |_conn| {
        let context = context.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let context = context.clone();
                async move { Ok::<_, Infallible>(handle_request(req, context).await) }
            }))
        }
    });

    let server = Server::from_tcp(listener)
        .expect("failed to adopt std listener into hyper")
        .serve(make_svc);

    tokio::spawn(async move {
        if let Err(e) = server.await {
            warn!("slave xmlrpc server exited: {e}");
        }
    })
    .into()
}

async fn handle_request(req: Request<Body>, context: ServerContext) -> Response<Body> {
    let bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(e) => return text_response(&fault_response(&format!("failed to read request body: {e}"))),
    };
    let body = match std::str::from_utf8(&bytes) {
        Ok(body) => body,
        Err(e) => return text_response(&fault_response(&format!("request body was not utf8: {e}"))),
    };

    let (method, params) = match serde_xmlrpc::request_from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => return text_response(&fault_response(&format!("malformed xmlrpc request: {e}"))),
    };
    trace!("slave xmlrpc call: {method}({params:?})");

    let result = dispatch(&method, &params, &context).await;
    text_response(&result)
}

fn text_response(body: &str) -> Response<Body> {
    Response::builder()
        .header("Content-Type", "text/xml")
        .body(Body::from(body.to_owned()))
        .unwrap_or_else(|_| Response::new(Body::from(body.to_owned())))
}

fn fault_response(message: &str) -> String {
    success_envelope(-1, message, Value::from(()))
}

fn success_envelope(status: i32, message: &str, value: Value) -> String {
    let payload = (status, message.to_owned(), value);
    serde_xmlrpc::response_to_string(payload).unwrap_or_else(|_| {
        // Last-resort fallback: this should never happen for the plain tuples we build above.
        serde_xmlrpc::response_to_string((status, message.to_owned(), Value::from(())))
            .unwrap_or_default()
    })
}

async fn dispatch(method: &str, params: &[Value], context: &ServerContext) -> String {
    match method {
        "requestTopic" => request_topic(params, context).await,
        "publisherUpdate" => publisher_update(params, &context.node_handle).await,
        "getBusStats" => bus_stats(&context.node_handle).await,
        "getBusInfo" => bus_info(&context.node_handle).await,
        "getPid" => success_envelope(1, "pid", Value::from(std::process::id() as i64)),
        "shutdown" => {
            debug!("received shutdown request over slave xmlrpc, ignoring (no process-level shutdown wired up)");
            success_envelope(1, "shutdown acknowledged", Value::from(0i64))
        }
        other => {
            warn!("slave xmlrpc server received unsupported method: {other}");
            fault_response(&format!("unsupported method: {other}"))
        }
    }
}

async fn request_topic(params: &[Value], context: &ServerContext) -> String {
    // params: [caller_id, topic, protocols]
    let topic = match params.get(1).and_then(|v| v.as_str()) {
        Some(topic) => topic.to_owned(),
        None => return fault_response("requestTopic missing topic parameter"),
    };
    match context.node_handle.lookup_publication_port(&topic).await {
        Some(port) => {
            let protocol = Value::Array(vec![
                Value::from("TCPROS"),
                Value::from(context.advertised_host.clone()),
                Value::from(port as i64),
            ]);
            success_envelope(1, "ok", protocol)
        }
        None => fault_response(&format!("no publisher for topic {topic} on this node")),
    }
}

async fn publisher_update(params: &[Value], node_handle: &NodeServerHandle) -> String {
    // params: [caller_id, topic, publishers]
    let topic = match params.get(1).and_then(|v| v.as_str()) {
        Some(topic) => topic.to_owned(),
        None => return fault_response("publisherUpdate missing topic parameter"),
    };
    let publishers: Vec<String> = match params.get(2) {
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect(),
        _ => return fault_response("publisherUpdate missing publishers parameter"),
    };
    node_handle.dispatch_publisher_update(topic, publishers).await;
    success_envelope(1, "ok", Value::from(0i64))
}

async fn bus_stats(node_handle: &NodeServerHandle) -> String {
    let snapshot = node_handle.snapshot().await;
    let publish = snapshot
        .publications
        .into_iter()
        .map(|(topic, _)| Value::Array(vec![Value::from(topic)]))
        .collect();
    let stats = Value::Array(vec![
        Value::Array(publish),
        Value::Array(Vec::new()),
        Value::Array(Vec::new()),
    ]);
    success_envelope(1, "ok", stats)
}

async fn bus_info(node_handle: &NodeServerHandle) -> String {
    let snapshot = node_handle.snapshot().await;
    let entries = snapshot
        .publications
        .into_iter()
        .map(|(topic, port)| {
            Value::Array(vec![
                Value::from(0i64),
                Value::from(format!("port {port}")),
                Value::from("o"),
                Value::from("TCPROS"),
                Value::from(topic),
            ])
        })
        .collect();
    success_envelope(1, "ok", Value::Array(entries))
}
