//! Umbrella crate for the roslibrust ecosystem.
//!
//! Re-exports the backend-agnostic types/traits from `roslibrust_common` at the crate root (so
//! application code written against [TopicProvider]/[ServiceProvider] doesn't need a direct
//! dependency on that crate), and the native ROS1 backend under [ros1].

pub use roslibrust_common::*;

/// Native ROS1 (TCPROS + XML-RPC master) backend; no `rosbridge` or ROS installation required.
pub mod ros1 {
    pub use roslibrust_ros1::*;
}
