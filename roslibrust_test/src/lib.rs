//! Hand-written message and service types implementing [roslibrust_common::RosMessageType] /
//! [roslibrust_common::RosServiceType] directly, used by `roslibrust_ros1`'s integration tests
//! and the `demos` crate.
//!
//! These mirror a handful of the most commonly used types from ROS1's `std_msgs` and
//! `rospy_tutorials` packages; the md5sums are the real values those packages compute (verifiable
//! against any ROS1 install), so a `roslibrust_test` node interoperates with genuine ROS1 nodes
//! using the same message types.

use roslibrust_common::{RosMessageType, RosServiceType};
use serde::{Deserialize, Serialize};

pub mod std_msgs {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct String {
        pub data: std::string::String,
    }

    impl RosMessageType for String {
        const ROS_TYPE_NAME: &'static str = "std_msgs/String";
        const MD5SUM: &'static str = "992ce8a1687cec8c8bd883ec73ca41d1";
        const DEFINITION: &'static str = "string data\n";
    }

    #[derive(Debug, Clone, Default, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Int32 {
        pub data: i32,
    }

    impl RosMessageType for Int32 {
        const ROS_TYPE_NAME: &'static str = "std_msgs/Int32";
        const MD5SUM: &'static str = "da5909fbe378aeaf85e547e830cc1bb7";
        const DEFINITION: &'static str = "int32 data\n";
    }
}

pub mod rospy_tutorials {
    use super::*;

    #[derive(Debug, Clone, Default, Copy, PartialEq, Serialize, Deserialize)]
    pub struct AddTwoIntsRequest {
        pub a: i64,
        pub b: i64,
    }

    impl RosMessageType for AddTwoIntsRequest {
        const ROS_TYPE_NAME: &'static str = "rospy_tutorials/AddTwoIntsRequest";
        const MD5SUM: &'static str = "36d09b846be0b371c5f190354dd3153e";
        const DEFINITION: &'static str = "int64 a\nint64 b\n";
    }

    #[derive(Debug, Clone, Default, Copy, PartialEq, Serialize, Deserialize)]
    pub struct AddTwoIntsResponse {
        pub sum: i64,
    }

    impl RosMessageType for AddTwoIntsResponse {
        const ROS_TYPE_NAME: &'static str = "rospy_tutorials/AddTwoIntsResponse";
        const MD5SUM: &'static str = "b88405221c77b1878a3cbbfff53428d7";
        const DEFINITION: &'static str = "int64 sum\n";
    }

    pub struct AddTwoInts;

    impl RosServiceType for AddTwoInts {
        const ROS_SERVICE_NAME: &'static str = "rospy_tutorials/AddTwoInts";
        const MD5SUM: &'static str = "6a2e34150c00229791cc89ff309fff21";
        type Request = AddTwoIntsRequest;
        type Response = AddTwoIntsResponse;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trips_through_json() {
        let msg = std_msgs::String {
            data: "hello".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: std_msgs::String = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
