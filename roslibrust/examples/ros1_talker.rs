//! Publishes an incrementing counter on `/example_counter` at 1 Hz, using the hand-written
//! message types from `roslibrust_test` instead of any code-generated ones.
use roslibrust::ros1::NodeHandle;
use roslibrust::{Publish, TopicProvider};
use roslibrust_test::std_msgs;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let nh = NodeHandle::new("http://localhost:11311", "/talker_rs").await?;
    let publisher = nh.advertise::<std_msgs::Int32>("/example_counter").await?;

    let mut count = 0;
    loop {
        publisher.publish(&std_msgs::Int32 { data: count }).await?;
        println!("published {count}");
        count += 1;
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}
