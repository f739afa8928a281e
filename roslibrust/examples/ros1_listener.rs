//! Subscribes to `/chatter` and logs every message until ctrl-c.
use roslibrust::ros1::NodeHandle;
use roslibrust::{Subscribe, TopicProvider};
use roslibrust_test::std_msgs;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    {
        let nh = NodeHandle::new("http://localhost:11311", "/listener_rs").await?;
        let mut subscriber = nh.subscribe::<std_msgs::String>("/chatter").await?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    log::warn!("ctrl-c, exiting");
                    break;
                }
                msg = subscriber.next() => {
                    if let Some(Ok(msg)) = msg {
                        log::info!("[/listener_rs] got message: {}", msg.data);
                    }
                }
            }
        }
    }
    log::info!("done subscribing, letting subscription unregister");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    Ok(())
}
