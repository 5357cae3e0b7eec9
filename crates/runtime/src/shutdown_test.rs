use std::time::Duration;

use tokio::{sync::broadcast, time};

use crate::shutdown::{ShutdownSignal, forward_shutdown};

#[tokio::test]
async fn signal_stays_pending_without_signals() {
    let signal = ShutdownSignal::new().unwrap();
    assert!(time::timeout(Duration::from_millis(20), signal).await.is_err());
}

#[tokio::test]
async fn forwards_shutdown_to_every_subscriber() {
    let (sender, mut first) = broadcast::channel(1);
    let mut second = sender.subscribe();

    forward_shutdown(async {}, sender).await;

    assert!(first.recv().await.is_ok());
    assert!(second.recv().await.is_ok());
}

#[tokio::test]
async fn forwarding_without_subscribers_is_fine() {
    let (sender, receiver) = broadcast::channel::<()>(1);
    drop(receiver);
    forward_shutdown(async {}, sender).await;
}
