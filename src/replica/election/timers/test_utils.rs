use crate::actor::Event;
use crate::replica::HeartbeatTick;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc;

struct TestUtilReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T: Debug> TestUtilReceiver<T> {
    pub(super) fn new(rx: mpsc::Receiver<T>) -> Self {
        TestUtilReceiver { rx }
    }

    pub(super) async fn recv(&mut self) -> T {
        self.recv_with_sanity_timeout().await.expect("Expected value")
    }

    async fn recv_with_sanity_timeout(&mut self) -> Option<T> {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("Unexpected timeout")
    }

    pub(super) async fn recv_assert_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .expect_err("Expected timeout");
    }
}

pub(super) struct TestUtilActor {
    receiver: TestUtilReceiver<Event>,
    timeout: Duration,
}

impl TestUtilActor {
    pub(super) fn new(actor_queue_rx: mpsc::Receiver<Event>) -> Self {
        TestUtilActor {
            receiver: TestUtilReceiver::new(actor_queue_rx),
            timeout: Duration::from_millis(10),
        }
    }

    pub(super) async fn assert_heartbeat_tick_event(&mut self, expected_tick: HeartbeatTick) {
        match self.receiver.recv().await {
            Event::HeartbeatTick(tick) => assert_eq!(tick, expected_tick),
            event => panic!("Unexpected event: {:?}", event),
        }
    }

    pub(super) async fn assert_election_timeout_event(&mut self) {
        match self.receiver.recv().await {
            Event::ElectionTimeout => {}
            event => panic!("Unexpected event: {:?}", event),
        }
    }

    pub(super) async fn assert_no_event(&mut self) {
        self.receiver.recv_assert_timeout(self.timeout).await;
    }
}
