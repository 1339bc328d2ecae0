use crate::actor;
use crate::replica::election::timers::wake_time::SharedWakeTime;
use crate::replica::election::timers::stop_signal;
use crate::replica::election::timers::time::{Clock, RealClock};
use crate::replica::election::timers::ElectionTimer;
use tokio::time::Duration;

pub(crate) struct ElectionTimerHandle<C: Clock = RealClock> {
    next_wake_time: SharedWakeTime,
    clock: C,
    _to_drop: stop_signal::Stopper,
}

struct ElectionTimerTask<C: Clock> {
    next_wake_time: SharedWakeTime,
    actor_client: actor::WeakActorClient,
    clock: C,
    stop_check: stop_signal::StopCheck,
    // Static amount of time this task waits between repeated timeout notifications, in case the
    // actor hasn't replaced this timer yet.
    timeout_backoff: Duration,
}

impl ElectionTimerHandle {
    pub(crate) fn spawn_timer_task(timeout: Duration, actor_client: actor::WeakActorClient) -> Self {
        let (task, handle) = ElectionTimerTask::new(timeout, actor_client, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock + Send + Sync + 'static> ElectionTimerHandle<C> {
    fn reset_timeout(&self, timeout: Duration) {
        self.next_wake_time.set(self.clock.now() + timeout);
    }
}

impl<C: Clock + Send + Sync + 'static> ElectionTimer for ElectionTimerHandle<C> {
    fn reset(&self, timeout: Duration) {
        self.reset_timeout(timeout);
    }
}

impl<C: Clock + Send + Sync + 'static> ElectionTimerTask<C> {
    fn new(timeout: Duration, actor_client: actor::WeakActorClient, clock: C) -> (Self, ElectionTimerHandle<C>) {
        let wake_time = SharedWakeTime::default();
        let (stopper, stop_check) = stop_signal::new();

        let task = ElectionTimerTask {
            next_wake_time: wake_time.clone(),
            actor_client,
            clock: clock.clone(),
            stop_check,
            timeout_backoff: timeout,
        };
        let handle = ElectionTimerHandle {
            next_wake_time: wake_time,
            clock,
            _to_drop: stopper,
        };

        // Timer task must have a wake time present when it starts, otherwise it would fire
        // immediately.
        handle.reset_timeout(timeout);

        (task, handle)
    }

    async fn run(mut self) {
        loop {
            match self.next_wake_time.take() {
                Some(wake_time) => {
                    self.clock.sleep_until(wake_time).await;
                }
                None => {
                    // We slept until `wake_time` and nobody reset us in the meantime.
                    if self.stop_check.should_stop() {
                        return;
                    }
                    let _ = self.actor_client.election_timeout().await;
                    self.clock.sleep(self.timeout_backoff).await;
                }
            }

            // The handle has dropped, i.e. the replica changed role or term.
            if self.stop_check.should_stop() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::election::timers::test_utils::TestUtilActor;
    use crate::replica::election::timers::time;

    #[tokio::test]
    async fn election_timer_reset_and_timeout() {
        // -- setup --
        let timeout = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut mock_clock_controller) = time::mocked_clock();

        let (timer_task, timer_handle) = ElectionTimerTask::new(timeout, strong_actor_client.weak(), mock_clock);
        tokio::task::spawn(timer_task.run());

        // -- execute & verify --
        actor.assert_no_event().await;

        // Keep resetting, T=2.5
        for _ in 0..5 {
            mock_clock_controller.advance(timeout / 2);
            timer_handle.reset(timeout);
        }
        actor.assert_no_event().await;
        assert_eq!(mock_clock_controller.elapsed_time(), timeout * 5 / 2);

        let one_ns = Duration::from_nanos(1);
        mock_clock_controller.advance(timeout - one_ns);
        actor.assert_no_event().await;

        mock_clock_controller.advance(one_ns);
        actor.assert_election_timeout_event().await;
    }

    #[tokio::test]
    async fn election_timer_reset_uses_new_duration() {
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut mock_clock_controller) = time::mocked_clock();

        let (timer_task, timer_handle) =
            ElectionTimerTask::new(Duration::from_millis(100), strong_actor_client.weak(), mock_clock);
        tokio::task::spawn(timer_task.run());

        timer_handle.reset(Duration::from_millis(300));
        mock_clock_controller.advance(Duration::from_millis(200));
        actor.assert_no_event().await;

        mock_clock_controller.advance(Duration::from_millis(100));
        actor.assert_election_timeout_event().await;
    }

    #[tokio::test]
    async fn election_timer_drop() {
        let timeout = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut mock_clock_controller) = time::mocked_clock();

        let (timer_task, timer_handle) = ElectionTimerTask::new(timeout, strong_actor_client.weak(), mock_clock);
        let task_join_handle = tokio::task::spawn(timer_task.run());
        drop(timer_handle);

        mock_clock_controller.advance(timeout * 2);
        task_join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn election_timer_reset_after_firing() {
        let timeout = Duration::from_millis(100);
        let (strong_actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (mock_clock, mut mock_clock_controller) = time::mocked_clock();

        let (timer_task, timer_handle) = ElectionTimerTask::new(timeout, strong_actor_client.weak(), mock_clock);
        tokio::task::spawn(timer_task.run());

        // A heartbeat can already be queued behind the timeout, so the actor may reset a timer
        // that has just fired.
        mock_clock_controller.advance(timeout);
        actor.assert_election_timeout_event().await;
        timer_handle.reset(timeout);

        for _ in 0..5 {
            mock_clock_controller.advance(timeout / 2);
            timer_handle.reset(timeout);
        }
        actor.assert_no_event().await;
    }
}
