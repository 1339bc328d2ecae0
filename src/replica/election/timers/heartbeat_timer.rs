use crate::replica::election::timers::wake_time::SharedWakeTime;
use crate::replica::election::timers::time::{Clock, RealClock};
use crate::replica::election::timers::HeartbeatTimer;
use crate::replica::{HeartbeatTick, Term};
use crate::actor;
use std::sync::{Arc, Weak};
use tokio::time::Duration;

pub(crate) struct HeartbeatTimerHandle<C: Clock = RealClock> {
    shared: Arc<Shared<C>>,
}

struct Shared<C: Clock> {
    heartbeat_duration: Duration,
    next_heartbeat_time: SharedWakeTime,
    clock: C,
}

struct HeartbeatTimerTask<C: Clock> {
    weak_shared: Weak<Shared<C>>,
    next_heartbeat_time: SharedWakeTime,
    actor_client: actor::WeakActorClient,
    event: HeartbeatTick,
    clock: C,
}

impl HeartbeatTimerHandle {
    pub(crate) fn spawn_timer_task(
        heartbeat_duration: Duration,
        actor_client: actor::WeakActorClient,
        term: Term,
    ) -> Self {
        let (task, handle) = HeartbeatTimerTask::new(heartbeat_duration, actor_client, term, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock + Send + Sync + 'static> HeartbeatTimer for HeartbeatTimerHandle<C> {
    fn reset(&self) {
        self.shared.reset_heartbeat_timer();
    }
}

impl<C: Clock> Shared<C> {
    fn reset_heartbeat_timer(&self) {
        let new_timeout = self.clock.now() + self.heartbeat_duration;
        self.next_heartbeat_time.set(new_timeout);
    }
}

impl<C: Clock> HeartbeatTimerTask<C> {
    fn new(
        heartbeat_duration: Duration,
        actor_client: actor::WeakActorClient,
        term: Term,
        clock: C,
    ) -> (Self, HeartbeatTimerHandle<C>) {
        let wake_time = SharedWakeTime::default();
        let shared = Arc::new(Shared {
            heartbeat_duration,
            next_heartbeat_time: wake_time.clone(),
            clock: clock.clone(),
        });
        // The new leader broadcasts on its own right after election, so the first tick is one
        // full heartbeat duration away.
        shared.reset_heartbeat_timer();

        let task = HeartbeatTimerTask {
            weak_shared: Arc::downgrade(&shared),
            next_heartbeat_time: wake_time,
            actor_client,
            event: HeartbeatTick { term },
            clock,
        };
        let handle = HeartbeatTimerHandle { shared };

        (task, handle)
    }

    async fn run(mut self) {
        loop {
            match self.next_heartbeat_time.take() {
                Some(wake_time) => {
                    self.clock.sleep_until(wake_time).await;
                }
                None => {
                    // Nobody pushed the deadline while we slept, so it's time to heartbeat.
                    if let Some(shared) = self.weak_shared.upgrade() {
                        let _ = self.actor_client.heartbeat_tick(self.event).await;
                        shared.reset_heartbeat_timer();
                    } else {
                        // Handle dropped: no longer leader for this term.
                        return;
                    }
                }
            }
        }
    }
}
