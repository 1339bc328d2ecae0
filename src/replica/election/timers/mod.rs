//! Timers post events to the replica's actor queue. Each timer is owned by a handle; dropping the
//! handle stops the background task, so a timer never outlives the role (and term) it was
//! created for.

mod election_timer;
mod heartbeat_timer;
mod stop_signal;
mod time;
mod wake_time;

#[cfg(test)]
mod test_utils;

use crate::actor::WeakActorClient;
use crate::replica::Term;
use election_timer::ElectionTimerHandle;
use heartbeat_timer::HeartbeatTimerHandle;
use std::time::Duration;

/// A running election timeout. Fires `ElectionTimeout` unless reset in time.
pub(crate) trait ElectionTimer: Send {
    fn reset(&self, timeout: Duration);
}

/// A running heartbeat ticker for a single leadership term.
pub(crate) trait HeartbeatTimer: Send {
    /// Push the next tick one heartbeat duration into the future.
    fn reset(&self);
}

/// Factory for the replica's timers. The replica owns the returned handles.
pub(crate) trait ReplicaTimers: Send {
    fn election_timer(&self, timeout: Duration) -> Box<dyn ElectionTimer>;
    fn heartbeat_timer(&self, term: Term) -> Box<dyn HeartbeatTimer>;
}

/// Timers backed by tokio tasks that notify the replica's actor.
pub(crate) struct ActorTimers {
    actor_client: WeakActorClient,
    heartbeat_duration: Duration,
}

impl ActorTimers {
    pub(crate) fn new(actor_client: WeakActorClient, heartbeat_duration: Duration) -> Self {
        ActorTimers {
            actor_client,
            heartbeat_duration,
        }
    }
}

impl ReplicaTimers for ActorTimers {
    fn election_timer(&self, timeout: Duration) -> Box<dyn ElectionTimer> {
        Box::new(ElectionTimerHandle::spawn_timer_task(timeout, self.actor_client.clone()))
    }

    fn heartbeat_timer(&self, term: Term) -> Box<dyn HeartbeatTimer> {
        Box::new(HeartbeatTimerHandle::spawn_timer_task(
            self.heartbeat_duration,
            self.actor_client.clone(),
            term,
        ))
    }
}
