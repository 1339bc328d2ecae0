use crate::replica::LeaderRedirectInfo;
use tokio::sync::watch;

/// The local replica's role, as seen from outside the actor.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ElectionStateSnapshot {
    Leader,
    Candidate,
    Follower(LeaderRedirectInfo),
    FollowerNoLeader,
}

pub(super) fn new(initial_state: ElectionStateSnapshot) -> (ElectionStateChangeNotifier, ElectionStateChangeListener) {
    let (sender, receiver) = watch::channel(initial_state);

    (
        ElectionStateChangeNotifier { sender },
        ElectionStateChangeListener { receiver },
    )
}

/// Owned by `ElectionState`; every role transition goes through here.
pub(super) struct ElectionStateChangeNotifier {
    sender: watch::Sender<ElectionStateSnapshot>,
}

impl ElectionStateChangeNotifier {
    pub(super) fn notify_new_state(&self, new_state: ElectionStateSnapshot) {
        // Nobody listening is fine.
        let _ = self.sender.send(new_state);
    }
}

/// Watches the role of one replica. A slow reader only sees the latest role; transitions that
/// happen between two `next()` calls are collapsed.
#[derive(Clone)]
pub(crate) struct ElectionStateChangeListener {
    receiver: watch::Receiver<ElectionStateSnapshot>,
}

impl ElectionStateChangeListener {
    /// None once the replica (and with it the notifier) is gone.
    pub(crate) async fn next(&mut self) -> Option<ElectionStateSnapshot> {
        self.receiver.changed().await.ok()?;
        Some(self.current())
    }

    pub(crate) fn current(&self) -> ElectionStateSnapshot {
        self.receiver.borrow().clone()
    }
}
