use chrono::Utc;
use tokio::sync::watch;

use crate::types::MonitorSnapshot;

/// Snapshot sender, owned by the session task (the only writer).
pub type SnapshotSender = watch::Sender<MonitorSnapshot>;
/// Snapshot receiver, cloned freely by presenters.
pub type SnapshotReceiver = watch::Receiver<MonitorSnapshot>;

/// Create a snapshot channel holding an idle snapshot.
pub fn channel() -> (SnapshotSender, SnapshotReceiver) {
    watch::channel(MonitorSnapshot::default())
}

/// Apply `update` and stamp `updated_at`. Receivers see the whole change or none of it.
pub fn publish(tx: &SnapshotSender, update: impl FnOnce(&mut MonitorSnapshot)) {
    tx.send_modify(|snap| {
        update(snap);
        snap.updated_at = Utc::now();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionState;

    #[test]
    fn starts_idle() {
        let (_tx, rx) = channel();
        assert_eq!(rx.borrow().state, SessionState::Idle);
        assert_eq!(rx.borrow().tick_count, 0);
    }

    #[tokio::test]
    async fn publish_notifies_and_stamps() {
        let (tx, mut rx) = channel();
        let before = rx.borrow().updated_at;
        publish(&tx, |s| {
            s.tick_count = 3;
            s.state = SessionState::Running;
        });
        rx.changed().await.unwrap();
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.tick_count, 3);
        assert_eq!(snap.state, SessionState::Running);
        assert!(snap.updated_at >= before);
    }

    #[test]
    fn publish_without_receivers_is_kept() {
        let (tx, rx) = channel();
        drop(rx);
        publish(&tx, |s| s.tick_count = 1);
        assert_eq!(tx.borrow().tick_count, 1);
    }
}
