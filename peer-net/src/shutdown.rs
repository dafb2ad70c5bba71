//! Process-wide shutdown signal shared between the session controller and
//! its background tasks. A `watch` channel keeps every receiver cheap to
//! clone into spawned tasks.

use tokio::sync::watch;

pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

pub fn channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

pub fn trigger(sender: &ShutdownSender) {
    let _ = sender.send(true);
}

pub fn is_triggered(receiver: &ShutdownReceiver) -> bool {
    *receiver.borrow()
}

/// Resolves once the signal has been triggered. Also resolves if every
/// sender is gone, so tasks never outlive the controller that spawned them.
pub async fn wait(mut receiver: ShutdownReceiver) {
    if *receiver.borrow() {
        return;
    }

    while receiver.changed().await.is_ok() {
        if *receiver.borrow() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_resolves_after_trigger() {
        let (tx, rx) = channel();
        assert!(!is_triggered(&rx));

        let waiter = tokio::spawn(wait(rx.clone()));
        trigger(&tx);

        waiter.await.expect("waiter task");
        assert!(is_triggered(&rx));
    }

    #[tokio::test]
    async fn wait_resolves_when_sender_dropped() {
        let (tx, rx) = channel();
        drop(tx);
        wait(rx).await;
    }
}
