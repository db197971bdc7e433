//! Single-slot rendezvous hand-off between the reconciliation loop and the
//! announcer.
//!
//! `publish` returns only after the subscriber has taken the item, so the
//! producer is suspended for as long as the consumer is busy. Dropping either
//! end closes the channel for the other.

use tokio::sync::{mpsc, oneshot};

/// The other end of the hand-off is gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Closed;

impl std::fmt::Display for Closed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("hand-off channel closed")
    }
}

impl std::error::Error for Closed {}

struct Envelope<T> {
    item: T,
    ack: oneshot::Sender<()>,
}

pub struct Publisher<T> {
    tx: mpsc::Sender<Envelope<T>>,
}

pub struct Subscriber<T> {
    rx: mpsc::Receiver<Envelope<T>>,
}

pub fn rendezvous<T: Send>() -> (Publisher<T>, Subscriber<T>) {
    let (tx, rx) = mpsc::channel(1);
    (Publisher { tx }, Subscriber { rx })
}

impl<T: Send> Publisher<T> {
    /// Hand `item` over and wait until the subscriber has received it.
    pub async fn publish(&self, item: T) -> Result<(), Closed> {
        let (ack, acked) = oneshot::channel();
        self.tx
            .send(Envelope { item, ack })
            .await
            .map_err(|_| Closed)?;
        acked.await.map_err(|_| Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T: Send> Subscriber<T> {
    /// Next item, or `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<T> {
        let env = self.rx.recv().await?;
        let _ = env.ack.send(());
        Some(env.item)
    }

    /// Refuse further items. A publisher blocked in `publish` sees `Closed`.
    pub fn close(&mut self) {
        self.rx.close();
        // Anything already queued is dropped unacknowledged.
        while self.rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn publish_waits_for_receiver() {
        let (tx, mut rx) = rendezvous::<u32>();
        let sender = tokio::spawn(async move { tx.publish(7).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!sender.is_finished(), "publish returned before hand-off");

        assert_eq!(rx.recv().await, Some(7));
        assert_eq!(sender.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn order_is_preserved() {
        let (tx, mut rx) = rendezvous::<u32>();
        let sender = tokio::spawn(async move {
            for i in 0..5 {
                tx.publish(i).await.unwrap();
            }
        });
        let mut got = Vec::new();
        while let Some(v) = rx.recv().await {
            got.push(v);
        }
        sender.await.unwrap();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn dropped_subscriber_closes_publisher() {
        let (tx, rx) = rendezvous::<u32>();
        drop(rx);
        assert_eq!(tx.publish(1).await, Err(Closed));
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn close_releases_blocked_publisher() {
        let (tx, mut rx) = rendezvous::<u32>();
        let sender = tokio::spawn(async move { tx.publish(1).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        rx.close();
        assert_eq!(sender.await.unwrap(), Err(Closed));
    }
}
