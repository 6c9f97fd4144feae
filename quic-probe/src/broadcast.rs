// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Typed in-process pub/sub.
//!
//! Every topic is a thin wrapper over a `tokio` broadcast channel: any
//! number of subscribers, bounded queues per subscriber. A slow
//! subscriber on a noisy topic (packets, payloads) skips the overwritten
//! values and keeps going; key-availability and status topics are sized
//! so that overflow cannot happen before the subscriber drains them.

use tokio::sync::broadcast;

pub struct Topic<T> {
    name: &'static str,
    sender: broadcast::Sender<T>,
}

impl<T: Clone> Topic<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { name, sender }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn submit(&self, value: T) {
        if self.sender.send(value).is_err() {
            tracing::trace!(topic = self.name, "submitted with no subscribers");
        }
    }
}

/// Receives the next value, skipping over lagged gaps. Returns `None`
/// once the topic is gone.
pub async fn next<T: Clone>(
    receiver: &mut broadcast::Receiver<T>,
    topic: &'static str,
) -> Option<T> {
    loop {
        match receiver.recv().await {
            Ok(value) => return Some(value),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(topic, skipped, "subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn multiple_subscribers_see_every_value() {
        let topic = Topic::new("test", 16);
        let mut a = topic.subscribe();
        let mut b = topic.subscribe();

        topic.submit(1u32);
        topic.submit(2u32);

        assert_eq!(next(&mut a, "test").await, Some(1));
        assert_eq!(next(&mut a, "test").await, Some(2));
        assert_eq!(next(&mut b, "test").await, Some(1));
        assert_eq!(next(&mut b, "test").await, Some(2));
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_and_continues() {
        let topic = Topic::new("test", 2);
        let mut rx = topic.subscribe();

        for i in 0..5u32 {
            topic.submit(i);
        }

        // the two most recent values survive
        assert_eq!(next(&mut rx, "test").await, Some(3));
        assert_eq!(next(&mut rx, "test").await, Some(4));
    }
}
