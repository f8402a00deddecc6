//! Pull-based consumption of a subscription.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::{Result, RxError};
use crate::observable::Observer;
use crate::subscription::Subscription;

/// Events of one subscription as a [`futures::Stream`].
///
/// Element errors are yielded as `Err` items. The stream ends when the source
/// completes or the subscription is cancelled. Dropping it cancels the
/// subscription.
pub struct SubscriptionStream<T> {
    receiver: mpsc::UnboundedReceiver<Result<T>>,
    subscription: Option<Subscription>,
}

/// Observer that forwards into a [`SubscriptionStream`].
pub(crate) struct ChannelObserver<T> {
    sender: mpsc::UnboundedSender<Result<T>>,
}

impl<T: Send + 'static> Observer<T> for ChannelObserver<T> {
    fn on_next(&mut self, value: T) {
        let _ = self.sender.send(Ok(value));
    }

    fn on_error(&mut self, error: RxError) {
        let _ = self.sender.send(Err(error));
    }
}

impl<T> SubscriptionStream<T> {
    pub(crate) fn channel() -> (ChannelObserver<T>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stream = Self {
            receiver,
            subscription: None,
        };
        (ChannelObserver { sender }, stream)
    }

    pub(crate) fn attach(mut self, subscription: Subscription) -> Self {
        self.subscription = Some(subscription);
        self
    }

    /// The subscription behind this stream.
    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    /// Cancel the subscription; items already queued are still yielded.
    pub fn cancel(&self) {
        if let Some(subscription) = &self.subscription {
            subscription.cancel();
        }
    }
}

impl<T> Stream for SubscriptionStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl<T> Drop for SubscriptionStream<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
