//! Process-lifecycle event plumbing (SPEC_FULL §1.4), grounded in the
//! teacher's `event/channel.rs` `pub_sub` pattern. Used to carry the
//! shutdown signal from the Ctrl-C/SIGTERM handler into the binary's main
//! loop without a global.

use crossbeam::channel::{unbounded, Receiver, Sender};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPlaneEvent {
    Shutdown,
}

pub struct EventPublisher<E>(Sender<E>);

impl<E> Clone for EventPublisher<E> {
    fn clone(&self) -> Self {
        EventPublisher(self.0.clone())
    }
}

pub struct EventConsumer<E>(Receiver<E>);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventPublisherError {
    #[error("error while publishing event: {0}")]
    SendError(String),
}

pub fn pub_sub<E>() -> (EventPublisher<E>, EventConsumer<E>) {
    let (tx, rx) = unbounded();
    (EventPublisher(tx), EventConsumer(rx))
}

impl<E> EventPublisher<E> {
    pub fn publish(&self, event: E) -> Result<(), EventPublisherError> {
        self.0
            .send(event)
            .map_err(|err| EventPublisherError::SendError(err.to_string()))
    }
}

impl<E> EventConsumer<E> {
    pub fn recv(&self) -> Result<E, crossbeam::channel::RecvError> {
        self.0.recv()
    }
}

impl<E> AsRef<Receiver<E>> for EventConsumer<E> {
    fn as_ref(&self) -> &Receiver<E> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishing_reaches_the_consumer() {
        let (publisher, consumer) = pub_sub::<ControlPlaneEvent>();
        publisher.publish(ControlPlaneEvent::Shutdown).unwrap();
        assert_eq!(consumer.recv().unwrap(), ControlPlaneEvent::Shutdown);
    }
}
