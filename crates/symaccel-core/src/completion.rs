//! Completion delivery for asynchronous sessions.

use crate::engine::OperationResult;
use crate::packet::Packet;
use crate::pool::SessionHandle;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// Completed operation pushed to a completion sink.
#[derive(Debug)]
pub struct CompletionEvent {
    /// Session the operation ran on
    pub session: SessionHandle,
    /// Output packet; its stored result matches `result`
    pub packet: Packet,
    /// Classified outcome
    pub result: OperationResult,
}

/// Destination of asynchronous results.
pub trait CompletionSink: Send + Sync {
    /// Deliver one event. On failure the event is handed back.
    fn enqueue(&self, event: CompletionEvent) -> Result<(), CompletionEvent>;
}

/// Bounded channel sink.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<CompletionEvent>,
}

impl ChannelSink {
    /// Create a sink holding at most `capacity` undelivered events, plus the
    /// receiving end.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<CompletionEvent>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl CompletionSink for ChannelSink {
    fn enqueue(&self, event: CompletionEvent) -> Result<(), CompletionEvent> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(ev) | TrySendError::Disconnected(ev) => ev,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::SessionPool;

    fn event(session: SessionHandle) -> CompletionEvent {
        CompletionEvent {
            session,
            packet: Packet::new(4),
            result: OperationResult::success(),
        }
    }

    #[test]
    fn test_channel_sink_full_hands_back_event() {
        let pool: SessionPool<()> = SessionPool::new(1);
        let handle = pool.reserve().unwrap().commit(());
        let (sink, rx) = ChannelSink::bounded(1);
        sink.enqueue(event(handle)).unwrap();
        let back = sink.enqueue(event(handle)).unwrap_err();
        assert_eq!(back.session, handle);
        assert_eq!(rx.try_recv().unwrap().packet.len(), 4);
    }

    #[test]
    fn test_channel_sink_disconnected() {
        let pool: SessionPool<()> = SessionPool::new(1);
        let handle = pool.reserve().unwrap().commit(());
        let (sink, rx) = ChannelSink::bounded(4);
        drop(rx);
        assert!(sink.enqueue(event(handle)).is_err());
    }
}
