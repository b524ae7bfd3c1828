use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

use crate::types::Frame;

/// Single-entry mailbox holding the newest frame of one stream.
///
/// Publishing replaces whatever the consumer has not picked up yet, so a slow
/// consumer always sees the most recent frame and never a backlog.
pub(crate) struct LatestFrame {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
}

impl LatestFrame {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    pub(crate) fn publish(&self, frame: Frame) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                let _ = self.rx.try_recv();
                let _ = self.tx.try_send(frame);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub(crate) fn take(&self) -> Option<Frame> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub(crate) fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}
