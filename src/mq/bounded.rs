//! In-process bounded miss channel backed by a crossbeam queue

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use super::MissChannel;
use crate::error::{Error, Result};

/// Bounded queue handing miss reports to a populator in the same process
#[derive(Debug, Clone)]
pub struct BoundedMissChannel {
    tx: Sender<Vec<u8>>,
}

impl BoundedMissChannel {
    /// Create a channel holding at most `capacity` pending reports.
    ///
    /// The receiver goes to the populator.
    pub fn new(capacity: usize) -> (Self, Receiver<Vec<u8>>) {
        let (tx, rx) = channel::bounded(capacity);
        (Self { tx }, rx)
    }

    /// Reports waiting to be consumed
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

impl MissChannel for BoundedMissChannel {
    fn send(&self, payload: &[u8]) -> Result<()> {
        self.tx.try_send(payload.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => Error::ChannelFull,
            TrySendError::Disconnected(_) => Error::ChannelClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ColumnletKey;

    #[test]
    fn test_send_and_receive() {
        let (ch, rx) = BoundedMissChannel::new(4);
        let key = ColumnletKey::new(9, 8, 7);
        ch.report(&key).unwrap();
        assert_eq!(ch.pending(), 1);
        assert_eq!(rx.try_recv().unwrap(), key.to_bytes().to_vec());
    }

    #[test]
    fn test_full_channel_does_not_block() {
        let (ch, _rx) = BoundedMissChannel::new(1);
        ch.send(b"a").unwrap();
        assert!(matches!(ch.send(b"b"), Err(Error::ChannelFull)));
    }

    #[test]
    fn test_closed_channel() {
        let (ch, rx) = BoundedMissChannel::new(1);
        drop(rx);
        assert!(matches!(ch.send(b"a"), Err(Error::ChannelClosed)));
    }
}
