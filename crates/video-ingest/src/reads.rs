//! Bookkeeping for reads that come back without a frame.

use std::time::Duration;

use crate::types::CaptureError;

/// Consecutive empty reads tolerated before the stream counts as ended.
pub(crate) const MAX_EMPTY_READS: u32 = 50;
/// Pause between empty reads.
pub(crate) const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(20);

/// Counts consecutive empty reads from a capture device.
///
/// A file at EOF or a dropped network stream keeps returning nothing; after
/// `limit` misses in a row the reader gives up with `CaptureError::Closed`.
pub(crate) struct EmptyReads {
    count: u32,
    limit: u32,
}

impl EmptyReads {
    pub(crate) fn new(limit: u32) -> Self {
        Self {
            count: 0,
            limit: limit.max(1),
        }
    }

    /// Record a miss. Returns how long to wait, or the terminal error.
    pub(crate) fn miss(&mut self) -> Result<Duration, CaptureError> {
        self.count += 1;
        if self.count >= self.limit {
            return Err(CaptureError::Closed(format!(
                "end of stream after {} empty reads",
                self.count
            )));
        }
        Ok(EMPTY_READ_BACKOFF)
    }

    pub(crate) fn hit(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backs_off_until_limit_then_closes() {
        let mut reads = EmptyReads::new(3);
        assert_eq!(reads.miss().unwrap(), EMPTY_READ_BACKOFF);
        assert_eq!(reads.miss().unwrap(), EMPTY_READ_BACKOFF);
        let err = reads.miss().unwrap_err();
        assert!(matches!(err, CaptureError::Closed(ref msg) if msg.contains("3 empty reads")));
    }

    #[test]
    fn a_good_read_resets_the_count() {
        let mut reads = EmptyReads::new(2);
        assert!(reads.miss().is_ok());
        reads.hit();
        assert!(reads.miss().is_ok());
        assert!(reads.miss().is_err());
    }
}
