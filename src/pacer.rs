use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use bytes::Bytes;

use crate::{message, ReplyError, Statistics};

/// The client's lockstep sender: at most one message is ever awaiting its reply.
///
/// The pacer performs no I/O. The caller sends whatever [`Pacer::next_message`] returns, and feeds each reply
/// datagram into [`Pacer::on_reply`] along with the time it arrived.
#[derive(Debug)]
pub struct Pacer {
    target: u64,
    next_seq: u64,

    // Sequence number to send time, never more than one entry.
    pending: HashMap<u64, Instant>,

    stats: Statistics,
}

impl Pacer {
    pub fn new(target: u64, stats: Statistics) -> Self {
        Self {
            target,
            next_seq: 0,
            pending: HashMap::with_capacity(1),
            stats,
        }
    }

    /// Returns the next payload to send, or `None` if a reply is still outstanding or every message was sent.
    pub fn next_message(&mut self, now: Instant) -> Option<Bytes> {
        if !self.pending.is_empty() || self.next_seq >= self.target {
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        self.pending.insert(seq, now);
        self.stats.record_message();

        Some(message::encode(seq))
    }

    /// Match a reply against the outstanding message, returning the measured round trip.
    ///
    /// Malformed and stale replies leave everything untouched, including the outstanding message.
    pub fn on_reply(&mut self, payload: &[u8], now: Instant) -> Result<Duration, ReplyError> {
        let seq = message::decode_seq(payload)?;
        let sent = self.pending.remove(&seq).ok_or(ReplyError::Stale(seq))?;

        let rtt = now.saturating_duration_since(sent);
        self.stats.record_rtt(rtt.as_secs_f64() * 1000.0);

        Ok(rtt)
    }

    /// The sequence number awaiting a reply, if any.
    pub fn outstanding(&self) -> Option<u64> {
        self.pending.keys().next().copied()
    }

    pub fn is_done(&self) -> bool {
        self.next_seq >= self.target && self.pending.is_empty()
    }

    /// Give up on the outstanding message, as happens when the session ends.
    pub fn abort(&mut self) {
        if let Some(seq) = self.outstanding() {
            log::debug!("abandoning message {}", seq);
        }

        self.pending.clear();
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn into_stats(self) -> Statistics {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacer(target: u64) -> Pacer {
        Pacer::new(target, Statistics::new(0.1).unwrap())
    }

    #[test]
    fn lockstep() {
        let start = Instant::now();
        let mut pacer = pacer(3);

        for seq in 0..3u64 {
            let sent = start + Duration::from_millis(seq * 10);
            let payload = pacer.next_message(sent).unwrap();
            assert_eq!(payload, message::encode(seq));
            assert_eq!(pacer.outstanding(), Some(seq));

            // Nothing more until the reply arrives.
            assert_eq!(pacer.next_message(sent), None);
            assert!(pacer.pending.len() <= 1);

            let rtt = pacer.on_reply(&message::reply(&payload), sent + Duration::from_millis(4)).unwrap();
            assert_eq!(rtt, Duration::from_millis(4));
            assert_eq!(pacer.outstanding(), None);
        }

        assert!(pacer.is_done());
        assert_eq!(pacer.next_message(start), None);
        assert_eq!(pacer.stats().messages(), 3);
        assert_eq!(pacer.stats().samples(), &[4.0, 4.0, 4.0]);
    }

    #[test]
    fn stale_reply() {
        let now = Instant::now();
        let mut pacer = pacer(10);

        pacer.next_message(now).unwrap();
        assert_eq!(pacer.on_reply(b"Received Message 7", now), Err(ReplyError::Stale(7)));

        // Still waiting on message 0, statistics untouched.
        assert_eq!(pacer.outstanding(), Some(0));
        assert_eq!(pacer.next_message(now), None);
        assert!(pacer.stats().samples().is_empty());
        assert_eq!(pacer.stats().ewma(), None);

        assert!(pacer.on_reply(b"Received Message 0", now).is_ok());
        assert_eq!(pacer.on_reply(b"Received Message 0", now), Err(ReplyError::Stale(0)));
        assert_eq!(pacer.stats().samples().len(), 1);
    }

    #[test]
    fn malformed_reply() {
        let now = Instant::now();
        let mut pacer = pacer(1);

        pacer.next_message(now).unwrap();
        assert_eq!(pacer.on_reply(b"garbage", now), Err(ReplyError::Malformed));
        assert_eq!(pacer.outstanding(), Some(0));
    }

    #[test]
    fn rtt_never_negative() {
        let now = Instant::now();
        let mut pacer = pacer(1);

        pacer.next_message(now + Duration::from_millis(5)).unwrap();
        assert_eq!(pacer.on_reply(b"Received Message 0", now), Ok(Duration::ZERO));
        assert_eq!(pacer.stats().samples(), &[0.0]);
    }

    #[test]
    fn zero_messages() {
        let mut pacer = pacer(0);
        assert!(pacer.is_done());
        assert_eq!(pacer.next_message(Instant::now()), None);
    }

    #[test]
    fn abort() {
        let now = Instant::now();
        let mut pacer = pacer(5);

        pacer.next_message(now).unwrap();
        pacer.abort();

        assert_eq!(pacer.outstanding(), None);
        assert_eq!(pacer.stats().messages(), 1);
        assert!(!pacer.is_done());
    }
}
