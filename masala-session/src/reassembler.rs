//! Pairs the two inventory notification streams into complete readings.
//!
//! The appliance reports its inventory as interleaved notifications on
//! two characteristics: first the container index, then the fill
//! amount. The streams carry no sequence numbers, so pairing relies on
//! a single pending slot. A new index overwrites an unconsumed one
//! (the appliance never re-sends the lost amount, so the overwritten
//! reading is gone), and an amount with no pending index is dropped.

use std::io;
use std::time::{Duration, Instant};

use masala_proto::SlotReading;
use tracing::debug;

struct PendingSlot {
    slot: u8,
    at: Instant,
}

pub struct Reassembler {
    expected: usize,
    pending_timeout: Duration,
    pending: Option<PendingSlot>,
    received: usize,
}

impl Reassembler {
    pub fn new(expected: usize, pending_timeout: Duration) -> Self {
        Self {
            expected,
            pending_timeout,
            pending: None,
            received: 0,
        }
    }

    /// Feed a container-index notification. A malformed payload is an
    /// error and leaves the pending state untouched.
    pub fn on_slot_index(&mut self, data: &[u8]) -> io::Result<()> {
        let slot = masala_proto::decode_slot_index(data)?;
        if let Some(prev) = self.pending.replace(PendingSlot {
            slot,
            at: Instant::now(),
        }) {
            // lossy merge: the previous index never got its amount
            debug!(discarded = prev.slot, replaced_by = slot, "unpaired slot index overwritten");
        }
        Ok(())
    }

    /// Feed a fill-amount notification. Returns the completed reading
    /// when a fresh pending slot exists; an amount arriving with no
    /// pending slot, or a stale one, is dropped.
    pub fn on_amount(&mut self, data: &[u8]) -> io::Result<Option<SlotReading>> {
        let amount = masala_proto::decode_amount(data)?;
        let Some(pending) = self.pending.take() else {
            debug!(amount = %amount, "amount with no pending slot, dropping");
            return Ok(None);
        };
        if pending.at.elapsed() > self.pending_timeout {
            debug!(slot = pending.slot, "pending slot went stale, dropping amount");
            return Ok(None);
        }
        self.received += 1;
        Ok(Some(SlotReading {
            slot: pending.slot,
            amount,
        }))
    }

    /// Whether a full readout has been received.
    pub fn is_complete(&self) -> bool {
        self.received >= self.expected
    }

    pub fn received(&self) -> usize {
        self.received
    }

    /// Forget partial state. Called on disconnect; no reading is ever
    /// synthesized from a half-received pair.
    pub fn reset(&mut self) {
        self.pending = None;
        self.received = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassembler() -> Reassembler {
        Reassembler::new(10, Duration::from_secs(2))
    }

    fn amount_bytes(amount: f32) -> [u8; 4] {
        amount.to_le_bytes()
    }

    #[test]
    fn index_then_amount_emits_reading() {
        let mut r = reassembler();
        r.on_slot_index(&[4]).unwrap();
        let reading = r.on_amount(&amount_bytes(1.5)).unwrap().unwrap();
        assert_eq!(reading, SlotReading { slot: 4, amount: 1.5 });
        assert_eq!(r.received(), 1);
    }

    #[test]
    fn second_index_overwrites_unpaired_first() {
        let mut r = reassembler();
        r.on_slot_index(&[3]).unwrap();
        r.on_slot_index(&[7]).unwrap();
        let reading = r.on_amount(&amount_bytes(2.5)).unwrap().unwrap();
        assert_eq!(reading, SlotReading { slot: 7, amount: 2.5 });

        // slot 3 never completes: the next amount has no pending index
        assert_eq!(r.on_amount(&amount_bytes(9.0)).unwrap(), None);
        assert_eq!(r.received(), 1);
    }

    #[test]
    fn amount_without_index_is_dropped() {
        let mut r = reassembler();
        assert_eq!(r.on_amount(&amount_bytes(0.5)).unwrap(), None);
        assert_eq!(r.received(), 0);
    }

    #[test]
    fn complete_after_expected_readings() {
        let mut r = reassembler();
        for slot in 1..=10u8 {
            r.on_slot_index(&[slot]).unwrap();
            let reading = r.on_amount(&amount_bytes(f32::from(slot))).unwrap().unwrap();
            assert_eq!(reading.slot, slot);
            assert_eq!(r.is_complete(), slot == 10);
        }
        assert_eq!(r.received(), 10);
    }

    #[test]
    fn stale_pending_slot_drops_amount() {
        let mut r = Reassembler::new(10, Duration::ZERO);
        r.on_slot_index(&[2]).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(r.on_amount(&amount_bytes(1.0)).unwrap(), None);
        assert_eq!(r.received(), 0);
    }

    #[test]
    fn malformed_payloads_leave_state_untouched() {
        let mut r = reassembler();
        r.on_slot_index(&[5]).unwrap();

        assert!(r.on_slot_index(&[]).is_err());
        assert!(r.on_amount(&[1, 2]).is_err());

        // the pending slot from before is still there
        let reading = r.on_amount(&amount_bytes(3.25)).unwrap().unwrap();
        assert_eq!(reading, SlotReading { slot: 5, amount: 3.25 });
    }

    #[test]
    fn reset_clears_pending_and_count() {
        let mut r = reassembler();
        r.on_slot_index(&[1]).unwrap();
        r.on_amount(&amount_bytes(1.0)).unwrap();
        r.on_slot_index(&[2]).unwrap();

        r.reset();
        assert_eq!(r.received(), 0);
        assert_eq!(r.on_amount(&amount_bytes(2.0)).unwrap(), None);
    }
}
