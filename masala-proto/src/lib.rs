//! Masala wire protocol - dispense payload encoding and chunking
//!
//! The dispenser speaks a small text protocol over GATT: a dispense job
//! is a list of `<slot>:<amount>` records joined by `;`, written to the
//! device in chunks of at most [`MAX_CHUNK_SIZE`] bytes. In the other
//! direction the device notifies the container index and the fill
//! amount on two separate characteristics; the decoders for those raw
//! fields live here too.

use std::io;

pub mod ble;

/// Separator between records in a dispense payload
pub const RECORD_SEPARATOR: char = ';';

/// Separator between the slot and amount fields of one record
pub const FIELD_SEPARATOR: char = ':';

/// Largest write the dispenser accepts in a single GATT write
pub const MAX_CHUNK_SIZE: usize = 20;

/// Number of physical containers on the rack
pub const CONTAINER_COUNT: usize = 10;

/// One dispensing step: release `amount` units from container `slot`.
///
/// Construction validates the fields, so a payload built from
/// instructions can never contain a separator character inside a
/// record: slots and amounts are numeric by construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispenseInstruction {
    slot: u8,
    amount: f32,
}

impl DispenseInstruction {
    /// Create an instruction. Slots are numbered from 1; the amount
    /// must be a finite, non-negative quantity.
    pub fn new(slot: u8, amount: f32) -> io::Result<Self> {
        if slot == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "slot numbers start at 1",
            ));
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("amount must be a finite non-negative number, got {amount}"),
            ));
        }
        Ok(Self { slot, amount })
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }
}

/// One decoded inventory record: container `slot` currently holds
/// `amount` units. Emitted once both notification fields have arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotReading {
    pub slot: u8,
    pub amount: f32,
}

/// Encode a dispense job as the delimited ASCII payload the appliance
/// parses, e.g. `1:2.5;4:0.25`.
pub fn encode_payload(instructions: &[DispenseInstruction]) -> Vec<u8> {
    let mut buf = String::new();
    for (i, inst) in instructions.iter().enumerate() {
        if i > 0 {
            buf.push(RECORD_SEPARATOR);
        }
        buf.push_str(&inst.slot.to_string());
        buf.push(FIELD_SEPARATOR);
        buf.push_str(&inst.amount.to_string());
    }
    buf.into_bytes()
}

/// Parse a dispense payload back into instructions. This is the
/// receiving side of [`encode_payload`]; the appliance firmware
/// implements the same split.
pub fn parse_payload(data: &[u8]) -> io::Result<Vec<DispenseInstruction>> {
    let text = std::str::from_utf8(data)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload is not ASCII text"))?;

    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for record in text.split(RECORD_SEPARATOR) {
        let (slot, amount) = record.split_once(FIELD_SEPARATOR).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record without field separator: {record:?}"),
            )
        })?;
        let slot: u8 = slot.parse().map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, format!("bad slot: {slot:?}"))
        })?;
        let amount: f32 = amount.parse().map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, format!("bad amount: {amount:?}"))
        })?;
        out.push(DispenseInstruction::new(slot, amount).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, e.to_string())
        })?);
    }
    Ok(out)
}

/// Decode the container index field: a single unsigned byte, 1-based.
pub fn decode_slot_index(data: &[u8]) -> io::Result<u8> {
    match data.first() {
        Some(0) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "slot index 0 is not a container",
        )),
        Some(&slot) => Ok(slot),
        None => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "empty slot index payload",
        )),
    }
}

/// Decode the fill amount field: a 4-byte little-endian float.
pub fn decode_amount(data: &[u8]) -> io::Result<f32> {
    let bytes: [u8; 4] = data.try_into().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("amount payload must be 4 bytes, got {}", data.len()),
        )
    })?;
    Ok(f32::from_le_bytes(bytes))
}

/// Split a payload into chunks for [`chunks_of`] with the default
/// [`MAX_CHUNK_SIZE`].
pub fn chunks(data: &[u8]) -> Chunks<'_> {
    chunks_of(data, MAX_CHUNK_SIZE)
}

/// Split a payload into contiguous chunks of at most `size` bytes.
/// The final chunk may be shorter. The iterator borrows the payload
/// and can be cloned to restart fragmentation from the beginning.
pub fn chunks_of(data: &[u8], size: usize) -> Chunks<'_> {
    assert!(size > 0, "chunk size must be at least 1");
    Chunks { rest: data, size }
}

/// Lazy chunk iterator produced by [`chunks`] / [`chunks_of`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    rest: &'a [u8],
    size: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        let split = self.size.min(self.rest.len());
        let (chunk, rest) = self.rest.split_at(split);
        self.rest = rest;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(slot: u8, amount: f32) -> DispenseInstruction {
        DispenseInstruction::new(slot, amount).unwrap()
    }

    #[test]
    fn encode_single_record() {
        assert_eq!(encode_payload(&[inst(1, 2.5)]), b"1:2.5");
    }

    #[test]
    fn encode_joins_with_separator() {
        let payload = encode_payload(&[inst(1, 2.5), inst(4, 0.25), inst(10, 3.0)]);
        assert_eq!(payload, b"1:2.5;4:0.25;10:3");
    }

    #[test]
    fn encode_empty_job() {
        assert_eq!(encode_payload(&[]), b"");
        assert_eq!(parse_payload(b"").unwrap(), Vec::new());
    }

    #[test]
    fn round_trip_preserves_order_and_values() {
        // Slots across the whole addressable range, amounts with up to
        // two decimal digits, as the recipe UI produces them.
        let job: Vec<DispenseInstruction> = (1..=99)
            .map(|slot| inst(slot, f32::from(slot) * 0.25))
            .collect();

        let payload = encode_payload(&job);
        let reassembled: Vec<u8> = chunks(&payload).flatten().copied().collect();
        assert_eq!(reassembled, payload);
        assert_eq!(parse_payload(&reassembled).unwrap(), job);
    }

    #[test]
    fn chunks_respect_bound_and_concatenate_exactly() {
        let payload = encode_payload(&[
            inst(1, 1.5),
            inst(2, 0.75),
            inst(3, 12.25),
            inst(4, 0.1),
        ]);
        assert!(payload.len() > MAX_CHUNK_SIZE);

        let parts: Vec<&[u8]> = chunks(&payload).collect();
        assert!(parts.len() > 1);
        for part in &parts {
            assert!(part.len() <= MAX_CHUNK_SIZE);
        }
        assert_eq!(parts.last().unwrap().len(), payload.len() % MAX_CHUNK_SIZE);
        assert_eq!(parts.concat(), payload);
    }

    #[test]
    fn chunking_is_restartable() {
        let payload = b"0123456789abcdefghijklmnop";
        let it = chunks_of(payload, 7);
        let first: Vec<&[u8]> = it.clone().collect();
        let second: Vec<&[u8]> = it.collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![&b"0123456"[..], b"789abcd", b"efghijk", b"lmnop"]);
    }

    #[test]
    fn chunking_empty_payload_yields_nothing() {
        assert_eq!(chunks(b"").count(), 0);
    }

    #[test]
    fn slot_index_decodes_first_byte() {
        assert_eq!(decode_slot_index(&[7]).unwrap(), 7);
        assert_eq!(decode_slot_index(&[3, 0xff]).unwrap(), 3);
        assert!(decode_slot_index(&[]).is_err());
        assert!(decode_slot_index(&[0]).is_err());
    }

    #[test]
    fn amount_decodes_little_endian_float() {
        assert_eq!(decode_amount(&2.5f32.to_le_bytes()).unwrap(), 2.5);
        assert!(decode_amount(&[0x00, 0x20]).is_err());
        assert!(decode_amount(&[0; 5]).is_err());
    }

    #[test]
    fn instruction_rejects_invalid_fields() {
        assert!(DispenseInstruction::new(0, 1.0).is_err());
        assert!(DispenseInstruction::new(1, f32::NAN).is_err());
        assert!(DispenseInstruction::new(1, f32::INFINITY).is_err());
        assert!(DispenseInstruction::new(1, -0.5).is_err());
        assert!(DispenseInstruction::new(1, 0.0).is_ok());
    }

    #[test]
    fn parse_rejects_malformed_records() {
        assert!(parse_payload(b"1-2.5").is_err());
        assert!(parse_payload(b"x:2.5").is_err());
        assert!(parse_payload(b"1:snap").is_err());
        assert!(parse_payload(b"0:1.0").is_err());
        assert!(parse_payload(&[0xff, 0xfe]).is_err());
    }
}
