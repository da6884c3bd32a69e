//! Credit-based mode frames
//!
//! An SDU sent over a credit-based channel starts with a First frame (K-frame) whose payload is
//! prefixed with the 16-bit declared total SDU length; the remainder of the SDU follows in plain
//! basic frames. Every frame, first or continuation, costs the sender one credit.

use super::basic_frame::BasicFrame;
use super::FrameParseError;
use crate::channel::id::Cid;

/// The number of payload bytes the SDU length field occupies in a First frame
pub const SDU_LENGTH_SIZE: usize = 2;

/// Segment an SDU into complete raw credit-based frames
///
/// Frames are split at `mps` payload bytes; the First frame's data portion is two bytes shorter
/// to make room for the declared SDU length.
pub fn segment(cid: Cid, sdu: Vec<u8>, mps: u16) -> CreditSegments {
    debug_assert!(usize::from(mps) > SDU_LENGTH_SIZE, "mps too small to segment");

    CreditSegments {
        cid,
        sdu,
        mps: mps.into(),
        offset: 0,
        first: true,
    }
}

/// Iterator of raw frames produced by [`segment`]
pub struct CreditSegments {
    cid: Cid,
    sdu: Vec<u8>,
    mps: usize,
    offset: usize,
    first: bool,
}

impl Iterator for CreditSegments {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.first {
            self.first = false;

            let amount = core::cmp::min(self.sdu.len(), self.mps - SDU_LENGTH_SIZE);

            let mut payload = Vec::with_capacity(SDU_LENGTH_SIZE + amount);

            payload.extend_from_slice(&(self.sdu.len() as u16).to_le_bytes());
            payload.extend_from_slice(&self.sdu[..amount]);

            self.offset = amount;

            Some(BasicFrame::new(payload, self.cid).into_raw())
        } else if self.offset < self.sdu.len() {
            let amount = core::cmp::min(self.sdu.len() - self.offset, self.mps);

            let payload = self.sdu[self.offset..self.offset + amount].to_vec();

            self.offset += amount;

            Some(BasicFrame::new(payload, self.cid).into_raw())
        } else {
            None
        }
    }
}

/// Split a First frame payload into the declared SDU length and the data after it
pub fn parse_first_payload(payload: &[u8]) -> Result<(u16, &[u8]), FrameParseError> {
    if payload.len() < SDU_LENGTH_SIZE {
        return Err(FrameParseError::TooShort);
    }

    let declared = u16::from_le_bytes([payload[0], payload[1]]);

    Ok((declared, &payload[SDU_LENGTH_SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid() -> Cid {
        Cid::new_dynamic(0x0040).unwrap()
    }

    #[test]
    fn single_frame_sdu() {
        let frames: Vec<_> = segment(cid(), b"hi".to_vec(), 23).collect();

        assert_eq!(frames.len(), 1);

        let frame = BasicFrame::try_from_raw(&frames[0]).unwrap();

        let (declared, data) = parse_first_payload(frame.get_payload()).unwrap();

        assert_eq!(declared, 2);
        assert_eq!(data, b"hi");
    }

    #[test]
    fn sdu_splits_at_mps() {
        let sdu: Vec<u8> = (0..50).collect();

        let frames: Vec<_> = segment(cid(), sdu.clone(), 23).collect();

        // first carries 21 bytes, then 23, then 6
        assert_eq!(frames.len(), 3);

        let mut collected = Vec::new();

        for (index, raw) in frames.iter().enumerate() {
            let frame = BasicFrame::try_from_raw(raw).unwrap();

            if index == 0 {
                let (declared, data) = parse_first_payload(frame.get_payload()).unwrap();

                assert_eq!(declared, 50);

                collected.extend_from_slice(data);
            } else {
                collected.extend_from_slice(frame.get_payload());
            }
        }

        assert_eq!(collected, sdu);
    }

    #[test]
    fn empty_sdu_is_one_first_frame() {
        let frames: Vec<_> = segment(cid(), Vec::new(), 23).collect();

        assert_eq!(frames.len(), 1);

        let frame = BasicFrame::try_from_raw(&frames[0]).unwrap();

        let (declared, data) = parse_first_payload(frame.get_payload()).unwrap();

        assert_eq!(declared, 0);
        assert!(data.is_empty());
    }
}
