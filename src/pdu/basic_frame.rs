//! Basic frame encode/decode
//!
//! The basic frame (B-frame) is the unsegmented unit of the link: payload length, channel
//! identifier, payload. Basic mode channels carry one whole SDU per B-frame; the other modes
//! embed their control fields inside the payload.

use super::FrameParseError;
use crate::channel::id::Cid;

/// Basic information frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicFrame {
    cid: Cid,
    payload: Vec<u8>,
}

impl BasicFrame {
    /// The number of bytes in a basic frame header
    pub const HEADER_SIZE: usize = 4;

    /// Create a new `BasicFrame`
    pub fn new(payload: Vec<u8>, cid: Cid) -> Self {
        BasicFrame { cid, payload }
    }

    /// Get the channel identifier
    pub fn get_cid(&self) -> Cid {
        self.cid
    }

    /// Get the payload
    pub fn get_payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload out of the frame
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Read just the channel identifier field of a raw frame
    ///
    /// Used to route an inbound frame before (and without) fully validating it.
    pub fn peek_cid(raw: &[u8]) -> Result<Cid, FrameParseError> {
        if raw.len() < Self::HEADER_SIZE {
            return Err(FrameParseError::TooShort);
        }

        Ok(Cid::try_from_raw(u16::from_le_bytes([raw[2], raw[3]]))?)
    }

    /// Try to decode a raw frame
    pub fn try_from_raw(raw: &[u8]) -> Result<BasicFrame, FrameParseError> {
        if raw.len() < Self::HEADER_SIZE {
            return Err(FrameParseError::TooShort);
        }

        let len = u16::from_le_bytes([raw[0], raw[1]]) as usize;

        let cid = Cid::try_from_raw(u16::from_le_bytes([raw[2], raw[3]]))?;

        if raw.len() - Self::HEADER_SIZE != len {
            return Err(FrameParseError::LengthMismatch);
        }

        Ok(BasicFrame {
            cid,
            payload: raw[Self::HEADER_SIZE..].to_vec(),
        })
    }

    /// Encode into raw link bytes
    pub fn into_raw(self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(Self::HEADER_SIZE + self.payload.len());

        raw.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        raw.extend_from_slice(&self.cid.to_val().to_le_bytes());
        raw.extend_from_slice(&self.payload);

        raw
    }
}

impl core::fmt::Display for BasicFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "basic frame {{ cid: {}, payload: {:x?} }}",
            self.cid, self.payload
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout() {
        let frame = BasicFrame::new(b"hello".to_vec(), Cid::new_dynamic(0x0040).unwrap());

        let raw = frame.into_raw();

        assert_eq!(&raw[..4], &[0x05, 0x00, 0x40, 0x00]);
        assert_eq!(&raw[4..], b"hello");
    }

    #[test]
    fn decode_round_trip() {
        let frame = BasicFrame::new(vec![1, 2, 3], Cid::SIGNALLING);

        let decoded = BasicFrame::try_from_raw(&frame.clone().into_raw()).unwrap();

        assert_eq!(decoded, frame);
    }

    #[test]
    fn length_field_is_checked() {
        let mut raw = BasicFrame::new(vec![1, 2, 3], Cid::SIGNALLING).into_raw();

        raw[0] = 7;

        assert_eq!(
            BasicFrame::try_from_raw(&raw),
            Err(FrameParseError::LengthMismatch)
        );
    }

    #[test]
    fn zero_cid_is_rejected() {
        let raw = [0x00, 0x00, 0x00, 0x00];

        assert!(matches!(
            BasicFrame::try_from_raw(&raw),
            Err(FrameParseError::InvalidChannelId(_))
        ));
    }
}
