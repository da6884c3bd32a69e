//! Wire frame definitions
//!
//! Every packet on the link is a basic frame: a 16-bit payload length, a 16-bit channel
//! identifier, and the payload. The segmented wire modes layer their own fields inside the
//! payload; those are defined in [`enhanced_frame`] (retransmission mode) and [`credit_frame`]
//! (credit-based mode).
//!
//! All multi-byte fields are little-endian.

pub mod basic_frame;
pub mod credit_frame;
pub mod enhanced_frame;

use crate::channel::id::InvalidCid;

/// Errors from translating raw link data into a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameParseError {
    /// Raw data is too small to hold the frame's fields
    TooShort,
    /// The payload length field disagrees with the data actually present
    LengthMismatch,
    /// The channel identifier field is invalid
    InvalidChannelId(InvalidCid),
    /// The retransmission-mode control field is malformed or unsupported
    InvalidControlField(u16),
    /// The trailing checksum did not match
    FcsMismatch,
}

impl core::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            FrameParseError::TooShort => f.write_str("raw data is too small for the frame"),
            FrameParseError::LengthMismatch => {
                f.write_str("payload length field does not match the payload")
            }
            FrameParseError::InvalidChannelId(cid) => core::fmt::Display::fmt(cid, f),
            FrameParseError::InvalidControlField(raw) => {
                write!(f, "invalid control field {:#06x}", raw)
            }
            FrameParseError::FcsMismatch => f.write_str("frame check sequence mismatch"),
        }
    }
}

impl std::error::Error for FrameParseError {}

impl From<InvalidCid> for FrameParseError {
    fn from(e: InvalidCid) -> Self {
        FrameParseError::InvalidChannelId(e)
    }
}
