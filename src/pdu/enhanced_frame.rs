//! Retransmission-mode frames
//!
//! Frames in retransmission mode carry a 16-bit control field at the start of the basic frame
//! payload. Information frames (I-frames) carry segmented SDU data with a transmit sequence
//! number and a piggy-backed receive sequence number; supervisory frames (S-frames) carry
//! acknowledgements and retransmission requests without data.
//!
//! Control field layout (bit 0 is the least significant bit):
//!
//! | bits  | I-frame          | S-frame            |
//! |-------|------------------|--------------------|
//! | 0     | 0                | 1                  |
//! | 1..=6 | TxSeq            | (bit 1 reserved)   |
//! | 2..=3 |                  | supervisory function |
//! | 7     | Final            | Final              |
//! | 8..=13| ReqSeq           | ReqSeq             |
//! | 14..=15| segmentation tag|                    |
//!
//! Start frames carry the declared total SDU length in the two bytes following the control field.
//! When the checksum option is negotiated every frame ends with a 16-bit FCS computed over the
//! whole frame up to the FCS field.

use super::basic_frame::BasicFrame;
use super::FrameParseError;
use crate::channel::id::Cid;

/// Sequence numbers are modulo 64 (six bits of the control field)
pub const SEQ_MODULO: u8 = 64;

/// Segmentation tag of an I-frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationTag {
    Unsegmented,
    Start,
    End,
    Continuation,
}

impl SegmentationTag {
    fn to_bits(self) -> u16 {
        match self {
            SegmentationTag::Unsegmented => 0b00,
            SegmentationTag::Start => 0b01,
            SegmentationTag::End => 0b10,
            SegmentationTag::Continuation => 0b11,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => SegmentationTag::Unsegmented,
            0b01 => SegmentationTag::Start,
            0b10 => SegmentationTag::End,
            _ => SegmentationTag::Continuation,
        }
    }
}

/// Supervisory function of an S-frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisoryFunction {
    /// Acknowledge frames up to ReqSeq
    ReceiverReady,
    /// Request retransmission starting at ReqSeq
    Reject,
}

/// Control field of an I-frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InformationControl {
    pub tx_seq: u8,
    pub req_seq: u8,
    pub sar: SegmentationTag,
    pub final_flag: bool,
}

/// Control field of an S-frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisoryControl {
    pub function: SupervisoryFunction,
    pub req_seq: u8,
    pub final_flag: bool,
}

/// A decoded retransmission-mode control field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlField {
    Information(InformationControl),
    Supervisory(SupervisoryControl),
}

impl ControlField {
    /// Encode to the raw field value
    pub fn to_raw(self) -> u16 {
        match self {
            ControlField::Information(i) => {
                debug_assert!(i.tx_seq < SEQ_MODULO && i.req_seq < SEQ_MODULO);

                (u16::from(i.tx_seq) << 1)
                    | (u16::from(i.final_flag) << 7)
                    | (u16::from(i.req_seq) << 8)
                    | (i.sar.to_bits() << 14)
            }
            ControlField::Supervisory(s) => {
                debug_assert!(s.req_seq < SEQ_MODULO);

                let function = match s.function {
                    SupervisoryFunction::ReceiverReady => 0b00u16,
                    SupervisoryFunction::Reject => 0b01,
                };

                0x0001 | (function << 2) | (u16::from(s.final_flag) << 7) | (u16::from(s.req_seq) << 8)
            }
        }
    }

    /// Try to decode a raw field value
    pub fn try_from_raw(raw: u16) -> Result<ControlField, FrameParseError> {
        if raw & 0x0001 == 0 {
            Ok(ControlField::Information(InformationControl {
                tx_seq: ((raw >> 1) & 0x3F) as u8,
                req_seq: ((raw >> 8) & 0x3F) as u8,
                sar: SegmentationTag::from_bits(raw >> 14),
                final_flag: raw & 0x0080 != 0,
            }))
        } else {
            let function = match (raw >> 2) & 0b11 {
                0b00 => SupervisoryFunction::ReceiverReady,
                0b01 => SupervisoryFunction::Reject,
                _ => return Err(FrameParseError::InvalidControlField(raw)),
            };

            Ok(ControlField::Supervisory(SupervisoryControl {
                function,
                req_seq: ((raw >> 8) & 0x3F) as u8,
                final_flag: raw & 0x0080 != 0,
            }))
        }
    }
}

/// Compute the frame check sequence
///
/// CRC-16 with the reflected generator polynomial `0x8005` and an initial value of zero, taken
/// over the whole frame up to the FCS field.
pub fn compute_fcs(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &byte in bytes {
        crc ^= u16::from(byte);

        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
    }

    crc
}

/// Build a complete I-frame
///
/// `sdu_len` is the declared total SDU length and must be given exactly when `control.sar` is
/// [`SegmentationTag::Start`].
pub fn build_i_frame(
    cid: Cid,
    control: InformationControl,
    sdu_len: Option<u16>,
    data: &[u8],
    fcs: bool,
) -> Vec<u8> {
    debug_assert_eq!(sdu_len.is_some(), control.sar == SegmentationTag::Start);

    let mut payload = Vec::with_capacity(2 + 2 + data.len() + 2);

    payload.extend_from_slice(&ControlField::Information(control).to_raw().to_le_bytes());

    if let Some(len) = sdu_len {
        payload.extend_from_slice(&len.to_le_bytes());
    }

    payload.extend_from_slice(data);

    finish_frame(cid, payload, fcs)
}

/// Build a complete S-frame
pub fn build_s_frame(cid: Cid, control: SupervisoryControl, fcs: bool) -> Vec<u8> {
    let payload = ControlField::Supervisory(control).to_raw().to_le_bytes().to_vec();

    finish_frame(cid, payload, fcs)
}

fn finish_frame(cid: Cid, mut payload: Vec<u8>, fcs: bool) -> Vec<u8> {
    if fcs {
        // the FCS is part of the declared payload length
        payload.extend_from_slice(&[0, 0]);

        let mut raw = BasicFrame::new(payload, cid).into_raw();

        let fcs_offset = raw.len() - 2;

        let checksum = compute_fcs(&raw[..fcs_offset]);

        raw[fcs_offset..].copy_from_slice(&checksum.to_le_bytes());

        raw
    } else {
        BasicFrame::new(payload, cid).into_raw()
    }
}

/// A decoded retransmission-mode frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnhancedFrame<'a> {
    pub control: ControlField,
    /// Declared total SDU length, present on Start frames only
    pub sdu_len: Option<u16>,
    pub data: &'a [u8],
}

/// Decode a raw retransmission-mode frame (basic header included)
pub fn parse_frame(raw: &[u8], fcs: bool) -> Result<EnhancedFrame<'_>, FrameParseError> {
    let header = BasicFrame::HEADER_SIZE;

    let mut end = raw.len();

    if fcs {
        if end < header + 2 + 2 {
            return Err(FrameParseError::TooShort);
        }

        let fcs_offset = end - 2;

        let expected = u16::from_le_bytes([raw[fcs_offset], raw[fcs_offset + 1]]);

        if compute_fcs(&raw[..fcs_offset]) != expected {
            return Err(FrameParseError::FcsMismatch);
        }

        end = fcs_offset;
    } else if end < header + 2 {
        return Err(FrameParseError::TooShort);
    }

    let control = ControlField::try_from_raw(u16::from_le_bytes([raw[header], raw[header + 1]]))?;

    let mut data_start = header + 2;

    let sdu_len = match control {
        ControlField::Information(i) if i.sar == SegmentationTag::Start => {
            if end < data_start + 2 {
                return Err(FrameParseError::TooShort);
            }

            let len = u16::from_le_bytes([raw[data_start], raw[data_start + 1]]);

            data_start += 2;

            Some(len)
        }
        _ => None,
    };

    if end < data_start {
        return Err(FrameParseError::TooShort);
    }

    Ok(EnhancedFrame {
        control,
        sdu_len,
        data: &raw[data_start..end],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_field_round_trip() {
        let fields = [
            ControlField::Information(InformationControl {
                tx_seq: 17,
                req_seq: 63,
                sar: SegmentationTag::Start,
                final_flag: false,
            }),
            ControlField::Information(InformationControl {
                tx_seq: 0,
                req_seq: 0,
                sar: SegmentationTag::Unsegmented,
                final_flag: true,
            }),
            ControlField::Supervisory(SupervisoryControl {
                function: SupervisoryFunction::Reject,
                req_seq: 5,
                final_flag: false,
            }),
        ];

        for field in fields {
            assert_eq!(ControlField::try_from_raw(field.to_raw()), Ok(field));
        }
    }

    #[test]
    fn i_frame_bit_zero_is_clear() {
        let control = ControlField::Information(InformationControl {
            tx_seq: 1,
            req_seq: 2,
            sar: SegmentationTag::End,
            final_flag: false,
        });

        assert_eq!(control.to_raw() & 1, 0);
    }

    #[test]
    fn unsupported_supervisory_function_is_rejected() {
        // function bits 0b10 (receiver not ready) are not supported
        let raw = 0x0001 | (0b10 << 2);

        assert!(ControlField::try_from_raw(raw).is_err());
    }

    #[test]
    fn start_frame_carries_declared_length() {
        let cid = Cid::new_dynamic(0x0040).unwrap();

        let control = InformationControl {
            tx_seq: 0,
            req_seq: 0,
            sar: SegmentationTag::Start,
            final_flag: false,
        };

        let raw = build_i_frame(cid, control, Some(100), b"abc", false);

        let parsed = parse_frame(&raw, false).unwrap();

        assert_eq!(parsed.sdu_len, Some(100));
        assert_eq!(parsed.data, b"abc");
    }

    #[test]
    fn fcs_round_trip_and_mismatch() {
        let cid = Cid::new_dynamic(0x0041).unwrap();

        let control = InformationControl {
            tx_seq: 3,
            req_seq: 1,
            sar: SegmentationTag::Unsegmented,
            final_flag: false,
        };

        let mut raw = build_i_frame(cid, control, None, b"payload", true);

        assert!(parse_frame(&raw, true).is_ok());

        // corrupt one payload byte
        raw[6] ^= 0xFF;

        assert_eq!(parse_frame(&raw, true), Err(FrameParseError::FcsMismatch));
    }

    #[test]
    fn known_fcs_value() {
        // CRC-16/ARC check value for "123456789"
        assert_eq!(compute_fcs(b"123456789"), 0xBB3D);
    }
}
