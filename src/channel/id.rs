//! Channel and service identifier types

use core::num::NonZeroU8;

/// Channel Identifier
///
/// A `Cid` identifies one logical channel and is unique within a link. The value `0x0000` is
/// invalid. Identifiers below [`FIRST_DYNAMIC`] are fixed channels reserved for protocol use (the
/// signalling channels among them); the rest form the dynamically allocated range handed out
/// during channel negotiation.
///
/// [`FIRST_DYNAMIC`]: Cid::FIRST_DYNAMIC
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cid(u16);

impl Cid {
    /// The signalling channel of a classic link
    pub const SIGNALLING: Cid = Cid(0x0001);

    /// The signalling channel of a LE link
    pub const LE_SIGNALLING: Cid = Cid(0x0005);

    /// First identifier of the fixed range
    pub const FIRST_FIXED: u16 = 0x0001;

    /// Last identifier of the fixed range
    pub const LAST_FIXED: u16 = 0x003F;

    /// First identifier of the dynamic range
    pub const FIRST_DYNAMIC: u16 = 0x0040;

    /// Last dynamic identifier usable on a classic link
    pub const LAST_DYNAMIC: u16 = 0xFFFF;

    /// Last dynamic identifier usable on a LE link
    pub const LAST_DYNAMIC_LE: u16 = 0x007F;

    /// Try to convert a raw value into a `Cid`
    pub fn try_from_raw(val: u16) -> Result<Cid, InvalidCid> {
        if val == 0 {
            Err(InvalidCid(val))
        } else {
            Ok(Cid(val))
        }
    }

    /// Create a `Cid` in the dynamic range
    pub fn new_dynamic(val: u16) -> Result<Cid, InvalidCid> {
        if val >= Cid::FIRST_DYNAMIC {
            Ok(Cid(val))
        } else {
            Err(InvalidCid(val))
        }
    }

    /// Get the numerical value of this `Cid`
    pub fn to_val(self) -> u16 {
        self.0
    }

    /// Check if this identifier is in the fixed range
    pub fn is_fixed(self) -> bool {
        self.0 <= Cid::LAST_FIXED
    }

    /// Check if this identifier is in the dynamic range
    pub fn is_dynamic(self) -> bool {
        self.0 >= Cid::FIRST_DYNAMIC
    }
}

impl core::fmt::Display for Cid {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Error for a raw value that is not a valid channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidCid(pub u16);

impl core::fmt::Display for InvalidCid {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{:#06x} is not a valid channel identifier", self.0)
    }
}

impl std::error::Error for InvalidCid {}

/// Protocol/Service Multiplexer identifier
///
/// Services register under a `Psm` and peers name it when requesting a dynamic channel. A raw
/// value is valid only when its lowest bit is set and the lowest bit of its upper octet is clear,
/// i.e. `(raw & 0x0101) == 0x0001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Psm(u16);

impl Psm {
    /// Try to create a `Psm` from its raw value
    pub fn new(val: u16) -> Result<Psm, InvalidPsm> {
        if Psm::is_valid(val) {
            Ok(Psm(val))
        } else {
            Err(InvalidPsm(val))
        }
    }

    /// The structural validity predicate for a raw PSM value
    pub fn is_valid(val: u16) -> bool {
        (val & 0x0101) == 0x0001
    }

    /// Get the numerical value of this `Psm`
    pub fn to_val(self) -> u16 {
        self.0
    }
}

impl core::fmt::Display for Psm {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Error for a raw value that is not a structurally valid PSM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidPsm(pub u16);

impl core::fmt::Display for InvalidPsm {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{:#06x} is not a valid PSM", self.0)
    }
}

impl std::error::Error for InvalidPsm {}

/// Signalling transaction identifier
///
/// Every signalling request carries a `SignalId` matching it to its response. The value zero is
/// reserved as the "no pending command" sentinel on the wire, so the sequence of identifiers wraps
/// from 255 back to 1 and never visits 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(NonZeroU8);

impl SignalId {
    /// Create a `SignalId`, `None` for the reserved value 0
    pub fn new(val: u8) -> Option<SignalId> {
        NonZeroU8::new(val).map(SignalId)
    }

    /// Get the raw value
    pub fn get(self) -> u8 {
        self.0.get()
    }

    /// The next identifier in sequence, wrapping 255 → 1
    pub fn next(self) -> SignalId {
        let raw = match self.0.get().checked_add(1) {
            Some(v) => v,
            None => 1,
        };

        SignalId(NonZeroU8::new(raw).unwrap())
    }

    /// The previous identifier in sequence, wrapping 1 → 255
    pub fn prev(self) -> SignalId {
        let raw = match self.0.get() - 1 {
            0 => 255,
            v => v,
        };

        SignalId(NonZeroU8::new(raw).unwrap())
    }
}

impl core::fmt::Display for SignalId {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
