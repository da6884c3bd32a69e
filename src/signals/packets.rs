//! Signalling command encoding
//!
//! A control frame on the signalling channel carries one or more commands, each with a one byte
//! code, a one byte transaction identifier, a 16-bit payload length and the payload. [`iter`]
//! walks the commands of one control frame; the per-command types encode and decode their
//! payloads. Everything on the wire is little-endian.

use crate::channel::id::Psm;

/// Command codes of the signalling sub-protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalCode {
    CommandReject,
    ConnectionRequest,
    ConnectionResponse,
    ConfigurationRequest,
    ConfigurationResponse,
    DisconnectionRequest,
    DisconnectionResponse,
    EchoRequest,
    EchoResponse,
    InformationRequest,
    InformationResponse,
    LeCreditBasedConnectionRequest,
    LeCreditBasedConnectionResponse,
    FlowControlCreditIndication,
}

impl SignalCode {
    pub fn to_val(self) -> u8 {
        match self {
            SignalCode::CommandReject => 0x01,
            SignalCode::ConnectionRequest => 0x02,
            SignalCode::ConnectionResponse => 0x03,
            SignalCode::ConfigurationRequest => 0x04,
            SignalCode::ConfigurationResponse => 0x05,
            SignalCode::DisconnectionRequest => 0x06,
            SignalCode::DisconnectionResponse => 0x07,
            SignalCode::EchoRequest => 0x08,
            SignalCode::EchoResponse => 0x09,
            SignalCode::InformationRequest => 0x0A,
            SignalCode::InformationResponse => 0x0B,
            SignalCode::LeCreditBasedConnectionRequest => 0x14,
            SignalCode::LeCreditBasedConnectionResponse => 0x15,
            SignalCode::FlowControlCreditIndication => 0x16,
        }
    }

    pub fn try_from_raw(raw: u8) -> Result<SignalCode, SignalError> {
        match raw {
            0x01 => Ok(SignalCode::CommandReject),
            0x02 => Ok(SignalCode::ConnectionRequest),
            0x03 => Ok(SignalCode::ConnectionResponse),
            0x04 => Ok(SignalCode::ConfigurationRequest),
            0x05 => Ok(SignalCode::ConfigurationResponse),
            0x06 => Ok(SignalCode::DisconnectionRequest),
            0x07 => Ok(SignalCode::DisconnectionResponse),
            0x08 => Ok(SignalCode::EchoRequest),
            0x09 => Ok(SignalCode::EchoResponse),
            0x0A => Ok(SignalCode::InformationRequest),
            0x0B => Ok(SignalCode::InformationResponse),
            0x14 => Ok(SignalCode::LeCreditBasedConnectionRequest),
            0x15 => Ok(SignalCode::LeCreditBasedConnectionResponse),
            0x16 => Ok(SignalCode::FlowControlCreditIndication),
            _ => Err(SignalError::UnknownCode(raw)),
        }
    }

    /// The response code answering this request code, `None` for codes that are not requests
    pub fn response(self) -> Option<SignalCode> {
        match self {
            SignalCode::ConnectionRequest => Some(SignalCode::ConnectionResponse),
            SignalCode::ConfigurationRequest => Some(SignalCode::ConfigurationResponse),
            SignalCode::DisconnectionRequest => Some(SignalCode::DisconnectionResponse),
            SignalCode::EchoRequest => Some(SignalCode::EchoResponse),
            SignalCode::InformationRequest => Some(SignalCode::InformationResponse),
            SignalCode::LeCreditBasedConnectionRequest => {
                Some(SignalCode::LeCreditBasedConnectionResponse)
            }
            _ => None,
        }
    }
}

/// A malformed or unusable signalling command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    TooShort,
    UnknownCode(u8),
    InvalidResult(u16),
    InvalidPsm(u16),
    BadOptionLength(u8),
}

impl core::fmt::Display for SignalError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            SignalError::TooShort => f.write_str("signalling payload too short"),
            SignalError::UnknownCode(code) => write!(f, "unknown signalling code {:#04x}", code),
            SignalError::InvalidResult(raw) => write!(f, "invalid result value {:#06x}", raw),
            SignalError::InvalidPsm(raw) => write!(f, "invalid service identifier {:#06x}", raw),
            SignalError::BadOptionLength(ty) => {
                write!(f, "bad length for configuration option {:#04x}", ty)
            }
        }
    }
}

impl std::error::Error for SignalError {}

/// The size of the per-command header (code, identifier, length)
pub const COMMAND_HEADER_SIZE: usize = 4;

/// One command cut out of a control frame, payload not yet decoded
#[derive(Debug, Clone, Copy)]
pub struct RawSignal<'a> {
    pub code: Result<SignalCode, SignalError>,
    pub id: u8,
    pub data: &'a [u8],
}

/// Iterate the commands packed into one control frame payload
///
/// Iteration ends at the first command whose header or declared length does not fit.
pub fn iter(payload: &[u8]) -> SignalIter<'_> {
    SignalIter { rest: payload }
}

pub struct SignalIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for SignalIter<'a> {
    type Item = RawSignal<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        if self.rest.len() < COMMAND_HEADER_SIZE {
            log::warn!("truncated signalling command header, discarding remainder");
            self.rest = &[];
            return None;
        }

        let len = usize::from(u16::from_le_bytes([self.rest[2], self.rest[3]]));

        if self.rest.len() < COMMAND_HEADER_SIZE + len {
            log::warn!("signalling command longer than its control frame, discarding remainder");
            self.rest = &[];
            return None;
        }

        let signal = RawSignal {
            code: SignalCode::try_from_raw(self.rest[0]),
            id: self.rest[1],
            data: &self.rest[COMMAND_HEADER_SIZE..COMMAND_HEADER_SIZE + len],
        };

        self.rest = &self.rest[COMMAND_HEADER_SIZE + len..];

        Some(signal)
    }
}

/// Prefix `payload` with the command header
pub fn encode(code: SignalCode, id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(COMMAND_HEADER_SIZE + payload.len());

    out.push(code.to_val());
    out.push(id);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);

    out
}

fn read_u16(data: &[u8], at: usize) -> Result<u16, SignalError> {
    if data.len() < at + 2 {
        return Err(SignalError::TooShort);
    }

    Ok(u16::from_le_bytes([data[at], data[at + 1]]))
}

/// Reason of a Command Reject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    CommandNotUnderstood,
    SignallingMtuExceeded,
    InvalidCid { local: u16, remote: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandReject {
    pub reason: RejectReason,
}

impl CommandReject {
    pub fn encode(&self) -> Vec<u8> {
        match self.reason {
            RejectReason::CommandNotUnderstood => 0x0000u16.to_le_bytes().to_vec(),
            RejectReason::SignallingMtuExceeded => 0x0001u16.to_le_bytes().to_vec(),
            RejectReason::InvalidCid { local, remote } => {
                let mut out = 0x0002u16.to_le_bytes().to_vec();
                out.extend_from_slice(&local.to_le_bytes());
                out.extend_from_slice(&remote.to_le_bytes());
                out
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, SignalError> {
        let reason = match read_u16(data, 0)? {
            0x0000 => RejectReason::CommandNotUnderstood,
            0x0001 => RejectReason::SignallingMtuExceeded,
            0x0002 => RejectReason::InvalidCid {
                local: read_u16(data, 2)?,
                remote: read_u16(data, 4)?,
            },
            other => return Err(SignalError::InvalidResult(other)),
        };

        Ok(CommandReject { reason })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub psm: u16,
    pub source_cid: u16,
}

impl ConnectionRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.psm.to_le_bytes().to_vec();
        out.extend_from_slice(&self.source_cid.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, SignalError> {
        Ok(ConnectionRequest {
            psm: read_u16(data, 0)?,
            source_cid: read_u16(data, 2)?,
        })
    }
}

/// Result of a classic connection response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionResult {
    Success,
    Pending,
    PsmNotSupported,
    SecurityBlock,
    NoResources,
    InvalidSourceCid,
    SourceCidAlreadyAllocated,
}

impl ConnectionResult {
    fn to_val(self) -> u16 {
        match self {
            ConnectionResult::Success => 0x0000,
            ConnectionResult::Pending => 0x0001,
            ConnectionResult::PsmNotSupported => 0x0002,
            ConnectionResult::SecurityBlock => 0x0003,
            ConnectionResult::NoResources => 0x0004,
            ConnectionResult::InvalidSourceCid => 0x0006,
            ConnectionResult::SourceCidAlreadyAllocated => 0x0007,
        }
    }

    fn try_from_raw(raw: u16) -> Result<Self, SignalError> {
        match raw {
            0x0000 => Ok(ConnectionResult::Success),
            0x0001 => Ok(ConnectionResult::Pending),
            0x0002 => Ok(ConnectionResult::PsmNotSupported),
            0x0003 => Ok(ConnectionResult::SecurityBlock),
            0x0004 => Ok(ConnectionResult::NoResources),
            0x0006 => Ok(ConnectionResult::InvalidSourceCid),
            0x0007 => Ok(ConnectionResult::SourceCidAlreadyAllocated),
            other => Err(SignalError::InvalidResult(other)),
        }
    }
}

impl core::fmt::Display for ConnectionResult {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ConnectionResult::Success => f.write_str("success"),
            ConnectionResult::Pending => f.write_str("pending"),
            ConnectionResult::PsmNotSupported => f.write_str("service not supported"),
            ConnectionResult::SecurityBlock => f.write_str("blocked by security policy"),
            ConnectionResult::NoResources => f.write_str("no resources available"),
            ConnectionResult::InvalidSourceCid => f.write_str("invalid source channel id"),
            ConnectionResult::SourceCidAlreadyAllocated => {
                f.write_str("source channel id already allocated")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionResponse {
    pub destination_cid: u16,
    pub source_cid: u16,
    pub result: ConnectionResult,
    pub status: u16,
}

impl ConnectionResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.destination_cid.to_le_bytes().to_vec();
        out.extend_from_slice(&self.source_cid.to_le_bytes());
        out.extend_from_slice(&self.result.to_val().to_le_bytes());
        out.extend_from_slice(&self.status.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, SignalError> {
        Ok(ConnectionResponse {
            destination_cid: read_u16(data, 0)?,
            source_cid: read_u16(data, 2)?,
            result: ConnectionResult::try_from_raw(read_u16(data, 4)?)?,
            status: read_u16(data, 6)?,
        })
    }
}

/// A configuration option in the (type, length, value) sequence of a configuration command
///
/// The high bit of the option type marks the option as a hint: an unrecognised hint is skipped,
/// an unrecognised non-hint option fails the configuration with [`ConfigResult::UnknownOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOption {
    Mtu(u16),
    FlushTimeout(u16),
    RetransmissionAndFlowControl {
        /// 0x00 basic, 0x03 enhanced retransmission
        mode: u8,
        tx_window: u8,
        max_transmit: u8,
        retransmission_timeout: u16,
        monitor_timeout: u16,
        mps: u16,
    },
    Fcs(bool),
    Unknown { option_type: u8, data: Vec<u8> },
}

impl ConfigOption {
    pub const MODE_BASIC: u8 = 0x00;
    pub const MODE_ENHANCED_RETRANSMISSION: u8 = 0x03;

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            ConfigOption::Mtu(mtu) => {
                out.extend_from_slice(&[0x01, 2]);
                out.extend_from_slice(&mtu.to_le_bytes());
            }
            ConfigOption::FlushTimeout(timeout) => {
                out.extend_from_slice(&[0x02, 2]);
                out.extend_from_slice(&timeout.to_le_bytes());
            }
            ConfigOption::RetransmissionAndFlowControl {
                mode,
                tx_window,
                max_transmit,
                retransmission_timeout,
                monitor_timeout,
                mps,
            } => {
                out.extend_from_slice(&[0x04, 9, *mode, *tx_window, *max_transmit]);
                out.extend_from_slice(&retransmission_timeout.to_le_bytes());
                out.extend_from_slice(&monitor_timeout.to_le_bytes());
                out.extend_from_slice(&mps.to_le_bytes());
            }
            ConfigOption::Fcs(enabled) => {
                out.extend_from_slice(&[0x05, 1, u8::from(*enabled)]);
            }
            ConfigOption::Unknown { option_type, data } => {
                out.extend_from_slice(&[*option_type, data.len() as u8]);
                out.extend_from_slice(data);
            }
        }
    }

    fn is_hint(option_type: u8) -> bool {
        option_type & 0x80 != 0
    }
}

pub fn encode_options(options: &[ConfigOption]) -> Vec<u8> {
    let mut out = Vec::new();

    for option in options {
        option.encode_into(&mut out);
    }

    out
}

/// Parse a configuration option sequence
///
/// Unrecognised non-hint option types are collected into the second return value; when it is
/// non-empty the command must be answered with [`ConfigResult::UnknownOptions`].
pub fn parse_options(mut data: &[u8]) -> Result<(Vec<ConfigOption>, Vec<u8>), SignalError> {
    let mut options = Vec::new();
    let mut unknown = Vec::new();

    while !data.is_empty() {
        if data.len() < 2 {
            return Err(SignalError::TooShort);
        }

        let option_type = data[0];
        let len = usize::from(data[1]);

        if data.len() < 2 + len {
            return Err(SignalError::TooShort);
        }

        let value = &data[2..2 + len];

        data = &data[2 + len..];

        let expect_len = |expected: usize| {
            if len == expected {
                Ok(())
            } else {
                Err(SignalError::BadOptionLength(option_type))
            }
        };

        match option_type {
            0x01 => {
                expect_len(2)?;
                options.push(ConfigOption::Mtu(u16::from_le_bytes([value[0], value[1]])));
            }
            0x02 => {
                expect_len(2)?;
                options.push(ConfigOption::FlushTimeout(u16::from_le_bytes([
                    value[0], value[1],
                ])));
            }
            0x04 => {
                expect_len(9)?;
                options.push(ConfigOption::RetransmissionAndFlowControl {
                    mode: value[0],
                    tx_window: value[1],
                    max_transmit: value[2],
                    retransmission_timeout: u16::from_le_bytes([value[3], value[4]]),
                    monitor_timeout: u16::from_le_bytes([value[5], value[6]]),
                    mps: u16::from_le_bytes([value[7], value[8]]),
                });
            }
            0x05 => {
                expect_len(1)?;
                options.push(ConfigOption::Fcs(value[0] != 0));
            }
            unrecognised if ConfigOption::is_hint(unrecognised) => {
                log::trace!("skipping unrecognised hint option {:#04x}", unrecognised);
            }
            unrecognised => unknown.push(unrecognised),
        }
    }

    Ok((options, unknown))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationRequest {
    pub destination_cid: u16,
    pub flags: u16,
    pub options: Vec<ConfigOption>,
}

impl ConfigurationRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.destination_cid.to_le_bytes().to_vec();
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&encode_options(&self.options));
        out
    }

    /// Decode the fixed part, returning the raw option bytes for [`parse_options`]
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), SignalError> {
        let request = ConfigurationRequest {
            destination_cid: read_u16(data, 0)?,
            flags: read_u16(data, 2)?,
            options: Vec::new(),
        };

        Ok((request, &data[4..]))
    }
}

/// Result of a configuration response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigResult {
    Success,
    UnacceptableParameters,
    Rejected,
    UnknownOptions,
    Pending,
}

impl ConfigResult {
    fn to_val(self) -> u16 {
        match self {
            ConfigResult::Success => 0x0000,
            ConfigResult::UnacceptableParameters => 0x0001,
            ConfigResult::Rejected => 0x0002,
            ConfigResult::UnknownOptions => 0x0003,
            ConfigResult::Pending => 0x0004,
        }
    }

    fn try_from_raw(raw: u16) -> Result<Self, SignalError> {
        match raw {
            0x0000 => Ok(ConfigResult::Success),
            0x0001 => Ok(ConfigResult::UnacceptableParameters),
            0x0002 => Ok(ConfigResult::Rejected),
            0x0003 => Ok(ConfigResult::UnknownOptions),
            0x0004 => Ok(ConfigResult::Pending),
            other => Err(SignalError::InvalidResult(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationResponse {
    pub source_cid: u16,
    pub flags: u16,
    pub result: ConfigResult,
    pub options: Vec<ConfigOption>,
}

impl ConfigurationResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.source_cid.to_le_bytes().to_vec();
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.result.to_val().to_le_bytes());
        out.extend_from_slice(&encode_options(&self.options));
        out
    }

    /// Decode the fixed part, returning the raw option bytes for [`parse_options`]
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), SignalError> {
        let response = ConfigurationResponse {
            source_cid: read_u16(data, 0)?,
            flags: read_u16(data, 2)?,
            result: ConfigResult::try_from_raw(read_u16(data, 4)?)?,
            options: Vec::new(),
        };

        Ok((response, &data[6..]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnection {
    pub destination_cid: u16,
    pub source_cid: u16,
}

impl Disconnection {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.destination_cid.to_le_bytes().to_vec();
        out.extend_from_slice(&self.source_cid.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, SignalError> {
        Ok(Disconnection {
            destination_cid: read_u16(data, 0)?,
            source_cid: read_u16(data, 2)?,
        })
    }
}

/// Type selector of an information request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoType {
    ConnectionlessMtu,
    ExtendedFeatures,
    FixedChannels,
}

impl InfoType {
    pub fn to_val(self) -> u16 {
        match self {
            InfoType::ConnectionlessMtu => 0x0001,
            InfoType::ExtendedFeatures => 0x0002,
            InfoType::FixedChannels => 0x0003,
        }
    }

    pub fn try_from_raw(raw: u16) -> Result<Self, SignalError> {
        match raw {
            0x0001 => Ok(InfoType::ConnectionlessMtu),
            0x0002 => Ok(InfoType::ExtendedFeatures),
            0x0003 => Ok(InfoType::FixedChannels),
            other => Err(SignalError::InvalidResult(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InformationRequest {
    pub info_type: InfoType,
}

impl InformationRequest {
    pub fn encode(&self) -> Vec<u8> {
        self.info_type.to_val().to_le_bytes().to_vec()
    }

    pub fn decode(data: &[u8]) -> Result<Self, SignalError> {
        Ok(InformationRequest {
            info_type: InfoType::try_from_raw(read_u16(data, 0)?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationResponse {
    pub info_type: InfoType,
    /// 0x0000 success, 0x0001 not supported
    pub result: u16,
    pub data: Vec<u8>,
}

impl InformationResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.info_type.to_val().to_le_bytes().to_vec();
        out.extend_from_slice(&self.result.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, SignalError> {
        Ok(InformationResponse {
            info_type: InfoType::try_from_raw(read_u16(data, 0)?)?,
            result: read_u16(data, 2)?,
            data: data[4..].to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeCreditBasedConnectionRequest {
    pub spsm: u16,
    pub source_cid: u16,
    pub mtu: u16,
    pub mps: u16,
    pub initial_credits: u16,
}

impl LeCreditBasedConnectionRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.spsm.to_le_bytes().to_vec();
        out.extend_from_slice(&self.source_cid.to_le_bytes());
        out.extend_from_slice(&self.mtu.to_le_bytes());
        out.extend_from_slice(&self.mps.to_le_bytes());
        out.extend_from_slice(&self.initial_credits.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, SignalError> {
        Ok(LeCreditBasedConnectionRequest {
            spsm: read_u16(data, 0)?,
            source_cid: read_u16(data, 2)?,
            mtu: read_u16(data, 4)?,
            mps: read_u16(data, 6)?,
            initial_credits: read_u16(data, 8)?,
        })
    }

    /// Validate the service identifier field
    pub fn psm(&self) -> Result<Psm, SignalError> {
        Psm::new(self.spsm).map_err(|_| SignalError::InvalidPsm(self.spsm))
    }
}

/// Result of an LE credit-based connection response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeConnectionResult {
    Success,
    SpsmNotSupported,
    NoResources,
    InsufficientSecurity,
    InvalidSourceCid,
    SourceCidAlreadyAllocated,
    UnacceptableParameters,
}

impl LeConnectionResult {
    fn to_val(self) -> u16 {
        match self {
            LeConnectionResult::Success => 0x0000,
            LeConnectionResult::SpsmNotSupported => 0x0002,
            LeConnectionResult::NoResources => 0x0004,
            LeConnectionResult::InsufficientSecurity => 0x0005,
            LeConnectionResult::InvalidSourceCid => 0x0009,
            LeConnectionResult::SourceCidAlreadyAllocated => 0x000A,
            LeConnectionResult::UnacceptableParameters => 0x000B,
        }
    }

    fn try_from_raw(raw: u16) -> Result<Self, SignalError> {
        match raw {
            0x0000 => Ok(LeConnectionResult::Success),
            0x0002 => Ok(LeConnectionResult::SpsmNotSupported),
            0x0004 => Ok(LeConnectionResult::NoResources),
            0x0005 => Ok(LeConnectionResult::InsufficientSecurity),
            0x0009 => Ok(LeConnectionResult::InvalidSourceCid),
            0x000A => Ok(LeConnectionResult::SourceCidAlreadyAllocated),
            0x000B => Ok(LeConnectionResult::UnacceptableParameters),
            other => Err(SignalError::InvalidResult(other)),
        }
    }
}

impl core::fmt::Display for LeConnectionResult {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            LeConnectionResult::Success => f.write_str("success"),
            LeConnectionResult::SpsmNotSupported => f.write_str("service not supported"),
            LeConnectionResult::NoResources => f.write_str("no resources available"),
            LeConnectionResult::InsufficientSecurity => f.write_str("insufficient security"),
            LeConnectionResult::InvalidSourceCid => f.write_str("invalid source channel id"),
            LeConnectionResult::SourceCidAlreadyAllocated => {
                f.write_str("source channel id already allocated")
            }
            LeConnectionResult::UnacceptableParameters => {
                f.write_str("unacceptable connection parameters")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeCreditBasedConnectionResponse {
    pub destination_cid: u16,
    pub mtu: u16,
    pub mps: u16,
    pub initial_credits: u16,
    pub result: LeConnectionResult,
}

impl LeCreditBasedConnectionResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.destination_cid.to_le_bytes().to_vec();
        out.extend_from_slice(&self.mtu.to_le_bytes());
        out.extend_from_slice(&self.mps.to_le_bytes());
        out.extend_from_slice(&self.initial_credits.to_le_bytes());
        out.extend_from_slice(&self.result.to_val().to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, SignalError> {
        Ok(LeCreditBasedConnectionResponse {
            destination_cid: read_u16(data, 0)?,
            mtu: read_u16(data, 2)?,
            mps: read_u16(data, 4)?,
            initial_credits: read_u16(data, 6)?,
            result: LeConnectionResult::try_from_raw(read_u16(data, 8)?)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControlCreditIndication {
    /// The sender's local channel id on which it grants credits
    pub cid: u16,
    pub credits: u16,
}

impl FlowControlCreditIndication {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.cid.to_le_bytes().to_vec();
        out.extend_from_slice(&self.credits.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, SignalError> {
        Ok(FlowControlCreditIndication {
            cid: read_u16(data, 0)?,
            credits: read_u16(data, 2)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frame_iterates_packed_commands() {
        let mut frame = encode(SignalCode::EchoRequest, 1, b"ping");

        frame.extend_from_slice(&encode(
            SignalCode::DisconnectionRequest,
            2,
            &Disconnection {
                destination_cid: 0x0040,
                source_cid: 0x0041,
            }
            .encode(),
        ));

        let signals: Vec<_> = iter(&frame).collect();

        assert_eq!(signals.len(), 2);

        assert_eq!(signals[0].code, Ok(SignalCode::EchoRequest));
        assert_eq!(signals[0].id, 1);
        assert_eq!(signals[0].data, b"ping");

        assert_eq!(signals[1].code, Ok(SignalCode::DisconnectionRequest));
        assert_eq!(signals[1].id, 2);
    }

    #[test]
    fn truncated_command_ends_iteration() {
        let mut frame = encode(SignalCode::EchoRequest, 1, b"ok");

        // a second command declaring more payload than remains
        frame.extend_from_slice(&[0x08, 2, 10, 0, 1, 2]);

        let signals: Vec<_> = iter(&frame).collect();

        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn unknown_code_is_reported_per_command() {
        let frame = encode(SignalCode::EchoRequest, 1, b"").into_iter()
            .chain([0x7F, 2, 0, 0])
            .collect::<Vec<_>>();

        let signals: Vec<_> = iter(&frame).collect();

        assert_eq!(signals.len(), 2);
        assert_eq!(signals[1].code, Err(SignalError::UnknownCode(0x7F)));
    }

    #[test]
    fn configuration_options_round_trip() {
        let options = vec![
            ConfigOption::Mtu(672),
            ConfigOption::RetransmissionAndFlowControl {
                mode: ConfigOption::MODE_ENHANCED_RETRANSMISSION,
                tx_window: 10,
                max_transmit: 3,
                retransmission_timeout: 2000,
                monitor_timeout: 12000,
                mps: 1010,
            },
            ConfigOption::Fcs(true),
        ];

        let encoded = encode_options(&options);

        let (parsed, unknown) = parse_options(&encoded).unwrap();

        assert_eq!(parsed, options);
        assert!(unknown.is_empty());
    }

    #[test]
    fn unknown_hint_option_is_skipped() {
        let mut encoded = encode_options(&[ConfigOption::Mtu(100)]);

        encoded.extend_from_slice(&[0x85, 1, 0xAA]);

        let (parsed, unknown) = parse_options(&encoded).unwrap();

        assert_eq!(parsed, vec![ConfigOption::Mtu(100)]);
        assert!(unknown.is_empty());
    }

    #[test]
    fn unknown_non_hint_option_is_collected() {
        let encoded = [0x42, 2, 1, 2];

        let (parsed, unknown) = parse_options(&encoded).unwrap();

        assert!(parsed.is_empty());
        assert_eq!(unknown, vec![0x42]);
    }

    #[test]
    fn connection_round_trip() {
        let request = ConnectionRequest {
            psm: 0x0003,
            source_cid: 0x0040,
        };

        assert_eq!(ConnectionRequest::decode(&request.encode()), Ok(request));

        let response = ConnectionResponse {
            destination_cid: 0x0041,
            source_cid: 0x0040,
            result: ConnectionResult::Success,
            status: 0,
        };

        assert_eq!(ConnectionResponse::decode(&response.encode()), Ok(response));
    }

    #[test]
    fn le_connection_round_trip() {
        let request = LeCreditBasedConnectionRequest {
            spsm: 0x0025,
            source_cid: 0x0040,
            mtu: 512,
            mps: 64,
            initial_credits: 10,
        };

        assert_eq!(
            LeCreditBasedConnectionRequest::decode(&request.encode()),
            Ok(request)
        );

        let response = LeCreditBasedConnectionResponse {
            destination_cid: 0x0041,
            mtu: 256,
            mps: 48,
            initial_credits: 4,
            result: LeConnectionResult::Success,
        };

        assert_eq!(
            LeCreditBasedConnectionResponse::decode(&response.encode()),
            Ok(response)
        );
    }
}
