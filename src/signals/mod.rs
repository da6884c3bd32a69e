//! Signalling sub-protocol
//!
//! The signalling managers negotiate channel establishment, configuration and teardown with the
//! peer over the reserved signalling channel. The two variants ([`classic`] for links carrying
//! configured connection-oriented channels, [`le`] for links carrying credit-based channels)
//! share the command framing in [`packets`] and the one-in-flight request queue in [`commands`].
//!
//! A manager is a pseudo channel user: it reads control frames from the signalling fixed
//! channel's queue and writes its own control frames back into it, so signalling traffic flows
//! through the same pipeline as channel payload.

pub mod classic;
pub mod commands;
pub mod le;
pub mod packets;

use packets::{ConnectionResult, LeConnectionResult};
use std::time::Duration;

/// How long to wait for the response to a signalling request
pub const SIGNAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Why an outbound connection attempt did not produce a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// The peer refused the connection
    Refused(ConnectionResult),
    /// The peer refused the credit-based connection
    LeRefused(LeConnectionResult),
    /// The peer did not answer within [`SIGNAL_TIMEOUT`]
    Timeout,
    /// No free local channel identifier
    NoResources,
    /// The peer rejected the request command itself
    Rejected,
    /// Configuration after connecting failed or timed out
    ConfigurationFailed,
    /// The operation does not exist on this kind of link
    WrongLinkKind,
    /// The peer answered with an unusable channel identifier
    InvalidPeerChannel,
    /// The peer accepted with transfer parameters below the usable minimums
    UnacceptableParameters,
}

impl core::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ConnectError::Refused(result) => write!(f, "connection refused, {}", result),
            ConnectError::LeRefused(result) => write!(f, "connection refused, {}", result),
            ConnectError::Timeout => f.write_str("no response from the peer"),
            ConnectError::NoResources => f.write_str("no free local channel identifier"),
            ConnectError::Rejected => f.write_str("request rejected by the peer"),
            ConnectError::ConfigurationFailed => f.write_str("channel configuration failed"),
            ConnectError::WrongLinkKind => f.write_str("operation not available on this link"),
            ConnectError::InvalidPeerChannel => {
                f.write_str("peer answered with an unusable channel identifier")
            }
            ConnectError::UnacceptableParameters => {
                f.write_str("peer answered with unusable transfer parameters")
            }
        }
    }
}

impl std::error::Error for ConnectError {}
