//! Classic signalling manager
//!
//! Implements the request/response procedures for configured connection-oriented channels:
//! connection, configuration (with the four-phase per-channel state machine), disconnection,
//! echo and information. One request is in flight at a time through [`OutgoingCommands`]; inbound
//! commands are answered immediately.

use super::commands::OutgoingCommands;
use super::packets::{
    self, CommandReject, ConfigOption, ConfigResult, ConfigurationRequest, ConfigurationResponse,
    ConnectionRequest, ConnectionResponse, ConnectionResult, Disconnection, InfoType,
    InformationRequest, InformationResponse, RejectReason, SignalCode,
};
use super::{ConnectError, SIGNAL_TIMEOUT};
use crate::channel::id::{Cid, Psm};
use crate::channel::CloseReason;
use crate::controller::{ChannelMode, RetransmissionConfig, DEFAULT_MTU};
use crate::link::{ChannelHandle, LinkCtx, PreferredMode};
use crate::reactor::Handle;
use std::collections::HashMap;
use std::rc::Rc;

/// Feature mask answered to an extended-features information request: enhanced retransmission
/// mode, the frame check sequence option and fixed channel support.
const EXTENDED_FEATURES: [u8; 4] = [0xA8, 0, 0, 0];

/// Fixed channel mask answered to a fixed-channels information request: the signalling channel.
const FIXED_CHANNELS: [u8; 8] = [0x02, 0, 0, 0, 0, 0, 0, 0];

/// Smallest receive MTU a peer may advertise for a dynamic channel
const MIN_MTU: u16 = 48;

/// Smallest per-frame payload size accepted in a retransmission mode offer; the Start frame of a
/// segmented SDU spends two payload bytes on the declared length
const MIN_ERTM_MPS: u16 = 16;

/// Sequence numbers run modulo 64, so at most 63 frames fit in a transmit window
const MAX_TX_WINDOW: u8 = 63;

pub type ConnectCallback = Box<dyn FnOnce(Result<ChannelHandle, ConnectError>)>;
pub type EchoCallback = Box<dyn FnOnce(Option<Vec<u8>>)>;
pub type InfoCallback = Box<dyn FnOnce(Option<InformationResponse>)>;

enum Context {
    Connect {
        reserved: Cid,
        psm: Psm,
        on_result: ConnectCallback,
    },
    Configure {
        cid: Cid,
    },
    Disconnect {
        cid: Cid,
    },
    Echo {
        on_result: EchoCallback,
    },
    Information {
        on_result: InfoCallback,
    },
}

/// What to do with the channel handle once configuration completes
enum OpenAction {
    Connector(ConnectCallback),
    Service(Rc<dyn Fn(ChannelHandle)>),
}

/// Progress of the symmetric configuration exchange for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPhase {
    /// Neither our request answered nor the peer's request received
    AwaitingBoth,
    /// The peer's request was accepted, ours is not yet answered
    AwaitingResponse,
    /// Our request was answered, the peer's request is still to come
    AwaitingPeerRequest,
    Configured,
}

struct ChannelSetup {
    remote_cid: Cid,
    phase: ConfigPhase,
    /// The peer's advertised receive MTU, governing what we may send
    outbound_mtu: u16,
    /// Retransmission parameters from the peer's configuration request
    peer_rfc: Option<RetransmissionConfig>,
    fcs: bool,
    on_open: Option<OpenAction>,
}

pub struct ClassicSignalling {
    commands: OutgoingCommands<Context>,
    setups: HashMap<u16, ChannelSetup>,
}

impl ClassicSignalling {
    pub fn new(handle: &Handle, on_timeout: Rc<dyn Fn()>) -> Self {
        ClassicSignalling {
            commands: OutgoingCommands::new(handle, SIGNAL_TIMEOUT, on_timeout),
            setups: HashMap::new(),
        }
    }

    /// Open a channel to the peer's service `psm`
    pub(crate) fn connect(&mut self, ctx: &mut LinkCtx, psm: Psm, on_result: ConnectCallback) {
        let reserved = match ctx.dynamic.reserve() {
            Some(cid) => cid,
            None => {
                ctx.handle.post(move || on_result(Err(ConnectError::NoResources)));
                return;
            }
        };

        let request = ConnectionRequest {
            psm: psm.to_val(),
            source_cid: reserved.to_val(),
        };

        let frame = self.commands.submit(
            SignalCode::ConnectionRequest,
            request.encode(),
            Context::Connect {
                reserved,
                psm,
                on_result,
            },
        );

        if let Some(frame) = frame {
            ctx.send_signal(frame);
        }
    }

    /// Request disconnection of the open channel `cid`
    pub(crate) fn disconnect(&mut self, ctx: &mut LinkCtx, cid: Cid) {
        let channel = match ctx.dynamic.find_by_cid(cid) {
            Some(channel) => channel,
            None => {
                log::warn!("disconnect of unknown channel {}", cid);
                return;
            }
        };

        let request = Disconnection {
            destination_cid: channel.get_remote_cid().to_val(),
            source_cid: cid.to_val(),
        };

        let frame = self.commands.submit(
            SignalCode::DisconnectionRequest,
            request.encode(),
            Context::Disconnect { cid },
        );

        if let Some(frame) = frame {
            ctx.send_signal(frame);
        }
    }

    /// Send an echo request
    pub(crate) fn ping(&mut self, ctx: &mut LinkCtx, data: Vec<u8>, on_result: EchoCallback) {
        let frame = self
            .commands
            .submit(SignalCode::EchoRequest, data, Context::Echo { on_result });

        if let Some(frame) = frame {
            ctx.send_signal(frame);
        }
    }

    /// Query the peer's information data
    pub(crate) fn request_info(&mut self, ctx: &mut LinkCtx, info_type: InfoType, on_result: InfoCallback) {
        let request = InformationRequest { info_type };

        let frame = self.commands.submit(
            SignalCode::InformationRequest,
            request.encode(),
            Context::Information { on_result },
        );

        if let Some(frame) = frame {
            ctx.send_signal(frame);
        }
    }

    /// Tear a channel down after a wire protocol violation
    ///
    /// The pipeline has already detached the channel; this frees it, fires its close callback and
    /// tells the peer.
    pub(crate) fn force_teardown(&mut self, ctx: &mut LinkCtx, cid: Cid, reason: CloseReason) {
        let channel = match ctx.dynamic.find_by_cid(cid) {
            Some(channel) => channel,
            None => return,
        };

        let request = Disconnection {
            destination_cid: channel.get_remote_cid().to_val(),
            source_cid: cid.to_val(),
        };

        let frame = self.commands.submit(
            SignalCode::DisconnectionRequest,
            request.encode(),
            Context::Disconnect { cid },
        );

        if let Some(frame) = frame {
            ctx.send_signal(frame);
        }

        self.teardown(ctx, cid, reason);
    }

    /// The response timeout of the outstanding request fired
    pub(crate) fn on_timeout(&mut self, ctx: &mut LinkCtx) {
        let (code, context, next) = match self.commands.take_timed_out() {
            Some(timed_out) => timed_out,
            None => return,
        };

        log::warn!("signalling request {:#04x} timed out", code.to_val());

        match context {
            Context::Connect {
                reserved, on_result, ..
            } => {
                ctx.dynamic.free(reserved);

                ctx.handle.post(move || on_result(Err(ConnectError::Timeout)));
            }
            Context::Configure { cid } => {
                // configuration timeouts escalate to disconnection
                self.fail_setup(ctx, cid, CloseReason::ResponseTimeout, ConnectError::Timeout);
            }
            Context::Disconnect { cid } => {
                // the peer is unresponsive, finish the teardown locally
                self.teardown(ctx, cid, CloseReason::LocalRequested);
            }
            Context::Echo { on_result } => ctx.handle.post(move || on_result(None)),
            Context::Information { on_result } => ctx.handle.post(move || on_result(None)),
        }

        if let Some(frame) = next {
            ctx.send_signal(frame);
        }
    }

    /// Process one control frame from the signalling channel
    pub(crate) fn on_control_frame(&mut self, ctx: &mut LinkCtx, sdu: &[u8]) {
        for signal in packets::iter(sdu) {
            let code = match signal.code {
                Ok(code) => code,
                Err(e) => {
                    log::warn!("{}", e);
                    send_reject(ctx, signal.id, RejectReason::CommandNotUnderstood);
                    continue;
                }
            };

            match code {
                SignalCode::ConnectionRequest => {
                    self.on_connection_request(ctx, signal.id, signal.data)
                }
                SignalCode::ConnectionResponse => {
                    self.on_connection_response(ctx, signal.id, signal.data)
                }
                SignalCode::ConfigurationRequest => {
                    self.on_configuration_request(ctx, signal.id, signal.data)
                }
                SignalCode::ConfigurationResponse => {
                    self.on_configuration_response(ctx, signal.id, signal.data)
                }
                SignalCode::DisconnectionRequest => {
                    self.on_disconnection_request(ctx, signal.id, signal.data)
                }
                SignalCode::DisconnectionResponse => self.on_disconnection_response(ctx, signal.id),
                SignalCode::EchoRequest => {
                    ctx.send_signal(packets::encode(SignalCode::EchoResponse, signal.id, signal.data))
                }
                SignalCode::EchoResponse => self.on_echo_response(ctx, signal.id, signal.data),
                SignalCode::InformationRequest => {
                    self.on_information_request(ctx, signal.id, signal.data)
                }
                SignalCode::InformationResponse => {
                    self.on_information_response(ctx, signal.id, signal.data)
                }
                SignalCode::CommandReject => self.on_command_reject(ctx, signal.id, signal.data),
                SignalCode::LeCreditBasedConnectionRequest
                | SignalCode::LeCreditBasedConnectionResponse
                | SignalCode::FlowControlCreditIndication => {
                    log::warn!("credit-based command {:#04x} on a classic link", code.to_val());
                    send_reject(ctx, signal.id, RejectReason::CommandNotUnderstood);
                }
            }
        }
    }

    fn on_connection_request(&mut self, ctx: &mut LinkCtx, id: u8, data: &[u8]) {
        let request = match ConnectionRequest::decode(data) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("malformed connection request, {}", e);
                send_reject(ctx, id, RejectReason::CommandNotUnderstood);
                return;
            }
        };

        let respond = |ctx: &mut LinkCtx, result: ConnectionResult, dcid: u16| {
            let response = ConnectionResponse {
                destination_cid: dcid,
                source_cid: request.source_cid,
                result,
                status: 0,
            };

            ctx.send_signal(packets::encode(
                SignalCode::ConnectionResponse,
                id,
                &response.encode(),
            ));
        };

        let psm = match Psm::new(request.psm) {
            Ok(psm) => psm,
            Err(_) => return respond(ctx, ConnectionResult::PsmNotSupported, 0),
        };

        let (required, handler) = match ctx.services.lookup(psm) {
            Some(service) => service,
            None => return respond(ctx, ConnectionResult::PsmNotSupported, 0),
        };

        if required > ctx.config.security {
            return respond(ctx, ConnectionResult::SecurityBlock, 0);
        }

        let remote = match Cid::try_from_raw(request.source_cid) {
            Ok(cid) if cid.is_dynamic() => cid,
            _ => return respond(ctx, ConnectionResult::InvalidSourceCid, 0),
        };

        if ctx.dynamic.find_by_remote_cid(remote).is_some() {
            return respond(ctx, ConnectionResult::SourceCidAlreadyAllocated, 0);
        }

        let channel = match ctx.dynamic.allocate(psm, remote) {
            Some(channel) => channel,
            None => return respond(ctx, ConnectionResult::NoResources, 0),
        };

        let cid = channel.get_cid();

        log::info!("accepted connection to {} as channel {}", psm, cid);

        respond(ctx, ConnectionResult::Success, cid.to_val());

        self.begin_configuration(ctx, cid, remote, OpenAction::Service(handler));
    }

    fn on_connection_response(&mut self, ctx: &mut LinkCtx, id: u8, data: &[u8]) {
        if !self.commands.matches(SignalCode::ConnectionResponse, id) {
            log::warn!("unsolicited connection response (id {})", id);
            return;
        }

        let response = match ConnectionResponse::decode(data) {
            Ok(response) => response,
            Err(e) => {
                log::warn!("malformed connection response, {}", e);
                return;
            }
        };

        if response.result == ConnectionResult::Pending {
            self.commands.re_arm();
            return;
        }

        let (context, next) = self.commands.complete();

        if let Some(frame) = next {
            ctx.send_signal(frame);
        }

        let (reserved, psm, on_result) = match context {
            Context::Connect {
                reserved,
                psm,
                on_result,
            } => (reserved, psm, on_result),
            _ => unreachable!("matched response kind to outstanding request"),
        };

        if response.result != ConnectionResult::Success {
            log::info!("connection to {} refused, {}", psm, response.result);

            ctx.dynamic.free(reserved);

            let result = response.result;

            ctx.handle
                .post(move || on_result(Err(ConnectError::Refused(result))));

            return;
        }

        let remote = match Cid::try_from_raw(response.destination_cid) {
            Ok(cid) if cid.is_dynamic() => cid,
            _ => {
                ctx.dynamic.free(reserved);

                ctx.handle
                    .post(move || on_result(Err(ConnectError::InvalidPeerChannel)));

                return;
            }
        };

        match ctx.dynamic.allocate_reserved(reserved, psm, remote) {
            Some(channel) => {
                let cid = channel.get_cid();

                self.begin_configuration(ctx, cid, remote, OpenAction::Connector(on_result));
            }
            None => {
                ctx.handle.post(move || on_result(Err(ConnectError::NoResources)));
            }
        }
    }

    /// Start the configuration exchange for a freshly connected channel
    fn begin_configuration(&mut self, ctx: &mut LinkCtx, cid: Cid, remote: Cid, on_open: OpenAction) {
        self.setups.insert(
            cid.to_val(),
            ChannelSetup {
                remote_cid: remote,
                phase: ConfigPhase::AwaitingBoth,
                outbound_mtu: DEFAULT_MTU,
                peer_rfc: None,
                fcs: true,
                on_open: Some(on_open),
            },
        );

        self.submit_configuration_request(ctx, cid, remote);
    }

    /// Queue our configuration request for the channel, advertising this link's preferences
    fn submit_configuration_request(&mut self, ctx: &mut LinkCtx, cid: Cid, remote: Cid) {
        let mut options = vec![ConfigOption::Mtu(ctx.config.mtu)];

        if let PreferredMode::EnhancedRetransmission(params) = ctx.config.mode {
            options.push(ConfigOption::RetransmissionAndFlowControl {
                mode: ConfigOption::MODE_ENHANCED_RETRANSMISSION,
                tx_window: params.tx_window,
                max_transmit: params.max_transmit,
                retransmission_timeout: params.retransmission_timeout,
                monitor_timeout: params.monitor_timeout,
                mps: params.mps,
            });
        }

        let request = ConfigurationRequest {
            destination_cid: remote.to_val(),
            flags: 0,
            options,
        };

        let frame = self.commands.submit(
            SignalCode::ConfigurationRequest,
            request.encode(),
            Context::Configure { cid },
        );

        if let Some(frame) = frame {
            ctx.send_signal(frame);
        }
    }

    fn on_configuration_request(&mut self, ctx: &mut LinkCtx, id: u8, data: &[u8]) {
        let (request, option_bytes) = match ConfigurationRequest::decode(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("malformed configuration request, {}", e);
                send_reject(ctx, id, RejectReason::CommandNotUnderstood);
                return;
            }
        };

        let cid = Cid::try_from_raw(request.destination_cid).ok();

        let setup = match cid.and_then(|cid| self.setups.get_mut(&cid.to_val())) {
            Some(setup) => setup,
            None => {
                log::warn!(
                    "configuration request for unknown channel {:#06x}",
                    request.destination_cid
                );

                send_reject(
                    ctx,
                    id,
                    RejectReason::InvalidCid {
                        local: request.destination_cid,
                        remote: 0,
                    },
                );

                return;
            }
        };

        let remote = setup.remote_cid;
        let source_cid = remote.to_val();

        let respond = |ctx: &mut LinkCtx, result: ConfigResult, options: Vec<ConfigOption>| {
            let response = ConfigurationResponse {
                source_cid,
                flags: 0,
                result,
                options,
            };

            ctx.send_signal(packets::encode(
                SignalCode::ConfigurationResponse,
                id,
                &response.encode(),
            ));
        };

        let (options, unknown) = match packets::parse_options(option_bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("unparsable configuration options, {}", e);
                respond(ctx, ConfigResult::Rejected, Vec::new());
                return;
            }
        };

        if !unknown.is_empty() {
            let unknown = unknown
                .into_iter()
                .map(|option_type| ConfigOption::Unknown {
                    option_type,
                    data: Vec::new(),
                })
                .collect();

            respond(ctx, ConfigResult::UnknownOptions, unknown);
            return;
        }

        // out-of-range parameters are answered with the nearest acceptable values and nothing
        // of the request is applied
        let mut corrected = Vec::new();

        for option in &options {
            match option {
                ConfigOption::Mtu(mtu) if *mtu < MIN_MTU => {
                    corrected.push(ConfigOption::Mtu(MIN_MTU));
                }
                ConfigOption::RetransmissionAndFlowControl {
                    mode,
                    tx_window,
                    max_transmit,
                    retransmission_timeout,
                    monitor_timeout,
                    mps,
                } if *mode == ConfigOption::MODE_ENHANCED_RETRANSMISSION
                    && (*mps < MIN_ERTM_MPS || *tx_window == 0 || *tx_window > MAX_TX_WINDOW) =>
                {
                    corrected.push(ConfigOption::RetransmissionAndFlowControl {
                        mode: *mode,
                        tx_window: (*tx_window).clamp(1, MAX_TX_WINDOW),
                        max_transmit: *max_transmit,
                        retransmission_timeout: *retransmission_timeout,
                        monitor_timeout: *monitor_timeout,
                        mps: (*mps).max(MIN_ERTM_MPS),
                    });
                }
                _ => {}
            }
        }

        if !corrected.is_empty() {
            log::warn!(
                "channel {:#06x}: configuration request with out-of-range parameters",
                request.destination_cid
            );

            respond(ctx, ConfigResult::UnacceptableParameters, corrected);
            return;
        }

        for option in &options {
            match option {
                ConfigOption::Mtu(mtu) => setup.outbound_mtu = *mtu,
                ConfigOption::FlushTimeout(_) => {}
                ConfigOption::RetransmissionAndFlowControl {
                    mode,
                    tx_window,
                    max_transmit,
                    retransmission_timeout,
                    monitor_timeout,
                    mps,
                } => {
                    if *mode == ConfigOption::MODE_ENHANCED_RETRANSMISSION {
                        setup.peer_rfc = Some(RetransmissionConfig {
                            tx_mtu: setup.outbound_mtu,
                            rx_mtu: ctx.config.mtu,
                            mps: *mps,
                            tx_window: *tx_window,
                            max_transmit: *max_transmit,
                            retransmission_timeout: *retransmission_timeout,
                            monitor_timeout: *monitor_timeout,
                            fcs: setup.fcs,
                        });
                    } else {
                        setup.peer_rfc = None;
                    }
                }
                ConfigOption::Fcs(enabled) => setup.fcs = *enabled,
                ConfigOption::Unknown { .. } => {}
            }
        }

        // accept by echoing the requested options back
        respond(ctx, ConfigResult::Success, options);

        let cid = match cid {
            Some(cid) => cid,
            None => return,
        };

        match self.setups.get(&cid.to_val()).map(|setup| setup.phase) {
            Some(ConfigPhase::AwaitingBoth) => {
                self.setups.get_mut(&cid.to_val()).unwrap().phase = ConfigPhase::AwaitingResponse;
            }
            Some(ConfigPhase::AwaitingPeerRequest) => self.finish_configuration(ctx, cid),
            Some(ConfigPhase::Configured) => {
                // the peer reopened negotiation on a live channel; both directions exchange
                // requests again and the channel is reconfigured when ours is answered
                self.setups.get_mut(&cid.to_val()).unwrap().phase = ConfigPhase::AwaitingResponse;

                self.submit_configuration_request(ctx, cid, remote);
            }
            // a repeated request before both directions settle re-accepts without a phase change
            _ => {}
        }
    }

    fn on_configuration_response(&mut self, ctx: &mut LinkCtx, id: u8, data: &[u8]) {
        if !self.commands.matches(SignalCode::ConfigurationResponse, id) {
            log::warn!("unsolicited configuration response (id {})", id);
            return;
        }

        let (response, _options) = match ConfigurationResponse::decode(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("malformed configuration response, {}", e);
                return;
            }
        };

        if response.result == ConfigResult::Pending {
            self.commands.re_arm();
            return;
        }

        let (context, next) = self.commands.complete();

        if let Some(frame) = next {
            ctx.send_signal(frame);
        }

        let cid = match context {
            Context::Configure { cid } => cid,
            _ => unreachable!("matched response kind to outstanding request"),
        };

        match response.result {
            ConfigResult::Success => match self.setups.get_mut(&cid.to_val()).map(|s| &mut s.phase) {
                Some(phase @ ConfigPhase::AwaitingBoth) => *phase = ConfigPhase::AwaitingPeerRequest,
                Some(phase @ ConfigPhase::AwaitingResponse) => {
                    *phase = ConfigPhase::Configured;
                    self.finish_configuration(ctx, cid);
                }
                _ => log::warn!("configuration response for channel {} in no setup", cid),
            },
            refused => {
                log::warn!("channel {} configuration refused ({:?})", cid, refused);

                self.fail_setup(
                    ctx,
                    cid,
                    CloseReason::ConfigurationFailed,
                    ConnectError::ConfigurationFailed,
                );
            }
        }
    }

    /// Both configuration directions completed: open the channel for the user
    fn finish_configuration(&mut self, ctx: &mut LinkCtx, cid: Cid) {
        let setup = match self.setups.get_mut(&cid.to_val()) {
            Some(setup) => setup,
            None => return,
        };

        setup.phase = ConfigPhase::Configured;

        let mode = match (setup.peer_rfc, &ctx.config.mode) {
            (Some(mut params), _) => {
                params.tx_mtu = setup.outbound_mtu;
                params.rx_mtu = ctx.config.mtu;
                params.fcs = setup.fcs;

                ChannelMode::EnhancedRetransmission(params)
            }
            (None, PreferredMode::EnhancedRetransmission(params)) => {
                let mut params = *params;

                params.tx_mtu = setup.outbound_mtu;
                params.rx_mtu = ctx.config.mtu;
                params.fcs = setup.fcs;

                ChannelMode::EnhancedRetransmission(params)
            }
            (None, PreferredMode::Basic) => ChannelMode::Basic {
                tx_mtu: setup.outbound_mtu,
                rx_mtu: ctx.config.mtu,
            },
        };

        if ctx.pipeline.is_attached(cid) {
            // renegotiation of a live channel replaces its controller in place
            log::info!("channel {} reconfigured, {:?}", cid, DataControllerKind(&mode));

            ctx.pipeline.update_configuration(cid, mode);

            return;
        }

        let channel = match ctx.dynamic.find_by_cid(cid) {
            Some(channel) => channel,
            None => {
                log::warn!("configured channel {} has no allocation", cid);
                return;
            }
        };

        log::info!("channel {} configured, {:?}", cid, DataControllerKind(&mode));

        ctx.pipeline
            .attach(cid, setup.remote_cid, mode, channel.take_stack_end());

        let handle = ctx.make_handle(&channel);

        match setup.on_open.take() {
            Some(OpenAction::Connector(on_result)) => {
                ctx.handle.post(move || on_result(Ok(handle)));
            }
            Some(OpenAction::Service(on_channel)) => {
                ctx.handle.post(move || on_channel(handle));
            }
            None => log::warn!("channel {} configured twice", cid),
        }
    }

    fn on_disconnection_request(&mut self, ctx: &mut LinkCtx, id: u8, data: &[u8]) {
        let request = match Disconnection::decode(data) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("malformed disconnection request, {}", e);
                send_reject(ctx, id, RejectReason::CommandNotUnderstood);
                return;
            }
        };

        let channel = Cid::try_from_raw(request.destination_cid)
            .ok()
            .and_then(|cid| ctx.dynamic.find_by_cid(cid))
            .filter(|channel| channel.get_remote_cid().to_val() == request.source_cid);

        let channel = match channel {
            Some(channel) => channel,
            None => {
                send_reject(
                    ctx,
                    id,
                    RejectReason::InvalidCid {
                        local: request.destination_cid,
                        remote: request.source_cid,
                    },
                );

                return;
            }
        };

        ctx.send_signal(packets::encode(
            SignalCode::DisconnectionResponse,
            id,
            &request.encode(),
        ));

        self.teardown(ctx, channel.get_cid(), CloseReason::PeerRequested);
    }

    fn on_disconnection_response(&mut self, ctx: &mut LinkCtx, id: u8) {
        if !self.commands.matches(SignalCode::DisconnectionResponse, id) {
            log::warn!("unsolicited disconnection response (id {})", id);
            return;
        }

        let (context, next) = self.commands.complete();

        if let Some(frame) = next {
            ctx.send_signal(frame);
        }

        if let Context::Disconnect { cid } = context {
            self.teardown(ctx, cid, CloseReason::LocalRequested);
        }
    }

    fn on_echo_response(&mut self, ctx: &mut LinkCtx, id: u8, data: &[u8]) {
        if !self.commands.matches(SignalCode::EchoResponse, id) {
            log::warn!("unsolicited echo response (id {})", id);
            return;
        }

        let (context, next) = self.commands.complete();

        if let Some(frame) = next {
            ctx.send_signal(frame);
        }

        if let Context::Echo { on_result } = context {
            let data = data.to_vec();

            ctx.handle.post(move || on_result(Some(data)));
        }
    }

    fn on_information_request(&mut self, ctx: &mut LinkCtx, id: u8, data: &[u8]) {
        let request = match InformationRequest::decode(data) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("malformed information request, {}", e);
                send_reject(ctx, id, RejectReason::CommandNotUnderstood);
                return;
            }
        };

        let response = match request.info_type {
            InfoType::ExtendedFeatures => InformationResponse {
                info_type: request.info_type,
                result: 0x0000,
                data: EXTENDED_FEATURES.to_vec(),
            },
            InfoType::FixedChannels => InformationResponse {
                info_type: request.info_type,
                result: 0x0000,
                data: FIXED_CHANNELS.to_vec(),
            },
            InfoType::ConnectionlessMtu => InformationResponse {
                info_type: request.info_type,
                result: 0x0001,
                data: Vec::new(),
            },
        };

        ctx.send_signal(packets::encode(
            SignalCode::InformationResponse,
            id,
            &response.encode(),
        ));
    }

    fn on_information_response(&mut self, ctx: &mut LinkCtx, id: u8, data: &[u8]) {
        if !self.commands.matches(SignalCode::InformationResponse, id) {
            log::warn!("unsolicited information response (id {})", id);
            return;
        }

        let (context, next) = self.commands.complete();

        if let Some(frame) = next {
            ctx.send_signal(frame);
        }

        if let Context::Information { on_result } = context {
            let response = InformationResponse::decode(data).ok();

            ctx.handle.post(move || on_result(response));
        }
    }

    fn on_command_reject(&mut self, ctx: &mut LinkCtx, id: u8, data: &[u8]) {
        match CommandReject::decode(data) {
            Ok(reject) => log::warn!("peer rejected command {}: {:?}", id, reject.reason),
            Err(e) => log::warn!("malformed command reject, {}", e),
        }

        if !self.commands.matches_reject(id) {
            return;
        }

        let (context, next) = self.commands.complete();

        if let Some(frame) = next {
            ctx.send_signal(frame);
        }

        match context {
            Context::Connect {
                reserved, on_result, ..
            } => {
                ctx.dynamic.free(reserved);

                ctx.handle.post(move || on_result(Err(ConnectError::Rejected)));
            }
            Context::Configure { cid } => {
                self.fail_setup(
                    ctx,
                    cid,
                    CloseReason::ConfigurationFailed,
                    ConnectError::ConfigurationFailed,
                );
            }
            Context::Disconnect { cid } => self.teardown(ctx, cid, CloseReason::LocalRequested),
            Context::Echo { on_result } => ctx.handle.post(move || on_result(None)),
            Context::Information { on_result } => ctx.handle.post(move || on_result(None)),
        }
    }

    /// Abandon a channel mid-configuration: tell the peer, free everything, fail the opener
    fn fail_setup(
        &mut self,
        ctx: &mut LinkCtx,
        cid: Cid,
        close_reason: CloseReason,
        connect_error: ConnectError,
    ) {
        if let Some(channel) = ctx.dynamic.find_by_cid(cid) {
            let request = Disconnection {
                destination_cid: channel.get_remote_cid().to_val(),
                source_cid: cid.to_val(),
            };

            let frame = self.commands.submit(
                SignalCode::DisconnectionRequest,
                request.encode(),
                Context::Disconnect { cid },
            );

            if let Some(frame) = frame {
                ctx.send_signal(frame);
            }
        }

        if let Some(setup) = self.setups.get_mut(&cid.to_val()) {
            if let Some(OpenAction::Connector(on_result)) = setup.on_open.take() {
                ctx.handle.post(move || on_result(Err(connect_error)));
            }
        }

        self.teardown(ctx, cid, close_reason);
    }

    /// Release a channel: detach from the pipeline, free the identifiers, fire the close callback
    fn teardown(&mut self, ctx: &mut LinkCtx, cid: Cid, reason: CloseReason) {
        self.setups.remove(&cid.to_val());

        if ctx.pipeline.is_attached(cid) {
            ctx.pipeline.detach(cid);
        }

        if ctx.dynamic.find_by_cid(cid).is_some() {
            if let Some(channel) = ctx.dynamic.free(cid) {
                if !channel.is_closed() {
                    channel.close(reason);
                }
            }
        }
    }
}

/// Debug label for the negotiated mode in the configuration log line
struct DataControllerKind<'a>(&'a ChannelMode);

impl core::fmt::Debug for DataControllerKind<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self.0 {
            ChannelMode::Basic { tx_mtu, rx_mtu } => {
                write!(f, "basic mode (mtu {} out, {} in)", tx_mtu, rx_mtu)
            }
            ChannelMode::EnhancedRetransmission(params) => write!(
                f,
                "retransmission mode (mtu {} out, window {})",
                params.tx_mtu, params.tx_window
            ),
            ChannelMode::CreditBased(params) => {
                write!(f, "credit-based mode (mtu {} out)", params.tx_mtu)
            }
        }
    }
}

fn send_reject(ctx: &mut LinkCtx, id: u8, reason: RejectReason) {
    let reject = CommandReject { reason };

    ctx.send_signal(packets::encode(SignalCode::CommandReject, id, &reject.encode()));
}
