//! Credit-based (LE) signalling manager
//!
//! Credit-based channels skip the configuration phase: the connection request and response carry
//! the MTU, the maximum payload size and the initial credit grant, and the channel is usable the
//! moment the success response is exchanged. Credits are returned to the peer with flow control
//! credit indications as the pipeline reports delivered frames.

use super::commands::OutgoingCommands;
use super::packets::{
    self, CommandReject, Disconnection, FlowControlCreditIndication,
    LeCreditBasedConnectionRequest, LeCreditBasedConnectionResponse, LeConnectionResult,
    RejectReason, SignalCode,
};
use super::{ConnectError, SIGNAL_TIMEOUT};
use crate::channel::id::{Cid, Psm, SignalId};
use crate::channel::CloseReason;
use crate::controller::{ChannelMode, CreditConfig};
use crate::link::{ChannelHandle, LinkCtx};
use crate::reactor::Handle;
use std::rc::Rc;

pub type ConnectCallback = Box<dyn FnOnce(Result<ChannelHandle, ConnectError>)>;

/// Smallest MTU either endpoint may offer for a credit-based channel
const MIN_LE_MTU: u16 = 23;

/// Smallest per-frame payload size either endpoint may offer
const MIN_LE_MPS: u16 = 23;

/// Largest per-frame payload size leaving room for the SDU length prefix
const MAX_LE_MPS: u16 = 65533;

fn parameters_in_range(mtu: u16, mps: u16) -> bool {
    mtu >= MIN_LE_MTU && (MIN_LE_MPS..=MAX_LE_MPS).contains(&mps)
}

enum Context {
    Connect {
        reserved: Cid,
        psm: Psm,
        on_result: ConnectCallback,
    },
    Disconnect {
        cid: Cid,
    },
}

pub struct LeSignalling {
    commands: OutgoingCommands<Context>,
    /// Transaction ids for credit indications, which expect no response
    indication_id: SignalId,
}

impl LeSignalling {
    pub fn new(handle: &Handle, on_timeout: Rc<dyn Fn()>) -> Self {
        LeSignalling {
            commands: OutgoingCommands::new(handle, SIGNAL_TIMEOUT, on_timeout),
            indication_id: SignalId::new(255).unwrap(),
        }
    }

    /// Open a credit-based channel to the peer's service `psm`
    pub(crate) fn connect(&mut self, ctx: &mut LinkCtx, psm: Psm, on_result: ConnectCallback) {
        let reserved = match ctx.dynamic.reserve() {
            Some(cid) => cid,
            None => {
                ctx.handle.post(move || on_result(Err(ConnectError::NoResources)));
                return;
            }
        };

        let request = LeCreditBasedConnectionRequest {
            spsm: psm.to_val(),
            source_cid: reserved.to_val(),
            mtu: ctx.config.mtu,
            mps: ctx.config.le_mps,
            initial_credits: ctx.config.initial_credits,
        };

        let frame = self.commands.submit(
            SignalCode::LeCreditBasedConnectionRequest,
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

    /// Return credits to the peer for frames delivered on channel `cid`
    pub(crate) fn replenish(&mut self, ctx: &mut LinkCtx, cid: Cid, credits: u16) {
        self.indication_id = self.indication_id.next();

        let indication = FlowControlCreditIndication {
            cid: cid.to_val(),
            credits,
        };

        ctx.send_signal(packets::encode(
            SignalCode::FlowControlCreditIndication,
            self.indication_id.get(),
            &indication.encode(),
        ));
    }

    /// Tear a channel down after a wire protocol violation
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

        teardown(ctx, cid, reason);
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
            Context::Disconnect { cid } => teardown(ctx, cid, CloseReason::LocalRequested),
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
                SignalCode::LeCreditBasedConnectionRequest => {
                    self.on_connection_request(ctx, signal.id, signal.data)
                }
                SignalCode::LeCreditBasedConnectionResponse => {
                    self.on_connection_response(ctx, signal.id, signal.data)
                }
                SignalCode::FlowControlCreditIndication => self.on_credit_indication(ctx, signal.data),
                SignalCode::DisconnectionRequest => {
                    self.on_disconnection_request(ctx, signal.id, signal.data)
                }
                SignalCode::DisconnectionResponse => self.on_disconnection_response(ctx, signal.id),
                SignalCode::CommandReject => self.on_command_reject(ctx, signal.id, signal.data),
                other => {
                    log::warn!(
                        "unsupported command {:#04x} on a credit-based link",
                        other.to_val()
                    );

                    send_reject(ctx, signal.id, RejectReason::CommandNotUnderstood);
                }
            }
        }
    }

    fn on_connection_request(&mut self, ctx: &mut LinkCtx, id: u8, data: &[u8]) {
        let request = match LeCreditBasedConnectionRequest::decode(data) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("malformed credit-based connection request, {}", e);
                send_reject(ctx, id, RejectReason::CommandNotUnderstood);
                return;
            }
        };

        let refuse = |ctx: &mut LinkCtx, result: LeConnectionResult| {
            let response = LeCreditBasedConnectionResponse {
                destination_cid: 0,
                mtu: 0,
                mps: 0,
                initial_credits: 0,
                result,
            };

            ctx.send_signal(packets::encode(
                SignalCode::LeCreditBasedConnectionResponse,
                id,
                &response.encode(),
            ));
        };

        let psm = match request.psm() {
            Ok(psm) => psm,
            Err(_) => return refuse(ctx, LeConnectionResult::SpsmNotSupported),
        };

        let (required, handler) = match ctx.services.lookup(psm) {
            Some(service) => service,
            None => return refuse(ctx, LeConnectionResult::SpsmNotSupported),
        };

        if required > ctx.config.security {
            return refuse(ctx, LeConnectionResult::InsufficientSecurity);
        }

        let remote = match Cid::try_from_raw(request.source_cid) {
            Ok(cid) if cid.is_dynamic() => cid,
            _ => return refuse(ctx, LeConnectionResult::InvalidSourceCid),
        };

        if ctx.dynamic.find_by_remote_cid(remote).is_some() {
            return refuse(ctx, LeConnectionResult::SourceCidAlreadyAllocated);
        }

        if !parameters_in_range(request.mtu, request.mps) {
            log::warn!(
                "refusing credit-based connection with out-of-range parameters \
                (mtu {}, mps {})",
                request.mtu,
                request.mps
            );

            return refuse(ctx, LeConnectionResult::UnacceptableParameters);
        }

        let channel = match ctx.dynamic.allocate(psm, remote) {
            Some(channel) => channel,
            None => return refuse(ctx, LeConnectionResult::NoResources),
        };

        let cid = channel.get_cid();

        log::info!("accepted credit-based connection to {} as channel {}", psm, cid);

        let response = LeCreditBasedConnectionResponse {
            destination_cid: cid.to_val(),
            mtu: ctx.config.mtu,
            mps: ctx.config.le_mps,
            initial_credits: ctx.config.initial_credits,
            result: LeConnectionResult::Success,
        };

        ctx.send_signal(packets::encode(
            SignalCode::LeCreditBasedConnectionResponse,
            id,
            &response.encode(),
        ));

        let mode = ChannelMode::CreditBased(CreditConfig {
            tx_mtu: request.mtu,
            rx_mtu: ctx.config.mtu,
            mps: request.mps,
            initial_peer_credits: request.initial_credits,
        });

        ctx.pipeline
            .attach(cid, remote, mode, channel.take_stack_end());

        let handle = ctx.make_handle(&channel);

        ctx.handle.post(move || handler(handle));
    }

    fn on_connection_response(&mut self, ctx: &mut LinkCtx, id: u8, data: &[u8]) {
        if !self
            .commands
            .matches(SignalCode::LeCreditBasedConnectionResponse, id)
        {
            log::warn!("unsolicited credit-based connection response (id {})", id);
            return;
        }

        let response = match LeCreditBasedConnectionResponse::decode(data) {
            Ok(response) => response,
            Err(e) => {
                log::warn!("malformed credit-based connection response, {}", e);
                return;
            }
        };

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

        if response.result != LeConnectionResult::Success {
            log::info!("credit-based connection to {} refused, {}", psm, response.result);

            ctx.dynamic.free(reserved);

            let result = response.result;

            ctx.handle
                .post(move || on_result(Err(ConnectError::LeRefused(result))));

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

        if !parameters_in_range(response.mtu, response.mps) {
            log::warn!(
                "credit-based connection to {} accepted with out-of-range parameters \
                (mtu {}, mps {}), disconnecting",
                psm,
                response.mtu,
                response.mps
            );

            ctx.dynamic.free(reserved);

            let request = Disconnection {
                destination_cid: response.destination_cid,
                source_cid: reserved.to_val(),
            };

            let frame = self.commands.submit(
                SignalCode::DisconnectionRequest,
                request.encode(),
                Context::Disconnect { cid: reserved },
            );

            if let Some(frame) = frame {
                ctx.send_signal(frame);
            }

            ctx.handle
                .post(move || on_result(Err(ConnectError::UnacceptableParameters)));

            return;
        }

        let channel = match ctx.dynamic.allocate_reserved(reserved, psm, remote) {
            Some(channel) => channel,
            None => {
                ctx.handle.post(move || on_result(Err(ConnectError::NoResources)));
                return;
            }
        };

        let cid = channel.get_cid();

        let mode = ChannelMode::CreditBased(CreditConfig {
            tx_mtu: response.mtu,
            rx_mtu: ctx.config.mtu,
            mps: response.mps,
            initial_peer_credits: response.initial_credits,
        });

        ctx.pipeline
            .attach(cid, remote, mode, channel.take_stack_end());

        let handle = ctx.make_handle(&channel);

        ctx.handle.post(move || on_result(Ok(handle)));
    }

    fn on_credit_indication(&mut self, ctx: &mut LinkCtx, data: &[u8]) {
        let indication = match FlowControlCreditIndication::decode(data) {
            Ok(indication) => indication,
            Err(e) => {
                log::warn!("malformed credit indication, {}", e);
                return;
            }
        };

        // the cid field names the sender's own channel, which is our remote cid
        let channel = Cid::try_from_raw(indication.cid)
            .ok()
            .and_then(|remote| ctx.dynamic.find_by_remote_cid(remote));

        match channel {
            Some(channel) => ctx.pipeline.on_credit(channel.get_cid(), indication.credits),
            None => log::warn!("credit indication for unknown channel {:#06x}", indication.cid),
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

        teardown(ctx, channel.get_cid(), CloseReason::PeerRequested);
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
            teardown(ctx, cid, CloseReason::LocalRequested);
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
            Context::Disconnect { cid } => teardown(ctx, cid, CloseReason::LocalRequested),
        }
    }
}

/// Release a channel: detach from the pipeline, free the identifiers, fire the close callback
fn teardown(ctx: &mut LinkCtx, cid: Cid, reason: CloseReason) {
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

fn send_reject(ctx: &mut LinkCtx, id: u8, reason: RejectReason) {
    let reject = CommandReject { reason };

    ctx.send_signal(packets::encode(SignalCode::CommandReject, id, &reject.encode()));
}
