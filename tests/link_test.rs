//! Whole-link tests
//!
//! Each test stands up one or two engines on a shared reactor and shuttles raw frames between
//! their transport endpoints by hand, so every byte crossing the "wire" is observable.

use linkmux::pdu::basic_frame::BasicFrame;
use linkmux::signals::packets::{
    self, ConfigOption, ConfigResult, ConfigurationRequest, ConfigurationResponse,
    ConnectionRequest, ConnectionResponse, ConnectionResult, Disconnection, InfoType,
    LeConnectionResult, LeCreditBasedConnectionRequest, LeCreditBasedConnectionResponse,
    SignalCode,
};
use linkmux::{
    ChannelHandle, Cid, CloseReason, ConnectError, Link, LinkConfig, LinkKind, PreferredMode, Psm,
    Reactor, RetransmissionConfig, SecurityLevel, TransportEndpoint,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Ferry frames between the two endpoints until neither side has anything left to say
fn shuttle(reactor: &Reactor, a: &TransportEndpoint, b: &TransportEndpoint) {
    loop {
        reactor.run_until_idle();

        let mut moved = false;

        while let Some(frame) = a.take_outbound() {
            b.deliver(frame).unwrap();
            moved = true;
        }

        while let Some(frame) = b.take_outbound() {
            a.deliver(frame).unwrap();
            moved = true;
        }

        if !moved {
            break;
        }
    }

    reactor.run_until_idle();
}

fn drain(transport: &TransportEndpoint) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();

    while let Some(frame) = transport.take_outbound() {
        frames.push(frame);
    }

    frames
}

fn psm() -> Psm {
    Psm::new(0x0003).unwrap()
}

fn pair(
    reactor: &Reactor,
    kind: LinkKind,
    config: LinkConfig,
) -> (Link, TransportEndpoint, Link, TransportEndpoint) {
    let (a, ta) = Link::new(&reactor.handle(), kind, config);
    let (b, tb) = Link::new(&reactor.handle(), kind, config);

    (a, ta, b, tb)
}

/// Register a service on `b`, connect from `a` and run the handshake to completion
fn open_channel(
    reactor: &Reactor,
    a: &Link,
    ta: &TransportEndpoint,
    b: &Link,
    tb: &TransportEndpoint,
    kind: LinkKind,
) -> (ChannelHandle, ChannelHandle) {
    let accepted = Rc::new(RefCell::new(None));

    let accepted_clone = accepted.clone();

    b.register_service(psm(), SecurityLevel::None, move |channel| {
        *accepted_clone.borrow_mut() = Some(channel);
    })
    .unwrap();

    let connected = Rc::new(RefCell::new(None));

    let connected_clone = connected.clone();

    let on_result = move |result| *connected_clone.borrow_mut() = Some(result);

    match kind {
        LinkKind::Classic => a.connect(psm(), on_result),
        LinkKind::Le => a.connect_le(psm(), on_result),
    }

    shuttle(reactor, ta, tb);

    let initiator = connected.borrow_mut().take().expect("connect did not complete").unwrap();
    let acceptor = accepted.borrow_mut().take().expect("service was not invoked");

    (initiator, acceptor)
}

#[test]
fn classic_connection_opens_for_both_sides() {
    let reactor = Reactor::new();
    let (a, ta, b, tb) = pair(&reactor, LinkKind::Classic, LinkConfig::default());

    let (initiator, acceptor) = open_channel(&reactor, &a, &ta, &b, &tb, LinkKind::Classic);

    assert_eq!(initiator.get_psm(), psm());
    assert_eq!(acceptor.get_psm(), psm());

    // each side's peer identifier is the other side's local identifier
    assert_eq!(initiator.get_peer_cid(), acceptor.get_cid());
    assert_eq!(acceptor.get_peer_cid(), initiator.get_cid());
}

#[test]
fn classic_sdu_crosses_as_one_frame() {
    let reactor = Reactor::new();
    let (a, ta, b, tb) = pair(&reactor, LinkKind::Classic, LinkConfig::default());

    let (initiator, acceptor) = open_channel(&reactor, &a, &ta, &b, &tb, LinkKind::Classic);

    initiator.send(b"hello".to_vec()).unwrap();

    reactor.run_until_idle();

    let frames = drain(&ta);

    assert_eq!(frames.len(), 1);

    let frame = BasicFrame::try_from_raw(&frames[0]).unwrap();

    assert_eq!(frame.get_cid(), acceptor.get_cid());
    assert_eq!(frame.get_payload(), b"hello");

    tb.deliver(frames.into_iter().next().unwrap()).unwrap();

    reactor.run_until_idle();

    assert_eq!(acceptor.try_recv(), Some(b"hello".to_vec()));
}

#[test]
fn connect_to_unregistered_service_is_refused() {
    let reactor = Reactor::new();
    let (a, ta, _b, tb) = pair(&reactor, LinkKind::Classic, LinkConfig::default());

    let result = Rc::new(RefCell::new(None));

    let result_clone = result.clone();

    a.connect(psm(), move |r| *result_clone.borrow_mut() = Some(r));

    shuttle(&reactor, &ta, &tb);

    assert_eq!(
        result.borrow_mut().take().unwrap().err(),
        Some(ConnectError::Refused(ConnectionResult::PsmNotSupported))
    );
}

#[test]
fn connect_with_the_wrong_link_kind_fails_locally() {
    let reactor = Reactor::new();
    let (a, ta, _b, tb) = pair(&reactor, LinkKind::Classic, LinkConfig::default());

    let result = Rc::new(RefCell::new(None));

    let result_clone = result.clone();

    a.connect_le(psm(), move |r| *result_clone.borrow_mut() = Some(r));

    shuttle(&reactor, &ta, &tb);

    assert_eq!(
        result.borrow_mut().take().unwrap().err(),
        Some(ConnectError::WrongLinkKind)
    );
}

#[test]
fn echo_round_trip() {
    let reactor = Reactor::new();
    let (a, ta, _b, tb) = pair(&reactor, LinkKind::Classic, LinkConfig::default());

    let echoed = Rc::new(RefCell::new(None));

    let echoed_clone = echoed.clone();

    a.ping(b"are you there".to_vec(), move |reply| {
        *echoed_clone.borrow_mut() = Some(reply)
    });

    shuttle(&reactor, &ta, &tb);

    assert_eq!(
        echoed.borrow_mut().take(),
        Some(Some(b"are you there".to_vec()))
    );
}

#[test]
fn information_request_reports_extended_features() {
    let reactor = Reactor::new();
    let (a, ta, _b, tb) = pair(&reactor, LinkKind::Classic, LinkConfig::default());

    let answer = Rc::new(RefCell::new(None));

    let answer_clone = answer.clone();

    a.request_info(InfoType::ExtendedFeatures, move |response| {
        *answer_clone.borrow_mut() = Some(response)
    });

    shuttle(&reactor, &ta, &tb);

    let response = answer.borrow_mut().take().unwrap().unwrap();

    assert_eq!(response.info_type, InfoType::ExtendedFeatures);
    assert_eq!(response.result, 0);
    assert_eq!(response.data.len(), 4);
}

/// Pull the signalling commands out of a raw frame
fn signals_of(raw: &[u8]) -> Vec<(SignalCode, u8, Vec<u8>)> {
    let frame = BasicFrame::try_from_raw(raw).unwrap();

    assert!(matches!(frame.get_cid(), Cid::SIGNALLING | Cid::LE_SIGNALLING));

    packets::iter(frame.get_payload())
        .map(|signal| (signal.code.unwrap(), signal.id, signal.data.to_vec()))
        .collect()
}

fn signal_frame(code: SignalCode, id: u8, payload: &[u8]) -> Vec<u8> {
    BasicFrame::new(packets::encode(code, id, payload), Cid::SIGNALLING).into_raw()
}

fn le_signal_frame(code: SignalCode, id: u8, payload: &[u8]) -> Vec<u8> {
    BasicFrame::new(packets::encode(code, id, payload), Cid::LE_SIGNALLING).into_raw()
}

#[test]
fn unanswered_configuration_tears_the_channel_down() {
    let reactor = Reactor::new();

    let (a, ta) = Link::new(&reactor.handle(), LinkKind::Classic, LinkConfig::default());

    let result = Rc::new(RefCell::new(None));

    let result_clone = result.clone();

    a.connect(psm(), move |r| *result_clone.borrow_mut() = Some(r));

    reactor.run_until_idle();

    // the engine opens with a connection request
    let frames = drain(&ta);
    assert_eq!(frames.len(), 1);

    let (code, id, data) = signals_of(&frames[0]).remove(0);
    assert_eq!(code, SignalCode::ConnectionRequest);

    let request = ConnectionRequest::decode(&data).unwrap();
    assert_eq!(request.source_cid, 0x0040);

    // play the peer: accept the connection...
    let response = ConnectionResponse {
        destination_cid: 0x0060,
        source_cid: request.source_cid,
        result: ConnectionResult::Success,
        status: 0,
    };

    ta.deliver(signal_frame(SignalCode::ConnectionResponse, id, &response.encode()))
        .unwrap();

    reactor.run_until_idle();

    // ...which makes the engine ask for configuration, and never answer that
    let frames = drain(&ta);
    assert_eq!(frames.len(), 1);
    assert_eq!(signals_of(&frames[0])[0].0, SignalCode::ConfigurationRequest);

    reactor.advance(Duration::from_millis(2100));
    reactor.run_until_idle();

    assert_eq!(
        result.borrow_mut().take().unwrap().err(),
        Some(ConnectError::Timeout)
    );

    // the engine gives the half-open channel up
    let frames = drain(&ta);
    assert_eq!(frames.len(), 1);

    let (code, id, data) = signals_of(&frames[0]).remove(0);
    assert_eq!(code, SignalCode::DisconnectionRequest);

    let disconnection = Disconnection::decode(&data).unwrap();
    assert_eq!(disconnection.destination_cid, 0x0060);
    assert_eq!(disconnection.source_cid, 0x0040);

    ta.deliver(signal_frame(SignalCode::DisconnectionResponse, id, &data))
        .unwrap();

    reactor.run_until_idle();

    // the identifier went back to the pool
    a.connect(psm(), |_| {});

    reactor.run_until_idle();

    let frames = drain(&ta);
    assert_eq!(frames.len(), 1);

    let (code, _, data) = signals_of(&frames[0]).remove(0);
    assert_eq!(code, SignalCode::ConnectionRequest);
    assert_eq!(ConnectionRequest::decode(&data).unwrap().source_cid, 0x0040);
}

#[test]
fn closed_channel_reports_the_reason_on_both_sides() {
    let reactor = Reactor::new();
    let (a, ta, b, tb) = pair(&reactor, LinkKind::Classic, LinkConfig::default());

    let (initiator, acceptor) = open_channel(&reactor, &a, &ta, &b, &tb, LinkKind::Classic);

    let local = Rc::new(RefCell::new(None));
    let remote = Rc::new(RefCell::new(None));

    let local_clone = local.clone();
    initiator.set_on_close(move |reason| *local_clone.borrow_mut() = Some(reason));

    let remote_clone = remote.clone();
    acceptor.set_on_close(move |reason| *remote_clone.borrow_mut() = Some(reason));

    initiator.close();

    shuttle(&reactor, &ta, &tb);

    assert_eq!(local.borrow_mut().take(), Some(CloseReason::LocalRequested));
    assert_eq!(remote.borrow_mut().take(), Some(CloseReason::PeerRequested));
}

#[test]
fn shut_down_closes_channels_without_a_farewell() {
    let reactor = Reactor::new();
    let (a, ta, b, tb) = pair(&reactor, LinkKind::Classic, LinkConfig::default());

    let (initiator, _acceptor) = open_channel(&reactor, &a, &ta, &b, &tb, LinkKind::Classic);

    let reason = Rc::new(RefCell::new(None));

    let reason_clone = reason.clone();
    initiator.set_on_close(move |r| *reason_clone.borrow_mut() = Some(r));

    a.shut_down();

    reactor.run_until_idle();

    assert_eq!(reason.borrow_mut().take(), Some(CloseReason::LinkClosed));
    assert!(ta.take_outbound().is_none());
}

#[test]
fn le_credit_channel_transfers_sdus_past_the_initial_credits() {
    let reactor = Reactor::new();
    let (a, ta, b, tb) = pair(&reactor, LinkKind::Le, LinkConfig::default());

    let (initiator, acceptor) = open_channel(&reactor, &a, &ta, &b, &tb, LinkKind::Le);

    let received = Rc::new(RefCell::new(Vec::new()));

    let received_clone = received.clone();
    acceptor.register_receive(move |sdu| received_clone.borrow_mut().push(sdu));

    // 150 bytes against an mps of 64 is three frames per SDU; five SDUs need
    // fifteen credits, five more than the initial grant, so this only finishes
    // if the receiver keeps replenishing
    let sdus: Vec<Vec<u8>> = (0..5u8).map(|n| vec![n; 150]).collect();

    for sdu in &sdus {
        initiator.send(sdu.clone()).unwrap();
    }

    shuttle(&reactor, &ta, &tb);

    assert_eq!(*received.borrow(), sdus);
}

#[test]
fn le_sdus_are_paced_by_the_peer_mps() {
    let reactor = Reactor::new();
    let (a, ta, b, tb) = pair(&reactor, LinkKind::Le, LinkConfig::default());

    let (initiator, acceptor) = open_channel(&reactor, &a, &ta, &b, &tb, LinkKind::Le);

    initiator.send(vec![7; 150]).unwrap();

    reactor.run_until_idle();

    let frames = drain(&ta);

    // 2 byte length plus 62 data bytes, then 64, then 24
    assert_eq!(frames.len(), 3);

    for frame in &frames {
        let decoded = BasicFrame::try_from_raw(frame).unwrap();

        assert_eq!(decoded.get_cid(), acceptor.get_cid());
        assert!(decoded.get_payload().len() <= 64);

        tb.deliver(frame.clone()).unwrap();
    }

    reactor.run_until_idle();

    assert_eq!(acceptor.try_recv(), Some(vec![7; 150]));
}

#[test]
fn undersized_retransmission_offer_is_refused() {
    let reactor = Reactor::new();

    let (a, ta) = Link::new(&reactor.handle(), LinkKind::Classic, LinkConfig::default());

    let result = Rc::new(RefCell::new(None));

    let result_clone = result.clone();

    a.connect(psm(), move |r| *result_clone.borrow_mut() = Some(r));

    reactor.run_until_idle();

    let frames = drain(&ta);
    let (code, id, data) = signals_of(&frames[0]).remove(0);
    assert_eq!(code, SignalCode::ConnectionRequest);

    let request = ConnectionRequest::decode(&data).unwrap();

    let response = ConnectionResponse {
        destination_cid: 0x0060,
        source_cid: request.source_cid,
        result: ConnectionResult::Success,
        status: 0,
    };

    ta.deliver(signal_frame(SignalCode::ConnectionResponse, id, &response.encode()))
        .unwrap();

    reactor.run_until_idle();

    // accept the engine's own configuration request
    let frames = drain(&ta);
    let (code, id, _) = signals_of(&frames[0]).remove(0);
    assert_eq!(code, SignalCode::ConfigurationRequest);

    let accept = ConfigurationResponse {
        source_cid: request.source_cid,
        flags: 0,
        result: ConfigResult::Success,
        options: Vec::new(),
    };

    ta.deliver(signal_frame(SignalCode::ConfigurationResponse, id, &accept.encode()))
        .unwrap();

    reactor.run_until_idle();

    // offer retransmission mode with a one byte payload size and an impossible window
    let offer = ConfigurationRequest {
        destination_cid: request.source_cid,
        flags: 0,
        options: vec![
            ConfigOption::Mtu(672),
            ConfigOption::RetransmissionAndFlowControl {
                mode: ConfigOption::MODE_ENHANCED_RETRANSMISSION,
                tx_window: 200,
                max_transmit: 3,
                retransmission_timeout: 2000,
                monitor_timeout: 12000,
                mps: 1,
            },
        ],
    };

    ta.deliver(signal_frame(SignalCode::ConfigurationRequest, 70, &offer.encode()))
        .unwrap();

    reactor.run_until_idle();

    let frames = drain(&ta);
    assert_eq!(frames.len(), 1);

    let (code, _, data) = signals_of(&frames[0]).remove(0);
    assert_eq!(code, SignalCode::ConfigurationResponse);

    let (refusal, option_bytes) = ConfigurationResponse::decode(&data).unwrap();
    assert_eq!(refusal.result, ConfigResult::UnacceptableParameters);

    // the refusal names the nearest values the engine would take
    let (corrected, _) = packets::parse_options(option_bytes).unwrap();

    assert!(corrected.iter().any(|option| matches!(
        option,
        ConfigOption::RetransmissionAndFlowControl {
            mps: 16,
            tx_window: 63,
            ..
        }
    )));

    // nothing of the bad offer was applied and the channel is still unopened
    assert!(result.borrow().is_none());

    let offer = ConfigurationRequest {
        destination_cid: request.source_cid,
        flags: 0,
        options: vec![
            ConfigOption::Mtu(672),
            ConfigOption::RetransmissionAndFlowControl {
                mode: ConfigOption::MODE_ENHANCED_RETRANSMISSION,
                tx_window: 10,
                max_transmit: 3,
                retransmission_timeout: 2000,
                monitor_timeout: 12000,
                mps: 64,
            },
        ],
    };

    ta.deliver(signal_frame(SignalCode::ConfigurationRequest, 71, &offer.encode()))
        .unwrap();

    reactor.run_until_idle();

    let frames = drain(&ta);
    assert_eq!(frames.len(), 1);

    let (acceptance, _) = ConfigurationResponse::decode(&signals_of(&frames[0]).remove(0).2).unwrap();
    assert_eq!(acceptance.result, ConfigResult::Success);

    let handle = result.borrow_mut().take().unwrap().unwrap();

    // an SDU much larger than the negotiated payload size segments cleanly
    handle.send(vec![9; 300]).unwrap();

    reactor.run_until_idle();

    // 62 data bytes beside the declared length, then 64, 64, 64 and 46
    assert_eq!(drain(&ta).len(), 5);
}

#[test]
fn peer_reconfiguration_applies_a_new_outbound_mtu() {
    let reactor = Reactor::new();

    let (a, ta) = Link::new(&reactor.handle(), LinkKind::Classic, LinkConfig::default());

    let result = Rc::new(RefCell::new(None));

    let result_clone = result.clone();

    a.connect(psm(), move |r| *result_clone.borrow_mut() = Some(r));

    reactor.run_until_idle();

    let frames = drain(&ta);
    let (_, id, data) = signals_of(&frames[0]).remove(0);

    let request = ConnectionRequest::decode(&data).unwrap();

    let response = ConnectionResponse {
        destination_cid: 0x0060,
        source_cid: request.source_cid,
        result: ConnectionResult::Success,
        status: 0,
    };

    ta.deliver(signal_frame(SignalCode::ConnectionResponse, id, &response.encode()))
        .unwrap();

    reactor.run_until_idle();

    // accept the engine's configuration request and send our own
    let frames = drain(&ta);
    let (code, id, _) = signals_of(&frames[0]).remove(0);
    assert_eq!(code, SignalCode::ConfigurationRequest);

    let accept = ConfigurationResponse {
        source_cid: request.source_cid,
        flags: 0,
        result: ConfigResult::Success,
        options: Vec::new(),
    };

    ta.deliver(signal_frame(SignalCode::ConfigurationResponse, id, &accept.encode()))
        .unwrap();

    let ours = ConfigurationRequest {
        destination_cid: request.source_cid,
        flags: 0,
        options: vec![ConfigOption::Mtu(672)],
    };

    ta.deliver(signal_frame(SignalCode::ConfigurationRequest, 60, &ours.encode()))
        .unwrap();

    reactor.run_until_idle();

    drain(&ta);

    let handle = result.borrow_mut().take().unwrap().unwrap();

    // at the advertised 672 a large SDU crosses
    handle.send(vec![1; 400]).unwrap();

    reactor.run_until_idle();

    assert_eq!(drain(&ta).len(), 1);

    // reopen negotiation on the live channel with a smaller receive MTU
    let reconfigure = ConfigurationRequest {
        destination_cid: request.source_cid,
        flags: 0,
        options: vec![ConfigOption::Mtu(300)],
    };

    ta.deliver(signal_frame(SignalCode::ConfigurationRequest, 61, &reconfigure.encode()))
        .unwrap();

    reactor.run_until_idle();

    // the engine accepts and answers with its own request for the reverse direction
    let frames = drain(&ta);
    assert_eq!(frames.len(), 2);

    let (code, _, data) = signals_of(&frames[0]).remove(0);
    assert_eq!(code, SignalCode::ConfigurationResponse);
    assert_eq!(
        ConfigurationResponse::decode(&data).unwrap().0.result,
        ConfigResult::Success
    );

    let (code, id, _) = signals_of(&frames[1]).remove(0);
    assert_eq!(code, SignalCode::ConfigurationRequest);

    ta.deliver(signal_frame(SignalCode::ConfigurationResponse, id, &accept.encode()))
        .unwrap();

    reactor.run_until_idle();

    // the old handle keeps working under the renegotiated limit
    handle.send(vec![2; 400]).unwrap();

    reactor.run_until_idle();

    assert_eq!(drain(&ta).len(), 0);

    handle.send(vec![2; 200]).unwrap();

    reactor.run_until_idle();

    assert_eq!(drain(&ta).len(), 1);
}

#[test]
fn undersized_credit_based_request_is_refused() {
    let reactor = Reactor::new();

    let (a, ta) = Link::new(&reactor.handle(), LinkKind::Le, LinkConfig::default());

    let accepted = Rc::new(RefCell::new(None));

    let accepted_clone = accepted.clone();

    a.register_service(psm(), SecurityLevel::None, move |channel| {
        *accepted_clone.borrow_mut() = Some(channel);
    })
    .unwrap();

    let request = LeCreditBasedConnectionRequest {
        spsm: psm().to_val(),
        source_cid: 0x0040,
        mtu: 512,
        mps: 1,
        initial_credits: 4,
    };

    ta.deliver(le_signal_frame(
        SignalCode::LeCreditBasedConnectionRequest,
        1,
        &request.encode(),
    ))
    .unwrap();

    reactor.run_until_idle();

    let frames = drain(&ta);
    assert_eq!(frames.len(), 1);

    let (code, _, data) = signals_of(&frames[0]).remove(0);
    assert_eq!(code, SignalCode::LeCreditBasedConnectionResponse);

    let response = LeCreditBasedConnectionResponse::decode(&data).unwrap();

    assert_eq!(response.result, LeConnectionResult::UnacceptableParameters);
    assert_eq!(response.destination_cid, 0);
    assert!(accepted.borrow().is_none());

    // the same request with a workable payload size is accepted
    let request = LeCreditBasedConnectionRequest { mps: 64, ..request };

    ta.deliver(le_signal_frame(
        SignalCode::LeCreditBasedConnectionRequest,
        2,
        &request.encode(),
    ))
    .unwrap();

    reactor.run_until_idle();

    let frames = drain(&ta);
    let (_, _, data) = signals_of(&frames[0]).remove(0);

    let response = LeCreditBasedConnectionResponse::decode(&data).unwrap();
    assert_eq!(response.result, LeConnectionResult::Success);

    let channel = accepted.borrow_mut().take().unwrap();

    channel.send(vec![5; 200]).unwrap();

    reactor.run_until_idle();

    // 62 data bytes beside the length prefix, then 64, 64 and 10
    assert_eq!(drain(&ta).len(), 4);
}

#[test]
fn asymmetric_mtus_police_each_direction_separately() {
    let reactor = Reactor::new();

    let narrow = LinkConfig {
        mtu: 100,
        ..LinkConfig::default()
    };

    let (a, ta) = Link::new(&reactor.handle(), LinkKind::Classic, narrow);
    let (b, tb) = Link::new(&reactor.handle(), LinkKind::Classic, LinkConfig::default());

    let (initiator, acceptor) = open_channel(&reactor, &a, &ta, &b, &tb, LinkKind::Classic);

    // the wide side advertised 672, so 400 bytes cross towards it
    initiator.send(vec![1; 400]).unwrap();

    shuttle(&reactor, &ta, &tb);

    assert_eq!(acceptor.try_recv(), Some(vec![1; 400]));

    // towards the narrow side the same SDU exceeds its advertised 100 bytes
    acceptor.send(vec![2; 400]).unwrap();

    shuttle(&reactor, &ta, &tb);

    assert_eq!(initiator.try_recv(), None);

    acceptor.send(vec![2; 100]).unwrap();

    shuttle(&reactor, &ta, &tb);

    assert_eq!(initiator.try_recv(), Some(vec![2; 100]));
}

#[test]
fn retransmission_channel_segments_and_reassembles() {
    let reactor = Reactor::new();

    let config = LinkConfig {
        mode: PreferredMode::EnhancedRetransmission(RetransmissionConfig {
            mps: 100,
            ..RetransmissionConfig::default()
        }),
        ..LinkConfig::default()
    };

    let (a, ta, b, tb) = pair(&reactor, LinkKind::Classic, config);

    let (initiator, acceptor) = open_channel(&reactor, &a, &ta, &b, &tb, LinkKind::Classic);

    let sdu: Vec<u8> = (0..250u16).map(|n| n as u8).collect();

    initiator.send(sdu.clone()).unwrap();

    reactor.run_until_idle();

    // 98 bytes beside the declared length in the start frame, then 100 and 52
    let frames = drain(&ta);
    assert_eq!(frames.len(), 3);

    for frame in frames {
        assert_eq!(
            BasicFrame::try_from_raw(&frame).unwrap().get_cid(),
            acceptor.get_cid()
        );

        tb.deliver(frame).unwrap();
    }

    reactor.run_until_idle();

    assert_eq!(acceptor.try_recv(), Some(sdu));

    // let the receiver's acknowledgements drain back
    shuttle(&reactor, &ta, &tb);
}
