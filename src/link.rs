//! Link assembly and user API
//!
//! A [`Link`] wires one reactor, the channel allocators, the data pipeline and a signalling
//! manager into a working protocol engine for a single point-to-point link, and hands the
//! embedder a [`TransportEndpoint`] to exchange raw frames with the transport below.
//!
//! The signalling manager is a pseudo channel user: the signalling fixed channel is attached to
//! the data pipeline in basic mode and the manager reads and writes its control frames through
//! the channel's queue, the same way payload flows on any other channel.

use crate::channel::alloc::{DynamicChannelAllocator, FixedChannelAllocator};
use crate::channel::id::{Cid, Psm};
use crate::channel::{CloseReason, DynamicChannel};
use crate::controller::{ChannelMode, ProtocolViolation, RetransmissionConfig, DEFAULT_MTU};
use crate::pipeline::{DataPipeline, PipelineEvents};
use crate::queue::{bidi_queue, QueueEnd};
use crate::reactor::Handle;
use crate::signals::classic::ClassicSignalling;
use crate::signals::le::LeSignalling;
use crate::signals::packets::{InfoType, InformationResponse};
use crate::signals::ConnectError;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// The kind of link, selecting the signalling variant and the dynamic identifier range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Configured connection-oriented channels (basic or retransmission mode)
    Classic,
    /// Credit-based channels without a configuration phase
    Le,
}

/// Security level of the link, consulted (not enforced) when accepting connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    None,
    Encrypted,
    Authenticated,
}

/// Which mode to request for channels opened on a classic link
#[derive(Debug, Clone, Copy)]
pub enum PreferredMode {
    Basic,
    EnhancedRetransmission(RetransmissionConfig),
}

/// Link-wide settings
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// Receive MTU advertised for dynamic channels
    pub mtu: u16,
    /// Maximum payload size advertised for credit-based channels
    pub le_mps: u16,
    /// Credits granted to the peer when a credit-based channel opens
    pub initial_credits: u16,
    /// Capacity of every queue on the link, in frames or SDUs per direction
    pub queue_capacity: usize,
    /// The link's current security level
    pub security: SecurityLevel,
    /// Mode requested during configuration of classic channels
    pub mode: PreferredMode,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            mtu: DEFAULT_MTU,
            le_mps: 64,
            initial_credits: 10,
            queue_capacity: 8,
            security: SecurityLevel::None,
            mode: PreferredMode::Basic,
        }
    }
}

/// Registering a service under an already registered identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateService(pub Psm);

impl core::fmt::Display for DuplicateService {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "a service is already registered under {}", self.0)
    }
}

impl std::error::Error for DuplicateService {}

struct Service {
    psm: Psm,
    security: SecurityLevel,
    handler: Rc<dyn Fn(ChannelHandle)>,
}

/// Services accepting incoming connections, keyed by their service identifier
pub struct ServiceRegistry {
    services: Vec<Service>,
}

impl ServiceRegistry {
    fn new() -> Self {
        ServiceRegistry {
            services: Vec::new(),
        }
    }

    fn register(
        &mut self,
        psm: Psm,
        security: SecurityLevel,
        handler: Rc<dyn Fn(ChannelHandle)>,
    ) -> Result<(), DuplicateService> {
        if self.services.iter().any(|service| service.psm == psm) {
            return Err(DuplicateService(psm));
        }

        self.services.push(Service {
            psm,
            security,
            handler,
        });

        Ok(())
    }

    /// Look a service up, returning its required security level and its handler
    pub(crate) fn lookup(&self, psm: Psm) -> Option<(SecurityLevel, Rc<dyn Fn(ChannelHandle)>)> {
        self.services
            .iter()
            .find(|service| service.psm == psm)
            .map(|service| (service.security, service.handler.clone()))
    }
}

/// A user's handle to one open dynamic channel
pub struct ChannelHandle {
    channel: Rc<DynamicChannel>,
    user_end: QueueEnd<Vec<u8>>,
    link: Weak<RefCell<LinkInner>>,
}

impl ChannelHandle {
    /// Get the local channel identifier
    pub fn get_cid(&self) -> Cid {
        self.channel.get_cid()
    }

    /// Get the peer's identifier for this channel
    pub fn get_peer_cid(&self) -> Cid {
        self.channel.get_remote_cid()
    }

    /// Get the service the channel was opened for
    pub fn get_psm(&self) -> Psm {
        self.channel.get_psm()
    }

    /// Queue one SDU for transmission
    ///
    /// The SDU is handed back when the channel's outbound queue is full.
    pub fn send(&self, sdu: Vec<u8>) -> Result<(), Vec<u8>> {
        self.user_end.try_enqueue(sdu)
    }

    /// Take one received SDU, `None` when nothing is waiting
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.user_end.try_dequeue()
    }

    /// Register the receive callback, invoked once per received SDU
    ///
    /// # Panics
    /// Panics if a receive callback is already registered.
    pub fn register_receive<F>(&self, on_sdu: F)
    where
        F: FnMut(Vec<u8>) + 'static,
    {
        self.user_end.register_dequeue(on_sdu);
    }

    /// Unregister the receive callback
    pub fn unregister_receive(&self) {
        self.user_end.unregister_dequeue();
    }

    /// Register the single close callback
    ///
    /// # Panics
    /// Panics if a close callback was already registered.
    pub fn set_on_close<F>(&self, on_close: F)
    where
        F: FnOnce(CloseReason) + 'static,
    {
        self.channel.set_on_close(on_close);
    }

    /// Close the channel, requesting disconnection from the peer
    pub fn close(self) {
        if let Some(link) = self.link.upgrade() {
            LinkInner::close_channel(&link, self.channel.get_cid());
        }
    }
}

enum Signalling {
    Classic(ClassicSignalling),
    Le(LeSignalling),
}

/// Everything a signalling manager may touch besides its own state
pub(crate) struct LinkCtx<'a> {
    pub(crate) handle: &'a Handle,
    pub(crate) config: &'a LinkConfig,
    pub(crate) dynamic: &'a mut DynamicChannelAllocator,
    pub(crate) pipeline: &'a DataPipeline,
    pub(crate) services: &'a ServiceRegistry,
    pub(crate) signal_end: &'a QueueEnd<Vec<u8>>,
    pub(crate) link: &'a Weak<RefCell<LinkInner>>,
}

impl LinkCtx<'_> {
    /// Put a control frame on the signalling channel
    pub(crate) fn send_signal(&self, frame: Vec<u8>) {
        if self.signal_end.try_enqueue(frame).is_err() {
            log::warn!("signalling channel queue full, dropping outbound command");
        }
    }

    /// Build the user's handle for a freshly opened channel
    pub(crate) fn make_handle(&self, channel: &Rc<DynamicChannel>) -> ChannelHandle {
        ChannelHandle {
            channel: channel.clone(),
            user_end: channel.take_user_end(),
            link: self.link.clone(),
        }
    }
}

pub(crate) struct LinkInner {
    handle: Handle,
    config: LinkConfig,
    self_weak: Weak<RefCell<LinkInner>>,
    fixed: FixedChannelAllocator,
    dynamic: DynamicChannelAllocator,
    pipeline: DataPipeline,
    services: ServiceRegistry,
    signalling: Signalling,
    signal_end: QueueEnd<Vec<u8>>,
    is_shut_down: bool,
}

impl LinkInner {
    /// Split a borrow of the inner link into the signalling manager and its context
    fn with_ctx<R>(
        link: &Rc<RefCell<LinkInner>>,
        f: impl FnOnce(&mut Signalling, &mut LinkCtx) -> R,
    ) -> R {
        let mut borrow = link.borrow_mut();

        let inner = &mut *borrow;

        let mut ctx = LinkCtx {
            handle: &inner.handle,
            config: &inner.config,
            dynamic: &mut inner.dynamic,
            pipeline: &inner.pipeline,
            services: &inner.services,
            signal_end: &inner.signal_end,
            link: &inner.self_weak,
        };

        f(&mut inner.signalling, &mut ctx)
    }

    fn on_signal_sdu(link: &Rc<RefCell<LinkInner>>, sdu: Vec<u8>) {
        LinkInner::with_ctx(link, |signalling, ctx| match signalling {
            Signalling::Classic(manager) => manager.on_control_frame(ctx, &sdu),
            Signalling::Le(manager) => manager.on_control_frame(ctx, &sdu),
        })
    }

    fn on_signal_timeout(link: &Rc<RefCell<LinkInner>>) {
        LinkInner::with_ctx(link, |signalling, ctx| match signalling {
            Signalling::Classic(manager) => manager.on_timeout(ctx),
            Signalling::Le(manager) => manager.on_timeout(ctx),
        })
    }

    fn on_violation(link: &Rc<RefCell<LinkInner>>, cid: Cid, violation: ProtocolViolation) {
        log::warn!("tearing down channel {} after violation: {}", cid, violation);

        LinkInner::with_ctx(link, |signalling, ctx| match signalling {
            Signalling::Classic(manager) => {
                manager.force_teardown(ctx, cid, CloseReason::ProtocolViolation)
            }
            Signalling::Le(manager) => {
                manager.force_teardown(ctx, cid, CloseReason::ProtocolViolation)
            }
        })
    }

    fn on_frames_delivered(link: &Rc<RefCell<LinkInner>>, cid: Cid, count: u16) {
        LinkInner::with_ctx(link, |signalling, ctx| match signalling {
            Signalling::Le(manager) => manager.replenish(ctx, cid, count),
            // classic modes acknowledge within the data channel itself
            Signalling::Classic(_) => {}
        })
    }

    fn close_channel(link: &Rc<RefCell<LinkInner>>, cid: Cid) {
        LinkInner::with_ctx(link, |signalling, ctx| match signalling {
            Signalling::Classic(manager) => manager.disconnect(ctx, cid),
            Signalling::Le(manager) => manager.disconnect(ctx, cid),
        })
    }
}

/// One protocol engine on one point-to-point link
pub struct Link {
    inner: Rc<RefCell<LinkInner>>,
}

impl Link {
    /// Create a link engine on the reactor behind `handle`
    ///
    /// The returned [`TransportEndpoint`] is the embedder's edge: raw inbound frames go in, raw
    /// outbound frames come out.
    pub fn new(handle: &Handle, kind: LinkKind, config: LinkConfig) -> (Link, TransportEndpoint) {
        let (engine_end, transport_end) = bidi_queue(handle, config.queue_capacity);

        let inner = Rc::new_cyclic(|weak: &Weak<RefCell<LinkInner>>| {
            let on_violation = {
                let weak = weak.clone();

                move |cid, violation| {
                    if let Some(link) = weak.upgrade() {
                        LinkInner::on_violation(&link, cid, violation);
                    }
                }
            };

            let on_frames_delivered = {
                let weak = weak.clone();

                move |cid, count| {
                    if let Some(link) = weak.upgrade() {
                        LinkInner::on_frames_delivered(&link, cid, count);
                    }
                }
            };

            let pipeline = DataPipeline::new(
                handle,
                engine_end.clone(),
                PipelineEvents {
                    on_violation: Rc::new(on_violation),
                    on_frames_delivered: Rc::new(on_frames_delivered),
                },
            );

            let mut fixed = FixedChannelAllocator::new(handle.clone(), config.queue_capacity);

            let last_dynamic = match kind {
                LinkKind::Classic => Cid::LAST_DYNAMIC,
                LinkKind::Le => Cid::LAST_DYNAMIC_LE,
            };

            let dynamic =
                DynamicChannelAllocator::new(handle.clone(), last_dynamic, config.queue_capacity);

            let signalling_cid = match kind {
                LinkKind::Classic => Cid::SIGNALLING,
                LinkKind::Le => Cid::LE_SIGNALLING,
            };

            let signalling_channel = fixed.allocate(signalling_cid);

            pipeline.attach(
                signalling_cid,
                signalling_cid,
                ChannelMode::Basic {
                    tx_mtu: DEFAULT_MTU,
                    rx_mtu: DEFAULT_MTU,
                },
                signalling_channel.take_stack_end(),
            );

            let signal_end = signalling_channel.take_user_end();

            let on_timeout: Rc<dyn Fn()> = Rc::new({
                let weak = weak.clone();

                move || {
                    if let Some(link) = weak.upgrade() {
                        LinkInner::on_signal_timeout(&link);
                    }
                }
            });

            let signalling = match kind {
                LinkKind::Classic => Signalling::Classic(ClassicSignalling::new(handle, on_timeout)),
                LinkKind::Le => Signalling::Le(LeSignalling::new(handle, on_timeout)),
            };

            RefCell::new(LinkInner {
                handle: handle.clone(),
                config,
                self_weak: weak.clone(),
                fixed,
                dynamic,
                pipeline,
                services: ServiceRegistry::new(),
                signalling,
                signal_end,
                is_shut_down: false,
            })
        });

        // every inbound raw frame is routed through the pipeline, signalling included
        {
            let pipeline = inner.borrow().pipeline.clone();

            engine_end.register_dequeue(move |frame| pipeline.on_frame(frame));
        }

        // the signalling manager consumes its channel's reassembled control frames
        {
            let weak = Rc::downgrade(&inner);

            let signal_end = inner.borrow().signal_end.clone();

            signal_end.register_dequeue(move |sdu| {
                if let Some(link) = weak.upgrade() {
                    LinkInner::on_signal_sdu(&link, sdu);
                }
            });
        }

        (Link { inner }, TransportEndpoint { end: transport_end })
    }

    /// Register a service accepting incoming connections under `psm`
    ///
    /// `handler` is invoked with the handle of every accepted channel. Connections are refused
    /// while the link's security level is below `security`.
    pub fn register_service<F>(
        &self,
        psm: Psm,
        security: SecurityLevel,
        handler: F,
    ) -> Result<(), DuplicateService>
    where
        F: Fn(ChannelHandle) + 'static,
    {
        self.inner
            .borrow_mut()
            .services
            .register(psm, security, Rc::new(handler))
    }

    /// Open a channel to the peer's service `psm` (classic links)
    pub fn connect<F>(&self, psm: Psm, on_result: F)
    where
        F: FnOnce(Result<ChannelHandle, ConnectError>) + 'static,
    {
        LinkInner::with_ctx(&self.inner, |signalling, ctx| match signalling {
            Signalling::Classic(manager) => manager.connect(ctx, psm, Box::new(on_result)),
            Signalling::Le(_) => {
                log::warn!("classic connect on a credit-based link");

                ctx.handle
                    .post(move || on_result(Err(ConnectError::WrongLinkKind)));
            }
        })
    }

    /// Open a credit-based channel to the peer's service `psm` (LE links)
    pub fn connect_le<F>(&self, psm: Psm, on_result: F)
    where
        F: FnOnce(Result<ChannelHandle, ConnectError>) + 'static,
    {
        LinkInner::with_ctx(&self.inner, |signalling, ctx| match signalling {
            Signalling::Le(manager) => manager.connect(ctx, psm, Box::new(on_result)),
            Signalling::Classic(_) => {
                log::warn!("credit-based connect on a classic link");

                ctx.handle
                    .post(move || on_result(Err(ConnectError::WrongLinkKind)));
            }
        })
    }

    /// Send an echo request, `None` to the callback on timeout (classic links)
    pub fn ping<F>(&self, data: Vec<u8>, on_result: F)
    where
        F: FnOnce(Option<Vec<u8>>) + 'static,
    {
        LinkInner::with_ctx(&self.inner, |signalling, ctx| match signalling {
            Signalling::Classic(manager) => manager.ping(ctx, data, Box::new(on_result)),
            Signalling::Le(_) => {
                log::warn!("echo request on a credit-based link");

                ctx.handle.post(move || on_result(None));
            }
        })
    }

    /// Query the peer's information data, `None` to the callback on timeout (classic links)
    pub fn request_info<F>(&self, info_type: InfoType, on_result: F)
    where
        F: FnOnce(Option<InformationResponse>) + 'static,
    {
        LinkInner::with_ctx(&self.inner, |signalling, ctx| match signalling {
            Signalling::Classic(manager) => manager.request_info(ctx, info_type, Box::new(on_result)),
            Signalling::Le(_) => {
                log::warn!("information request on a credit-based link");

                ctx.handle.post(move || on_result(None));
            }
        })
    }

    /// Shut the link down, closing every channel with [`CloseReason::LinkClosed`]
    ///
    /// No farewell is sent to the peer; the transport connection is assumed gone.
    pub fn shut_down(&self) {
        let mut borrow = self.inner.borrow_mut();

        if borrow.is_shut_down {
            return;
        }

        borrow.is_shut_down = true;

        let inner = &mut *borrow;

        for channel in inner.dynamic.drain_all() {
            if inner.pipeline.is_attached(channel.get_cid()) {
                inner.pipeline.detach(channel.get_cid());
            }

            if !channel.is_closed() {
                channel.close(CloseReason::LinkClosed);
            }
        }

        for channel in inner.fixed.drain_all() {
            if inner.pipeline.is_attached(channel.get_cid()) {
                inner.pipeline.detach(channel.get_cid());
            }

            if !channel.is_closed() {
                channel.close(CloseReason::LinkClosed);
            }
        }
    }
}

/// The embedder's edge of a link: raw frames in, raw frames out
pub struct TransportEndpoint {
    end: QueueEnd<Vec<u8>>,
}

impl TransportEndpoint {
    /// Inject one raw inbound frame
    ///
    /// The frame is handed back when the link's inbound queue is full.
    pub fn deliver(&self, frame: Vec<u8>) -> Result<(), Vec<u8>> {
        self.end.try_enqueue(frame)
    }

    /// Take one raw outbound frame, `None` when nothing is ready
    pub fn take_outbound(&self) -> Option<Vec<u8>> {
        self.end.try_dequeue()
    }

    /// Register the outbound frame callback, invoked once per ready frame
    ///
    /// # Panics
    /// Panics if an outbound callback is already registered.
    pub fn register_outbound<F>(&self, on_frame: F)
    where
        F: FnMut(Vec<u8>) + 'static,
    {
        self.end.register_dequeue(on_frame);
    }

    /// Unregister the outbound frame callback
    pub fn unregister_outbound(&self) {
        self.end.unregister_dequeue();
    }
}
