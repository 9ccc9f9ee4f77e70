//! Request/response transactions on top of the DW1000's completion events
//!
//! A [`Transceiver`] owns a `Ready` device. Callers run one transaction at a
//! time through [`Transceiver::send`] or [`Transceiver::receive`], while the
//! interrupt side feeds hardware events in through
//! [`Transceiver::service_irq`] or [`Transceiver::handle_event`]. The two
//! sides only meet in the shared phase record and the completion signal.

use core::{cell::RefCell, future::Future, mem, num::Wrapping, pin::Pin};

use embassy_sync::{
    blocking_mutex::{raw::RawMutex, Mutex as BlockingMutex},
    mutex::Mutex,
    signal::Signal,
};
use embedded_hal_async::delay::DelayNs;
use futures::{
    future::{select, Either},
    pin_mut,
};

#[cfg(feature = "defmt")]
use defmt::Format;

use super::{
    decode_frame, encode_frame, DeviceInfo, Event, LinkHeader, Status, TransactionState, FCS_LEN,
    MAX_FRAME_LEN,
};
use crate::{
    configs::LinkConfig,
    ll::{self, bits, RegisterBus},
    pool::{FramePool, Slot},
    ranging::{WorkItem, WorkQueue},
    Error, Ready, Uninitialized, DW1000,
};

/// Consumer of inbound payloads, usually the network stack
pub trait PayloadSink {
    /// Take a copy of `payload`; it is only valid during the call
    fn deliver(&self, payload: &[u8]);
}

/// Producer of outbound payloads, usually the network stack
pub trait PayloadSource {
    /// Copy the next outbound packet into `buffer` and return its length, or
    /// `None` if nothing is queued
    fn consume_outbound(&self, buffer: &mut [u8]) -> Option<usize>;
}

/// What happens to a received frame once the waiting caller is released
pub enum Handler<'a, M: RawMutex, const N: usize> {
    /// Hand the payload to a sink and free the buffer right away
    Transfer(&'a dyn PayloadSink),
    /// Queue the buffer for deferred ranging work
    Ranging(&'a WorkQueue<M, N>),
    /// Only the completion matters, drop the payload
    Ping,
}

/// How long the caller waits for a transaction to finish
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// Until the hardware reports a terminal event
    Blocking,
    /// At most `timeout_ms`, then the transaction is abandoned
    NonBlocking {
        /// Caller-side timeout in milliseconds
        timeout_ms: u32,
    },
}

/// A single outgoing transaction
#[derive(Clone, Copy, Debug)]
pub struct Request<'p> {
    /// Peer short address, broadcast if `None`
    pub destination: Option<u16>,
    /// Opaque payload
    pub payload: &'p [u8],
    /// How long to wait for completion
    pub mode: Mode,
    /// Turn the receiver on after sending and wait for a response
    pub wait_for_response: bool,
    /// Receive timeout in UWB microseconds, 0 waits forever
    pub resp_timeout: u16,
    /// Mark the frame as a ranging frame
    pub ranging: bool,
}

impl<'p> Request<'p> {
    /// A blocking broadcast of `payload` that expects no response
    pub fn new(payload: &'p [u8]) -> Self {
        Request {
            destination: None,
            payload,
            mode: Mode::Blocking,
            wait_for_response: false,
            resp_timeout: 0,
            ranging: false,
        }
    }

    /// Address the request to `destination`
    pub fn to(mut self, destination: u16) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Set the wait mode
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Wait for a response, with the given receive timeout
    pub fn expect_response(mut self, resp_timeout: u16) -> Self {
        self.wait_for_response = true;
        self.resp_timeout = resp_timeout;
        self
    }

    /// Mark the frame as a ranging frame
    pub fn ranging(mut self) -> Self {
        self.ranging = true;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Outcome {
    Completed,
    ReceiveTimeout,
    ReceiveFault,
    RequestTimeout,
}

impl Outcome {
    fn state(self) -> TransactionState {
        match self {
            Outcome::Completed => TransactionState::Completed,
            Outcome::ReceiveTimeout | Outcome::RequestTimeout => TransactionState::TimedOut,
            Outcome::ReceiveFault => TransactionState::Faulted,
        }
    }
}

// `slot` is the buffer reserved for the response, if one is expected.
enum Phase {
    Idle,
    Sending { slot: Option<Slot> },
    WaitingResponse { slot: Slot },
    Delivering,
    Finished(Outcome),
    Abandoned { slot: Option<Slot> },
}

struct Shared {
    status: Status,
    phase: Phase,
    seq: Wrapping<u8>,
    last: TransactionState,
}

enum Action {
    Nothing,
    Signal,
    Receive(Slot),
    Release { slot: Slot, signal: bool },
    Drain(Option<Slot>),
    Spurious,
}

fn transition(shared: &mut Shared, event: Event) -> Action {
    let (phase, action) = match (event, mem::replace(&mut shared.phase, Phase::Idle)) {
        (Event::TxDone, Phase::Sending { slot: None }) => {
            (Phase::Finished(Outcome::Completed), Action::Signal)
        }
        (Event::TxDone, Phase::Sending { slot: Some(slot) }) => {
            (Phase::WaitingResponse { slot }, Action::Nothing)
        }
        (Event::TxDone, Phase::Abandoned { slot: None }) => (Phase::Idle, Action::Drain(None)),
        // The abandoned transaction still has its response pending.
        (Event::TxDone, phase @ Phase::Abandoned { .. }) => (phase, Action::Nothing),

        (
            Event::RxDone,
            Phase::Sending { slot: Some(slot) } | Phase::WaitingResponse { slot },
        ) => (Phase::Delivering, Action::Receive(slot)),
        (
            Event::RxTimeout,
            Phase::Sending { slot: Some(slot) } | Phase::WaitingResponse { slot },
        ) => {
            shared.status.insert(Status::RX_TIMEOUT_ERROR);
            (
                Phase::Finished(Outcome::ReceiveTimeout),
                Action::Release { slot, signal: true },
            )
        }
        (
            Event::RxError,
            Phase::Sending { slot: Some(slot) } | Phase::WaitingResponse { slot },
        ) => {
            shared.status.insert(Status::RX_ERROR);
            (
                Phase::Finished(Outcome::ReceiveFault),
                Action::Release { slot, signal: true },
            )
        }
        (Event::RxDone | Event::RxTimeout | Event::RxError, Phase::Abandoned { slot }) => {
            (Phase::Idle, Action::Drain(slot))
        }

        (_, phase) => (phase, Action::Spurious),
    };

    shared.phase = phase;
    action
}

// Resolves when the caller stops waiting, never in blocking mode.
async fn deadline<D: DelayNs>(timer: &mut D, mode: Mode) {
    match mode {
        Mode::Blocking => core::future::pending::<()>().await,
        Mode::NonBlocking { timeout_ms } => timer.delay_ms(timeout_ms).await,
    }
}

async fn arm_rx_timeout<B: RegisterBus>(
    ll: &mut ll::DW1000<B>,
    timeout: u16,
) -> Result<(), ll::Error<B::Error>> {
    ll.rx_fwto().write(timeout as u64).await?;
    ll.sys_cfg()
        .modify(|v| {
            if timeout == 0 {
                v & !bits::SYS_CFG_RXWTOE
            } else {
                v | bits::SYS_CFG_RXWTOE
            }
        })
        .await
}

/// Transaction engine for one DW1000
///
/// `N` receive buffers of `L` bytes each bound how many received frames can
/// be outstanding. `D` is the timer used for caller-side timeouts.
pub struct Transceiver<'a, M: RawMutex, B, D, const N: usize, const L: usize> {
    ll: Mutex<M, ll::DW1000<B>>,
    // One transaction at a time. The guard also lends out the timer.
    gate: Mutex<M, D>,
    done: Signal<M, ()>,
    shared: BlockingMutex<M, RefCell<Shared>>,
    pool: FramePool<M, N, L>,
    handler: Handler<'a, M, N>,
    info: DeviceInfo,
    config: LinkConfig,
}

impl<'a, M, B, D, const N: usize, const L: usize> Transceiver<'a, M, B, D, N, L>
where
    M: RawMutex,
    B: RegisterBus,
    D: DelayNs,
{
    /// Take over a ready device
    ///
    /// Unmasks the events the engine consumes. If that fails, the device is
    /// handed back with the error.
    pub async fn new(
        mut dw1000: DW1000<B, Ready>,
        timer: D,
        config: LinkConfig,
        handler: Handler<'a, M, N>,
    ) -> Result<Self, (DW1000<B, Ready>, Error<B::Error>)> {
        if let Err(error) = dw1000.enable_interrupts().await {
            return Err((dw1000, error));
        }

        let DW1000 { ll, seq, info, .. } = dw1000;

        Ok(Transceiver {
            ll: Mutex::new(ll),
            gate: Mutex::new(timer),
            done: Signal::new(),
            shared: BlockingMutex::new(RefCell::new(Shared {
                status: Status::INITIALIZED,
                phase: Phase::Idle,
                seq,
                last: TransactionState::Idle,
            })),
            pool: FramePool::new(),
            handler,
            info,
            config,
        })
    }

    /// Give the device back, masking its events
    pub async fn release(self) -> DW1000<B, Ready> {
        let seq = self.shared.lock(|s| s.borrow().seq);
        let mut dw1000 = DW1000 {
            ll: self.ll.into_inner(),
            seq,
            info: self.info,
            state: Ready,
        };

        if dw1000.disable_interrupts().await.is_err() {
            error!("transceiver: masking events failed");
        }
        dw1000
    }

    /// Shut the device down and disable its bus
    pub async fn free(self) -> DW1000<B, Uninitialized> {
        self.release().await.free()
    }

    /// Send `request` and wait for it to finish
    ///
    /// Returns the status after a completed transaction. On a fault the
    /// status flags are updated before the error is returned, and the
    /// sequence number is rolled back.
    pub async fn send(&self, request: Request<'_>) -> Result<Status, Error<B::Error>> {
        let mut timer = self.gate.lock().await;
        self.force_idle().await?;

        let mut frame = [0; MAX_FRAME_LEN];
        let len = encode_frame(
            &mut frame,
            &LinkHeader {
                sequence: self.sequence(),
                pan_id: self.info.pan_id,
                source: self.info.short_addr,
                destination: request.destination,
            },
            request.payload,
        )?;

        // Reserving the response buffer counts against the caller's timeout.
        let deadline = deadline(&mut *timer, request.mode);
        pin_mut!(deadline);

        let slot = if request.wait_for_response {
            match self.reserve(deadline.as_mut()).await {
                Some(slot) => Some(slot),
                None => return Err(self.starved()),
            }
        } else {
            None
        };
        let seq = self.begin(Phase::Sending { slot }, true);
        debug!(
            "transceiver: send seq {}, {} bytes, response {}",
            seq,
            request.payload.len(),
            request.wait_for_response
        );

        if let Err(error) = self.start_transmit(&request, &frame[..len]).await {
            return Err(self.abort(error, true));
        }

        let outcome = self.wait(deadline).await;
        self.finish(outcome, true)
    }

    /// Turn the receiver on and wait for one frame
    ///
    /// `rx_timeout` is in UWB microseconds, 0 waits forever. The sequence
    /// number is not touched.
    pub async fn receive(&self, mode: Mode, rx_timeout: u16) -> Result<Status, Error<B::Error>> {
        let mut timer = self.gate.lock().await;
        self.force_idle().await?;

        let deadline = deadline(&mut *timer, mode);
        pin_mut!(deadline);

        let Some(slot) = self.reserve(deadline.as_mut()).await else {
            return Err(self.starved());
        };
        self.begin(Phase::WaitingResponse { slot }, false);
        debug!("transceiver: receive");

        if let Err(error) = self.start_receive(rx_timeout).await {
            return Err(self.abort(error, false));
        }

        let outcome = self.wait(deadline).await;
        self.finish(outcome, false)
    }

    /// Wait mode of control traffic, bounded by `request_timeout_ms`
    pub fn control_mode(&self) -> Mode {
        Mode::NonBlocking {
            timeout_ms: self.config.request_timeout_ms,
        }
    }

    /// Send an empty frame to `destination` and wait for its response
    ///
    /// Uses the [control mode](Self::control_mode) and the configured
    /// response timeout.
    pub async fn ping(&self, destination: u16) -> Result<Status, Error<B::Error>> {
        self.send(
            Request::new(&[])
                .to(destination)
                .mode(self.control_mode())
                .expect_response(self.config.resp_timeout),
        )
        .await
    }

    /// Pull one packet from `source` and send it in the
    /// [control mode](Self::control_mode)
    ///
    /// Returns `Ok(None)` if the source had nothing to send.
    pub async fn send_outbound(
        &self,
        source: &dyn PayloadSource,
        destination: Option<u16>,
    ) -> Result<Option<Status>, Error<B::Error>> {
        let mut buffer = [0; MAX_FRAME_LEN];
        let len = match source.consume_outbound(&mut buffer) {
            Some(len) if len > buffer.len() => {
                return Err(Error::BufferTooSmall { required_len: len })
            }
            Some(len) => len,
            None => return Ok(None),
        };

        let mut request = Request::new(&buffer[..len]).mode(self.control_mode());
        request.destination = destination;
        self.send(request).await.map(Some)
    }

    /// Read and clear the pending system events and act on them
    ///
    /// Call this from the DW1000 interrupt, or poll it.
    pub async fn service_irq(&self) -> Result<(), Error<B::Error>> {
        let pending = {
            let mut ll = self.ll.lock().await;
            let status = match ll.sys_status().read().await {
                Ok(status) => status & bits::ENGINE_EVENTS,
                Err(error) => {
                    error!("transceiver: reading SYS_STATUS failed");
                    return Err(error.into());
                }
            };
            if status != 0 {
                ll.sys_status().write(status).await?;
            }
            status
        };

        if pending & bits::TXFRS != 0 {
            self.handle_event(Event::TxDone).await?;
        }
        if pending & bits::RXFCG != 0 {
            self.handle_event(Event::RxDone).await?;
        } else if pending & bits::RX_ERRORS != 0 {
            self.handle_event(Event::RxError).await?;
        } else if pending & bits::RX_TIMEOUTS != 0 {
            self.handle_event(Event::RxTimeout).await?;
        }

        Ok(())
    }

    /// Feed one completion event to the engine
    ///
    /// Events that arrive after the caller stopped waiting are drained, and
    /// events with no transaction in flight are ignored.
    pub async fn handle_event(&self, event: Event) -> Result<(), Error<B::Error>> {
        trace!("transceiver: event {:?}", event);

        let action = self
            .shared
            .lock(|shared| transition(&mut shared.borrow_mut(), event));

        match action {
            Action::Nothing => {}
            Action::Signal => self.done.signal(()),
            Action::Receive(slot) => return self.receive_frame(slot).await,
            Action::Release { slot, signal } => {
                self.pool.release(slot);
                if signal {
                    self.done.signal(());
                }
            }
            Action::Drain(slot) => {
                debug!("transceiver: drained late {:?}", event);
                if let Some(slot) = slot {
                    self.pool.release(slot);
                }
            }
            Action::Spurious => warn!("transceiver: {:?} without a transaction", event),
        }

        Ok(())
    }

    /// Status flags of the last transaction
    pub fn status(&self) -> Status {
        self.shared.lock(|s| s.borrow().status)
    }

    /// Sequence number the next frame will carry
    pub fn sequence(&self) -> u8 {
        self.shared.lock(|s| s.borrow().seq.0)
    }

    /// Current or last transaction state
    pub fn state(&self) -> TransactionState {
        self.shared.lock(|s| {
            let s = s.borrow();
            match s.phase {
                Phase::Sending { .. } => TransactionState::Sending,
                Phase::WaitingResponse { .. } | Phase::Delivering => {
                    TransactionState::WaitingResponse
                }
                Phase::Finished(outcome) => outcome.state(),
                Phase::Idle | Phase::Abandoned { .. } => s.last,
            }
        })
    }

    /// Identity of the device
    pub fn info(&self) -> DeviceInfo {
        self.info
    }

    /// The engine configuration
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// The receive buffer pool
    pub fn pool(&self) -> &FramePool<M, N, L> {
        &self.pool
    }

    fn begin(&self, phase: Phase, count: bool) -> u8 {
        self.done.reset();
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            s.status.remove(Status::FAULTS);
            s.phase = phase;

            let seq = s.seq.0;
            if count {
                s.seq += Wrapping(1);
            }
            seq
        })
    }

    async fn start_transmit(
        &self,
        request: &Request<'_>,
        frame: &[u8],
    ) -> Result<(), Error<B::Error>> {
        let mut ll = self.ll.lock().await;

        ll.tx_buffer().write_bytes(0, frame).await?;

        let flen = (frame.len() + FCS_LEN) as u64;
        let ranging = if request.ranging { bits::TX_FCTRL_TR } else { 0 };
        ll.tx_fctrl()
            .modify(|v| {
                let v = v
                    & !(bits::TX_FCTRL_TFLEN_MASK | bits::TX_FCTRL_TR | bits::TX_FCTRL_TXBOFFS_MASK);
                v | flen | ranging
            })
            .await?;

        let mut ctrl = bits::SYS_CTRL_TXSTRT;
        if request.wait_for_response {
            arm_rx_timeout(&mut *ll, request.resp_timeout).await?;
            ctrl |= bits::SYS_CTRL_WAIT4RESP;
        }
        ll.sys_ctrl().write(ctrl).await?;

        if ll.sys_status().read().await? & bits::HPDWARN != 0 {
            ll.sys_ctrl().write(bits::SYS_CTRL_TRXOFF).await?;
            ll.sys_status().write(bits::HPDWARN).await?;
            return Err(Error::TransmitFault);
        }

        Ok(())
    }

    async fn start_receive(&self, rx_timeout: u16) -> Result<(), Error<B::Error>> {
        let mut ll = self.ll.lock().await;
        arm_rx_timeout(&mut *ll, rx_timeout).await?;
        ll.sys_ctrl().write(bits::SYS_CTRL_RXENAB).await?;
        Ok(())
    }

    async fn reserve<F>(&self, deadline: Pin<&mut F>) -> Option<Slot>
    where
        F: Future<Output = ()>,
    {
        let reserve = self.pool.reserve();
        pin_mut!(reserve);

        match select(reserve, deadline).await {
            Either::Left((slot, _)) => Some(slot),
            Either::Right(_) => None,
        }
    }

    // All buffers stayed owned until the deadline. Nothing was started and
    // the sequence number was not taken.
    fn starved(&self) -> Error<B::Error> {
        warn!("transceiver: no receive buffer before the request timed out");
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            s.status.remove(Status::FAULTS);
            s.status.insert(Status::REQUEST_TIMEOUT);
            s.last = TransactionState::TimedOut;
        });
        Error::RequestTimeout
    }

    async fn wait<F>(&self, mut deadline: Pin<&mut F>) -> Outcome
    where
        F: Future<Output = ()>,
    {
        loop {
            let done = self.done.wait();
            pin_mut!(done);

            match select(done, deadline.as_mut()).await {
                Either::Left(_) => {
                    if let Some(outcome) = self.take_finished() {
                        return outcome;
                    }
                }
                Either::Right(_) => return self.abandon(),
            }
        }
    }

    fn take_finished(&self) -> Option<Outcome> {
        self.shared.lock(|s| {
            let mut guard = s.borrow_mut();
            let s = &mut *guard;
            match s.phase {
                Phase::Finished(outcome) => {
                    s.phase = Phase::Idle;
                    Some(outcome)
                }
                _ => None,
            }
        })
    }

    fn abandon(&self) -> Outcome {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            let slot = match mem::replace(&mut s.phase, Phase::Idle) {
                // Finished while the timer fired.
                Phase::Finished(outcome) => return outcome,
                Phase::Sending { slot } | Phase::Abandoned { slot } => slot,
                Phase::WaitingResponse { slot } => Some(slot),
                Phase::Delivering | Phase::Idle => None,
            };

            warn!("transceiver: request timed out");
            s.phase = Phase::Abandoned { slot };
            s.status.insert(Status::REQUEST_TIMEOUT);
            Outcome::RequestTimeout
        })
    }

    // The transaction never got going. Whatever the hardware still does is
    // cleaned up by the next `force_idle`.
    fn abort(&self, error: Error<B::Error>, counted: bool) -> Error<B::Error> {
        let released = self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            let slot = match mem::replace(&mut s.phase, Phase::Idle) {
                Phase::Sending { slot } | Phase::Abandoned { slot } => slot,
                Phase::WaitingResponse { slot } => Some(slot),
                Phase::Delivering | Phase::Finished(_) | Phase::Idle => None,
            };

            if counted {
                s.seq -= Wrapping(1);
            }
            s.last = TransactionState::Faulted;

            if matches!(error, Error::TransmitFault) {
                s.status.insert(Status::START_TX_ERROR);
                slot
            } else {
                s.phase = Phase::Abandoned { slot };
                None
            }
        });

        if let Some(slot) = released {
            self.pool.release(slot);
        }
        error
    }

    fn finish(&self, outcome: Outcome, counted: bool) -> Result<Status, Error<B::Error>> {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            s.last = outcome.state();

            let error = match outcome {
                Outcome::Completed => {
                    debug!("transceiver: completed");
                    return Ok(s.status);
                }
                Outcome::ReceiveTimeout => Error::ReceiveTimeout,
                Outcome::ReceiveFault => Error::ReceiveFault,
                Outcome::RequestTimeout => Error::RequestTimeout,
            };

            if counted {
                s.seq -= Wrapping(1);
            }
            Err(error)
        })
    }

    // Runs with the gate held, so no transaction of ours is in flight. Any
    // phase left over belongs to a caller that gave up or was dropped.
    async fn force_idle(&self) -> Result<(), Error<B::Error>> {
        let stale = self.shared.lock(|s| {
            match mem::replace(&mut s.borrow_mut().phase, Phase::Idle) {
                Phase::Idle | Phase::Finished(_) => None,
                Phase::Sending { slot } | Phase::Abandoned { slot } => Some(slot),
                Phase::WaitingResponse { slot } => Some(Some(slot)),
                Phase::Delivering => Some(None),
            }
        });

        let Some(slot) = stale else {
            return Ok(());
        };

        warn!("transceiver: forcing idle after an abandoned transaction");
        if let Some(slot) = slot {
            self.pool.release(slot);
        }

        let mut ll = self.ll.lock().await;
        ll.sys_ctrl().write(bits::SYS_CTRL_TRXOFF).await?;
        ll.sys_status().write(bits::ENGINE_EVENTS).await?;

        Ok(())
    }

    async fn receive_frame(&self, slot: Slot) -> Result<(), Error<B::Error>> {
        let copied = self.copy_frame(&slot).await;
        let outcome = match copied {
            Ok(true) => Outcome::Completed,
            _ => Outcome::ReceiveFault,
        };

        let current = self.shared.lock(|s| {
            let mut guard = s.borrow_mut();
            let s = &mut *guard;
            match s.phase {
                Phase::Delivering => {
                    if outcome != Outcome::Completed {
                        s.status.insert(Status::RX_ERROR);
                    }
                    s.phase = Phase::Finished(outcome);
                    true
                }
                // The caller gave up while the frame was copied.
                Phase::Abandoned { slot: None } => {
                    s.phase = Phase::Idle;
                    false
                }
                _ => false,
            }
        });

        if !current {
            debug!("transceiver: drained frame of an abandoned transaction");
            self.pool.release(slot);
            return copied.map(|_| ());
        }
        self.done.signal(());

        match copied {
            Ok(true) => {
                self.dispatch(slot).await;
                Ok(())
            }
            Ok(false) => {
                warn!("transceiver: dropped frame without link tag");
                self.pool.release(slot);
                Ok(())
            }
            Err(error) => {
                error!("transceiver: reading the received frame failed");
                self.pool.release(slot);
                Err(error)
            }
        }
    }

    // Leaves only the payload in the buffer. `Ok(false)` if the frame is not
    // a link frame or doesn't fit.
    async fn copy_frame(&self, slot: &Slot) -> Result<bool, Error<B::Error>> {
        let mut ll = self.ll.lock().await;
        let finfo = ll.rx_finfo().read().await?;
        let len = ((finfo & bits::RX_FINFO_RXFLEN_MASK) as usize).saturating_sub(FCS_LEN);

        let mut frame = self.pool.lock(slot).await;
        let Some(buffer) = frame.fill(len) else {
            warn!("transceiver: {} byte frame exceeds the pool buffer", len);
            return Ok(false);
        };
        ll.rx_buffer().read_bytes(0, buffer).await?;
        drop(ll);

        let header_len = match decode_frame(frame.as_slice()) {
            Some(link) => len - link.payload.len(),
            None => return Ok(false),
        };
        frame.advance(header_len);

        Ok(true)
    }

    async fn dispatch(&self, slot: Slot) {
        match &self.handler {
            Handler::Transfer(sink) => {
                {
                    let frame = self.pool.lock(&slot).await;
                    sink.deliver(frame.as_slice());
                }
                self.pool.release(slot);
            }
            Handler::Ranging(queue) => {
                if let Err(item) = queue.push(WorkItem { slot }) {
                    self.pool.release(item.slot);
                }
            }
            Handler::Ping => {
                trace!("transceiver: ping response");
                self.pool.release(slot);
            }
        }
    }
}
