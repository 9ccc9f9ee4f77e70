//! Periodic peer-to-peer ranging
//!
//! The master node walks through every pair of the other nodes, one pair per
//! tick, and asks the first node of the pair to range against the second.
//! The response lands in a pool buffer, and the interrupt side only queues
//! that buffer. Decoding the response and updating the [`RangingTable`]
//! happens later, in [`RangingSession::process_next`].

use core::{
    cell::RefCell,
    sync::atomic::{AtomicBool, Ordering},
};

use byte::{
    ctx::{Endian, LE},
    BytesExt, TryRead, TryWrite,
};
use embassy_sync::{
    blocking_mutex::{raw::RawMutex, Mutex as BlockingMutex},
    channel::{Channel, TrySendError},
    signal::Signal,
};
use embedded_hal_async::delay::DelayNs;
use heapless::Vec;

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{
    configs::RangingConfig,
    hl::{Mode, PayloadSink, Request, Status, Transceiver},
    ll::RegisterBus,
    pool::Slot,
    time::Duration,
    Error,
};

/// Encoded length of a [`TwrFrame`]
pub const TWR_FRAME_LEN: usize = 11;

/// Ranging request or response as carried in a link frame payload
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TwrFrame {
    /// [`TwrFrame::REQUEST`] or [`TwrFrame::RESPONSE`]
    pub code: u8,
    /// Address of the node running the schedule
    pub master: u16,
    /// The node that measures
    pub node1: u16,
    /// The node it measures against
    pub node2: u16,
    /// Measured time of flight, 0 in requests
    pub tof: u32,
}

impl TwrFrame {
    /// Master asks node 1 to range against node 2
    pub const REQUEST: u8 = 0x11;
    /// Node 1 reports the time of flight
    pub const RESPONSE: u8 = 0x12;

    /// A request for the pair `entry`
    pub fn request(master: u16, entry: &RangingTableEntry) -> Self {
        TwrFrame {
            code: Self::REQUEST,
            master,
            node1: entry.node1,
            node2: entry.node2,
            tof: 0,
        }
    }
}

impl<'a> TryRead<'a, Endian> for TwrFrame {
    fn try_read(bytes: &'a [u8], endian: Endian) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;

        let frame = TwrFrame {
            code: bytes.read_with(offset, endian)?,
            master: bytes.read_with(offset, endian)?,
            node1: bytes.read_with(offset, endian)?,
            node2: bytes.read_with(offset, endian)?,
            tof: bytes.read_with(offset, endian)?,
        };

        Ok((frame, *offset))
    }
}

impl TryWrite<Endian> for TwrFrame {
    fn try_write(self, bytes: &mut [u8], endian: Endian) -> byte::Result<usize> {
        let offset = &mut 0;

        bytes.write_with(offset, self.code, endian)?;
        bytes.write_with(offset, self.master, endian)?;
        bytes.write_with(offset, self.node1, endian)?;
        bytes.write_with(offset, self.node2, endian)?;
        bytes.write_with(offset, self.tof, endian)?;

        Ok(*offset)
    }
}

/// Last known range between two nodes
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangingTableEntry {
    /// First node of the pair
    pub node1: u16,
    /// Second node of the pair
    pub node2: u16,
    /// Range estimate, `None` until the first response
    pub range: Option<f32>,
}

/// Number of pairs among the non-master nodes
const fn pair_count(nodes: usize) -> usize {
    let others = nodes.saturating_sub(1);
    others * others.saturating_sub(1) / 2
}

/// Fixed-capacity table with one entry per pair of non-master nodes
///
/// The first address passed in is the master, which ranges with nobody.
#[derive(Clone, Debug)]
pub struct RangingTable<const CAP: usize> {
    master: u16,
    nodes: usize,
    entries: Vec<RangingTableEntry, CAP>,
}

impl<const CAP: usize> RangingTable<CAP> {
    /// Build the table for `nodes`, master first
    pub fn new<E>(nodes: &[u16]) -> Result<Self, Error<E>> {
        let mut table = RangingTable {
            master: 0,
            nodes: nodes.len(),
            entries: Vec::new(),
        };
        table.fill(nodes)?;
        Ok(table)
    }

    /// Rewrite the addresses and forget all ranges
    ///
    /// The node count can't change.
    pub fn reinit<E>(&mut self, nodes: &[u16]) -> Result<(), Error<E>> {
        if nodes.len() != self.nodes {
            return Err(Error::TableResize {
                expected: self.entries.len(),
                found: pair_count(nodes.len()),
            });
        }
        self.fill(nodes)
    }

    fn fill<E>(&mut self, nodes: &[u16]) -> Result<(), Error<E>> {
        let required = pair_count(nodes.len());
        if required > CAP {
            return Err(Error::TableCapacity { required });
        }

        self.master = nodes.first().copied().unwrap_or_default();
        self.entries.clear();

        let others = nodes.get(1..).unwrap_or_default();
        for (i, &node1) in others.iter().enumerate() {
            for &node2 in &others[i + 1..] {
                // Capacity was checked above.
                let _ = self.entries.push(RangingTableEntry {
                    node1,
                    node2,
                    range: None,
                });
            }
        }

        Ok(())
    }

    /// Address of the master node
    pub fn master(&self) -> u16 {
        self.master
    }

    /// All entries, in schedule order
    pub fn entries(&self) -> &[RangingTableEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no pairs
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry for the pair, in either order
    pub fn get(&self, node1: u16, node2: u16) -> Option<&RangingTableEntry> {
        self.entries.iter().find(|e| e.matches(node1, node2))
    }

    /// Store `range` for the pair, returning the updated entry
    pub fn update(&mut self, node1: u16, node2: u16, range: f32) -> Option<RangingTableEntry> {
        let entry = self.entries.iter_mut().find(|e| e.matches(node1, node2))?;
        entry.range = Some(range);
        Some(*entry)
    }
}

impl RangingTableEntry {
    fn matches(&self, node1: u16, node2: u16) -> bool {
        (self.node1, self.node2) == (node1, node2) || (self.node1, self.node2) == (node2, node1)
    }
}

/// A received ranging response waiting for post-processing
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct WorkItem {
    /// Pool buffer holding the payload
    pub slot: Slot,
}

/// Deferred-work queue between the interrupt side and the ranging session
///
/// Holds at most `N` items, as many as the receive pool has buffers, so a
/// push while enabled can't overflow.
pub struct WorkQueue<M: RawMutex, const N: usize> {
    items: Channel<M, WorkItem, N>,
    enabled: AtomicBool,
}

impl<M: RawMutex, const N: usize> WorkQueue<M, N> {
    /// Create an empty, enabled queue
    pub const fn new() -> Self {
        WorkQueue {
            items: Channel::new(),
            enabled: AtomicBool::new(true),
        }
    }

    /// Queue `item`, or hand it back if post-processing is off
    pub fn push(&self, item: WorkItem) -> Result<(), WorkItem> {
        if !self.is_enabled() {
            return Err(item);
        }

        self.items.try_send(item).map_err(|TrySendError::Full(item)| {
            error!("ranging: work queue full");
            item
        })
    }

    /// Wait for the next item
    pub async fn pop(&self) -> WorkItem {
        self.items.receive().await
    }

    /// Take the next item if there is one
    pub fn try_pop(&self) -> Option<WorkItem> {
        self.items.try_receive().ok()
    }

    /// Turn post-processing on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether pushes are accepted
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl<M: RawMutex, const N: usize> Default for WorkQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

struct SessionState {
    running: bool,
    idx: usize,
    valid: bool,
    faults: Status,
}

/// The ranging schedule of one master node
pub struct RangingSession<'t, 'a, M, B, D, const N: usize, const L: usize, const CAP: usize>
where
    M: RawMutex,
{
    link: &'t Transceiver<'a, M, B, D, N, L>,
    queue: &'t WorkQueue<M, N>,
    config: RangingConfig,
    table: BlockingMutex<M, RefCell<RangingTable<CAP>>>,
    state: BlockingMutex<M, RefCell<SessionState>>,
    armed: Signal<M, ()>,
    estimator: fn(Duration) -> f32,
    downstream: Option<&'t dyn PayloadSink>,
}

impl<'t, 'a, M, B, D, const N: usize, const L: usize, const CAP: usize>
    RangingSession<'t, 'a, M, B, D, N, L, CAP>
where
    M: RawMutex,
    B: RegisterBus,
    D: DelayNs,
{
    /// Create a stopped session
    ///
    /// `queue` has to be the queue `link` was built with in
    /// [`Handler::Ranging`](crate::hl::Handler::Ranging). `estimator` turns
    /// a reported time of flight into a range.
    pub fn new(
        link: &'t Transceiver<'a, M, B, D, N, L>,
        queue: &'t WorkQueue<M, N>,
        table: RangingTable<CAP>,
        config: RangingConfig,
        estimator: fn(Duration) -> f32,
    ) -> Self {
        queue.set_enabled(config.postprocess);

        RangingSession {
            link,
            queue,
            config,
            table: BlockingMutex::new(RefCell::new(table)),
            state: BlockingMutex::new(RefCell::new(SessionState {
                running: false,
                idx: 0,
                valid: false,
                faults: Status::empty(),
            })),
            armed: Signal::new(),
            estimator,
            downstream: None,
        }
    }

    /// Forward every processed response payload to `sink`
    pub fn with_downstream(mut self, sink: &'t dyn PayloadSink) -> Self {
        self.downstream = Some(sink);
        self
    }

    /// Restart the schedule from the first pair
    pub fn start(&self) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.idx = 0;
            s.valid = false;
            s.running = true;
        });
        info!("ranging: started");
        self.armed.signal(());
    }

    /// Stop issuing requests
    ///
    /// A request already in flight completes or faults normally.
    pub fn stop(&self) {
        self.state.lock(|s| s.borrow_mut().running = false);
        info!("ranging: stopped");
    }

    /// Whether the schedule is running
    pub fn is_running(&self) -> bool {
        self.state.lock(|s| s.borrow().running)
    }

    /// Whether at least one range was stored since the last start
    pub fn is_valid(&self) -> bool {
        self.state.lock(|s| s.borrow().valid)
    }

    /// Fault flags of the last request
    pub fn last_faults(&self) -> Status {
        self.state.lock(|s| s.borrow().faults)
    }

    /// Turn deferred post-processing on or off
    pub fn set_postprocess(&self, enabled: bool) {
        self.queue.set_enabled(enabled);
    }

    /// A copy of the ranging table
    pub fn table(&self) -> RangingTable<CAP> {
        self.table.lock(|t| t.borrow().clone())
    }

    /// Reinitialize the table with new addresses, same node count
    pub fn reinit(&self, nodes: &[u16]) -> Result<(), Error<B::Error>> {
        self.table.lock(|t| t.borrow_mut().reinit(nodes))
    }

    /// Drive the schedule
    ///
    /// Waits for [`start`](Self::start), ticks every `period_ms` while
    /// running, and waits again after [`stop`](Self::stop). Never returns.
    pub async fn run<T: DelayNs>(&self, timer: &mut T) {
        loop {
            while !self.is_running() {
                self.armed.wait().await;
            }

            timer.delay_ms(self.config.first_tick_ms).await;
            while self.is_running() {
                if self.tick().await.is_err() {
                    debug!("ranging: tick failed");
                }
                timer.delay_ms(self.config.period_ms).await;
            }
        }
    }

    /// Send one request to the next pair in rotation
    ///
    /// Returns `Ok(None)` if the table has no pairs.
    pub async fn tick(&self) -> Result<Option<Status>, Error<B::Error>> {
        let next = self.table.lock(|t| {
            let t = t.borrow();
            let idx = self.state.lock(|s| s.borrow().idx);
            t.entries()
                .get(idx % t.len().max(1))
                .map(|entry| TwrFrame::request(t.master(), entry))
        });
        let Some(request) = next else {
            debug!("ranging: no pairs to range");
            return Ok(None);
        };

        let mut payload = [0; TWR_FRAME_LEN];
        let len = &mut 0;
        payload.write_with(len, request, LE)?;

        trace!(
            "ranging: request {:#x} -> {:#x}",
            request.node1,
            request.node2
        );
        let result = self
            .link
            .send(
                Request::new(&payload[..*len])
                    .to(request.node1)
                    .mode(Mode::NonBlocking {
                        timeout_ms: self.config.request_timeout_ms,
                    })
                    .expect_response(self.config.resp_timeout)
                    .ranging(),
            )
            .await;

        let faults = match &result {
            Ok(status) => *status,
            Err(_) => self.link.status(),
        };
        let pairs = self.table.lock(|t| t.borrow().len());
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.idx = (s.idx + 1) % pairs.max(1);
            s.faults = Status::empty();
            for flag in [
                Status::START_TX_ERROR,
                Status::RX_TIMEOUT_ERROR,
                Status::RX_ERROR,
                Status::REQUEST_TIMEOUT,
            ] {
                if faults.contains(flag) {
                    s.faults.insert(flag);
                }
            }
        });

        result.map(Some)
    }

    /// Wait for the next queued response and process it
    pub async fn process_next(&self) -> Result<Option<RangingTableEntry>, Error<B::Error>> {
        let item = self.queue.pop().await;
        self.postprocess(item).await
    }

    /// Copy the response out of its buffer, release the buffer and update
    /// the matching table entry
    ///
    /// Returns the updated entry, or `None` if the payload was not a
    /// response for a known pair.
    pub async fn postprocess(
        &self,
        item: WorkItem,
    ) -> Result<Option<RangingTableEntry>, Error<B::Error>> {
        let pool = self.link.pool();
        let mut payload = [0; L];
        let len = pool.lock(&item.slot).await.copy_to(&mut payload);
        pool.release(item.slot);

        let payload = &payload[..len];
        let frame: TwrFrame = payload.read_with(&mut 0, LE)?;
        if frame.code != TwrFrame::RESPONSE {
            warn!("ranging: unexpected frame code {:#x}", frame.code);
            return Ok(None);
        }

        let range = (self.estimator)(Duration::from(frame.tof));
        let updated = self
            .table
            .lock(|t| t.borrow_mut().update(frame.node1, frame.node2, range));

        let Some(entry) = updated else {
            warn!(
                "ranging: response for unknown pair {:#x}/{:#x}",
                frame.node1,
                frame.node2
            );
            return Ok(None);
        };

        self.state.lock(|s| s.borrow_mut().valid = true);
        debug!(
            "ranging: {:#x}/{:#x} updated",
            entry.node1,
            entry.node2
        );

        if let Some(sink) = self.downstream {
            sink.deliver(payload);
        }
        Ok(Some(entry))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{
        configs::{Config, LinkConfig},
        hl::{encode_frame, Handler, LinkHeader, TransactionState, DW1000, MAX_FRAME_LEN},
        ll::bits,
        mock::{MockBus, RecordingSink, Registers, TokioDelay},
    };
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use futures::{
        future::{select, Either},
        pin_mut,
    };

    type Link<'a, 'r> = Transceiver<'a, NoopRawMutex, MockBus<'r>, TokioDelay, 2, 128>;
    type Queue = WorkQueue<NoopRawMutex, 2>;

    const MASTER: u16 = 0x0000;
    const NODES: [u16; 3] = [MASTER, 0x0001, 0x0002];

    fn estimate(tof: Duration) -> f32 {
        tof.value() as f32 / 10.0
    }

    async fn link<'a, 'r>(registers: &'r Registers, queue: &'a Queue) -> Link<'a, 'r> {
        let dw1000 = DW1000::new(MockBus::new(registers))
            .init(&Config::default())
            .await
            .unwrap();
        Transceiver::new(
            dw1000,
            TokioDelay,
            LinkConfig::default(),
            Handler::Ranging(queue),
        )
        .await
        .unwrap()
    }

    fn response(node1: u16, node2: u16, tof: u32) -> std::vec::Vec<u8> {
        let twr = TwrFrame {
            code: TwrFrame::RESPONSE,
            master: MASTER,
            node1,
            node2,
            tof,
        };
        let mut payload = [0; TWR_FRAME_LEN];
        payload.write_with(&mut 0, twr, LE).unwrap();

        let mut buffer = [0; MAX_FRAME_LEN];
        let header = LinkHeader {
            sequence: 0,
            pan_id: 0xdeca,
            source: node1,
            destination: Some(MASTER),
        };
        let len = encode_frame::<()>(&mut buffer, &header, &payload).unwrap();
        buffer[..len].to_vec()
    }

    // Answers the next request once the engine has sent it.
    async fn answer(link: &Link<'_, '_>, registers: &Registers, frame: std::vec::Vec<u8>) {
        while link.state() != TransactionState::Sending {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        registers.load_rx_frame(&frame);
        registers.raise(bits::TXFRS | bits::RXFCG);
        link.service_irq().await.unwrap();
    }

    #[test]
    fn table_holds_pairs_of_non_master_nodes() {
        let table = RangingTable::<8>::new::<()>(&[0x10, 0x11, 0x12, 0x13, 0x14]).unwrap();

        assert_eq!(table.len(), 6);
        assert_eq!(table.master(), 0x10);
        assert!(table.entries().iter().all(|e| e.range.is_none()));
        assert!(table.get(0x12, 0x11).is_some());
        assert!(table.get(0x10, 0x11).is_none());

        let table = RangingTable::<1>::new::<()>(&NODES).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!((table.entries()[0].node1, table.entries()[0].node2), (1, 2));
    }

    #[test]
    fn table_rejects_too_many_nodes() {
        assert!(matches!(
            RangingTable::<2>::new::<()>(&[0, 1, 2, 3]),
            Err(Error::TableCapacity { required: 3 })
        ));
    }

    #[test]
    fn reinit_keeps_the_node_count() {
        let mut table = RangingTable::<3>::new::<()>(&[0, 1, 2, 3]).unwrap();
        table.update(1, 2, 4.5).unwrap();

        table.reinit::<()>(&[0, 5, 6, 7]).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.get(1, 2).is_none());
        assert!(table.entries().iter().all(|e| e.range.is_none()));

        assert!(matches!(
            table.reinit::<()>(&[0, 5, 6]),
            Err(Error::TableResize {
                expected: 3,
                found: 1
            })
        ));
    }

    #[test]
    fn twr_frame_layout_is_little_endian() {
        let frame = TwrFrame {
            code: TwrFrame::REQUEST,
            master: 0x0102,
            node1: 0x0304,
            node2: 0x0506,
            tof: 0x0708_090a,
        };

        let mut bytes = [0; TWR_FRAME_LEN];
        let len = &mut 0;
        bytes.write_with(len, frame, LE).unwrap();
        assert_eq!(*len, TWR_FRAME_LEN);
        assert_eq!(
            bytes,
            [0x11, 0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x0a, 0x09, 0x08, 0x07]
        );

        assert!(bytes[..4].read_with::<TwrFrame>(&mut 0, LE).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn each_tick_updates_one_entry() {
        let registers = Registers::new();
        let queue = Queue::new();
        let link = link(&registers, &queue).await;
        let table = RangingTable::<1>::new::<()>(&NODES).unwrap();
        let session = RangingSession::new(&link, &queue, table, RangingConfig::default(), estimate);

        session.start();
        for k in 1..=4u32 {
            let (sent, _) = tokio::join!(
                session.tick(),
                answer(&link, &registers, response(1, 2, k * 100))
            );
            assert!(sent.unwrap().is_some());
            assert_eq!(registers.get_u64(0x08, 0, 4) & bits::TX_FCTRL_TR, bits::TX_FCTRL_TR);

            if k == 1 {
                // Nothing is parsed until the deferred work runs.
                assert_eq!(session.table().entries()[0].range, None);
            }
            let entry = session.process_next().await.unwrap().unwrap();

            assert_eq!((entry.node1, entry.node2), (1, 2));
            assert_eq!(entry.range, Some(k as f32 * 10.0));
            assert_eq!(session.table().len(), 1);
            assert_eq!(link.pool().outstanding(), 0);
        }
        assert!(session.is_valid());
        assert_eq!(session.last_faults().bits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_rotate_through_pairs() {
        let registers = Registers::new();
        let queue = Queue::new();
        let link = link(&registers, &queue).await;
        let table = RangingTable::<3>::new::<()>(&[MASTER, 1, 2, 3]).unwrap();
        let session = RangingSession::new(&link, &queue, table, RangingConfig::default(), estimate);

        let expected = [(1, 2), (1, 3), (2, 3), (1, 2)];
        for (k, (node1, node2)) in expected.into_iter().enumerate() {
            let (sent, _) = tokio::join!(
                session.tick(),
                answer(&link, &registers, response(node1, node2, 50))
            );
            sent.unwrap();

            let sent = registers.writes_to(0x09).pop().unwrap();
            let request: TwrFrame = crate::hl::decode_frame(&sent)
                .unwrap()
                .payload
                .read_with(&mut 0, LE)
                .unwrap();
            assert_eq!((request.node1, request.node2), (node1, node2), "tick {}", k);
            assert_eq!(request.code, TwrFrame::REQUEST);

            let before = session.table();
            let entry = session.process_next().await.unwrap().unwrap();
            let after = session.table();

            let changed = before
                .entries()
                .iter()
                .zip(after.entries())
                .filter(|(b, a)| b != a)
                .count();
            assert!(changed <= 1);
            assert_eq!((entry.node1, entry.node2), (node1, node2));
            assert_eq!(after.get(node1, node2).unwrap().range, Some(5.0));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_tick_records_fault_and_moves_on() {
        let registers = Registers::new();
        let queue = Queue::new();
        let link = link(&registers, &queue).await;
        let table = RangingTable::<3>::new::<()>(&[MASTER, 1, 2, 3]).unwrap();
        let config = RangingConfig {
            request_timeout_ms: 100,
            ..RangingConfig::default()
        };
        let session = RangingSession::new(&link, &queue, table, config, estimate);

        assert!(matches!(session.tick().await, Err(Error::RequestTimeout)));
        assert!(session.last_faults().request_timeout());

        let (sent, _) = tokio::join!(
            session.tick(),
            answer(&link, &registers, response(1, 3, 10))
        );
        sent.unwrap();
        assert_eq!(session.last_faults().bits(), 0);

        let entry = session.process_next().await.unwrap().unwrap();
        assert_eq!((entry.node1, entry.node2), (1, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_postprocess_releases_immediately() {
        let registers = Registers::new();
        let queue = Queue::new();
        let link = link(&registers, &queue).await;
        let table = RangingTable::<1>::new::<()>(&NODES).unwrap();
        let config = RangingConfig {
            postprocess: false,
            ..RangingConfig::default()
        };
        let session = RangingSession::new(&link, &queue, table, config, estimate);

        let (sent, _) = tokio::join!(
            session.tick(),
            answer(&link, &registers, response(1, 2, 10))
        );
        sent.unwrap();

        assert!(queue.try_pop().is_none());
        assert_eq!(link.pool().outstanding(), 0);
        assert_eq!(session.table().entries()[0].range, None);

        session.set_postprocess(true);
        assert!(queue.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_pair_is_ignored_and_downstream_sees_payloads() {
        let registers = Registers::new();
        let queue = Queue::new();
        let sink = RecordingSink::default();
        let link = link(&registers, &queue).await;
        let table = RangingTable::<1>::new::<()>(&NODES).unwrap();
        let session = RangingSession::new(&link, &queue, table, RangingConfig::default(), estimate)
            .with_downstream(&sink);

        let (sent, _) = tokio::join!(
            session.tick(),
            answer(&link, &registers, response(7, 8, 10))
        );
        sent.unwrap();
        assert!(session.process_next().await.unwrap().is_none());
        assert!(sink.payloads().is_empty());
        assert!(!session.is_valid());

        let (sent, _) = tokio::join!(
            session.tick(),
            answer(&link, &registers, response(2, 1, 10))
        );
        sent.unwrap();
        assert!(session.process_next().await.unwrap().is_some());
        assert_eq!(sink.payloads().len(), 1);
        assert_eq!(link.pool().outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_only_while_started() {
        let registers = Registers::new();
        let queue = Queue::new();
        let link = link(&registers, &queue).await;
        let table = RangingTable::<1>::new::<()>(&NODES).unwrap();
        let session = RangingSession::new(&link, &queue, table, RangingConfig::default(), estimate);

        let mut timer = TokioDelay;
        let run = session.run(&mut timer);
        let driver = async {
            // Stopped sessions don't send.
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            assert!(registers.writes_to(0x09).is_empty());

            session.start();
            for k in 1..=3u32 {
                answer(&link, &registers, response(1, 2, k)).await;
                session.process_next().await.unwrap();
            }
            session.stop();
            registers.writes_to(0x09).len()
        };
        pin_mut!(run);
        pin_mut!(driver);

        let sent = match select(run, driver).await {
            Either::Left(_) => unreachable!(),
            Either::Right((sent, _)) => sent,
        };
        assert_eq!(sent, 3);
        assert_eq!(session.table().entries()[0].range, Some(0.3));
    }
}
