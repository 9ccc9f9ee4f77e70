//! Receive buffer pool
//!
//! A fixed set of `N` frame buffers of `L` bytes each. A buffer has to be
//! reserved before a receive is started and released once its contents have
//! been copied out. When all `N` buffers are owned, [`FramePool::reserve`]
//! suspends until one is released, which pushes back on the radio instead of
//! buffering without bound.

use core::{cell::RefCell, convert::Infallible};

use embassy_sync::{
    blocking_mutex::{raw::RawMutex, Mutex as BlockingMutex},
    channel::Channel,
    mutex::{Mutex, MutexGuard},
};

#[cfg(feature = "defmt")]
use defmt::Format;

/// Ownership token for one pool buffer
///
/// A `Slot` is handed out by [`FramePool::reserve`] and must be given back
/// with [`FramePool::release`] exactly once.
#[derive(Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Slot(usize);

impl Slot {
    /// Position of the buffer in the pool
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Contents of one pool buffer
pub struct Frame<const L: usize> {
    data: [u8; L],
    len: usize,
}

impl<const L: usize> Frame<L> {
    const fn new() -> Self {
        Frame { data: [0; L], len: 0 }
    }

    /// The valid bytes of the buffer
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Mutable access to the first `len` bytes, which become the valid bytes
    ///
    /// Returns `None` if `len` is larger than the buffer.
    pub fn fill(&mut self, len: usize) -> Option<&mut [u8]> {
        if len > L {
            return None;
        }
        self.len = len;
        Some(&mut self.data[..len])
    }

    /// Drop the first `count` valid bytes, moving the rest to the front
    pub fn advance(&mut self, count: usize) {
        let count = count.min(self.len);
        self.data.copy_within(count..self.len, 0);
        self.len -= count;
    }

    /// Copy the valid bytes into `dst`, returning how many were copied
    pub fn copy_to(&self, dst: &mut [u8]) -> usize {
        let len = self.len.min(dst.len());
        dst[..len].copy_from_slice(&self.data[..len]);
        len
    }
}

struct PoolState<const N: usize> {
    cursor: usize,
    owned: [bool; N],
}

/// Fixed-size pool of receive buffers with a counting admission gate
pub struct FramePool<M: RawMutex, const N: usize, const L: usize> {
    buffers: [Mutex<M, Frame<L>>; N],
    state: BlockingMutex<M, RefCell<PoolState<N>>>,
    // One token per free buffer.
    permits: Channel<M, (), N>,
}

impl<M: RawMutex, const N: usize, const L: usize> FramePool<M, N, L> {
    /// Create a pool with all `N` buffers free
    pub fn new() -> Self {
        let permits = Channel::new();
        for _ in 0..N {
            // The channel holds exactly `N` tokens.
            let _ = permits.try_send(());
        }

        FramePool {
            buffers: core::array::from_fn(|_| Mutex::new(Frame::new())),
            state: BlockingMutex::new(RefCell::new(PoolState {
                cursor: 0,
                owned: [false; N],
            })),
            permits,
        }
    }

    /// Reserve the next free buffer, waiting until one is released if all
    /// of them are owned
    pub async fn reserve(&self) -> Slot {
        loop {
            self.permits.receive().await;
            if let Some(slot) = self.claim() {
                return slot;
            }
            error!("pool permit without a free buffer");
        }
    }

    /// Reserve the next free buffer without waiting
    pub fn try_reserve(&self) -> nb::Result<Slot, Infallible> {
        self.permits
            .try_receive()
            .map_err(|_| nb::Error::WouldBlock)?;
        self.claim().ok_or(nb::Error::WouldBlock)
    }

    /// Give a buffer back to the pool
    pub fn release(&self, slot: Slot) {
        let released = self.state.lock(|state| {
            let mut state = state.borrow_mut();
            match state.owned.get_mut(slot.0) {
                Some(owned) if *owned => {
                    *owned = false;
                    true
                }
                _ => false,
            }
        });

        if released {
            // Never more tokens than buffers, so there is always room.
            let _ = self.permits.try_send(());
            trace!("pool: released slot {}", slot.0);
        } else {
            warn!("pool: slot {} released while not reserved", slot.0);
        }
    }

    /// Lock the buffer behind `slot`
    pub async fn lock(&self, slot: &Slot) -> MutexGuard<'_, M, Frame<L>> {
        self.buffers[slot.0].lock().await
    }

    /// Number of buffers currently reserved
    pub fn outstanding(&self) -> usize {
        self.state
            .lock(|state| state.borrow().owned.iter().filter(|owned| **owned).count())
    }

    /// Number of buffers in the pool
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Size of each buffer in bytes
    pub const fn buffer_len(&self) -> usize {
        L
    }

    fn claim(&self) -> Option<Slot> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let index = (0..N)
                .map(|i| (state.cursor + i) % N)
                .find(|&index| !state.owned[index])?;

            state.owned[index] = true;
            state.cursor = (index + 1) % N;
            trace!("pool: reserved slot {}", index);

            Some(Slot(index))
        })
    }
}

impl<M: RawMutex, const N: usize, const L: usize> Default for FramePool<M, N, L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::cell::Cell;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    type Pool = FramePool<NoopRawMutex, 3, 16>;

    #[tokio::test]
    async fn reserve_follows_the_cursor() {
        let pool = Pool::new();

        let a = pool.reserve().await;
        let b = pool.reserve().await;
        let c = pool.reserve().await;
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        assert_eq!(pool.outstanding(), 3);

        pool.release(b);
        let d = pool.reserve().await;
        assert_eq!(d.index(), 1);

        pool.release(a);
        pool.release(c);
        pool.release(d);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn try_reserve_would_block_when_exhausted() {
        let pool = Pool::new();
        let slots = [
            pool.try_reserve().unwrap(),
            pool.try_reserve().unwrap(),
            pool.try_reserve().unwrap(),
        ];

        assert!(matches!(pool.try_reserve(), Err(nb::Error::WouldBlock)));

        for slot in slots {
            pool.release(slot);
        }
        assert!(pool.try_reserve().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn reserve_past_capacity_waits_for_release() {
        let pool = Pool::new();
        let first = pool.reserve().await;
        let _second = pool.reserve().await;
        let _third = pool.reserve().await;

        let released = Cell::new(false);
        let (slot, _) = tokio::join!(
            async {
                let slot = pool.reserve().await;
                assert!(released.get(), "fourth reserve returned before a release");
                slot
            },
            async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                released.set(true);
                pool.release(first);
            }
        );

        assert_eq!(slot.index(), 0);
        assert_eq!(pool.outstanding(), 3);
    }

    #[tokio::test]
    async fn double_release_does_not_inflate_capacity() {
        let pool = Pool::new();
        let slot = pool.reserve().await;
        let index = slot.index();

        pool.release(slot);
        pool.release(Slot(index));

        let _a = pool.try_reserve().unwrap();
        let _b = pool.try_reserve().unwrap();
        let _c = pool.try_reserve().unwrap();
        assert!(pool.try_reserve().is_err());
    }

    #[tokio::test]
    async fn frame_contents_are_copied_out() {
        let pool = Pool::new();
        let slot = pool.reserve().await;

        {
            let mut frame = pool.lock(&slot).await;
            frame.fill(4).unwrap().copy_from_slice(b"ping");
            assert!(frame.fill(17).is_none());
        }

        let mut out = [0; 8];
        let len = pool.lock(&slot).await.copy_to(&mut out);
        assert_eq!(&out[..len], b"ping");

        pool.lock(&slot).await.advance(2);
        assert_eq!(pool.lock(&slot).await.as_slice(), b"ng");

        pool.release(slot);
    }
}
