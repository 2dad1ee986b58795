// exposed API of the channel.

use super::{
    core,
    error::*,
};
use std::sync::Arc;


/// In-process FIFO handoff buffer between producers and consumers
///
/// A channel is created with a capacity -- [`bounded`](Channel::bounded) or
/// [`unbounded`](Channel::unbounded) -- and a diagnostic name. Values written with
/// [`write`](Channel::write) come out of [`read`](Channel::read) in write order. A consumer
/// that took a value it could not fully use can give it back with
/// [`send_back`](Channel::send_back), which makes it the value the very next read returns,
/// ahead of everything else buffered.
///
/// Reads and writes either complete without blocking (the `try_` variants) or suspend until
/// the channel can serve them. Suspended calls are served strictly in arrival order, readers
/// and writers each in their own FIFO queue. There is no timeout: a suspended call stays
/// pending until it is served or the channel is closed.
///
/// Closing the channel ([`close`](Channel::close) / [`close_with`](Channel::close_with)) fails
/// every pending read and write exactly once with the close reason, and every later operation
/// fails with [`ClosedError`]. Values still buffered at closure stay where they are and are
/// dropped with the channel.
///
/// Handles are cheap to clone; all clones refer to the same channel. `T: Send + 'static` is
/// required because suspended calls are resolved through a process-wide scheduler that may
/// drain on another thread.
pub struct Channel<T: Send + 'static>(core::Core<T>);

impl<T: Send + 'static> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel(self.0.clone())
    }
}

impl<T: Send + 'static> Channel<T> {
    /// Create a channel that buffers at most `capacity` values
    ///
    /// A capacity of zero means no value is ever buffered ahead of demand: a write is only
    /// granted while a reader is waiting for it.
    pub fn bounded(capacity: usize, name: impl Into<Arc<str>>) -> Self {
        Channel(core::Core::new(Some(capacity), name.into()))
    }

    /// Create a channel with no buffer limit
    ///
    /// Writes on an unbounded channel never wait for a slot and never observe a
    /// [`Full`](TryWriteErrorReason::Full) failure.
    pub fn unbounded(name: impl Into<Arc<str>>) -> Self {
        Channel(core::Core::new(None, name.into()))
    }

    /// The diagnostic name given at construction. No behavioral effect.
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Maximum number of buffered values, or `None` if unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.0.capacity()
    }

    /// Number of values currently buffered
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no values are currently buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// Whether a read performed right now would find a value
    ///
    /// False once the channel is closed.
    pub fn readable(&self) -> bool {
        self.0.readable()
    }

    /// Whether a write performed right now would find a free buffer slot
    ///
    /// Slots already promised to not-yet-spent [`WritePermit`]s count as taken. False once
    /// the channel is closed.
    pub fn writable(&self) -> bool {
        self.0.writable()
    }

    /// Remove and return the oldest buffered value, without blocking
    ///
    /// Returns `Ok(None)` when the buffer is empty: this is a best-effort read, not a
    /// guaranteed one. Fails only if the channel is closed.
    pub fn try_read(&self) -> Result<Option<T>, ClosedError> {
        self.0.try_read()
    }

    /// Append `value` at the buffer's tail, without blocking
    ///
    /// Fails with a [`Full`](TryWriteErrorReason::Full) reason when no slot is free, and with
    /// [`Closed`](TryWriteErrorReason::Closed) on a closed channel; either way the value is
    /// handed back inside the error.
    pub fn try_write(&self, value: T) -> Result<(), TryWriteError<T>> {
        self.0.try_write(value, false)
    }

    /// Give `value` back so the very next read returns it, without blocking
    ///
    /// Same preconditions as [`try_write`](Channel::try_write); the value jumps ahead of
    /// everything already buffered instead of queueing behind it.
    pub fn try_send_back(&self, value: T) -> Result<(), TryWriteError<T>> {
        self.0.try_write(value, true)
    }

    /// Read the oldest value, suspending until one is available
    ///
    /// Fails immediately if the channel is already closed, and fails with the close reason if
    /// it closes while the read is pending. Pending reads are served in arrival order.
    pub async fn read(&self) -> Result<T, ClosedError> {
        let ticket = self.0.register_reader()?;
        match ticket.await {
            Ok(result) => result,
            // the channel state was torn down without resolving the waiter
            Err(_) => Err(ClosedError::new(Arc::clone(self.0.name()), None)),
        }
    }

    /// Write `value` at the buffer's tail, suspending until a slot is granted
    ///
    /// Never observes a "full" failure: on a bounded channel at capacity the call waits for a
    /// read to free a slot. Fails with the close reason (handing the value back) if the
    /// channel is closed first. Pending writes are granted in arrival order.
    pub async fn write(&self, value: T) -> Result<(), WriteError<T>> {
        match self.reserve().await {
            Ok(permit) => permit.write(value),
            Err(reason) => Err(WriteError { value, reason }),
        }
    }

    /// Give `value` back, suspending until a slot is granted
    ///
    /// The suspending counterpart of [`try_send_back`](Channel::try_send_back): once a slot
    /// is granted, the value lands where the very next read will take it.
    pub async fn send_back(&self, value: T) -> Result<(), WriteError<T>> {
        match self.reserve().await {
            Ok(permit) => permit.send_back(value),
            Err(reason) => Err(WriteError { value, reason }),
        }
    }

    /// Wait for a write slot and take it as a single-use [`WritePermit`]
    ///
    /// The permit holds one buffer slot from the moment it is granted: the slot counts
    /// against capacity until the permit is spent or dropped. The holder is not required to
    /// spend the permit before yielding, but a slot granted against a waiting reader's demand
    /// stays dedicated to that handoff until the deposit lands.
    pub async fn reserve(&self) -> Result<WritePermit<T>, ClosedError> {
        let ticket = self.0.register_writer()?;
        match ticket.await {
            Ok(Ok(grant)) => Ok(WritePermit(grant)),
            Ok(Err(closed)) => Err(closed),
            // the channel state was torn down without resolving the waiter
            Err(_) => Err(ClosedError::new(Arc::clone(self.0.name()), None)),
        }
    }

    /// Close the channel with the default reason
    ///
    /// Every pending read and write fails exactly once, and every later operation fails with
    /// [`ClosedError`]. Values already buffered are not touched; they are dropped with the
    /// channel. A second close fails with [`AlreadyClosedError`].
    pub fn close(&self) -> Result<(), AlreadyClosedError> {
        self.0.close(None)
    }

    /// Close the channel, failing every pending read and write with `reason`
    ///
    /// The reason is also reported by every operation attempted after closure.
    pub fn close_with(&self, reason: impl Into<Arc<str>>) -> Result<(), AlreadyClosedError> {
        self.0.close(Some(reason.into()))
    }

    /// Split into write-side and read-side capability views
    ///
    /// The halves are clones of this channel restricted to one side of the API, for handing
    /// producers and consumers only the capability they need.
    pub fn split(self) -> (WriteHalf<T>, ReadHalf<T>) {
        (WriteHalf(self.clone()), ReadHalf(self))
    }
}


/// Single-use capability to deposit one value into a channel
///
/// Granted by [`Channel::reserve`] once a buffer slot is available. Both actions consume the
/// permit, so a grant can deposit at most one value and cannot mix `write` with `send_back`.
/// Dropping the permit unspent releases its slot back to the channel.
pub struct WritePermit<T: Send + 'static>(core::WriteGrant<T>);

impl<T: Send + 'static> std::fmt::Debug for WritePermit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePermit").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> WritePermit<T> {
    /// Deposit `value` at the buffer's tail
    ///
    /// Only fails if the channel was closed after the permit was granted; the value is
    /// handed back inside the error.
    pub fn write(self, value: T) -> Result<(), WriteError<T>> {
        self.0.spend(value, false)
    }

    /// Deposit `value` where the very next read will take it
    ///
    /// Only fails if the channel was closed after the permit was granted.
    pub fn send_back(self, value: T) -> Result<(), WriteError<T>> {
        self.0.spend(value, true)
    }
}


/// Read-side view of a channel
///
/// Exposes only the consuming operations plus closure. Cloneable; all clones and the channel
/// they were split from share state.
pub struct ReadHalf<T: Send + 'static>(Channel<T>);

impl<T: Send + 'static> Clone for ReadHalf<T> {
    fn clone(&self) -> Self {
        ReadHalf(self.0.clone())
    }
}

impl<T: Send + 'static> ReadHalf<T> {
    /// See [`Channel::name`]
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// See [`Channel::is_closed`]
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// See [`Channel::readable`]
    pub fn readable(&self) -> bool {
        self.0.readable()
    }

    /// See [`Channel::try_read`]
    pub fn try_read(&self) -> Result<Option<T>, ClosedError> {
        self.0.try_read()
    }

    /// See [`Channel::read`]
    pub async fn read(&self) -> Result<T, ClosedError> {
        self.0.read().await
    }

    /// See [`Channel::close`]
    pub fn close(&self) -> Result<(), AlreadyClosedError> {
        self.0.close()
    }

    /// See [`Channel::close_with`]
    pub fn close_with(&self, reason: impl Into<Arc<str>>) -> Result<(), AlreadyClosedError> {
        self.0.close_with(reason)
    }
}


/// Write-side view of a channel
///
/// Exposes only the producing operations plus closure. Cloneable; all clones and the channel
/// they were split from share state.
pub struct WriteHalf<T: Send + 'static>(Channel<T>);

impl<T: Send + 'static> Clone for WriteHalf<T> {
    fn clone(&self) -> Self {
        WriteHalf(self.0.clone())
    }
}

impl<T: Send + 'static> WriteHalf<T> {
    /// See [`Channel::name`]
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// See [`Channel::is_closed`]
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// See [`Channel::writable`]
    pub fn writable(&self) -> bool {
        self.0.writable()
    }

    /// See [`Channel::try_write`]
    pub fn try_write(&self, value: T) -> Result<(), TryWriteError<T>> {
        self.0.try_write(value)
    }

    /// See [`Channel::try_send_back`]
    pub fn try_send_back(&self, value: T) -> Result<(), TryWriteError<T>> {
        self.0.try_send_back(value)
    }

    /// See [`Channel::write`]
    pub async fn write(&self, value: T) -> Result<(), WriteError<T>> {
        self.0.write(value).await
    }

    /// See [`Channel::send_back`]
    pub async fn send_back(&self, value: T) -> Result<(), WriteError<T>> {
        self.0.send_back(value).await
    }

    /// See [`Channel::reserve`]
    pub async fn reserve(&self) -> Result<WritePermit<T>, ClosedError> {
        self.0.reserve().await
    }

    /// See [`Channel::close`]
    pub fn close(&self) -> Result<(), AlreadyClosedError> {
        self.0.close()
    }

    /// See [`Channel::close_with`]
    pub fn close_with(&self, reason: impl Into<Arc<str>>) -> Result<(), AlreadyClosedError> {
        self.0.close_with(reason)
    }
}


// ==== tests ====


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::yield_now;

    #[test]
    fn values_come_out_in_write_order_except_given_back_ones() {
        let ch = Channel::<u32>::bounded(8, "fifo");
        for i in 1..=3 {
            ch.try_write(i).unwrap();
        }
        ch.try_send_back(9).unwrap();
        assert_eq!(ch.try_read().unwrap(), Some(9));
        assert_eq!(ch.try_read().unwrap(), Some(1));
        assert_eq!(ch.try_read().unwrap(), Some(2));
        assert_eq!(ch.try_read().unwrap(), Some(3));
        assert_eq!(ch.try_read().unwrap(), None);
    }

    #[test]
    fn capacity_is_enforced_and_restored_by_reads() {
        let ch = Channel::<u32>::bounded(2, "bounded");
        ch.try_write(1).unwrap();
        ch.try_write(2).unwrap();
        assert!(!ch.writable());
        let err = ch.try_write(3).unwrap_err();
        assert_eq!(err.value, 3);
        assert!(matches!(err.reason, TryWriteErrorReason::Full(_)));
        assert_eq!(ch.try_read().unwrap(), Some(1));
        assert!(ch.writable());
        ch.try_write(3).unwrap();
    }

    #[test]
    fn close_twice_fails_with_already_closed() {
        let ch = Channel::<u32>::bounded(1, "twice");
        ch.close().unwrap();
        let err = ch.close().unwrap_err();
        assert_eq!(err.channel_name(), "twice");
        assert!(ch.close_with("again").is_err());
    }

    #[tokio::test]
    async fn operations_after_close_report_the_stored_reason() {
        let ch = Channel::<u32>::bounded(4, "maintenance");
        ch.try_write(1).unwrap();
        ch.close_with("down for maintenance").unwrap();

        let read_err = ch.try_read().unwrap_err();
        assert_eq!(read_err.reason(), Some("down for maintenance"));
        let write_err = ch.write(5).await.unwrap_err();
        assert_eq!(write_err.value, 5);
        assert_eq!(write_err.reason.reason(), Some("down for maintenance"));
        let reserve_err = ch.reserve().await.unwrap_err();
        assert_eq!(reserve_err.reason(), Some("down for maintenance"));
        assert!(ch.read().await.is_err());
        assert!(!ch.readable());
        assert!(!ch.writable());
    }

    #[tokio::test]
    async fn close_fails_every_pending_waiter_with_the_reason() {
        // readers pend on an empty channel and writers on a full one: a reader and a writer
        // pending on the same channel would just be matched with each other.
        let read_ch = Channel::<u32>::bounded(4, "pending-reads");
        let write_ch = Channel::<u32>::bounded(1, "pending-writes");
        write_ch.try_write(0).unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let ch = read_ch.clone();
            handles.push(tokio::spawn(async move {
                ch.read()
                    .await
                    .map(|_| ())
                    .map_err(|e| e.reason().map(str::to_owned))
            }));
        }
        for i in 0..2 {
            let ch = write_ch.clone();
            handles.push(tokio::spawn(async move {
                ch.write(i)
                    .await
                    .map_err(|e| e.reason.reason().map(str::to_owned))
            }));
        }
        for _ in 0..8 {
            yield_now().await;
        }

        read_ch.close_with("shutting down").unwrap();
        write_ch.close_with("shutting down").unwrap();
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.unwrap_err(), Some("shutting down".to_owned()));
        }
    }

    #[tokio::test]
    async fn burst_of_writes_serves_pending_readers_in_arrival_order() {
        let ch = Channel::<u32>::bounded(8, "burst");
        let mut readers = Vec::new();
        for _ in 0..3 {
            let ch = ch.clone();
            readers.push(tokio::spawn(async move { ch.read().await.unwrap() }));
            // let the task register before spawning the next, so arrival order is spawn order
            yield_now().await;
        }
        for value in [10, 20, 30] {
            ch.write(value).await.unwrap();
        }
        let mut got = Vec::new();
        for handle in readers {
            got.push(handle.await.unwrap());
        }
        assert_eq!(got, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn zero_capacity_hands_off_only_under_demand() {
        let ch = Channel::<u32>::bounded(0, "rendezvous");
        assert!(matches!(
            ch.try_write(1).unwrap_err().reason,
            TryWriteErrorReason::Full(_),
        ));
        let ch2 = ch.clone();
        let reader = tokio::spawn(async move { ch2.read().await.unwrap() });
        for _ in 0..4 {
            yield_now().await;
        }
        ch.write(7).await.unwrap();
        assert_eq!(reader.await.unwrap(), 7);
        assert!(!ch.writable());
    }

    #[tokio::test]
    async fn dropped_permit_releases_its_slot() {
        let ch = Channel::<u32>::bounded(1, "permits");
        ch.try_write(1).unwrap();
        assert!(!ch.writable());
        let ch2 = ch.clone();
        let writer = tokio::spawn(async move {
            let permit = ch2.reserve().await.unwrap();
            drop(permit);
        });
        for _ in 0..4 {
            yield_now().await;
        }
        // the writer is suspended: no slot is free yet
        assert!(!ch.writable());
        assert_eq!(ch.try_read().unwrap(), Some(1));
        writer.await.unwrap();
        assert!(ch.writable());
        assert!(ch.is_empty());
        ch.try_write(2).unwrap();
    }

    #[tokio::test]
    async fn permit_send_back_jumps_the_queue() {
        let ch = Channel::<u32>::bounded(4, "give-back");
        ch.try_write(1).unwrap();
        ch.try_write(2).unwrap();
        let permit = ch.reserve().await.unwrap();
        permit.send_back(9).unwrap();
        assert_eq!(ch.try_read().unwrap(), Some(9));
        assert_eq!(ch.try_read().unwrap(), Some(1));
        assert_eq!(ch.try_read().unwrap(), Some(2));
    }

    #[tokio::test]
    async fn dropped_pending_reader_does_not_lose_a_value() {
        let ch = Channel::<u32>::bounded(4, "dropped-reader");
        let ch2 = ch.clone();
        let reader = tokio::spawn(async move { ch2.read().await });
        for _ in 0..4 {
            yield_now().await;
        }
        reader.abort();
        let _ = reader.await;
        ch.write(42).await.unwrap();
        assert_eq!(ch.try_read().unwrap(), Some(42));
    }

    #[tokio::test]
    async fn long_write_read_chain_completes() {
        let ch = Channel::<u32>::unbounded("chain");
        for i in 0..10_000 {
            ch.write(i).await.unwrap();
            assert_eq!(ch.read().await.unwrap(), i);
        }
    }

    #[tokio::test]
    async fn split_halves_share_the_channel() {
        let (wh, rh) = Channel::<u32>::bounded(4, "split").split();
        wh.write(1).await.unwrap();
        wh.try_write(2).unwrap();
        assert_eq!(rh.read().await.unwrap(), 1);
        assert_eq!(rh.try_read().unwrap(), Some(2));
        rh.close_with("done").unwrap();
        let err = wh.try_write(3).unwrap_err();
        assert!(matches!(err.reason, TryWriteErrorReason::Closed(_)));
    }
}
