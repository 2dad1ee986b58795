// state and matching algorithm of the channel. the exposed API is a wrapper around this.

use super::error::{
    AlreadyClosedError,
    ClosedError,
    FullError,
    TryWriteError,
    WriteError,
};
use crate::scheduler::SCHEDULER;
use std::{
    collections::VecDeque,
    mem::take,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::oneshot;


// a pending read, fulfilled with a value or failed with the close reason. sending consumes
// the sender, so a waiter can be resolved at most once.
type ReadWaiter<T> = oneshot::Sender<Result<T, ClosedError>>;
// a pending write, fulfilled with a grant or failed with the close reason.
type WriteWaiter<T> = oneshot::Sender<Result<WriteGrant<T>, ClosedError>>;

// receiving halves of the waiter records, awaited by the api layer.
pub(crate) type ReadTicket<T> = oneshot::Receiver<Result<T, ClosedError>>;
pub(crate) type WriteTicket<T> = oneshot::Receiver<Result<WriteGrant<T>, ClosedError>>;

// handle to a channel's shared state.
pub(crate) struct Core<T: Send + 'static>(Arc<Shared<T>>);

// channel shared state.
struct Shared<T: Send + 'static> {
    // diagnostic label, no behavioral effect.
    name: Arc<str>,
    // mutex around lockable state.
    lockable: Mutex<Lockable<T>>,
}

// channel lockable state.
struct Lockable<T: Send + 'static> {
    // buffered values. the front is what the next read consumes.
    buffer: VecDeque<T>,
    // buffer maximum length. None is unbounded.
    capacity: Option<usize>,
    // monotonic false -> true.
    closed: bool,
    // reason given to close, kept so later failures can report it.
    close_reason: Option<Arc<str>>,
    // read waiters, FIFO by arrival.
    pending_readers: VecDeque<ReadWaiter<T>>,
    // write waiters, FIFO by arrival.
    pending_writers: VecDeque<WriteWaiter<T>>,
    // write grants handed out but not yet spent or dropped. each one holds a buffer slot.
    grants: usize,
    // true while a matching pass is mutating state. switches the size accounting over to
    // counting imminent supply and demand, so one pass can resolve a whole burst of
    // registrations without waiting for each deposit to land first.
    in_pass: bool,
    // true while a matching pass is queued on the scheduler or running. prevents queueing a
    // second pass behind one that will already observe the current state.
    pass_queued: bool,
}

impl<T: Send + 'static> Lockable<T> {
    // values a read could consume right now: the buffer, plus -- while a pass is underway --
    // writers about to be granted and grants whose deposit has not landed yet.
    fn readable_size(&self) -> usize {
        let mut size = self.buffer.len();
        if self.in_pass {
            size += self.pending_writers.len() + self.grants;
        }
        size
    }

    // slots a write could take right now: remaining capacity net of outstanding grants, plus
    // -- while a pass is underway -- readers about to consume buffered values.
    fn writable_size(&self) -> usize {
        let Some(capacity) = self.capacity else {
            return usize::MAX;
        };
        let mut size = capacity.saturating_sub(self.buffer.len() + self.grants);
        if self.in_pass {
            size = size.saturating_add(self.pending_readers.len());
        }
        size
    }

    fn closed_error(&self, name: &Arc<str>) -> ClosedError {
        ClosedError::new(Arc::clone(name), self.close_reason.clone())
    }
}

impl<T: Send + 'static> Core<T> {
    // construct an open, empty channel.
    pub(crate) fn new(capacity: Option<usize>, name: Arc<str>) -> Self {
        Core(Arc::new(Shared {
            name,
            lockable: Mutex::new(Lockable {
                buffer: VecDeque::new(),
                capacity,
                closed: false,
                close_reason: None,
                pending_readers: VecDeque::new(),
                pending_writers: VecDeque::new(),
                grants: 0,
                in_pass: false,
                pass_queued: false,
            }),
        }))
    }

    pub(crate) fn name(&self) -> &Arc<str> {
        &self.0.name
    }

    fn lock(&self) -> MutexGuard<'_, Lockable<T>> {
        self.0.lockable.lock().unwrap()
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        self.lock().capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // true iff not closed and a read performed right now would find a value.
    pub(crate) fn readable(&self) -> bool {
        let lock = self.lock();
        !lock.closed && lock.readable_size() > 0
    }

    // true iff not closed and a write performed right now would find a free slot.
    pub(crate) fn writable(&self) -> bool {
        let lock = self.lock();
        !lock.closed && lock.writable_size() > 0
    }

    // non-blocking read of the oldest buffered value. Ok(None) when the buffer is empty.
    pub(crate) fn try_read(&self) -> Result<Option<T>, ClosedError> {
        let mut lock = self.lock();
        if lock.closed {
            return Err(lock.closed_error(&self.0.name));
        }
        let value = lock.buffer.pop_front();
        if value.is_some() {
            // freed a slot; the oldest waiting writer may now be granted
            self.request_pass(lock);
        }
        Ok(value)
    }

    // non-blocking write. at_front lands the value where the next read will take it.
    pub(crate) fn try_write(&self, value: T, at_front: bool) -> Result<(), TryWriteError<T>> {
        let mut lock = self.lock();
        if lock.closed {
            let reason = lock.closed_error(&self.0.name);
            return Err(TryWriteError { value, reason: reason.into() });
        }
        if lock.writable_size() == 0 {
            let reason = FullError::new(Arc::clone(&self.0.name));
            return Err(TryWriteError { value, reason: reason.into() });
        }
        if at_front {
            lock.buffer.push_front(value);
        } else {
            lock.buffer.push_back(value);
        }
        // the oldest waiting reader may now be served
        self.request_pass(lock);
        Ok(())
    }

    // register a read waiter. the ticket resolves when a matching pass pairs it with a value,
    // or fails it at close.
    pub(crate) fn register_reader(&self) -> Result<ReadTicket<T>, ClosedError> {
        let mut lock = self.lock();
        if lock.closed {
            return Err(lock.closed_error(&self.0.name));
        }
        let (waiter, ticket) = oneshot::channel();
        lock.pending_readers.push_back(waiter);
        self.request_pass(lock);
        Ok(ticket)
    }

    // register a write waiter. the ticket resolves with a grant once a slot is available, or
    // fails at close.
    pub(crate) fn register_writer(&self) -> Result<WriteTicket<T>, ClosedError> {
        let mut lock = self.lock();
        if lock.closed {
            return Err(lock.closed_error(&self.0.name));
        }
        let (waiter, ticket) = oneshot::channel();
        lock.pending_writers.push_back(waiter);
        self.request_pass(lock);
        Ok(ticket)
    }

    // close the channel, failing every pending waiter exactly once with the reason.
    pub(crate) fn close(&self, reason: Option<Arc<str>>) -> Result<(), AlreadyClosedError> {
        let (readers, writers, error) = {
            let mut lock = self.lock();
            if lock.closed {
                return Err(AlreadyClosedError::new(Arc::clone(&self.0.name)));
            }
            lock.closed = true;
            lock.close_reason = reason;
            let error = lock.closed_error(&self.0.name);
            (
                take(&mut lock.pending_readers),
                take(&mut lock.pending_writers),
                error,
            )
        };
        debug!("closing channel {:?}", self.0.name);
        // reject outside the lock. a send only fails if the waiter's future was already
        // dropped, in which case there is nobody left to notify.
        for waiter in readers {
            let _ = waiter.send(Err(error.clone()));
        }
        for waiter in writers {
            let _ = waiter.send(Err(error.clone()));
        }
        Ok(())
    }

    // decide under the lock whether a matching pass is warranted, then submit it after
    // releasing the lock. the scheduler may execute the pass synchronously on this stack, and
    // the pass takes the same lock, so the lock must not be held across the submission.
    fn request_pass(&self, mut lock: MutexGuard<'_, Lockable<T>>) {
        if lock.pass_queued {
            return;
        }
        // evaluate with the same adjusted accounting the pass itself will use
        lock.in_pass = true;
        let warranted = (!lock.pending_writers.is_empty() && lock.writable_size() > 0)
            || (!lock.pending_readers.is_empty() && lock.readable_size() > 0);
        lock.in_pass = false;
        if !warranted {
            return;
        }
        lock.pass_queued = true;
        drop(lock);
        let core = self.clone();
        SCHEDULER.run(move || core.matching_pass());
    }

    // one matching pass: pair the oldest waiters with values and free slots until no further
    // pairing is possible. runs as a scheduler task, so passes never overlap.
    fn matching_pass(&self) {
        let mut lock = self.lock();
        if lock.closed {
            // close already failed every waiter
            lock.pass_queued = false;
            return;
        }
        lock.in_pass = true;
        loop {
            let can_grant = !lock.pending_writers.is_empty() && lock.writable_size() > 0;
            let can_serve = !lock.pending_readers.is_empty() && lock.readable_size() > 0;
            if !can_grant && !can_serve {
                break;
            }
            let mut progressed = false;
            if can_grant {
                // can_grant guarantees a writer is queued
                let waiter = lock.pending_writers.pop_front().unwrap();
                lock.grants += 1;
                let grant = WriteGrant { core: self.clone(), spent: false };
                if let Err(unsent) = waiter.send(Ok(grant)) {
                    // the write future was dropped before its grant arrived. neutralize the
                    // grant here rather than dropping it: its Drop re-locks this mutex.
                    if let Ok(grant) = unsent {
                        grant.forget();
                    }
                    lock.grants -= 1;
                }
                progressed = true;
            }
            if can_serve {
                // the buffer can be momentarily empty here when the counted supply is a
                // grant whose deposit has not landed yet; in that case the reader stays
                // queued for the pass that deposit will request.
                if let Some(value) = lock.buffer.pop_front() {
                    // can_serve guarantees a reader is queued
                    let waiter = lock.pending_readers.pop_front().unwrap();
                    if let Err(unsent) = waiter.send(Ok(value)) {
                        // the read future was dropped; the value goes back to the front so
                        // the next reader takes it.
                        if let Ok(value) = unsent {
                            lock.buffer.push_front(value);
                        }
                    }
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        lock.in_pass = false;
        lock.pass_queued = false;
    }
}

impl<T: Send + 'static> Clone for Core<T> {
    fn clone(&self) -> Self {
        Core(Arc::clone(&self.0))
    }
}

// a granted, not-yet-spent write slot. spending lands a value in the buffer; dropping an
// unspent grant releases the slot.
pub(crate) struct WriteGrant<T: Send + 'static> {
    core: Core<T>,
    spent: bool,
}

impl<T: Send + 'static> WriteGrant<T> {
    // land the value, at the front of the buffer (where the next read takes it) or at the
    // tail. only fails if the channel was closed after the grant was issued.
    pub(crate) fn spend(mut self, value: T, at_front: bool) -> Result<(), WriteError<T>> {
        self.spent = true;
        let mut lock = self.core.lock();
        lock.grants -= 1;
        if lock.closed {
            return Err(WriteError { value, reason: lock.closed_error(&self.core.0.name) });
        }
        if at_front {
            lock.buffer.push_front(value);
        } else {
            lock.buffer.push_back(value);
        }
        // the oldest waiting reader may now be served
        self.core.request_pass(lock);
        Ok(())
    }

    // mark as settled without touching the channel; the caller already adjusted the grant
    // accounting. used when fulfilment fails inside a pass, where Drop would deadlock.
    fn forget(mut self) {
        self.spent = true;
    }
}

impl<T: Send + 'static> Drop for WriteGrant<T> {
    fn drop(&mut self) {
        if self.spent {
            return;
        }
        let mut lock = self.core.lock();
        lock.grants -= 1;
        if !lock.closed {
            // the released slot may unblock the next waiting writer
            self.core.request_pass(lock);
        }
    }
}


// ==== tests ====


#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::error::TryWriteErrorReason;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg32;

    // drive the non-blocking operations against a VecDeque model and check they agree.
    #[test]
    fn non_blocking_ops_agree_with_model() {
        const CAPACITY: usize = 8;
        let core = Core::new(Some(CAPACITY), Arc::from("model"));
        let mut model: VecDeque<u32> = VecDeque::new();
        let mut rng = Pcg32::seed_from_u64(0x00c0_ffee);
        for i in 0..10_000u32 {
            match rng.gen_range(0..5) {
                0 | 1 => {
                    let at_front = rng.gen_bool(0.25);
                    let result = core.try_write(i, at_front);
                    if model.len() == CAPACITY {
                        assert!(matches!(
                            result,
                            Err(TryWriteError { reason: TryWriteErrorReason::Full(_), .. }),
                        ));
                    } else {
                        assert!(result.is_ok());
                        if at_front {
                            model.push_front(i);
                        } else {
                            model.push_back(i);
                        }
                    }
                }
                2 | 3 => assert_eq!(core.try_read().unwrap(), model.pop_front()),
                _ => {
                    assert_eq!(core.readable(), !model.is_empty());
                    assert_eq!(core.writable(), model.len() < CAPACITY);
                    assert_eq!(core.len(), model.len());
                }
            }
        }
    }

    #[test]
    fn unbounded_channel_is_always_writable() {
        let core = Core::new(None, Arc::from("unbounded"));
        for i in 0..1000 {
            core.try_write(i, false).unwrap();
        }
        assert!(core.writable());
        assert_eq!(core.len(), 1000);
    }

    #[test]
    fn zero_capacity_channel_rejects_non_blocking_writes() {
        let core = Core::new(Some(0), Arc::from("rendezvous"));
        assert!(!core.writable());
        let err = core.try_write(1, false).unwrap_err();
        assert!(matches!(err.reason, TryWriteErrorReason::Full(_)));
        assert_eq!(err.value, 1);
    }
}
