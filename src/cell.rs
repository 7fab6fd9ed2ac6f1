use std::fmt;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::trace;

use crate::dependent::{BoxResolve, Resolution};
use crate::{SettleError, State, WaitError, DEFAULT_TIMEOUT};

/// A single-assignment cell: pending until settled exactly once, readable
/// from any thread. Cloning hands out more read handles onto the same cell;
/// settling is reserved to the paired [`Writer`].
///
/// # Examples
///
/// ```
/// use std::thread;
/// use std::time::Duration;
/// use obligation::Obligation;
///
/// let (obligation, writer) = Obligation::<String, String>::create();
/// thread::spawn(move || {
///     thread::sleep(Duration::from_millis(10));
///     writer.fulfill("ready".into()).unwrap();
/// });
/// assert_eq!(obligation.value().unwrap(), "ready");
/// ```
pub struct Obligation<T, E> {
    shared: Arc<Shared<T, E>>,
}

/// The write half of an obligation: the one capability that may settle it.
/// There is no `Clone`; handing out write access means moving the writer.
pub struct Writer<T, E> {
    shared: Arc<Shared<T, E>>,
}

struct Shared<T, E> {
    inner: Mutex<Inner<T, E>>,
    settled: Condvar,
}

enum Inner<T, E> {
    Pending(Source<T, E>),
    Fulfilled(T),
    Rejected(E),
}

/// Where a pending cell's eventual outcome will come from.
enum Source<T, E> {
    /// A live writer will settle the cell.
    Writer,
    /// The writer was dropped without settling; no outcome can arrive.
    Orphaned,
    /// A dependent cell whose resolver has not been claimed yet.
    Transform(BoxResolve<T, E>),
    /// A reader claimed the resolver and is driving it outside the lock.
    Resolving,
    /// The transform produced another obligation; its outcome is adopted.
    Chained(Obligation<T, E>),
}

/// What a reader should do next, decided under the lock.
enum Plan<T, E> {
    Wait,
    Abandoned,
    Resolve(BoxResolve<T, E>),
    Follow(Obligation<T, E>),
}

impl<T, E> Source<T, E> {
    /// Only a transform leaves the slot; everything else is put back.
    fn plan(&mut self) -> Plan<T, E> {
        match mem::replace(self, Source::Resolving) {
            Source::Writer => {
                *self = Source::Writer;
                Plan::Wait
            }
            Source::Resolving => Plan::Wait,
            Source::Orphaned => {
                *self = Source::Orphaned;
                Plan::Abandoned
            }
            Source::Transform(resolver) => Plan::Resolve(resolver),
            Source::Chained(next) => {
                *self = Source::Chained(next.clone());
                Plan::Follow(next)
            }
        }
    }
}

impl<T, E> Inner<T, E> {
    fn state(&self) -> State {
        match self {
            Inner::Pending(_) => State::Pending,
            Inner::Fulfilled(_) => State::Fulfilled,
            Inner::Rejected(_) => State::Rejected,
        }
    }
}

impl<T, E> Shared<T, E> {
    /// Every transition replaces the whole cell in one assignment, so a
    /// poisoned lock cannot hide a torn state; keep going.
    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(
        &self,
        guard: MutexGuard<'a, Inner<T, E>>,
        timeout: Duration,
    ) -> MutexGuard<'a, Inner<T, E>> {
        let (guard, _) = self
            .settled
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        guard
    }

    /// Advance a still-pending cell and wake its waiters. Whoever gets here
    /// first wins; a late outcome is dropped on the floor.
    fn install(&self, inner: &mut Inner<T, E>, next: Inner<T, E>) {
        if matches!(&*inner, Inner::Pending(_)) {
            *inner = next;
            self.settled.notify_all();
        }
    }

    fn fulfill(&self, result: T) -> Result<(), SettleError> {
        let mut inner = self.lock();
        match &*inner {
            Inner::Pending(_) => {
                *inner = Inner::Fulfilled(result);
                self.settled.notify_all();
                trace!("obligation fulfilled");
                Ok(())
            }
            settled => Err(SettleError(settled.state())),
        }
    }

    fn reject(&self, cause: E) -> Result<(), SettleError> {
        let mut inner = self.lock();
        match &*inner {
            Inner::Pending(_) => {
                *inner = Inner::Rejected(cause);
                self.settled.notify_all();
                trace!("obligation rejected");
                Ok(())
            }
            settled => Err(SettleError(settled.state())),
        }
    }
}

impl<T, E> Obligation<T, E> {
    fn from_inner(inner: Inner<T, E>) -> Obligation<T, E> {
        Obligation {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                settled: Condvar::new(),
            }),
        }
    }

    /// Creates a pending obligation together with the writer that settles
    /// it. The writer typically moves to a producer thread.
    pub fn create() -> (Obligation<T, E>, Writer<T, E>) {
        let obligation = Obligation::from_inner(Inner::Pending(Source::Writer));
        let writer = Writer {
            shared: Arc::clone(&obligation.shared),
        };
        (obligation, writer)
    }

    /// Creates a pending obligation and hands the writer to `setup` before
    /// returning, so production can be kicked off in one expression.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::thread;
    /// use obligation::Obligation;
    ///
    /// let greeting = Obligation::<String, String>::create_with(|writer| {
    ///     thread::spawn(move || {
    ///         writer.fulfill("hello".into()).unwrap();
    ///     });
    /// });
    /// assert_eq!(greeting.value().unwrap(), "hello");
    /// ```
    pub fn create_with<F>(setup: F) -> Obligation<T, E>
    where
        F: FnOnce(Writer<T, E>),
    {
        let (obligation, writer) = Obligation::create();
        setup(writer);
        obligation
    }

    /// An obligation that was fulfilled at birth. There is no writer.
    pub fn fulfilled(result: T) -> Obligation<T, E> {
        Obligation::from_inner(Inner::Fulfilled(result))
    }

    /// An obligation that was rejected at birth. There is no writer.
    pub fn rejected(cause: E) -> Obligation<T, E> {
        Obligation::from_inner(Inner::Rejected(cause))
    }

    pub(crate) fn from_resolver(resolver: BoxResolve<T, E>) -> Obligation<T, E> {
        Obligation::from_inner(Inner::Pending(Source::Transform(resolver)))
    }

    /// Snapshot of the cell's state. Settlement is one-way, so `Fulfilled`
    /// and `Rejected` answers are final; `Pending` may be stale by the time
    /// the caller looks at it.
    pub fn state(&self) -> State {
        self.shared.lock().state()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    pub fn is_fulfilled(&self) -> bool {
        self.state() == State::Fulfilled
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == State::Rejected
    }

    /// The rejection cause, or `None` while the cell is anything else.
    pub fn reason(&self) -> Option<E>
    where
        E: Clone,
    {
        match &*self.shared.lock() {
            Inner::Rejected(cause) => Some(cause.clone()),
            _ => None,
        }
    }
}

impl<T, E> Obligation<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Waits for the result, giving the producer [`DEFAULT_TIMEOUT`].
    pub fn value(&self) -> Result<T, WaitError<E>> {
        self.value_timeout(DEFAULT_TIMEOUT)
    }

    /// Waits until the obligation settles or `timeout` elapses, whichever
    /// comes first.
    ///
    /// A settled cell answers immediately, whatever the timeout. A pending
    /// one parks the calling thread on the cell's condvar; there is no
    /// polling loop, settlement wakes it directly. `Duration::ZERO` means
    /// "look once, never wait". Timing out changes nothing: the cell stays
    /// pending and a later call may still see it settle.
    ///
    /// A dependent obligation resolves here, on its first read: the reader
    /// drives the upstream waits and the transform inside its own timeout
    /// budget. One budget covers the whole chain, however deep.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use obligation::{Obligation, WaitError};
    ///
    /// let (cell, writer) = Obligation::<u32, String>::create();
    /// let early = cell.value_timeout(Duration::from_millis(10));
    /// assert_eq!(early, Err(WaitError::Timeout));
    ///
    /// writer.fulfill(7).unwrap();
    /// assert_eq!(cell.value_timeout(Duration::ZERO).unwrap(), 7);
    /// ```
    pub fn value_timeout(&self, timeout: Duration) -> Result<T, WaitError<E>> {
        let start = Instant::now();
        let mut inner = self.shared.lock();
        loop {
            let plan = match &mut *inner {
                Inner::Fulfilled(result) => return Ok(result.clone()),
                Inner::Rejected(cause) => return Err(WaitError::Rejected(cause.clone())),
                Inner::Pending(source) => source.plan(),
            };
            match plan {
                Plan::Wait => {
                    let remaining = timeout.saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        return Err(WaitError::Timeout);
                    }
                    inner = self.shared.wait(inner, remaining);
                }
                Plan::Abandoned => return Err(WaitError::WriterDropped),
                Plan::Resolve(resolver) => {
                    // Drive the resolver without the lock so snapshots and
                    // zero-timeout polls stay responsive meanwhile.
                    drop(inner);
                    trace!("resolving dependent obligation");
                    let budget = timeout.saturating_sub(start.elapsed());
                    let outcome = resolver.resolve(budget);
                    inner = self.shared.lock();
                    match outcome {
                        Resolution::Chained(next) => {
                            self.shared
                                .install(&mut inner, Inner::Pending(Source::Chained(next)));
                        }
                        Resolution::Rejected(cause) => {
                            self.shared.install(&mut inner, Inner::Rejected(cause));
                        }
                        Resolution::Orphaned => {
                            self.shared
                                .install(&mut inner, Inner::Pending(Source::Orphaned));
                        }
                        Resolution::TimedOut(resolver) => {
                            trace!("dependent resolution out of budget; parking resolver");
                            self.shared
                                .install(&mut inner, Inner::Pending(Source::Transform(resolver)));
                            return Err(WaitError::Timeout);
                        }
                    }
                }
                Plan::Follow(next) => {
                    drop(inner);
                    let budget = timeout.saturating_sub(start.elapsed());
                    let outcome = next.value_timeout(budget);
                    inner = self.shared.lock();
                    match outcome {
                        Ok(result) => {
                            self.shared.install(&mut inner, Inner::Fulfilled(result));
                        }
                        Err(WaitError::Rejected(cause)) => {
                            self.shared.install(&mut inner, Inner::Rejected(cause));
                        }
                        Err(WaitError::WriterDropped) => {
                            self.shared
                                .install(&mut inner, Inner::Pending(Source::Orphaned));
                        }
                        Err(WaitError::Timeout) => return Err(WaitError::Timeout),
                    }
                }
            }
        }
    }
}

impl<T, E> Clone for Obligation<T, E> {
    /// Another read handle onto the same cell.
    fn clone(&self) -> Obligation<T, E> {
        Obligation {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> fmt::Debug for Obligation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obligation")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T, E> Writer<T, E> {
    /// Settles the obligation with a result, waking every blocked reader.
    ///
    /// # Examples
    ///
    /// ```
    /// use obligation::{Obligation, SettleError, State};
    ///
    /// let (cell, writer) = Obligation::<u32, String>::create();
    /// writer.fulfill(1).unwrap();
    /// assert_eq!(writer.fulfill(2), Err(SettleError(State::Fulfilled)));
    /// assert_eq!(cell.value().unwrap(), 1);
    /// ```
    pub fn fulfill(&self, result: T) -> Result<(), SettleError> {
        self.shared.fulfill(result)
    }

    /// Settles the obligation with a failure cause, waking every blocked
    /// reader. Fails like [`Writer::fulfill`] if the cell already settled.
    pub fn reject(&self, cause: E) -> Result<(), SettleError> {
        self.shared.reject(cause)
    }
}

impl<T, E> Drop for Writer<T, E> {
    /// An unsettled obligation whose writer disappears can never produce a
    /// value; waiters are woken and told so instead of sitting out their
    /// timeouts.
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if matches!(&*inner, Inner::Pending(Source::Writer)) {
            trace!("writer dropped with its obligation unsettled");
            *inner = Inner::Pending(Source::Orphaned);
            self.shared.settled.notify_all();
        }
    }
}

impl<T, E> fmt::Debug for Writer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("state", &self.shared.lock().state())
            .finish_non_exhaustive()
    }
}
