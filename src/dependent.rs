//! Obligations derived from other obligations: `then` chains a transform
//! over one upstream, `on` joins several. Both resolve lazily, inside the
//! first read.

use std::time::{Duration, Instant};

use crate::cell::Obligation;
use crate::WaitError;

/// Conversion into an [`Obligation`], used for the return value of a
/// [`Obligation::then`] transform. A `Result` becomes a cell settled on the
/// spot; an `Obligation` passes through unchanged so the chain can wait on
/// it.
pub trait IntoObligation<T, E> {
    fn into_obligation(self) -> Obligation<T, E>;
}

impl<T, E> IntoObligation<T, E> for Obligation<T, E> {
    fn into_obligation(self) -> Obligation<T, E> {
        self
    }
}

impl<T, E> IntoObligation<T, E> for Result<T, E> {
    fn into_obligation(self) -> Obligation<T, E> {
        match self {
            Ok(result) => Obligation::fulfilled(result),
            Err(cause) => Obligation::rejected(cause),
        }
    }
}

/// What one resolution attempt came back with.
pub(crate) enum Resolution<T, E> {
    /// The transform ran; this obligation carries the eventual outcome.
    Chained(Obligation<T, E>),
    /// An upstream was rejected. The transform never ran.
    Rejected(E),
    /// An upstream lost its writer. The transform never ran and never will.
    Orphaned,
    /// The budget ran out first. The resolver comes back untouched so a
    /// later read can try again.
    TimedOut(BoxResolve<T, E>),
}

pub(crate) type BoxResolve<T, E> = Box<dyn Resolve<T, E>>;

/// One resolution step of a dependent obligation. Consuming `self` is what
/// makes a second transform invocation unrepresentable.
pub(crate) trait Resolve<T, E>: Send {
    fn resolve(self: Box<Self>, budget: Duration) -> Resolution<T, E>;
}

struct ThenResolver<S, T, E> {
    upstream: Obligation<S, E>,
    transform: Box<dyn FnOnce(S) -> Obligation<T, E> + Send>,
}

impl<S, T, E> Resolve<T, E> for ThenResolver<S, T, E>
where
    S: Clone + Send + 'static,
    T: 'static,
    E: Clone + Send + 'static,
{
    fn resolve(self: Box<Self>, budget: Duration) -> Resolution<T, E> {
        match self.upstream.value_timeout(budget) {
            Ok(value) => Resolution::Chained((self.transform)(value)),
            Err(WaitError::Rejected(cause)) => Resolution::Rejected(cause),
            Err(WaitError::WriterDropped) => Resolution::Orphaned,
            Err(WaitError::Timeout) => Resolution::TimedOut(self),
        }
    }
}

struct JoinResolver<T, E> {
    upstreams: Vec<Obligation<T, E>>,
}

impl<T, E> Resolve<Vec<T>, E> for JoinResolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn resolve(self: Box<Self>, budget: Duration) -> Resolution<Vec<T>, E> {
        let start = Instant::now();
        let mut results = Vec::with_capacity(self.upstreams.len());
        for index in 0..self.upstreams.len() {
            let remaining = budget.saturating_sub(start.elapsed());
            match self.upstreams[index].value_timeout(remaining) {
                Ok(value) => results.push(value),
                Err(WaitError::Rejected(cause)) => return Resolution::Rejected(cause),
                Err(WaitError::WriterDropped) => return Resolution::Orphaned,
                // Progress so far is discarded; upstream memoization makes
                // the next attempt cheap.
                Err(WaitError::Timeout) => return Resolution::TimedOut(self),
            }
        }
        Resolution::Chained(Obligation::fulfilled(results))
    }
}

impl<T, E> Obligation<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Derives a new obligation from this one's eventual result.
    ///
    /// Nothing happens until the derived obligation is first read. That
    /// read resolves this obligation within the caller's time budget,
    /// applies `transform` exactly once, and memoizes the outcome; a
    /// rejection skips the transform and carries the original cause
    /// downstream unchanged.
    ///
    /// The transform's return goes through [`IntoObligation`]: return a
    /// `Result` to settle directly, or another [`Obligation`] to have the
    /// chain wait through it. The derived obligation never holds a nested
    /// obligation as its result.
    ///
    /// # Examples
    ///
    /// ```
    /// use obligation::Obligation;
    ///
    /// let (answer, writer) = Obligation::<i64, String>::create();
    /// let leet = answer.then(|x| Ok(x - 5 + 1300));
    /// writer.fulfill(42).unwrap();
    /// assert_eq!(leet.value().unwrap(), 1337);
    /// ```
    ///
    /// Returning another obligation, resolved through transparently:
    ///
    /// ```
    /// use std::thread;
    /// use std::time::Duration;
    /// use obligation::Obligation;
    ///
    /// let (count, writer) = Obligation::<i64, String>::create();
    /// let answer = count.then(|n| {
    ///     Obligation::create_with(|inner| {
    ///         thread::spawn(move || {
    ///             thread::sleep(Duration::from_millis(10));
    ///             inner.fulfill(n + 15).unwrap();
    ///         });
    ///     })
    /// });
    /// writer.fulfill(42).unwrap();
    /// assert_eq!(answer.value().unwrap(), 57);
    /// ```
    #[must_use = "a dependent obligation does nothing until `value` is called"]
    pub fn then<U, R, F>(&self, transform: F) -> Obligation<U, E>
    where
        U: Send + 'static,
        R: IntoObligation<U, E>,
        F: FnOnce(T) -> R + Send + 'static,
    {
        Obligation::from_resolver(Box::new(ThenResolver {
            upstream: self.clone(),
            transform: Box::new(move |value| transform(value).into_obligation()),
        }))
    }

    /// Joins a fixed set of obligations into one that fulfills with their
    /// results in upstream order, whatever order they settle in.
    ///
    /// Resolution walks the upstreams in order within one time budget. The
    /// first rejection found becomes the joined obligation's rejection and
    /// the remaining upstreams are not awaited; their own producers are
    /// unaffected.
    ///
    /// # Examples
    ///
    /// ```
    /// use obligation::Obligation;
    ///
    /// let (width, w) = Obligation::<u32, String>::create();
    /// let (height, h) = Obligation::<u32, String>::create();
    /// let area = Obligation::on([width, height]).then(|sides| Ok(sides[0] * sides[1]));
    /// h.fulfill(4).unwrap();
    /// w.fulfill(3).unwrap();
    /// assert_eq!(area.value().unwrap(), 12);
    /// ```
    #[must_use = "a dependent obligation does nothing until `value` is called"]
    pub fn on<I>(upstreams: I) -> Obligation<Vec<T>, E>
    where
        I: IntoIterator<Item = Obligation<T, E>>,
    {
        Obligation::from_resolver(Box::new(JoinResolver {
            upstreams: upstreams.into_iter().collect(),
        }))
    }
}
