//! Demand-driven delivery contracts between a producer and its consumer.
//!
//! A [`Subscriber`] is handed a [`Subscription`] first, then asks for items
//! through [`Subscription::request`]. The producer never emits more items
//! than requested and ends the exchange with exactly one of
//! [`on_complete`](Subscriber::on_complete) or
//! [`on_error`](Subscriber::on_error).

use std::sync::Arc;

/// The consumer side of a demand-driven stream.
pub trait Subscriber<T>: Send + 'static {
    /// Called once, before any other signal.
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);

    /// Called at most once per unit of requested demand.
    fn on_next(&mut self, item: T);

    fn on_error(&mut self, err: crate::Error);

    fn on_complete(&mut self);
}

/// The handle a [`Subscriber`] uses to pace its producer.
pub trait Subscription: Send + Sync {
    /// Grants `n` more units of demand.
    ///
    /// `u64::MAX` means unbounded demand. Requesting zero is a usage error
    /// and fails with [`Error::InvalidDemand`](crate::Error::InvalidDemand).
    fn request(&self, n: u64) -> crate::Result<()>;

    /// Stops delivery. Further requests are ignored.
    fn cancel(&self);
}

/// A subscription that ignores everything, handed out alongside a
/// terminal error.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, n: u64) -> crate::Result<()> {
        Demand::validate(n)
    }

    fn cancel(&self) {}
}

/// Outstanding demand, saturating at "unbounded".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Demand(u64);

impl Demand {
    pub(crate) const UNBOUNDED: u64 = u64::MAX;

    pub(crate) fn validate(n: u64) -> crate::Result<()> {
        if n == 0 {
            Err(crate::Error::InvalidDemand)
        } else {
            Ok(())
        }
    }

    pub(crate) fn add(&mut self, n: u64) -> crate::Result<()> {
        Demand::validate(n)?;
        self.0 = self.0.saturating_add(n);
        Ok(())
    }

    /// Consumes one unit; unbounded demand stays unbounded.
    pub(crate) fn take_one(&mut self) {
        if self.0 != Demand::UNBOUNDED {
            self.0 = self.0.saturating_sub(1);
        }
    }

    pub(crate) fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[cfg(test)]
    pub(crate) fn get(&self) -> u64 {
        self.0
    }
}
