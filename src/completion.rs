use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

type Handler = Box<dyn FnOnce() + Send>;

/// Tracks in-flight parts and fires the completion handler once the upstream
/// has completed and every part created from it has completed too.
pub(crate) struct Completion {
    outstanding: AtomicUsize,
    upstream_done: AtomicBool,
    handler: spin::Mutex<Option<Handler>>,
}

impl Completion {
    pub(crate) fn new(handler: Handler) -> Completion {
        Completion {
            outstanding: AtomicUsize::new(0),
            upstream_done: AtomicBool::new(false),
            handler: spin::Mutex::new(Some(handler)),
        }
    }

    pub(crate) fn item_started(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn item_completed(&self) {
        let before = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(before > 0, "more parts completed than started");

        if before == 1 && self.upstream_done.load(Ordering::SeqCst) {
            self.fire();
        }
    }

    pub(crate) fn upstream_completed(&self) {
        self.upstream_done.store(true, Ordering::SeqCst);

        if self.outstanding.load(Ordering::SeqCst) == 0 {
            self.fire();
        }
    }

    fn fire(&self) {
        let handler = self.handler.lock().take();

        if let Some(handler) = handler {
            debug!("all parts completed");
            handler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tracker() -> (Completion, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let completion = Completion::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (completion, fired)
    }

    #[test]
    fn test_fires_after_upstream_and_items() {
        let (completion, fired) = tracker();
        completion.item_started();
        completion.item_started();

        completion.item_completed();
        completion.upstream_completed();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        completion.item_completed();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_waits_for_upstream() {
        let (completion, fired) = tracker();
        completion.item_started();
        completion.item_completed();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        completion.upstream_completed();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_items() {
        let (completion, fired) = tracker();
        completion.upstream_completed();
        completion.upstream_completed();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
