/// Guard that runs a closure when dropped.
///
/// Also runs while unwinding from a panic.
pub struct DeferGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for DeferGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// Defers a closure, returning a `DeferGuard` that will
/// run it when dropped.
pub fn defer<F: FnOnce()>(f: F) -> DeferGuard<F> {
    DeferGuard(Some(f))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use super::*;

    #[test]
    fn test_runs_on_drop() {
        let count = Cell::new(0);
        {
            let _guard = defer(|| count.set(count.get() + 1));
            assert_eq!(count.get(), 0);
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_runs_on_unwind() {
        let count = Cell::new(0);
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = defer(|| count.set(count.get() + 1));
            panic!("fetch task aborted");
        }));
        assert!(result.is_err());
        assert_eq!(count.get(), 1);
    }
}
