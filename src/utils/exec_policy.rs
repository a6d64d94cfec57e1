//! Scoped dry-run switch consulted by the process runner.

use std::cell::Cell;

thread_local! {
    static DRY_RUN: Cell<bool> = const { Cell::new(false) };
}

pub fn is_dry_run() -> bool {
    DRY_RUN.with(|c| c.get())
}

/// Runs `f` with dry run set to `enabled`, restoring the previous value on exit.
pub fn with_dry_run_enabled<R>(enabled: bool, f: impl FnOnce() -> R) -> R {
    struct Restore(bool);
    impl Drop for Restore {
        fn drop(&mut self) {
            DRY_RUN.with(|c| c.set(self.0));
        }
    }
    let prev = DRY_RUN.with(|c| c.replace(enabled));
    let _restore = Restore(prev);
    f()
}
