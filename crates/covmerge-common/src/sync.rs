use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::MutexGuard;

static POISON_RECOVERIES: AtomicU64 = AtomicU64::new(0);

/// Locks `lock`, taking the guard out of a poisoned mutex instead of failing.
///
/// A reader thread that panics while holding the output lock must not take
/// the whole aggregation run down with it.
pub fn mutex_lock_or_recover<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        POISON_RECOVERIES.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("Recovering from poisoned mutex");
        poisoned.into_inner()
    })
}

pub fn poison_recovery_count() -> u64 {
    POISON_RECOVERIES.load(Ordering::Relaxed)
}
