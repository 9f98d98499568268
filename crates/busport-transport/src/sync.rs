//! Mutex helpers shared by every busport layer.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a listener or handler panicked
/// while holding it.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::panic;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn poisoned_mutex_still_locks() {
        let shared = Arc::new(Mutex::new(vec![1]));
        let held = Arc::clone(&shared);
        let result = thread::spawn(move || {
            let mut guard = held.lock().unwrap();
            guard.push(2);
            panic!("handler failed while holding the lock");
        })
        .join();
        assert!(result.is_err());
        assert!(shared.is_poisoned());

        lock(&shared).push(3);
        assert_eq!(*lock(&shared), vec![1, 2, 3]);
    }
}
