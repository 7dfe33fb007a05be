// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Non-reentrant mutex with holder tracking.
//!
//! Thin wrapper over a `PTHREAD_MUTEX_NORMAL` mutex. Locking is only possible
//! through [`MutexGuard`], and the protected value is only reachable through
//! a live guard, so acquire/release balance and "guarded by" relationships
//! are checked by the borrow checker.
//!
//! Locking a mutex the calling thread already holds deadlocks. That is the
//! contract: there is no recursion counter and no detection.
//!
//! Use as a named local:
//!
//! ```
//! use lute_base::Mutex;
//!
//! let items = Mutex::new(Vec::<u32>::new());
//! let mut guard = items.lock();
//! guard.push(1);
//! assert!(items.is_locked_by_this_thread());
//! ```
//!
//! A guard that is not bound (`items.lock();`) or bound to `_` is dropped on
//! the spot and protects nothing.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI32, Ordering};

use libc::pid_t;

use crate::current_thread;
use crate::fatal::{self, check};

/// Mutual exclusion over a value of type `T`.
pub struct Mutex<T = ()> {
    // Boxed: a pthread mutex must not move once initialized.
    raw: Box<UnsafeCell<libc::pthread_mutex_t>>,
    /// Tid of the holding thread, 0 when unheld. Bookkeeping only.
    holder: AtomicI32,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is serialized by `raw`; T: Send is enough for
// both, as with std's mutex.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create an unlocked mutex protecting `value`.
    pub fn new(value: T) -> Self {
        let raw = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        // SAFETY: attr is initialized by pthread_mutexattr_init before use
        // and destroyed after the mutex is initialized from it.
        unsafe {
            check(
                libc::pthread_mutexattr_init(attr.as_mut_ptr()),
                "pthread_mutexattr_init",
            );
            check(
                libc::pthread_mutexattr_settype(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_NORMAL),
                "pthread_mutexattr_settype",
            );
            check(
                libc::pthread_mutex_init(raw.get(), attr.as_ptr()),
                "pthread_mutex_init",
            );
            check(
                libc::pthread_mutexattr_destroy(attr.as_mut_ptr()),
                "pthread_mutexattr_destroy",
            );
        }
        Self {
            raw,
            holder: AtomicI32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Block until the mutex is acquired.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        MutexGuard::new(self)
    }

    /// True iff the calling thread is the recorded holder.
    pub fn is_locked_by_this_thread(&self) -> bool {
        self.holder.load(Ordering::Relaxed) == current_thread::tid()
    }

    /// Panic unless the calling thread holds the mutex.
    ///
    /// The panic aborts the process under `panic = "abort"` or inside a
    /// managed [`Thread`](crate::Thread); elsewhere it unwinds the caller.
    #[track_caller]
    pub fn assert_locked(&self) {
        assert!(
            self.is_locked_by_this_thread(),
            "mutex not held by thread {}",
            current_thread::tid()
        );
    }

    /// Tid of the holding thread, 0 when unheld. Racy outside the lock.
    pub fn holder(&self) -> pid_t {
        self.holder.load(Ordering::Relaxed)
    }

    /// Mutable access without locking; `&mut self` proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    // Order matters: lock, then record the holder.
    fn acquire(&self) {
        // SAFETY: raw was initialized in `new` and is pinned in its box.
        check(
            unsafe { libc::pthread_mutex_lock(self.raw.get()) },
            "pthread_mutex_lock",
        );
        self.assign_holder();
    }

    // Reverse order: clear the holder, then unlock.
    fn release(&self) {
        self.unassign_holder();
        // SAFETY: only called by the guard that acquired on this thread.
        check(
            unsafe { libc::pthread_mutex_unlock(self.raw.get()) },
            "pthread_mutex_unlock",
        );
    }

    fn assign_holder(&self) {
        self.holder.store(current_thread::tid(), Ordering::Relaxed);
    }

    fn unassign_holder(&self) {
        self.holder.store(0, Ordering::Relaxed);
    }

    /// Raw handle for [`Condition`](crate::Condition) waits.
    pub(crate) fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.raw.get()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("holder", &self.holder())
            .finish_non_exhaustive()
    }
}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        if *self.holder.get_mut() != 0 {
            fatal::invariant("mutex destroyed while held");
        }
        // SAFETY: no guard can outlive the borrow of self.
        check(
            unsafe { libc::pthread_mutex_destroy(self.raw.get()) },
            "pthread_mutex_destroy",
        );
    }
}

/// Scoped lock: acquires on construction, releases on drop.
///
/// Not `Send`: a pthread mutex must be unlocked by the thread that locked it.
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T = ()> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T> MutexGuard<'a, T> {
    /// Lock `mutex` for the lifetime of the returned guard.
    pub fn new(mutex: &'a Mutex<T>) -> Self {
        mutex.acquire();
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }

    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock and is borrowed mutably.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

impl<T: fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Clears the holder for a scope while the OS lock is handed to a condition
/// wait, and records the calling thread again on drop.
pub(crate) struct UnassignGuard<'a, T> {
    owner: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> UnassignGuard<'a, T> {
    pub(crate) fn new(owner: &'a Mutex<T>) -> Self {
        owner.unassign_holder();
        Self {
            owner,
            _not_send: PhantomData,
        }
    }
}

impl<T> Drop for UnassignGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.assign_holder();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_and_mutate() {
        let m = Mutex::new(0);
        *m.lock() += 1;
        assert_eq!(*m.lock(), 1);
    }

    #[test]
    fn holder_tracks_guard_scope() {
        let m = Mutex::new(());
        assert_eq!(m.holder(), 0);
        assert!(!m.is_locked_by_this_thread());
        {
            let _guard = m.lock();
            assert_eq!(m.holder(), current_thread::tid());
            assert!(m.is_locked_by_this_thread());
            m.assert_locked();
        }
        assert_eq!(m.holder(), 0);
        assert!(!m.is_locked_by_this_thread());
    }

    #[test]
    #[should_panic(expected = "mutex not held")]
    fn assert_locked_fails_when_unheld() {
        let m = Mutex::new(());
        m.assert_locked();
    }

    #[test]
    fn guard_releases_on_early_return() {
        fn first_even(m: &Mutex<Vec<u32>>) -> Option<u32> {
            let guard = m.lock();
            for v in guard.iter() {
                if v % 2 == 0 {
                    return Some(*v);
                }
            }
            None
        }
        let m = Mutex::new(vec![1, 3, 4, 5]);
        assert_eq!(first_even(&m), Some(4));
        assert_eq!(m.holder(), 0);
        drop(m.lock());
    }

    #[test]
    fn guard_releases_on_unwind() {
        let m = Mutex::new(0);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = m.lock();
            panic!("inside critical section");
        }));
        assert!(result.is_err());
        assert_eq!(m.holder(), 0);
        *m.lock() = 5;
        assert_eq!(*m.lock(), 5);
    }

    #[test]
    fn unassign_guard_clears_and_restores_holder() {
        let m = Mutex::new(());
        let _guard = m.lock();
        {
            let _unassigned = UnassignGuard::new(&m);
            assert_eq!(m.holder(), 0);
            assert!(!m.is_locked_by_this_thread());
        }
        assert!(m.is_locked_by_this_thread());
    }

    #[test]
    fn get_mut_bypasses_lock() {
        let mut m = Mutex::new(String::from("a"));
        m.get_mut().push('b');
        assert_eq!(*m.lock(), "ab");
    }

    #[test]
    fn concurrent_lock() {
        use std::sync::Arc;
        let m = Arc::new(Mutex::new(0));
        let mut handles = vec![];
        for _ in 0..10 {
            let m = m.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    *m.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*m.lock(), 1000);
    }
}
