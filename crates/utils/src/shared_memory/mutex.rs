use std::cell::UnsafeCell;
use std::hint::spin_loop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::yield_now;

/// Spin lock that can live inside a shared-memory segment.
///
/// The lock word holds the pid of the process currently holding it, so a
/// lock left behind by a crashed player process can be reclaimed. Threads of
/// one process share a pid; exclusivity between them comes from the guard.
#[repr(C)]
pub struct ShmMutex<T> {
    lock: AtomicUsize,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for ShmMutex<T> {}
unsafe impl<T: Send> Sync for ShmMutex<T> {}

pub struct ShmMutexGuard<'a, T> {
    mutex: &'a ShmMutex<T>,
    owner: usize,
}

impl<T> Drop for ShmMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock(self.owner);
    }
}

impl<T> Deref for ShmMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for ShmMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.data.get() }
    }
}

fn current_pid() -> usize {
    std::process::id() as usize
}

impl<T> ShmMutex<T> {
    pub fn new(data: T) -> Self {
        ShmMutex {
            lock: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }

    fn is_process_alive(pid: usize) -> bool {
        if pid == 0 {
            return false;
        }
        let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
        ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    /// Releases the lock if its holder no longer exists.
    fn try_reclaim(&self) -> bool {
        let holder = self.lock.load(Ordering::Acquire);
        if holder == 0 || Self::is_process_alive(holder) {
            return false;
        }
        let reclaimed = self
            .lock
            .compare_exchange(holder, 0, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();
        if reclaimed {
            tracing::warn!(holder, "Reclaimed shared lock held by exited process");
        }
        reclaimed
    }

    pub fn try_lock(&self) -> Option<ShmMutexGuard<'_, T>> {
        let owner = current_pid();
        self.lock
            .compare_exchange(0, owner, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ShmMutexGuard { mutex: self, owner })
    }

    pub fn lock(&self) -> ShmMutexGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            if self.try_reclaim() {
                continue;
            }
            for _ in 0..100 {
                spin_loop();
            }
            yield_now();
        }
    }

    fn unlock(&self, owner: usize) {
        if self
            .lock
            .compare_exchange(owner, 0, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            tracing::warn!(
                owner,
                current = self.lock.load(Ordering::Relaxed),
                "unlock of a shared lock that was reclaimed by another process"
            );
        }
    }
}
