//! POSIX named semaphores.

use std::ffi::CString;
use std::io;
use std::time::Duration;

use crate::IpcError;

/// A named counting semaphore shared between processes.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: String,
    owner: bool,
}

// sem_wait/sem_post are safe to call concurrently on one handle.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

fn c_name(name: &str) -> Result<CString, IpcError> {
    let valid = name.len() > 1 && name.starts_with('/') && !name[1..].contains('/');
    if !valid {
        return Err(IpcError::InvalidName(name.to_string()));
    }
    CString::new(name).map_err(|_| IpcError::InvalidName(name.to_string()))
}

impl NamedSemaphore {
    /// Creates the semaphore with a count of zero. A semaphore left behind by
    /// an unclean shutdown is reused and drained back to zero.
    pub fn create(name: &str) -> Result<Self, IpcError> {
        let c_name = c_name(name)?;
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                0 as libc::c_uint,
            )
        };
        let sem = Self::check_open(sem, name, true)?;
        while sem.try_wait()? {}
        tracing::debug!(name = %name, "Created semaphore");
        Ok(sem)
    }

    /// Opens a semaphore created by another process.
    pub fn open(name: &str) -> Result<Self, IpcError> {
        let c_name = c_name(name)?;
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        Self::check_open(sem, name, false)
    }

    fn check_open(sem: *mut libc::sem_t, name: &str, owner: bool) -> Result<Self, IpcError> {
        if sem == libc::SEM_FAILED {
            return Err(IpcError::Semaphore {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(Self {
            sem,
            name: name.to_string(),
            owner,
        })
    }

    fn error(&self) -> IpcError {
        IpcError::Semaphore {
            name: self.name.clone(),
            source: io::Error::last_os_error(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks until the count can be decremented. Interrupted waits resume.
    pub fn wait(&self) -> Result<(), IpcError> {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            if io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                return Err(self.error());
            }
        }
    }

    /// Decrements without blocking. Returns `false` when the count was zero.
    pub fn try_wait(&self) -> Result<bool, IpcError> {
        if unsafe { libc::sem_trywait(self.sem) } == 0 {
            return Ok(true);
        }
        match io::Error::last_os_error().raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(false),
            _ => Err(self.error()),
        }
    }

    /// Waits at most `timeout`. Returns `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, IpcError> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) };
        let total_nanos = now.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
        let deadline = libc::timespec {
            tv_sec: now.tv_sec
                + timeout.as_secs() as libc::time_t
                + (total_nanos / 1_000_000_000) as libc::time_t,
            tv_nsec: (total_nanos % 1_000_000_000) as libc::c_long,
        };

        loop {
            if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
                return Ok(true);
            }
            match io::Error::last_os_error().raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Ok(false),
                _ => return Err(self.error()),
            }
        }
    }

    pub fn post(&self) -> Result<(), IpcError> {
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(self.error())
        }
    }

    pub fn value(&self) -> Result<i32, IpcError> {
        let mut value: libc::c_int = 0;
        if unsafe { libc::sem_getvalue(self.sem, &mut value) } == 0 {
            Ok(value)
        } else {
            Err(self.error())
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
        if self.owner {
            if let Ok(c_name) = CString::new(self.name.as_str()) {
                if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
                    tracing::warn!(
                        name = %self.name,
                        error = %io::Error::last_os_error(),
                        "Failed to unlink semaphore"
                    );
                }
            }
            tracing::debug!(name = %self.name, "Removed semaphore");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn unique(tag: &str) -> String {
        format!("/br31_test_{tag}_{}", std::process::id())
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(matches!(
            NamedSemaphore::create("no_slash"),
            Err(IpcError::InvalidName(_))
        ));
        assert!(matches!(
            NamedSemaphore::create("/a/b"),
            Err(IpcError::InvalidName(_))
        ));
    }

    #[test]
    fn post_wakes_blocked_waiter() {
        let sem = Arc::new(NamedSemaphore::create(&unique("wake")).unwrap());
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.wait())
        };
        thread::sleep(Duration::from_millis(20));
        sem.post().unwrap();
        waiter.join().unwrap().unwrap();
        assert_eq!(sem.value().unwrap(), 0);
    }

    #[test]
    fn wait_timeout_expires() {
        let sem = NamedSemaphore::create(&unique("timeout")).unwrap();
        assert!(!sem.wait_timeout(Duration::from_millis(10)).unwrap());
        sem.post().unwrap();
        assert!(sem.wait_timeout(Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn create_drains_leftover_count() {
        let name = unique("drain");
        let first = NamedSemaphore::create(&name).unwrap();
        first.post().unwrap();
        first.post().unwrap();

        let opened = NamedSemaphore::open(&name).unwrap();
        assert_eq!(opened.value().unwrap(), 2);

        let second = NamedSemaphore::create(&name).unwrap();
        assert_eq!(second.value().unwrap(), 0);
        drop(opened);
        drop(first);
    }
}
