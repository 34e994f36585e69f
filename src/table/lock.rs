use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Hands out one [`LockRef`] per table path.
///
/// Exclusion only holds between writers that obtained their lock from the
/// same manager. Paths are compared as given, not canonicalized.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<PathBuf, Weak<LockRef>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_lock(&self, path: impl AsRef<Path>) -> Result<Arc<LockRef>> {
        let path = path.as_ref();
        let mut locks = self.locks.lock()?;
        if let Some(lock) = locks.get(path).and_then(Weak::upgrade) {
            return Ok(lock);
        }

        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(LockRef {
            path: path.to_path_buf(),
            write_locked: AtomicBool::new(false),
        });
        locks.insert(path.to_path_buf(), Arc::downgrade(&lock));
        Ok(lock)
    }
}

#[derive(Debug)]
pub struct LockRef {
    path: PathBuf,
    write_locked: AtomicBool,
}

impl LockRef {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_write_locked(&self) -> bool {
        self.write_locked.load(Ordering::SeqCst)
    }

    /// Non-blocking; fails with `IllegalState` while another writer holds the lock.
    pub fn try_lock_write(self: &Arc<Self>) -> Result<WriteLockGuard> {
        self.write_locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                Error::IllegalState(format!(
                    "table {} is already locked for writing",
                    self.path.display()
                ))
            })?;
        Ok(WriteLockGuard { lock: self.clone() })
    }
}

/// Releases the write lock when dropped.
#[derive(Debug)]
pub struct WriteLockGuard {
    lock: Arc<LockRef>,
}

impl Drop for WriteLockGuard {
    fn drop(&mut self) {
        self.lock.write_locked.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_path_same_lock() -> Result<()> {
        let manager = LockManager::new();
        let a = manager.get_lock("/data/t.cst")?;
        let b = manager.get_lock("/data/t.cst")?;
        let c = manager.get_lock("/data/u.cst")?;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        Ok(())
    }

    #[test]
    fn test_write_lock_is_exclusive() -> Result<()> {
        let manager = LockManager::new();
        let lock = manager.get_lock("t.cst")?;

        let guard = lock.try_lock_write()?;
        assert!(lock.is_write_locked());
        let other = manager.get_lock("t.cst")?;
        assert!(matches!(other.try_lock_write(), Err(Error::IllegalState(_))));

        drop(guard);
        assert!(!lock.is_write_locked());
        let _guard = other.try_lock_write()?;
        Ok(())
    }

    #[test]
    fn test_dropped_locks_are_forgotten() -> Result<()> {
        let manager = LockManager::new();
        let lock = manager.get_lock("a.cst")?;
        let _guard = lock.try_lock_write()?;
        drop(_guard);
        drop(lock);

        manager.get_lock("b.cst")?;
        assert_eq!(manager.locks.lock()?.len(), 1);
        Ok(())
    }
}
