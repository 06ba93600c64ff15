//! Thread-safe cartridge handle.
//!
//! `CartDriver` assumes a single thread of control: a chain extension and a
//! cache eviction touching the same frame must not interleave. `SharedCart`
//! wraps the driver in one mutex so every operation, including the whole
//! chain walk of a read or write, runs to completion before the next starts.
//!
//! Clone is cheap (just clones the Arc).

use std::sync::{Arc, Mutex, MutexGuard};

use crate::driver::{CartDriver, FileHandle};
use crate::error::{CartError, CartResult};
use crate::transport::CartTransport;

/// Lock-serialized driver shared between threads.
pub struct SharedCart<T: CartTransport> {
    inner: Arc<Mutex<CartDriver<T>>>,
}

impl<T: CartTransport> Clone for SharedCart<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: CartTransport> SharedCart<T> {
    pub fn new(driver: CartDriver<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(driver)),
        }
    }

    fn lock(&self) -> CartResult<MutexGuard<'_, CartDriver<T>>> {
        self.inner.lock().map_err(|_| CartError::LockPoisoned)
    }

    /// Run `f` with exclusive access to the driver.
    ///
    /// Use this for sequences that must not interleave with other callers,
    /// e.g. seek followed by read.
    pub fn with<R>(&self, f: impl FnOnce(&mut CartDriver<T>) -> CartResult<R>) -> CartResult<R> {
        let mut driver = self.lock()?;
        f(&mut driver)
    }

    pub fn power_on(&self) -> CartResult<()> {
        self.lock()?.power_on()
    }

    pub fn power_off(&self) -> CartResult<()> {
        self.lock()?.power_off()
    }

    pub fn open(&self, name: &str) -> CartResult<FileHandle> {
        self.lock()?.open(name)
    }

    pub fn close(&self, handle: FileHandle) -> CartResult<()> {
        self.lock()?.close(handle)
    }

    pub fn seek(&self, handle: FileHandle, offset: u32) -> CartResult<()> {
        self.lock()?.seek(handle, offset)
    }

    pub fn read(&self, handle: FileHandle, len: usize) -> CartResult<Vec<u8>> {
        self.lock()?.read_vec(handle, len)
    }

    pub fn write(&self, handle: FileHandle, data: &[u8]) -> CartResult<usize> {
        self.lock()?.write(handle, data)
    }

    pub fn file_length(&self, handle: FileHandle) -> CartResult<u32> {
        self.lock()?.file_length(handle)
    }

    /// Frames currently held by the cache.
    pub fn cached_frames(&self) -> CartResult<usize> {
        Ok(self.lock()?.cache().occupied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CartConfig;
    use crate::transport::MemoryDevice;
    use std::thread;

    fn shared() -> SharedCart<MemoryDevice> {
        let cfg = CartConfig::default().with_geometry(4, 16).with_cache_frames(3);
        let driver = CartDriver::new(cfg, MemoryDevice::new(4, 16)).unwrap();
        let cart = SharedCart::new(driver);
        cart.power_on().unwrap();
        cart
    }

    #[test]
    fn test_clones_share_state() {
        let a = shared();
        let b = a.clone();

        let h = a.open("notes").unwrap();
        b.write(h, b"from b").unwrap();
        assert_eq!(a.file_length(h).unwrap(), 6);

        a.seek(h, 0).unwrap();
        assert_eq!(b.read(h, 6).unwrap(), b"from b");
    }

    #[test]
    fn test_threads_write_separate_files() {
        let cart = shared();
        let workers: Vec<_> = (0..4u8)
            .map(|i| {
                let cart = cart.clone();
                thread::spawn(move || {
                    let h = cart.open(&format!("file{}", i)).unwrap();
                    for _ in 0..10 {
                        cart.write(h, &[i; 300]).unwrap();
                    }
                    h
                })
            })
            .collect();

        for (i, worker) in workers.into_iter().enumerate() {
            let h = worker.join().unwrap();
            let data = cart
                .with(|drv| {
                    drv.seek(h, 0)?;
                    drv.read_vec(h, 3000)
                })
                .unwrap();
            assert_eq!(data.len(), 3000);
            assert!(data.iter().all(|&b| b == i as u8));
        }
        assert!(cart.cached_frames().unwrap() <= 3);
    }
}
