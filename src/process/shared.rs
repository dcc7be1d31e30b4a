//! Cross-process flags
//!
//! A flag lives in a shared file mapping, so a worker forked after the flag
//! was created observes every later `set` from the parent and vice versa.
//! The backing file is unlinked as soon as it is created. Flags are
//! write-once: they can be set but never cleared.

use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};

use memmap2::{MmapMut, MmapOptions};

const FLAG_LEN: usize = mem::size_of::<AtomicBool>();

/// A boolean shared between a process and the children it forks
pub struct SharedFlag {
    mmap: MmapMut,
}

impl SharedFlag {
    /// Map a fresh, unset flag
    pub fn new() -> io::Result<Self> {
        let file = tempfile::tempfile()?;
        // Zero-filled, which is `false`
        file.set_len(FLAG_LEN as u64)?;

        // SAFETY: the file is anonymous and unlinked, so nothing outside this
        // process tree can truncate or modify it.
        let mmap = unsafe { MmapOptions::new().len(FLAG_LEN).map_mut(&file)? };

        Ok(Self { mmap })
    }

    pub fn set(&self) {
        self.atomic().store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.atomic().load(Ordering::SeqCst)
    }

    fn atomic(&self) -> &AtomicBool {
        // SAFETY: the mapping is page aligned, at least FLAG_LEN bytes, only
        // ever accessed atomically, and lives as long as `self`.
        unsafe { &*(self.mmap.as_ptr() as *const AtomicBool) }
    }
}

impl std::fmt::Debug for SharedFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFlag").field("set", &self.is_set()).finish()
    }
}
