//! The guarded tape: a fixed-size byte array with one OS guard page
//! (`PROT_NONE`) on each side, so a program that walks off either end takes
//! a `SIGSEGV` instead of corrupting unrelated memory.
//!
//! Built directly on raw `libc::mmap`/`mprotect`: three regions, guard / RW /
//! guard, rather than a higher-level memory-mapping wrapper.

use std::ptr::NonNull;

use crate::error::SystemError;

/// Default tape size in bytes.
pub const DEFAULT_TAPE_SIZE: usize = 65_536;

/// Default pointer origin offset from the tape base.
pub const DEFAULT_TAPE_OFFSET: usize = 4_096;

fn page_size() -> usize {
    // SAFETY: `sysconf` with `_SC_PAGESIZE` has no preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// An executable-adjacent byte tape. Memory is laid out as
/// `[guard page][cells][guard page]` when `guarded` is true, or as a bare
/// `mmap`'d region with no surrounding protection otherwise.
///
/// Dropping a `Tape` unmaps the whole region, including its guard pages.
pub struct Tape {
    /// Base of the whole mapping (guard page start, if guarded).
    base: NonNull<u8>,
    /// Total mapped length, including guard pages.
    mapped_len: usize,
    /// Pointer to the first addressable cell (base + one guard page, if
    /// guarded). This is what gets passed into the JIT function.
    cells: NonNull<u8>,
    guarded: bool,
}

impl Tape {
    /// Allocate a tape of `size` cells. When `guarded` is true (default
    /// safety mode), one page of `PROT_NONE` is placed on each side; an
    /// out-of-range access raises `SIGSEGV`, reported by the OS. In unsafe
    /// mode (`guarded = false`) no guard pages are mapped and an
    /// out-of-range access is undefined behavior. "Bounds checks" and "guard
    /// pages" are the same mechanism here rather than two independent ones,
    /// so the only thing unsafe mode removes is the guard pages themselves.
    pub fn new(size: usize, guarded: bool) -> Result<Self, SystemError> {
        let page = page_size();
        let guard_len = if guarded { page } else { 0 };
        let mapped_len = size + 2 * guard_len;

        // SAFETY: requesting an anonymous, non-file-backed mapping of
        // `mapped_len` bytes; all arguments are valid per `mmap(2)`.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapped_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(SystemError::MemoryMap(std::io::Error::last_os_error()));
        }
        let base = NonNull::new(addr as *mut u8).expect("mmap returned null on success");

        if guarded {
            // SAFETY: `base` and `base + guard_len + size` each point to a
            // `page`-sized region within the mapping just created above.
            unsafe {
                if libc::mprotect(base.as_ptr() as *mut _, guard_len, libc::PROT_NONE) != 0 {
                    let err = SystemError::MemoryProtect(std::io::Error::last_os_error());
                    libc::munmap(base.as_ptr() as *mut _, mapped_len);
                    return Err(err);
                }
                let tail = base.as_ptr().add(guard_len + size);
                if libc::mprotect(tail as *mut _, guard_len, libc::PROT_NONE) != 0 {
                    let err = SystemError::MemoryProtect(std::io::Error::last_os_error());
                    libc::munmap(base.as_ptr() as *mut _, mapped_len);
                    return Err(err);
                }
            }
        }

        // SAFETY: `guard_len <= mapped_len`, computed above from the same
        // `size`/`guard_len` used to create the mapping.
        let cells = unsafe { NonNull::new_unchecked(base.as_ptr().add(guard_len)) };

        Ok(Tape {
            base,
            mapped_len,
            cells,
            guarded,
        })
    }

    /// Pointer to the first cell. Combined with `offset`, this is the value
    /// passed as the JIT function's tape-pointer argument.
    pub fn cells_ptr(&self) -> *mut u8 {
        self.cells.as_ptr()
    }

    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    /// Read the tape's current contents as a slice, for tests and for
    /// `--debug` dumps. Only valid while the JIT function isn't running.
    pub fn as_slice(&self, len: usize) -> &[u8] {
        // SAFETY: `cells` points to at least `len` readable bytes as long as
        // `len` is within the `size` this tape was constructed with; callers
        // pass back the same size they allocated.
        unsafe { std::slice::from_raw_parts(self.cells.as_ptr(), len) }
    }
}

impl Drop for Tape {
    fn drop(&mut self) {
        // SAFETY: `base`/`mapped_len` describe exactly the mapping created
        // in `new`, and no other reference to it survives this call.
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut _, self.mapped_len);
        }
    }
}

// The tape is handed to JIT code via a raw pointer and never aliased by
// safe Rust references while the JIT function runs; sending it across the
// (single, short-lived) profiler signal-handling context is fine since the
// handler only reads `code_start`/`code_end`, never the tape.
unsafe impl Send for Tape {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_tape_round_trips_writes() {
        let tape = Tape::new(DEFAULT_TAPE_SIZE, true).unwrap();
        let ptr = tape.cells_ptr();
        unsafe {
            *ptr = 42;
            *ptr.add(1) = 7;
        }
        assert_eq!(tape.as_slice(2), &[42, 7]);
    }

    #[test]
    fn unguarded_tape_still_allocates() {
        let tape = Tape::new(1024, false).unwrap();
        assert!(!tape.is_guarded());
        assert!(!tape.cells_ptr().is_null());
    }
}
