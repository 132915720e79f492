//! Executable memory for one compilation: a page-aligned buffer written
//! front-to-back with machine code while an 8-byte constant pool grows down
//! from the top, then sealed W^X into a callable function.

use std::collections::HashMap;
use std::ptr;

use crate::error::JitError;

const PAGE_SIZE: usize = 4096;

pub(crate) type EntryFn = unsafe extern "C" fn() -> f64;

struct Mapping {
    ptr: *mut u8,
    len: usize,
}

#[cfg(unix)]
impl Mapping {
    fn alloc(len: usize) -> Result<Self, JitError> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(JitError::OsPageAllocFailed);
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
        })
    }

    fn protect_exec(&self) -> Result<(), JitError> {
        let rc = unsafe {
            libc::mprotect(
                self.ptr as *mut libc::c_void,
                self.len,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            return Err(JitError::OsPageAllocFailed);
        }
        Ok(())
    }
}

#[cfg(windows)]
impl Mapping {
    fn alloc(len: usize) -> Result<Self, JitError> {
        use windows_sys::Win32::System::Memory::{
            VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE,
        };
        let ptr =
            unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
        if ptr.is_null() {
            return Err(JitError::OsPageAllocFailed);
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
        })
    }

    fn protect_exec(&self) -> Result<(), JitError> {
        use windows_sys::Win32::System::Memory::{VirtualProtect, PAGE_EXECUTE_READ};
        let mut old = 0u32;
        let ok = unsafe {
            VirtualProtect(
                self.ptr as *mut core::ffi::c_void,
                self.len,
                PAGE_EXECUTE_READ,
                &mut old,
            )
        };
        if ok == 0 {
            return Err(JitError::OsPageAllocFailed);
        }
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
        #[cfg(windows)]
        unsafe {
            use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};
            VirtualFree(self.ptr as *mut core::ffi::c_void, 0, MEM_RELEASE);
        }
    }
}

/// x86 keeps instruction and data caches coherent; the seam stays so a port
/// to a split-cache architecture has exactly one place to hook.
fn flush_icache(_start: *const u8, _len: usize) {}

/// A writable code region with a forward write cursor and a downward-growing
/// constant pool. [`seal`](CodeBuffer::seal) makes it executable.
pub(crate) struct CodeBuffer {
    mem: Mapping,
    capacity: usize,
    len: usize,
    pool: usize,
    consts: HashMap<u64, usize>,
}

impl CodeBuffer {
    pub(crate) fn new(capacity: usize) -> Result<Self, JitError> {
        let capacity = capacity.max(PAGE_SIZE).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let mem = Mapping::alloc(capacity)?;
        Ok(Self {
            mem,
            capacity,
            len: 0,
            pool: capacity,
            consts: HashMap::new(),
        })
    }

    /// Current write offset, i.e. the address of the next instruction byte
    /// relative to the buffer base.
    pub(crate) fn pos(&self) -> usize {
        self.len
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) -> Result<(), JitError> {
        if self.len + bytes.len() > self.pool {
            return Err(JitError::CodeBufferFull {
                capacity: self.capacity,
            });
        }
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.mem.ptr.add(self.len), bytes.len());
        }
        self.len += bytes.len();
        Ok(())
    }

    /// Rewrites a 32-bit little-endian field inside already-written code.
    pub(crate) fn patch32(&mut self, at: usize, value: u32) {
        debug_assert!(at + 4 <= self.len);
        unsafe {
            ptr::copy_nonoverlapping(value.to_le_bytes().as_ptr(), self.mem.ptr.add(at), 4);
        }
    }

    /// Places `value` in the constant pool (8-byte aligned, deduplicated by
    /// bit pattern) and returns its buffer offset.
    pub(crate) fn reserve_const8(&mut self, value: f64) -> Result<usize, JitError> {
        let bits = value.to_bits();
        if let Some(&off) = self.consts.get(&bits) {
            return Ok(off);
        }
        let off = self.pool - 8;
        if off < self.len {
            return Err(JitError::CodeBufferFull {
                capacity: self.capacity,
            });
        }
        unsafe {
            ptr::copy_nonoverlapping(bits.to_le_bytes().as_ptr(), self.mem.ptr.add(off), 8);
        }
        self.pool = off;
        self.consts.insert(bits, off);
        Ok(off)
    }

    /// Emitted code so far.
    pub(crate) fn code(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.mem.ptr, self.len) }
    }

    /// Flushes the instruction cache, drops the write permission and hands
    /// back the entry point at offset 0. The buffer cannot be written again.
    pub(crate) fn seal(self) -> Result<CompiledCode, JitError> {
        let CodeBuffer { mem, len, .. } = self;
        flush_icache(mem.ptr, len);
        mem.protect_exec()?;
        let entry: EntryFn = unsafe { std::mem::transmute::<*mut u8, EntryFn>(mem.ptr) };
        Ok(CompiledCode {
            _mem: mem,
            code_len: len,
            entry,
        })
    }
}

/// A sealed, executable compilation. Dropping it unmaps the pages, which
/// invalidates the entry pointer; the engine therefore replaces the old
/// `CompiledCode` only after a new one sealed successfully.
pub(crate) struct CompiledCode {
    _mem: Mapping,
    code_len: usize,
    entry: EntryFn,
}

impl CompiledCode {
    pub(crate) fn call(&self) -> f64 {
        // The entry points at code this crate emitted and sealed; the
        // generated function takes no arguments and only reads variable
        // slots that the symbol table keeps pinned.
        unsafe { (self.entry)() }
    }

    pub(crate) fn code_len(&self) -> usize {
        self.code_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_to_page_size() {
        let buf = CodeBuffer::new(100).unwrap();
        assert_eq!(buf.capacity % PAGE_SIZE, 0);
        assert!(buf.capacity >= PAGE_SIZE);
    }

    #[test]
    fn write_advances_the_cursor() {
        let mut buf = CodeBuffer::new(4096).unwrap();
        buf.write(&[0x90, 0x90]).unwrap();
        assert_eq!(buf.pos(), 2);
        assert_eq!(buf.code(), &[0x90, 0x90]);
    }

    #[test]
    fn overflow_reports_code_buffer_full() {
        let mut buf = CodeBuffer::new(4096).unwrap();
        let big = vec![0x90u8; 5000];
        assert!(matches!(
            buf.write(&big),
            Err(JitError::CodeBufferFull { .. })
        ));
    }

    #[test]
    fn pool_grows_downward_and_deduplicates() {
        let mut buf = CodeBuffer::new(4096).unwrap();
        let a = buf.reserve_const8(1.5).unwrap();
        let b = buf.reserve_const8(2.5).unwrap();
        let again = buf.reserve_const8(1.5).unwrap();
        assert_eq!(a, 4096 - 8);
        assert_eq!(b, 4096 - 16);
        assert_eq!(again, a);
    }

    #[test]
    fn code_meeting_pool_is_full() {
        let mut buf = CodeBuffer::new(4096).unwrap();
        buf.write(&vec![0x90u8; 4090]).unwrap();
        assert!(matches!(
            buf.reserve_const8(1.0),
            Err(JitError::CodeBufferFull { .. })
        ));
    }

    #[test]
    fn patch32_rewrites_in_place() {
        let mut buf = CodeBuffer::new(4096).unwrap();
        buf.write(&[0x48, 0x81, 0xEC, 0, 0, 0, 0]).unwrap();
        buf.patch32(3, 0x20);
        assert_eq!(buf.code(), &[0x48, 0x81, 0xEC, 0x20, 0, 0, 0]);
    }

    #[test]
    fn sealed_code_runs() {
        let mut buf = CodeBuffer::new(4096).unwrap();
        // xorpd xmm0, xmm0; ret
        buf.write(&[0x66, 0x0F, 0x57, 0xC0, 0xC3]).unwrap();
        let code = buf.seal().unwrap();
        assert_eq!(code.call(), 0.0);
        assert_eq!(code.code_len(), 5);
    }
}
