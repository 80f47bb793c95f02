//! Executable code memory.
//!
//! Pages are allocated writable, filled with machine code, and flipped once
//! to read-execute. `.patch` needs to rewrite an exit stub after that
//! transition, so a targeted write temporarily flips the region back to
//! writable. Single-threaded by design; no executor can observe the
//! intermediate state.

use crate::error::AsmError;

/// One fragment's worth of executable memory.
pub struct CodeMemory {
    alloc: region::Allocation,
    len: usize,
}

impl CodeMemory {
    /// Map `code` into fresh pages and make them executable.
    pub fn from_code(code: &[u8]) -> Result<Self, AsmError> {
        let mut alloc = region::alloc(code.len().max(1), region::Protection::READ_WRITE)?;
        unsafe {
            let dst = alloc.as_mut_ptr::<u8>();
            core::ptr::copy_nonoverlapping(code.as_ptr(), dst, code.len());
            region::protect(
                alloc.as_ptr::<u8>(),
                alloc.len(),
                region::Protection::READ_EXECUTE,
            )?;
        }
        Ok(Self {
            alloc,
            len: code.len(),
        })
    }

    /// The entry point: the first byte of the region.
    pub fn as_ptr(&self) -> *const u8 {
        self.alloc.as_ptr()
    }

    /// Bytes of code in the region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region holds no code.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Overwrite `bytes` at `offset`, briefly making the region writable.
    pub fn rewrite(&mut self, offset: usize, bytes: &[u8]) -> Result<(), AsmError> {
        assert!(offset + bytes.len() <= self.len, "rewrite out of bounds");
        unsafe {
            region::protect(
                self.alloc.as_ptr::<u8>(),
                self.alloc.len(),
                region::Protection::READ_WRITE,
            )?;
            let dst = self.alloc.as_mut_ptr::<u8>().add(offset);
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
            region::protect(
                self.alloc.as_ptr::<u8>(),
                self.alloc.len(),
                region::Protection::READ_EXECUTE,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn round_trip_through_executable_pages() {
        // mov eax, 7; ret
        let code = [0xb8, 0x07, 0x00, 0x00, 0x00, 0xc3];
        let mem = CodeMemory::from_code(&code).unwrap();
        let f: extern "C" fn() -> i32 = unsafe { core::mem::transmute(mem.as_ptr()) };
        assert_eq!(f(), 7);
    }

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn rewrite_changes_behavior() {
        let code = [0xb8, 0x07, 0x00, 0x00, 0x00, 0xc3];
        let mut mem = CodeMemory::from_code(&code).unwrap();
        // Change the immediate to 9.
        mem.rewrite(1, &[0x09, 0x00, 0x00, 0x00]).unwrap();
        let f: extern "C" fn() -> i32 = unsafe { core::mem::transmute(mem.as_ptr()) };
        assert_eq!(f(), 9);
    }
}
