// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

/* misc utilities that do not really belong in any module */

use crate::error::Result;
use crate::pkcs11::*;

/// Copies `$len` bytes from a raw pointer into a newly allocated vector
///
/// A null pointer or a zero length yield an empty vector.
macro_rules! bytes_to_vec {
    ($ptr:expr, $len:expr) => {{
        let ptr = $ptr as *const u8;
        let size = usize::try_from($len)?;
        if ptr.is_null() || size == 0 {
            Vec::new()
        } else {
            let mut v = Vec::<u8>::with_capacity(size);
            unsafe {
                std::ptr::copy_nonoverlapping(ptr, v.as_mut_ptr(), size);
                v.set_len(size);
            }
            v
        }
    }};
}
pub(crate) use bytes_to_vec;

macro_rules! void_ptr {
    ($ptr:expr) => {
        $ptr as *const _ as CK_VOID_PTR
    };
}
pub(crate) use void_ptr;

macro_rules! byte_ptr {
    ($ptr:expr) => {
        $ptr as *const _ as CK_BYTE_PTR
    };
}
pub(crate) use byte_ptr;

macro_rules! sizeof {
    ($type:ty) => {
        CK_ULONG::try_from(std::mem::size_of::<$type>())?
    };
}
pub(crate) use sizeof;

/// Converts a buffer length to the CK_ULONG the module expects
pub fn ck_len(len: usize) -> Result<CK_ULONG> {
    Ok(CK_ULONG::try_from(len)?)
}

/// Returns a pointer suitable to pass a possibly empty slice to the module
///
/// PKCS#11 wants NULL for empty buffers rather than a dangling pointer.
pub fn slice_ptr(s: &[u8]) -> CK_BYTE_PTR {
    if s.is_empty() {
        std::ptr::null_mut()
    } else {
        byte_ptr!(s.as_ptr())
    }
}

/// Zeroizes a buffer in a way the compiler can't optimize away
pub fn zeromem(mem: &mut [u8]) {
    for b in mem.iter_mut() {
        unsafe { std::ptr::write_volatile(b, 0) };
    }
    std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
}
