//! Pieces of the BIO API that `openssl-sys` does not bind: the `BIO_ctrl`
//! commands and flag tests that `<openssl/bio.h>` spells as macros, and
//! a few plain functions. The method setters are declared here with the
//! callback types we build tables from.

#![allow(non_snake_case)]

use openssl_sys as sys;

use std::ffi::{c_char, c_int, c_long, c_void};

pub(crate) type BioWriteFn = unsafe extern "C" fn(*mut sys::BIO, *const c_char, c_int) -> c_int;
pub(crate) type BioReadFn = unsafe extern "C" fn(*mut sys::BIO, *mut c_char, c_int) -> c_int;
pub(crate) type BioCtrlFn = unsafe extern "C" fn(*mut sys::BIO, c_int, c_long, *mut c_void) -> c_long;
/// `create` and `destroy` share this shape.
pub(crate) type BioDestroyFn = unsafe extern "C" fn(*mut sys::BIO) -> c_int;

pub(crate) const BIO_TYPE_SOURCE_SINK: c_int = 0x0400;

#[cfg(test)]
pub(crate) const BIO_CTRL_RESET: c_int = 1;
pub(crate) const BIO_CTRL_EOF: c_int = 2;
#[cfg(test)]
pub(crate) const BIO_CTRL_INFO: c_int = 3;
pub(crate) const BIO_CTRL_PENDING: c_int = 10;
pub(crate) const BIO_CTRL_FLUSH: c_int = 11;
pub(crate) const BIO_CTRL_DUP: c_int = 12;
pub(crate) const BIO_CTRL_WPENDING: c_int = 13;

// OpenSSL functions not in openssl-sys

extern "C" {
    pub(crate) fn BIO_get_new_index() -> c_int;
    pub(crate) fn BIO_meth_set_write(biom: *mut sys::BIO_METHOD, write: Option<BioWriteFn>) -> c_int;
    pub(crate) fn BIO_meth_set_read(biom: *mut sys::BIO_METHOD, read: Option<BioReadFn>) -> c_int;
    pub(crate) fn BIO_meth_set_ctrl(biom: *mut sys::BIO_METHOD, ctrl: Option<BioCtrlFn>) -> c_int;
    pub(crate) fn BIO_meth_set_create(biom: *mut sys::BIO_METHOD, create: Option<BioDestroyFn>) -> c_int;
    pub(crate) fn BIO_meth_set_destroy(biom: *mut sys::BIO_METHOD, destroy: Option<BioDestroyFn>) -> c_int;
}

#[cfg(test)]
extern "C" {
    pub(crate) fn BIO_test_flags(b: *const sys::BIO, flags: c_int) -> c_int;
    pub(crate) fn BIO_f_buffer() -> *const sys::BIO_METHOD;
    pub(crate) fn BIO_push(b: *mut sys::BIO, append: *mut sys::BIO) -> *mut sys::BIO;
    pub(crate) fn BIO_pop(b: *mut sys::BIO) -> *mut sys::BIO;
}

/// # Safety
///
/// `b` must be a live BIO.
pub(crate) unsafe fn BIO_clear_retry_flags(b: *mut sys::BIO) {
    // SAFETY: Per the contract above.
    unsafe { sys::BIO_clear_flags(b, sys::BIO_FLAGS_RWS | sys::BIO_FLAGS_SHOULD_RETRY) }
}

#[cfg(test)]
pub(crate) use self::test_macros::*;

#[cfg(test)]
mod test_macros {
    use super::*;

    /// # Safety
    ///
    /// `b` must be a live BIO.
    pub(crate) unsafe fn BIO_should_retry(b: *mut sys::BIO) -> bool {
        // SAFETY: Per the contract above.
        unsafe { BIO_test_flags(b, sys::BIO_FLAGS_SHOULD_RETRY) != 0 }
    }

    /// # Safety
    ///
    /// `b` must be a live BIO.
    pub(crate) unsafe fn BIO_should_read(b: *mut sys::BIO) -> bool {
        // SAFETY: Per the contract above.
        unsafe { BIO_test_flags(b, sys::BIO_FLAGS_READ) != 0 }
    }

    /// # Safety
    ///
    /// `b` must be a live BIO.
    pub(crate) unsafe fn BIO_pending(b: *mut sys::BIO) -> c_long {
        // SAFETY: Per the contract above.
        unsafe { sys::BIO_ctrl(b, BIO_CTRL_PENDING, 0, std::ptr::null_mut()) }
    }

    /// # Safety
    ///
    /// `b` must be a live BIO.
    pub(crate) unsafe fn BIO_wpending(b: *mut sys::BIO) -> c_long {
        // SAFETY: Per the contract above.
        unsafe { sys::BIO_ctrl(b, BIO_CTRL_WPENDING, 0, std::ptr::null_mut()) }
    }

    /// # Safety
    ///
    /// `b` must be a live BIO.
    pub(crate) unsafe fn BIO_flush(b: *mut sys::BIO) -> c_long {
        // SAFETY: Per the contract above.
        unsafe { sys::BIO_ctrl(b, BIO_CTRL_FLUSH, 0, std::ptr::null_mut()) }
    }
}
