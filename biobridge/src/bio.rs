//! Glue between the engine's BIO objects and our adapters: ownership of
//! BIOs and method tables, the token stored in a BIO's data field, and
//! the guard every foreign entry point runs under.

use crate::{
    error::{Error, Result},
    ffi,
    registry::{Registry, Token},
};

use openssl_sys as sys;

use std::{
    ffi::{c_char, c_int, c_long, CStr},
    panic::{catch_unwind, AssertUnwindSafe},
    ptr::NonNull,
    sync::Arc,
};

/// An owned engine BIO, freed (running its method's destroy callback
/// once the last reference goes) on drop.
#[derive(Debug)]
pub struct Bio(NonNull<sys::BIO>);

impl Bio {
    /// Invokes [`sys::BIO_new`] with one of our method tables.
    pub(crate) fn new(method: &BioMethod) -> Result<Self> {
        // SAFETY: `method` wraps a table from `BIO_meth_new` which is
        // never freed (see `BioMethod`), so it outlives the new BIO.
        let ptr = unsafe { sys::BIO_new(method.as_ptr()) };
        NonNull::new(ptr).map(Self).ok_or(Error::CreateFailed)
    }

    /// The raw BIO, for handing to the engine. The pointer stays valid
    /// for as long as `self` is alive.
    pub fn as_ptr(&self) -> *mut sys::BIO {
        self.0.as_ptr()
    }

    pub(crate) fn as_non_null(&self) -> NonNull<sys::BIO> {
        self.0
    }

    /// The token currently stored in this BIO's data field, if any.
    pub fn token(&self) -> Option<Token> {
        // SAFETY: `self.0` is live until `self` is dropped.
        unsafe { token_of(self.as_ptr()) }
    }

    /// Stores `token` in this BIO's data field.
    pub(crate) fn attach(&self, token: Token) {
        // SAFETY: `self.0` is live until `self` is dropped.
        unsafe { sys::BIO_set_data(self.as_ptr(), token.into_data()) }
    }
}

impl Drop for Bio {
    /// Invokes [`sys::BIO_free_all`]
    fn drop(&mut self) {
        // SAFETY: We own one reference to `self.0`, taken by `BIO_new`,
        // and it is not used again after this.
        unsafe { sys::BIO_free_all(self.as_ptr()) };
    }
}

// SAFETY: A BIO has no thread affinity. `Bio` is not `Sync`, so only one
// thread at a time touches its fields.
unsafe impl Send for Bio {}

/// A method table built from our callbacks. These are created once per
/// process and intentionally never freed, so every BIO built from one
/// may rely on it staying alive.
pub(crate) struct BioMethod(NonNull<sys::BIO_METHOD>);

impl BioMethod {
    /// Builds a source/sink method table with a fresh type index.
    pub(crate) fn new(
        name: &'static CStr,
        write: Option<ffi::BioWriteFn>,
        read: Option<ffi::BioReadFn>,
        ctrl: ffi::BioCtrlFn,
        destroy: ffi::BioDestroyFn,
    ) -> Result<Self> {
        sys::init();

        // SAFETY: No preconditions.
        let index = unsafe { ffi::BIO_get_new_index() };
        if index == -1 {
            return Err(Error::CreateFailed);
        }

        // SAFETY: `name` is `'static` and therefore outlives the table.
        let ptr = unsafe { sys::BIO_meth_new(index | ffi::BIO_TYPE_SOURCE_SINK, name.as_ptr()) };
        let Some(ptr) = NonNull::new(ptr) else {
            return Err(Error::CreateFailed);
        };

        // SAFETY: `ptr` is a fresh table not yet shared with anyone.
        let mut ok = unsafe { ffi::BIO_meth_set_write(ptr.as_ptr(), write) } == 1;
        // SAFETY: As above.
        ok &= unsafe { ffi::BIO_meth_set_read(ptr.as_ptr(), read) } == 1;
        // SAFETY: As above.
        ok &= unsafe { ffi::BIO_meth_set_ctrl(ptr.as_ptr(), Some(ctrl)) } == 1;
        // SAFETY: As above.
        ok &= unsafe { ffi::BIO_meth_set_create(ptr.as_ptr(), Some(bio_create)) } == 1;
        // SAFETY: As above.
        ok &= unsafe { ffi::BIO_meth_set_destroy(ptr.as_ptr(), Some(destroy)) } == 1;

        if !ok {
            // SAFETY: No BIO has been built from the table yet.
            unsafe { sys::BIO_meth_free(ptr.as_ptr()) };
            return Err(Error::CreateFailed);
        }
        Ok(Self(ptr))
    }

    fn as_ptr(&self) -> *mut sys::BIO_METHOD {
        self.0.as_ptr()
    }
}

// SAFETY: The table is only written while it is being built in
// `BioMethod::new`; afterwards it is read-only.
unsafe impl Send for BioMethod {}

// SAFETY: As above.
unsafe impl Sync for BioMethod {}

unsafe extern "C" fn bio_create(b: *mut sys::BIO) -> c_int {
    // SAFETY: The engine only runs `create` on the BIO it just allocated.
    unsafe { sys::BIO_set_init(b, 1) };
    1
}

/// Decodes the token in the data field of `b`.
///
/// # Safety
///
/// `b` must be null or a live BIO.
pub(crate) unsafe fn token_of(b: *mut sys::BIO) -> Option<Token> {
    if b.is_null() {
        return None;
    }
    // SAFETY: Per the contract above.
    Token::from_data(unsafe { sys::BIO_get_data(b) })
}

/// Resolves the adapter attached to `b` in `registry`.
///
/// # Safety
///
/// `b` must be null or a live BIO.
pub(crate) unsafe fn load<T>(registry: &Registry<T>, b: *mut sys::BIO) -> Option<Arc<T>> {
    // SAFETY: Per the contract above.
    unsafe { token_of(b) }.and_then(|token| registry.get(token))
}

/// Retires `owner` from `b`: removes the registry entry (only if it still
/// refers to `owner`) and clears the data field. Returns whether anything
/// was detached.
///
/// # Safety
///
/// `b` must be null or a live BIO.
pub(crate) unsafe fn detach<T>(registry: &Registry<T>, b: *mut sys::BIO, owner: &T) -> bool {
    // SAFETY: Per the contract above.
    let Some(token) = (unsafe { token_of(b) }) else {
        return false;
    };
    if !registry.del_if(token, owner) {
        return false;
    }
    // SAFETY: Per the contract above.
    unsafe { sys::BIO_set_data(b, std::ptr::null_mut()) };
    log::debug!("detached adapter {token}");
    true
}

/// Engine teardown: forgets whatever adapter `b` refers to.
///
/// # Safety
///
/// `b` must be null or a live BIO.
pub(crate) unsafe fn release<T>(registry: &Registry<T>, b: *mut sys::BIO) {
    // SAFETY: Per the contract above.
    if let Some(token) = unsafe { token_of(b) } {
        registry.del(token);
        // SAFETY: Per the contract above.
        unsafe { sys::BIO_set_data(b, std::ptr::null_mut()) };
        log::debug!("released adapter {token} on BIO destroy");
    }
}

/// Runs `f`, converting a panic into `on_panic` so that it never unwinds
/// into the engine.
pub(crate) fn guard<R>(what: &'static str, on_panic: R, f: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("non-string panic payload");
            log::error!("biobridge: {what} panicked: {msg}");
            on_panic
        }
    }
}

/// Views a foreign source buffer as a slice.
///
/// # Safety
///
/// If `size` is positive and `data` non-null, `data` must be valid for
/// reads of `size` bytes for `'a`.
pub(crate) unsafe fn raw_slice<'a>(data: *const c_char, size: c_int) -> Result<&'a [u8]> {
    let len = usize::try_from(size).map_err(|_| Error::InvalidArgument("negative length"))?;
    if len == 0 {
        return Ok(&[]);
    }
    if data.is_null() {
        return Err(Error::InvalidArgument("null buffer"));
    }
    // SAFETY: Per the contract above.
    Ok(unsafe { std::slice::from_raw_parts(data as *const u8, len) })
}

/// Views a foreign destination buffer as a mutable slice.
///
/// # Safety
///
/// If `size` is positive and `data` non-null, `data` must be valid for
/// writes of `size` bytes for `'a`, with no other live reference to it.
pub(crate) unsafe fn raw_slice_mut<'a>(data: *mut c_char, size: c_int) -> Result<&'a mut [u8]> {
    let len = usize::try_from(size).map_err(|_| Error::InvalidArgument("negative length"))?;
    if len == 0 {
        return Ok(&mut []);
    }
    if data.is_null() {
        return Err(Error::InvalidArgument("null buffer"));
    }
    // SAFETY: Per the contract above.
    Ok(unsafe { std::slice::from_raw_parts_mut(data as *mut u8, len) })
}

pub(crate) fn to_c_int(n: usize) -> c_int {
    c_int::try_from(n).unwrap_or(c_int::MAX)
}

pub(crate) fn to_c_long(n: usize) -> c_long {
    c_long::try_from(n).unwrap_or(c_long::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_slice_validation() {
        let data = *b"abc";
        // SAFETY: `data` is valid for 3 bytes.
        let ok = unsafe { raw_slice(data.as_ptr() as *const c_char, 3) };
        assert_eq!(ok.unwrap(), b"abc");

        // SAFETY: Negative lengths are rejected before any access.
        let negative = unsafe { raw_slice(data.as_ptr() as *const c_char, -1) };
        assert!(matches!(negative, Err(Error::InvalidArgument(_))));

        // SAFETY: Null buffers are rejected before any access.
        let null = unsafe { raw_slice(std::ptr::null(), 3) };
        assert!(matches!(null, Err(Error::InvalidArgument(_))));

        // SAFETY: Zero lengths never touch `data`.
        let empty = unsafe { raw_slice(std::ptr::null(), 0) };
        assert!(empty.unwrap().is_empty());
    }

    #[test]
    fn guard_converts_panics() {
        assert_eq!(guard("ok", -1, || 7), 7);
        assert_eq!(guard("boom", -1, || -> i32 { panic!("boom") }), -1);
        assert_eq!(guard("boom", -1, || -> i32 { panic!("{}", String::from("owned")) }), -1);
    }

    #[test]
    fn count_conversions_saturate() {
        assert_eq!(to_c_int(5), 5);
        assert_eq!(to_c_int(usize::MAX), c_int::MAX);
        assert_eq!(to_c_long(5), 5);
    }
}
