use crate::{
    bio::{to_c_int, Bio},
    error::Error,
};

use openssl_sys as sys;

use std::{
    ffi::{c_int, c_void},
    io::{Read, Write},
    marker::PhantomData,
    ptr::NonNull,
};

/// Unbuffered [`Read`]/[`Write`] over any engine BIO that already behaves
/// like a blocking stream.
///
/// Every call goes straight to [`sys::BIO_read`] or [`sys::BIO_write`].
/// There is no retry handling: a BIO signalling "retry" reads as end of
/// stream and writes as a short write.
#[derive(Debug)]
pub struct BioStream<'a> {
    bio: NonNull<sys::BIO>,
    _bio: PhantomData<&'a Bio>,
}

impl BioStream<'_> {
    /// Wraps a raw BIO.
    ///
    /// # Safety
    ///
    /// `bio` must stay live for the lifetime of the stream.
    pub unsafe fn from_ptr(bio: NonNull<sys::BIO>) -> Self {
        Self {
            bio,
            _bio: PhantomData,
        }
    }
}

impl<'a> From<&'a Bio> for BioStream<'a> {
    fn from(bio: &'a Bio) -> Self {
        Self {
            bio: bio.as_non_null(),
            _bio: PhantomData,
        }
    }
}

impl Read for BioStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // SAFETY: `self.bio` is live for `'a`, and `buf` is valid for
        // writes of at least `to_c_int(buf.len())` bytes.
        let n = unsafe {
            sys::BIO_read(
                self.bio.as_ptr(),
                buf.as_mut_ptr() as *mut c_void,
                to_c_int(buf.len()),
            )
        };
        // Anything non-positive, including errors, is end of stream.
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

impl Write for BioStream<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let len = to_c_int(buf.len());
        // SAFETY: `self.bio` is live for `'a`, and `buf` is valid for
        // reads of at least `len` bytes.
        let n = unsafe { sys::BIO_write(self.bio.as_ptr(), buf.as_ptr() as *const c_void, len) };
        if n != len {
            return Err(Error::ShortWrite {
                written: usize::try_from(n).unwrap_or(0),
                expected: len as usize,
            }
            .into());
        }
        Ok(len as usize)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
