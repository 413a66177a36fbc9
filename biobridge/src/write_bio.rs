use crate::{
    bio::{self, Bio, BioMethod},
    ffi,
    conn::Conn,
    error::{Error, Result},
    registry::Registry,
};

use openssl_sys as sys;
use bytes::{Buf, BytesMut};

use std::{
    ffi::{c_char, c_int, c_long, c_void},
    sync::{Arc, LazyLock, Mutex, MutexGuard, OnceLock, PoisonError},
};

/// Every write adapter currently attached to a BIO, process-wide.
static WRITE_BIOS: LazyLock<Registry<WriteBio>> = LazyLock::new(Registry::new);

#[derive(Debug, Default)]
struct WriteBuffer {
    /// Bytes waiting to be written, oldest first.
    buf: BytesMut,
    /// Bytes taken out of `buf` by a flush that is still writing them.
    in_flight: usize,
}

/// Outbound adapter: collects what the engine writes into its BIO and
/// pushes it to the connection when [`WriteBio::flush`] is driven.
pub struct WriteBio {
    data: Mutex<WriteBuffer>,
    /// Serialises `flush`. Never taken while holding `data`.
    op: Mutex<()>,
    release_buffers: bool,
    conn: Arc<dyn Conn>,
}

impl std::fmt::Debug for WriteBio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBio")
            .field("pending", &self.pending())
            .field("release_buffers", &self.release_buffers)
            .finish_non_exhaustive()
    }
}

impl WriteBio {
    /// Creates an adapter writing to `conn`.
    pub fn new(conn: Arc<dyn Conn>) -> Self {
        Self {
            data: Default::default(),
            op: Default::default(),
            release_buffers: false,
            conn,
        }
    }

    /// When set, the buffer's backing storage is dropped each time it
    /// drains instead of being kept for reuse.
    pub fn with_release_buffers(mut self, release: bool) -> Self {
        self.release_buffers = release;
        self
    }

    /// Queues `data` for the next [`Self::flush`].
    pub fn append(&self, data: &[u8]) {
        self.lock_data().buf.extend_from_slice(data);
    }

    /// Number of bytes not yet written to the connection, including any
    /// a running flush is still writing.
    pub fn pending(&self) -> usize {
        let state = self.lock_data();
        state.buf.len() + state.in_flight
    }

    /// Makes one attempt to write everything queued to the connection.
    ///
    /// Returns the number of bytes the connection accepted. Whatever it
    /// did not accept stays at the front of the queue, ahead of anything
    /// appended meanwhile. Errors from the connection are returned as is;
    /// scheduling a retry is up to the caller.
    pub fn flush(&self) -> std::io::Result<usize> {
        let _op = self.op.lock().unwrap_or_else(PoisonError::into_inner);

        let mut out = {
            let mut state = self.lock_data();
            if state.buf.is_empty() {
                return Ok(0);
            }
            let out = std::mem::take(&mut state.buf);
            state.in_flight = out.len();
            out
        };

        let result = self.conn.write(&out);
        let written = match &result {
            Ok(n) => (*n).min(out.len()),
            Err(_) => 0,
        };

        let mut state = self.lock_data();
        out.advance(written);
        let appended = std::mem::take(&mut state.buf);
        if !appended.is_empty() {
            out.unsplit(appended);
        }
        state.buf = out;
        state.in_flight = 0;
        if self.release_buffers && state.buf.is_empty() {
            state.buf = BytesMut::new();
        }

        result.map(|_| written)
    }

    /// Creates an engine BIO backed by this adapter.
    ///
    /// The adapter is registered under a fresh token which is stored in
    /// the BIO; the engine reaches the adapter only through that token.
    pub fn make_cbio(self: &Arc<Self>) -> Result<Bio> {
        let bio = Bio::new(write_method()?)?;
        let token = WRITE_BIOS.add(Arc::clone(self))?;
        bio.attach(token);
        log::debug!("attached write adapter {token}");
        Ok(bio)
    }

    /// Detaches this adapter from `bio`: its registry entry is removed and
    /// the BIO's data is cleared, so later engine calls on `bio` fail
    /// with "no adapter". Calling it again, or on a BIO this adapter is
    /// not attached to, does nothing.
    pub fn disconnect(&self, bio: &Bio) {
        // SAFETY: `bio` is alive for the duration of the borrow.
        unsafe { bio::detach(&WRITE_BIOS, bio.as_ptr(), self) };
    }

    /// Resolves the adapter attached to `b`.
    ///
    /// # Safety
    ///
    /// `b` must be null or a live BIO.
    unsafe fn load(b: *mut sys::BIO) -> Result<Arc<Self>> {
        // SAFETY: Per the contract above.
        unsafe { bio::load(&WRITE_BIOS, b) }.ok_or(Error::NoAdapter)
    }

    fn lock_data(&self) -> MutexGuard<'_, WriteBuffer> {
        // The buffer is only ever mutated by single, complete calls, so
        // a panic elsewhere cannot leave it torn.
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_method() -> Result<&'static BioMethod> {
    static METHOD: OnceLock<Option<BioMethod>> = OnceLock::new();

    METHOD
        .get_or_init(|| {
            BioMethod::new(
                c"biobridge write BIO",
                Some(write_bio_write),
                None,
                write_bio_ctrl,
                write_bio_destroy,
            )
            .ok()
        })
        .as_ref()
        .ok_or(Error::CreateFailed)
}

unsafe extern "C" fn write_bio_write(b: *mut sys::BIO, data: *const c_char, size: c_int) -> c_int {
    bio::guard("write_bio_write", -1, || {
        // SAFETY: The engine passes the BIO whose method this is.
        unsafe { ffi::BIO_clear_retry_flags(b) };

        // SAFETY: As above.
        let wb = match unsafe { WriteBio::load(b) } {
            Ok(wb) => wb,
            Err(e) => {
                log::debug!("write_bio_write: {e}");
                return -1;
            }
        };

        // SAFETY: The engine guarantees `data` is readable for `size`
        // bytes for the duration of this call.
        match unsafe { bio::raw_slice(data, size) } {
            Ok(src) => {
                wb.append(src);
                size
            }
            Err(e) => {
                log::debug!("write_bio_write: {e}");
                -1
            }
        }
    })
}

unsafe extern "C" fn write_bio_ctrl(
    b: *mut sys::BIO,
    cmd: c_int,
    _larg: c_long,
    _parg: *mut c_void,
) -> c_long {
    bio::guard("write_bio_ctrl", -1, || match cmd {
        // SAFETY: The engine passes the BIO whose method this is.
        ffi::BIO_CTRL_WPENDING => unsafe { WriteBio::load(b) }
            .map_or(0, |wb| bio::to_c_long(wb.pending())),
        // SAFETY: As above.
        ffi::BIO_CTRL_FLUSH => match unsafe { WriteBio::load(b) } {
            Ok(wb) => match wb.flush() {
                Ok(n) => bio::to_c_long(n),
                Err(e) => {
                    log::debug!("write_bio_ctrl: flush: {e}");
                    0
                }
            },
            Err(_) => 0,
        },
        ffi::BIO_CTRL_DUP => 1,
        _ => 0,
    })
}

unsafe extern "C" fn write_bio_destroy(b: *mut sys::BIO) -> c_int {
    bio::guard("write_bio_destroy", 0, || {
        // SAFETY: The engine runs `destroy` on a live BIO just before
        // freeing it.
        unsafe { bio::release(&WRITE_BIOS, b) };
        1
    })
}
