use crate::{
    bio::{self, Bio, BioMethod},
    ffi,
    conn::Conn,
    error::{Error, Poll, Result},
    registry::Registry,
    RECORD_SIZE,
};

use openssl_sys as sys;
use bytes::{Buf, BytesMut};

use std::{
    ffi::{c_char, c_int, c_long, c_void},
    sync::{Arc, LazyLock, Mutex, MutexGuard, OnceLock, PoisonError},
};

/// Every read adapter currently attached to a BIO, process-wide.
static READ_BIOS: LazyLock<Registry<ReadBio>> = LazyLock::new(Registry::new);

#[derive(Debug, Default)]
struct ReadBuffer {
    /// Bytes read from the connection and not yet handed to the engine.
    buf: BytesMut,
    /// The connection has reported a clean end of stream. Never reset.
    eof: bool,
}

/// Inbound adapter: holds bytes pumped from the connection by
/// [`ReadBio::read_from_conn_once`] until the engine reads them from its
/// BIO.
pub struct ReadBio {
    data: Mutex<ReadBuffer>,
    /// Serialises `read_from_conn_once`. Never taken while holding `data`.
    op: Mutex<()>,
    release_buffers: bool,
    record_size: usize,
    conn: Arc<dyn Conn>,
}

impl std::fmt::Debug for ReadBio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadBio")
            .field("pending", &self.pending())
            .field("eof", &self.is_eof())
            .field("release_buffers", &self.release_buffers)
            .field("record_size", &self.record_size)
            .finish_non_exhaustive()
    }
}

impl ReadBio {
    /// Creates an adapter reading from `conn`.
    pub fn new(conn: Arc<dyn Conn>) -> Self {
        Self {
            data: Default::default(),
            op: Default::default(),
            release_buffers: false,
            record_size: RECORD_SIZE,
            conn,
        }
    }

    /// When set, the buffer's backing storage is dropped each time it
    /// drains instead of being kept for reuse.
    pub fn with_release_buffers(mut self, release: bool) -> Self {
        self.release_buffers = release;
        self
    }

    /// Sets how much room each connection read is given. Zero is
    /// ignored.
    pub fn with_record_size(mut self, record_size: usize) -> Self {
        if record_size > 0 {
            self.record_size = record_size;
        }
        self
    }

    /// Hands buffered bytes to the engine.
    ///
    /// Copies up to `dst.len()` bytes from the front of the buffer. With
    /// nothing buffered this is [`Poll::Eof`] once the connection has
    /// ended and [`Poll::WouldBlock`] before that. Never touches the
    /// connection.
    pub fn read_request(&self, dst: &mut [u8]) -> Poll<usize> {
        let mut state = self.lock_data();
        if state.buf.is_empty() {
            return if state.eof { Poll::Eof } else { Poll::WouldBlock };
        }

        let n = dst.len().min(state.buf.len());
        state.buf.copy_to_slice(&mut dst[..n]);
        if self.release_buffers && state.buf.is_empty() {
            state.buf = BytesMut::new();
        }
        Poll::Ready(n)
    }

    /// Number of buffered bytes.
    pub fn pending(&self) -> usize {
        self.lock_data().buf.len()
    }

    /// Performs exactly one read from the connection, appending whatever
    /// it returns to the buffer.
    ///
    /// `Ok(0)` marks the end of stream. Errors are returned unchanged and
    /// leave both the buffer and the end-of-stream flag as they were.
    pub fn read_from_conn_once(&self) -> std::io::Result<usize> {
        let _op = self.op.lock().unwrap_or_else(PoisonError::into_inner);

        // Carve room for one record off the end of the buffer so the
        // connection can fill it without the data lock held.
        let mut tail = {
            let mut state = self.lock_data();
            state.buf.reserve(self.record_size);
            let len = state.buf.len();
            state.buf.split_off(len)
        };
        // `Conn::read` takes initialised memory, so the record is zeroed
        // on every call. One memset per read is accepted.
        tail.resize(self.record_size, 0);

        let result = self.conn.read(&mut tail);
        let n = match &result {
            Ok(n) => (*n).min(tail.len()),
            Err(_) => 0,
        };
        tail.truncate(n);

        let mut state = self.lock_data();
        if n > 0 {
            state.buf.unsplit(tail);
        } else if self.release_buffers && state.buf.is_empty() {
            state.buf = BytesMut::new();
        }
        if matches!(result, Ok(0)) {
            if !state.eof {
                log::debug!("connection reached end of stream");
            }
            state.eof = true;
        }

        result.map(|_| n)
    }

    /// Marks the end of stream: once the buffer drains, reads report
    /// [`Poll::Eof`].
    pub fn mark_eof(&self) {
        self.lock_data().eof = true;
    }

    /// Whether the end of stream has been seen or marked.
    pub fn is_eof(&self) -> bool {
        self.lock_data().eof
    }

    /// Creates an engine BIO backed by this adapter.
    ///
    /// The adapter is registered under a fresh token which is stored in
    /// the BIO; the engine reaches the adapter only through that token.
    pub fn make_cbio(self: &Arc<Self>) -> Result<Bio> {
        let bio = Bio::new(read_method()?)?;
        let token = READ_BIOS.add(Arc::clone(self))?;
        bio.attach(token);
        log::debug!("attached read adapter {token}");
        Ok(bio)
    }

    /// Detaches this adapter from `bio`. See
    /// [`crate::WriteBio::disconnect`].
    pub fn disconnect(&self, bio: &Bio) {
        // SAFETY: `bio` is alive for the duration of the borrow.
        unsafe { bio::detach(&READ_BIOS, bio.as_ptr(), self) };
    }

    /// Resolves the adapter attached to `b`.
    ///
    /// # Safety
    ///
    /// `b` must be null or a live BIO.
    unsafe fn load(b: *mut sys::BIO) -> Result<Arc<Self>> {
        // SAFETY: Per the contract above.
        unsafe { bio::load(&READ_BIOS, b) }.ok_or(Error::NoAdapter)
    }

    fn lock_data(&self) -> MutexGuard<'_, ReadBuffer> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_method() -> Result<&'static BioMethod> {
    static METHOD: OnceLock<Option<BioMethod>> = OnceLock::new();

    METHOD
        .get_or_init(|| {
            BioMethod::new(
                c"biobridge read BIO",
                None,
                Some(read_bio_read),
                read_bio_ctrl,
                read_bio_destroy,
            )
            .ok()
        })
        .as_ref()
        .ok_or(Error::CreateFailed)
}

unsafe extern "C" fn read_bio_read(b: *mut sys::BIO, data: *mut c_char, size: c_int) -> c_int {
    bio::guard("read_bio_read", -1, || {
        // SAFETY: The engine passes the BIO whose method this is.
        unsafe { ffi::BIO_clear_retry_flags(b) };

        // SAFETY: As above.
        let rb = match unsafe { ReadBio::load(b) } {
            Ok(rb) => rb,
            Err(e) => {
                log::debug!("read_bio_read: {e}");
                return -1;
            }
        };

        // SAFETY: The engine guarantees `data` is writable for `size`
        // bytes for the duration of this call.
        let dst = match unsafe { bio::raw_slice_mut(data, size) } {
            Ok(dst) => dst,
            Err(e) => {
                log::debug!("read_bio_read: {e}");
                return -1;
            }
        };

        if dst.is_empty() {
            let pending = rb.pending();
            if pending > 0 {
                return bio::to_c_int(pending);
            }
        }

        match rb.read_request(dst) {
            Poll::Ready(n) => bio::to_c_int(n),
            Poll::Eof => 0,
            Poll::WouldBlock => {
                // SAFETY: As above.
                unsafe { sys::BIO_set_retry_read(b) };
                -1
            }
        }
    })
}

unsafe extern "C" fn read_bio_ctrl(
    b: *mut sys::BIO,
    cmd: c_int,
    _larg: c_long,
    _parg: *mut c_void,
) -> c_long {
    bio::guard("read_bio_ctrl", -1, || match cmd {
        // SAFETY: The engine passes the BIO whose method this is.
        ffi::BIO_CTRL_PENDING => unsafe { ReadBio::load(b) }
            .map_or(0, |rb| bio::to_c_long(rb.pending())),
        // SAFETY: As above.
        ffi::BIO_CTRL_EOF => unsafe { ReadBio::load(b) }
            .map_or(0, |rb| c_long::from(rb.pending() == 0 && rb.is_eof())),
        ffi::BIO_CTRL_FLUSH | ffi::BIO_CTRL_DUP => 1,
        _ => 0,
    })
}

unsafe extern "C" fn read_bio_destroy(b: *mut sys::BIO) -> c_int {
    bio::guard("read_bio_destroy", 0, || {
        // SAFETY: The engine runs `destroy` on a live BIO just before
        // freeing it.
        unsafe { bio::release(&READ_BIOS, b) };
        1
    })
}
