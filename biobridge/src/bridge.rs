use crate::{
    bio::Bio,
    conn::Conn,
    error::Result,
    read_bio::ReadBio,
    stream::BioStream,
    write_bio::WriteBio,
    RECORD_SIZE,
};

use openssl_sys as sys;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Stores the options a [`Bridge`] builds its adapters with.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Drop adapter buffers' backing storage whenever they drain, trading
    /// reallocation for a smaller idle footprint.
    pub release_buffers: bool,
    /// Room given to each connection read. Defaults to [`RECORD_SIZE`];
    /// zero is ignored.
    pub record_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            release_buffers: false,
            record_size: RECORD_SIZE,
        }
    }
}

impl BridgeConfig {
    /// Creates a default [`Self`].
    pub fn new() -> Self {
        Self::default()
    }

    /// When `cond` is True call `func` on `Self`
    pub fn when<F>(self, cond: bool, func: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        if cond {
            func(self)
        } else {
            self
        }
    }

    /// When `maybe` is Some(_) call `func` on `Self` and the contained value
    pub fn when_some<F, T>(self, maybe: Option<T>, func: F) -> Self
    where
        F: FnOnce(Self, T) -> Self,
    {
        if let Some(t) = maybe {
            func(self, t)
        } else {
            self
        }
    }

    /// Sets [`Self::release_buffers`]
    pub fn with_release_buffers(mut self, release: bool) -> Self {
        self.release_buffers = release;
        self
    }

    /// Sets [`Self::record_size`]
    pub fn with_record_size(mut self, record_size: usize) -> Self {
        self.record_size = record_size;
        self
    }
}

/// Owns one logical stream: a connection, the read and write adapters
/// sharing it, and the engine BIOs backed by them.
///
/// The owner drives the I/O: [`Self::pump_read`] when the connection is
/// readable and the engine wants more input, [`Self::flush`] or
/// [`Self::flush_all`] when the engine has written output.
#[derive(Debug)]
pub struct Bridge {
    reader: Arc<ReadBio>,
    writer: Arc<WriteBio>,
    read_bio: Bio,
    write_bio: Bio,
    closed: AtomicBool,
}

impl Bridge {
    /// Builds both adapters over `conn` and a BIO for each.
    pub fn new(conn: Arc<dyn Conn>, config: BridgeConfig) -> Result<Self> {
        let reader = Arc::new(
            ReadBio::new(Arc::clone(&conn))
                .with_release_buffers(config.release_buffers)
                .with_record_size(config.record_size),
        );
        let writer = Arc::new(WriteBio::new(conn).with_release_buffers(config.release_buffers));

        let read_bio = reader.make_cbio()?;
        let write_bio = writer.make_cbio()?;

        Ok(Self {
            reader,
            writer,
            read_bio,
            write_bio,
            closed: AtomicBool::new(false),
        })
    }

    /// The BIO the engine reads its input from.
    pub fn read_bio(&self) -> *mut sys::BIO {
        self.read_bio.as_ptr()
    }

    /// The BIO the engine writes its output to.
    pub fn write_bio(&self) -> *mut sys::BIO {
        self.write_bio.as_ptr()
    }

    /// An unbuffered stream over [`Self::read_bio`]. A read of 0 bytes is
    /// either the end of stream or a request to [pump](Self::pump_read)
    /// more input; [`ReadBio::is_eof`] tells which.
    pub fn read_stream(&self) -> BioStream<'_> {
        BioStream::from(&self.read_bio)
    }

    /// An unbuffered stream over [`Self::write_bio`].
    pub fn write_stream(&self) -> BioStream<'_> {
        BioStream::from(&self.write_bio)
    }

    /// The inbound adapter.
    pub fn reader(&self) -> &Arc<ReadBio> {
        &self.reader
    }

    /// The outbound adapter.
    pub fn writer(&self) -> &Arc<WriteBio> {
        &self.writer
    }

    /// Reads once from the connection into the inbound adapter. See
    /// [`ReadBio::read_from_conn_once`].
    pub fn pump_read(&self) -> std::io::Result<usize> {
        self.reader.read_from_conn_once()
    }

    /// Writes once from the outbound adapter to the connection. See
    /// [`WriteBio::flush`].
    pub fn flush(&self) -> std::io::Result<usize> {
        self.writer.flush()
    }

    /// Flushes until nothing is pending, returning the total written.
    ///
    /// `Interrupted` is retried. A connection that accepts nothing fails
    /// with `WriteZero`; any other error, `WouldBlock` included, is
    /// returned so the caller can try again once the connection is
    /// writable. Bytes written before an error stay written.
    pub fn flush_all(&self) -> std::io::Result<usize> {
        let mut total = 0;
        while self.writer.pending() > 0 {
            match self.writer.flush() {
                Ok(0) if self.writer.pending() > 0 => {
                    return Err(std::io::ErrorKind::WriteZero.into());
                }
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Detaches both adapters from their BIOs. Later engine calls on
    /// either BIO fail cleanly. Only the first call has any effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.reader.disconnect(&self.read_bio);
        self.writer.disconnect(&self.write_bio);
        log::debug!("bridge closed");
    }

    /// Whether [`Self::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.close();
    }
}
