use std::io::{Read, Write};

/// The connection an adapter pair moves bytes over.
///
/// Both methods take `&self` since the read and the write adapter of a
/// stream share one connection and may drive it from different threads.
/// Semantics follow [`std::io::Read::read`] and
/// [`std::io::Write::write`]: `Ok(0)` from `read` is a clean end of
/// stream, and a non-blocking transport reports
/// [`std::io::ErrorKind::WouldBlock`] as an error.
pub trait Conn: Send + Sync {
    /// Reads into `buf`, returning the number of bytes read.
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Writes from `buf`, returning the number of bytes accepted.
    fn write(&self, buf: &[u8]) -> std::io::Result<usize>;
}

impl Conn for std::net::TcpStream {
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        Read::read(&mut &*self, buf)
    }

    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        Write::write(&mut &*self, buf)
    }
}

#[cfg(unix)]
impl Conn for std::os::unix::net::UnixStream {
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        Read::read(&mut &*self, buf)
    }

    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        Write::write(&mut &*self, buf)
    }
}
