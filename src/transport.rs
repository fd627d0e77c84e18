//! Optional pump between a [`Connection`] and a byte-stream transport.

use std::io::{self, Read, Write};

use tracing::{debug, trace};

use crate::connection::Connection;

/// Outcome of one [`pump`] round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    /// Bytes were read and processed.
    Progress,
    /// The transport had nothing to read.
    WouldBlock,
    /// The transport reached EOF; the connection is now closed.
    Eof,
    /// The connection is closed and its last frames were written.
    Closed,
}

/// One read, process and write-out round.
///
/// Queued frames are written before reading so that a fresh connection sends
/// its preface first. Writes go out with `write_all`, so the transport should
/// block on writes even when reads are non-blocking.
pub fn pump<T: Read + Write>(conn: &mut Connection, io: &mut T, scratch: &mut [u8]) -> io::Result<Pump> {
    flush(conn, io)?;
    if conn.is_closed() {
        return Ok(Pump::Closed);
    }

    let n = match io.read(scratch) {
        Ok(0) => {
            conn.transport_closed();
            return Ok(Pump::Eof);
        }
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Pump::WouldBlock),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Pump::Progress),
        Err(e) => {
            conn.transport_closed();
            return Err(e);
        }
    };
    trace!(bytes = n, "read from transport");

    if let Err(err) = conn.recv(&scratch[..n]) {
        debug!(%err, "connection failed");
    }
    flush(conn, io)?;
    if conn.is_closed() {
        Ok(Pump::Closed)
    } else {
        Ok(Pump::Progress)
    }
}

fn flush<T: Write>(conn: &mut Connection, io: &mut T) -> io::Result<()> {
    if !conn.has_pending_send() {
        return Ok(());
    }
    let out = conn.take_pending_send();
    trace!(bytes = out.len(), "write to transport");
    io.write_all(&out)?;
    io.flush()
}
