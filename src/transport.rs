// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

// ============================================================================
// Transport Trait
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Serial,
    Stream,
    Memory,
}

/// Byte channel the XMODEM engine runs over.
///
/// `read_timeout` fails with `ErrorKind::TimedOut` when nothing arrived in
/// time. `close` may be called more than once.
pub trait Transport: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    fn kind(&self) -> TransportKind;

    fn close(&mut self) -> io::Result<()>;
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "read timed out")
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport closed")
}

// Some platforms refuse a zero read timeout
fn clamp(timeout: Duration) -> Duration {
    timeout.max(Duration::from_millis(1))
}

// ============================================================================
// Serial Port
// ============================================================================

/// Serial line backed by the serialport crate
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(SerialTransport { port: Some(port) })
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(not_connected)
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(buf)?;
        port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let port = self.port()?;
        port.set_timeout(clamp(timeout))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        match port.read(buf)? {
            0 => Err(timed_out()),
            n => Ok(n),
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(port) = self.port.take() {
            // The line stays open for whoever owns it next; just drop stale bytes.
            port.clear(ClearBuffer::All)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        }
        Ok(())
    }
}

// ============================================================================
// TCP Stream
// ============================================================================

pub struct TcpTransport {
    stream: TcpStream,
    closed: bool,
}

impl TcpTransport {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self::from_stream(stream))
    }

    /// Waits for a single peer on `addr`.
    pub fn accept<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let (stream, _) = listener.accept()?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        TcpTransport { stream, closed: false }
    }
}

impl Transport for TcpTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(not_connected());
        }
        self.stream.write_all(buf)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.closed {
            return Err(not_connected());
        }
        self.stream.set_read_timeout(Some(clamp(timeout)))?;
        match self.stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed connection")),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(timed_out()),
            Err(e) => Err(e),
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// In-Memory Pair
// ============================================================================

/// One end of an in-process byte pipe, see [`memory_pair`]
pub struct MemoryTransport {
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

/// Two connected transports; bytes written to one are read from the other.
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    (
        MemoryTransport { tx: Some(a_tx), rx: a_rx, pending: VecDeque::new() },
        MemoryTransport { tx: Some(b_tx), rx: b_rx, pending: VecDeque::new() },
    )
}

impl Transport for MemoryTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let tx = self.tx.as_ref().ok_or_else(not_connected)?;
        tx.send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Err(timed_out()),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer dropped"));
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn close(&mut self) -> io::Result<()> {
        self.tx = None;
        Ok(())
    }
}

// ============================================================================
// Mock Transport for Testing
// ============================================================================

#[cfg(test)]
pub struct MockTransport {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    close_count: usize,
    expect_close: bool,
}

#[cfg(test)]
impl MockTransport {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockTransport {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
            close_count: 0,
            expect_close: false,
        }
    }

    pub fn expect_close(mut self) -> Self {
        self.expect_close = true;
        self
    }
}

#[cfg(test)]
impl Transport for MockTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        // Out of responses = timeout
        if self.read_pos >= self.read_buffer.len() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Mock timeout"));
        }

        // If current response is None = timeout
        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Mock timeout"));
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                None => break,  // Stop at timeout marker
            }
        }

        Ok(bytes_read)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn close(&mut self) -> io::Result<()> {
        self.close_count += 1;
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockTransport {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockTransport dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockTransport write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );

        assert_eq!(self.close_count > 0, self.expect_close, "MockTransport close expectation not met");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pair_round_trip() {
        let (mut a, mut b) = memory_pair();
        a.write_all(b"hello").unwrap();
        a.write_all(b"!").unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(b.read_timeout(&mut buf, Duration::from_millis(50)).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(b.read_timeout(&mut buf, Duration::from_millis(50)).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(b.read_timeout(&mut buf, Duration::from_millis(50)).unwrap(), 1);
        assert_eq!(buf[0], b'!');

        let err = b.read_timeout(&mut buf, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_memory_close_is_idempotent() {
        let (mut a, mut b) = memory_pair();
        a.write_all(&[0x06]).unwrap();
        a.close().unwrap();
        a.close().unwrap();
        assert_eq!(a.write_all(&[0x06]).unwrap_err().kind(), io::ErrorKind::NotConnected);

        let mut buf = [0u8; 4];
        assert_eq!(b.read_timeout(&mut buf, Duration::from_millis(50)).unwrap(), 1);
        let err = b.read_timeout(&mut buf, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_tcp_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpTransport::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let mut server = TcpTransport::from_stream(stream);

        client.write_all(b"C").unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(server.read_timeout(&mut buf, Duration::from_secs(1)).unwrap(), 1);
        assert_eq!(buf[0], b'C');
        assert_eq!(server.kind(), TransportKind::Stream);

        server.close().unwrap();
        server.close().unwrap();
        assert_eq!(server.write_all(b"x").unwrap_err().kind(), io::ErrorKind::NotConnected);

        let err = client.read_timeout(&mut buf, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
