use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

const READ_CHUNK: usize = 512;

/// One client link as seen by the slot table and the server loop.
///
/// Every method must return immediately; "no data yet" is reported, never
/// waited for.
pub trait Connection {
    /// False once the peer has closed or the link has failed.
    fn is_alive(&mut self) -> bool;

    /// True when inbound bytes are waiting to be read.
    fn has_pending(&mut self) -> bool;

    /// Appends the bytes currently readable to `buf`, at most `limit` of
    /// them, and returns how many were appended.
    fn read_available(&mut self, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize>;

    /// Writes the whole of `data` or fails. A send buffer that is full is
    /// reported as `WouldBlock`, never waited on.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    fn close(&mut self);

    fn peer(&self) -> &str;
}

/// Source of inbound connections.
pub trait Acceptor {
    type Conn: Connection;

    /// Returns the next pending connection, or `None` when nobody is waiting.
    fn poll_accept(&mut self) -> io::Result<Option<Self::Conn>>;
}

/// Non-blocking `TcpStream` wrapper.
pub struct TcpConnection {
    stream: Option<TcpStream>,
    peer: String,
}

impl TcpConnection {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = match stream.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => String::from("unknown"),
        };
        Ok(TcpConnection { stream: Some(stream), peer })
    }

    fn peek(&self) -> io::Result<usize> {
        match &self.stream {
            Some(stream) => {
                let mut byte = [0u8; 1];
                stream.peek(&mut byte)
            }
            None => Err(io::Error::from(ErrorKind::NotConnected)),
        }
    }
}

impl Connection for TcpConnection {
    fn is_alive(&mut self) -> bool {
        match self.peek() {
            // orderly shutdown from the peer
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted),
        }
    }

    fn has_pending(&mut self) -> bool {
        matches!(self.peek(), Ok(n) if n > 0)
    }

    fn read_available(&mut self, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::Error::from(ErrorKind::NotConnected));
        };

        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        while total < limit {
            let want = READ_CHUNK.min(limit - total);
            match stream.read(&mut chunk[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::Error::from(ErrorKind::NotConnected));
        };

        let mut written = 0;
        while written < data.len() {
            match stream.write(&data[written..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

/// Non-blocking `TcpListener` wrapper.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Self::from_listener(listener)
    }

    pub fn from_listener(listener: TcpListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(TcpAcceptor { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Acceptor for TcpAcceptor {
    type Conn = TcpConnection;

    fn poll_accept(&mut self) -> io::Result<Option<TcpConnection>> {
        match self.listener.accept() {
            Ok((stream, _)) => TcpConnection::new(stream).map(Some),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}
