use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct StreamTimeouts {
    pub read: Duration,
    pub write: Duration,
    pub connect: Duration,
}

impl Default for StreamTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_millis(100),
            write: Duration::from_millis(100),
            connect: Duration::from_millis(100),
        }
    }
}

/// TCP link to a serial/SPI bus adapter. Connects on first use and
/// reconnects once when the peer drops the connection mid-transfer.
pub struct LazyTcpStream {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    max_retries: u32,
    timeouts: StreamTimeouts,
}

fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

impl LazyTcpStream {
    pub fn new(addr: SocketAddr, max_retries: u32, timeouts: StreamTimeouts) -> Self {
        Self {
            addr,
            stream: None,
            max_retries,
            timeouts,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn connect(&mut self) -> io::Result<()> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match TcpStream::connect_timeout(&self.addr, self.timeouts.connect) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeouts.read))?;
                    stream.set_write_timeout(Some(self.timeouts.write))?;
                    stream.set_nodelay(true)?;
                    debug!("Connected to bus adapter at {}", self.addr);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    debug!(
                        "Connection attempt {} to {} failed: {}",
                        attempt + 1,
                        self.addr,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "Max connection retries reached")
        }))
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        if self.stream.is_none() {
            self.connect()?;
        }
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "Not connected"))
    }

    pub fn reconnect(&mut self) -> io::Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        warn!("Reconnecting to bus adapter at {}", self.addr);
        self.connect()
    }

    fn with_reconnect<R>(
        &mut self,
        mut op: impl FnMut(&mut TcpStream) -> io::Result<R>,
    ) -> io::Result<R> {
        match op(self.stream()?) {
            Err(e) if is_disconnect(e.kind()) => {
                self.reconnect()?;
                op(self.stream()?)
            }
            result => result,
        }
    }
}

impl Read for LazyTcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.with_reconnect(|stream| stream.read(buf))
    }
}

impl Write for LazyTcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_reconnect(|stream| stream.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_reconnect(|stream| stream.flush())
    }
}
