//! Bidirectional byte-stream channel abstraction.
//!
//! Channels own their reader and writer halves so each one can be moved
//! into (or mutably borrowed by) exactly one worker thread.

use std::io::{BufReader, BufWriter, Error as IoError, Read, Write};
use std::net::TcpStream;

pub trait AbstractChannel: Send {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;

    fn read_bytes(&mut self, bytes: &mut [u8]) -> Result<(), ChannelError>;

    fn flush(&mut self) -> Result<(), ChannelError>;
}

#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error(transparent)]
    Io {
        #[from]
        source: IoError,
    },
}

pub struct Channel<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> Channel<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R: Read + Send, W: Write + Send> AbstractChannel for Channel<R, W> {
    #[inline(always)]
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    #[inline(always)]
    fn read_bytes(&mut self, bytes: &mut [u8]) -> Result<(), ChannelError> {
        self.reader.read_exact(bytes)?;
        Ok(())
    }

    #[inline(always)]
    fn flush(&mut self) -> Result<(), ChannelError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// A channel over one established TCP connection.
pub type TcpChannel = Channel<BufReader<TcpStream>, BufWriter<TcpStream>>;

impl TcpChannel {
    pub fn from_stream(stream: TcpStream) -> Result<Self, IoError> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self::new(reader, BufWriter::new(stream)))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::os::unix::net::UnixStream;

    pub type UnixChannel = Channel<BufReader<UnixStream>, BufWriter<UnixStream>>;

    /// Connected channel pair for two-party protocol tests.
    pub fn unix_pair() -> (UnixChannel, UnixChannel) {
        let (a, b) = UnixStream::pair().unwrap();
        let left = Channel::new(BufReader::new(a.try_clone().unwrap()), BufWriter::new(a));
        let right = Channel::new(BufReader::new(b.try_clone().unwrap()), BufWriter::new(b));
        (left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::unix_pair;
    use super::*;
    use std::thread;

    #[test]
    fn roundtrip_over_unix_pair() {
        let (mut left, mut right) = unix_pair();

        let handle = thread::spawn(move || {
            left.write_bytes(b"hello channel").unwrap();
            left.flush().unwrap();
            let mut reply = [0u8; 2];
            left.read_bytes(&mut reply).unwrap();
            reply
        });

        let mut buf = [0u8; 13];
        right.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"hello channel");
        right.write_bytes(b"ok").unwrap();
        right.flush().unwrap();

        assert_eq!(&handle.join().unwrap(), b"ok");
    }
}
