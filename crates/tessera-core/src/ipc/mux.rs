//! Channel multiplexing over one byte stream.
//!
//! The agent sends replies, user output and input requests on a single
//! stream. Each frame is `[channel u8][len u32 LE][payload]`.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    /// Protocol responses.
    Reply = 0,
    Stdout = 1,
    Stderr = 2,
    /// The agent wants a line of user input.
    Input = 3,
}

impl Channel {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Channel::Reply),
            1 => Some(Channel::Stdout),
            2 => Some(Channel::Stderr),
            3 => Some(Channel::Input),
            _ => None,
        }
    }
}

/// Write one frame.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, channel: Channel, payload: &[u8]) -> io::Result<()> {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(channel as u8);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    writer.flush()
}

/// Read one frame; `Ok(None)` on end of stream at a frame boundary.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Option<(Channel, Vec<u8>)>> {
    let mut header = [0u8; 5];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(Error::Ipc("stream ended inside a frame header".into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Ipc(format!("Failed to read frame header: {e}"))),
        }
    }
    let channel = Channel::from_tag(header[0])
        .ok_or_else(|| Error::Ipc(format!("unknown channel tag {}", header[0])))?;
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Ipc(format!("frame too large: {len} bytes")));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|e| Error::Ipc(format!("Failed to read frame payload: {e}")))?;
    Ok(Some((channel, payload)))
}

/// Sending half of a multiplexed stream, shared by channel writers.
pub type MuxSink = Arc<Mutex<Box<dyn Write + Send>>>;

/// [`Write`] adapter that frames every write on one channel.
#[derive(Clone)]
pub struct ChannelWriter {
    sink: MuxSink,
    channel: Channel,
}

impl ChannelWriter {
    pub fn new(sink: MuxSink, channel: Channel) -> Self {
        Self { sink, channel }
    }

    /// Send an empty frame, e.g. an input request.
    pub fn signal(&self) -> io::Result<()> {
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| io::Error::other("mux sink lock poisoned"))?;
        write_frame(&mut **sink, self.channel, &[])
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| io::Error::other("mux sink lock poisoned"))?;
        write_frame(&mut **sink, self.channel, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frames_keep_channel_and_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, Channel::Stdout, b"hi").unwrap();
        write_frame(&mut buf, Channel::Reply, b"").unwrap();
        write_frame(&mut buf, Channel::Stderr, b"oops").unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), Some((Channel::Stdout, b"hi".to_vec())));
        assert_eq!(read_frame(&mut cursor).unwrap(), Some((Channel::Reply, Vec::new())));
        assert_eq!(read_frame(&mut cursor).unwrap(), Some((Channel::Stderr, b"oops".to_vec())));
        assert_eq!(read_frame(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_unknown_tag() {
        let mut cursor = Cursor::new(vec![9, 0, 0, 0, 0]);
        assert!(read_frame(&mut cursor).is_err());
    }
}
