//! Moving window over caller-owned bytes

use super::{MkvReader, Status, StreamLength};
use crate::error::{Error, Result};

/// A read-only view of the stream bytes `[bytes_consumed, bytes_consumed + len)`.
///
/// The window never copies or owns data. The caller owns the buffer and
/// discards its front once the parser reports those bytes as consumed, then
/// hands the remainder back with the new consumed count.
#[derive(Debug, Clone)]
pub struct ByteWindow<'a> {
    buf: &'a [u8],
    bytes_consumed: u64,
    end_of_segment: Option<u64>,
}

impl<'a> ByteWindow<'a> {
    /// Window over `buf`, whose first byte sits at stream offset `bytes_consumed`
    pub fn new(buf: &'a [u8], bytes_consumed: u64) -> Result<Self> {
        let mut window = ByteWindow {
            buf: &[],
            bytes_consumed: 0,
            end_of_segment: None,
        };
        window.set_window(buf, bytes_consumed)?;
        Ok(window)
    }

    /// Replace the visible bytes; the end position is kept
    pub fn set_window(&mut self, buf: &'a [u8], bytes_consumed: u64) -> Result<()> {
        if buf.is_empty() {
            return Err(Error::invalid_input("byte window must not be empty"));
        }
        self.buf = buf;
        self.bytes_consumed = bytes_consumed;
        Ok(())
    }

    /// Record where the stream ends. Only the first value sticks.
    pub fn set_end_of_segment_position(&mut self, position: u64) -> Result<()> {
        set_end_position(&mut self.end_of_segment, position)
    }

    pub fn end_of_segment_position(&self) -> Option<u64> {
        self.end_of_segment
    }

    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    pub fn window_len(&self) -> usize {
        self.buf.len()
    }

    pub fn as_slice(&self) -> &'a [u8] {
        self.buf
    }
}

/// Set-once end position shared by the window and the parser.
///
/// Setting the value it already holds succeeds; a different value fails
/// and leaves the first one in place.
pub(crate) fn set_end_position(slot: &mut Option<u64>, position: u64) -> Result<()> {
    match *slot {
        Some(existing) if existing == position => Ok(()),
        Some(existing) => Err(Error::invalid_state(format!(
            "end position already set to {}, refusing {}",
            existing, position
        ))),
        None if position == 0 => Err(Error::invalid_input("end position must be positive")),
        None => {
            *slot = Some(position);
            Ok(())
        }
    }
}

impl MkvReader for ByteWindow<'_> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<Status<()>> {
        let window_pos = offset.checked_sub(self.bytes_consumed).ok_or_else(|| {
            Error::invalid_input(format!(
                "read at offset {} precedes window start {}",
                offset, self.bytes_consumed
            ))
        })?;
        let available = (self.buf.len() as u64).saturating_sub(window_pos);
        if available < buf.len() as u64 {
            return Ok(Status::NeedMoreData);
        }
        let start = window_pos as usize;
        buf.copy_from_slice(&self.buf[start..start + buf.len()]);
        Ok(Status::Ready(()))
    }

    fn length(&self) -> StreamLength {
        StreamLength {
            total: self.end_of_segment,
            available: self.bytes_consumed + self.buf.len() as u64,
        }
    }
}
