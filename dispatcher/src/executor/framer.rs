//! Bounded line framing
//!
//! Readline over any async byte stream with a per-line byte cap. The cap
//! counts the raw line including its terminator; a line that exceeds it is
//! discarded up to the next terminator and reported as [`FramerError::LineTooLong`],
//! after which the stream keeps going.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

#[derive(Debug, Error)]
pub enum FramerError {
    #[error("line exceeded the maximum size of {0} bytes")]
    LineTooLong(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct LineFramer<R> {
    reader: BufReader<R>,
    max_size: usize,
}

impl<R: AsyncRead + Unpin> LineFramer<R> {
    pub fn new(stream: R, max_size: usize) -> Self {
        Self {
            reader: BufReader::new(stream),
            max_size,
        }
    }

    /// Read one line, without its terminator. `Ok(None)` signals end of
    /// stream; a final unterminated line is still returned.
    pub async fn next_line(&mut self) -> Result<Option<String>, FramerError> {
        let mut line: Vec<u8> = Vec::new();
        loop {
            let buffer = self.reader.fill_buf().await?;
            if buffer.is_empty() {
                if line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            match buffer.iter().position(|&byte| byte == b'\n') {
                Some(position) => {
                    if line.len() + position + 1 > self.max_size {
                        self.reader.consume(position + 1);
                        return Err(FramerError::LineTooLong(self.max_size));
                    }
                    line.extend_from_slice(&buffer[..position]);
                    self.reader.consume(position + 1);
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                None => {
                    let chunk = buffer.len();
                    if line.len() + chunk > self.max_size {
                        self.reader.consume(chunk);
                        self.discard_rest_of_line().await?;
                        return Err(FramerError::LineTooLong(self.max_size));
                    }
                    line.extend_from_slice(buffer);
                    self.reader.consume(chunk);
                }
            }
        }
    }

    /// Skip input until the next terminator or end of stream.
    async fn discard_rest_of_line(&mut self) -> Result<(), std::io::Error> {
        loop {
            let buffer = self.reader.fill_buf().await?;
            if buffer.is_empty() {
                return Ok(());
            }
            match buffer.iter().position(|&byte| byte == b'\n') {
                Some(position) => {
                    self.reader.consume(position + 1);
                    return Ok(());
                }
                None => {
                    let chunk = buffer.len();
                    self.reader.consume(chunk);
                }
            }
        }
    }
}
