use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq)]
pub enum Error {
    Chunks(ChunksError),
    InvalidPayload,
}

/// Reads server-sent event payloads out of a chunk stream.
///
/// Only `data` fields are understood. Comment lines (starting with `:`) are
/// skipped, and multiple `data` lines in one event are joined by newlines.
pub struct Sse {
    // Raw bytes, since a chunk boundary may split a UTF-8 sequence.
    buf: Vec<u8>,
    chunks: Chunks,
    exhausted: bool,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            chunks,
            exhausted: false,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            if let Some(event) = self.try_parse_event()? {
                return Ok(Some(event));
            }
            if self.exhausted {
                return Ok(None);
            }
            match self.chunks.next_chunk().await.map_err(Error::Chunks)? {
                Some(bytes) => self.buf.extend_from_slice(&bytes),
                None => self.exhausted = true,
            }
        }
    }

    fn try_parse_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            let Some(end) = self.buf.windows(2).position(|w| w == b"\n\n")
            else {
                return Ok(None);
            };
            let block: Vec<u8> = self.buf.drain(..end + 2).collect();
            let Ok(block) = str::from_utf8(&block[..end]) else {
                return Err(Error::InvalidPayload);
            };

            let mut data: Option<String> = None;
            for line in block.lines() {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let (field, value) = line.split_once(':').unwrap_or((line, ""));
                if field != "data" {
                    // Other fields are not supported.
                    return Err(Error::InvalidPayload);
                }
                let value = value.strip_prefix(' ').unwrap_or(value);
                match &mut data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                }
            }

            // A block of comments only carries no event, so keep looking.
            if let Some(data) = data {
                return Ok(Some(data));
            }
        }
    }
}
