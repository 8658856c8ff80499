//! Incremental HTTP/1.1 response parser.
//!
//! The parser is fed growing prefixes of the receive buffer: every call to
//! [`HttpParser::incoming`] may repeat all previously seen bytes plus any
//! number of new ones, and only the new bytes are examined. Chunked transfer
//! framing is tracked as payload ranges within the fed buffer, so the body
//! can later be compacted in place with
//! [`HttpParser::collapse_chunk_headers`].
//!
//! The parser never owns the bytes. Accessors that need a body view take the
//! fed buffer as an argument.

use crate::error::HttpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    StatusLine,
    Headers,
    Body,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    Size,
    Data { remaining: usize },
    DataEnd,
    Trailer,
    Done,
}

/// Restartable HTTP/1.1 response parser.
#[derive(Debug)]
pub struct HttpParser {
    phase: Phase,
    cursor: usize,
    status_code: u16,
    headers: Vec<(String, String)>,
    body_start: usize,
    content_length: Option<usize>,
    chunked: bool,
    chunk: ChunkPhase,
    chunk_ranges: Vec<(usize, usize)>,
    body_len: usize,
    finished: bool,
}

impl Default for HttpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpParser {
    pub fn new() -> Self {
        HttpParser {
            phase: Phase::StatusLine,
            cursor: 0,
            status_code: 0,
            headers: Vec::new(),
            body_start: 0,
            content_length: None,
            chunked: false,
            chunk: ChunkPhase::Size,
            chunk_ranges: Vec::new(),
            body_len: 0,
            finished: false,
        }
    }

    /// Forget everything; ready for a fresh response.
    pub fn reset(&mut self) {
        self.phase = Phase::StatusLine;
        self.cursor = 0;
        self.status_code = 0;
        self.headers.clear();
        self.body_start = 0;
        self.content_length = None;
        self.chunked = false;
        self.chunk = ChunkPhase::Size;
        self.chunk_ranges.clear();
        self.body_len = 0;
        self.finished = false;
    }

    /// Feed the current prefix of the response. `buf` must start at the first
    /// response byte and extend at least as far as on the previous call.
    pub fn incoming(&mut self, buf: &[u8]) -> Result<(), HttpError> {
        loop {
            match self.phase {
                Phase::StatusLine => {
                    let Some((line, next)) = take_line(buf, self.cursor) else {
                        return Ok(());
                    };
                    self.parse_status_line(line)?;
                    self.cursor = next;
                    self.phase = Phase::Headers;
                }
                Phase::Headers => {
                    let Some((line, next)) = take_line(buf, self.cursor) else {
                        return Ok(());
                    };
                    self.cursor = next;
                    if line.is_empty() {
                        self.finish_headers()?;
                    } else {
                        let (name, value) = parse_header_line(line)?;
                        self.headers.push((name, value));
                    }
                }
                Phase::Body => return self.parse_body(buf),
                Phase::Done => return Ok(()),
            }
        }
    }

    fn parse_status_line(&mut self, line: &[u8]) -> Result<(), HttpError> {
        let line = std::str::from_utf8(line).map_err(|_| HttpError::Parse)?;
        if !line.starts_with("HTTP/") {
            return Err(HttpError::Parse);
        }
        let mut parts = line.split_ascii_whitespace();
        let _version = parts.next().ok_or(HttpError::Parse)?;
        let code = parts.next().ok_or(HttpError::Parse)?;
        self.status_code = code.parse().map_err(|_| HttpError::Parse)?;
        Ok(())
    }

    fn finish_headers(&mut self) -> Result<(), HttpError> {
        self.body_start = self.cursor;
        self.chunked = self
            .header("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
        if self.chunked {
            self.content_length = None;
            self.chunk = ChunkPhase::Size;
            self.phase = Phase::Body;
            return Ok(());
        }
        match self.header("content-length") {
            Some(v) => {
                let len: usize = v.trim().parse().map_err(|_| HttpError::Parse)?;
                self.content_length = Some(len);
                if len == 0 {
                    self.finished = true;
                    self.phase = Phase::Done;
                } else {
                    self.phase = Phase::Body;
                }
            }
            None => {
                // close-delimited body; completion is signalled by eof()
                self.phase = Phase::Body;
            }
        }
        Ok(())
    }

    fn parse_body(&mut self, buf: &[u8]) -> Result<(), HttpError> {
        if !self.chunked {
            self.cursor = buf.len();
            let seen = self.cursor - self.body_start;
            match self.content_length {
                Some(len) => {
                    self.body_len = seen.min(len);
                    if seen >= len {
                        self.finished = true;
                        self.phase = Phase::Done;
                    }
                }
                None => self.body_len = seen,
            }
            return Ok(());
        }

        while self.cursor < buf.len() {
            match self.chunk {
                ChunkPhase::Size => {
                    let Some((line, next)) = take_line(buf, self.cursor) else {
                        return Ok(());
                    };
                    let size = parse_chunk_size(line)?;
                    self.cursor = next;
                    self.chunk = if size == 0 {
                        ChunkPhase::Trailer
                    } else {
                        ChunkPhase::Data { remaining: size }
                    };
                }
                ChunkPhase::Data { remaining } => {
                    let take = remaining.min(buf.len() - self.cursor);
                    self.push_payload(self.cursor, self.cursor + take);
                    self.cursor += take;
                    self.body_len += take;
                    self.chunk = if take == remaining {
                        ChunkPhase::DataEnd
                    } else {
                        ChunkPhase::Data {
                            remaining: remaining - take,
                        }
                    };
                }
                ChunkPhase::DataEnd => {
                    let Some((line, next)) = take_line(buf, self.cursor) else {
                        return Ok(());
                    };
                    if !line.is_empty() {
                        return Err(HttpError::Parse);
                    }
                    self.cursor = next;
                    self.chunk = ChunkPhase::Size;
                }
                ChunkPhase::Trailer => {
                    let Some((line, next)) = take_line(buf, self.cursor) else {
                        return Ok(());
                    };
                    self.cursor = next;
                    if line.is_empty() {
                        self.chunk = ChunkPhase::Done;
                        self.finished = true;
                        self.phase = Phase::Done;
                    } else {
                        let (name, value) = parse_header_line(line)?;
                        self.headers.push((name, value));
                    }
                }
                ChunkPhase::Done => return Ok(()),
            }
        }
        Ok(())
    }

    fn push_payload(&mut self, start: usize, end: usize) {
        if let Some(last) = self.chunk_ranges.last_mut() {
            if last.1 == start {
                last.1 = end;
                return;
            }
        }
        self.chunk_ranges.push((start, end));
    }

    /// Mark a close-delimited body as complete. Only applies when the headers
    /// are done and the body carries neither a length nor chunked framing.
    pub fn eof(&mut self) {
        if self.header_finished() && !self.chunked && self.content_length.is_none() {
            self.finished = true;
            self.phase = Phase::Done;
        }
    }

    /// Whether the header section (and status line) has been fully parsed.
    pub fn header_finished(&self) -> bool {
        matches!(self.phase, Phase::Body | Phase::Done)
    }

    /// Whether the full response, body included, has been parsed.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Status code from the response line, 0 before it is parsed.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Look up a header by case-insensitive name. Trailers of a chunked
    /// response appear here too once parsed.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All headers in arrival order, names lower-cased.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Offset of the first body byte within the fed buffer.
    pub fn body_start(&self) -> usize {
        self.body_start
    }

    /// Number of body payload bytes parsed so far (chunk framing excluded).
    pub fn body_len(&self) -> usize {
        self.body_len
    }

    /// Whether the body uses chunked transfer framing.
    pub fn chunked(&self) -> bool {
        self.chunked
    }

    /// Declared content length, when the response carried one.
    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// View of the body region parsed so far, framing included for chunked
    /// bodies. Use [`collapse_chunk_headers`](Self::collapse_chunk_headers)
    /// for the payload alone.
    pub fn get_body<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        if !self.header_finished() {
            return &[];
        }
        let end = self.cursor.min(buf.len());
        &buf[self.body_start.min(end)..end]
    }

    /// Rewrite the fed buffer in place so the body payload is contiguous at
    /// [`body_start`](Self::body_start), and return the tightened view.
    /// For unframed bodies this just trims to the declared length.
    pub fn collapse_chunk_headers<'a>(&self, buf: &'a mut [u8]) -> &'a [u8] {
        if !self.header_finished() {
            return &[];
        }
        if !self.chunked {
            let end = (self.body_start + self.body_len).min(buf.len());
            return &buf[self.body_start.min(end)..end];
        }
        let mut write = self.body_start;
        for &(start, end) in &self.chunk_ranges {
            let end = end.min(buf.len());
            if start >= end {
                continue;
            }
            buf.copy_within(start..end, write);
            write += end - start;
        }
        &buf[self.body_start..write]
    }
}

/// Take one line starting at `from`, accepting both CRLF and bare LF.
/// Returns the line without its terminator and the offset just past it.
fn take_line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
    let rel = buf.get(from..)?.iter().position(|&b| b == b'\n')?;
    let end = from + rel;
    let line = if end > from && buf[end - 1] == b'\r' {
        &buf[from..end - 1]
    } else {
        &buf[from..end]
    };
    Some((line, end + 1))
}

fn parse_header_line(line: &[u8]) -> Result<(String, String), HttpError> {
    let line = std::str::from_utf8(line).map_err(|_| HttpError::Parse)?;
    let (name, value) = line.split_once(':').ok_or(HttpError::Parse)?;
    Ok((
        name.trim().to_ascii_lowercase(),
        value.trim().to_string(),
    ))
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, HttpError> {
    let line = std::str::from_utf8(line).map_err(|_| HttpError::Parse)?;
    // chunk extensions (";key=value") are ignored
    let hex = line.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(hex, 16).map_err(|_| HttpError::Parse)
}
