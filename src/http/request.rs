use std::collections::HashMap;
use std::fmt;

pub const MAX_HEADERS: usize = 100;
pub const MAX_HEADER_NAME_SIZE: usize = 256;
pub const MAX_HEADER_VALUE_SIZE: usize = 8190;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Head => write!(f, "HEAD"),
            Method::Post => write!(f, "POST"),
        }
    }
}

impl std::str::FromStr for Method {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParsingState {
    RequestLine,
    Headers,
    Body,
    ChunkedBody,
    Complete,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ChunkState {
    ReadSize,
    ReadData(usize),
    ReadTrailingCrlf,
    ReadTrailers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    IncompleteRequestLine,
    MalformedRequestLine,
    InvalidMethod,
    InvalidUtf8,
    HeaderTooLong,
    TooManyHeaders,
    InvalidHeaderName,
    InvalidHeaderValue,
    InvalidChunkSize,
    PayloadTooLarge,
}

impl ParseError {
    /// Maps a parse failure onto the HTTP status the client sees, per the
    /// propagation table in the error handling design.
    pub fn status_code(self) -> u16 {
        match self {
            ParseError::PayloadTooLarge => 413,
            ParseError::InvalidMethod => 405,
            ParseError::HeaderTooLong | ParseError::TooManyHeaders => 414,
            _ => 400,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ParseError {}

/// Finds the next `\r\n` starting at `from`, returning the index of the `\r`.
pub fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..].windows(2).position(|w| w == b"\r\n").map(|p| p + from)
}

pub fn find_subsequence(buf: &[u8], needle: &[u8]) -> Option<usize> {
    buf.windows(needle.len()).position(|w| w == needle)
}

/// Request-scoped handler pipeline state, separate from the wire-level
/// fields, so a rewrite/private handler can mutate them without touching
/// the parser's cursor bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct DispatchState {
    pub docroot_override: Option<String>,
    pub original_url: Option<String>,
    pub redirect_status: Option<u16>,
    pub username: Option<String>,
    pub reprocessing: bool,
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub path: String,
    pub query: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub trailers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub dispatch: DispatchState,

    buffer: Vec<u8>,
    cursor: usize,
    state: ParsingState,
    chunk_state: ChunkState,
    content_length: Option<usize>,
    chunked: bool,
    max_body_size: usize,
}

impl HttpRequest {
    pub fn new(max_body_size: usize) -> Self {
        Self {
            method: Method::Get,
            url: String::new(),
            path: String::new(),
            query: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            trailers: HashMap::new(),
            body: Vec::new(),
            dispatch: DispatchState::default(),
            buffer: Vec::new(),
            cursor: 0,
            state: ParsingState::RequestLine,
            chunk_state: ChunkState::ReadSize,
            content_length: None,
            chunked: false,
            max_body_size,
        }
    }

    pub fn clear(&mut self) {
        let max_body_size = self.max_body_size;
        *self = Self::new(max_body_size);
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParsingState::Complete
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn wants_keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(v) => !v.eq_ignore_ascii_case("close"),
            None => self.version == "HTTP/1.1",
        }
    }

    /// Feeds newly read bytes into the buffer and drives the state
    /// machine as far as it can go. Returns `Ok(true)` once the whole
    /// message (headers + body) is available.
    pub fn feed(&mut self, data: &[u8]) -> Result<bool, ParseError> {
        self.buffer.extend_from_slice(data);
        self.advance()
    }

    fn advance(&mut self) -> Result<bool, ParseError> {
        loop {
            match self.state {
                ParsingState::RequestLine => {
                    if !self.parse_request_line()? {
                        return Ok(false);
                    }
                }
                ParsingState::Headers => {
                    if !self.parse_headers()? {
                        return Ok(false);
                    }
                    if self.state == ParsingState::Headers {
                        return Ok(false);
                    }
                }
                ParsingState::Body => {
                    if !self.parse_fixed_body()? {
                        return Ok(false);
                    }
                }
                ParsingState::ChunkedBody => {
                    if !self.parse_chunked_body()? {
                        return Ok(false);
                    }
                }
                ParsingState::Complete => return Ok(true),
            }
        }
    }

    fn parse_request_line(&mut self) -> Result<bool, ParseError> {
        let Some(end) = find_crlf(&self.buffer, self.cursor) else {
            if self.buffer.len() - self.cursor > MAX_HEADER_NAME_SIZE + MAX_HEADER_VALUE_SIZE {
                return Err(ParseError::MalformedRequestLine);
            }
            return Ok(false);
        };
        let line = std::str::from_utf8(&self.buffer[self.cursor..end])
            .map_err(|_| ParseError::InvalidUtf8)?;
        let mut parts = line.split(' ');
        let method = parts.next().ok_or(ParseError::IncompleteRequestLine)?;
        let url = parts.next().ok_or(ParseError::IncompleteRequestLine)?;
        let version = parts.next().ok_or(ParseError::IncompleteRequestLine)?;
        if parts.next().is_some() {
            return Err(ParseError::MalformedRequestLine);
        }

        self.method = method.parse()?;
        self.url = url.to_string();
        self.version = version.to_string();
        if let Some(q) = url.find('?') {
            self.path = url[..q].to_string();
            self.query = url[q + 1..].to_string();
        } else {
            self.path = url.to_string();
        }

        self.cursor = end + 2;
        self.state = ParsingState::Headers;
        Ok(true)
    }

    /// Returns `Ok(true)` once the header block has run to completion
    /// (blank line reached) and body mode has been decided.
    fn parse_headers(&mut self) -> Result<bool, ParseError> {
        loop {
            let Some(end) = find_crlf(&self.buffer, self.cursor) else {
                if self.buffer.len() - self.cursor > MAX_HEADER_NAME_SIZE + MAX_HEADER_VALUE_SIZE {
                    return Err(ParseError::HeaderTooLong);
                }
                return Ok(false);
            };

            if end == self.cursor {
                self.cursor = end + 2;
                self.decide_body_mode();
                return Ok(true);
            }

            if self.headers.len() >= MAX_HEADERS {
                return Err(ParseError::TooManyHeaders);
            }

            let line = &self.buffer[self.cursor..end];
            let colon = line.iter().position(|&b| b == b':').ok_or(ParseError::InvalidHeaderName)?;
            if colon > MAX_HEADER_NAME_SIZE {
                return Err(ParseError::HeaderTooLong);
            }
            let name = std::str::from_utf8(&line[..colon])
                .map_err(|_| ParseError::InvalidHeaderName)?
                .trim()
                .to_ascii_lowercase();
            let value = std::str::from_utf8(&line[colon + 1..])
                .map_err(|_| ParseError::InvalidHeaderValue)?
                .trim()
                .to_string();
            if value.len() > MAX_HEADER_VALUE_SIZE {
                return Err(ParseError::HeaderTooLong);
            }

            self.insert_header(name, value);
            self.cursor = end + 2;
        }
    }

    /// Combines duplicates with a comma, except `Connection`/`Keep-Alive`
    /// which use last-wins semantics, per the codec's duplicate-header rule.
    fn insert_header(&mut self, name: String, value: String) {
        if name == "connection" || name == "keep-alive" {
            self.headers.insert(name, value);
            return;
        }
        self.headers
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    fn decide_body_mode(&mut self) {
        // Content-Length takes precedence over Transfer-Encoding when both
        // are present (resolved Open Question).
        if let Some(cl) = self.header("content-length") {
            if let Ok(n) = cl.parse::<usize>() {
                self.content_length = Some(n);
            }
        } else if let Some(te) = self.header("transfer-encoding") {
            if te.eq_ignore_ascii_case("chunked") {
                self.chunked = true;
            }
        }

        if self.content_length.unwrap_or(0) == 0 && !self.chunked {
            self.state = ParsingState::Complete;
        } else if self.chunked {
            self.state = ParsingState::ChunkedBody;
        } else {
            self.state = ParsingState::Body;
        }
    }

    fn parse_fixed_body(&mut self) -> Result<bool, ParseError> {
        let declared = self.content_length.unwrap_or(0);
        if declared > self.max_body_size {
            return Err(ParseError::PayloadTooLarge);
        }
        let available = self.buffer.len() - self.cursor;
        if available < declared {
            return Ok(false);
        }
        self.body = self.buffer[self.cursor..self.cursor + declared].to_vec();
        self.cursor += declared;
        self.state = ParsingState::Complete;
        Ok(true)
    }

    /// The entire chunked body is buffered and dechunked before dispatch,
    /// since FastCGI params need a concrete Content-Length up front.
    fn parse_chunked_body(&mut self) -> Result<bool, ParseError> {
        loop {
            match self.chunk_state {
                ChunkState::ReadSize => {
                    let Some(end) = find_crlf(&self.buffer, self.cursor) else {
                        return Ok(false);
                    };
                    let line = std::str::from_utf8(&self.buffer[self.cursor..end])
                        .map_err(|_| ParseError::InvalidUtf8)?;
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size_str, 16)
                        .map_err(|_| ParseError::InvalidChunkSize)?;
                    self.cursor = end + 2;
                    if self.body.len() + size > self.max_body_size {
                        return Err(ParseError::PayloadTooLarge);
                    }
                    if size == 0 {
                        self.chunk_state = ChunkState::ReadTrailers;
                    } else {
                        self.chunk_state = ChunkState::ReadData(size);
                    }
                }
                ChunkState::ReadData(size) => {
                    if self.buffer.len() - self.cursor < size {
                        return Ok(false);
                    }
                    self.body.extend_from_slice(&self.buffer[self.cursor..self.cursor + size]);
                    self.cursor += size;
                    self.chunk_state = ChunkState::ReadTrailingCrlf;
                }
                ChunkState::ReadTrailingCrlf => {
                    if self.buffer.len() - self.cursor < 2 {
                        return Ok(false);
                    }
                    self.cursor += 2;
                    self.chunk_state = ChunkState::ReadSize;
                }
                ChunkState::ReadTrailers => {
                    let Some(end) = find_crlf(&self.buffer, self.cursor) else {
                        return Ok(false);
                    };
                    if end == self.cursor {
                        self.cursor = end + 2;
                        self.content_length = Some(self.body.len());
                        self.state = ParsingState::Complete;
                        return Ok(true);
                    }
                    let line = &self.buffer[self.cursor..end];
                    if let Some(colon) = line.iter().position(|&b| b == b':') {
                        let name =
                            String::from_utf8_lossy(&line[..colon]).trim().to_ascii_lowercase();
                        let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
                        self.trailers.insert(name, value);
                    }
                    self.cursor = end + 2;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let mut req = HttpRequest::new(1024);
        let done = req.feed(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert!(done);
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/index.html");
    }

    #[test]
    fn splits_query_string() {
        let mut req = HttpRequest::new(1024);
        req.feed(b"GET /hello.php?x=1 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.path, "/hello.php");
        assert_eq!(req.query, "x=1");
    }

    #[test]
    fn buffers_fixed_length_body_across_feeds() {
        let mut req = HttpRequest::new(1024);
        assert!(!req
            .feed(b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel")
            .unwrap());
        assert!(req.feed(b"lo").unwrap());
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn dechunks_full_body() {
        let mut req = HttpRequest::new(1024);
        let done = req
            .feed(b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n0\r\n\r\n")
            .unwrap();
        assert!(done);
        assert_eq!(req.body, b"Wiki");
    }

    #[test]
    fn rejects_oversized_body() {
        let mut req = HttpRequest::new(4);
        let err = req
            .feed(b"POST /x HTTP/1.1\r\nContent-Length: 100\r\n\r\n")
            .unwrap_err();
        assert_eq!(err, ParseError::PayloadTooLarge);
    }

    #[test]
    fn duplicate_headers_combine_with_comma() {
        let mut req = HttpRequest::new(1024);
        req.feed(b"GET / HTTP/1.1\r\nAccept: a\r\nAccept: b\r\n\r\n").unwrap();
        assert_eq!(req.header("accept"), Some("a, b"));
    }
}
