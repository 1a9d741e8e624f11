use crate::prelude::*;

pub const FCGI_VERSION_1: u8 = 1;

pub const FCGI_BEGIN_REQUEST: u8 = 1;
pub const FCGI_ABORT_REQUEST: u8 = 2;
pub const FCGI_END_REQUEST: u8 = 3;
pub const FCGI_PARAMS: u8 = 4;
pub const FCGI_STDIN: u8 = 5;
pub const FCGI_STDOUT: u8 = 6;
pub const FCGI_STDERR: u8 = 7;

pub const FCGI_RESPONDER: u16 = 1;

pub const FCGI_REQUEST_COMPLETE: u8 = 0;
pub const FCGI_CANT_MPX_CONN: u8 = 1;
pub const FCGI_OVERLOADED: u8 = 2;
pub const FCGI_UNKNOWN_ROLE: u8 = 3;

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    ContentTooLarge,
    Incomplete,
    BadHeader,
}

/// One FastCGI/1.0 record: 8-byte header, content, then padding aligning
/// the whole record to an 8-byte boundary. Reused across the lifetime of
/// a session rather than reallocated per read.
#[derive(Debug, Clone)]
pub struct Record {
    pub rec_type: u8,
    pub request_id: u16,
    pub content: Vec<u8>,
}

impl Record {
    pub fn new(rec_type: u8, request_id: u16, content: Vec<u8>) -> Result<Self, RecordError> {
        if content.len() > FASTCGI_MAX_RECORD_CONTENT {
            return Err(RecordError::ContentTooLarge);
        }
        Ok(Self { rec_type, request_id, content })
    }

    fn padding_len(content_len: usize) -> u8 {
        ((8 - (content_len & 7)) & 7) as u8
    }

    pub fn encode(&self) -> Vec<u8> {
        let padding = Self::padding_len(self.content.len());
        let mut out = Vec::with_capacity(HEADER_LEN + self.content.len() + padding as usize);
        out.push(FCGI_VERSION_1);
        out.push(self.rec_type);
        out.extend_from_slice(&self.request_id.to_be_bytes());
        out.extend_from_slice(&(self.content.len() as u16).to_be_bytes());
        out.push(padding);
        out.push(0);
        out.extend_from_slice(&self.content);
        out.extend(std::iter::repeat(0u8).take(padding as usize));
        out
    }

    /// Parses one record out of `buf` starting at offset 0. Returns the
    /// record and the number of bytes consumed, or `Ok(None)` if the
    /// buffer doesn't yet hold a whole record.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, RecordError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        if buf[0] != FCGI_VERSION_1 {
            return Err(RecordError::BadHeader);
        }
        let rec_type = buf[1];
        let request_id = u16::from_be_bytes([buf[2], buf[3]]);
        let content_length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        let padding_length = buf[6] as usize;
        let total = HEADER_LEN + content_length + padding_length;
        if buf.len() < total {
            return Ok(None);
        }
        let content = buf[HEADER_LEN..HEADER_LEN + content_length].to_vec();
        Ok(Some((Self { rec_type, request_id, content }, total)))
    }

    pub fn begin_request(request_id: u16) -> Self {
        let body = [
            (FCGI_RESPONDER >> 8) as u8,
            (FCGI_RESPONDER & 0xff) as u8,
            0, // flags: no FCGI_KEEP_CONN
            0, 0, 0, 0, 0,
        ];
        Self { rec_type: FCGI_BEGIN_REQUEST, request_id, content: body.to_vec() }
    }

    pub fn end_request_status(&self) -> Option<(u32, u8)> {
        if self.rec_type != FCGI_END_REQUEST || self.content.len() < 8 {
            return None;
        }
        let app_status = u32::from_be_bytes([self.content[0], self.content[1], self.content[2], self.content[3]]);
        Some((app_status, self.content[4]))
    }
}

/// Encodes one length per FastCGI's short/long-form rule: values under
/// 128 use a single byte; otherwise four bytes with the high bit of the
/// first byte set.
fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 128 {
        out.push(len as u8);
    } else {
        let len = len as u32;
        out.push(((len >> 24) as u8) | 0x80);
        out.push((len >> 16) as u8);
        out.push((len >> 8) as u8);
        out.push(len as u8);
    }
}

fn decode_length(buf: &[u8], pos: &mut usize) -> Option<usize> {
    let b0 = *buf.get(*pos)?;
    if b0 & 0x80 == 0 {
        *pos += 1;
        Some(b0 as usize)
    } else {
        let b1 = *buf.get(*pos + 1)?;
        let b2 = *buf.get(*pos + 2)?;
        let b3 = *buf.get(*pos + 3)?;
        *pos += 4;
        Some((((b0 & 0x7f) as usize) << 24) | ((b1 as usize) << 16) | ((b2 as usize) << 8) | (b3 as usize))
    }
}

/// Encodes one PARAMS name/value pair. A single pair's encoded length
/// (name+value) must not exceed the record content limit.
pub fn encode_name_value(name: &str, value: &str, out: &mut Vec<u8>) -> Result<(), RecordError> {
    if name.len() + value.len() > FASTCGI_MAX_RECORD_CONTENT {
        return Err(RecordError::ContentTooLarge);
    }
    encode_length(name.len(), out);
    encode_length(value.len(), out);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

pub fn decode_params(buf: &[u8]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut pos = 0;
    while pos < buf.len() {
        let Some(name_len) = decode_length(buf, &mut pos) else { break };
        let Some(value_len) = decode_length(buf, &mut pos) else { break };
        if pos + name_len + value_len > buf.len() {
            break;
        }
        let name = String::from_utf8_lossy(&buf[pos..pos + name_len]).to_string();
        pos += name_len;
        let value = String::from_utf8_lossy(&buf[pos..pos + value_len]).to_string();
        pos += value_len;
        out.insert(name, value);
    }
    out
}

/// Splits `content` into records of at most `FASTCGI_MAX_RECORD_CONTENT`
/// bytes each, all of type `rec_type`.
pub fn chunk_into_records(rec_type: u8, request_id: u16, content: &[u8]) -> Vec<Record> {
    if content.is_empty() {
        return vec![Record { rec_type, request_id, content: Vec::new() }];
    }
    content
        .chunks(FASTCGI_MAX_RECORD_CONTENT)
        .map(|c| Record { rec_type, request_id, content: c.to_vec() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_record() {
        let rec = Record::new(FCGI_STDOUT, 7, b"hello world".to_vec()).unwrap();
        let bytes = rec.encode();
        let (decoded, consumed) = Record::decode(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.rec_type, FCGI_STDOUT);
        assert_eq!(decoded.request_id, 7);
        assert_eq!(decoded.content, b"hello world");
    }

    #[test]
    fn padding_aligns_to_eight_bytes() {
        let rec = Record::new(FCGI_STDOUT, 1, vec![0u8; 3]).unwrap();
        let bytes = rec.encode();
        assert_eq!(bytes.len() % 8, 0);
    }

    #[test]
    fn rejects_oversized_content() {
        let err = Record::new(FCGI_STDIN, 1, vec![0u8; FASTCGI_MAX_RECORD_CONTENT + 1]).unwrap_err();
        assert_eq!(err, RecordError::ContentTooLarge);
    }

    #[test]
    fn params_round_trip() {
        let mut buf = Vec::new();
        encode_name_value("SCRIPT_FILENAME", "/var/www/x.php", &mut buf).unwrap();
        encode_name_value("REQUEST_METHOD", "GET", &mut buf).unwrap();
        let decoded = decode_params(&buf);
        assert_eq!(decoded.get("SCRIPT_FILENAME").unwrap(), "/var/www/x.php");
        assert_eq!(decoded.get("REQUEST_METHOD").unwrap(), "GET");
    }

    #[test]
    fn long_form_length_round_trips() {
        let long_value = "x".repeat(200);
        let mut buf = Vec::new();
        encode_name_value("BIG", &long_value, &mut buf).unwrap();
        let decoded = decode_params(&buf);
        assert_eq!(decoded.get("BIG").unwrap().len(), 200);
    }
}
