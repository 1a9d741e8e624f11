use crate::prelude::*;

/// A response body is either empty, fully buffered, or a file handle to be
/// streamed — never more than one at a time.
#[derive(Debug)]
pub enum ResponseBody {
    Empty,
    Buffered(Vec<u8>),
    File(File, u64),
}

impl ResponseBody {
    pub fn len(&self) -> u64 {
        match self {
            ResponseBody::Empty => 0,
            ResponseBody::Buffered(v) => v.len() as u64,
            ResponseBody::File(_, len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const NO_BODY_STATUSES: [u16; 5] = [100, 101, 204, 205, 304];

/// Well-known headers are emitted first, in this order, when present;
/// everything else follows in insertion order.
const WELL_KNOWN_ORDER: [&str; 9] = [
    "date",
    "server",
    "cache-control",
    "last-modified",
    "location",
    "content-encoding",
    "content-type",
    "content-length",
    "transfer-encoding",
];

#[derive(Debug)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    header_order: Vec<String>,
    pub body: ResponseBody,
    pub chunked: bool,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status_code,
            status_text: status_text.to_string(),
            headers: HashMap::new(),
            header_order: Vec::new(),
            body: ResponseBody::Empty,
            chunked: false,
        }
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        let key = key.to_ascii_lowercase();
        if !self.headers.contains_key(&key) {
            self.header_order.push(key.clone());
        }
        self.headers.insert(key, value.to_string());
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.set_header("content-length", &body.len().to_string());
        self.set_header("content-type", content_type);
        self.body = ResponseBody::Buffered(body);
        self
    }

    pub fn set_file_body(&mut self, file: File, len: u64, content_type: &str) -> &mut Self {
        self.set_header("content-length", &len.to_string());
        self.set_header("content-type", content_type);
        self.body = ResponseBody::File(file, len);
        self
    }

    pub fn set_status_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.status_text = Self::status_text(code).to_string();
        self
    }

    /// Final compliance pass: strips body and body-related headers for
    /// statuses in the no-body set, and forces `Connection: close` for any
    /// status greater than 401. Must run exactly once before emission.
    pub fn verify(&mut self) {
        if NO_BODY_STATUSES.contains(&self.status_code) {
            self.body = ResponseBody::Empty;
            self.remove_header("content-length");
            self.remove_header("transfer-encoding");
            self.chunked = false;
        }

        if self.status_code > 401 {
            self.set_header("connection", "close");
        }
    }

    pub fn remove_header(&mut self, key: &str) {
        let key = key.to_ascii_lowercase();
        if self.headers.remove(&key).is_some() {
            self.header_order.retain(|k| k != &key);
        }
    }

    fn ordered_headers(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::with_capacity(self.headers.len());
        for name in WELL_KNOWN_ORDER {
            if let Some(v) = self.headers.get(name) {
                out.push((name, v.as_str()));
            }
        }
        for name in &self.header_order {
            if !WELL_KNOWN_ORDER.contains(&name.as_str()) {
                if let Some(v) = self.headers.get(name) {
                    out.push((name.as_str(), v.as_str()));
                }
            }
        }
        out
    }

    /// Renders the status line and headers only; the body (buffered or
    /// streamed) is written separately by the connection driver.
    pub fn head_to_bytes(&self) -> Vec<u8> {
        let mut res =
            format!("{} {} {}\r\n", self.version, self.status_code, self.status_text).into_bytes();
        for (key, val) in self.ordered_headers() {
            res.extend_from_slice(format!("{}: {}\r\n", Self::to_pascal_case(key), val).as_bytes());
        }
        res.extend_from_slice(b"\r\n");
        res
    }

    /// Renders the full message; only valid when the body is buffered (or
    /// empty), never for a streamed file body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut res = self.head_to_bytes();
        if let ResponseBody::Buffered(b) = &self.body {
            res.extend_from_slice(b);
        }
        res
    }

    pub fn to_bytes_headers_only(&self) -> Vec<u8> {
        self.head_to_bytes()
    }

    fn to_pascal_case(s: &str) -> String {
        s.split('-')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    None => String::new(),
                    Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
                }
            })
            .collect::<Vec<String>>()
            .join("-")
    }

    pub fn status_text(code: u16) -> &'static str {
        match code {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            HTTP_BAD_REQUEST => "Bad Request",
            HTTP_UNAUTHORIZED => "Unauthorized",
            HTTP_FORBIDDEN => "Forbidden",
            HTTP_NOT_FOUND => "Not Found",
            HTTP_METHOD_NOT_ALLOWED => "Method Not Allowed",
            HTTP_REQUEST_TIMEOUT => "Request Timeout",
            HTTP_LENGTH_REQUIRED => "Length Required",
            HTTP_PAYLOAD_TOO_LARGE => "Payload Too Large",
            HTTP_URI_TOO_LONG => "URI Too Long",
            HTTP_INTERNAL_SERVER_ERROR => "Internal Server Error",
            HTTP_NOT_IMPLEMENTED => "Not Implemented",
            HTTP_BAD_GATEWAY => "Bad Gateway",
            HTTP_SERVICE_UNAVAILABLE => "Service Unavailable",
            HTTP_GATEWAY_TIMEOUT => "Gateway Timeout",
            _ => "Internal Server Error",
        }
    }

    pub fn redirect(code: u16, target_url: &str) -> Self {
        let mut res = HttpResponse::new(code, Self::status_text(code));
        res.set_header("location", target_url);
        res.set_header("content-length", "0");
        res
    }
}

pub fn get_mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

pub fn generate_autoindex(path: &Path, original_url: &str) -> HttpResponse {
    let mut html = format!("<html><body><h1>Index of {}</h1><ul>", original_url);
    if let Ok(entries) = path.read_dir() {
        for entry in entries.flatten() {
            if let Ok(name) = entry.file_name().into_string() {
                html.push_str(&format!(
                    "<li><a href=\"{}/{}\">{}</a></li>",
                    original_url.trim_end_matches('/'),
                    name,
                    name
                ));
            }
        }
    }
    html.push_str("</ul></body></html>");

    let mut res = HttpResponse::new(200, "OK");
    res.set_body(html.into_bytes(), "text/html");
    res
}

/// Fills in a response for an error status, using the route's configured
/// error page file when one exists and matches, otherwise a plain-text
/// fallback body.
pub fn handle_error(res: &mut HttpResponse, code: u16, s_cfg: Option<&Arc<ServerConfig>>) {
    if let Some(cfg) = s_cfg {
        if let Some(path_str) = cfg.error_pages.get(&code) {
            let root = std::path::Path::new(&cfg.paths.public_docroot);
            let err_path = root.join(path_str.trim_start_matches('/'));
            if let Ok(content) = fs::read(err_path) {
                res.set_status_code(code);
                res.set_body(content, "text/html");
                return;
            }
        }
    }

    res.set_status_code(code);
    let body = format!("{} {}", code, HttpResponse::status_text(code)).into_bytes();
    res.set_body(body, "text/plain");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_strips_body_for_no_body_status() {
        let mut res = HttpResponse::new(304, "Not Modified");
        res.set_body(b"should be dropped".to_vec(), "text/plain");
        res.verify();
        assert!(matches!(res.body, ResponseBody::Empty));
        assert!(res.headers.get("content-length").is_none());
    }

    #[test]
    fn verify_forces_close_above_401() {
        let mut res = HttpResponse::new(500, "Internal Server Error");
        res.verify();
        assert_eq!(res.headers.get("connection").map(String::as_str), Some("close"));
    }

    #[test]
    fn verify_leaves_401_connection_alone() {
        let mut res = HttpResponse::new(401, "Unauthorized");
        res.verify();
        assert!(res.headers.get("connection").is_none());
    }

    #[test]
    fn well_known_headers_emit_before_others() {
        let mut res = HttpResponse::new(200, "OK");
        res.set_header("x-custom", "1");
        res.set_body(b"hi".to_vec(), "text/plain");
        let bytes = res.to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        let ct_pos = text.find("Content-Type").unwrap();
        let custom_pos = text.find("X-Custom").unwrap();
        assert!(ct_pos < custom_pos);
    }
}
