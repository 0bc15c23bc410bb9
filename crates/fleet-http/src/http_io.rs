//! The minimal HTTP/1.1 read/write primitives the side-channel handlers sit
//! on top of. The grounding workspace carries no web framework dependency
//! (no `hyper`/`axum`), so this mirrors the same "own the framing by hand"
//! posture `fleet-transport::wire` takes for the RPC codec, just one layer
//! up the stack: `httparse` tokenizes the request line and header block,
//! everything else (query decoding, body streaming, response writing) is a
//! few dozen lines of straight-line code rather than a second dependency.

use std::collections::BTreeMap;

use fleet_core::error::{codes, CoreError, ErrorCategory};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 64;

/// A parsed request line + header block. The body, if any, is *not*
/// included here — callers stream it separately via [`read_body_to_writer`]
/// since upload bodies can be large (spec §4.5.2/§4.5.3).
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, Vec<String>>,
    pub headers: Vec<(String, String)>,
    pub content_length: usize,
    /// Any body bytes that were already pulled into the header-scan buffer
    /// past the `\r\n\r\n` terminator; must be consumed before reading more
    /// from the stream.
    pub leftover: Vec<u8>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query_one(&self, name: &str) -> Option<&str> {
        self.query.get(name).and_then(|v| v.first()).map(|s| s.as_str())
    }

    pub fn query_many(&self, name: &str) -> &[String] {
        self.query.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

fn parse_query(raw: &str) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pair in raw.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key).map(|s| s.into_owned()).unwrap_or_else(|_| key.to_string());
        let value = urlencoding::decode(value).map(|s| s.into_owned()).unwrap_or_else(|_| value.to_string());
        params.entry(key).or_default().push(value);
    }
    params
}

fn bad_request(message: impl Into<String>) -> CoreError {
    CoreError::new(codes::INTERNAL, ErrorCategory::Internal, message.into())
}

/// Read and parse one request line + header block, growing the read buffer
/// until `\r\n\r\n` is found or `MAX_HEADER_BYTES` is exceeded.
pub async fn read_request_head<S>(stream: &mut S) -> Result<RequestHead, CoreError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_header_terminator(&buf) {
            break pos;
        }
        if buf.len() >= MAX_HEADER_BYTES {
            return Err(bad_request("request header block too large"));
        }
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|err| bad_request(format!("reading request: {err}")))?;
        if n == 0 {
            return Err(bad_request("connection closed before headers were complete"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw_headers);
    let parsed = req
        .parse(&buf[..header_end + 4])
        .map_err(|err| bad_request(format!("malformed request: {err}")))?;
    let consumed = match parsed {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Err(bad_request("incomplete request after full header scan")),
    };

    let method = req.method.unwrap_or("").to_string();
    let full_path = req.path.unwrap_or("/").to_string();
    let (path, query_str) = full_path.split_once('?').unwrap_or((full_path.as_str(), ""));
    let path = path.to_string();
    let query = parse_query(query_str);

    let headers: Vec<(String, String)> = req
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| v.trim().parse::<usize>())
        .transpose()
        .map_err(|_| bad_request("malformed content-length"))?
        .unwrap_or(0);

    let leftover = buf[consumed..].to_vec();

    Ok(RequestHead {
        method,
        path,
        query,
        headers,
        content_length,
        leftover,
    })
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Stream exactly `head.content_length` bytes of body into `writer`,
/// consuming `head.leftover` first. Returns the number of bytes written.
pub async fn read_body_to_writer<S, W>(
    stream: &mut S,
    head: &RequestHead,
    writer: &mut W,
) -> Result<u64, CoreError>
where
    S: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut remaining = head.content_length;
    let mut written: u64 = 0;

    if !head.leftover.is_empty() {
        let take = remaining.min(head.leftover.len());
        writer
            .write_all(&head.leftover[..take])
            .await
            .map_err(|err| bad_request(format!("writing request body: {err}")))?;
        written += take as u64;
        remaining -= take;
    }

    let mut chunk = [0u8; 64 * 1024];
    while remaining > 0 {
        let n = stream
            .read(&mut chunk[..remaining.min(chunk.len())])
            .await
            .map_err(|err| bad_request(format!("reading request body: {err}")))?;
        if n == 0 {
            return Err(bad_request("connection closed mid-upload"));
        }
        writer
            .write_all(&chunk[..n])
            .await
            .map_err(|err| bad_request(format!("writing request body: {err}")))?;
        written += n as u64;
        remaining -= n;
    }

    writer
        .flush()
        .await
        .map_err(|err| bad_request(format!("flushing request body: {err}")))?;
    Ok(written)
}

/// Write a complete `status`-line response with a JSON body.
pub async fn write_json_response<S>(
    stream: &mut S,
    status: u16,
    reason: &str,
    body: &serde_json::Value,
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let encoded = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    write_response(stream, status, reason, &[("Content-Type", "application/json")], &encoded).await
}

/// Write a complete response with an explicit header list and a fully
/// buffered body.
pub async fn write_response<S>(
    stream: &mut S,
    status: u16,
    reason: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut head = format!("HTTP/1.1 {status} {reason}\r\n");
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    head.push_str("Connection: close\r\n\r\n");
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

/// Write a `401` with the `WWW-Authenticate` challenge spec §4.5 mandates
/// on every side-channel auth failure.
pub async fn write_unauthorized<S>(stream: &mut S, realm: &str) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let challenge = format!("Basic realm=\"{realm}\"");
    write_response(
        stream,
        401,
        "Unauthorized",
        &[("WWW-Authenticate", challenge.as_str())],
        b"authentication required",
    )
    .await
}

pub async fn write_not_found<S>(stream: &mut S) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_response(stream, 404, "Not Found", &[], b"not found").await
}

pub async fn write_method_not_allowed<S>(stream: &mut S) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_response(stream, 405, "Method Not Allowed", &[], b"method not allowed").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_method_path_query_and_headers() {
        let raw = b"GET /environment/abc/log?level=INFO&includeEntity=unit-a&includeEntity=unit-b HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\nfoo";
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        let head = read_request_head(&mut cursor).await.unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path, "/environment/abc/log");
        assert_eq!(head.query_one("level"), Some("INFO"));
        assert_eq!(head.query_many("includeEntity"), &["unit-a".to_string(), "unit-b".to_string()]);
        assert_eq!(head.content_length, 3);
        assert_eq!(head.leftover, b"foo");
    }

    #[tokio::test]
    async fn reads_body_across_leftover_and_stream_boundary() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\r\nabcde12345";
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        let head = read_request_head(&mut cursor).await.unwrap();
        let mut out = Vec::new();
        let n = read_body_to_writer(&mut cursor, &head, &mut out).await.unwrap();
        assert_eq!(n, 10);
        assert_eq!(out, b"abcde12345");
    }
}
