//! HTTP/1.1 engine: RFC 7230 framing, chunked transfer, content-encoding,
//! form decoding, and `TestCase` capture.

use super::{Engine, RecordContext, ReplayContext};
use crate::error::{Error, Result};
use crate::config::ContentCoding;
use crate::filter::FilterableRequest;
use crate::matcher;
use crate::mock::{Chunk, Kind, Mock, Spec};
use crate::testcase::{encode_body, CapturedRequest, CapturedResponse, TestCase};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::io::Read;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const MAX_HEAD_BYTES: usize = 64 * 1024;
const TEST_NAME_HEADER: &str = "keploy-test-name";

/// Whether `initial_bytes` looks like the start of an HTTP/1.x request
/// line (`METHOD SP target SP HTTP/1.x`).
pub fn sniff(initial_bytes: &[u8]) -> bool {
    const METHODS: &[&str] = &[
        "GET ", "POST ", "PUT ", "DELETE ", "HEAD ", "OPTIONS ", "PATCH ", "CONNECT ", "TRACE ",
    ];
    let text = String::from_utf8_lossy(initial_bytes);
    METHODS.iter().any(|m| text.starts_with(m))
}

#[derive(Debug, Clone)]
struct ParsedHead {
    headers: Vec<(String, String)>,
    head_len: usize,
    request_line: Option<(String, String)>,
    status_code: Option<u16>,
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn parse_request_head(buf: &[u8]) -> Result<Option<ParsedHead>> {
    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut header_storage);
    match req.parse(buf).map_err(|e| Error::malformed("http", e.to_string()))? {
        httparse::Status::Complete(head_len) => Ok(Some(ParsedHead {
            headers: req
                .headers
                .iter()
                .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                .collect(),
            head_len,
            request_line: Some((
                req.method.unwrap_or("GET").to_string(),
                req.path.unwrap_or("/").to_string(),
            )),
            status_code: None,
        })),
        httparse::Status::Partial => Ok(None),
    }
}

fn parse_response_head(buf: &[u8]) -> Result<Option<ParsedHead>> {
    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut resp = httparse::Response::new(&mut header_storage);
    match resp.parse(buf).map_err(|e| Error::malformed("http", e.to_string()))? {
        httparse::Status::Complete(head_len) => Ok(Some(ParsedHead {
            headers: resp
                .headers
                .iter()
                .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                .collect(),
            head_len,
            request_line: None,
            status_code: Some(resp.code.unwrap_or(200)),
        })),
        httparse::Status::Partial => Ok(None),
    }
}

/// Strategy for reading the body once headers are known.
enum BodyFraming {
    ContentLength(usize),
    Chunked,
    UntilClose,
    None,
}

fn body_framing(head: &ParsedHead, is_request: bool) -> BodyFraming {
    if let Some(te) = header_value(&head.headers, "transfer-encoding") {
        if te.to_ascii_lowercase().contains("chunked") {
            return BodyFraming::Chunked;
        }
    }
    if let Some(len) = header_value(&head.headers, "content-length") {
        if let Ok(n) = len.trim().parse::<usize>() {
            return BodyFraming::ContentLength(n);
        }
    }
    if is_request {
        BodyFraming::None
    } else {
        BodyFraming::UntilClose
    }
}

async fn read_until_head_complete<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut Vec<u8>,
    is_request: bool,
) -> Result<ParsedHead> {
    loop {
        let parsed = if is_request {
            parse_request_head(buf)?
        } else {
            parse_response_head(buf)?
        };
        if let Some(head) = parsed {
            return Ok(head);
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(Error::malformed("http", "header block exceeded size limit"));
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::malformed("http", "eof before headers completed"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn read_exact_more<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut Vec<u8>,
    total_needed: usize,
) -> Result<()> {
    while buf.len() < total_needed {
        let mut chunk = [0u8; 8192];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::malformed("http", "eof before body completed"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(())
}

/// Read chunked-encoding bytes (chunk-size lines, chunk data, trailers)
/// appending every raw byte consumed to `buf`, starting right after the
/// headers. Terminates on the zero-length chunk, or promptly on EOF with
/// no data (the chunked-response termination invariant).
async fn read_chunked_body<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut Vec<u8>) -> Result<()> {
    loop {
        let size_line_start = buf.len();
        loop {
            if let Some(pos) = find_crlf(&buf[size_line_start..]) {
                let line = &buf[size_line_start..size_line_start + pos];
                let line_str = String::from_utf8_lossy(line);
                let size_str = line_str.split(';').next().unwrap_or("0").trim();
                let size = usize::from_str_radix(size_str, 16)
                    .map_err(|_| Error::malformed("http", "invalid chunk size"))?;

                let body_start = size_line_start + pos + 2;
                read_exact_more(stream, buf, body_start + size + 2).await?;

                if size == 0 {
                    // Drain any trailer headers up to the blank line.
                    loop {
                        if let Some(trailer_end) = find_double_crlf(&buf[body_start..]) {
                            let _ = trailer_end;
                            return Ok(());
                        }
                        let mut chunk = [0u8; 4096];
                        let n = stream.read(&mut chunk).await?;
                        if n == 0 {
                            return Ok(()); // EOF with no more data: terminate promptly
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
                break;
            }
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::malformed("http", "eof mid chunk-size line"));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Read the bytes of a request until close, returning EOF promptly with
/// whatever was read (used for the `UntilClose` response framing and its
/// termination invariant).
async fn read_until_close<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut Vec<u8>) -> Result<()> {
    let mut attempts = 0;
    loop {
        let mut chunk = [0u8; 8192];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        attempts += 1;
        if attempts > 10_000 {
            return Err(Error::generic("read-until-close exceeded attempt budget"));
        }
    }
}

/// Read one full HTTP message (request or response) from `stream`, seeded
/// with `seed` bytes already consumed. Returns the raw bytes of the whole
/// message and the parsed head for decoding.
async fn read_message<R: AsyncRead + Unpin>(
    stream: &mut R,
    seed: Vec<u8>,
    is_request: bool,
) -> Result<(Vec<u8>, ParsedHead)> {
    let mut buf = seed;
    let head = read_until_head_complete(stream, &mut buf, is_request).await?;

    match body_framing(&head, is_request) {
        BodyFraming::ContentLength(n) => {
            read_exact_more(stream, &mut buf, head.head_len + n).await?;
        }
        BodyFraming::Chunked => {
            buf.truncate(head.head_len);
            read_chunked_body(stream, &mut buf).await?;
        }
        BodyFraming::UntilClose => {
            read_until_close(stream, &mut buf).await?;
        }
        BodyFraming::None => {}
    }

    Ok((buf, head))
}

fn decompress(coding: ContentCoding, body: &[u8]) -> Vec<u8> {
    match coding {
        ContentCoding::Gzip => {
            let mut out = Vec::new();
            if flate2::read::GzDecoder::new(body).read_to_end(&mut out).is_ok() {
                out
            } else {
                body.to_vec()
            }
        }
        ContentCoding::Deflate => {
            let mut out = Vec::new();
            if flate2::read::DeflateDecoder::new(body).read_to_end(&mut out).is_ok() {
                out
            } else {
                body.to_vec()
            }
        }
        ContentCoding::Brotli => {
            let mut out = Vec::new();
            let mut reader = brotli::Decompressor::new(body, 4096);
            if reader.read_to_end(&mut out).is_ok() {
                out
            } else {
                body.to_vec()
            }
        }
        ContentCoding::Zstd => zstd::stream::decode_all(body).unwrap_or_else(|_| body.to_vec()),
        ContentCoding::Identity => body.to_vec(),
    }
}

fn body_slice<'a>(raw: &'a [u8], head: &ParsedHead) -> &'a [u8] {
    match body_framing(head, head.request_line.is_some()) {
        BodyFraming::ContentLength(n) => {
            let start = head.head_len;
            let end = (start + n).min(raw.len());
            &raw[start..end]
        }
        BodyFraming::Chunked => &[],
        BodyFraming::UntilClose => &raw[head.head_len..],
        BodyFraming::None => &[],
    }
}

fn reassemble_chunked_body(raw: &[u8], head: &ParsedHead) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = head.head_len;
    loop {
        let Some(rel) = find_crlf(&raw[pos..]) else { break };
        let line = &raw[pos..pos + rel];
        let line_str = String::from_utf8_lossy(line);
        let size_str = line_str.split(';').next().unwrap_or("0").trim();
        let Ok(size) = usize::from_str_radix(size_str, 16) else { break };
        let data_start = pos + rel + 2;
        if size == 0 {
            break;
        }
        let data_end = (data_start + size).min(raw.len());
        out.extend_from_slice(&raw[data_start..data_end]);
        pos = data_end + 2;
    }
    out
}

fn decoded_body(raw: &[u8], head: &ParsedHead) -> Vec<u8> {
    let body = match body_framing(head, head.request_line.is_some()) {
        BodyFraming::Chunked => reassemble_chunked_body(raw, head),
        _ => body_slice(raw, head).to_vec(),
    };
    match header_value(&head.headers, "content-encoding").and_then(ContentCoding::parse) {
        Some(coding) => decompress(coding, &body),
        None => body,
    }
}

fn parse_urlencoded_form(body: &str) -> HashMap<String, Vec<String>> {
    let mut form: HashMap<String, Vec<String>> = HashMap::new();
    for pair in body.split('&').filter(|p| !p.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        let key = urlencoding::decode(key).map(|c| c.into_owned()).unwrap_or_else(|_| key.to_string());
        let value = urlencoding::decode(value).map(|c| c.into_owned()).unwrap_or_else(|_| value.to_string());
        form.entry(key).or_default().push(value);
    }
    form
}

/// Extract a multipart boundary's `{name -> [values]}` pairs. Only text
/// field values are captured (per-part `Content-Disposition: form-data;
/// name="..."`); file parts are skipped, matching the spec's `{key,
/// [values]}` capture contract rather than persisting upload bytes.
fn parse_multipart_form(content_type: &str, body: &[u8]) -> HashMap<String, Vec<String>> {
    let mut form: HashMap<String, Vec<String>> = HashMap::new();
    let Some(boundary) = content_type.split("boundary=").nth(1) else {
        return form;
    };
    let boundary = boundary.trim_matches('"');
    let delimiter = format!("--{boundary}");
    let text = String::from_utf8_lossy(body);

    for part in text.split(&delimiter) {
        let part = part.trim_start_matches("\r\n");
        if part.is_empty() || part.starts_with("--") {
            continue;
        }
        let Some(header_end) = part.find("\r\n\r\n") else { continue };
        let headers_section = &part[..header_end];
        let value = part[header_end + 4..].trim_end_matches("\r\n");

        if headers_section.contains("filename=") {
            continue; // file upload; not captured
        }
        let Some(name_start) = headers_section.find("name=\"") else { continue };
        let rest = &headers_section[name_start + 6..];
        let Some(name_end) = rest.find('"') else { continue };
        let name = &rest[..name_end];
        form.entry(name.to_string()).or_default().push(value.to_string());
    }
    form
}

fn build_captured_request(raw: &[u8], head: &ParsedHead) -> CapturedRequest {
    let (method, path) = head.request_line.clone().unwrap_or_default();
    let headers: HashMap<String, String> = head.headers.iter().cloned().collect();
    let body = decoded_body(raw, head);
    let content_type = header_value(&head.headers, "content-type").unwrap_or("").to_string();

    if content_type.to_ascii_lowercase().starts_with("multipart/form-data") {
        let form = parse_multipart_form(&content_type, &body);
        CapturedRequest {
            method,
            path,
            headers,
            body: String::new(),
            body_is_binary: false,
            form,
        }
    } else if content_type.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
        let decoded_text = String::from_utf8_lossy(&body).into_owned();
        let (body_str, _) = encode_body(decoded_text.as_bytes());
        CapturedRequest {
            method,
            path,
            headers,
            body: body_str,
            body_is_binary: false,
            form: parse_urlencoded_form(&decoded_text),
        }
    } else {
        let (body_str, is_binary) = encode_body(&body);
        CapturedRequest {
            method,
            path,
            headers,
            body: body_str,
            body_is_binary: is_binary,
            form: HashMap::new(),
        }
    }
}

fn build_captured_response(raw: &[u8], head: &ParsedHead) -> CapturedResponse {
    let headers: HashMap<String, String> = head.headers.iter().cloned().collect();
    let body = decoded_body(raw, head);
    let (body_str, is_binary) = encode_body(&body);
    CapturedResponse {
        status_code: head.status_code.unwrap_or(200),
        headers,
        body: body_str,
        body_is_binary: is_binary,
    }
}

fn build_mock(request: Vec<u8>, response: Vec<u8>, connection_id: &str, session_id: &str) -> Result<Mock> {
    let now = Utc::now();
    Mock::new(
        Kind::Http,
        Spec {
            requests: vec![Chunk::from_bytes(&request)],
            responses: vec![Chunk::from_bytes(&response)],
            req_ts: now,
            res_ts: now,
            metadata: HashMap::new(),
        },
        connection_id,
        session_id,
        false,
    )
}

/// The HTTP/1.1 protocol engine.
#[derive(Default)]
pub struct HttpEngine;

#[async_trait]
impl Engine for HttpEngine {
    fn kind(&self) -> Kind {
        Kind::Http
    }

    async fn record(&self, mut ctx: RecordContext) -> Result<()> {
        let mut seed = ctx.initial_bytes;
        loop {
            let taken = std::mem::take(&mut seed);
            let (request_raw, request_head) = match read_message(&mut ctx.client, taken, true).await {
                Ok(r) => r,
                Err(_) => break,
            };
            ctx.destination.write_all(&request_raw).await?;

            let (response_raw, response_head) =
                match read_message(&mut ctx.destination, Vec::new(), false).await {
                    Ok(r) => r,
                    Err(_) => break,
                };
            ctx.client.write_all(&response_raw).await?;

            if let Ok(mock) = build_mock(
                request_raw.clone(),
                response_raw.clone(),
                &ctx.context.client_conn_id,
                &ctx.context.session_id,
            ) {
                ctx.mock_sink.emit(mock).await;
            }

            if let Some(sink) = &ctx.testcase_sink {
                let request = build_captured_request(&request_raw, &request_head);
                let response = build_captured_response(&response_raw, &response_head);
                let host = request.headers.get("host").map(String::as_str).unwrap_or("");
                let filterable = FilterableRequest {
                    host,
                    port: 0,
                    path: &request.path,
                    method: &request.method,
                    headers: &request.headers,
                };
                if !ctx.traffic_filter.should_bypass(&filterable) {
                    let test_name = request.headers.get(TEST_NAME_HEADER).cloned();
                    let test_case = TestCase::new(Kind::Http, request, response, Utc::now(), test_name);
                    if sink.send(test_case).await.is_err() {
                        tracing::debug!("testcase channel closed, ending capture loop");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn replay(&self, mut ctx: ReplayContext) -> Result<()> {
        let mut seed = ctx.initial_bytes;
        loop {
            let taken = std::mem::take(&mut seed);
            let (request_raw, _head) = match read_message(&mut ctx.client, taken, true).await {
                Ok(r) => r,
                Err(_) => break,
            };

            match matcher::match_request(&ctx.mock_store, &[request_raw.clone()]) {
                Some(responses) => {
                    for chunk in responses {
                        ctx.client.write_all(&chunk.to_bytes()).await?;
                    }
                }
                None if ctx.config.fallback_on_miss => {
                    if let Some(dest) = ctx.destination.as_mut() {
                        dest.write_all(&request_raw).await?;
                        if let Ok((response_raw, _)) = read_message(dest, Vec::new(), false).await {
                            ctx.client.write_all(&response_raw).await?;
                        }
                    }
                }
                None => {
                    let _ = ctx
                        .client
                        .write_all(b"HTTP/1.1 502 Bad Gateway\r\ncontent-length: 0\r\n\r\n")
                        .await;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn sniffs_common_methods_only() {
        assert!(sniff(b"GET / HTTP/1.1\r\n"));
        assert!(sniff(b"POST /x HTTP/1.1\r\n"));
        assert!(!sniff(b"\x00\x00\x00\x0f"));
    }

    #[tokio::test]
    async fn reads_a_content_length_request() {
        let (mut a, mut b) = duplex(256);
        let payload = b"POST /hi HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello".to_vec();
        let expected_len = payload.len();
        tokio::spawn(async move {
            b.write_all(&payload).await.unwrap();
        });
        let (raw, head) = read_message(&mut a, Vec::new(), true).await.unwrap();
        assert_eq!(raw.len(), expected_len);
        assert_eq!(head.request_line.unwrap().1, "/hi");
    }

    #[tokio::test]
    async fn chunked_response_terminates_on_zero_chunk() {
        let (mut a, mut b) = duplex(256);
        let payload = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n".to_vec();
        tokio::spawn(async move {
            b.write_all(&payload).await.unwrap();
        });
        let (raw, head) = read_message(&mut a, Vec::new(), false).await.unwrap();
        let body = reassemble_chunked_body(&raw, &head);
        assert_eq!(body, b"hello");
    }

    #[test]
    fn urlencoded_form_decodes_pairs() {
        let form = parse_urlencoded_form("a=1&b=hello%20world&a=2");
        assert_eq!(form.get("a").unwrap(), &vec!["1".to_string(), "2".to_string()]);
        assert_eq!(form.get("b").unwrap(), &vec!["hello world".to_string()]);
    }

    #[test]
    fn multipart_form_extracts_text_fields_and_skips_files() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nvalue\r\n--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\r\nbinarydata\r\n--B--\r\n";
        let form = parse_multipart_form("multipart/form-data; boundary=B", body);
        assert_eq!(form.get("field").unwrap(), &vec!["value".to_string()]);
        assert!(!form.contains_key("file"));
    }
}
