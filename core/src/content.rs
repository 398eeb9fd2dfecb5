//! Moving entry content: chunked copies, staging and HTTP delivery.
//!
//! Delivery picks one strategy per entry:
//!
//! 1. the entry has a direct URL that must be proxied: reverse-proxy it
//! 2. the entry has a direct URL: redirect (`302`) the client to it
//! 3. the entry's reader can seek: serve it with range and
//!    conditional-request support
//! 4. otherwise stream it through with the entry's declared length

use std::io::SeekFrom;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use httpdate::{fmt_http_date, parse_http_date};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

use crate::drive::{AsyncReadSeek, Content, ContentReader, Entry};
use crate::errors::DriveError;
use crate::task::TaskContext;

/// Buffer size of [`copy_with_progress`].
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Largest request body [`deliver`] forwards to a proxied URL.
pub const PROXY_BODY_LIMIT: usize = 8 * 1024 * 1024;

/// Name prefix of staged temporary files.
const STAGING_PREFIX: &str = "drive-copy";

/// Copy `reader` into `writer` one buffer at a time.
///
/// Cancellation is checked before every chunk. The cumulative byte count
/// is reported to `ctx` after every chunk and returned at the end.
pub async fn copy_with_progress<R, W>(
    ctx: &dyn TaskContext,
    reader: &mut R,
    writer: &mut W,
) -> Result<i64, DriveError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written: i64 = 0;
    loop {
        if ctx.is_cancelled() {
            return Err(DriveError::Cancelled);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        written += n as i64;
        ctx.progress(written);
    }
    Ok(written)
}

/// Copy an entry's bytes into `writer`.
///
/// URL-backed content is fetched with `client`; a non-success status is
/// reported as [`DriveError::RemoteApi`]. Other content is read through
/// its reader.
pub async fn copy_content<W>(
    client: &reqwest::Client,
    content: &dyn Content,
    writer: &mut W,
    ctx: &dyn TaskContext,
) -> Result<i64, DriveError>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    match content.url().await {
        Ok(url) => {
            debug!("Copying content from {}", url.url);
            let resp = client.get(&url.url).send().await?;
            if !resp.status().is_success() {
                return Err(DriveError::RemoteApi {
                    status: resp.status().as_u16(),
                    message: "failed to copy file".to_string(),
                });
            }
            let stream = resp.bytes_stream().map_err(std::io::Error::other);
            let mut reader = StreamReader::new(Box::pin(stream));
            copy_with_progress(ctx, &mut reader, writer).await
        }
        Err(DriveError::Unsupported) => {
            let mut reader = content.reader().await?;
            copy_with_progress(ctx, &mut reader, writer).await
        }
        Err(e) => Err(e),
    }
}

/// Content materialized into a private temporary file.
///
/// The file is positioned at its start and removed when this value is
/// dropped, whatever happened in between.
pub struct StagedFile {
    file: tokio::fs::File,
    path: tempfile::TempPath,
    size: i64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn file_mut(&mut self) -> &mut tokio::fs::File {
        &mut self.file
    }
}

/// Copy an entry's content into a new temporary file.
///
/// The file is created in `temp_dir`, or the system temp directory when
/// `None`. On failure the partial file is removed before returning.
pub async fn stage_content(
    client: &reqwest::Client,
    content: &dyn Content,
    temp_dir: Option<&Path>,
    ctx: &dyn TaskContext,
) -> Result<StagedFile, DriveError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(STAGING_PREFIX);
    let named = match temp_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    let (file, path) = named.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let size = copy_content(client, content, &mut file, ctx).await?;
    file.flush().await?;
    file.seek(SeekFrom::Start(0)).await?;
    debug!("Staged {} bytes in {}", size, path.display());

    Ok(StagedFile { file, path, size })
}

/// Serve an entry's bytes as the response to `request`.
pub async fn deliver(
    client: &reqwest::Client,
    entry: &dyn Entry,
    request: Request<Body>,
) -> Result<Response, DriveError> {
    let content = entry.content().ok_or_else(|| {
        DriveError::not_allowed(format!("file '{}' is not readable", entry.path()))
    })?;

    match content.url().await {
        Ok(url) if url.proxy => {
            debug!("Proxying {} to {}", entry.path(), url.url);
            return proxy(client, &url.url, request).await;
        }
        Ok(url) => {
            debug!("Redirecting {} to {}", entry.path(), url.url);
            return redirect(&url.url);
        }
        Err(DriveError::Unsupported) => {}
        Err(e) => return Err(e),
    }

    let head = *request.method() == Method::HEAD;
    match content.reader().await? {
        ContentReader::Seekable(reader) => {
            debug!("Serving {} from a seekable reader", entry.path());
            let (name, mod_time) = (entry.name(), entry.mod_time());
            serve_content(reader, name, mod_time, request.method(), request.headers()).await
        }
        ContentReader::Stream(reader) => {
            debug!("Streaming {} ({} bytes)", entry.path(), entry.size());
            let mut headers = HeaderMap::new();
            if entry.size() >= 0 {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(entry.size()));
            }
            let body = if head {
                Body::empty()
            } else {
                Body::from_stream(ReaderStream::new(reader))
            };
            Ok((StatusCode::OK, headers, body).into_response())
        }
    }
}

fn redirect(url: &str) -> Result<Response, DriveError> {
    let location = HeaderValue::from_str(url).map_err(invalid_data)?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// Forward `request` to `url` and stream the upstream response back.
///
/// The inbound `Host` and `Referer` headers are not forwarded; the target
/// host is taken from `url`. Request bodies above [`PROXY_BODY_LIMIT`]
/// are refused.
async fn proxy(
    client: &reqwest::Client,
    url: &str,
    request: Request<Body>,
) -> Result<Response, DriveError> {
    let target = reqwest::Url::parse(url).map_err(invalid_data)?;
    let (parts, body) = request.into_parts();

    let mut headers = HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        if name == header::HOST || name == header::REFERER || is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    let body = axum::body::to_bytes(body, PROXY_BODY_LIMIT)
        .await
        .map_err(|_| DriveError::not_allowed("request body too large to proxy"))?;

    let upstream = client
        .request(parts.method, target)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name) {
            response_headers.append(name.clone(), value.clone());
        }
    }
    Ok((
        status,
        response_headers,
        Body::from_stream(upstream.bytes_stream()),
    )
        .into_response())
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::PROXY_AUTHENTICATE
        || name == header::PROXY_AUTHORIZATION
        || name == header::TE
        || name == header::TRAILER
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name.as_str() == "keep-alive"
}

/// Serve a seekable reader with `Range`, `If-Range` and
/// `If-Modified-Since` support.
///
/// `mod_time` is in milliseconds since the Unix epoch; `0` means unknown
/// and disables the date-based headers. The content type is guessed from
/// `name`.
pub async fn serve_content(
    mut reader: Box<dyn AsyncReadSeek>,
    name: &str,
    mod_time: i64,
    method: &Method,
    request_headers: &HeaderMap,
) -> Result<Response, DriveError> {
    let size = reader.seek(SeekFrom::End(0)).await?;
    let modified = (mod_time > 0).then(|| truncate_to_secs(mod_time));
    let mime = mime_guess::from_path(name).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str()).map_err(invalid_data)?,
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(modified) = modified {
        headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified)).map_err(invalid_data)?,
        );
    }

    let since = header_date(request_headers, header::IF_MODIFIED_SINCE);
    if let (Some(modified), Some(since)) = (modified, since) {
        if modified <= since {
            let mut not_modified = HeaderMap::new();
            if let Some(value) = headers.remove(header::LAST_MODIFIED) {
                not_modified.insert(header::LAST_MODIFIED, value);
            }
            return Ok((StatusCode::NOT_MODIFIED, not_modified).into_response());
        }
    }

    let if_range_matches = match request_headers.get(header::IF_RANGE) {
        Some(_) => match (modified, header_date(request_headers, header::IF_RANGE)) {
            (Some(modified), Some(date)) => modified <= date,
            _ => false,
        },
        None => true,
    };
    let range = if if_range_matches {
        match parse_range(request_headers.get(header::RANGE), size) {
            Ok(range) => range,
            Err(RangeNotSatisfiable) => {
                let mut headers = HeaderMap::new();
                headers.insert(
                    header::CONTENT_RANGE,
                    HeaderValue::from_str(&format!("bytes */{size}")).map_err(invalid_data)?,
                );
                return Ok((StatusCode::RANGE_NOT_SATISFIABLE, headers, "range not satisfiable")
                    .into_response());
            }
        }
    } else {
        None
    };

    let head = *method == Method::HEAD;
    let (status, start, length) = match range {
        Some((start, end)) => {
            headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{end}/{size}"))
                    .map_err(invalid_data)?,
            );
            (StatusCode::PARTIAL_CONTENT, start, end - start + 1)
        }
        None => (StatusCode::OK, 0, size),
    };
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    if head {
        return Ok((status, headers, Body::empty()).into_response());
    }
    reader.seek(SeekFrom::Start(start)).await?;
    let stream = ReaderStream::new(reader.take(length));
    Ok((status, headers, Body::from_stream(stream)).into_response())
}

/// A `Range` header that cannot be satisfied for the content size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeNotSatisfiable;

/// Parse a single `bytes=` range against a content of `size` bytes.
///
/// Returns the inclusive `(start, end)` pair, or `None` when the whole
/// content should be served (no header, multiple ranges, a zero-length
/// suffix, or a unit other than bytes).
pub fn parse_range(
    value: Option<&HeaderValue>,
    size: u64,
) -> Result<Option<(u64, u64)>, RangeNotSatisfiable> {
    let Some(value) = value else {
        return Ok(None);
    };
    let Some(range) = value.to_str().ok().and_then(|v| v.trim().strip_prefix("bytes=")) else {
        return Ok(None);
    };
    if range.contains(',') {
        warn!("Ignoring multi-range request: {}", range);
        return Ok(None);
    }
    if size == 0 {
        return Err(RangeNotSatisfiable);
    }

    let (start_part, end_part) = range.split_once('-').ok_or(RangeNotSatisfiable)?;
    let (start_part, end_part) = (start_part.trim(), end_part.trim());
    let (start, end) = if start_part.is_empty() {
        let suffix: u64 = end_part.parse().map_err(|_| RangeNotSatisfiable)?;
        if suffix == 0 {
            return Ok(None);
        }
        (size.saturating_sub(suffix), size - 1)
    } else {
        let start: u64 = start_part.parse().map_err(|_| RangeNotSatisfiable)?;
        let end: u64 = if end_part.is_empty() {
            size - 1
        } else {
            end_part
                .parse::<u64>()
                .map_err(|_| RangeNotSatisfiable)?
                .min(size - 1)
        };
        (start, end)
    };

    if start > end || start >= size {
        return Err(RangeNotSatisfiable);
    }
    Ok(Some((start, end)))
}

fn header_date(headers: &HeaderMap, name: HeaderName) -> Option<SystemTime> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_http_date(v).ok())
}

/// HTTP dates carry whole seconds only.
fn truncate_to_secs(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs((millis / 1000) as u64)
}

fn invalid_data<E>(e: E) -> DriveError
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    DriveError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
