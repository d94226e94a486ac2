//! Serves files below a document root.

use std::fmt;
use std::io;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use http::header::CONTENT_TYPE;
use http::{Method, Request, Response, StatusCode};
use http_body::{Body, Frame, SizeHint};
use mime::Mime;
use nio_http::handler::{ExchangeContext, HandlerError, RequestHandler};
use nio_http::protocol::ResponseBody;
use nio_http::protocol::body::ReqBody;
use pin_project_lite::pin_project;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::info;

const READ_CHUNK: usize = 8 * 1024;

/// `GET` and `HEAD` on files below `doc_root`. Anything else is answered
/// with `405`, a missing file with `404`, and a directory, an unreadable file
/// or a target escaping the root with `403`.
#[derive(Debug, Clone)]
pub struct HttpFileHandler {
    doc_root: PathBuf,
}

impl HttpFileHandler {
    /// Serves files below `doc_root`.
    pub fn new(doc_root: impl Into<PathBuf>) -> Self {
        Self { doc_root: doc_root.into() }
    }

    fn resolve(&self, target: &str) -> Option<PathBuf> {
        let relative = Path::new(target.trim_start_matches('/'));
        let confined = relative.components().all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        confined.then(|| self.doc_root.join(relative))
    }
}

#[async_trait]
impl RequestHandler for HttpFileHandler {
    async fn handle(&self, request: Request<ReqBody>, _ctx: &ExchangeContext) -> Result<Response<ResponseBody>, HandlerError> {
        let method = request.method();
        if *method != Method::GET && *method != Method::HEAD {
            return Err(HandlerError::MethodNotSupported(method.clone()));
        }

        let target = urlencoding::decode(request.uri().path())
            .map_err(|e| HandlerError::protocol(format!("request target is not valid utf-8: {e}")))?;

        let Some(path) = self.resolve(&target) else {
            info!(path = %target, "target outside the document root");
            return access_denied();
        };

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("File {} not found", path.display());
                return not_found(&path);
            }
            Err(_) => {
                info!("Cannot read file {}", path.display());
                return access_denied();
            }
        };

        if metadata.is_dir() {
            info!("Cannot read file {}", path.display());
            return access_denied();
        }

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                info!("Cannot read file {}", path.display());
                return access_denied();
            }
            Err(e) => return Err(e.into()),
        };

        info!("Serving file {}", path.display());
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type(&path).as_ref())
            .body(ResponseBody::stream(FileBody::new(file, metadata.len())))
            .map_err(HandlerError::internal)
    }
}

fn not_found(path: &Path) -> Result<Response<ResponseBody>, HandlerError> {
    html(StatusCode::NOT_FOUND, format!("File {} not found", path.display()))
}

fn access_denied() -> Result<Response<ResponseBody>, HandlerError> {
    html(StatusCode::FORBIDDEN, "Access denied".to_owned())
}

fn html(status: StatusCode, message: String) -> Result<Response<ResponseBody>, HandlerError> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, mime::TEXT_HTML_UTF_8.as_ref())
        .body(ResponseBody::from(format!("<html><body><h1>{message}</h1></body></html>")))
        .map_err(HandlerError::internal)
}

fn content_type(path: &Path) -> Mime {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html" | "htm") => mime::TEXT_HTML_UTF_8,
        Some("txt") => mime::TEXT_PLAIN_UTF_8,
        Some("css") => mime::TEXT_CSS_UTF_8,
        Some("js") => mime::APPLICATION_JAVASCRIPT_UTF_8,
        Some("json") => mime::APPLICATION_JSON,
        Some("png") => mime::IMAGE_PNG,
        Some("jpg" | "jpeg") => mime::IMAGE_JPEG,
        Some("gif") => mime::IMAGE_GIF,
        Some("svg") => mime::IMAGE_SVG,
        Some("pdf") => mime::APPLICATION_PDF,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

pin_project! {
    /// File contents with an exact length, so the response gets a
    /// `Content-Length` instead of chunked coding.
    pub struct FileBody {
        #[pin]
        stream: ReaderStream<File>,
        remaining: u64,
    }
}

impl FileBody {
    /// Streams the first `len` bytes of `file`.
    pub fn new(file: File, len: u64) -> Self {
        Self { stream: ReaderStream::with_capacity(file, READ_CHUNK), remaining: len }
    }
}

impl fmt::Debug for FileBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBody").field("remaining", &self.remaining).finish_non_exhaustive()
    }
}

impl Body for FileBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        if *this.remaining == 0 {
            return Poll::Ready(None);
        }

        match ready!(this.stream.poll_next(cx)) {
            Some(Ok(mut bytes)) => {
                // the file grew after its length was taken
                if bytes.len() as u64 > *this.remaining {
                    bytes.truncate(usize::try_from(*this.remaining).unwrap_or(usize::MAX));
                }
                *this.remaining -= bytes.len() as u64;
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => Poll::Ready(Some(Err(io::Error::new(ErrorKind::UnexpectedEof, "file shrank while being served")))),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.remaining == 0
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }
}
