//! Request and response bodies

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use tokio::sync::mpsc;

/// Boxed error type for body streams
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased incoming body.
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// Box any body for use as a [`RequestBody`].
pub fn request_body<B>(body: B) -> RequestBody
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// An in-memory request body.
pub fn full_request_body(bytes: impl Into<Bytes>) -> RequestBody {
    request_body(Full::new(bytes.into()))
}

/// Receiving half of a streamed response.
pub type BodyStream = mpsc::Receiver<Bytes>;

/// Response body: buffered bytes or a channel fed by a
/// [`StreamWriter`](crate::stream::StreamWriter).
#[derive(Debug)]
pub enum Body {
    Full(Full<Bytes>),
    Stream(BodyStream),
}

impl Body {
    pub fn empty() -> Self {
        Body::Full(Full::new(Bytes::new()))
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(Full::new(bytes))
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::from(Bytes::from(bytes))
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        match self.get_mut() {
            Body::Full(full) => Pin::new(full).poll_frame(cx),
            Body::Stream(rx) => rx.poll_recv(cx).map(|chunk| chunk.map(|b| Ok(Frame::data(b)))),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Body::Full(full) => full.is_end_stream(),
            Body::Stream(_) => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            Body::Full(full) => full.size_hint(),
            Body::Stream(_) => SizeHint::default(),
        }
    }
}

/// Response type used throughout apiforge
pub type Response = http::Response<Body>;
