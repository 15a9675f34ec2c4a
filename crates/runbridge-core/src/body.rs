//! Body streams and blobs

use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, stream};
use std::fmt;
use std::pin::Pin;

/// Boxed stream of body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// One-shot body stream
///
/// The underlying stream can be taken exactly once. A second `lock` fails
/// with [`Error::StreamLocked`].
pub struct BodyStream {
    inner: Option<ByteStream>,
}

impl BodyStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(stream)),
        }
    }

    /// Single-chunk stream over an in-memory buffer
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(stream::once(futures::future::ready(Ok(bytes.into()))))
    }

    /// Stream over a fixed list of chunks
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        I::IntoIter: Send + 'static,
        B: Into<Bytes>,
    {
        Self::new(stream::iter(chunks.into_iter().map(|chunk| Ok(chunk.into()))))
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_none()
    }

    /// Take the stream out for reading
    pub fn lock(&mut self) -> Result<ByteStream> {
        self.inner.take().ok_or(Error::StreamLocked)
    }

    /// Read the whole stream into one buffer
    pub async fn into_bytes(mut self) -> Result<Bytes> {
        stream_to_bytes(self.lock()?).await
    }
}

impl From<ByteStream> for BodyStream {
    fn from(stream: ByteStream) -> Self {
        Self {
            inner: Some(stream),
        }
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Collect every chunk of a stream into one buffer
pub async fn stream_to_bytes(stream: ByteStream) -> Result<Bytes> {
    collect(stream, None).await
}

/// Like [`stream_to_bytes`], failing once more than `max_size` bytes arrive
pub async fn stream_to_bytes_limited(stream: ByteStream, max_size: usize) -> Result<Bytes> {
    collect(stream, Some(max_size)).await
}

async fn collect(mut stream: ByteStream, max_size: Option<usize>) -> Result<Bytes> {
    let mut buffer = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;

        if let Some(max) = max_size
            && buffer.len() + chunk.len() > max
        {
            return Err(Error::BodyTooLarge(max));
        }

        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer.freeze())
}

/// Immutable binary payload with an optional media type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob {
    data: Bytes,
    content_type: Option<String>,
}

impl Blob {
    pub fn new(data: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            data: data.into(),
            content_type,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub async fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.data.to_vec()).map_err(|e| Error::Stream(e.to_string()))
    }

    pub fn stream(&self) -> BodyStream {
        BodyStream::from_bytes(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_body_stream_is_one_shot() {
        let mut body = BodyStream::from_bytes("hello");
        assert!(!body.is_locked());

        let stream = body.lock().unwrap();
        assert!(body.is_locked());
        assert!(matches!(body.lock(), Err(Error::StreamLocked)));

        assert_eq!(stream_to_bytes(stream).await.unwrap(), Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_stream_to_bytes_concatenates_chunks() {
        let body = BodyStream::from_chunks(vec!["data: 1\n\n", "data: 2\n\n"]);
        let bytes = body.into_bytes().await.unwrap();
        assert_eq!(bytes, Bytes::from("data: 1\n\ndata: 2\n\n"));
    }

    #[tokio::test]
    async fn test_stream_to_bytes_limited() {
        let mut body = BodyStream::from_chunks(vec!["12345", "67890"]);
        let err = stream_to_bytes_limited(body.lock().unwrap(), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BodyTooLarge(8)));

        let mut body = BodyStream::from_chunks(vec!["12345", "67890"]);
        let bytes = stream_to_bytes_limited(body.lock().unwrap(), 10)
            .await
            .unwrap();
        assert_eq!(bytes.len(), 10);
    }

    #[tokio::test]
    async fn test_stream_error_propagates() {
        let body = BodyStream::new(stream::iter(vec![
            Ok(Bytes::from("partial")),
            Err(Error::Stream("connection reset".to_string())),
        ]));

        let err = body.into_bytes().await.unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }

    #[tokio::test]
    async fn test_blob_accessors() {
        let blob = Blob::new("png-bytes", Some("image/png".to_string()));
        assert_eq!(blob.size(), 9);
        assert_eq!(blob.content_type(), Some("image/png"));
        assert_eq!(blob.bytes().await, Bytes::from("png-bytes"));
        assert_eq!(blob.text().unwrap(), "png-bytes");
        assert_eq!(blob.stream().into_bytes().await.unwrap().len(), 9);
    }
}
