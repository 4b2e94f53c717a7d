mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use bytes::{Bytes, BytesMut};
use reqwest::Url;
use tracing::debug;

use crate::error::FetchError;

/// Maximum accepted size of a realtime feed body (50 MB).
pub const MAX_FEED_SIZE: u64 = 50 * 1024 * 1024;

/// GETs `url` through `client` and buffers the whole body.
///
/// Non-2xx responses and bodies larger than `max_size` are errors; the
/// timeout budget is whatever the underlying client was built with.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &Url,
    max_size: u64,
) -> Result<Bytes, FetchError> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.clone());

    let mut resp = client
        .execute(req)
        .await
        .map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status,
        });
    }

    if let Some(size) = resp.content_length().filter(|len| *len > max_size) {
        return Err(FetchError::TooLarge {
            url: url.to_string(),
            size,
            max: max_size,
        });
    }

    // Content-Length may be absent or wrong; enforce the cap while reading.
    let mut body = BytesMut::new();
    while let Some(chunk) = resp.chunk().await.map_err(|source| FetchError::Request {
        url: url.to_string(),
        source,
    })? {
        let size = (body.len() + chunk.len()) as u64;
        if size > max_size {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                size,
                max: max_size,
            });
        }
        body.extend_from_slice(&chunk);
    }
    let body = body.freeze();

    debug!(url = %url, bytes = body.len(), "Fetched response body");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers one request with `body` and no Content-Length, closing the
    /// connection to mark the end of the body.
    async fn serve_unsized(body: Vec<u8>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n")
                .await;
            let _ = socket.write_all(&body).await;
            let _ = socket.shutdown().await;
        });
        Url::parse(&format!("http://{addr}/feed")).unwrap()
    }

    #[tokio::test]
    async fn test_unsized_body_over_cap_is_rejected() {
        let url = serve_unsized(vec![7u8; 4096]).await;
        let client = BasicClient::new(Duration::from_secs(5)).unwrap();

        let result = fetch_bytes(&client, &url, 1024).await;

        assert!(matches!(result, Err(FetchError::TooLarge { max: 1024, .. })));
    }

    #[tokio::test]
    async fn test_unsized_body_under_cap_is_returned() {
        let url = serve_unsized(b"hello".to_vec()).await;
        let client = BasicClient::new(Duration::from_secs(5)).unwrap();

        let body = fetch_bytes(&client, &url, 1024).await.unwrap();

        assert_eq!(&body[..], b"hello");
    }
}
