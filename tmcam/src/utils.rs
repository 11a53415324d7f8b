//! Utility functions
//!
use std::{fs::File, io::Cursor};

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::Client;

/// Download a file from a URL to a given filepath.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<std::path::Path>,
) -> Result<()> {
    let resp = client
        .get(url)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .with_context(|| format!("failed to fetch {url}"))?;

    let mut file = File::create(filepath.as_ref())
        .with_context(|| format!("failed to create {}", filepath.as_ref().display()))?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Wrap a JPEG image as one part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn jpeg_is_framed_by_boundary() {
        let item = as_jpeg_stream_item(&[0xff, 0xd8, 0xff, 0xd9]);

        assert!(item.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(item.ends_with(&[0xff, 0xd9, b'\r', b'\n', b'\r', b'\n']));
    }
}
