//! Gzip codec for stored sitemap payloads.

use async_compression::tokio::write::{GzipDecoder, GzipEncoder};
use bytes::Bytes;
use tokio::io::AsyncWriteExt;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether `data` starts with the gzip magic bytes.
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Compress data using gzip.
pub async fn gzip(data: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = GzipEncoder::with_quality(Vec::new(), async_compression::Level::Default);
    encoder.write_all(data).await?;
    encoder.shutdown().await?;
    Ok(Bytes::from(encoder.into_inner()))
}

/// Decompress gzip data. Input without the gzip header is returned as is,
/// so objects written uncompressed by hand are still readable.
pub async fn gunzip(data: &[u8]) -> std::io::Result<Bytes> {
    if !is_gzip(data) {
        return Ok(Bytes::copy_from_slice(data));
    }
    let mut decoder = GzipDecoder::new(Vec::new());
    decoder.write_all(data).await?;
    decoder.shutdown().await?;
    Ok(Bytes::from(decoder.into_inner()))
}

/// Decompress and decode as UTF-8.
pub async fn gunzip_to_string(data: &[u8]) -> std::io::Result<String> {
    let raw = gunzip(data).await?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gzip_output_is_decodable() {
        let xml = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?><urlset/>";
        let compressed = gzip(xml).await.unwrap();

        assert!(is_gzip(&compressed));
        assert_eq!(gunzip(&compressed).await.unwrap(), Bytes::from_static(xml));
    }

    #[tokio::test]
    async fn plain_input_passes_through() {
        let text = "<sitemapindex/>";
        assert_eq!(gunzip_to_string(text.as_bytes()).await.unwrap(), text);
    }

    #[tokio::test]
    async fn corrupt_gzip_is_an_error() {
        let mut bogus = GZIP_MAGIC.to_vec();
        bogus.extend_from_slice(b"not really gzip");
        assert!(gunzip(&bogus).await.is_err());
    }
}
