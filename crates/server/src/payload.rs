//! Reading and writing compressed XML payloads.

use crate::compression::{gunzip_to_string, gzip};
use crate::error::AssembleResult;
use bytes::Bytes;
use sitemaps_storage::{ObjectStore, PutOptions, StorageError};

/// Download and decompress `key`. A missing object yields `None`.
pub async fn load_xml(storage: &dyn ObjectStore, key: &str) -> AssembleResult<Option<String>> {
    let raw = match storage.get(key).await {
        Ok(raw) => raw,
        Err(StorageError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(gunzip_to_string(&raw).await?))
}

/// Compress and upload `xml` to `key`, replacing any existing object.
pub async fn store_xml(storage: &dyn ObjectStore, key: &str, xml: &str) -> AssembleResult<()> {
    let body = gzip(xml.as_bytes()).await?;
    storage.put(key, body, &PutOptions::gzip_xml()).await?;
    Ok(())
}

/// Download a plain-text object. A missing object yields `None`.
pub async fn load_text(storage: &dyn ObjectStore, key: &str) -> AssembleResult<Option<String>> {
    match storage.get(key).await {
        Ok(raw) => Ok(Some(String::from_utf8_lossy(&raw).into_owned())),
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Upload a plain-text object.
pub async fn store_text(storage: &dyn ObjectStore, key: &str, text: String) -> AssembleResult<()> {
    storage
        .put(key, Bytes::from(text), &PutOptions::plain_text())
        .await?;
    Ok(())
}
