//! Container clients and the connection cache.

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use object_store::{
    azure::MicrosoftAzureBuilder,
    path::Path,
    Attribute,
    Attributes,
    ObjectStore,
    PutMultipartOpts,
    WriteMultipart,
};
use tracing::debug;

use crate::{credentials::Credential, error::EngineError, ByteStream};

/// A connection to one container under one credential.
pub(crate) struct ContainerClient {
    store: Arc<dyn ObjectStore>,
    container_name: String,
}

impl ContainerClient {
    /// Build a client from a credential, normalizing the service endpoint.
    fn connect(credential: &Credential, container_name: &str) -> Result<Self, EngineError> {
        let resolved = credential.resolve()?;
        debug!(
            account = %resolved.account,
            endpoint = %resolved.endpoint,
            container = container_name,
            "building azure container client"
        );
        let store = MicrosoftAzureBuilder::new()
            .with_account(resolved.account)
            .with_access_key(resolved.access_key)
            .with_container_name(container_name)
            .with_endpoint(resolved.endpoint)
            .with_allow_http(resolved.allow_http)
            .build()
            .map_err(|e| EngineError::config(format!("failed to build azure client: {e}")))?;
        Ok(ContainerClient {
            store: Arc::new(store),
            container_name: container_name.to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_store(store: Arc<dyn ObjectStore>, container_name: &str) -> Self {
        ContainerClient {
            store,
            container_name: container_name.to_string(),
        }
    }

    pub(crate) fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Stream bytes to the blob at `blob_path`, recording `content_type` on
    /// the blob. Returns the number of bytes written.
    ///
    /// Chunks are handed to the transport as they arrive; backpressure comes
    /// from the multipart writer, so the whole file is never buffered here.
    pub(crate) async fn upload(
        &self,
        blob_path: &str,
        mut stream: ByteStream,
        content_type: &str,
    ) -> Result<u64, EngineError> {
        let path = Path::from(blob_path);
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let upload = self
            .store
            .put_multipart_opts(
                &path,
                PutMultipartOpts {
                    attributes,
                    ..Default::default()
                },
            )
            .await?;

        let mut writer = WriteMultipart::new(upload);
        let mut size_bytes: u64 = 0;
        while let Some(chunk) = stream.next().await {
            writer.wait_for_capacity(1).await?;
            let chunk = chunk.map_err(EngineError::Stream)?;
            size_bytes += chunk.len() as u64;
            writer.write(&chunk);
        }
        writer.finish().await?;

        debug!(
            container = %self.container_name,
            path = blob_path,
            size_bytes,
            "uploaded blob"
        );
        Ok(size_bytes)
    }

    /// Delete the blob at `blob_path`. Transport failures, including
    /// not-found, pass through unmodified.
    pub(crate) async fn remove(&self, blob_path: &str) -> Result<(), EngineError> {
        self.store.delete(&Path::from(blob_path)).await?;
        debug!(container = %self.container_name, path = blob_path, "removed blob");
        Ok(())
    }
}

pub(crate) type Connector =
    dyn Fn(&Credential, &str) -> Result<ContainerClient, EngineError> + Send + Sync;

/// Hands out container clients, reusing them across calls when enabled.
///
/// Owned by the engine instance; nothing here is process-global. Entries are
/// never evicted — the key space is bounded by the credential/container
/// pairs the application uses, not by request volume.
pub(crate) struct ClientCache {
    reuse_connections: bool,
    connector: Box<Connector>,
    clients: DashMap<String, Arc<ContainerClient>>,
}

impl ClientCache {
    pub(crate) fn new(reuse_connections: bool) -> Self {
        Self::with_connector(reuse_connections, Box::new(ContainerClient::connect))
    }

    pub(crate) fn with_connector(reuse_connections: bool, connector: Box<Connector>) -> Self {
        ClientCache {
            reuse_connections,
            connector,
            clients: DashMap::new(),
        }
    }

    /// Return a client for the given credential and container.
    ///
    /// With reuse disabled every call connects fresh. With reuse enabled,
    /// two concurrent first-time calls for the same key may both connect;
    /// the last insert wins and the earlier client is dropped with its
    /// holder. Connecting is local setup only, so the race is benign.
    pub(crate) fn ensure_client(
        &self,
        credential: &Credential,
        container_name: &str,
    ) -> Result<Arc<ContainerClient>, EngineError> {
        if !self.reuse_connections {
            return Ok(Arc::new((self.connector)(credential, container_name)?));
        }

        let key = format!("{}/{}", credential.cache_identity(), container_name);
        if let Some(existing) = self.clients.get(&key) {
            return Ok(Arc::clone(&existing));
        }
        let client = Arc::new((self.connector)(credential, container_name)?);
        self.clients.insert(key, Arc::clone(&client));
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::stream;
    use object_store::memory::InMemory;

    use super::*;

    fn test_credential() -> Credential {
        Credential::AccountKey {
            account: "acme".into(),
            access_key: "c2VjcmV0a2V5MTIz".into(),
        }
    }

    fn memory_client() -> (Arc<InMemory>, ContainerClient) {
        let store = Arc::new(InMemory::new());
        let client = ContainerClient::from_store(store.clone(), "uploads");
        (store, client)
    }

    #[tokio::test]
    async fn upload_streams_all_chunks_and_sets_content_type() {
        let (store, client) = memory_client();
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"blob")),
        ]);

        let size = client
            .upload("dummy/photo.jpg", Box::pin(chunks), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(size, 10);

        let got = store.get(&Path::from("dummy/photo.jpg")).await.unwrap();
        assert_eq!(
            got.attributes.get(&Attribute::ContentType),
            Some(&object_store::AttributeValue::from("image/jpeg"))
        );
        let body = got.bytes().await.unwrap();
        assert_eq!(body.as_ref(), b"hello blob");
    }

    #[tokio::test]
    async fn failing_source_stream_surfaces_as_stream_error() {
        let (_store, client) = memory_client();
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(anyhow::anyhow!("connection reset by peer")),
        ]);

        let err = client
            .upload("dummy/broken.bin", Box::pin(chunks), "application/octet-stream")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Stream(_)));
    }

    #[tokio::test]
    async fn remove_deletes_the_blob() {
        let (store, client) = memory_client();
        store
            .put(&Path::from("old/report.pdf"), Bytes::from_static(b"x").into())
            .await
            .unwrap();

        client.remove("old/report.pdf").await.unwrap();
        assert!(store.get(&Path::from("old/report.pdf")).await.is_err());
    }

    #[tokio::test]
    async fn remove_of_missing_blob_surfaces_not_found() {
        let (_store, client) = memory_client();
        let err = client.remove("never/there").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn reuse_enabled_returns_the_same_client() {
        let cache = ClientCache::new(true);
        let credential = test_credential();
        let a = cache.ensure_client(&credential, "uploads").unwrap();
        let b = cache.ensure_client(&credential, "uploads").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn reuse_disabled_connects_fresh_every_call() {
        let cache = ClientCache::new(false);
        let credential = test_credential();
        let a = cache.ensure_client(&credential, "uploads").unwrap();
        let b = cache.ensure_client(&credential, "uploads").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_containers_get_distinct_clients() {
        let cache = ClientCache::new(true);
        let credential = test_credential();
        let a = cache.ensure_client(&credential, "uploads").unwrap();
        let b = cache.ensure_client(&credential, "avatars").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.container_name(), "uploads");
        assert_eq!(b.container_name(), "avatars");
    }

    #[test]
    fn distinct_credentials_get_distinct_clients() {
        let cache = ClientCache::new(true);
        let a = cache.ensure_client(&test_credential(), "uploads").unwrap();
        let other = Credential::AccountKey {
            account: "globex".into(),
            access_key: "c2VjcmV0a2V5MTIz".into(),
        };
        let b = cache.ensure_client(&other, "uploads").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
