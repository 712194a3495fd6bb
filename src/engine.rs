//! The storage engine: destination resolution wired to cached container
//! clients and the transfer operations.

use async_trait::async_trait;
use tracing::info;

use crate::{
    client::ClientCache,
    credentials::Credential,
    error::EngineError,
    FileInfo,
    StorageEngine,
    StoredBlob,
    UploadedFile,
    REMOVE_OK,
};

/// Where one upload should be written, as computed by the caller's resolver.
///
/// Created fresh on every operation and discarded once it completes.
#[derive(Debug, Clone)]
pub struct Destination {
    pub credential: Credential,
    pub container_name: String,
    pub blob_path: String,
}

type DestinationFn<R> = Box<dyn Fn(&R, &FileInfo) -> Destination + Send + Sync>;

/// Builder for [`AzureBlobEngine`]. The destination resolver is mandatory;
/// [`build`](Self::build) fails without one.
pub struct AzureBlobEngineBuilder<R> {
    get_destination: Option<DestinationFn<R>>,
    reuse_connections: bool,
    connector: Option<Box<crate::client::Connector>>,
}

impl<R> AzureBlobEngineBuilder<R> {
    /// Set the resolver that decides, per file, which credential, container,
    /// and blob path to write to. The request context is passed through to
    /// it untouched.
    pub fn get_destination(
        mut self,
        f: impl Fn(&R, &FileInfo) -> Destination + Send + Sync + 'static,
    ) -> Self {
        self.get_destination = Some(Box::new(f));
        self
    }

    /// Reuse container clients across calls with the same credential and
    /// container. Off by default; fresh clients per call share no state.
    pub fn reuse_connections(mut self, reuse: bool) -> Self {
        self.reuse_connections = reuse;
        self
    }

    #[cfg(test)]
    pub(crate) fn connector(mut self, connector: Box<crate::client::Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> Result<AzureBlobEngine<R>, EngineError> {
        let get_destination = self
            .get_destination
            .ok_or_else(|| EngineError::config("a get_destination resolver is mandatory"))?;
        let cache = match self.connector {
            Some(connector) => ClientCache::with_connector(self.reuse_connections, connector),
            None => ClientCache::new(self.reuse_connections),
        };
        Ok(AzureBlobEngine {
            get_destination,
            cache,
        })
    }
}

/// Storage engine that streams uploaded files to Azure Blob Storage.
///
/// Each operation resolves its own destination and client; operations in
/// flight at the same time are independent of one another. The engine never
/// retries and never cleans up a partially written blob — transport
/// semantics are the transport's.
pub struct AzureBlobEngine<R> {
    get_destination: DestinationFn<R>,
    cache: ClientCache,
}

impl<R> std::fmt::Debug for AzureBlobEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureBlobEngine").finish_non_exhaustive()
    }
}

impl<R> AzureBlobEngine<R> {
    pub fn builder() -> AzureBlobEngineBuilder<R> {
        AzureBlobEngineBuilder {
            get_destination: None,
            reuse_connections: false,
            connector: None,
        }
    }

    /// Invoke the caller's resolver and validate what it returned. A valid
    /// destination passes through unchanged.
    fn resolve(&self, req: &R, file: &FileInfo) -> Result<Destination, EngineError> {
        validate_destination((self.get_destination)(req, file))
    }
}

fn validate_destination(dest: Destination) -> Result<Destination, EngineError> {
    if dest.container_name.trim().is_empty() {
        return Err(EngineError::config(
            "a container_name is required from get_destination",
        ));
    }
    dest.credential.validate()?;
    if dest.blob_path.trim().is_empty() {
        return Err(EngineError::config(
            "a blob path is required from get_destination",
        ));
    }
    Ok(dest)
}

#[async_trait]
impl<R: Send + Sync> StorageEngine<R> for AzureBlobEngine<R> {
    async fn handle_file(&self, req: &R, file: UploadedFile) -> Result<StoredBlob, EngineError> {
        let UploadedFile { info, stream } = file;
        let dest = self.resolve(req, &info)?;
        let client = self
            .cache
            .ensure_client(&dest.credential, &dest.container_name)?;

        let size = client
            .upload(&dest.blob_path, stream, &info.content_type)
            .await?;

        info!(
            container = %dest.container_name,
            path = %dest.blob_path,
            size,
            "stored uploaded file"
        );
        Ok(StoredBlob {
            container_name: dest.container_name,
            blob_path: dest.blob_path,
            size,
            content_type: info.content_type,
        })
    }

    async fn remove_file(&self, req: &R, file: &FileInfo) -> Result<&'static str, EngineError> {
        let dest = self.resolve(req, file)?;
        let client = self
            .cache
            .ensure_client(&dest.credential, &dest.container_name)?;

        client.remove(&dest.blob_path).await?;
        Ok(REMOVE_OK)
    }
}
