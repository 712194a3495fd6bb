//! Credential variants and endpoint normalization for the Azure blob service.

use std::fmt::{self, Debug, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::EngineError;

/// DNS suffix of the public Azure blob service.
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// Well-known local development storage account (Azurite / Storage Emulator).
const DEV_STORE_ACCOUNT: &str = "devstoreaccount1";
const DEV_STORE_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_STORE_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// How the engine authenticates against one storage account.
#[derive(Clone, Serialize, Deserialize)]
pub enum Credential {
    /// An Azure storage connection string
    /// (`AccountName=...;AccountKey=...;...`).
    ConnectionString(String),
    /// A storage account name (or full service endpoint URL) plus its
    /// shared access key.
    AccountKey { account: String, access_key: String },
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ConnectionString(_) => {
                f.debug_tuple("ConnectionString").field(&"<hidden>").finish()
            }
            Credential::AccountKey { account, .. } => f
                .debug_struct("AccountKey")
                .field("account", account)
                .field("access_key", &"<hidden>")
                .finish(),
        }
    }
}

impl Credential {
    /// Check that the fields needed by this variant are present.
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        match self {
            Credential::ConnectionString(raw) if raw.trim().is_empty() => Err(
                EngineError::config("a non-empty connection string is required from get_destination"),
            ),
            Credential::AccountKey { account, access_key }
                if account.trim().is_empty() || access_key.trim().is_empty() =>
            {
                Err(EngineError::config(
                    "account and access_key are required from get_destination",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Stable identity of this credential for client-cache keying.
    ///
    /// A digest rather than the raw fields, so key material does not sit in
    /// long-lived map keys.
    pub(crate) fn cache_identity(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            Credential::ConnectionString(raw) => {
                hasher.update(b"connection-string\0");
                hasher.update(raw.as_bytes());
            }
            Credential::AccountKey { account, access_key } => {
                hasher.update(b"account-key\0");
                hasher.update(account.as_bytes());
                hasher.update(b"\0");
                hasher.update(access_key.as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// Normalize this credential into the account, key, and service endpoint
    /// the transport client is built from.
    pub(crate) fn resolve(&self) -> Result<ResolvedCredential, EngineError> {
        match self {
            Credential::ConnectionString(raw) => parse_connection_string(raw),
            Credential::AccountKey { account, access_key } => {
                let (account, endpoint, allow_http) = endpoint_for_account(account)?;
                Ok(ResolvedCredential {
                    account,
                    access_key: access_key.clone(),
                    endpoint,
                    allow_http,
                })
            }
        }
    }
}

/// A credential reduced to the concrete fields the transport needs.
#[derive(Debug)]
pub(crate) struct ResolvedCredential {
    pub account: String,
    pub access_key: String,
    pub endpoint: String,
    pub allow_http: bool,
}

/// Resolve the blob service endpoint for an account identifier.
///
/// An identifier that already carries a scheme is a full endpoint URL and is
/// used verbatim, with the account name taken from its last path segment
/// (the emulator convention). A bare name gets the canonical public
/// endpoint.
fn endpoint_for_account(account: &str) -> Result<(String, String, bool), EngineError> {
    if account.contains("://") {
        let url = Url::parse(account)
            .map_err(|e| EngineError::config(format!("invalid service endpoint {account:?}: {e}")))?;
        let name = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::config(format!(
                    "cannot derive an account name from endpoint {account:?}"
                ))
            })?;
        let allow_http = url.scheme() == "http";
        Ok((name, account.to_string(), allow_http))
    } else {
        let endpoint = format!("https://{account}.blob.{DEFAULT_ENDPOINT_SUFFIX}");
        Ok((account.to_string(), endpoint, false))
    }
}

/// Parse an Azure storage connection string.
///
/// Recognizes `AccountName`, `AccountKey`, `BlobEndpoint`,
/// `DefaultEndpointsProtocol`, `EndpointSuffix`, and
/// `UseDevelopmentStorage=true`; other segments (table/queue endpoints and
/// the like) are ignored. An explicit `BlobEndpoint` wins over the
/// synthesized one.
fn parse_connection_string(raw: &str) -> Result<ResolvedCredential, EngineError> {
    let mut account = None;
    let mut access_key = None;
    let mut blob_endpoint = None;
    let mut protocol = "https";
    let mut suffix = DEFAULT_ENDPOINT_SUFFIX;
    let mut use_dev_storage = false;

    for segment in raw.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        // Split on the first '='; AccountKey values are base64 and may
        // themselves end in '='.
        let Some((key, value)) = segment.split_once('=') else {
            return Err(EngineError::config(format!(
                "malformed connection string segment {segment:?}"
            )));
        };
        match key {
            "AccountName" => account = Some(value.to_string()),
            "AccountKey" => access_key = Some(value.to_string()),
            "BlobEndpoint" => blob_endpoint = Some(value.to_string()),
            "DefaultEndpointsProtocol" => protocol = value,
            "EndpointSuffix" => suffix = value,
            "UseDevelopmentStorage" => use_dev_storage = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }

    if use_dev_storage {
        account.get_or_insert_with(|| DEV_STORE_ACCOUNT.to_string());
        access_key.get_or_insert_with(|| DEV_STORE_KEY.to_string());
        blob_endpoint.get_or_insert_with(|| DEV_STORE_BLOB_ENDPOINT.to_string());
    }

    let account = account
        .ok_or_else(|| EngineError::config("connection string is missing AccountName"))?;
    let access_key = access_key
        .ok_or_else(|| EngineError::config("connection string is missing AccountKey"))?;
    let endpoint = blob_endpoint
        .unwrap_or_else(|| format!("{protocol}://{account}.blob.{suffix}"));
    let allow_http = endpoint.starts_with("http://");

    Ok(ResolvedCredential {
        account,
        access_key,
        endpoint,
        allow_http,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_account_gets_canonical_endpoint() {
        let (account, endpoint, allow_http) = endpoint_for_account("myaccount").unwrap();
        assert_eq!(account, "myaccount");
        assert_eq!(endpoint, "https://myaccount.blob.core.windows.net");
        assert!(!allow_http);
    }

    #[test]
    fn url_account_is_used_verbatim() {
        let (account, endpoint, allow_http) =
            endpoint_for_account("http://localhost:10000/devstoreaccount1").unwrap();
        assert_eq!(account, "devstoreaccount1");
        assert_eq!(endpoint, "http://localhost:10000/devstoreaccount1");
        assert!(allow_http);
    }

    #[test]
    fn url_account_without_path_is_rejected() {
        let err = endpoint_for_account("https://localhost:10000").unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn connection_string_synthesizes_endpoint() {
        let resolved = parse_connection_string(
            "DefaultEndpointsProtocol=https;AccountName=acme;AccountKey=c2VjcmV0;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        assert_eq!(resolved.account, "acme");
        assert_eq!(resolved.access_key, "c2VjcmV0");
        assert_eq!(resolved.endpoint, "https://acme.blob.core.windows.net");
        assert!(!resolved.allow_http);
    }

    #[test]
    fn blob_endpoint_overrides_synthesis() {
        let resolved = parse_connection_string(
            "AccountName=acme;AccountKey=c2VjcmV0;BlobEndpoint=http://127.0.0.1:10000/acme",
        )
        .unwrap();
        assert_eq!(resolved.endpoint, "http://127.0.0.1:10000/acme");
        assert!(resolved.allow_http);
    }

    #[test]
    fn account_key_may_contain_padding() {
        let resolved =
            parse_connection_string("AccountName=acme;AccountKey=a2V5d2l0aHBhZGRpbmc=").unwrap();
        assert_eq!(resolved.access_key, "a2V5d2l0aHBhZGRpbmc=");
    }

    #[test]
    fn development_storage_shortcut() {
        let resolved = parse_connection_string("UseDevelopmentStorage=true").unwrap();
        assert_eq!(resolved.account, DEV_STORE_ACCOUNT);
        assert_eq!(resolved.endpoint, DEV_STORE_BLOB_ENDPOINT);
        assert!(resolved.allow_http);
    }

    #[test]
    fn missing_account_key_is_a_configuration_error() {
        let err = parse_connection_string("AccountName=acme").unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn cache_identity_is_stable_and_distinguishes_variants() {
        let conn = Credential::ConnectionString("AccountName=a;AccountKey=k".into());
        let keyed = Credential::AccountKey {
            account: "a".into(),
            access_key: "k".into(),
        };
        assert_eq!(conn.cache_identity(), conn.cache_identity());
        assert_ne!(conn.cache_identity(), keyed.cache_identity());
    }

    #[test]
    fn debug_never_prints_key_material() {
        let keyed = Credential::AccountKey {
            account: "acme".into(),
            access_key: "supersecret".into(),
        };
        let rendered = format!("{keyed:?}");
        assert!(rendered.contains("acme"));
        assert!(!rendered.contains("supersecret"));
    }
}
