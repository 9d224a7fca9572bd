//! Document library (SharePoint Online REST API).
//!
//! Requests carry an app-only bearer token obtained with the client
//! credentials grant and cached until shortly before it expires. Paths are
//! server relative, e.g. `/sites/reports/Shared Documents/2024`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::{StorageError, ensure_success};

const SERVICE: &str = "document library";
const LOGIN_AUTHORITY: &str = "https://login.microsoftonline.com";
const ACCEPT_JSON: &str = "application/json;odata=nometadata";

/// Tokens are renewed this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// A file or folder as returned by the library.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LibraryItem {
    pub name: String,
    pub server_relative_url: String,
}

/// Direct children of one folder.
#[derive(Debug, Default)]
pub struct FolderListing {
    pub files: Vec<LibraryItem>,
    pub folders: Vec<LibraryItem>,
}

/// Operations on a document library.
#[async_trait]
pub trait DocumentLibrary: Send + Sync {
    /// Files and sub-folders directly inside `folder`.
    async fn list_folder(&self, folder: &str) -> Result<FolderListing, StorageError>;

    async fn folder_exists(&self, folder: &str) -> Result<bool, StorageError>;

    /// Create `folder`. Its parent must already exist.
    async fn create_folder(&self, folder: &str) -> Result<(), StorageError>;

    /// Store `data` as `folder/file_name`, replacing an existing file.
    async fn upload(
        &self,
        folder: &str,
        file_name: &str,
        data: Bytes,
    ) -> Result<LibraryItem, StorageError>;

    /// Content of the file at `file_path`, or `None` if there is no such file.
    async fn download(&self, file_path: &str) -> Result<Option<Bytes>, StorageError>;

    /// Scheme and host that server relative paths are resolved against.
    fn domain(&self) -> &str;
}

/// Application registration used to authenticate against the tenant.
#[derive(Debug, Clone)]
pub struct LibraryCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FolderState {
    exists: bool,
}

/// SharePoint site client.
#[derive(Debug)]
pub struct SharepointLibrary {
    http: reqwest::Client,
    site_url: Url,
    domain: String,
    credentials: LibraryCredentials,
    token: Mutex<Option<(String, Instant)>>,
}

impl SharepointLibrary {
    /// `site_url` is the site root, e.g. `https://contoso.sharepoint.com/sites/reports`.
    pub fn new(site_url: &str, credentials: LibraryCredentials) -> Result<Self, StorageError> {
        let site_url = Url::parse(&format!("{}/", site_url.trim_end_matches('/')))
            .map_err(|e| StorageError::Credentials(format!("invalid site url: {}", e)))?;
        let domain = site_url.origin().ascii_serialization();

        Ok(Self {
            http: reqwest::Client::new(),
            site_url,
            domain,
            credentials,
            token: Mutex::new(None),
        })
    }

    fn api_url(&self, call: &str) -> Result<Url, StorageError> {
        self.site_url
            .join(&format!("_api/web/{}", call))
            .map_err(|e| StorageError::InvalidName(format!("invalid library path: {}", e)))
    }

    fn cached_token(&self) -> Option<String> {
        let cached = self.token.lock().ok()?;
        cached
            .as_ref()
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(token, _)| token.clone())
    }

    async fn access_token(&self) -> Result<String, StorageError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let host = self.site_url.host_str().unwrap_or_default();
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("client_secret", &self.credentials.client_secret)
            .append_pair("scope", &format!("https://{}/.default", host))
            .finish();

        let response = self
            .http
            .post(format!(
                "{}/{}/oauth2/v2.0/token",
                LOGIN_AUTHORITY, self.credentials.tenant_id
            ))
            .header("content-type", "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await?;
        let token = ensure_success(SERVICE, response)
            .await?
            .json::<TokenResponse>()
            .await?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        if let Ok(mut cached) = self.token.lock() {
            *cached = Some((token.access_token.clone(), Instant::now() + lifetime));
        }

        Ok(token.access_token)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, StorageError> {
        let token = self.access_token().await?;
        Ok(self
            .http
            .get(url)
            .bearer_auth(token)
            .header("accept", ACCEPT_JSON)
            .send()
            .await?)
    }

    async fn post(&self, url: Url, body: Bytes) -> Result<reqwest::Response, StorageError> {
        let token = self.access_token().await?;
        Ok(self
            .http
            .post(url)
            .bearer_auth(token)
            .header("accept", ACCEPT_JSON)
            .body(body)
            .send()
            .await?)
    }

    async fn children(&self, folder: &str, kind: &str) -> Result<Vec<LibraryItem>, StorageError> {
        let url = self.api_url(&format!(
            "GetFolderByServerRelativePath(decodedurl='{}')/{}?$select=Name,ServerRelativeUrl",
            path_literal(folder),
            kind
        ))?;
        let response = ensure_success(SERVICE, self.get(url).await?).await?;

        Ok(response.json::<Collection<LibraryItem>>().await?.value)
    }
}

#[async_trait]
impl DocumentLibrary for SharepointLibrary {
    async fn list_folder(&self, folder: &str) -> Result<FolderListing, StorageError> {
        Ok(FolderListing {
            files: self.children(folder, "Files").await?,
            folders: self.children(folder, "Folders").await?,
        })
    }

    async fn folder_exists(&self, folder: &str) -> Result<bool, StorageError> {
        let url = self.api_url(&format!(
            "GetFolderByServerRelativePath(decodedurl='{}')?$select=Exists",
            path_literal(folder)
        ))?;
        let response = self.get(url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        let response = ensure_success(SERVICE, response).await?;
        Ok(response.json::<FolderState>().await?.exists)
    }

    async fn create_folder(&self, folder: &str) -> Result<(), StorageError> {
        let url = self.api_url(&format!(
            "folders/AddUsingPath(decodedurl='{}')",
            path_literal(folder)
        ))?;
        ensure_success(SERVICE, self.post(url, Bytes::new()).await?).await?;

        tracing::debug!("Created library folder {}", folder);
        Ok(())
    }

    async fn upload(
        &self,
        folder: &str,
        file_name: &str,
        data: Bytes,
    ) -> Result<LibraryItem, StorageError> {
        let url = self.api_url(&format!(
            "GetFolderByServerRelativePath(decodedurl='{}')/Files/AddUsingPath(decodedurl='{}',overwrite=true)",
            path_literal(folder),
            path_literal(file_name)
        ))?;
        let response = ensure_success(SERVICE, self.post(url, data).await?).await?;

        Ok(response.json::<LibraryItem>().await?)
    }

    async fn download(&self, file_path: &str) -> Result<Option<Bytes>, StorageError> {
        let url = self.api_url(&format!(
            "GetFileByServerRelativePath(decodedurl='{}')/$value",
            path_literal(file_path)
        ))?;
        let response = self.get(url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = ensure_success(SERVICE, response).await?;
        Ok(Some(response.bytes().await?))
    }

    fn domain(&self) -> &str {
        &self.domain
    }
}

/// Quote a path as an OData string literal inside a URL.
///
/// Quotes are doubled; `%`, `#` and `?` are escaped so they reach the
/// service as part of the path instead of ending it.
fn path_literal(path: &str) -> String {
    path.replace('\'', "''")
        .replace('%', "%25")
        .replace('#', "%23")
        .replace('?', "%3F")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> SharepointLibrary {
        SharepointLibrary::new(
            "https://contoso.sharepoint.com/sites/reports/",
            LibraryCredentials {
                tenant_id: "tenant".to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn api_urls_are_relative_to_the_site() {
        let library = library();
        let url = library
            .api_url(&format!(
                "GetFolderByServerRelativePath(decodedurl='{}')/Files",
                path_literal("/sites/reports/Shared Documents/Q1")
            ))
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://contoso.sharepoint.com/sites/reports/_api/web/GetFolderByServerRelativePath(decodedurl='/sites/reports/Shared%20Documents/Q1')/Files"
        );
        assert_eq!(library.domain(), "https://contoso.sharepoint.com");
    }

    #[test]
    fn path_literals_escape_quotes_and_url_delimiters() {
        assert_eq!(path_literal("/Shared/O'Brien #1?.pdf"), "/Shared/O''Brien %231%3F.pdf");
        assert_eq!(path_literal("100%.xlsx"), "100%25.xlsx");
    }

    #[test]
    fn expired_tokens_are_not_reused() {
        let library = library();
        assert_eq!(library.cached_token(), None);

        *library.token.lock().unwrap() = Some(("fresh".to_string(), Instant::now() + TOKEN_EXPIRY_MARGIN));
        assert_eq!(library.cached_token(), Some("fresh".to_string()));

        *library.token.lock().unwrap() = Some(("stale".to_string(), Instant::now()));
        assert_eq!(library.cached_token(), None);
    }

    #[test]
    fn listings_deserialize_from_nometadata_json() {
        let body = r#"{"value":[{"Name":"q1.xlsx","ServerRelativeUrl":"/sites/reports/Shared Documents/q1.xlsx","Length":"42"}]}"#;
        let listing: Collection<LibraryItem> = serde_json::from_str(body).unwrap();

        assert_eq!(
            listing.value,
            vec![LibraryItem {
                name: "q1.xlsx".to_string(),
                server_relative_url: "/sites/reports/Shared Documents/q1.xlsx".to_string(),
            }]
        );
    }
}
