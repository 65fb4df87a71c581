//! Remote ID-addressed provider
//!
//! Resolves a 3-part identifier (internal provider tag, resource id,
//! sub-path) against a metadata API, then performs data-plane operations
//! keyed by the opaque id the resolution returned. Renames and moves do
//! not change an entity's id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::RANGE;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::json;

use crate::config::{RemoteSection, TransferSection};
use crate::item::{Item, ItemKind};
use crate::path::ItemPath;
use crate::streams::{into_stream, BoxByteStream, MeteredStreamReader, ResponseStreamReader};
use crate::{Error, Result};

use super::{
    build_range_header, resolve_upload_name, translate_status, ByteRange, ConflictPolicy,
    StorageProvider, Throttle, UploadDisposition,
};

pub struct RemoteProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
    throttle: Arc<Throttle>,
}

#[derive(Deserialize)]
struct MetadataDocument {
    data: MetadataEntry,
}

#[derive(Deserialize)]
struct ListingDocument {
    data: Vec<MetadataEntry>,
}

#[derive(Deserialize)]
struct MetadataEntry {
    attributes: EntryAttributes,
}

#[derive(Deserialize)]
struct EntryAttributes {
    name: String,
    kind: String,
    /// Opaque id used for data-plane calls.
    path: String,
    #[serde(default)]
    materialized: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified: Option<String>,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    etag: Option<String>,
}

impl RemoteProvider {
    pub fn new(section: &RemoteSection, transfer: &TransferSection) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: section.base_url.trim_end_matches('/').to_string(),
            token: section.token.clone(),
            throttle: Arc::new(Throttle::new(
                transfer.throttle_concurrency,
                Duration::from_millis(transfer.throttle_interval_ms),
            )),
        })
    }

    fn data_url(&self, internal: &str, resource: &str, id: &str) -> String {
        format!(
            "{}/{}/providers/{}/{}",
            self.base_url,
            resource,
            internal,
            id.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Issue a throttled request, translating unexpected statuses into the
    /// gateway taxonomy.
    async fn send(
        &self,
        request: RequestBuilder,
        context: &str,
        expects: &[u16],
    ) -> Result<reqwest::Response> {
        self.throttle.acquire().await;
        let response = request.send().await?;
        let status = response.status().as_u16();
        if expects.contains(&status) {
            return Ok(response);
        }
        let message = response.text().await.ok().filter(|text| !text.is_empty());
        Err(translate_status(status, context, message))
    }

    fn scope<'a>(&self, item: &'a Item) -> Result<(&'a str, &'a str)> {
        match item.extra_segments.as_slice() {
            [internal, resource, ..] => Ok((internal, resource)),
            _ => Err(Error::internal("remote item is missing its scope segments")),
        }
    }

    fn item_url(&self, item: &Item) -> Result<String> {
        let (internal, resource) = self.scope(item)?;
        Ok(self.data_url(internal, resource, &item.id))
    }

    fn to_item(&self, attrs: EntryAttributes, internal: &str, resource: &str) -> Result<Item> {
        let is_folder = attrs.kind == "folder";
        let materialized = attrs.materialized.unwrap_or_else(|| {
            let suffix = if is_folder { "/" } else { "" };
            format!("/{}{}", attrs.name, suffix)
        });
        Ok(Item {
            provider: "remote".to_string(),
            kind: if is_folder {
                ItemKind::Folder
            } else {
                ItemKind::File
            },
            id: attrs.path,
            path: ItemPath::new(materialized)?,
            size: attrs.size.filter(|_| !is_folder),
            modified: parse_timestamp(attrs.modified.as_deref()),
            created: parse_timestamp(attrs.created.as_deref()),
            etag: attrs.etag.unwrap_or_default(),
            extra_segments: vec![internal.to_string(), resource.to_string()],
        })
    }

    fn root_item(&self, internal: &str, resource: &str) -> Item {
        Item {
            provider: "remote".to_string(),
            kind: ItemKind::Folder,
            id: "/".to_string(),
            path: ItemPath::root(),
            size: None,
            modified: None,
            created: None,
            etag: String::new(),
            extra_segments: vec![internal.to_string(), resource.to_string()],
        }
    }
}

#[async_trait]
impl StorageProvider for RemoteProvider {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn validate_item(&self, identifier: &str) -> Result<Item> {
        let segments: Vec<&str> = identifier.split('/').filter(|s| !s.is_empty()).collect();
        let [internal, resource, rest @ ..] = segments.as_slice() else {
            return Err(Error::invalid_path(
                "remote identifiers are /<provider>/<resource>/<path>",
            ));
        };

        if rest.is_empty() {
            return Ok(self.root_item(internal, resource));
        }

        let mut id = rest.join("/");
        if identifier.ends_with('/') {
            id.push('/');
        }
        let url = format!("{}?meta=", self.data_url(internal, resource, &id));
        let response = self
            .send(self.request(Method::GET, &url), identifier, &[200])
            .await?;
        let document: MetadataDocument = response.json().await?;
        self.to_item(document.data.attributes, internal, resource)
    }

    async fn metadata(&self, item: &Item, _version: Option<&str>) -> Result<Item> {
        if item.is_root() {
            return Ok(item.clone());
        }
        let (internal, resource) = self.scope(item)?;
        let url = format!("{}?meta=", self.item_url(item)?);
        let response = self
            .send(self.request(Method::GET, &url), item.path.as_str(), &[200])
            .await?;
        let document: MetadataDocument = response.json().await?;
        self.to_item(document.data.attributes, internal, resource)
    }

    async fn children(&self, item: &Item) -> Result<Vec<Item>> {
        if !item.is_folder() {
            return Err(Error::invalid_path(
                "only folders can be queried for children",
            ));
        }
        let (internal, resource) = self.scope(item)?;
        let url = format!("{}?children=", self.item_url(item)?);
        let response = self
            .send(self.request(Method::GET, &url), item.path.as_str(), &[200])
            .await?;
        let listing: ListingDocument = response.json().await?;
        listing
            .data
            .into_iter()
            .map(|entry| self.to_item(entry.attributes, internal, resource))
            .collect()
    }

    async fn download(
        &self,
        item: &Item,
        range: Option<ByteRange>,
        version: Option<&str>,
    ) -> Result<BoxByteStream> {
        if !item.is_file() {
            return Err(Error::invalid_path("cannot download a folder"));
        }
        let mut url = self.item_url(item)?;
        if let Some(version) = version {
            url.push_str(&format!("?version={version}"));
        }
        let mut request = self.request(Method::GET, &url);
        if let Some(range) = range {
            request = request.header(RANGE, build_range_header(range));
        }
        let response = self.send(request, item.path.as_str(), &[200, 206]).await?;
        Ok(Box::new(ResponseStreamReader::new(response)))
    }

    async fn upload(
        &self,
        item: &Item,
        stream: BoxByteStream,
        new_name: &str,
        conflict: ConflictPolicy,
    ) -> Result<Item> {
        if !item.is_folder() {
            return Err(Error::invalid_path("can only upload into a folder"));
        }
        let (internal, resource) = self.scope(item)?;
        let metered = MeteredStreamReader::upload(stream, item.path.as_str());
        let body = reqwest::Body::wrap_stream(into_stream(Box::new(metered)));

        let url = match resolve_upload_name(self, item, new_name, conflict).await? {
            UploadDisposition::Write(name) => {
                format!("{}?name={}&kind=file", self.item_url(item)?, name)
            }
            // Versioned backends accept a PUT against the existing entity.
            UploadDisposition::NewVersion(existing) => {
                format!("{}?kind=file", self.item_url(&existing)?)
            }
        };

        let response = self
            .send(
                self.request(Method::PUT, &url).body(body),
                item.path.as_str(),
                &[200, 201],
            )
            .await?;
        let document: MetadataDocument = response.json().await?;
        self.to_item(document.data.attributes, internal, resource)
    }

    async fn delete(&self, item: &Item) -> Result<()> {
        if item.is_root() {
            return Err(Error::invalid_path("cannot delete the resource root"));
        }
        let url = self.item_url(item)?;
        self.send(
            self.request(Method::DELETE, &url),
            item.path.as_str(),
            &[200, 204],
        )
        .await?;
        Ok(())
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item> {
        let (internal, resource) = self.scope(item)?;
        let url = self.item_url(item)?;
        let response = self
            .send(
                self.request(Method::POST, &url)
                    .json(&json!({ "action": "rename", "rename": new_name })),
                item.path.as_str(),
                &[200, 201],
            )
            .await?;
        let document: MetadataDocument = response.json().await?;
        self.to_item(document.data.attributes, internal, resource)
    }

    async fn create_folder(&self, item: &Item, new_name: &str) -> Result<Item> {
        if !item.is_folder() {
            return Err(Error::invalid_path(
                "can only create a folder inside a folder",
            ));
        }
        let (internal, resource) = self.scope(item)?;
        let url = format!("{}?name={}&kind=folder", self.item_url(item)?, new_name);
        let response = self
            .send(
                self.request(Method::PUT, &url),
                item.path.as_str(),
                &[200, 201],
            )
            .await?;
        let document: MetadataDocument = response.json().await?;
        self.to_item(document.data.attributes, internal, resource)
    }

    async fn parent(&self, item: &Item) -> Result<Item> {
        let Some(parent) = item.path.parent() else {
            return Ok(item.clone());
        };
        let (internal, resource) = self.scope(item)?;
        self.validate_item(&format!("/{}/{}{}", internal, resource, parent.as_str()))
            .await
    }

    async fn versions(&self, item: &Item) -> Result<Vec<Item>> {
        if !item.is_file() {
            return Err(Error::invalid_path("folders have no versions"));
        }
        let (internal, resource) = self.scope(item)?;
        let url = format!("{}?versions=", self.item_url(item)?);
        let response = self
            .send(self.request(Method::GET, &url), item.path.as_str(), &[200])
            .await?;
        let listing: ListingDocument = response.json().await?;
        listing
            .data
            .into_iter()
            .map(|entry| self.to_item(entry.attributes, internal, resource))
            .collect()
    }

    fn supports_new_version(&self) -> bool {
        true
    }

    fn can_intra_copy(&self, other: &dyn StorageProvider) -> bool {
        other.name() == self.name()
    }

    fn can_intra_move(&self, other: &dyn StorageProvider) -> bool {
        other.name() == self.name()
    }

    async fn intra_copy(
        &self,
        item: &Item,
        dest_folder: &Item,
        _dest: &dyn StorageProvider,
    ) -> Result<Item> {
        let (internal, resource) = self.scope(item)?;
        let (_, dest_resource) = self.scope(dest_folder)?;
        let url = self.item_url(item)?;
        let response = self
            .send(
                self.request(Method::POST, &url).json(&json!({
                    "action": "copy",
                    "path": dest_folder.id,
                    "resource": dest_resource,
                })),
                item.path.as_str(),
                &[200, 201],
            )
            .await?;
        let document: MetadataDocument = response.json().await?;
        self.to_item(document.data.attributes, internal, resource)
    }
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{collect, MemoryStream};

    fn provider_for(server: &mockito::ServerGuard) -> RemoteProvider {
        RemoteProvider::new(
            &RemoteSection {
                base_url: server.url(),
                token: Some("secret".to_string()),
            },
            &TransferSection::default(),
        )
        .unwrap()
    }

    fn file_attrs(name: &str, id: &str, materialized: &str, size: u64) -> serde_json::Value {
        json!({
            "attributes": {
                "name": name,
                "kind": "file",
                "path": id,
                "materialized": materialized,
                "size": size,
                "modified": "2024-03-01T12:00:00Z",
                "etag": "v1",
            }
        })
    }

    #[tokio::test]
    async fn test_validate_item_resolves_metadata() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/res1/providers/osfstorage/abc123")
            .match_query(mockito::Matcher::Any)
            .match_header("authorization", "Bearer secret")
            .with_body(json!({ "data": file_attrs("a.txt", "abc123", "/a.txt", 5) }).to_string())
            .create_async()
            .await;

        let provider = provider_for(&server);
        let item = provider
            .validate_item("/osfstorage/res1/abc123")
            .await
            .unwrap();
        mock.assert_async().await;

        assert_eq!(item.id, "abc123");
        assert_eq!(item.path.as_str(), "/a.txt");
        assert_eq!(item.size, Some(5));
        assert_eq!(item.extra_segments, vec!["osfstorage", "res1"]);
    }

    #[tokio::test]
    async fn test_validate_item_rejects_short_identifiers() {
        let server = mockito::Server::new_async().await;
        let provider = provider_for(&server);
        assert!(matches!(
            provider.validate_item("/osfstorage").await,
            Err(Error::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_root_identifier_needs_no_request() {
        let server = mockito::Server::new_async().await;
        let provider = provider_for(&server);
        let root = provider
            .validate_item("/osfstorage/res1/")
            .await
            .unwrap();
        assert!(root.is_root());
        assert!(root.is_folder());
    }

    #[tokio::test]
    async fn test_backend_statuses_are_translated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/res1/providers/osfstorage/gone")
            .match_query(mockito::Matcher::Any)
            .with_status(410)
            .create_async()
            .await;
        server
            .mock("GET", "/res1/providers/osfstorage/missing")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let provider = provider_for(&server);
        assert!(matches!(
            provider.validate_item("/osfstorage/res1/gone").await,
            Err(Error::Gone(_))
        ));
        assert!(matches!(
            provider.validate_item("/osfstorage/res1/missing").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_children_listing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/res1/providers/osfstorage/")
            .match_query(mockito::Matcher::Any)
            .with_body(
                json!({ "data": [
                    file_attrs("a.txt", "id-a", "/a.txt", 1),
                    { "attributes": { "name": "docs", "kind": "folder", "path": "id-docs", "materialized": "/docs/" } },
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let provider = provider_for(&server);
        let root = provider.validate_item("/osfstorage/res1/").await.unwrap();
        let children = provider.children(&root).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children[0].is_file());
        assert!(children[1].is_folder());
        assert_eq!(children[1].path.as_str(), "/docs/");
    }

    #[tokio::test]
    async fn test_download_streams_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/res1/providers/osfstorage/id-a")
            .with_body("hello")
            .create_async()
            .await;

        let provider = provider_for(&server);
        let root = provider.validate_item("/osfstorage/res1/").await.unwrap();
        let item = Item {
            kind: ItemKind::File,
            id: "id-a".to_string(),
            path: ItemPath::new("/a.txt").unwrap(),
            ..root
        };
        let stream = provider.download(&item, None, None).await.unwrap();
        let data = collect(stream).await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn test_upload_into_empty_folder() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/res1/providers/osfstorage/")
            .match_query(mockito::Matcher::UrlEncoded("children".into(), "".into()))
            .with_body(json!({ "data": [] }).to_string())
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/res1/providers/osfstorage/")
            .match_query(mockito::Matcher::Any)
            .with_status(201)
            .with_body(
                json!({ "data": file_attrs("test.txt", "id-new", "/test.txt", 5) }).to_string(),
            )
            .create_async()
            .await;

        let provider = provider_for(&server);
        let root = provider.validate_item("/osfstorage/res1/").await.unwrap();
        let item = provider
            .upload(
                &root,
                Box::new(MemoryStream::new(&b"hello"[..])),
                "test.txt",
                ConflictPolicy::Warn,
            )
            .await
            .unwrap();
        put.assert_async().await;
        assert_eq!(item.id, "id-new");
        assert_eq!(item.size, Some(5));
    }
}
