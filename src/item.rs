//! Item model
//!
//! An [`Item`] is the resolved identity + metadata record for one file or
//! folder at one provider. Providers construct Items; callers only read
//! them or pass them back into provider methods.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::path::{split_name, ItemPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// Metadata record for one file or folder at one provider.
#[derive(Debug, Clone)]
pub struct Item {
    /// Provider tag, e.g. `filesystem`.
    pub provider: String,
    pub kind: ItemKind,
    /// Provider-assigned identifier used for subsequent calls. Equals the
    /// path for path-addressed backends.
    pub id: String,
    /// Materialized human path. Folders end with `/`.
    pub path: ItemPath,
    /// Bytes; None for folders.
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    /// Opaque change token from the backend.
    pub etag: String,
    /// Extra link segments between the provider tag and the path, used by
    /// ID-addressed backends (internal provider, resource).
    pub extra_segments: Vec<String>,
}

impl Item {
    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }

    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    /// Display name: the final path segment, or a synthetic root name.
    pub fn name(&self) -> String {
        if self.is_root() {
            format!("{} root", self.provider)
        } else {
            self.path.name().to_string()
        }
    }

    /// Mimetype derived from the name's extension.
    pub fn mimetype(&self) -> Option<&'static str> {
        let (_, ext) = split_name(self.path.name());
        mimetype_for(ext)
    }

    /// Public etag: sha256 hex over `provider::etag`.
    pub fn public_etag(&self) -> String {
        let digest = Sha256::digest(format!("{}::{}", self.provider, self.etag).as_bytes());
        format!("{digest:x}")
    }

    /// Flat attribute map (the `attributes` member of the JSON:API document).
    pub fn serialized(&self) -> Value {
        json!({
            "kind": self.kind,
            "name": self.name(),
            "path": self.id,
            "size": self.size,
            "modified": self.modified.map(|t| t.to_rfc3339()),
            "created": self.created.map(|t| t.to_rfc3339()),
            "mimetype": self.mimetype(),
            "provider": self.provider,
            "etag": self.public_etag(),
        })
    }

    /// Full JSON:API document with hypermedia links.
    pub fn json_api_serialized(&self, domain: &str) -> Value {
        json!({
            "id": self.id,
            "type": "files",
            "attributes": self.serialized(),
            "links": self.links(domain),
        })
    }

    fn links(&self, domain: &str) -> Value {
        let mut links = serde_json::Map::new();
        links.insert("info".into(), self.action_url(domain, &self.path, "meta"));
        links.insert(
            "delete".into(),
            self.action_url(domain, &self.path, "delete"),
        );
        if let Some(parent) = self.path.parent() {
            links.insert("parent".into(), self.action_url(domain, &parent, "meta"));
        }
        if self.is_folder() {
            links.insert(
                "children".into(),
                self.action_url(domain, &self.path, "children"),
            );
            links.insert(
                "upload".into(),
                self.action_url(domain, &self.path, "upload"),
            );
            links.insert(
                "download_as_zip".into(),
                self.action_url(domain, &self.path, "download_as_zip"),
            );
        } else {
            links.insert(
                "download".into(),
                self.action_url(domain, &self.path, "download"),
            );
        }
        Value::Object(links)
    }

    fn action_url(&self, domain: &str, path: &ItemPath, action: &str) -> Value {
        let mut url = format!("{}/{}", domain.trim_end_matches('/'), self.provider);
        for seg in &self.extra_segments {
            url.push('/');
            url.push_str(seg);
        }
        url.push_str(&path.encoded());
        url.push_str("?serve=");
        url.push_str(action);
        Value::String(url)
    }
}

fn mimetype_for(ext: &str) -> Option<&'static str> {
    Some(match ext {
        ".txt" => "text/plain",
        ".md" => "text/markdown",
        ".csv" => "text/csv",
        ".html" | ".htm" => "text/html",
        ".css" => "text/css",
        ".js" => "application/javascript",
        ".json" => "application/json",
        ".xml" => "application/xml",
        ".pdf" => "application/pdf",
        ".zip" => "application/zip",
        ".gz" => "application/gzip",
        ".tar" => "application/x-tar",
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".svg" => "image/svg+xml",
        ".mp3" => "audio/mpeg",
        ".mp4" => "video/mp4",
        _ => return None,
    })
}
