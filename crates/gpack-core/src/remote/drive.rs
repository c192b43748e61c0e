//! Google Drive v3 implementation of [`RemoteStore`].

use super::{ListQuery, RemoteStore, FOLDER_MIME};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::models::{RemoteFile, RemoteFolder};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Body, Client, Response};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use serde::Deserialize;
use serde_json::json;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, instrument};

const FILE_FIELDS: &str = "id,name,size,createdTime";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    size: Option<String>,
    created_time: Option<DateTime<Utc>>,
}

impl From<DriveFile> for RemoteFile {
    fn from(file: DriveFile) -> Self {
        RemoteFile {
            id: file.id,
            name: file.name,
            size: file.size.and_then(|s| s.parse().ok()),
            created_time: file.created_time,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Blocking Drive client authorized with a bearer access token.
#[derive(Debug, Clone)]
pub struct DriveClient {
    http: Client,
    api_base: String,
    upload_base: String,
    access_token: String,
}

impl DriveClient {
    pub fn new(settings: &Settings, access_token: impl Into<String>) -> Result<Self> {
        // Uploads stream for as long as the archive takes to build.
        let http = Client::builder().timeout(None::<Duration>).build()?;
        Ok(Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            upload_base: settings.upload_base.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.api_base)
    }
}

/// Builds the Drive `q` expression for a list query.
pub fn build_query(query: &ListQuery<'_>) -> String {
    let mut clauses = vec![format!("'{}' in parents", escape(query.parent))];
    if let Some(mime) = query.mime_type {
        clauses.push(format!("mimeType='{}'", escape(mime)));
    }
    if let Some(name) = query.name {
        clauses.push(format!("name='{}'", escape(name)));
    }
    clauses.push("trashed=false".to_string());
    clauses.join(" and ")
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Passes 2xx responses through and turns anything else into `Error::Remote`.
pub(crate) fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);
    Err(Error::Remote {
        status: status.as_u16(),
        message,
    })
}

impl RemoteStore for DriveClient {
    #[instrument(skip(self), fields(parent = query.parent))]
    fn list_children(&self, query: &ListQuery<'_>) -> Result<Vec<RemoteFile>> {
        let q = build_query(query);
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params: Vec<(&str, &str)> = vec![
                ("q", q.as_str()),
                ("fields", fields.as_str()),
                ("spaces", "drive"),
                ("pageSize", "1000"),
            ];
            if query.newest_first {
                params.push(("orderBy", "createdTime desc"));
            }
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let response = self
                .http
                .get(self.files_url())
                .bearer_auth(&self.access_token)
                .query(&params)
                .send()?;
            let page: FileList = check(response)?.json()?;
            files.extend(page.files.into_iter().map(RemoteFile::from));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!(count = files.len(), "Listed children.");
        Ok(files)
    }

    #[instrument(skip(self))]
    fn create_folder(&self, parent: &str, name: &str) -> Result<RemoteFolder> {
        let metadata = json!({
            "name": name,
            "mimeType": FOLDER_MIME,
            "parents": [parent],
        });
        let response = self
            .http
            .post(self.files_url())
            .bearer_auth(&self.access_token)
            .query(&[("fields", "id,name")])
            .json(&metadata)
            .send()?;
        let created: DriveFile = check(response)?.json()?;
        Ok(RemoteFolder {
            id: created.id,
            parent_id: parent.to_string(),
            name: name.to_string(),
        })
    }

    /// Opens a resumable session, then streams the whole body in one request.
    #[instrument(skip(self, content))]
    fn upload(
        &self,
        parent: &str,
        name: &str,
        mime_type: &str,
        content: Box<dyn Read + Send>,
    ) -> Result<RemoteFile> {
        let metadata = json!({
            "name": name,
            "mimeType": mime_type,
            "parents": [parent],
        });
        let response = self
            .http
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(&self.access_token)
            .query(&[("uploadType", "resumable")])
            .header("X-Upload-Content-Type", mime_type)
            .json(&metadata)
            .send()?;
        let response = check(response)?;
        let session = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| Error::Custom("Upload session URL missing from response".to_string()))?;
        debug!("Upload session opened.");

        let response = self
            .http
            .put(session)
            .bearer_auth(&self.access_token)
            .query(&[("fields", FILE_FIELDS)])
            .header(CONTENT_TYPE, mime_type)
            .body(Body::new(content))
            .send()?;
        let uploaded: DriveFile = check(response)?.json()?;
        Ok(uploaded.into())
    }

    #[instrument(skip(self))]
    fn delete(&self, id: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/{}", self.files_url(), id))
            .bearer_auth(&self.access_token)
            .send()?;
        check(response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_query_matches_name_type_and_parent() {
        let q = build_query(&ListQuery::folder_named("root", "GPACK"));
        assert_eq!(
            q,
            "'root' in parents and mimeType='application/vnd.google-apps.folder' and name='GPACK' and trashed=false"
        );
    }

    #[test]
    fn query_escapes_quotes_and_backslashes() {
        let q = build_query(&ListQuery::folder_named("abc", r"it's a\b"));
        assert!(q.contains(r"name='it\'s a\\b'"));
    }

    #[test]
    fn drive_file_parses_size_and_created_time() {
        let file: DriveFile = serde_json::from_str(
            r#"{"id":"f1","name":"app_x.zip","size":"2048","createdTime":"2024-01-02T03:04:05.678Z"}"#,
        )
        .unwrap();
        let file = RemoteFile::from(file);
        assert_eq!(file.size, Some(2048));
        assert_eq!(
            file.created_time.unwrap().to_rfc3339(),
            "2024-01-02T03:04:05.678+00:00"
        );
    }
}
