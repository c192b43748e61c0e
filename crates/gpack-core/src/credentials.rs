//! Persisted OAuth client identity and tokens.
//!
//! One JSON file per user holds every field. All fields are optional until a
//! login completes; remote operations need client id, client secret and an
//! access token together, anything less counts as not authenticated.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    ClientId,
    ClientSecret,
    AccessToken,
    RefreshToken,
    Scope,
    TokenType,
    ExpiryDate,
}

impl CredentialField {
    pub const ALL: [CredentialField; 7] = [
        CredentialField::ClientId,
        CredentialField::ClientSecret,
        CredentialField::AccessToken,
        CredentialField::RefreshToken,
        CredentialField::Scope,
        CredentialField::TokenType,
        CredentialField::ExpiryDate,
    ];

    /// Key under which the field is stored on disk.
    pub fn key(self) -> &'static str {
        match self {
            CredentialField::ClientId => "clientId",
            CredentialField::ClientSecret => "clientSecret",
            CredentialField::AccessToken => "access_token",
            CredentialField::RefreshToken => "refresh_token",
            CredentialField::Scope => "scope",
            CredentialField::TokenType => "token_type",
            CredentialField::ExpiryDate => "expiry_date",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(rename = "clientSecret", default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
}

/// OAuth client registration entered by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Everything a remote operation needs, read from a complete record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub client: ClientCredentials,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry_date: Option<i64>,
}

impl AuthSession {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry <= now_millis)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(String::from)
}

impl CredentialRecord {
    pub fn client_credentials(&self) -> Option<ClientCredentials> {
        Some(ClientCredentials {
            client_id: non_empty(&self.client_id)?,
            client_secret: non_empty(&self.client_secret)?,
        })
    }

    pub fn session(&self) -> Option<AuthSession> {
        Some(AuthSession {
            client: self.client_credentials()?,
            access_token: non_empty(&self.access_token)?,
            refresh_token: non_empty(&self.refresh_token),
            expiry_date: self.expiry_date,
        })
    }

    pub fn get(&self, field: CredentialField) -> Option<String> {
        match field {
            CredentialField::ClientId => self.client_id.clone(),
            CredentialField::ClientSecret => self.client_secret.clone(),
            CredentialField::AccessToken => self.access_token.clone(),
            CredentialField::RefreshToken => self.refresh_token.clone(),
            CredentialField::Scope => self.scope.clone(),
            CredentialField::TokenType => self.token_type.clone(),
            CredentialField::ExpiryDate => self.expiry_date.map(|v| v.to_string()),
        }
    }

    pub fn set(&mut self, field: CredentialField, value: String) -> Result<()> {
        match field {
            CredentialField::ClientId => self.client_id = Some(value),
            CredentialField::ClientSecret => self.client_secret = Some(value),
            CredentialField::AccessToken => self.access_token = Some(value),
            CredentialField::RefreshToken => self.refresh_token = Some(value),
            CredentialField::Scope => self.scope = Some(value),
            CredentialField::TokenType => self.token_type = Some(value),
            CredentialField::ExpiryDate => {
                let millis = value.parse().map_err(|_| {
                    Error::Custom(format!("'{}' is not a valid expiry timestamp", value))
                })?;
                self.expiry_date = Some(millis);
            }
        }
        Ok(())
    }
}

/// Handle to the credential file. Passed explicitly to whatever needs it.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store at the platform default location (or `GPACK_CREDENTIALS`).
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::credentials_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file reads as an empty record.
    pub fn load(&self) -> Result<CredentialRecord> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(CredentialRecord::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, record: &CredentialRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(record)?)?;
        Ok(())
    }

    /// Applies `change` to the stored record and writes it back.
    pub fn update<F>(&self, change: F) -> Result<CredentialRecord>
    where
        F: FnOnce(&mut CredentialRecord) -> Result<()>,
    {
        let mut record = self.load()?;
        change(&mut record)?;
        self.save(&record)?;
        Ok(record)
    }

    pub fn get(&self, field: CredentialField) -> Result<Option<String>> {
        Ok(self.load()?.get(field))
    }

    pub fn set(&self, field: CredentialField, value: impl Into<String>) -> Result<()> {
        debug!(field = field.key(), "Storing credential field.");
        let value = value.into();
        self.update(|record| record.set(field, value))?;
        Ok(())
    }

    /// Removes every credential and client field.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The stored session, or `Error::NotAuthenticated` if any required field is missing.
    pub fn session(&self) -> Result<AuthSession> {
        self.load()?.session().ok_or(Error::NotAuthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("nested/credentials.json"));
        (dir, store)
    }

    #[test]
    fn empty_store_is_not_authenticated() {
        let (_dir, store) = store();
        assert_eq!(store.get(CredentialField::AccessToken).unwrap(), None);
        assert!(matches!(store.session(), Err(Error::NotAuthenticated)));
    }

    #[test]
    fn partial_state_is_not_authenticated() {
        let (_dir, store) = store();
        store.set(CredentialField::ClientId, "id").unwrap();
        store.set(CredentialField::ClientSecret, "secret").unwrap();
        assert!(matches!(store.session(), Err(Error::NotAuthenticated)));

        store.set(CredentialField::AccessToken, "token").unwrap();
        let session = store.session().unwrap();
        assert_eq!(session.access_token, "token");
        assert_eq!(session.client.client_id, "id");
    }

    #[test]
    fn fields_use_their_on_disk_keys() {
        let (_dir, store) = store();
        store.set(CredentialField::ClientId, "id").unwrap();
        store.set(CredentialField::ExpiryDate, "1700000000000").unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"clientId\": \"id\""));
        assert!(raw.contains("\"expiry_date\": 1700000000000"));
        assert!(!raw.contains("access_token"));
    }

    #[test]
    fn clear_removes_every_field() {
        let (_dir, store) = store();
        for field in CredentialField::ALL {
            let value = if field == CredentialField::ExpiryDate { "1" } else { "x" };
            store.set(field, value).unwrap();
        }
        store.clear().unwrap();

        for field in CredentialField::ALL {
            assert_eq!(store.get(field).unwrap(), None, "{} survived clear", field.key());
        }
        assert!(matches!(store.session(), Err(Error::NotAuthenticated)));
        store.clear().unwrap();
    }

    #[test]
    fn invalid_expiry_is_rejected() {
        let (_dir, store) = store();
        assert!(store.set(CredentialField::ExpiryDate, "tomorrow").is_err());
    }

    #[test]
    fn expiry_check() {
        let session = AuthSession {
            client: ClientCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
            access_token: "t".into(),
            refresh_token: None,
            expiry_date: Some(1_000),
        };
        assert!(session.is_expired(1_000));
        assert!(!session.is_expired(999));
    }
}
