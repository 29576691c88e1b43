// Datasource settings: normalization, per-role connection URLs, raw view configuration

use crate::error::{CouchError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PROTOCOL: &str = "http";
pub const DEFAULT_PORT: u16 = 5984;

/// Datasource settings as written by the user. Aliases (`host`/`hostname`,
/// `db`/`database`) are accepted and resolved by [`Settings::resolve`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthSettings>,
    #[serde(default)]
    pub views: Vec<RawView>,
}

/// Credentials, either shared or split by role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default)]
    pub reader: Option<Credentials>,
    #[serde(default)]
    pub writer: Option<Credentials>,
    #[serde(default)]
    pub admin: Option<Credentials>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, alias = "user")]
    pub username: Option<String>,
    #[serde(default, alias = "pass")]
    pub password: Option<String>,
}

impl Credentials {
    fn user_info(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

/// A view exposed to callers for raw querying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawView {
    pub ddoc: String,
    pub name: String,
}

/// Which store handle a connection URL is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Reader,
    Writer,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Reader, Role::Writer, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Writer => "writer",
            Role::Admin => "admin",
        }
    }
}

/// Settings with defaults applied and the database name validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSettings {
    pub protocol: String,
    pub hostname: String,
    pub port: u16,
    pub database: String,
    #[serde(skip)]
    pub auth: Option<AuthSettingsView>,
    pub views: Vec<RawView>,
}

/// Role credentials after fallback to the shared credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSettingsView {
    pub reader: Credentials,
    pub writer: Credentials,
    pub admin: Credentials,
}

impl Settings {
    /// Apply defaults and validate. A missing database name is fatal.
    pub fn resolve(&self) -> Result<ResolvedSettings> {
        let database = self
            .database
            .clone()
            .or_else(|| self.db.clone())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                CouchError::Config(
                    "Database name must be specified in dataSource for CouchDB connector".into(),
                )
            })?;

        let auth = self.auth.as_ref().map(|auth| AuthSettingsView {
            reader: auth.reader.clone().unwrap_or_else(|| auth.credentials.clone()),
            writer: auth.writer.clone().unwrap_or_else(|| auth.credentials.clone()),
            admin: auth.admin.clone().unwrap_or_else(|| auth.credentials.clone()),
        });

        Ok(ResolvedSettings {
            protocol: self
                .protocol
                .clone()
                .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
            hostname: self
                .hostname
                .clone()
                .or_else(|| self.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            database,
            auth,
            views: self.views.clone(),
        })
    }
}

impl ResolvedSettings {
    fn credentials(&self, role: Role) -> Option<&Credentials> {
        self.auth.as_ref().map(|auth| match role {
            Role::Reader => &auth.reader,
            Role::Writer => &auth.writer,
            Role::Admin => &auth.admin,
        })
    }

    /// Connection URL for a store handle: `<protocol>://[user:pass@]<host>:<port>/<database>`.
    pub fn auth_url(&self, role: Role) -> String {
        self.build_url(role, false)
    }

    /// Same as [`auth_url`](Self::auth_url) with the password replaced, for display.
    pub fn masked_url(&self, role: Role) -> String {
        self.build_url(role, true)
    }

    fn build_url(&self, role: Role, mask: bool) -> String {
        let user_info = match self.credentials(role).and_then(|c| c.user_info()) {
            Some((user, _)) if mask => format!("{user}:****@"),
            Some((user, pass)) => format!("{user}:{pass}@"),
            None => String::new(),
        };
        format!(
            "{}://{}{}:{}/{}",
            self.protocol, user_info, self.hostname, self.port, self.database
        )
    }
}
