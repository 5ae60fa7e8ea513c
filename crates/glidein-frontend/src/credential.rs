use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use crate::Map;
use crate::common::config::FrontendSettings;

pub const ANY_CONSTRAINT: &str = "Any";
const DEFAULT_TRUST_DOMAIN: &str = "None";
const CONTENT_ID_BYTES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialType {
    GridProxy,
    GridProxyProjectId,
    GridProxyVomsAttr,
    CertPair,
    KeyPair,
    UsernamePassword,
    Unknown,
}

impl CredentialType {
    /// Unrecognized names map to [`CredentialType::Unknown`].
    pub fn parse(value: &str) -> Self {
        match value {
            "grid_proxy" => Self::GridProxy,
            "grid_proxy+project_id" => Self::GridProxyProjectId,
            "grid_proxy+voms_attr" => Self::GridProxyVomsAttr,
            "cert_pair" => Self::CertPair,
            "key_pair" => Self::KeyPair,
            "username_password" => Self::UsernamePassword,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GridProxy => "grid_proxy",
            Self::GridProxyProjectId => "grid_proxy+project_id",
            Self::GridProxyVomsAttr => "grid_proxy+voms_attr",
            Self::CertPair => "cert_pair",
            Self::KeyPair => "key_pair",
            Self::UsernamePassword => "username_password",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_grid_proxy(&self) -> bool {
        matches!(
            self,
            Self::GridProxy | Self::GridProxyProjectId | Self::GridProxyVomsAttr
        )
    }

    /// Credentials of these types keep a private key or password in a second file.
    pub fn has_secondary(&self) -> bool {
        matches!(self, Self::CertPair | Self::KeyPair | Self::UsernamePassword)
    }
}

impl Display for CredentialType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-credential attributes, keyed by the credential path.
#[derive(Debug, Default, Clone)]
pub struct CredentialTables {
    pub types: Map<PathBuf, String>,
    pub security_classes: Map<PathBuf, String>,
    pub trust_domains: Map<PathBuf, String>,
    pub key_files: Map<PathBuf, PathBuf>,
}

/// One file backing a credential.
#[derive(Debug, Clone)]
pub struct CredentialPayload {
    pub path: PathBuf,
    /// Short identifier that lets factories reference the file without learning its path
    pub content_id: String,
    pub data: Option<Vec<u8>>,
}

impl CredentialPayload {
    fn new(path: PathBuf) -> Self {
        let content_id = content_id(&path);
        Self {
            path,
            content_id,
            data: None,
        }
    }
}

pub fn content_id(path: &Path) -> String {
    let raw = path.as_os_str().as_encoded_bytes();
    match orion::hash::digest(raw) {
        Ok(digest) => hex::encode(&digest.as_ref()[..CONTENT_ID_BYTES]),
        Err(_) => hex::encode(&raw[..raw.len().min(CONTENT_ID_BYTES)]),
    }
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    pub kind: CredentialType,
    pub security_class: String,
    pub trust_domain: String,
    pub primary: CredentialPayload,
    pub secondary: Option<CredentialPayload>,
}

impl Credential {
    /// Loads a credential from `path`.
    ///
    /// Read failures do not fail the load, the returned credential has no payload data and
    /// [`Credential::is_usable`] reports `false`.
    pub fn load(id: &str, path: &Path, tables: &CredentialTables) -> Self {
        let kind = tables
            .types
            .get(path)
            .map(|kind| CredentialType::parse(kind))
            .unwrap_or(CredentialType::Unknown);
        let security_class = tables
            .security_classes
            .get(path)
            .cloned()
            .unwrap_or_else(|| id.to_string());
        let trust_domain = tables
            .trust_domains
            .get(path)
            .cloned()
            .unwrap_or_else(|| DEFAULT_TRUST_DOMAIN.to_string());

        let mut credential = Credential {
            id: id.to_string(),
            kind,
            security_class,
            trust_domain,
            primary: CredentialPayload::new(path.to_path_buf()),
            secondary: if kind.has_secondary() {
                tables
                    .key_files
                    .get(path)
                    .map(|key_file| CredentialPayload::new(key_file.clone()))
            } else {
                None
            },
        };

        if let Err(error) = credential.read_payloads() {
            log::error!("Could not read credential file '{}': {error}", path.display());
            credential.primary.data = None;
            if let Some(secondary) = credential.secondary.as_mut() {
                secondary.data = None;
            }
        }
        credential
    }

    fn read_payloads(&mut self) -> std::io::Result<()> {
        if self.kind != CredentialType::UsernamePassword {
            self.primary.data = Some(std::fs::read(&self.primary.path)?);
        }
        if let Some(secondary) = self.secondary.as_mut() {
            secondary.data = Some(std::fs::read(&secondary.path)?);
        }
        Ok(())
    }

    /// Returns `true` if every file required by the credential type has been read.
    pub fn is_usable(&self) -> bool {
        let primary_ok =
            self.kind == CredentialType::UsernamePassword || self.primary.data.is_some();
        let secondary_ok = !self.kind.has_secondary()
            || self
                .secondary
                .as_ref()
                .is_some_and(|secondary| secondary.data.is_some());
        primary_ok && secondary_ok
    }

    /// Checks the credential against a required trust domain and authentication method.
    /// [`ANY_CONSTRAINT`] matches everything.
    pub fn matches(&self, trust_domain: &str, auth_method: &str) -> bool {
        (auth_method == ANY_CONSTRAINT || auth_method == self.kind.as_str())
            && (trust_domain == ANY_CONSTRAINT || trust_domain == self.trust_domain)
    }

    /// Payloads whose data is published in global records.
    pub fn payloads(&self) -> impl Iterator<Item = &CredentialPayload> {
        std::iter::once(&self.primary)
            .chain(self.secondary.iter())
            .filter(|payload| payload.data.is_some())
    }
}

/// Loads every credential listed in the settings, in configuration order.
pub fn load_credentials(settings: &FrontendSettings) -> Vec<Credential> {
    let tables = settings.credential_tables();
    let ids = settings.credential_ids();
    settings
        .credentials
        .iter()
        .map(|cred| {
            let id = ids
                .get(&cred.path)
                .cloned()
                .unwrap_or_else(|| cred.path.display().to_string());
            Credential::load(&id, &cred.path, &tables)
        })
        .collect()
}
