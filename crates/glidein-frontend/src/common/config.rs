use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::Map;
use crate::common::error::FrontendError;
use crate::credential::CredentialTables;

/// Names, prefixes and transport switches shared by every component that reads or writes
/// directory records.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub factory_id: String,
    pub factory_global: String,
    pub client_id: String,
    pub client_global: String,
    pub factoryclient_id: String,
    pub resource_type: String,

    /// Version tag published in every record
    pub version: String,

    pub param_prefix: String,
    pub encrypted_param_prefix: String,
    pub monitor_prefix: String,
    pub request_prefix: String,

    /// Attribute listing the sign types supported by a factory
    pub signtype_attr: String,
    /// Attributes maintained by the directory itself, ignored when parsing records
    pub reserved_names: Vec<String>,
    /// Public key type that factories must publish to receive encrypted requests
    pub pub_key_type: String,

    pub advertise_use_tcp: bool,
    pub advertise_use_multi: bool,
    pub multi_record_delimiter: String,

    /// Directory used for transient record files
    pub tmp_dir: PathBuf,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            factory_id: "glidefactory".to_string(),
            factory_global: "glidefactoryglobal".to_string(),
            client_id: "glideclient".to_string(),
            client_global: "glideclientglobal".to_string(),
            factoryclient_id: "glidefactoryclient".to_string(),
            resource_type: "glideresource".to_string(),
            version: crate::FRONTEND_VERSION.to_string(),
            param_prefix: "GlideinParam".to_string(),
            encrypted_param_prefix: "GlideinEncParam".to_string(),
            monitor_prefix: "GlideinMonitor".to_string(),
            request_prefix: "Req".to_string(),
            signtype_attr: "SupportedSignTypes".to_string(),
            reserved_names: [
                "MyType",
                "TargetType",
                "GlideinMyType",
                "MyAddress",
                "UpdatesHistory",
                "UpdatesTotal",
                "UpdatesLost",
                "UpdatesSequenced",
                "UpdateSequenceNumber",
                "DaemonStartTime",
            ]
            .into_iter()
            .map(|s| s.to_string())
            .collect(),
            pub_key_type: "X25519".to_string(),
            advertise_use_tcp: false,
            advertise_use_multi: false,
            multi_record_delimiter: "\n".to_string(),
            tmp_dir: std::env::temp_dir(),
        }
    }
}

fn deserialize_human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let buf = String::deserialize(deserializer)?;
    humantime::parse_duration(&buf).map_err(serde::de::Error::custom)
}

fn default_loop_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_restart_attempts() -> usize {
    3
}

fn default_restart_interval() -> Duration {
    Duration::from_secs(1800)
}

fn default_cleanup_age() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorSettings {
    /// Address of the directory pool, the local one is used when missing
    pub pool: Option<String>,
    /// Directory containing the directory client binaries
    pub bin_dir: Option<PathBuf>,
    /// HTCondor configuration file, exported as `CONDOR_CONFIG` to the client binaries
    /// and to the group workers
    pub condor_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupSettings {
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
    #[serde(
        default = "default_cleanup_age",
        deserialize_with = "deserialize_human_duration"
    )]
    pub max_age: Duration,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            max_age: default_cleanup_age(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialSettings {
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub security_class: Option<String>,
    pub trust_domain: Option<String>,
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrontendSettings {
    pub work_dir: PathBuf,
    pub groups: Vec<String>,
    #[serde(
        default = "default_loop_delay",
        deserialize_with = "deserialize_human_duration"
    )]
    pub loop_delay: Duration,
    #[serde(default = "default_restart_attempts")]
    pub restart_attempts: usize,
    #[serde(
        default = "default_restart_interval",
        deserialize_with = "deserialize_human_duration"
    )]
    pub restart_interval: Duration,
    /// Command started for every group, `%{GROUP}`, `%{WORK_DIR}` and `%{PARENT_PID}`
    /// are replaced before spawning
    pub worker_command: Vec<String>,
    pub monitor_dir: Option<PathBuf>,
    #[serde(default)]
    pub cleanup: CleanupSettings,
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub credentials: Vec<CredentialSettings>,
}

impl FrontendSettings {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FrontendError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> crate::Result<Self> {
        let settings: FrontendSettings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.groups.is_empty() {
            return Err(FrontendError::ConfigError(
                "At least one group has to be configured".to_string(),
            ));
        }
        if self.restart_attempts == 0 {
            return Err(FrontendError::ConfigError(
                "`restart_attempts` has to be at least 1".to_string(),
            ));
        }
        if self.loop_delay.is_zero() {
            return Err(FrontendError::ConfigError(
                "`loop_delay` must not be zero".to_string(),
            ));
        }
        if self.worker_command.is_empty() {
            return Err(FrontendError::ConfigError(
                "`worker_command` must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the lookup tables used when loading credentials, keyed by credential path.
    pub fn credential_tables(&self) -> CredentialTables {
        let mut tables = CredentialTables::default();
        for cred in &self.credentials {
            if let Some(kind) = &cred.kind {
                tables.types.insert(cred.path.clone(), kind.clone());
            }
            if let Some(class) = &cred.security_class {
                tables
                    .security_classes
                    .insert(cred.path.clone(), class.clone());
            }
            if let Some(domain) = &cred.trust_domain {
                tables.trust_domains.insert(cred.path.clone(), domain.clone());
            }
            if let Some(key_file) = &cred.key_file {
                tables.key_files.insert(cred.path.clone(), key_file.clone());
            }
        }
        tables
    }

    /// Ids assigned to credentials, in configuration order.
    pub fn credential_ids(&self) -> Map<PathBuf, String> {
        self.credentials
            .iter()
            .enumerate()
            .map(|(index, cred)| (cred.path.clone(), index.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::FrontendSettings;
    use crate::common::error::FrontendError;
    use std::path::PathBuf;
    use std::time::Duration;

    const CONFIG: &str = r#"
work_dir = "/var/lib/frontend"
groups = ["main", "cms"]
loop_delay = "30s"
restart_attempts = 5
restart_interval = "10m"
worker_command = ["frontend-group", "%{WORK_DIR}", "%{GROUP}", "%{PARENT_PID}"]
monitor_dir = "/var/lib/frontend/monitor"

[cleanup]
dirs = ["/var/log/frontend"]
max_age = "2days"

[collector]
pool = "collector.example.org:9618"
condor_config = "/etc/frontend/condor_config"

[protocol]
advertise_use_multi = true

[[credentials]]
path = "/etc/frontend/proxy"
type = "grid_proxy"
security_class = "frontend"
trust_domain = "grid"

[[credentials]]
path = "/etc/frontend/user"
type = "username_password"
key_file = "/etc/frontend/pass"
"#;

    #[test]
    fn test_parse_settings() {
        let settings = FrontendSettings::parse(CONFIG).unwrap();
        assert_eq!(settings.groups, vec!["main", "cms"]);
        assert_eq!(settings.loop_delay, Duration::from_secs(30));
        assert_eq!(settings.restart_attempts, 5);
        assert_eq!(settings.restart_interval, Duration::from_secs(600));
        assert_eq!(settings.cleanup.max_age, Duration::from_secs(2 * 24 * 3600));
        assert_eq!(
            settings.collector.pool.as_deref(),
            Some("collector.example.org:9618")
        );
        assert_eq!(
            settings.collector.condor_config,
            Some(PathBuf::from("/etc/frontend/condor_config"))
        );
        assert!(settings.protocol.advertise_use_multi);
        assert_eq!(settings.protocol.client_id, "glideclient");
        assert_eq!(settings.protocol.param_prefix, "GlideinParam");

        let tables = settings.credential_tables();
        let proxy = PathBuf::from("/etc/frontend/proxy");
        let user = PathBuf::from("/etc/frontend/user");
        assert_eq!(tables.types[&proxy], "grid_proxy");
        assert_eq!(tables.trust_domains[&proxy], "grid");
        assert!(!tables.security_classes.contains_key(&user));
        assert_eq!(tables.key_files[&user], PathBuf::from("/etc/frontend/pass"));
        assert_eq!(settings.credential_ids()[&user], "1");
    }

    #[test]
    fn test_defaults() {
        let settings = FrontendSettings::parse(
            r#"
work_dir = "/tmp"
groups = ["main"]
worker_command = ["worker"]
"#,
        )
        .unwrap();
        assert_eq!(settings.loop_delay, Duration::from_secs(60));
        assert_eq!(settings.restart_attempts, 3);
        assert!(settings.credentials.is_empty());
        assert!(settings.collector.condor_config.is_none());
        assert!(!settings.protocol.advertise_use_multi);
    }

    #[test]
    fn test_reject_no_groups() {
        let result = FrontendSettings::parse(
            r#"
work_dir = "/tmp"
groups = []
worker_command = ["worker"]
"#,
        );
        assert!(matches!(result, Err(FrontendError::ConfigError(_))));
    }

    #[test]
    fn test_reject_zero_attempts() {
        let result = FrontendSettings::parse(
            r#"
work_dir = "/tmp"
groups = ["main"]
restart_attempts = 0
worker_command = ["worker"]
"#,
        );
        assert!(matches!(result, Err(FrontendError::ConfigError(_))));
    }
}
