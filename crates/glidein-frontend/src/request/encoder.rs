use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::config::ProtocolConfig;
use crate::credential::{Credential, CredentialType};
use crate::directory::{AttrValue, DirectoryRecord};
use crate::request::keys::FactoryKeys;
use crate::request::{FrontendDescript, RequestRecord};

pub const GLOBAL_REQUEST_NAME: &str = "Global";

/// Turns requests into directory records.
pub struct RequestEncoder {
    config: Arc<ProtocolConfig>,
    descript: Arc<FrontendDescript>,
}

impl RequestEncoder {
    pub fn new(config: Arc<ProtocolConfig>, descript: Arc<FrontendDescript>) -> Self {
        Self { config, descript }
    }

    pub fn descript(&self) -> &FrontendDescript {
        &self.descript
    }

    /// Encodes `request` once per credential compatible with its constraint, or exactly once
    /// when the frontend has no credentials.
    pub fn encode(
        &self,
        request: &RequestRecord,
        keys: Option<&FactoryKeys>,
    ) -> crate::Result<Vec<DirectoryRecord>> {
        let Some(credentials) = &self.descript.credentials else {
            return Ok(vec![self.encode_one(request, None, keys)?]);
        };

        let mut records = Vec::new();
        for credential in credentials {
            if !request.constraint.allows(credential) {
                log::debug!(
                    "Credential {} ({}, domain {}) does not match auth method {} and domain {} of {}, skipping",
                    credential.id,
                    credential.kind,
                    credential.trust_domain,
                    request.constraint.auth_method,
                    request.constraint.trust_domain,
                    request.request_name
                );
                continue;
            }
            if !credential.is_usable() {
                log::warn!(
                    "Credential {} has no data loaded, skipping it for {}",
                    credential.id,
                    request.request_name
                );
                continue;
            }
            records.push(self.encode_one(request, Some(credential), keys)?);
        }
        Ok(records)
    }

    fn encode_one(
        &self,
        request: &RequestRecord,
        credential: Option<&Credential>,
        keys: Option<&FactoryKeys>,
    ) -> crate::Result<DirectoryRecord> {
        let config = &self.config;
        let descript = &self.descript;

        let mut to_encrypt: BTreeMap<String, String> =
            request.params_to_encrypt.clone().unwrap_or_default();
        let mut name = format!("{}@{}", request.request_name, descript.my_name);
        if let Some(credential) = credential {
            to_encrypt.insert(
                "SecurityClass".to_string(),
                credential.security_class.clone(),
            );
            name = format!("{}_{name}", credential.primary.content_id);
            for (attr, content_id) in credential_fields(credential) {
                to_encrypt.insert(attr.to_string(), content_id.to_string());
            }
        }

        let mut record = DirectoryRecord::new();
        record.push("MyType", config.client_id.as_str());
        record.push("GlideinMyType", config.client_id.as_str());
        record.push("GlideinWMSVersion", config.version.as_str());
        record.push("Name", name);
        descript.push_id_attrs(&mut record);
        let prefix = &config.request_prefix;
        record.push(format!("{prefix}Name"), request.request_name.as_str());
        record.push(format!("{prefix}Glidein"), request.glidein_name.as_str());
        descript.push_web_attrs(&mut record);

        let mut encrypted = BTreeMap::new();
        match keys {
            Some(keys) => {
                keys.push_key_attrs(&mut record, config)?;
                if let Some(security_name) = &request.security_name {
                    to_encrypt.insert("SecurityName".to_string(), security_name.clone());
                }
                for (attr, value) in &to_encrypt {
                    encrypted.insert(attr.as_str(), keys.encrypt_hex(value.as_bytes())?);
                }
            }
            None if !to_encrypt.is_empty() => {
                log::debug!(
                    "No session key for {}, dropping {} secret attribute(s)",
                    request.request_name,
                    to_encrypt.len()
                );
            }
            None => {}
        }

        record.push(format!("{prefix}IdleGlideins"), request.min_idle);
        record.push(format!("{prefix}MaxRunningGlideins"), request.max_run);
        record.push(format!("{prefix}RemoveExcess"), request.excess_policy.as_str());

        for (name, value) in &request.params {
            record.push(format!("{}{name}", config.param_prefix), value.clone());
        }
        for (name, value) in &request.monitors {
            record.push(format!("{}{name}", config.monitor_prefix), value.clone());
        }
        for (name, value) in encrypted {
            record.push(
                format!("{}{name}", config.encrypted_param_prefix),
                AttrValue::Str(value),
            );
        }
        Ok(record)
    }

    /// Encodes the credential inventory published once per factory.
    pub fn encode_global(
        &self,
        request_name: Option<&str>,
        security_name: Option<&str>,
        keys: Option<&FactoryKeys>,
    ) -> crate::Result<DirectoryRecord> {
        let config = &self.config;
        let descript = &self.descript;

        let mut to_encrypt: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        if let Some(credentials) = &descript.credentials {
            let mut count = 0;
            for credential in credentials.iter().filter(|c| c.is_usable()) {
                count += 1;
                for payload in credential.payloads() {
                    if let Some(data) = &payload.data {
                        to_encrypt.insert(payload.content_id.clone(), data.clone());
                        to_encrypt.insert(
                            format!("SecurityClass{}", payload.content_id),
                            credential.security_class.clone().into_bytes(),
                        );
                    }
                }
            }
            to_encrypt.insert(
                "NumberOfCredentials".to_string(),
                count.to_string().into_bytes(),
            );
        }
        if let Some(security_name) = security_name {
            to_encrypt.insert(
                "SecurityName".to_string(),
                security_name.as_bytes().to_vec(),
            );
        }

        let mut record = DirectoryRecord::new();
        record.push("MyType", config.client_global.as_str());
        record.push("GlideinMyType", config.client_global.as_str());
        record.push("GlideinWMSVersion", config.version.as_str());
        record.push(
            "Name",
            format!(
                "{}@{}",
                request_name.unwrap_or(GLOBAL_REQUEST_NAME),
                descript.my_name
            ),
        );
        record.push("FrontendName", descript.frontend_name.as_str());
        record.push("GroupName", descript.group_name.as_str());
        record.push("ClientName", descript.my_name.as_str());

        if let Some(keys) = keys {
            keys.push_key_attrs(&mut record, config)?;
            for (attr, value) in &to_encrypt {
                record.push(
                    format!("{}{attr}", config.encrypted_param_prefix),
                    AttrValue::Str(keys.encrypt_hex(value)?),
                );
            }
        }
        Ok(record)
    }
}

/// Secret attribute names announcing the credential files, mapped to their content ids.
fn credential_fields(credential: &Credential) -> Vec<(&'static str, &str)> {
    let primary = credential.primary.content_id.as_str();
    let secondary = credential
        .secondary
        .as_ref()
        .map(|payload| payload.content_id.as_str());

    let (public, private) = match credential.kind {
        CredentialType::UsernamePassword => ("Username", "Password"),
        CredentialType::CertPair => ("PublicCert", "PrivateCert"),
        CredentialType::KeyPair => ("PublicKey", "PrivateKey"),
        kind if kind.is_grid_proxy() => return vec![("SubmitProxy", primary)],
        _ => return Vec::new(),
    };
    let mut fields = vec![(public, primary)];
    if let Some(secondary) = secondary {
        fields.push((private, secondary));
    }
    fields
}
