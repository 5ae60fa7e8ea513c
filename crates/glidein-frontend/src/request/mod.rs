pub mod batch;
pub mod encoder;
pub mod keys;
pub mod query;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::common::error::FrontendError;
use crate::credential::{ANY_CONSTRAINT, Credential};
use crate::directory::{AttrValue, DirectoryRecord};

/// What a factory should do with glideins exceeding the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExcessPolicy {
    #[default]
    No,
    Wait,
    Idle,
    All,
    Unreg,
}

impl ExcessPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExcessPolicy::No => "NO",
            ExcessPolicy::Wait => "WAIT",
            ExcessPolicy::Idle => "IDLE",
            ExcessPolicy::All => "ALL",
            ExcessPolicy::Unreg => "UNREG",
        }
    }

    /// Missing value means [`ExcessPolicy::No`].
    pub fn parse_opt(value: Option<&str>) -> crate::Result<Self> {
        value.map(ExcessPolicy::from_str).unwrap_or(Ok(Self::No))
    }
}

impl FromStr for ExcessPolicy {
    type Err = FrontendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NO" => Ok(ExcessPolicy::No),
            "WAIT" => Ok(ExcessPolicy::Wait),
            "IDLE" => Ok(ExcessPolicy::Idle),
            "ALL" => Ok(ExcessPolicy::All),
            "UNREG" => Ok(ExcessPolicy::Unreg),
            _ => Err(FrontendError::InvalidExcessPolicy(s.to_string())),
        }
    }
}

impl Display for ExcessPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential requirements of a factory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestConstraint {
    pub trust_domain: String,
    pub auth_method: String,
}

impl Default for RequestConstraint {
    fn default() -> Self {
        Self {
            trust_domain: ANY_CONSTRAINT.to_string(),
            auth_method: ANY_CONSTRAINT.to_string(),
        }
    }
}

impl RequestConstraint {
    pub fn new(trust_domain: &str, auth_method: &str) -> Self {
        Self {
            trust_domain: trust_domain.to_string(),
            auth_method: auth_method.to_string(),
        }
    }

    pub fn allows(&self, credential: &Credential) -> bool {
        credential.matches(&self.trust_domain, &self.auth_method)
    }
}

/// Logical glidein request for one factory entry, before encoding.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub request_name: String,
    pub glidein_name: String,
    pub min_idle: i64,
    pub max_run: i64,
    pub params: BTreeMap<String, AttrValue>,
    pub monitors: BTreeMap<String, AttrValue>,
    /// Published only when a session key is available
    pub params_to_encrypt: Option<BTreeMap<String, String>>,
    pub security_name: Option<String>,
    pub excess_policy: ExcessPolicy,
    pub constraint: RequestConstraint,
}

impl RequestRecord {
    /// Creates a request, failing on an unknown excess policy.
    pub fn new(
        request_name: &str,
        glidein_name: &str,
        min_idle: i64,
        max_run: i64,
        excess_policy: Option<&str>,
    ) -> crate::Result<Self> {
        Ok(Self {
            request_name: request_name.to_string(),
            glidein_name: glidein_name.to_string(),
            min_idle,
            max_run,
            params: Default::default(),
            monitors: Default::default(),
            params_to_encrypt: None,
            security_name: None,
            excess_policy: ExcessPolicy::parse_opt(excess_policy)?,
            constraint: RequestConstraint::default(),
        })
    }

    pub fn with_constraint(mut self, constraint: RequestConstraint) -> Self {
        self.constraint = constraint;
        self
    }
}

/// Identity and web bootstrap information of the requesting frontend group.
#[derive(Debug, Clone)]
pub struct FrontendDescript {
    /// Client name under which requests are published
    pub my_name: String,
    pub frontend_name: String,
    pub group_name: String,
    pub web_url: String,
    pub main_descript: String,
    pub group_descript: String,
    pub signtype: String,
    pub main_sign: String,
    pub group_sign: String,
    pub credentials: Option<Vec<Credential>>,
}

impl FrontendDescript {
    pub fn need_encryption(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn group_url(&self) -> String {
        format!(
            "{}/group_{}",
            self.web_url.trim_end_matches('/'),
            self.group_name
        )
    }

    pub fn push_id_attrs(&self, record: &mut DirectoryRecord) {
        record.push("ClientName", self.my_name.as_str());
        record.push("FrontendName", self.frontend_name.as_str());
        record.push("GroupName", self.group_name.as_str());
    }

    pub fn push_web_attrs(&self, record: &mut DirectoryRecord) {
        record.push("WebURL", self.web_url.as_str());
        record.push("WebSignType", self.signtype.as_str());
        record.push("WebDescriptFile", self.main_descript.as_str());
        record.push("WebDescriptSign", self.main_sign.as_str());
        record.push("WebGroupURL", self.group_url());
        record.push("WebGroupDescriptFile", self.group_descript.as_str());
        record.push("WebGroupDescriptSign", self.group_sign.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::{ExcessPolicy, RequestRecord};
    use crate::common::error::FrontendError;
    use crate::tests::utils::descript;

    #[test]
    fn test_excess_policy() {
        assert_eq!(ExcessPolicy::parse_opt(None).unwrap(), ExcessPolicy::No);
        assert_eq!(
            ExcessPolicy::parse_opt(Some("UNREG")).unwrap(),
            ExcessPolicy::Unreg
        );
        for value in ["NO", "WAIT", "IDLE", "ALL", "UNREG"] {
            assert_eq!(value.parse::<ExcessPolicy>().unwrap().as_str(), value);
        }
    }

    #[test]
    fn test_invalid_excess_policy() {
        let result = RequestRecord::new("entry@factory", "entry", 1, 10, Some("MAYBE"));
        assert!(matches!(
            result,
            Err(FrontendError::InvalidExcessPolicy(value)) if value == "MAYBE"
        ));
        assert!(RequestRecord::new("entry@factory", "entry", 1, 10, Some("no")).is_err());
    }

    #[test]
    fn test_web_attrs() {
        let descript = descript(None);
        assert_eq!(descript.group_url(), "http://web.example.org/frontend/group_main");
        assert!(!descript.need_encryption());
    }
}
