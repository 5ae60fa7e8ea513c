pub mod publisher;

use derive_more::{Add, AddAssign, Sum};
use serde::{Deserialize, Serialize};

use crate::Map;
use crate::common::config::ProtocolConfig;
use crate::common::error::FrontendError;
use crate::directory::{AttrValue, DirectoryRecord, UpdateCommand};

pub const CLIENT_MONITOR_FIELDS: usize = 13;

pub const RESOURCE_ADVERTISE_COMMAND: UpdateCommand = UpdateCommand::UpdateAdGeneric;
pub const RESOURCE_INVALIDATE_COMMAND: UpdateCommand = UpdateCommand::InvalidateAdsGeneric;

/// Factory attributes that must not be echoed into resource records.
const EXCLUDED_ENTRY_ATTRS: [&str; 14] = [
    "CurrentTime",
    "USE_CCB",
    "PubKeyValue",
    "PubKeyType",
    "AuthenticatedIdentity",
    "GlideinName",
    "FactoryName",
    "EntryName",
    "GlideinWMSVersion",
    "PubKeyObj",
    "LastHeardFrom",
    "PubKeyID",
    "SupportedSignTypes",
    "GLIDEIN_In_Downtime",
];

const DOWNTIME_ATTR: &str = "GLIDEIN_In_Downtime";
const FACTORY_TOTAL_PREFIX: &str = "Total";
const FACTORY_CLIENT_TOTAL_PREFIX: &str = "TotalClientMonitor";
const FACTORY_MONITOR_PREFIX: &str = "GlideFactoryMonitor";

/// Job and glidein counters of one factory entry, as seen by a frontend group.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Add, AddAssign, Sum,
)]
pub struct ClientMonitorCounters {
    pub jobs_idle: i64,
    pub jobs_idle_matching: i64,
    pub jobs_idle_effective: i64,
    pub jobs_idle_old: i64,
    pub jobs_idle_unique: i64,
    pub jobs_running: i64,
    pub jobs_running_here: i64,
    pub jobs_running_max: i64,
    pub glideins_total: i64,
    pub glideins_idle: i64,
    pub glideins_running: i64,
    pub glideins_request_idle: i64,
    pub glideins_request_max_run: i64,
}

impl ClientMonitorCounters {
    /// Published attribute names paired with values, in positional order.
    pub fn attrs(&self) -> [(&'static str, i64); CLIENT_MONITOR_FIELDS] {
        [
            ("GlideClientMonitorJobsIdle", self.jobs_idle),
            ("GlideClientMonitorJobsIdleMatching", self.jobs_idle_matching),
            ("GlideClientMonitorJobsIdleEffective", self.jobs_idle_effective),
            ("GlideClientMonitorJobsIdleOld", self.jobs_idle_old),
            ("GlideClientMonitorJobsIdleUnique", self.jobs_idle_unique),
            ("GlideClientMonitorJobsRunning", self.jobs_running),
            ("GlideClientMonitorJobsRunningHere", self.jobs_running_here),
            ("GlideClientMonitorJobsRunningMax", self.jobs_running_max),
            ("GlideClientMonitorGlideinsTotal", self.glideins_total),
            ("GlideClientMonitorGlideinsIdle", self.glideins_idle),
            ("GlideClientMonitorGlideinsRunning", self.glideins_running),
            (
                "GlideClientMonitorGlideinsRequestIdle",
                self.glideins_request_idle,
            ),
            (
                "GlideClientMonitorGlideinsRequestMaxRun",
                self.glideins_request_max_run,
            ),
        ]
    }
}

impl TryFrom<&[i64]> for ClientMonitorCounters {
    type Error = FrontendError;

    fn try_from(values: &[i64]) -> Result<Self, Self::Error> {
        let values: &[i64; CLIENT_MONITOR_FIELDS] =
            values
                .try_into()
                .map_err(|_| FrontendError::InvalidMonitorInfo {
                    expected: CLIENT_MONITOR_FIELDS,
                    actual: values.len(),
                })?;
        let [
            jobs_idle,
            jobs_idle_matching,
            jobs_idle_effective,
            jobs_idle_old,
            jobs_idle_unique,
            jobs_running,
            jobs_running_here,
            jobs_running_max,
            glideins_total,
            glideins_idle,
            glideins_running,
            glideins_request_idle,
            glideins_request_max_run,
        ] = *values;
        Ok(Self {
            jobs_idle,
            jobs_idle_matching,
            jobs_idle_effective,
            jobs_idle_old,
            jobs_idle_unique,
            jobs_running,
            jobs_running_here,
            jobs_running_max,
            glideins_total,
            glideins_idle,
            glideins_running,
            glideins_request_idle,
            glideins_request_max_run,
        })
    }
}

/// Status of one factory entry as matched by this frontend, published to the user pool.
#[derive(Debug, Clone)]
pub struct ResourceStatus {
    name: String,
    record: DirectoryRecord,
}

impl ResourceStatus {
    pub fn new(factory_ref: &str, frontend_ref: &str, config: &ProtocolConfig) -> Self {
        let name = format!("{factory_ref}@{frontend_ref}");
        let mut record = DirectoryRecord::new();
        record.push("MyType", config.resource_type.as_str());
        record.push("GlideinMyType", config.resource_type.as_str());
        record.push("GlideinWMSVersion", config.version.as_str());
        record.push("GlideFactoryName", factory_ref);
        record.push("GlideClientName", frontend_ref);
        record.push("Name", name.as_str());
        record.push(DOWNTIME_ATTR, "False");
        Self { name, record }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self) -> &DirectoryRecord {
        &self.record
    }

    pub fn set_in_downtime(&mut self, downtime: bool) {
        self.record
            .set(DOWNTIME_ATTR, if downtime { "True" } else { "False" });
    }

    /// Sets the client monitor counters from their positional form.
    /// Nothing is changed if the vector does not have exactly 13 values.
    pub fn set_client_monitor_info(&mut self, values: &[i64]) -> crate::Result<()> {
        let counters = ClientMonitorCounters::try_from(values)?;
        self.set_client_monitor(&counters);
        Ok(())
    }

    pub fn set_client_monitor(&mut self, counters: &ClientMonitorCounters) {
        for (name, value) in counters.attrs() {
            self.record.set(name, value);
        }
    }

    /// Copies factory entry attributes, except volatile, identity and security ones.
    pub fn set_entry_info(&mut self, info: &Map<String, AttrValue>) {
        let mut names: Vec<&String> = info
            .keys()
            .filter(|name| !EXCLUDED_ENTRY_ATTRS.contains(&name.as_str()))
            .collect();
        names.sort();
        for name in names {
            self.record.set(name.as_str(), info[name].clone());
        }
    }

    /// Republishes factory `Total*` monitoring values as `GlideFactoryMonitor*`.
    pub fn set_factory_monitor_info(&mut self, info: &Map<String, AttrValue>) {
        let mut names: Vec<&String> = info
            .keys()
            .filter(|name| !name.starts_with(FACTORY_CLIENT_TOTAL_PREFIX))
            .filter(|name| name.starts_with(FACTORY_TOTAL_PREFIX))
            .collect();
        names.sort();
        for name in names {
            let renamed = format!(
                "{FACTORY_MONITOR_PREFIX}{}",
                &name[FACTORY_TOTAL_PREFIX.len()..]
            );
            self.record.set(renamed, info[name].clone());
        }
    }
}
