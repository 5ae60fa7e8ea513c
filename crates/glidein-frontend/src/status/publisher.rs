use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Context;

use crate::common::config::ProtocolConfig;
use crate::common::error::FrontendError;
use crate::directory::transient::TransientFiles;
use crate::directory::{
    AdvertiseFailure, AdvertiseReport, DirectoryRecord, DirectoryTransport, TransportResult,
};
use crate::status::{RESOURCE_ADVERTISE_COMMAND, RESOURCE_INVALIDATE_COMMAND, ResourceStatus};

const RESOURCE_FILE_PREFIX: &str = "gfi_ar";

/// Keeps the latest status of every matched resource and publishes it to a user pool.
pub struct ResourceStatusPublisher {
    config: Arc<ProtocolConfig>,
    transport: Rc<dyn DirectoryTransport>,
    pool: Option<String>,
    files: TransientFiles,
    records: BTreeMap<String, ResourceStatus>,
}

impl ResourceStatusPublisher {
    pub fn new(
        config: Arc<ProtocolConfig>,
        transport: Rc<dyn DirectoryTransport>,
        pool: Option<String>,
    ) -> Self {
        let files = TransientFiles::new(config.tmp_dir.clone(), RESOURCE_FILE_PREFIX);
        Self {
            config,
            transport,
            pool,
            files,
            records: Default::default(),
        }
    }

    pub fn upsert(&mut self, name: &str, status: ResourceStatus) {
        self.records.insert(name.to_string(), status);
    }

    pub fn get(&self, name: &str) -> Option<&ResourceStatus> {
        self.records.get(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn select(&self, names: Option<&[String]>) -> crate::Result<Vec<(String, DirectoryRecord)>> {
        match names {
            None => Ok(self
                .records
                .iter()
                .map(|(name, status)| (name.clone(), status.record().clone()))
                .collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.records
                        .get(name)
                        .map(|status| (name.clone(), status.record().clone()))
                        .ok_or_else(|| FrontendError::UnknownResource(name.clone()))
                })
                .collect(),
        }
    }

    fn send(&mut self, content: &str, multi: bool) -> TransportResult<()> {
        let file = self
            .files
            .write(content)
            .context("Cannot write resource file")?;
        self.transport.advertise(
            file.path(),
            RESOURCE_ADVERTISE_COMMAND,
            self.pool.as_deref(),
            multi,
        )
    }

    fn send_invalidation(&mut self, record: DirectoryRecord) -> TransportResult<()> {
        let file = self
            .files
            .write(&record.to_text())
            .context("Cannot write resource file")?;
        self.transport
            .invalidate(file.path(), RESOURCE_INVALIDATE_COMMAND, self.pool.as_deref())
    }

    fn failure(&self, name: &str, error: anyhow::Error) -> AdvertiseFailure {
        AdvertiseFailure {
            target: self.pool.clone(),
            error: error.context(format!("Resource {name}")),
        }
    }

    /// Publishes the given records, or all known records when `names` is `None`.
    /// Returns the number of records sent.
    pub fn advertise(&mut self, names: Option<&[String]>) -> crate::Result<usize> {
        let selected = self.select(names)?;
        if selected.is_empty() {
            return Ok(0);
        }

        let mut report = AdvertiseReport::default();
        if self.config.advertise_use_multi {
            let mut content = String::new();
            for (_, record) in &selected {
                content.push_str(&record.to_text());
                content.push_str(&self.config.multi_record_delimiter);
            }
            match self.send(&content, true) {
                Ok(()) => report.sent = selected.len(),
                Err(error) => report.failures.push(AdvertiseFailure {
                    target: self.pool.clone(),
                    error,
                }),
            }
        } else {
            for (name, record) in selected {
                match self.send(&record.to_text(), false) {
                    Ok(()) => report.sent += 1,
                    Err(error) => {
                        let failure = self.failure(&name, error);
                        report.failures.push(failure);
                    }
                }
            }
        }
        report.into_result()
    }

    /// Removes the given records, or all known records, from the pool by exact name.
    pub fn invalidate(&mut self, names: Option<&[String]>) -> crate::Result<usize> {
        let selected = self.select(names)?;
        let mut report = AdvertiseReport::default();
        for (name, _) in selected {
            let query = DirectoryRecord::query(
                &self.config.resource_type,
                format!("Name == \"{name}\""),
            );
            match self.send_invalidation(query) {
                Ok(()) => report.sent += 1,
                Err(error) => {
                    let failure = self.failure(&name, error);
                    report.failures.push(failure);
                }
            }
        }
        report.into_result()
    }

    /// Removes every resource record matching a directory filter expression.
    pub fn invalidate_matching(&mut self, constraint: &str) -> crate::Result<()> {
        let query = DirectoryRecord::query(&self.config.resource_type, constraint.to_string());
        self.send_invalidation(query)?;
        Ok(())
    }

    /// All known records, separated by empty lines.
    pub fn records_text(&self) -> String {
        let mut text = String::new();
        for status in self.records.values() {
            text.push_str(&status.record().to_text());
            text.push('\n');
        }
        text
    }
}
