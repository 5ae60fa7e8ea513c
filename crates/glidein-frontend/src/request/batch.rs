use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Context;

use crate::common::config::ProtocolConfig;
use crate::directory::transient::TransientFiles;
use crate::directory::{
    AdvertiseFailure, AdvertiseReport, DirectoryRecord, DirectoryTransport, PoolName,
    TransportResult, UpdateCommand, pool_display,
};
use crate::request::encoder::RequestEncoder;
use crate::request::keys::FactoryKeys;
use crate::request::{FrontendDescript, RequestRecord};

const REQUEST_FILE_PREFIX: &str = "gfi_aw";

struct QueuedRequest {
    request: RequestRecord,
    keys: Option<Arc<FactoryKeys>>,
}

struct GlobalRequest {
    request_name: Option<String>,
    security_name: Option<String>,
    keys: Arc<FactoryKeys>,
}

/// Collects requests for several factory pools and publishes them in one go.
pub struct MultiAdvertiser {
    config: Arc<ProtocolConfig>,
    encoder: RequestEncoder,
    transport: Rc<dyn DirectoryTransport>,
    files: TransientFiles,
    queue: BTreeMap<PoolName, Vec<QueuedRequest>>,
    globals: BTreeMap<PoolName, GlobalRequest>,
}

impl MultiAdvertiser {
    pub fn new(
        config: Arc<ProtocolConfig>,
        descript: Arc<FrontendDescript>,
        transport: Rc<dyn DirectoryTransport>,
    ) -> Self {
        let files = TransientFiles::new(config.tmp_dir.clone(), REQUEST_FILE_PREFIX);
        Self {
            encoder: RequestEncoder::new(config.clone(), descript),
            config,
            transport,
            files,
            queue: Default::default(),
            globals: Default::default(),
        }
    }

    /// Queues a request for `pool`. Secret attributes are published only when `keys` are given.
    pub fn add(
        &mut self,
        pool: Option<&str>,
        request: RequestRecord,
        keys: Option<Arc<FactoryKeys>>,
    ) {
        self.queue
            .entry(pool.map(|p| p.to_string()))
            .or_default()
            .push(QueuedRequest { request, keys });
    }

    /// Publishes the credential inventory to `pool` during the next [`build_and_send`].
    /// A later call for the same pool replaces the earlier one.
    ///
    /// [`build_and_send`]: MultiAdvertiser::build_and_send
    pub fn add_global(
        &mut self,
        pool: Option<&str>,
        request_name: Option<&str>,
        security_name: Option<&str>,
        keys: Arc<FactoryKeys>,
    ) {
        self.globals.insert(
            pool.map(|p| p.to_string()),
            GlobalRequest {
                request_name: request_name.map(|s| s.to_string()),
                security_name: security_name.map(|s| s.to_string()),
                keys,
            },
        );
    }

    /// Number of queued (not yet encoded) requests.
    pub fn queue_len(&self) -> usize {
        self.queue.values().map(|requests| requests.len()).sum()
    }

    /// Encodes and transmits everything queued, one pool at a time.
    ///
    /// A failing pool does not stop the others, every failure is listed in the returned report.
    /// The queue is empty afterwards in any case.
    pub fn build_and_send(&mut self) -> AdvertiseReport {
        let mut queue = std::mem::take(&mut self.queue);
        let mut globals = std::mem::take(&mut self.globals);
        let targets: BTreeSet<PoolName> = queue.keys().chain(globals.keys()).cloned().collect();

        let mut report = AdvertiseReport::default();
        for target in targets {
            let global = globals.remove(&target);
            let requests = queue.remove(&target).unwrap_or_default();
            let mut sent = 0;
            let result = self.send_target(target.as_deref(), global, requests, &mut sent);
            report.sent += sent;
            if let Err(error) = result {
                log::warn!(
                    "Advertising to {} failed: {error:#}",
                    pool_display(target.as_deref())
                );
                report.failures.push(AdvertiseFailure { target, error });
            }
        }
        report
    }

    fn send_target(
        &mut self,
        pool: Option<&str>,
        global: Option<GlobalRequest>,
        requests: Vec<QueuedRequest>,
        sent: &mut usize,
    ) -> TransportResult<()> {
        if let Some(global) = global {
            let record = self.encoder.encode_global(
                global.request_name.as_deref(),
                global.security_name.as_deref(),
                Some(&global.keys),
            )?;
            self.send_records(pool, &[record], false)?;
            *sent += 1;
        }

        let mut records = Vec::new();
        for queued in &requests {
            records.extend(self.encoder.encode(&queued.request, queued.keys.as_deref())?);
        }
        if records.is_empty() {
            return Ok(());
        }

        if self.config.advertise_use_multi {
            self.send_records(pool, &records, true)?;
            *sent += records.len();
        } else {
            for record in &records {
                self.send_records(pool, std::slice::from_ref(record), false)?;
                *sent += 1;
            }
        }
        Ok(())
    }

    fn send_records(
        &mut self,
        pool: Option<&str>,
        records: &[DirectoryRecord],
        multi: bool,
    ) -> TransportResult<()> {
        let mut content = String::new();
        for record in records {
            content.push_str(&record.to_text());
            content.push('\n');
        }
        let file = self
            .files
            .write(&content)
            .context("Cannot write request file")?;
        self.transport
            .advertise(file.path(), UpdateCommand::UpdateMasterAd, pool, multi)
    }

    /// Removes the request `request_name` published by this frontend from `pool`.
    pub fn deadvertise(&mut self, pool: Option<&str>, request_name: &str) -> crate::Result<()> {
        let my_name = self.encoder.descript().my_name.clone();
        deadvertise(
            self.transport.as_ref(),
            &self.config,
            &mut self.files,
            pool,
            &my_name,
            Some(request_name),
        )
    }

    /// Removes every request published by this frontend from `pool`.
    pub fn deadvertise_all(&mut self, pool: Option<&str>) -> crate::Result<()> {
        let my_name = self.encoder.descript().my_name.clone();
        deadvertise(
            self.transport.as_ref(),
            &self.config,
            &mut self.files,
            pool,
            &my_name,
            None,
        )
    }
}

/// Invalidates requests of client `my_name`, either a single one or all of them.
pub fn deadvertise(
    transport: &dyn DirectoryTransport,
    config: &ProtocolConfig,
    files: &mut TransientFiles,
    pool: Option<&str>,
    my_name: &str,
    request_name: Option<&str>,
) -> crate::Result<()> {
    let requirements = match request_name {
        Some(request_name) => format!("Name == \"{request_name}@{my_name}\""),
        None => format!("ClientName == \"{my_name}\""),
    };
    let record = DirectoryRecord::query(&config.client_id, requirements);
    let file = files.write(&record.to_text())?;
    transport.invalidate(file.path(), UpdateCommand::InvalidateMasterAds, pool)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::MultiAdvertiser;
    use crate::common::config::ProtocolConfig;
    use crate::common::error::FrontendError;
    use crate::crypto::{PublicKey, X25519PrivateKey};
    use crate::directory::{UpdateCommand, parse_records};
    use crate::request::keys::KeyCache;
    use crate::request::{RequestConstraint, RequestRecord};
    use crate::tests::utils::{TestTransport, credential, descript};
    use std::rc::Rc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config(dir: &TempDir, multi: bool) -> Arc<ProtocolConfig> {
        Arc::new(ProtocolConfig {
            tmp_dir: dir.path().to_path_buf(),
            advertise_use_multi: multi,
            ..Default::default()
        })
    }

    fn request(name: &str) -> RequestRecord {
        RequestRecord::new(name, "entry", 2, 10, Some("WAIT")).unwrap()
    }

    #[test]
    fn test_two_requests_single_record_files() {
        let dir = TempDir::with_prefix("gfe").unwrap();
        let tmp = TempDir::with_prefix("gfe").unwrap();
        let cred = credential(&dir, "proxy", "grid_proxy", "grid");
        let transport = Rc::new(TestTransport::default());
        let mut advertiser = MultiAdvertiser::new(
            config(&tmp, false),
            Arc::new(descript(Some(vec![cred]))),
            transport.clone(),
        );

        advertiser.add(Some("pool1"), request("a@factory"), None);
        advertiser.add(Some("pool1"), request("b@factory"), None);
        assert_eq!(advertiser.queue_len(), 2);

        let report = advertiser.build_and_send();
        assert!(report.is_ok());
        assert_eq!(report.sent, 2);
        assert_eq!(advertiser.queue_len(), 0);

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].file, calls[1].file);
        for call in &calls {
            assert_eq!(call.command, UpdateCommand::UpdateMasterAd);
            assert_eq!(call.pool.as_deref(), Some("pool1"));
            assert!(!call.multi);
            assert!(!call.file.exists());
            assert_eq!(parse_records(&call.content).len(), 1);
        }
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);

        // Nothing queued anymore
        let report = advertiser.build_and_send();
        assert_eq!(report.sent, 0);
        assert_eq!(transport.calls().len(), 2);
    }

    #[test]
    fn test_multi_record_file() {
        let tmp = TempDir::with_prefix("gfe").unwrap();
        let transport = Rc::new(TestTransport::default());
        let mut advertiser =
            MultiAdvertiser::new(config(&tmp, true), Arc::new(descript(None)), transport.clone());
        advertiser.add(None, request("a@factory"), None);
        advertiser.add(None, request("b@factory"), None);
        advertiser.add(None, request("c@factory"), None);

        let report = advertiser.build_and_send();
        assert_eq!(report.into_result().unwrap(), 3);
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].multi);
        assert!(calls[0].pool.is_none());
        let records = parse_records(&calls[0].content);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].get_str("ReqName"), Some("c@factory"));
    }

    #[test]
    fn test_failing_target_is_isolated() {
        let tmp = TempDir::with_prefix("gfe").unwrap();
        let transport = Rc::new(TestTransport::default());
        transport.fail_pool("broken");
        let mut advertiser = MultiAdvertiser::new(
            config(&tmp, false),
            Arc::new(descript(None)),
            transport.clone(),
        );
        advertiser.add(Some("broken"), request("a@factory"), None);
        advertiser.add(Some("working"), request("b@factory"), None);

        let report = advertiser.build_and_send();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].target.as_deref(), Some("broken"));

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        let sent: Vec<_> = calls.iter().filter(|call| call.succeeded).collect();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].pool.as_deref(), Some("working"));
        assert!(calls.iter().all(|call| !call.file.exists()));
        assert_eq!(advertiser.queue_len(), 0);

        match report.into_result() {
            Err(FrontendError::MultiAdvertise(failures)) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].to_string().starts_with("broken: "));
            }
            _ => panic!("Expected an aggregate error"),
        }
    }

    #[test]
    fn test_global_request() {
        let dir = TempDir::with_prefix("gfe").unwrap();
        let tmp = TempDir::with_prefix("gfe").unwrap();
        let cred = credential(&dir, "proxy", "grid_proxy", "grid");
        let transport = Rc::new(TestTransport::default());
        let mut advertiser = MultiAdvertiser::new(
            config(&tmp, true),
            Arc::new(descript(Some(vec![cred]))),
            transport.clone(),
        );
        let public: Arc<dyn PublicKey> =
            Arc::new(X25519PrivateKey::generate().public_key().unwrap());
        let mut cache = KeyCache::new();
        let keys = cache.get_or_create("fe@host", "1", public, None);

        advertiser.add_global(Some("pool1"), None, Some("sec"), keys.clone());
        advertiser.add(
            Some("pool1"),
            request("a@factory").with_constraint(RequestConstraint::new("other", "Any")),
            Some(keys),
        );

        let report = advertiser.build_and_send();
        assert_eq!(report.sent, 1);
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].multi);
        let records = parse_records(&calls[0].content);
        assert_eq!(records[0].get_str("MyType"), Some("glideclientglobal"));
        assert!(records[0].get("GlideinEncParamNumberOfCredentials").is_some());
    }

    #[test]
    fn test_deadvertise() {
        let tmp = TempDir::with_prefix("gfe").unwrap();
        let transport = Rc::new(TestTransport::default());
        let mut advertiser = MultiAdvertiser::new(
            config(&tmp, false),
            Arc::new(descript(None)),
            transport.clone(),
        );
        advertiser.deadvertise(Some("pool1"), "a@factory").unwrap();
        advertiser.deadvertise_all(None).unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].command, UpdateCommand::InvalidateMasterAds);
        assert_eq!(
            calls[0].content,
            "MyType = \"Query\"\nTargetType = \"glideclient\"\nRequirements = Name == \"a@factory@fe.main\"\n"
        );
        assert!(
            calls[1]
                .content
                .ends_with("Requirements = ClientName == \"fe.main\"\n")
        );
        assert!(calls.iter().all(|call| !call.file.exists()));
    }
}
