use std::cell::RefCell;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use tempfile::TempDir;

use crate::Set;
use crate::credential::{Credential, CredentialTables, CredentialType};
use crate::directory::{DirectoryRecord, DirectoryTransport, TransportResult, UpdateCommand};
use crate::request::FrontendDescript;

/// Transport call captured by [`TestTransport`].
#[derive(Debug, Clone)]
pub struct TransportCall {
    pub file: PathBuf,
    /// Content of the record file at the time of the call
    pub content: String,
    pub command: UpdateCommand,
    pub pool: Option<String>,
    pub multi: bool,
    pub succeeded: bool,
}

/// Query captured by [`TestTransport`].
#[derive(Debug, Clone)]
pub struct QueryCall {
    pub pool: Option<String>,
    pub constraint: String,
    pub require_integrity: bool,
}

/// In-memory transport that records every call.
#[derive(Default)]
pub struct TestTransport {
    calls: RefCell<Vec<TransportCall>>,
    failing_pools: RefCell<Set<String>>,
    query_result: RefCell<Vec<DirectoryRecord>>,
    queries: RefCell<Vec<QueryCall>>,
}

impl TestTransport {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.borrow().clone()
    }

    /// Every call addressed to `pool` fails from now on.
    pub fn fail_pool(&self, pool: &str) {
        self.failing_pools.borrow_mut().insert(pool.to_string());
    }

    pub fn set_query_result(&self, records: Vec<DirectoryRecord>) {
        *self.query_result.borrow_mut() = records;
    }

    pub fn queries(&self) -> Vec<QueryCall> {
        self.queries.borrow().clone()
    }

    fn record_call(
        &self,
        file: &Path,
        command: UpdateCommand,
        pool: Option<&str>,
        multi: bool,
    ) -> TransportResult<()> {
        let content = std::fs::read_to_string(file)?;
        let succeeded =
            !pool.is_some_and(|pool| self.failing_pools.borrow().contains(pool));
        self.calls.borrow_mut().push(TransportCall {
            file: file.to_path_buf(),
            content,
            command,
            pool: pool.map(|pool| pool.to_string()),
            multi,
            succeeded,
        });
        if succeeded {
            Ok(())
        } else {
            Err(anyhow!("Cannot connect to the collector"))
        }
    }
}

impl DirectoryTransport for TestTransport {
    fn query(
        &self,
        pool: Option<&str>,
        _type_filter: &str,
        constraint: &str,
        require_integrity: bool,
    ) -> TransportResult<Vec<DirectoryRecord>> {
        self.queries.borrow_mut().push(QueryCall {
            pool: pool.map(|pool| pool.to_string()),
            constraint: constraint.to_string(),
            require_integrity,
        });
        Ok(self.query_result.borrow().clone())
    }

    fn advertise(
        &self,
        file: &Path,
        command: UpdateCommand,
        pool: Option<&str>,
        multi: bool,
    ) -> TransportResult<()> {
        self.record_call(file, command, pool, multi)
    }

    fn invalidate(
        &self,
        file: &Path,
        command: UpdateCommand,
        pool: Option<&str>,
    ) -> TransportResult<()> {
        self.record_call(file, command, pool, false)
    }
}

/// Creates a credential backed by `<dir>/<name>` containing `<name>-data`.
/// Pair credentials get a secondary file `<name>.key`.
pub fn credential(dir: &TempDir, name: &str, kind: &str, trust_domain: &str) -> Credential {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("{name}-data")).unwrap();

    let mut tables = CredentialTables::default();
    tables.types.insert(path.clone(), kind.to_string());
    tables
        .security_classes
        .insert(path.clone(), "frontend".to_string());
    tables
        .trust_domains
        .insert(path.clone(), trust_domain.to_string());
    if CredentialType::parse(kind).has_secondary() {
        let key_file = dir.path().join(format!("{name}.key"));
        std::fs::write(&key_file, format!("{name}-secret")).unwrap();
        tables.key_files.insert(path.clone(), key_file);
    }
    Credential::load(name, &path, &tables)
}

pub fn descript(credentials: Option<Vec<Credential>>) -> FrontendDescript {
    FrontendDescript {
        my_name: "fe.main".to_string(),
        frontend_name: "fe".to_string(),
        group_name: "main".to_string(),
        web_url: "http://web.example.org/frontend/".to_string(),
        main_descript: "description.e8a1b2.cfg".to_string(),
        group_descript: "description.e8a1b3.cfg".to_string(),
        signtype: "sha1".to_string(),
        main_sign: "0f3c6a".to_string(),
        group_sign: "8b12d4".to_string(),
        credentials,
    }
}
