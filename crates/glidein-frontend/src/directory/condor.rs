use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context;
use bstr::ByteSlice;

use crate::directory::{
    DirectoryRecord, DirectoryTransport, TransportResult, UpdateCommand, parse_records,
};

const ADVERTISE_PROGRAM: &str = "condor_advertise";
const STATUS_PROGRAM: &str = "condor_status";

pub const CONDOR_CONFIG_ENV: &str = "CONDOR_CONFIG";
const CLIENT_INTEGRITY_ENV: &str = "_CONDOR_SEC_CLIENT_INTEGRITY";

/// Transport driving the HTCondor command line tools.
pub struct CondorTransport {
    bin_dir: Option<PathBuf>,
    use_tcp: bool,
    condor_config: Option<PathBuf>,
}

impl CondorTransport {
    pub fn new(bin_dir: Option<PathBuf>, use_tcp: bool) -> Self {
        Self {
            bin_dir,
            use_tcp,
            condor_config: None,
        }
    }

    /// Configuration file passed to the tools as `CONDOR_CONFIG`.
    pub fn with_condor_config(mut self, condor_config: Option<PathBuf>) -> Self {
        self.condor_config = condor_config;
        self
    }

    fn program(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Environment variables set for every started tool.
    fn command_env(&self, require_integrity: bool) -> Vec<(&'static str, OsString)> {
        let mut env = Vec::new();
        if let Some(config) = &self.condor_config {
            env.push((CONDOR_CONFIG_ENV, config.clone().into_os_string()));
        }
        if require_integrity {
            env.push((CLIENT_INTEGRITY_ENV, OsString::from("REQUIRED")));
        }
        env
    }

    fn run(
        &self,
        program: &str,
        arguments: Vec<String>,
        require_integrity: bool,
    ) -> TransportResult<Output> {
        let program_path = self.program(program);
        log::debug!(
            "Running command `{} {}`",
            program_path.display(),
            arguments.join(" ")
        );
        let output = Command::new(&program_path)
            .args(&arguments)
            .envs(self.command_env(require_integrity))
            .output()
            .with_context(|| format!("{program} start failed"))?;
        check_command_output(output).with_context(|| format!("{program} execution failed"))
    }

    fn query_args(&self, pool: Option<&str>, type_filter: &str, constraint: &str) -> Vec<String> {
        let mut arguments = Vec::new();
        if let Some(pool) = pool {
            arguments.push("-pool".to_string());
            arguments.push(pool.to_string());
        }
        arguments.push(format!("-{type_filter}"));
        arguments.push("-long".to_string());
        arguments.push("-constraint".to_string());
        arguments.push(constraint.to_string());
        arguments
    }

    fn advertise_args(
        &self,
        file: &Path,
        command: UpdateCommand,
        pool: Option<&str>,
        multi: bool,
    ) -> Vec<String> {
        let mut arguments = Vec::new();
        if self.use_tcp {
            arguments.push("-tcp".to_string());
        }
        if multi {
            arguments.push("-multiple".to_string());
        }
        if let Some(pool) = pool {
            arguments.push("-pool".to_string());
            arguments.push(pool.to_string());
        }
        arguments.push(command.to_string());
        arguments.push(file.display().to_string());
        arguments
    }
}

pub fn check_command_output(output: Output) -> TransportResult<Output> {
    let status = output.status;
    if !status.success() {
        return Err(anyhow::anyhow!(
            "Exit code: {}\nStderr: {}\nStdout: {}",
            status.code().unwrap_or(-1),
            output.stderr.to_str_lossy().trim(),
            output.stdout.to_str_lossy().trim()
        ));
    }
    Ok(output)
}

impl DirectoryTransport for CondorTransport {
    fn query(
        &self,
        pool: Option<&str>,
        type_filter: &str,
        constraint: &str,
        require_integrity: bool,
    ) -> TransportResult<Vec<DirectoryRecord>> {
        let output = self.run(
            STATUS_PROGRAM,
            self.query_args(pool, type_filter, constraint),
            require_integrity,
        )?;
        let stdout = output
            .stdout
            .to_str()
            .map_err(|e| anyhow::anyhow!("Invalid UTF-8 {} output: {:?}", STATUS_PROGRAM, e))?;
        Ok(parse_records(stdout))
    }

    fn advertise(
        &self,
        file: &Path,
        command: UpdateCommand,
        pool: Option<&str>,
        multi: bool,
    ) -> TransportResult<()> {
        self.run(
            ADVERTISE_PROGRAM,
            self.advertise_args(file, command, pool, multi),
            false,
        )?;
        Ok(())
    }

    fn invalidate(
        &self,
        file: &Path,
        command: UpdateCommand,
        pool: Option<&str>,
    ) -> TransportResult<()> {
        self.run(
            ADVERTISE_PROGRAM,
            self.advertise_args(file, command, pool, false),
            false,
        )?;
        Ok(())
    }
}
