//! Records exchanged through the shared directory service and the transport used to publish
//! them.

pub mod condor;
pub mod transient;

use std::fmt::{Display, Formatter};
use std::path::Path;

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag_no_case, take_while};
use nom::character::complete::{char, digit1, one_of, satisfy, space0};
use nom::combinator::{map, map_res, opt, recognize, rest, value, verify};
use nom::number::complete::recognize_float;
use nom::sequence::{delimited, pair, separated_pair};

use crate::Map;
use crate::common::config::ProtocolConfig;
use crate::common::parser::{NomResult, consume_all};

pub type TransportResult<T> = anyhow::Result<T>;

/// Address of a directory pool, `None` stands for the default (local) pool.
pub type PoolName = Option<String>;

pub fn pool_display(pool: Option<&str>) -> &str {
    pool.unwrap_or("<default pool>")
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// Directory expression, written verbatim
    Expr(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Parses a value as printed by the directory. Anything that is not a literal is kept
    /// as an expression.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        consume_all(p_value, value).unwrap_or_else(|_| AttrValue::Expr(value.to_string()))
    }
}

fn p_quoted_string(input: &str) -> NomResult<String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                is_not("\\\""),
                '\\',
                alt((
                    value("\\", char('\\')),
                    value("\"", char('"')),
                    value("\n", char('n')),
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

/// `real("INF")`, `real("-INF")` and `real("NaN")`
fn p_special_real(input: &str) -> NomResult<f64> {
    map_res(
        delimited(tag_no_case("real("), p_quoted_string, char(')')),
        |text: String| text.parse::<f64>(),
    )(input)
}

fn p_float(input: &str) -> NomResult<f64> {
    map_res(
        verify(recognize_float, |text: &str| text.contains(['.', 'e', 'E'])),
        |text: &str| text.parse::<f64>(),
    )(input)
}

fn p_int(input: &str) -> NomResult<i64> {
    map_res(recognize(pair(opt(one_of("+-")), digit1)), |text: &str| {
        text.parse::<i64>()
    })(input)
}

fn p_bool(input: &str) -> NomResult<bool> {
    alt((
        value(true, tag_no_case("true")),
        value(false, tag_no_case("false")),
    ))(input)
}

fn p_value(input: &str) -> NomResult<AttrValue> {
    alt((
        map(p_quoted_string, AttrValue::Str),
        map(p_special_real, AttrValue::Float),
        map(p_float, AttrValue::Float),
        map(p_int, AttrValue::Int),
        map(p_bool, AttrValue::Bool),
    ))(input)
}

fn p_attr_name(input: &str) -> NomResult<&str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// `Name = value`, the value is returned unparsed.
fn p_attr_line(input: &str) -> NomResult<(&str, &str)> {
    separated_pair(p_attr_name, delimited(space0, char('='), space0), rest)(input)
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        AttrValue::Int(value as i64)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

/// Escapes backslashes, quotes and newlines of a quoted value.
pub fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Int(value) => write!(f, "{value}"),
            AttrValue::Float(value) if value.is_nan() => f.write_str("real(\"NaN\")"),
            AttrValue::Float(value) if value.is_infinite() => {
                let sign = if value.is_sign_negative() { "-" } else { "" };
                write!(f, "real(\"{sign}INF\")")
            }
            AttrValue::Float(value) => write!(f, "{value:?}"),
            AttrValue::Bool(true) => f.write_str("True"),
            AttrValue::Bool(false) => f.write_str("False"),
            AttrValue::Str(value) => write!(f, "\"{}\"", escape(value)),
            AttrValue::Expr(value) => f.write_str(value),
        }
    }
}

/// Flat ordered list of attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryRecord {
    attrs: Vec<(String, AttrValue)>,
}

impl DirectoryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidation query removing every record of `target_type` matching `requirements`.
    pub fn query(target_type: &str, requirements: String) -> Self {
        let mut record = Self::new();
        record.push("MyType", "Query");
        record.push("TargetType", target_type);
        record.push("Requirements", AttrValue::Expr(requirements));
        record
    }

    pub fn push<K: Into<String>, V: Into<AttrValue>>(&mut self, key: K, value: V) {
        self.attrs.push((key.into(), value.into()));
    }

    /// Replaces the value of an existing attribute in place or appends it.
    pub fn set<K: Into<String>, V: Into<AttrValue>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(name, _)| *name == key) {
            Some(entry) => entry.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attrs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|value| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.attrs.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Writes `Name = value` lines, one per attribute.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for (name, value) in &self.attrs {
            text.push_str(&format!("{name} = {value}\n"));
        }
        text
    }
}

impl Display for DirectoryRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Parses long-form directory output, records are separated by empty lines.
pub fn parse_records(text: &str) -> Vec<DirectoryRecord> {
    let mut records = Vec::new();
    let mut current = DirectoryRecord::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }
        match consume_all(p_attr_line, line) {
            Ok((name, value)) => current.push(name, AttrValue::parse(value)),
            Err(error) => log::debug!("Ignoring malformed directory line `{line}`: {error}"),
        }
    }
    if !current.is_empty() {
        records.push(current);
    }
    records
}

/// Attributes of a record received from the directory, split by prefix.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ClassifiedAttrs {
    pub attrs: Map<String, AttrValue>,
    pub params: Map<String, AttrValue>,
    pub monitor: Map<String, AttrValue>,
}

/// Drops reserved attributes and moves prefixed ones into `params` and `monitor`
/// (without the prefix). Everything else stays in `attrs`.
pub fn classify(record: &DirectoryRecord, config: &ProtocolConfig) -> ClassifiedAttrs {
    let mut classified = ClassifiedAttrs::default();
    for (name, value) in record.iter() {
        if config.reserved_names.iter().any(|reserved| reserved == name) {
            continue;
        }
        if let Some(param) = name.strip_prefix(config.param_prefix.as_str()) {
            classified.params.insert(param.to_string(), value.clone());
        } else if let Some(monitor) = name.strip_prefix(config.monitor_prefix.as_str()) {
            classified.monitor.insert(monitor.to_string(), value.clone());
        } else {
            classified.attrs.insert(name.to_string(), value.clone());
        }
    }
    classified
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCommand {
    UpdateMasterAd,
    InvalidateMasterAds,
    UpdateAdGeneric,
    InvalidateAdsGeneric,
}

impl UpdateCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateCommand::UpdateMasterAd => "UPDATE_MASTER_AD",
            UpdateCommand::InvalidateMasterAds => "INVALIDATE_MASTER_ADS",
            UpdateCommand::UpdateAdGeneric => "UPDATE_AD_GENERIC",
            UpdateCommand::InvalidateAdsGeneric => "INVALIDATE_ADS_GENERIC",
        }
    }
}

impl Display for UpdateCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mechanism that physically stores and serves directory records.
///
/// Queries with `require_integrity` fail unless the directory answers over an
/// integrity-protected channel.
///
/// Record files passed to `advertise` and `invalidate` are owned by the caller, which removes
/// them after the call regardless of its outcome.
pub trait DirectoryTransport {
    fn query(
        &self,
        pool: Option<&str>,
        type_filter: &str,
        constraint: &str,
        require_integrity: bool,
    ) -> TransportResult<Vec<DirectoryRecord>>;

    fn advertise(
        &self,
        file: &Path,
        command: UpdateCommand,
        pool: Option<&str>,
        multi: bool,
    ) -> TransportResult<()>;

    fn invalidate(
        &self,
        file: &Path,
        command: UpdateCommand,
        pool: Option<&str>,
    ) -> TransportResult<()>;
}

/// Transport failure of a single target directory.
#[derive(Debug)]
pub struct AdvertiseFailure {
    pub target: PoolName,
    pub error: anyhow::Error,
}

impl Display for AdvertiseFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {:#}",
            pool_display(self.target.as_deref()),
            self.error
        )
    }
}

/// Outcome of a batch transmission.
#[derive(Debug, Default)]
pub struct AdvertiseReport {
    /// Number of records confirmed by the transport
    pub sent: usize,
    pub failures: Vec<AdvertiseFailure>,
}

impl AdvertiseReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> crate::Result<usize> {
        if self.failures.is_empty() {
            Ok(self.sent)
        } else {
            Err(crate::Error::MultiAdvertise(self.failures))
        }
    }
}
