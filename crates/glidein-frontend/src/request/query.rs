use crate::Map;
use crate::common::config::ProtocolConfig;
use crate::directory::{ClassifiedAttrs, DirectoryTransport, classify};

const ANY_IDENTITY: &str = "*";
const QUERY_TYPE: &str = "any";

/// Selects factory entries to request glideins from.
#[derive(Debug, Clone, Default)]
pub struct GlideinFilter {
    /// Authenticated identity of the factory, `None` or `*` disables the check
    pub factory_identity: Option<String>,
    pub signtype: Option<String>,
    pub additional_constraint: Option<String>,
    /// Whether the frontend has credentials to hand over
    pub have_credentials: bool,
    /// When `false`, entries this frontend cannot use are returned too
    pub only_matching: bool,
}

fn identity_constraint(constraint: &mut String, identity: Option<&str>) {
    if let Some(identity) = identity.filter(|identity| *identity != ANY_IDENTITY) {
        constraint.push_str(&format!(" && (AuthenticatedIdentity=?=\"{identity}\")"));
    }
}

fn additional(constraint: String, additional: Option<&str>) -> String {
    match additional {
        Some(additional) => format!("{constraint} && ({additional})"),
        None => constraint,
    }
}

pub fn glideins_constraint(config: &ProtocolConfig, filter: &GlideinFilter) -> String {
    let mut constraint = format!("(GlideinMyType=?=\"{}\")", config.factory_id);
    identity_constraint(&mut constraint, filter.factory_identity.as_deref());
    if let Some(signtype) = &filter.signtype {
        constraint.push_str(&format!(
            " && stringListMember(\"{signtype}\",{})",
            config.signtype_attr
        ));
    }
    if filter.only_matching {
        if filter.have_credentials {
            constraint.push_str(&format!(
                " && (PubKeyType=?=\"{}\") && (GlideinAllowx509_Proxy=!=False)",
                config.pub_key_type
            ));
        } else {
            constraint.push_str(" && (GlideinRequirex509_Proxy=!=True)");
        }
    }
    additional(constraint, filter.additional_constraint.as_deref())
}

pub fn globals_constraint(
    config: &ProtocolConfig,
    factory_identity: Option<&str>,
    additional_constraint: Option<&str>,
) -> String {
    let mut constraint = format!("(GlideinMyType=?=\"{}\")", config.factory_global);
    identity_constraint(&mut constraint, factory_identity);
    additional(constraint, additional_constraint)
}

pub fn client_monitoring_constraint(
    config: &ProtocolConfig,
    my_name: Option<&str>,
    additional_constraint: Option<&str>,
) -> String {
    let mut constraint = format!("(GlideinMyType=?=\"{}\")", config.factoryclient_id);
    if let Some(my_name) = my_name {
        constraint.push_str(&format!(" && (ReqClientName=?=\"{my_name}\")"));
    }
    additional(constraint, additional_constraint)
}

fn run_query(
    transport: &dyn DirectoryTransport,
    config: &ProtocolConfig,
    pool: Option<&str>,
    constraint: &str,
    require_integrity: bool,
) -> crate::Result<Map<String, ClassifiedAttrs>> {
    log::debug!("Querying {constraint}");
    let records = transport.query(pool, QUERY_TYPE, constraint, require_integrity)?;
    let mut result = Map::new();
    for record in records {
        let Some(name) = record.get_str("Name").map(|name| name.to_string()) else {
            log::debug!("Ignoring a directory record without a name");
            continue;
        };
        result.insert(name, classify(&record, config));
    }
    Ok(result)
}

/// Factory entries published in `pool`, keyed by record name. The answer has to be
/// integrity protected.
pub fn find_glideins(
    transport: &dyn DirectoryTransport,
    config: &ProtocolConfig,
    pool: Option<&str>,
    filter: &GlideinFilter,
) -> crate::Result<Map<String, ClassifiedAttrs>> {
    run_query(
        transport,
        config,
        pool,
        &glideins_constraint(config, filter),
        true,
    )
}

/// Factory-wide records, carrying the keys used for credential inventories. The answer has
/// to be integrity protected.
pub fn find_globals(
    transport: &dyn DirectoryTransport,
    config: &ProtocolConfig,
    pool: Option<&str>,
    factory_identity: Option<&str>,
    additional_constraint: Option<&str>,
) -> crate::Result<Map<String, ClassifiedAttrs>> {
    let constraint = globals_constraint(config, factory_identity, additional_constraint);
    run_query(transport, config, pool, &constraint, true)
}

/// Monitoring records that factories publish about this frontend.
pub fn find_client_monitoring(
    transport: &dyn DirectoryTransport,
    config: &ProtocolConfig,
    pool: Option<&str>,
    my_name: Option<&str>,
    additional_constraint: Option<&str>,
) -> crate::Result<Map<String, ClassifiedAttrs>> {
    let constraint = client_monitoring_constraint(config, my_name, additional_constraint);
    run_query(transport, config, pool, &constraint, false)
}
