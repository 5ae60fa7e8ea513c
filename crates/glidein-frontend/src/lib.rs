pub mod common;
pub mod credential;
pub mod crypto;
pub mod directory;
pub mod request;
pub mod status;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::FrontendError;
pub type Result<T> = std::result::Result<T, Error>;

pub type Map<K, V> = hashbrown::HashMap<K, V>;
pub type Set<T> = hashbrown::HashSet<T>;

/// Software version tag published in every record.
pub const FRONTEND_VERSION: &str = {
    match option_env!("GWMS_BUILD_VERSION") {
        Some(version) => version,
        None => const_format::concatcp!("glideinWMS ", env!("CARGO_PKG_VERSION"), "-dev"),
    }
};
