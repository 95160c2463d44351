use std::str::FromStr;
use std::time::Duration;

use crate::error::MessagesError;

/// Messages fetched per page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Placeholder avatar shown for every author until profiles carry one.
pub const DEFAULT_AVATAR_URL: &str = "https://picsum.photos/50?random=10";

pub const DEFAULT_USER_CACHE_CAPACITY: usize = 1024;

/// 30 minutes. Display names rarely change within a session.
pub const DEFAULT_USER_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct MessagesConfig {
    pub page_size: u32,
    pub avatar_url: String,
    pub user_cache_capacity: usize,
    pub user_cache_ttl: Duration,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            avatar_url: DEFAULT_AVATAR_URL.to_string(),
            user_cache_capacity: DEFAULT_USER_CACHE_CAPACITY,
            user_cache_ttl: DEFAULT_USER_CACHE_TTL,
        }
    }
}

impl MessagesConfig {
    /// Read overrides from `NEXUS_*` environment variables, falling back to
    /// the defaults above for anything unset.
    pub fn from_env() -> Result<Self, MessagesError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MessagesError> {
        let page_size = parse_var(&lookup, "NEXUS_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 {
            return Err(MessagesError::ZeroConfig { var: "NEXUS_PAGE_SIZE" });
        }

        let user_cache_capacity =
            parse_var(&lookup, "NEXUS_USER_CACHE_CAPACITY", DEFAULT_USER_CACHE_CAPACITY)?;
        if user_cache_capacity == 0 {
            return Err(MessagesError::ZeroConfig { var: "NEXUS_USER_CACHE_CAPACITY" });
        }

        let ttl_secs = parse_var(
            &lookup,
            "NEXUS_USER_CACHE_TTL_SECS",
            DEFAULT_USER_CACHE_TTL.as_secs(),
        )?;

        Ok(Self {
            page_size,
            avatar_url: lookup("NEXUS_AVATAR_URL").unwrap_or_else(|| DEFAULT_AVATAR_URL.to_string()),
            user_cache_capacity,
            user_cache_ttl: Duration::from_secs(ttl_secs),
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, MessagesError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MessagesError::InvalidConfig { var, value: raw }),
    }
}
