use std::{
    collections::HashMap,
    fmt::{self, Display},
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;

use crate::{PanelcoreError, PanelcoreResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Reported in place of an address that could not be resolved.
pub const PUBLIC_IP_UNAVAILABLE: &str = "N/A";

/// The IPv4 lookup service.
pub const IPV4_LOOKUP_URL: &str = "https://api.ipify.org";

/// The IPv6 lookup service.
pub const IPV6_LOOKUP_URL: &str = "https://api6.ipify.org";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    /// IPv4.
    V4,

    /// IPv6.
    V6,
}

/// Looks up the host's public address for one family.
#[async_trait]
pub trait IpResolver: Send + Sync {
    /// Resolves the public address of `family`.
    async fn resolve(&self, family: IpFamily) -> PanelcoreResult<String>;
}

/// Resolves public addresses through the ipify HTTP services.
#[derive(Debug, Clone)]
pub struct HttpIpResolver {
    client: reqwest::Client,
}

/// Memoizes public addresses per family after the first successful lookup.
///
/// Until a family resolves, every call retries the lookup and reports
/// [`PUBLIC_IP_UNAVAILABLE`]. Once it resolves, the resolver is never asked again.
pub struct PublicIpCache {
    resolver: Arc<dyn IpResolver>,
    resolved: RwLock<HashMap<IpFamily, String>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl IpFamily {
    /// The lookup URL for the family.
    pub fn lookup_url(&self) -> &'static str {
        match self {
            Self::V4 => IPV4_LOOKUP_URL,
            Self::V6 => IPV6_LOOKUP_URL,
        }
    }
}

impl HttpIpResolver {
    /// Creates a resolver with a bounded request timeout.
    pub fn new() -> PanelcoreResult<Self> {
        let client = reqwest::Client::builder().timeout(LOOKUP_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

impl PublicIpCache {
    /// Creates an empty cache backed by `resolver`.
    pub fn new(resolver: Arc<dyn IpResolver>) -> Self {
        Self {
            resolver,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached address, resolving it if no lookup has succeeded yet.
    pub async fn get(&self, family: IpFamily) -> String {
        if let Some(address) = self.cached(family) {
            return address;
        }

        match self.resolver.resolve(family).await {
            Ok(address) => {
                if let Ok(mut resolved) = self.resolved.write() {
                    resolved.insert(family, address.clone());
                }
                address
            }
            Err(e) => {
                tracing::warn!(family = %family, error = %e, "public ip lookup failed");
                PUBLIC_IP_UNAVAILABLE.to_string()
            }
        }
    }

    /// The memoized address for `family`, if any.
    pub fn cached(&self, family: IpFamily) -> Option<String> {
        self.resolved
            .read()
            .ok()
            .and_then(|resolved| resolved.get(&family).cloned())
    }

    /// Forgets every resolved address.
    pub fn reset(&self) {
        if let Ok(mut resolved) = self.resolved.write() {
            resolved.clear();
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl IpResolver for HttpIpResolver {
    async fn resolve(&self, family: IpFamily) -> PanelcoreResult<String> {
        let address = self
            .client
            .get(family.lookup_url())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let address = address.trim();
        if address.is_empty() {
            return Err(PanelcoreError::Probe {
                probe: "public_ip",
                reason: format!("empty response from {}", family.lookup_url()),
            });
        }

        Ok(address.to_string())
    }
}

impl Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "ipv4"),
            Self::V6 => write!(f, "ipv6"),
        }
    }
}

impl fmt::Debug for PublicIpCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicIpCache")
            .field("resolved", &self.resolved)
            .finish_non_exhaustive()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Fails a scripted number of times per family, then answers.
    #[derive(Default)]
    struct FlakyResolver {
        failures_left: Mutex<HashMap<IpFamily, usize>>,
        calls: Mutex<Vec<IpFamily>>,
    }

    impl FlakyResolver {
        fn failing(v4: usize, v6: usize) -> Self {
            let resolver = Self::default();
            *resolver.failures_left.lock().unwrap() =
                [(IpFamily::V4, v4), (IpFamily::V6, v6)].into_iter().collect();
            resolver
        }

        fn calls_for(&self, family: IpFamily) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|f| **f == family)
                .count()
        }
    }

    #[async_trait]
    impl IpResolver for FlakyResolver {
        async fn resolve(&self, family: IpFamily) -> PanelcoreResult<String> {
            self.calls.lock().unwrap().push(family);

            let mut failures = self.failures_left.lock().unwrap();
            let left = failures.entry(family).or_default();
            if *left > 0 {
                *left -= 1;
                return Err(PanelcoreError::Probe {
                    probe: "public_ip",
                    reason: "unreachable".to_string(),
                });
            }

            Ok(match family {
                IpFamily::V4 => "203.0.113.7".to_string(),
                IpFamily::V6 => "2001:db8::7".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_public_ip_cache_retries_until_first_success() {
        let resolver = Arc::new(FlakyResolver::failing(2, 0));
        let cache = PublicIpCache::new(resolver.clone());

        assert_eq!(cache.get(IpFamily::V4).await, PUBLIC_IP_UNAVAILABLE);
        assert_eq!(cache.get(IpFamily::V4).await, PUBLIC_IP_UNAVAILABLE);
        assert_eq!(cache.get(IpFamily::V4).await, "203.0.113.7");
        assert_eq!(cache.get(IpFamily::V4).await, "203.0.113.7");
        assert_eq!(resolver.calls_for(IpFamily::V4), 3);
    }

    #[tokio::test]
    async fn test_public_ip_cache_families_are_independent() {
        let resolver = Arc::new(FlakyResolver::failing(0, 1));
        let cache = PublicIpCache::new(resolver.clone());

        assert_eq!(cache.get(IpFamily::V4).await, "203.0.113.7");
        assert_eq!(cache.get(IpFamily::V6).await, PUBLIC_IP_UNAVAILABLE);
        assert_eq!(cache.cached(IpFamily::V4).as_deref(), Some("203.0.113.7"));
        assert_eq!(cache.cached(IpFamily::V6), None);

        assert_eq!(cache.get(IpFamily::V6).await, "2001:db8::7");
        assert_eq!(resolver.calls_for(IpFamily::V4), 1);
        assert_eq!(resolver.calls_for(IpFamily::V6), 2);
    }

    #[tokio::test]
    async fn test_public_ip_cache_reset_forces_lookup() {
        let resolver = Arc::new(FlakyResolver::default());
        let cache = PublicIpCache::new(resolver.clone());

        cache.get(IpFamily::V4).await;
        cache.reset();
        assert_eq!(cache.cached(IpFamily::V4), None);

        cache.get(IpFamily::V4).await;
        assert_eq!(resolver.calls_for(IpFamily::V4), 2);
    }
}
