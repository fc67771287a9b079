//! Reverse-DNS hostnames for flow addresses.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use lru::LruCache;
use minion_proto::FlowMessage;
use parking_lot::Mutex;
use tracing::{trace, warn};

const CACHE_SIZE: usize = 10_000;
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Resolves and caches PTR names, including negative answers.
pub struct HostnameResolver {
    resolver: Option<TokioResolver>,
    cache: Mutex<LruCache<IpAddr, Option<String>>>,
}

impl HostnameResolver {
    pub fn new() -> Self {
        let resolver = match TokioResolver::builder_tokio() {
            Ok(builder) => builder.build(),
            Err(e) => {
                warn!(error = %e, "Cannot read system resolver configuration, using defaults");
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            }
        };
        Self::with_resolver(Some(resolver))
    }

    /// A resolver that never looks anything up.
    pub fn disabled() -> Self {
        Self::with_resolver(None)
    }

    fn with_resolver(resolver: Option<TokioResolver>) -> Self {
        Self {
            resolver,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.resolver.is_some()
    }

    pub async fn hostname(&self, ip: IpAddr) -> Option<String> {
        let resolver = self.resolver.as_ref()?;
        let cached = self.cache.lock().get(&ip).cloned();
        if let Some(name) = cached {
            return name;
        }
        let name = match tokio::time::timeout(LOOKUP_TIMEOUT, resolver.reverse_lookup(ip)).await {
            Ok(Ok(names)) => names
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string()),
            Ok(Err(e)) => {
                trace!(%ip, error = %e, "Reverse lookup failed");
                None
            }
            Err(_) => {
                trace!(%ip, "Reverse lookup timed out");
                None
            }
        };
        self.cache.lock().put(ip, name.clone());
        name
    }

    /// Fills the source, destination and next-hop hostnames of `flow`.
    pub async fn enrich(&self, flow: &mut FlowMessage) {
        if !self.is_enabled() {
            return;
        }
        if let Some(name) = self.lookup(&flow.src_address).await {
            flow.src_hostname = name;
        }
        if let Some(name) = self.lookup(&flow.dst_address).await {
            flow.dst_hostname = name;
        }
        if let Some(name) = self.lookup(&flow.next_hop_address).await {
            flow.next_hop_hostname = name;
        }
    }

    async fn lookup(&self, address: &str) -> Option<String> {
        let ip = address.parse::<IpAddr>().ok()?;
        if ip.is_unspecified() {
            return None;
        }
        self.hostname(ip).await
    }
}

impl Default for HostnameResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_resolver_leaves_flow_untouched() {
        let resolver = HostnameResolver::disabled();
        let mut flow = FlowMessage {
            src_address: "127.0.0.1".into(),
            ..Default::default()
        };
        resolver.enrich(&mut flow).await;
        assert!(flow.src_hostname.is_empty());
        assert_eq!(resolver.hostname("127.0.0.1".parse().unwrap()).await, None);
    }
}
