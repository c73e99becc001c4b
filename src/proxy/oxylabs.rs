//! Oxylabs-style residential proxy generator.
//!
//! A concrete `Proxy` source implementing the residential-provider mode
//! described here: each generated proxy's `auth.username` encodes
//! the provider's session id and geo-targeting parameters, and the proxy
//! is otherwise an ordinary `Proxy` as far as the pool is concerned.

use std::collections::HashSet;
use std::sync::Mutex;

use rand::Rng;
use tracing::debug;
use urlencoding::encode;

use super::{Proxy, ProxyType};

/// Default Oxylabs proxy host.
pub const DEFAULT_HOST: &str = "pr.oxylabs.io";
/// Default port for HTTP proxy mode (more reliable for browsers with auth).
pub const DEFAULT_PORT: u16 = 60000;
/// Default session time in minutes.
pub const DEFAULT_SESSTIME: u16 = 10;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OxylabsConfig {
    pub customer: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub country: String,
    pub sesstime: u16,
    pub scheme: String,
}

impl Default for OxylabsConfig {
    fn default() -> Self {
        Self {
            customer: String::new(),
            password: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            country: "us".to_string(),
            sesstime: DEFAULT_SESSTIME,
            scheme: "http".to_string(),
        }
    }
}

impl OxylabsConfig {
    pub fn new(customer: &str, password: &str) -> Self {
        Self {
            customer: customer.to_string(),
            password: password.to_string(),
            ..Default::default()
        }
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = country.to_lowercase();
        self
    }

    pub fn with_sesstime(mut self, minutes: u16) -> Self {
        self.sesstime = minutes;
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.customer.is_empty() && !self.password.is_empty()
    }
}

/// Global set of used session IDs, guaranteeing no reuse across the
/// lifetime of the process.
static USED_SESSIDS: std::sync::LazyLock<Mutex<HashSet<u64>>> =
    std::sync::LazyLock::new(|| Mutex::new(HashSet::new()));

#[derive(Debug)]
pub struct OxylabsProxyGenerator {
    config: OxylabsConfig,
}

impl OxylabsProxyGenerator {
    pub fn new(config: OxylabsConfig) -> Self {
        debug!(
            customer = %config.customer,
            country = %config.country,
            "oxylabs generator initialized (random sessid mode)"
        );
        Self { config }
    }

    fn allocate_sessid(&self) -> u64 {
        let mut rng = rand::thread_rng();
        let mut used = USED_SESSIDS.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let sessid: u64 = rng.gen_range(100_000_000..999_999_999);
            if used.insert(sessid) {
                return sessid;
            }
        }
    }

    fn build_username(&self, sessid: u64) -> String {
        format!(
            "customer-{}-cc-{}-sessid-{}-sesstime-{}",
            self.config.customer, self.config.country, sessid, self.config.sesstime
        )
    }

    /// Generate a fresh residential `Proxy`, with a unique session id
    /// baked into its username so each call yields a different egress IP.
    pub fn generate_proxy(&self) -> Proxy {
        let sessid = self.allocate_sessid();
        let username = self.build_username(sessid);
        let password = encode(&self.config.password).into_owned();

        let proxy_type = match self.config.scheme.as_str() {
            "https" => ProxyType::Https,
            "socks5" | "socks5h" => ProxyType::Socks5,
            "socks4" => ProxyType::Socks4,
            _ => ProxyType::Http,
        };

        Proxy::new(proxy_type, self.config.host.clone(), self.config.port)
            .with_auth(username, password)
            .with_country(self.config.country.clone())
            .residential()
    }

    pub fn generate_batch(&self, count: usize) -> Vec<Proxy> {
        (0..count).map(|_| self.generate_proxy()).collect()
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_proxies_have_distinct_sessions() {
        let generator = OxylabsProxyGenerator::new(OxylabsConfig::new("testcustomer", "testpass"));
        let p1 = generator.generate_proxy();
        let p2 = generator.generate_proxy();

        assert_ne!(p1.auth.unwrap().username, p2.auth.unwrap().username);
    }

    #[test]
    fn username_carries_provider_parameters() {
        let generator = OxylabsProxyGenerator::new(
            OxylabsConfig::new("acme", "secret").with_country("de"),
        );
        let proxy = generator.generate_proxy();
        let username = proxy.auth.unwrap().username;
        assert!(username.contains("customer-acme"));
        assert!(username.contains("cc-de"));
        assert!(username.contains("sessid-"));
        assert!(proxy.residential);
    }

    #[test]
    fn batch_generates_unique_session_ids() {
        let generator = OxylabsProxyGenerator::new(OxylabsConfig::new("t", "p"));
        let batch = generator.generate_batch(50);
        let unique: std::collections::HashSet<_> =
            batch.iter().map(|p| p.auth.as_ref().unwrap().username.clone()).collect();
        assert_eq!(unique.len(), 50);
    }
}
