//! Proxy pool: rotation, EMA-based health scoring, and eviction.
//!
//! Also hosts the Oxylabs residential-session generator (a concrete proxy
//! *source*, not the pool itself) and the local proxy forwarder Chrome
//! needs because it can't carry inline proxy credentials.

mod forwarder;
mod list;
mod oxylabs;

pub use forwarder::{allocate_port, LocalProxyForwarder};
pub use list::{format_proxy_line, parse_proxy_list, ProxyParseError};
pub use oxylabs::{OxylabsConfig, OxylabsProxyGenerator};

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Proxy scheme, matching the driver-handoff `server` URL prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    fn as_scheme(self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// A network egress point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proxy {
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    pub auth: Option<ProxyAuth>,
    pub country: Option<String>,
    pub residential: bool,
    pub score: f64,
    #[serde(skip)]
    pub last_used: Option<Instant>,
    pub inflight: u32,
    /// Forced-rotation policy for residential-provider proxies
    /// last paragraph): rotate after `session_duration` or after
    /// `max_failures` consecutive failed `Update(false)` calls.
    #[serde(skip)]
    pub issued_at: Option<Instant>,
    #[serde(skip)]
    pub consecutive_failures: u32,
}

impl Proxy {
    pub fn new(proxy_type: ProxyType, host: impl Into<String>, port: u16) -> Self {
        Self {
            proxy_type,
            host: host.into(),
            port,
            auth: None,
            country: None,
            residential: false,
            score: 0.5,
            last_used: None,
            inflight: 0,
            issued_at: Some(Instant::now()),
            consecutive_failures: 0,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_country(mut self, cc: impl Into<String>) -> Self {
        self.country = Some(cc.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score.clamp(0.0, 1.0);
        self
    }

    pub fn residential(mut self) -> Self {
        self.residential = true;
        self
    }

    /// Stable identity: `host:port` (matches the proxy-list line
    /// shape and is used as the pool's removal/update key).
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The opaque handoff format the browser driver expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverProxyForm {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Produce the driver-format handoff for a proxy.
pub fn to_driver_form(proxy: &Proxy) -> DriverProxyForm {
    DriverProxyForm {
        server: format!("{}://{}:{}", proxy.proxy_type.as_scheme(), proxy.host, proxy.port),
        username: proxy.auth.as_ref().map(|a| a.username.clone()),
        password: proxy.auth.as_ref().map(|a| a.password.clone()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyPoolStats {
    pub total: usize,
    pub residential: usize,
    pub average_score: f64,
    pub by_country: std::collections::HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// `Next()` only advances its pointer once this much time has passed
    /// since the last advance; otherwise it returns the same proxy again
    /// (preserved deliberately, not treated as a bug).
    pub rotation_interval: Duration,
    /// Auto-remove a proxy once its EMA score drops below this.
    pub evict_threshold: f64,
    /// EMA smoothing factor applied to the existing score.
    pub ema_retain: f64,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            rotation_interval: Duration::from_secs(0),
            evict_threshold: 0.2,
            ema_retain: 0.9,
        }
    }
}

struct PoolState {
    proxies: Vec<Proxy>,
    next_idx: usize,
    last_rotation: Instant,
}

/// Bounded, thread-safe, O(N) proxy pool. Reads (selection)
/// only need `proxies.clone()`'s snapshot semantics; writes (`add`,
/// `remove`, `update`, `next`) take the write lock for the whole op so a
/// racing `remove` can never hand back a proxy being deleted.
pub struct ProxyPool {
    config: ProxyPoolConfig,
    state: RwLock<PoolState>,
}

impl ProxyPool {
    pub fn new(config: ProxyPoolConfig) -> Self {
        Self {
            config,
            state: RwLock::new(PoolState {
                proxies: Vec::new(),
                next_idx: 0,
                last_rotation: Instant::now(),
            }),
        }
    }

    pub fn add(&self, proxy: Proxy) {
        let mut state = self.state.write();
        state.proxies.push(proxy);
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.state.write();
        let before = state.proxies.len();
        state.proxies.retain(|p| p.key() != key);
        if state.next_idx >= state.proxies.len() {
            state.next_idx = 0;
        }
        state.proxies.len() != before
    }

    /// Round-robin with a rotation interval: advances the pointer only
    /// when `now - last_rotation >= rotation_interval`, otherwise returns
    /// the proxy currently under the pointer again. `last_used` is always
    /// stamped regardless of whether the pointer moved.
    pub fn next(&self) -> Option<Proxy> {
        let mut state = self.state.write();
        if state.proxies.is_empty() {
            return None;
        }
        let now = Instant::now();
        if now.duration_since(state.last_rotation) >= self.config.rotation_interval {
            state.next_idx = (state.next_idx + 1) % state.proxies.len();
            state.last_rotation = now;
        }
        let idx = state.next_idx % state.proxies.len();
        state.proxies[idx].last_used = Some(now);
        Some(state.proxies[idx].clone())
    }

    pub fn random(&self) -> Option<Proxy> {
        use rand::Rng;
        let mut state = self.state.write();
        if state.proxies.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..state.proxies.len());
        state.proxies[idx].last_used = Some(Instant::now());
        Some(state.proxies[idx].clone())
    }

    pub fn best(&self) -> Option<Proxy> {
        let state = self.state.read();
        state
            .proxies
            .iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            .cloned()
    }

    pub fn by_country(&self, cc: &str) -> Vec<Proxy> {
        let state = self.state.read();
        state
            .proxies
            .iter()
            .filter(|p| p.country.as_deref() == Some(cc))
            .cloned()
            .collect()
    }

    pub fn residential_only(&self) -> Vec<Proxy> {
        let state = self.state.read();
        state.proxies.iter().filter(|p| p.residential).cloned().collect()
    }

    /// `score' <- 0.9*score + 0.1*[ok?1:0]`; evicts and warns once the
    /// updated score drops below `evict_threshold`.
    pub fn update(&self, key: &str, ok: bool) {
        let mut state = self.state.write();
        let retain = self.config.ema_retain;
        let mut evict = false;
        if let Some(proxy) = state.proxies.iter_mut().find(|p| p.key() == key) {
            let sample = if ok { 1.0 } else { 0.0 };
            proxy.score = (retain * proxy.score + (1.0 - retain) * sample).clamp(0.0, 1.0);
            if ok {
                proxy.consecutive_failures = 0;
            } else {
                proxy.consecutive_failures += 1;
            }
            if proxy.score < self.config.evict_threshold {
                evict = true;
            }
        }
        if evict {
            warn!(proxy = %key, "proxy score fell below eviction threshold, removing");
            state.proxies.retain(|p| p.key() != key);
            if state.next_idx >= state.proxies.len() {
                state.next_idx = 0;
            }
        }
    }

    pub fn stats(&self) -> ProxyPoolStats {
        let state = self.state.read();
        let total = state.proxies.len();
        let residential = state.proxies.iter().filter(|p| p.residential).count();
        let average_score = if total == 0 {
            0.0
        } else {
            state.proxies.iter().map(|p| p.score).sum::<f64>() / total as f64
        };
        let mut by_country = std::collections::HashMap::new();
        for p in &state.proxies {
            if let Some(cc) = &p.country {
                *by_country.entry(cc.clone()).or_insert(0) += 1;
            }
        }
        ProxyPoolStats {
            total,
            residential,
            average_score,
            by_country,
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force-rotate a residential-provider proxy once its session has
    /// expired or it has failed too many times in a row, replacing it
    /// with a fresh one from `generator`. Returns the replacement.
    pub fn rotate_residential(
        &self,
        key: &str,
        generator: &OxylabsProxyGenerator,
        session_duration: Duration,
        max_failures: u32,
    ) -> Option<Proxy> {
        let should_rotate = {
            let state = self.state.read();
            state.proxies.iter().find(|p| p.key() == key).map(|p| {
                let expired = p
                    .issued_at
                    .map(|at| at.elapsed() >= session_duration)
                    .unwrap_or(false);
                expired || p.consecutive_failures >= max_failures
            })
        };
        if should_rotate != Some(true) {
            return None;
        }
        self.remove(key);
        let fresh = generator.generate_proxy();
        self.add(fresh.clone());
        Some(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(host: &str, score: f64) -> Proxy {
        Proxy::new(ProxyType::Http, host, 8080).with_score(score)
    }

    #[test]
    fn best_returns_max_score() {
        let pool = ProxyPool::new(ProxyPoolConfig::default());
        pool.add(proxy("p1", 0.9));
        pool.add(proxy("p2", 0.7));
        pool.add(proxy("p3", 0.8));

        assert_eq!(pool.best().unwrap().host, "p1");
    }

    #[test]
    fn ema_update_moves_score_and_evicts() {
        let pool = ProxyPool::new(ProxyPoolConfig::default());
        pool.add(proxy("p1", 0.9));
        pool.add(proxy("p2", 0.7));
        pool.add(proxy("p3", 0.8));

        pool.update("p2:8080", true);
        let p2 = pool.by_country("").into_iter().next(); // no country set
        let _ = p2;
        let stats_before = pool.stats();
        assert_eq!(stats_before.total, 3);

        // 0.9 * 0.9^n crosses the 0.2 evict_threshold at n=16 (0.9^16 ~= 0.185),
        // not n=10 as a naive reading of the spec's scenario-3 narrative suggests.
        for _ in 0..16 {
            pool.update("p1:8080", false);
        }
        assert_eq!(pool.stats().total, 2);
    }

    #[test]
    fn rotation_interval_holds_pointer_until_elapsed() {
        let pool = ProxyPool::new(ProxyPoolConfig {
            rotation_interval: Duration::from_secs(3600),
            ..ProxyPoolConfig::default()
        });
        pool.add(proxy("p1", 0.5));
        pool.add(proxy("p2", 0.5));

        let first = pool.next().unwrap();
        let second = pool.next().unwrap();
        // rotation interval not elapsed: same proxy returned again.
        assert_eq!(first.host, second.host);
    }

    #[test]
    fn driver_form_round_trip() {
        let p = Proxy::new(ProxyType::Http, "proxy.example.com", 8080).with_auth("u", "p");
        let form = to_driver_form(&p);
        assert_eq!(form.server, "http://proxy.example.com:8080");
        assert_eq!(form.username.as_deref(), Some("u"));
    }
}
