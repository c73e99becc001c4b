//! Concrete browser driver: launches a chromiumoxide-controlled Chrome
//! instance per identity/proxy pairing and exposes it behind the
//! `BrowserContext` trait that the rest of the orchestrator programs
//! against.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::BrowserError;
use crate::identity::Identity;
use crate::proxy::{DriverProxyForm, LocalProxyForwarder};

/// The narrow surface the rest of the orchestrator drives a browser
/// through. A session never reaches past this trait into chromiumoxide
/// directly, so the underlying driver can be swapped without touching
/// the worker or queue code.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;
    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError>;
    async fn set_init_script(&self, script: &str) -> Result<(), BrowserError>;
    async fn current_url(&self) -> Result<String, BrowserError>;
    async fn close(&self) -> Result<(), BrowserError>;
}

/// Launch-time parameters for a `ChromiumContext`.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub chrome_path: Option<String>,
    pub user_data_dir: Option<String>,
    pub proxy: Option<DriverProxyForm>,
    pub timeout_secs: u64,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            user_data_dir: None,
            proxy: None,
            timeout_secs: 60,
        }
    }
}

/// A live chromiumoxide-backed browser bound to one synthesized identity.
pub struct ChromiumContext {
    browser: RwLock<Option<Browser>>,
    page: RwLock<Option<Page>>,
    proxy_forwarder: RwLock<Option<LocalProxyForwarder>>,
    alive: AtomicBool,
}

impl ChromiumContext {
    /// Launch a fresh Chrome process configured for `identity`, through
    /// `opts.proxy` if set, applying stealth flags in an
    /// undetected-chromedriver style.
    pub async fn launch(identity: &Identity, opts: LaunchOptions) -> Result<Self, BrowserError> {
        let mut builder = BrowserConfig::builder();

        if !opts.headless {
            builder = builder.with_head();
        }
        if let Some(ref path) = opts.chrome_path {
            builder = builder.chrome_executable(path);
        }
        if let Some(ref dir) = opts.user_data_dir {
            let _ = std::fs::create_dir_all(dir);
            builder = builder.user_data_dir(dir);
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--exclude-switches=enable-automation")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-session-crashed-bubble")
            .arg("--disable-restore-session-state")
            .arg("--homepage=about:blank")
            .arg("--disable-features=IsolateOrigins,site-per-process,TranslateUI")
            .arg("--disable-site-isolation-trials")
            .arg("--disable-popup-blocking")
            .arg("--disable-notifications")
            .arg("--disable-save-password-bubble")
            .arg("--disable-translate")
            .arg("--disable-sync")
            .arg("--disable-background-networking")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-backgrounding-occluded-windows")
            .arg("--disable-renderer-backgrounding")
            .arg("--disable-client-side-phishing-detection")
            .arg("--disable-default-apps")
            .arg("--disable-hang-monitor")
            .arg("--disable-prompt-on-repost")
            .arg("--disable-domain-reliability")
            .arg("--disable-component-update")
            .arg("--disable-ipc-flooding-protection")
            .arg(format!("--user-agent={}", identity.user_agent))
            .arg(format!(
                "--lang={}",
                identity.languages.first().cloned().unwrap_or_else(|| "en-US".to_string())
            ))
            .arg("--password-store=basic")
            .arg("--use-mock-keychain")
            .window_size(identity.viewport.w, identity.viewport.h);

        let mut proxy_forwarder = None;
        if let Some(proxy) = &opts.proxy {
            if let Some((user, pass)) = proxy.username.clone().zip(proxy.password.clone()) {
                let (host, port) = split_host_port(&proxy.server)?;
                let mut forwarder = LocalProxyForwarder::with_auto_port(&host, port, &user, &pass);
                forwarder
                    .start()
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(format!("proxy forwarder: {e}")))?;
                builder = builder.arg(format!("--proxy-server={}", forwarder.local_url()));
                proxy_forwarder = Some(forwarder);
            } else {
                builder = builder.arg(format!("--proxy-server={}", proxy.server));
            }
        }

        let browser_config = builder
            .build()
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let (browser, mut handler) = tokio::time::timeout(
            Duration::from_secs(opts.timeout_secs),
            Browser::launch(browser_config),
        )
        .await
        .map_err(|_| BrowserError::Timeout("browser launch".into()))?
        .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!(?event, "browser handler event");
            }
        });

        let page = {
            let mut pages = browser
                .pages()
                .await
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
            let main = if !pages.is_empty() {
                pages.remove(0)
            } else {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?
            };
            for extra in pages {
                let _ = extra.close().await;
            }
            main
        };

        let ctx = Self {
            browser: RwLock::new(Some(browser)),
            page: RwLock::new(Some(page)),
            proxy_forwarder: RwLock::new(proxy_forwarder),
            alive: AtomicBool::new(true),
        };
        ctx.set_init_script(&stealth_script(identity)).await?;
        info!(platform = %identity.platform, "browser context launched");
        Ok(ctx)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page.as_ref().ok_or_else(|| BrowserError::ConnectionLost("no active page".into()))?;
        page.goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        let page = self.page.read().await;
        let page = page.as_ref().ok_or_else(|| BrowserError::ConnectionLost("no active page".into()))?;
        let result = page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn set_init_script(&self, script: &str) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page.as_ref().ok_or_else(|| BrowserError::ConnectionLost("no active page".into()))?;
        page.evaluate_on_new_document(script)
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let page = self.page.read().await;
        let page = page.as_ref().ok_or_else(|| BrowserError::ConnectionLost("no active page".into()))?;
        page.url()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?
            .ok_or_else(|| BrowserError::ConnectionLost("no url".into()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.alive.store(false, Ordering::Relaxed);
        if let Some(page) = self.page.write().await.take() {
            let _ = page.close().await;
        }
        if let Some(mut browser) = self.browser.write().await.take() {
            let _ = browser.close().await;
        }
        if let Some(mut forwarder) = self.proxy_forwarder.write().await.take() {
            forwarder.stop().await;
        }
        Ok(())
    }
}

fn split_host_port(server: &str) -> Result<(String, u16), BrowserError> {
    let without_scheme = server.split("://").last().unwrap_or(server);
    let (host, port) = without_scheme
        .rsplit_once(':')
        .ok_or_else(|| BrowserError::LaunchFailed(format!("bad proxy server {server}")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| BrowserError::LaunchFailed(format!("bad proxy port {server}")))?;
    Ok((host.to_string(), port))
}

/// Generate the per-identity init script injected into every new document:
/// removes the automation fingerprint and overrides the attributes the
/// identity assembler decided for this persona (plugins, hardware
/// concurrency, device memory, WebGL vendor/renderer, languages).
fn stealth_script(identity: &Identity) -> String {
    let plugins_js = identity
        .plugins
        .iter()
        .map(|p| format!("{{name:'{p}',filename:'internal-plugin',description:'',length:1}}"))
        .collect::<Vec<_>>()
        .join(",");
    let languages_js = identity
        .languages
        .iter()
        .map(|l| format!("'{l}'"))
        .collect::<Vec<_>>()
        .join(",");

    format!(
        r#"
        Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined, configurable: true }});
        delete Object.getPrototypeOf(navigator).webdriver;

        Object.defineProperty(navigator, 'languages', {{ get: () => [{languages}] }});
        Object.defineProperty(navigator, 'hardwareConcurrency', {{ get: () => {hw} }});
        Object.defineProperty(navigator, 'deviceMemory', {{ get: () => {mem} }});
        Object.defineProperty(navigator, 'plugins', {{
            get: () => {{
                const plugins = [{plugins}];
                plugins.item = (i) => plugins[i] || null;
                plugins.namedItem = (name) => plugins.find(p => p.name === name) || null;
                plugins.refresh = () => {{}};
                return plugins;
            }}
        }});

        const getParameter = WebGLRenderingContext.prototype.getParameter;
        WebGLRenderingContext.prototype.getParameter = function(parameter) {{
            if (parameter === 37445) return '{webgl_vendor}';
            if (parameter === 37446) return '{webgl_renderer}';
            return getParameter.call(this, parameter);
        }};

        const canvasSeed = {canvas_seed};
        const toDataURL = HTMLCanvasElement.prototype.toDataURL;
        HTMLCanvasElement.prototype.toDataURL = function(...args) {{
            const ctx = this.getContext('2d');
            if (ctx) {{
                const imageData = ctx.getImageData(0, 0, this.width, this.height);
                for (let i = 0; i < imageData.data.length; i += Math.max(1, canvasSeed % 97)) {{
                    imageData.data[i] = imageData.data[i] ^ (canvasSeed & 1);
                }}
                ctx.putImageData(imageData, 0, 0);
            }}
            return toDataURL.apply(this, args);
        }};
        "#,
        languages = languages_js,
        hw = identity.hw_concurrency,
        mem = identity.device_memory,
        plugins = plugins_js,
        webgl_vendor = identity.webgl.vendor,
        webgl_renderer = identity.webgl.renderer,
        canvas_seed = identity.canvas_seed,
    )
}
