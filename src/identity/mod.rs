//! Identity assembler: synthesizes a complete, internally
//! consistent browser persona by drawing every correlated attribute from
//! one platform record.
//!
//! This module does not itself contain a canvas/WebGL/audio/font noise
//! generator — that's an external identity-generation library's job.
//! What lives
//! here is the *correlation* contract: once a platform is chosen, every
//! attribute that must agree with it (user agent, fonts, plugins, WebGL
//! vendor/renderer, hardware concurrency, device memory, screen list, TLS
//! profile id) is drawn from that platform's own table, never mixed with
//! another platform's.

mod platforms;

pub use platforms::{Platform, PlatformRecord, ALL_PLATFORMS};

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screen {
    pub size: (u32, u32),
    pub avail_size: (u32, u32),
    pub color_depth: u8,
    pub device_pixel_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebGl {
    pub vendor: String,
    pub renderer: String,
}

/// One synthesized browser persona. Immutable
/// once generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub platform: String,
    pub user_agent: String,
    pub viewport: Viewport,
    pub screen: Screen,
    pub vendor: String,
    pub languages: Vec<String>,
    pub timezone: String,
    pub hw_concurrency: u32,
    pub device_memory: u32,
    pub plugins: Vec<String>,
    pub fonts: Vec<String>,
    pub webgl: WebGl,
    pub canvas_seed: u64,
    pub audio_seed: u64,
    pub tls_profile_id: String,
}

/// Per-attribute enable/disable flags. When an attribute is disabled the
/// platform's deterministic default (index 0 of its pool) is used instead
/// of a random draw.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    pub platform: Option<String>,
    pub locale: Option<String>,
    pub randomize_user_agent: bool,
    pub randomize_fonts: bool,
    pub randomize_plugins: bool,
    pub randomize_webgl: bool,
    pub randomize_hardware: bool,
    pub randomize_screen: bool,
}

impl IdentityConfig {
    pub fn all_randomized() -> Self {
        Self {
            platform: None,
            locale: None,
            randomize_user_agent: true,
            randomize_fonts: true,
            randomize_plugins: true,
            randomize_webgl: true,
            randomize_hardware: true,
            randomize_screen: true,
        }
    }
}

fn pick<'a, T>(pool: &'a [T], randomize: bool) -> &'a T {
    if !randomize || pool.len() == 1 {
        return &pool[0];
    }
    let idx = rand::thread_rng().gen_range(0..pool.len());
    &pool[idx]
}

pub struct IdentityAssembler;

impl IdentityAssembler {
    /// `Assemble(cfg) -> Identity`. Every co-consistent attribute is drawn
    /// from a single `PlatformRecord`.
    pub fn assemble(cfg: &IdentityConfig) -> Identity {
        let record = match &cfg.platform {
            Some(name) => platforms::by_name(name).unwrap_or(&ALL_PLATFORMS[0]),
            None => pick(ALL_PLATFORMS, true),
        };

        let user_agent = pick(record.user_agents, cfg.randomize_user_agent).to_string();
        let fonts: Vec<String> = if cfg.randomize_fonts {
            subset(record.fonts)
        } else {
            record.fonts[..record.fonts.len().min(8)]
                .iter()
                .map(|s| s.to_string())
                .collect()
        };
        let plugins: Vec<String> = pick_subset(record.plugins, cfg.randomize_plugins);
        let (webgl_vendor, webgl_renderer) = *pick(record.webgl, cfg.randomize_webgl);
        let hw_concurrency = *pick(record.hw_concurrency, cfg.randomize_hardware);
        let device_memory = *pick(record.device_memory, cfg.randomize_hardware);
        let (size, avail_size) = *pick(record.screens, cfg.randomize_screen);
        let tls_profile_id = pick(record.tls_profile_ids, cfg.randomize_webgl).to_string();

        let viewport = Viewport {
            w: avail_size.0,
            h: avail_size.1.saturating_sub(80).max(1),
        };

        let device_pixel_ratio = *pick(&[1.0, 1.25, 1.5, 2.0], cfg.randomize_screen);
        let color_depth = *pick(&[24u8, 30, 32], cfg.randomize_screen);

        let timezone = match &cfg.locale {
            Some(locale) => timezone_for_locale(locale).to_string(),
            None => record.default_timezone.to_string(),
        };

        let languages = match &cfg.locale {
            Some(locale) => vec![locale.clone(), "en".to_string()],
            None => vec!["en-US".to_string(), "en".to_string()],
        };

        let mut rng = rand::thread_rng();
        Identity {
            platform: record.name.to_string(),
            user_agent,
            viewport,
            screen: Screen {
                size,
                avail_size,
                color_depth,
                device_pixel_ratio,
            },
            vendor: record.vendor.to_string(),
            languages,
            timezone,
            hw_concurrency,
            device_memory,
            plugins,
            fonts,
            webgl: WebGl {
                vendor: webgl_vendor.to_string(),
                renderer: webgl_renderer.to_string(),
            },
            canvas_seed: rng.gen(),
            audio_seed: rng.gen(),
            tls_profile_id,
        }
    }
}

fn subset(pool: &[&'static str]) -> Vec<String> {
    use rand::seq::SliceRandom;
    let mut rng = rand::thread_rng();
    let take = (pool.len() / 2).max(1);
    let mut shuffled: Vec<&&str> = pool.iter().collect();
    shuffled.shuffle(&mut rng);
    shuffled.into_iter().take(take).map(|s| s.to_string()).collect()
}

fn pick_subset(pool: &[&'static str], randomize: bool) -> Vec<String> {
    if !randomize {
        return pool.iter().map(|s| s.to_string()).collect();
    }
    subset(pool)
}

/// Locale -> plausible IANA timezone mapping. Falls back to UTC for
/// unknown locales.
fn timezone_for_locale(locale: &str) -> &'static str {
    match locale {
        "en-US" => "America/New_York",
        "en-GB" => "Europe/London",
        "de-DE" => "Europe/Berlin",
        "fr-FR" => "Europe/Paris",
        "ja-JP" => "Asia/Tokyo",
        "zh-CN" => "Asia/Shanghai",
        "pt-BR" => "America/Sao_Paulo",
        "es-MX" => "America/Mexico_City",
        "ar-SA" => "Asia/Riyadh",
        "en-AU" => "Australia/Sydney",
        "ru-RU" => "Europe/Moscow",
        "hi-IN" => "Asia/Kolkata",
        _ => "UTC",
    }
}

/// Is `timezone` a plausible timezone for `locale`?
pub fn validate_locale_timezone(locale: &str, timezone: &str) -> bool {
    timezone_for_locale(locale) == timezone
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_holds_across_many_identities() {
        for _ in 0..100 {
            let cfg = IdentityConfig::all_randomized();
            let identity = IdentityAssembler::assemble(&cfg);
            let record = platforms::by_name(&identity.platform).unwrap();

            let ua_token = record.ua_token;
            assert!(
                identity.user_agent.contains(ua_token),
                "UA {} missing token {}",
                identity.user_agent,
                ua_token
            );
            assert!(record
                .webgl
                .iter()
                .any(|(v, r)| *v == identity.webgl.vendor && *r == identity.webgl.renderer));
            assert!(identity
                .fonts
                .iter()
                .all(|f| record.fonts.contains(&f.as_str())));

            assert!(identity.viewport.w <= identity.screen.avail_size.0);
            assert!(identity.viewport.h <= identity.screen.avail_size.1);
            assert!(identity.screen.avail_size.0 <= identity.screen.size.0);
            assert!(identity.screen.avail_size.1 <= identity.screen.size.1);
            assert!((0.5..=3.0).contains(&identity.screen.device_pixel_ratio));
            assert!([24u8, 30, 32].contains(&identity.screen.color_depth));
        }
    }

    #[test]
    fn canvas_and_audio_seeds_are_distinct() {
        let id = IdentityAssembler::assemble(&IdentityConfig::all_randomized());
        assert_ne!(id.canvas_seed, id.audio_seed);
    }

    #[test]
    fn locale_timezone_validation() {
        assert!(validate_locale_timezone("de-DE", "Europe/Berlin"));
        assert!(!validate_locale_timezone("de-DE", "Asia/Tokyo"));
    }

    #[test]
    fn disabled_attributes_use_deterministic_default() {
        let cfg = IdentityConfig {
            platform: Some("windows".to_string()),
            ..Default::default()
        };
        let a = IdentityAssembler::assemble(&cfg);
        let b = IdentityAssembler::assemble(&cfg);
        assert_eq!(a.user_agent, b.user_agent);
        assert_eq!(a.webgl.renderer, b.webgl.renderer);
    }
}
