//! Detection aggregator: stateless classification of anti-bot signals
//! observed on a loaded page, by DOM/cookie/script probes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::BrowserContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectionKind {
    Captcha,
    Challenge,
    Block,
    RateLimit,
    Fingerprint,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub kind: DetectionKind,
    pub url: String,
    pub timestamp: i64,
    pub details: String,
    pub evidence: Option<String>,
}

impl DetectionKind {
    pub fn is_block_like(self) -> bool {
        matches!(self, DetectionKind::Block | DetectionKind::Captcha)
    }
}

type Classifier = fn(&str, &str) -> Option<(DetectionKind, String)>;

const CLASSIFIERS: &[Classifier] = &[
    classify_cloudflare,
    classify_perimeterx,
    classify_datadome,
    classify_captcha_widget,
    classify_verify_human,
    classify_access_denied,
    classify_rate_limit,
];

fn classify_cloudflare(html: &str, _cookies: &str) -> Option<(DetectionKind, String)> {
    if html.contains("cf-chl") || html.contains("cf-wrapper") || html.contains("Checking your browser") {
        Some((DetectionKind::Challenge, "cloudflare challenge page".into()))
    } else {
        None
    }
}

fn classify_perimeterx(html: &str, cookies: &str) -> Option<(DetectionKind, String)> {
    if cookies.contains("_px") || html.contains("px-captcha") {
        Some((DetectionKind::Challenge, "perimeterx challenge".into()))
    } else {
        None
    }
}

fn classify_datadome(html: &str, cookies: &str) -> Option<(DetectionKind, String)> {
    if cookies.contains("datadome") || html.contains("dd.js") {
        Some((DetectionKind::Challenge, "datadome challenge".into()))
    } else {
        None
    }
}

fn classify_captcha_widget(html: &str, _cookies: &str) -> Option<(DetectionKind, String)> {
    let lower = html.to_lowercase();
    if lower.contains("recaptcha") || lower.contains("hcaptcha") || lower.contains("g-recaptcha") {
        Some((DetectionKind::Captcha, "captcha widget present".into()))
    } else {
        None
    }
}

fn classify_verify_human(html: &str, _cookies: &str) -> Option<(DetectionKind, String)> {
    let lower = html.to_lowercase();
    if lower.contains("verify you are human") || lower.contains("verify that you're human") {
        Some((DetectionKind::Captcha, "human verification prompt".into()))
    } else {
        None
    }
}

fn classify_access_denied(html: &str, _cookies: &str) -> Option<(DetectionKind, String)> {
    let lower = html.to_lowercase();
    if lower.contains("access denied") || lower.contains("forbidden") || lower.contains("blocked") {
        Some((DetectionKind::Block, "access-denied text".into()))
    } else {
        None
    }
}

fn classify_rate_limit(html: &str, _cookies: &str) -> Option<(DetectionKind, String)> {
    let lower = html.to_lowercase();
    if lower.contains("rate limit") || lower.contains("too many requests") {
        Some((DetectionKind::RateLimit, "rate-limit text".into()))
    } else {
        None
    }
}

/// Run all registered classifiers against the page's current HTML and
/// cookies and return every match; timestamp and url are attached by
/// the caller (the worker loop), matching the stateless `Classify`
/// contract.
pub async fn classify(page: &dyn BrowserContext, url: &str) -> Vec<Detection> {
    let html = page
        .evaluate("document.documentElement.outerHTML")
        .await
        .ok()
        .and_then(|v: Value| v.as_str().map(|s| s.to_string()))
        .unwrap_or_default();
    let cookies = page
        .evaluate("document.cookie")
        .await
        .ok()
        .and_then(|v: Value| v.as_str().map(|s| s.to_string()))
        .unwrap_or_default();

    let now = chrono::Utc::now().timestamp_millis();

    CLASSIFIERS
        .iter()
        .filter_map(|c| c(&html, &cookies))
        .map(|(kind, details)| Detection {
            kind,
            url: url.to_string(),
            timestamp: now,
            details,
            evidence: None,
        })
        .collect()
}

pub fn has_block(detections: &[Detection]) -> bool {
    detections.iter().any(|d| d.kind.is_block_like())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloudflare_challenge_detected() {
        let html = "<div class=\"cf-wrapper\">Checking your browser</div>";
        let found = classify_cloudflare(html, "");
        assert_eq!(found.unwrap().0, DetectionKind::Challenge);
    }

    #[test]
    fn recaptcha_widget_detected() {
        let html = "<div class=\"g-recaptcha\"></div>";
        let found = classify_captcha_widget(html, "");
        assert_eq!(found.unwrap().0, DetectionKind::Captcha);
    }

    #[test]
    fn clean_page_yields_no_classifier_match() {
        let html = "<html><body>Welcome</body></html>";
        assert!(CLASSIFIERS.iter().all(|c| c(html, "").is_none()));
    }

    #[test]
    fn has_block_true_for_block_and_captcha_only() {
        let block = Detection {
            kind: DetectionKind::Block,
            url: "x".into(),
            timestamp: 0,
            details: String::new(),
            evidence: None,
        };
        let rate = Detection {
            kind: DetectionKind::RateLimit,
            ..block.clone()
        };
        assert!(has_block(&[block]));
        assert!(!has_block(&[rate]));
    }
}
