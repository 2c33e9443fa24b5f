//! Process environment setup done once before any HTTP client is built.

use std::path::Path;
use std::sync::OnceLock;

static CA_BUNDLE: OnceLock<Option<String>> = OnceLock::new();

const CA_BUNDLE_CANDIDATES: [&str; 4] = [
    "/etc/ssl/cert.pem",
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/certs/ca-bundle.crt",
];

/// Point `SSL_CERT_FILE` at a CA bundle if it is not already set.
/// Returns the bundle in use, if any.
pub fn ensure_tls_cert_env() -> Option<String> {
    CA_BUNDLE
        .get_or_init(|| {
            let existing = std::env::var("SSL_CERT_FILE").ok();
            let nix = std::env::var("NIX_SSL_CERT_FILE").ok();
            let chosen = pick_ca_bundle(existing.as_deref(), nix.as_deref(), |p| {
                Path::new(p).is_file()
            })?;
            if existing.as_deref() != Some(chosen.as_str()) {
                std::env::set_var("SSL_CERT_FILE", &chosen);
            }
            Some(chosen)
        })
        .clone()
}

fn pick_ca_bundle(
    existing: Option<&str>,
    nix: Option<&str>,
    exists: impl Fn(&str) -> bool,
) -> Option<String> {
    if let Some(existing) = existing.filter(|v| !v.trim().is_empty()) {
        return Some(existing.to_string());
    }
    nix.filter(|v| !v.trim().is_empty() && exists(v))
        .or_else(|| CA_BUNDLE_CANDIDATES.into_iter().find(|c| exists(c)))
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_setting_wins() {
        let chosen = pick_ca_bundle(Some("/custom.pem"), Some("/nix.pem"), |_| true);
        assert_eq!(chosen.as_deref(), Some("/custom.pem"));
    }

    #[test]
    fn nix_bundle_then_system_candidates() {
        assert_eq!(
            pick_ca_bundle(None, Some("/nix.pem"), |_| true).as_deref(),
            Some("/nix.pem")
        );
        assert_eq!(
            pick_ca_bundle(Some(" "), Some("/nix.pem"), |p| p.ends_with("ca-certificates.crt"))
                .as_deref(),
            Some("/etc/ssl/certs/ca-certificates.crt")
        );
        assert_eq!(pick_ca_bundle(None, None, |_| false), None);
    }
}
