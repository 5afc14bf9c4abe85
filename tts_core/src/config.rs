/// Credentials and voice for the synthesis service.
#[derive(Clone)]
pub struct SynthesisConfig {
    pub email: String,
    pub password: String,
    pub voice_id: String,
    pub auth_url: String,
    pub base_url: String,
}

impl std::fmt::Debug for SynthesisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisConfig")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("voice_id", &self.voice_id)
            .field("base_url", &self.base_url)
            .finish()
    }
}

pub const DEFAULT_AUTH_URL: &str = "https://api.daisys.ai/auth";
pub const DEFAULT_SPEAK_URL: &str = "https://api.daisys.ai/v1/speak";

impl SynthesisConfig {
    /// Build from explicit values. Returns `None` if any credential is
    /// blank, which means synthesis is disabled.
    pub fn from_values(email: Option<String>, password: Option<String>, voice_id: Option<String>) -> Option<Self> {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Some(Self {
            email: present(email)?,
            password: present(password)?,
            voice_id: present(voice_id)?,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            base_url: DEFAULT_SPEAK_URL.to_string(),
        })
    }

    /// Read `DAISYS_EMAIL`, `DAISYS_PASSWORD` and `DAISYS_VOICE_ID`.
    /// `DAISYS_AUTH_URL` and `DAISYS_BASE_URL` override the endpoints.
    pub fn from_env() -> Option<Self> {
        let mut config = Self::from_values(
            std::env::var("DAISYS_EMAIL").ok(),
            std::env::var("DAISYS_PASSWORD").ok(),
            std::env::var("DAISYS_VOICE_ID").ok(),
        )?;
        if let Ok(url) = std::env::var("DAISYS_AUTH_URL") {
            config.auth_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(url) = std::env::var("DAISYS_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        Some(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_credentials_required() {
        let some = |s: &str| Some(s.to_string());
        assert!(SynthesisConfig::from_values(some("a@b.c"), some("pw"), some("v1")).is_some());
        assert!(SynthesisConfig::from_values(None, some("pw"), some("v1")).is_none());
        assert!(SynthesisConfig::from_values(some("a@b.c"), some("  "), some("v1")).is_none());
        assert!(SynthesisConfig::from_values(some("a@b.c"), some("pw"), None).is_none());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = SynthesisConfig::from_values(
            Some("a@b.c".into()),
            Some("hunter2".into()),
            Some("v1".into()),
        )
        .unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
