use crate::error::ConfigError;
use reqwest::{RequestBuilder, Url};

/// Connection details shared by the Supabase adapters.
#[derive(Clone)]
pub struct SupabaseClient {
    base: Url,
    anon_key: String,
    service_key: Option<String>,
    http: reqwest::Client,
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("base", &self.base.as_str())
            .field("service_key", &self.service_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SupabaseClient {
    pub fn new(
        base_url: &str,
        anon_key: String,
        service_key: Option<String>,
        http: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let base = Url::parse(base_url)
            .map_err(|e| ConfigError::Invalid(format!("SUPABASE_URL '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::Invalid(format!(
                "SUPABASE_URL '{}' is not a base URL",
                base_url
            )));
        }
        Ok(Self {
            base,
            anon_key,
            service_key,
            http,
        })
    }

    /// `base` + path segments, each percent-encoded.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    /// Attaches the service-role key, which bypasses row-level security.
    pub fn with_service_auth(&self, req: RequestBuilder) -> Result<RequestBuilder, String> {
        let key = self
            .service_key
            .as_deref()
            .ok_or_else(|| "SUPABASE_SERVICE_ROLE_KEY is not configured".to_string())?;
        Ok(req.header("apikey", key).bearer_auth(key))
    }
}
