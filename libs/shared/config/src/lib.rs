use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStoreBackend {
    Supabase,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub supabase_jwt_secret: String,
    pub slot_store_backend: SlotStoreBackend,
    pub store_timeout_ms: u64,
    pub notification_webhook_url: Option<String>,
    pub notification_timeout_ms: u64,
    pub generation_batch_size: usize,
    pub max_generation_days: i64,
    pub trust_operator_service_edits: bool,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, falling back to anon key");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            slot_store_backend: match env::var("SLOT_STORE_BACKEND").as_deref() {
                Ok("memory") => SlotStoreBackend::Memory,
                Ok("supabase") | Err(_) => SlotStoreBackend::Supabase,
                Ok(other) => {
                    warn!("Unknown SLOT_STORE_BACKEND '{}', using supabase", other);
                    SlotStoreBackend::Supabase
                }
            },
            store_timeout_ms: parse_or("STORE_TIMEOUT_MS", 5_000),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            notification_timeout_ms: parse_or("NOTIFICATION_TIMEOUT_MS", 3_000),
            generation_batch_size: parse_or("GENERATION_BATCH_SIZE", 200),
            max_generation_days: parse_or("MAX_GENERATION_DAYS", 366),
            trust_operator_service_edits: parse_or("TRUST_OPERATOR_SERVICE_EDITS", true),
            port: parse_or("PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        let store_ready = match self.slot_store_backend {
            SlotStoreBackend::Memory => true,
            SlotStoreBackend::Supabase => {
                !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
            }
        };

        store_ready && !self.supabase_jwt_secret.is_empty()
    }

    /// Key used for server-side PostgREST calls.
    pub fn supabase_api_key(&self) -> &str {
        if self.supabase_service_role_key.is_empty() {
            &self.supabase_anon_key
        } else {
            &self.supabase_service_role_key
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_role_key: String::new(),
            supabase_jwt_secret: String::new(),
            slot_store_backend: SlotStoreBackend::Supabase,
            store_timeout_ms: 5_000,
            notification_webhook_url: None,
            notification_timeout_ms: 3_000,
            generation_batch_size: 200,
            max_generation_days: 366,
            trust_operator_service_edits: true,
            port: 3000,
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
