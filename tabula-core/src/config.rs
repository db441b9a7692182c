use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::{DEFAULT_KEY_FIELDS, TableId};
use crate::error::{Result, TabulaError};

pub const ENV_URL: &str = "TABULA_URL";
pub const ENV_TOKEN: &str = "TABULA_TOKEN";
pub const ENV_TOKEN_HEADER: &str = "TABULA_TOKEN_HEADER";
pub const ENV_UPLOAD_URL: &str = "TABULA_UPLOAD_URL";
pub const ENV_SESSION_FILE: &str = "TABULA_SESSION_FILE";
pub const ENV_TABLE_PREFIX: &str = "TABULA_TID_";

/// Screens of the admin portal, each bound to one remote table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Screen {
    Coupons,
    Logins,
    BannerBusiness,
    BannerMain,
    DynamicPhrase,
    BusinessPlans,
    PlanAddons,
    Faqs,
    DownloadLinks,
    Phone,
    Socials,
    PlanServices,
    Seller,
    Shortcuts,
    WifiNetworks,
}

impl Screen {
    pub const ALL: [Screen; 15] = [
        Screen::Coupons,
        Screen::Logins,
        Screen::BannerBusiness,
        Screen::BannerMain,
        Screen::DynamicPhrase,
        Screen::BusinessPlans,
        Screen::PlanAddons,
        Screen::Faqs,
        Screen::DownloadLinks,
        Screen::Phone,
        Screen::Socials,
        Screen::PlanServices,
        Screen::Seller,
        Screen::Shortcuts,
        Screen::WifiNetworks,
    ];

    /// Short name used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Screen::Coupons => "coupons",
            Screen::Logins => "logins",
            Screen::BannerBusiness => "banner-business",
            Screen::BannerMain => "banner-main",
            Screen::DynamicPhrase => "phrases",
            Screen::BusinessPlans => "business-plans",
            Screen::PlanAddons => "plan-addons",
            Screen::Faqs => "faqs",
            Screen::DownloadLinks => "links",
            Screen::Phone => "phone",
            Screen::Socials => "socials",
            Screen::PlanServices => "plan-services",
            Screen::Seller => "seller",
            Screen::Shortcuts => "shortcuts",
            Screen::WifiNetworks => "wifi",
        }
    }

    pub fn env_var(self) -> String {
        let suffix = self.name().replace('-', "_").to_ascii_uppercase();
        format!("{ENV_TABLE_PREFIX}{suffix}")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Screen::ALL.into_iter().find(|s| s.name() == name)
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL without trailing slash, e.g. `https://noco.example.com`.
    pub base_url: String,
    pub token: String,
    /// Header carrying `token`.
    pub token_header: String,
    pub upload_url: String,
    pub session_file: PathBuf,
    pub tables: BTreeMap<Screen, TableId>,
    /// Key names tried in order when a record's key field is not known.
    pub key_fields: Vec<String>,
    /// Characters of a failed response body kept in `Backend` errors.
    pub body_preview_chars: usize,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            token_header: "xc-token".into(),
            upload_url: "http://localhost:3333".into(),
            session_file: PathBuf::from(".tabula-session.json"),
            tables: BTreeMap::new(),
            key_fields: DEFAULT_KEY_FIELDS.iter().map(|s| s.to_string()).collect(),
            body_preview_chars: 200,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Builds the configuration from any key/value source (env in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut missing = Vec::new();
        let base_url = get(ENV_URL).unwrap_or_else(|| {
            missing.push(ENV_URL);
            String::new()
        });
        let token = get(ENV_TOKEN).unwrap_or_else(|| {
            missing.push(ENV_TOKEN);
            String::new()
        });
        if !missing.is_empty() {
            return Err(TabulaError::Config(format!(
                "missing variables: {}",
                missing.join(", ")
            )));
        }

        let mut cfg = Self::new(base_url, token);
        if let Some(h) = get(ENV_TOKEN_HEADER) {
            cfg.token_header = h;
        }
        if let Some(u) = get(ENV_UPLOAD_URL) {
            cfg.upload_url = u.trim_end_matches('/').to_string();
        }
        if let Some(p) = get(ENV_SESSION_FILE) {
            cfg.session_file = PathBuf::from(p);
        }
        for screen in Screen::ALL {
            if let Some(tid) = get(&screen.env_var()) {
                cfg.tables.insert(screen, TableId::new(tid)?);
            }
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(TabulaError::Config("base_url is empty".into()));
        }
        if self.token.is_empty() {
            return Err(TabulaError::Config("token is empty".into()));
        }
        if self.key_fields.is_empty() {
            return Err(TabulaError::Config("key_fields is empty".into()));
        }
        Ok(())
    }

    pub fn table(&self, screen: Screen) -> Result<TableId> {
        self.tables.get(&screen).cloned().ok_or_else(|| {
            TabulaError::Config(format!(
                "no table configured for {} (set {})",
                screen.name(),
                screen.env_var()
            ))
        })
    }

    /// Accepts a screen name (`coupons`) or a raw table identifier.
    pub fn resolve_table(&self, name_or_id: &str) -> Result<TableId> {
        match Screen::from_name(name_or_id) {
            Some(screen) => self.table(screen),
            None => TableId::new(name_or_id),
        }
    }
}
