use std::{path::PathBuf, time::Duration};

use psync_adapters::{site_rules, SiteRules};
use psync_core::SyncError;
use psync_sinks::{
    ApiSinkConfig, MysqlConfig, SheetCredentials, SheetsConfig, SshTunnelConfig, SHEETS_API_BASE,
};
use psync_storage::{RenderMode, DEFAULT_USER_AGENT};
use tracing::warn;

pub const DEFAULT_DETAIL_DELAY_MS: u64 = 1500;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_APPEND_CHUNK: usize = 200;
pub const DEFAULT_DB_PORT: u16 = 3306;
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SSH_LOCAL_PORT: u16 = 13306;
const TUNNEL_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything one run needs, resolved once from the environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub site: &'static SiteRules,
    pub listing_url: String,
    pub render_mode: RenderMode,
    pub detail_delay: Duration,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub trust_env_proxies: bool,
    pub sheet: Option<SheetsConfig>,
    pub mirror: Option<MysqlConfig>,
    pub api: Option<ApiSinkConfig>,
}

fn truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True" | "yes")
}

fn parse_number<T: std::str::FromStr>(
    key: &str,
    raw: Option<String>,
    default: T,
) -> Result<T, SyncError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| SyncError::Config(format!("{key} must be a number, got {raw:?}"))),
    }
}

impl SyncConfig {
    /// Defaults for `site` with no sink configured.
    pub fn new(site: &'static SiteRules, listing_url: impl Into<String>) -> Self {
        Self {
            site,
            listing_url: listing_url.into(),
            render_mode: RenderMode::Static,
            detail_delay: Duration::from_millis(DEFAULT_DETAIL_DELAY_MS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            trust_env_proxies: false,
            sheet: None,
            mirror: None,
            api: None,
        }
    }

    /// Reads `.env` (if present) and the process environment. `site` wins over
    /// `PSYNC_SITE`.
    pub fn from_env(site: Option<&str>) -> Result<Self, SyncError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(site, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(site: Option<&str>, lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let site_id = site
            .map(str::to_string)
            .or_else(|| get("PSYNC_SITE"))
            .ok_or_else(|| SyncError::Config("no site selected (set PSYNC_SITE)".into()))?;
        let rules = site_rules(&site_id)
            .ok_or_else(|| SyncError::Config(format!("unknown site {site_id:?}")))?;

        let listing_url = get("LISTING_URL")
            .or_else(|| rules.default_listing_url.map(str::to_string))
            .ok_or_else(|| {
                SyncError::Config(format!("LISTING_URL is required for site {}", rules.site_id))
            })?;
        url::Url::parse(&listing_url).map_err(|e| {
            SyncError::Config(format!("LISTING_URL {listing_url:?} is invalid: {e}"))
        })?;

        let mut config = Self::new(rules, listing_url);
        if let Some(mode) = get("RENDER_MODE") {
            config.render_mode = mode.parse().map_err(SyncError::Config)?;
        }
        config.detail_delay = Duration::from_millis(parse_number(
            "DETAIL_DELAY_MS",
            get("DETAIL_DELAY_MS"),
            DEFAULT_DETAIL_DELAY_MS,
        )?);
        config.http_timeout = Duration::from_secs(parse_number(
            "HTTP_TIMEOUT_SECS",
            get("HTTP_TIMEOUT_SECS"),
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?);
        if let Some(agent) = get("PSYNC_USER_AGENT") {
            config.user_agent = agent;
        }
        config.trust_env_proxies = get("PSYNC_TRUST_ENV_PROXIES").is_some_and(|v| truthy(&v));

        if let Some(spreadsheet_id) = get("SPREADSHEET_ID") {
            let credentials = match (get("GSHEET_JSON"), get("GOOGLE_APPLICATION_CREDENTIALS")) {
                (Some(encoded), _) => SheetCredentials::Base64(encoded),
                (None, Some(path)) => SheetCredentials::File(PathBuf::from(path)),
                (None, None) => {
                    return Err(SyncError::Config(
                        "SPREADSHEET_ID is set but neither GSHEET_JSON nor \
                         GOOGLE_APPLICATION_CREDENTIALS is"
                            .into(),
                    ))
                }
            };
            let append_chunk = parse_number(
                "SHEET_APPEND_CHUNK",
                get("SHEET_APPEND_CHUNK"),
                DEFAULT_APPEND_CHUNK,
            )?;
            if append_chunk == 0 {
                return Err(SyncError::Config("SHEET_APPEND_CHUNK must be at least 1".into()));
            }
            config.sheet = Some(SheetsConfig {
                spreadsheet_id,
                sheet_name: get("SHEET_NAME")
                    .unwrap_or_else(|| rules.default_sheet_name.to_string()),
                credentials,
                value_input: rules.sheet_input,
                append_chunk,
                api_base: SHEETS_API_BASE.to_string(),
                timeout: config.http_timeout,
            });
        }

        if let Some(db_host) = get("DB_HOST") {
            match rules.mirror_table {
                None => warn!(
                    site = rules.site_id,
                    "DB_HOST is set but this site has no mirror table; mirror disabled"
                ),
                Some(table) => {
                    let require = |key: &str| {
                        get(key).ok_or_else(|| {
                            SyncError::Config(format!("{key} is required when DB_HOST is set"))
                        })
                    };
                    let db_port = parse_number("DB_PORT", get("DB_PORT"), DEFAULT_DB_PORT)?;
                    let tunnel = match get("SSH_HOST") {
                        None => None,
                        Some(ssh_host) => Some(SshTunnelConfig {
                            host: ssh_host,
                            port: parse_number("SSH_PORT", get("SSH_PORT"), DEFAULT_SSH_PORT)?,
                            user: get("SSH_USER").ok_or_else(|| {
                                SyncError::Config(
                                    "SSH_USER is required when SSH_HOST is set".into(),
                                )
                            })?,
                            key_path: get("SSH_KEY_PATH").map(PathBuf::from),
                            local_port: parse_number(
                                "SSH_LOCAL_PORT",
                                get("SSH_LOCAL_PORT"),
                                DEFAULT_SSH_LOCAL_PORT,
                            )?,
                            remote_host: db_host.clone(),
                            remote_port: db_port,
                            ready_timeout: TUNNEL_READY_TIMEOUT,
                        }),
                    };
                    config.mirror = Some(MysqlConfig {
                        host: db_host,
                        port: db_port,
                        user: require("DB_USER")?,
                        password: get("DB_PASSWORD").unwrap_or_default(),
                        database: require("DB_NAME")?,
                        table: table.to_string(),
                        tunnel,
                    });
                }
            }
        }

        if let Some(url) = get("API_URL") {
            let api_key = get("API_KEY").ok_or_else(|| {
                SyncError::Config("API_KEY is required when API_URL is set".into())
            })?;
            config.api = Some(ApiSinkConfig {
                url,
                api_key,
                timeout: config.http_timeout,
                trust_env_proxies: config.trust_env_proxies,
            });
        }

        if config.sheet.is_none() && config.api.is_none() {
            return Err(SyncError::Config(
                "no sink configured (set SPREADSHEET_ID or API_URL)".into(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use psync_core::SheetInput;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn sheet_variant_uses_site_defaults() {
        let config = SyncConfig::from_lookup(
            Some("dmm"),
            lookup(&[("SPREADSHEET_ID", "sheet-1"), ("GSHEET_JSON", "e30=")]),
        )
        .unwrap();
        assert_eq!(config.site.site_id, "dmm");
        assert_eq!(config.listing_url, "https://www.dmm.co.jp/live/chat/");
        assert_eq!(config.detail_delay, Duration::from_millis(1500));
        assert_eq!(config.render_mode, RenderMode::Static);
        let sheet = config.sheet.unwrap();
        assert_eq!(sheet.sheet_name, "fanza");
        assert_eq!(sheet.append_chunk, 200);
        assert!(matches!(sheet.credentials, SheetCredentials::Base64(_)));
        assert!(config.mirror.is_none());
    }

    #[test]
    fn missing_sink_is_a_config_error() {
        let err = SyncConfig::from_lookup(Some("dmm"), lookup(&[])).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn spreadsheet_without_credentials_is_rejected() {
        let err =
            SyncConfig::from_lookup(Some("dmm"), lookup(&[("SPREADSHEET_ID", "x")])).unwrap_err();
        assert!(err.to_string().contains("GSHEET_JSON"));
    }

    #[test]
    fn site_comes_from_env_when_not_given() {
        let config = SyncConfig::from_lookup(
            None,
            lookup(&[
                ("PSYNC_SITE", "chatpia"),
                ("API_URL", "https://api.example.test/in"),
                ("API_KEY", "k"),
            ]),
        )
        .unwrap();
        assert_eq!(config.site.site_id, "chatpia");
        assert!(config.sheet.is_none());
        assert_eq!(config.api.unwrap().api_key, "k");

        assert!(SyncConfig::from_lookup(None, lookup(&[])).is_err());
        let api_only = lookup(&[("API_URL", "u"), ("API_KEY", "k")]);
        assert!(SyncConfig::from_lookup(Some("nope"), api_only).is_err());
    }

    #[test]
    fn live_needs_an_explicit_listing_url() {
        let base = [("SPREADSHEET_ID", "x"), ("GSHEET_JSON", "e30=")];
        assert!(SyncConfig::from_lookup(Some("live"), lookup(&base)).is_err());
        let mut with_url = base.to_vec();
        with_url.push(("LISTING_URL", "https://live.example.test/list"));
        let config = SyncConfig::from_lookup(Some("live"), lookup(&with_url)).unwrap();
        assert_eq!(config.listing_url, "https://live.example.test/list");
    }

    #[test]
    fn sheet_value_input_follows_the_site() {
        let env = [
            ("SPREADSHEET_ID", "x"),
            ("GSHEET_JSON", "e30="),
            ("LISTING_URL", "https://live.example.test/list"),
        ];
        for rules in psync_adapters::all_sites() {
            let config = SyncConfig::from_lookup(Some(rules.site_id), lookup(&env)).unwrap();
            let expected = if rules.site_id == "jewel-live" {
                SheetInput::UserEntered
            } else {
                SheetInput::Raw
            };
            assert_eq!(config.sheet.unwrap().value_input, expected, "{}", rules.site_id);
        }
    }

    #[test]
    fn mirror_requires_db_host_and_a_mirror_table() {
        let env = [
            ("SPREADSHEET_ID", "x"),
            ("GSHEET_JSON", "e30="),
            ("DB_HOST", "db.internal"),
            ("DB_USER", "u"),
            ("DB_PASSWORD", "p"),
            ("DB_NAME", "profiles"),
            ("SSH_HOST", "bastion"),
            ("SSH_USER", "deploy"),
        ];
        let config = SyncConfig::from_lookup(Some("jewel-live"), lookup(&env)).unwrap();
        let mirror = config.mirror.unwrap();
        assert_eq!(mirror.table, "jewel_live_profiles");
        assert_eq!(mirror.port, 3306);
        let tunnel = mirror.tunnel.unwrap();
        assert_eq!(tunnel.remote_host, "db.internal");
        assert_eq!(tunnel.local_port, 13306);

        let config = SyncConfig::from_lookup(Some("dmm"), lookup(&env)).unwrap();
        assert!(config.mirror.is_none());

        let err = SyncConfig::from_lookup(
            Some("jewel-live"),
            lookup(&[("SPREADSHEET_ID", "x"), ("GSHEET_JSON", "e30="), ("DB_HOST", "db")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("DB_USER"));
    }

    #[test]
    fn numeric_and_mode_options_are_validated() {
        let base = [("API_URL", "https://api.example.test"), ("API_KEY", "k")];
        let mut env = base.to_vec();
        env.push(("DETAIL_DELAY_MS", "soon"));
        assert!(SyncConfig::from_lookup(Some("chatpia"), lookup(&env)).is_err());

        let mut env = base.to_vec();
        env.push(("RENDER_MODE", "browser"));
        env.push(("DETAIL_DELAY_MS", "0"));
        env.push(("PSYNC_TRUST_ENV_PROXIES", "true"));
        let config = SyncConfig::from_lookup(Some("chatpia"), lookup(&env)).unwrap();
        assert_eq!(config.render_mode, RenderMode::Browser);
        assert_eq!(config.detail_delay, Duration::ZERO);
        assert!(config.api.unwrap().trust_env_proxies);

        let mut env = base.to_vec();
        env.push(("RENDER_MODE", "teleport"));
        assert!(SyncConfig::from_lookup(Some("chatpia"), lookup(&env)).is_err());
    }
}
