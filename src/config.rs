use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const GROUP_NAME_ENV: &str = "GROUP_NAME";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub dnspod: DnspodConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub tls_cert_file: Option<String>,
    #[serde(default)]
    pub tls_key_file: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    443
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            tls_cert_file: None,
            tls_key_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// API group the solver is registered under, e.g. `acme.example.com`.
    #[serde(default)]
    pub group_name: String,
    #[serde(default = "default_solver_name")]
    pub solver_name: String,
}

fn default_solver_name() -> String {
    "dnspod-solver".to_string()
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            group_name: String::new(),
            solver_name: default_solver_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnspodConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_record_line")]
    pub record_line: String,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// CNAME records at these subdomains shadow the challenge TXT record
    /// and are disabled while a challenge is presented.
    #[serde(default = "default_cname_subdomains")]
    pub cname_subdomains: Vec<String>,
}

fn default_endpoint() -> String {
    "https://dnspod.tencentcloudapi.com".to_string()
}

fn default_record_line() -> String {
    "默认".to_string()
}

fn default_ttl() -> u32 {
    600
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_cname_subdomains() -> Vec<String> {
    vec!["@".to_string(), "*".to_string()]
}

impl Default for DnspodConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            region: String::new(),
            record_line: default_record_line(),
            ttl: default_ttl(),
            timeout_secs: default_timeout_secs(),
            cname_subdomains: default_cname_subdomains(),
        }
    }
}

impl Config {
    /// Loads the config file, falling back to defaults when it does not exist.
    /// `GROUP_NAME` from the environment wins over the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        if let Ok(group_name) = std::env::var(GROUP_NAME_ENV) {
            if !group_name.trim().is_empty() {
                config.webhook.group_name = group_name.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.webhook.group_name.is_empty() {
            anyhow::bail!("{} must be specified", GROUP_NAME_ENV);
        }
        if self.webhook.solver_name.is_empty() {
            anyhow::bail!("webhook.solver_name must not be empty");
        }
        if self.server.tls_cert_file.is_some() != self.server.tls_key_file.is_some() {
            anyhow::bail!("tls_cert_file and tls_key_file must be set together");
        }
        Ok(())
    }

    /// Replaces each TLS path that is given on the command line, keeping the
    /// file's value for the other one.
    pub fn override_tls_files(
        &mut self,
        cert_file: Option<String>,
        key_file: Option<String>,
    ) -> Result<()> {
        if cert_file.is_none() && key_file.is_none() {
            return Ok(());
        }
        if let Some(cert_file) = cert_file {
            self.server.tls_cert_file = Some(cert_file);
        }
        if let Some(key_file) = key_file {
            self.server.tls_key_file = Some(key_file);
        }
        self.validate()
    }

    pub fn tls_files(&self) -> Option<(&str, &str)> {
        match (&self.server.tls_cert_file, &self.server.tls_key_file) {
            (Some(cert), Some(key)) => Some((cert.as_str(), key.as_str())),
            _ => None,
        }
    }
}
