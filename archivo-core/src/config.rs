use crate::error::ArchivoError;
use clap::{Parser, ValueEnum};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Target RDF serialization requested of the archive / upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "kebab-case")]
pub enum OntoFormat {
    Turtle,
    Ntriples,
    Rdfxml,
    Htmldocu,
}

impl OntoFormat {
    /// Preferred MIME type for this format, used by the Content Negotiator.
    pub fn mime(&self) -> &'static str {
        match self {
            OntoFormat::Turtle => "text/turtle",
            OntoFormat::Ntriples => "application/n-triples",
            OntoFormat::Rdfxml => "application/rdf+xml",
            OntoFormat::Htmldocu => "text/html",
        }
    }
}

impl Default for OntoFormat {
    fn default() -> Self {
        OntoFormat::Turtle
    }
}

/// Accept-header rewrite policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
#[clap(rename_all = "kebab-case")]
pub enum OntoPrecedence {
    Default,
    EnforcedPriority,
    Always,
}

impl Default for OntoPrecedence {
    fn default() -> Self {
        OntoPrecedence::EnforcedPriority
    }
}

/// Version policy state-machine selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
#[clap(rename_all = "kebab-case")]
pub enum OntoVersion {
    Original,
    OriginalFailoverLiveLatest,
    LatestArchived,
    TimestampArchived,
    /// Known enum value for forward compatibility with historical config files; no
    /// implemented state. Dispatch always yields `ArchivoError::Internal`.
    DependencyManifest,
}

impl Default for OntoVersion {
    fn default() -> Self {
        OntoVersion::LatestArchived
    }
}

/// CONNECT / TLS-interception policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "kebab-case")]
pub enum HttpsInterception {
    None,
    All,
    Block,
    Archivo,
}

impl Default for HttpsInterception {
    fn default() -> Self {
        HttpsInterception::All
    }
}

/// Source of per-connection configuration overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "kebab-case")]
pub enum ClientConfigViaProxyAuth {
    Ignore,
    Optional,
    Required,
}

impl Default for ClientConfigViaProxyAuth {
    fn default() -> Self {
        ClientConfigViaProxyAuth::Ignore
    }
}

/// Diagnostics-only verbosity selector; never branches core logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
#[clap(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Format policy: the RDF serialization requested plus how aggressively the proxy
/// rewrites the client's Accept header to request it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OntoFormatConfig {
    #[serde(default)]
    pub format: OntoFormat,
    #[serde(default)]
    pub precedence: OntoPrecedence,
    #[serde(default)]
    pub patch_accept_upstream: bool,
}

/// Effective configuration for a request — either the immutable startup `Config` or a
/// per-connection override derived from proxy-authorization (see `archivo-plugin`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub onto_format: OntoFormatConfig,

    #[serde(default)]
    pub onto_version: OntoVersion,

    /// Required iff `onto_version == TimestampArchived`; opaque, passed to the archive API.
    #[serde(default)]
    pub timestamp: String,

    #[serde(default)]
    pub restricted_access: bool,

    #[serde(default)]
    pub https_interception: HttpsInterception,

    #[serde(default)]
    pub client_config_via_proxy_auth: ClientConfigViaProxyAuth,

    #[serde(default)]
    pub disable_removing_redirects: bool,

    #[serde(default = "default_host")]
    pub host: Vec<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub log_level_time_machine: LogLevel,

    #[serde(default)]
    pub log_level_base: LogLevel,

    #[serde(default = "default_archive_api")]
    pub archive_api: String,

    #[serde(default = "default_archive_index_url")]
    pub archive_index_url: String,

    #[serde(default = "default_archive_list_path")]
    pub archive_list_path: String,

    #[serde(default = "default_archive_hash_path")]
    pub archive_hash_path: String,

    /// CA certificate used to sign per-host leaf certificates when `https_interception`
    /// is anything other than `none`. Generated on first run if absent.
    #[serde(default = "default_ca_cert_path")]
    pub ca_cert_path: String,

    /// Private key matching `ca_cert_path`.
    #[serde(default = "default_ca_key_path")]
    pub ca_key_path: String,
}

fn default_host() -> Vec<String> {
    vec!["0.0.0.0".to_string(), "::".to_string()]
}

fn default_port() -> u16 {
    8898
}

fn default_archive_api() -> String {
    "https://archivo.dbpedia.org/download".to_string()
}

fn default_archive_index_url() -> String {
    "https://databus.dbpedia.org/ontologies/archivo-indices/ontologies/2024.07.26-220000/ontologies_type=official.csv".to_string()
}

fn default_archive_list_path() -> String {
    "archivo_ontologies.txt".to_string()
}

fn default_archive_hash_path() -> String {
    "archivo_ontologies.sha256".to_string()
}

fn default_ca_cert_path() -> String {
    "archivo_ca.pem".to_string()
}

fn default_ca_key_path() -> String {
    "archivo_ca.key.pem".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            onto_format: OntoFormatConfig::default(),
            onto_version: OntoVersion::default(),
            timestamp: String::new(),
            restricted_access: false,
            https_interception: HttpsInterception::default(),
            client_config_via_proxy_auth: ClientConfigViaProxyAuth::default(),
            disable_removing_redirects: false,
            host: default_host(),
            port: default_port(),
            log_level_time_machine: LogLevel::default(),
            log_level_base: LogLevel::default(),
            archive_api: default_archive_api(),
            archive_index_url: default_archive_index_url(),
            archive_list_path: default_archive_list_path(),
            archive_hash_path: default_archive_hash_path(),
            ca_cert_path: default_ca_cert_path(),
            ca_key_path: default_ca_key_path(),
        }
    }
}

/// CLI surface, consumed both as the process's real `argv` and (re-parsed against a
/// synthetic argument vector) by the Config Resolver when decoding a proxy-authorization
/// override.
#[derive(Debug, Clone, Parser, Default)]
#[command(name = "archivo", disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    #[arg(long)]
    pub onto_format: Option<OntoFormat>,

    #[arg(long)]
    pub onto_precedence: Option<OntoPrecedence>,

    #[arg(long)]
    pub patch_accept_upstream: bool,

    #[arg(long)]
    pub onto_version: Option<OntoVersion>,

    #[arg(long)]
    pub timestamp: Option<String>,

    #[arg(long)]
    pub restricted_access: bool,

    #[arg(long)]
    pub https_interception: Option<HttpsInterception>,

    #[arg(long)]
    pub client_config_via_proxy_auth: Option<ClientConfigViaProxyAuth>,

    #[arg(long)]
    pub disable_removing_redirects: bool,

    #[arg(long, num_args = 1..)]
    pub host: Option<Vec<String>>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub log_level_time_machine: Option<LogLevel>,

    #[arg(long)]
    pub log_level_base: Option<LogLevel>,

    #[arg(long)]
    pub archive_api: Option<String>,

    #[arg(long)]
    pub archive_index_url: Option<String>,

    #[arg(long)]
    pub ca_cert_path: Option<String>,

    #[arg(long)]
    pub ca_key_path: Option<String>,

    #[arg(long)]
    pub config: Option<String>,
}

impl Cli {
    /// Apply the flags present on this CLI fragment on top of a base `Config`, following
    /// the same "only override what's explicitly set" rule whether `base` is the process
    /// startup config or a config being rebuilt from a proxy-authorization argument list.
    pub fn apply_onto(&self, mut cfg: Config) -> Config {
        if let Some(f) = self.onto_format {
            cfg.onto_format.format = f;
        }
        if let Some(p) = self.onto_precedence {
            cfg.onto_format.precedence = p;
        }
        if self.patch_accept_upstream {
            cfg.onto_format.patch_accept_upstream = true;
        }
        if let Some(v) = self.onto_version {
            cfg.onto_version = v;
        }
        if let Some(ref t) = self.timestamp {
            cfg.timestamp = t.clone();
        }
        if self.restricted_access {
            cfg.restricted_access = true;
        }
        if let Some(h) = self.https_interception {
            cfg.https_interception = h;
        }
        if let Some(c) = self.client_config_via_proxy_auth {
            cfg.client_config_via_proxy_auth = c;
        }
        if self.disable_removing_redirects {
            cfg.disable_removing_redirects = true;
        }
        if let Some(ref h) = self.host {
            cfg.host = h.clone();
        }
        if let Some(p) = self.port {
            cfg.port = p;
        }
        if let Some(l) = self.log_level_time_machine {
            cfg.log_level_time_machine = l;
        }
        if let Some(l) = self.log_level_base {
            cfg.log_level_base = l;
        }
        if let Some(ref a) = self.archive_api {
            cfg.archive_api = a.clone();
        }
        if let Some(ref u) = self.archive_index_url {
            cfg.archive_index_url = u.clone();
        }
        cfg
    }
}

/// Parse a whitespace-delimited argument vector (the decoded proxy-authorization
/// username, or a config-override string used in tests) the same way the startup CLI is
/// parsed, and apply it on top of `base`.
pub fn parse_argument_overrides(arg_str: &str, base: Config) -> Result<Config, ArchivoError> {
    let mut argv = vec!["archivo".to_string()];
    argv.extend(arg_str.split_whitespace().map(str::to_string));
    let cli = Cli::try_parse_from(argv)
        .map_err(|e| ArchivoError::Internal(format!("invalid proxy-auth config: {e}")))?;
    Ok(cli.apply_onto(base))
}

impl Config {
    /// Load the startup configuration by layering, lowest to highest priority: built-in
    /// defaults, an optional YAML file, environment variables prefixed `ARCHIVO_`
    /// (nested fields separated by `__`), then CLI flags.
    pub fn load(cli: &Cli) -> Result<Self, ArchivoError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(ref path) = cli.config {
            figment = figment.merge(Yaml::file(path));
        } else if std::path::Path::new("archivo.yaml").exists() {
            figment = figment.merge(Yaml::file("archivo.yaml"));
        }

        figment = figment.merge(Env::prefixed("ARCHIVO_").split("__"));

        let mut cfg: Self = figment
            .extract()
            .map_err(|e| ArchivoError::Internal(format!("invalid configuration: {e}")))?;
        cfg = cli.apply_onto(cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Startup-time validation. The one documented case is an empty timestamp paired
    /// with `timestampArchived`, treated as a hard configuration error (see SPEC_FULL.md,
    /// Open Questions) rather than something a request should ever see.
    pub fn validate(&self) -> Result<(), ArchivoError> {
        if self.onto_version == OntoVersion::TimestampArchived && self.timestamp.is_empty() {
            return Err(ArchivoError::Internal(
                "--onto-version timestamp-archived requires a non-empty --timestamp".to_string(),
            ));
        }
        Ok(())
    }
}
