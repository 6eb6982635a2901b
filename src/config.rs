use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration for the deployment daemon
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Daemon server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Campaign scanning configuration
    #[serde(default)]
    pub campaigns: CampaignsConfig,

    /// Managed nginx configuration
    #[serde(default)]
    pub nginx: NginxConfig,

    /// Structure detection markers
    #[serde(default)]
    pub markers: MarkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address for the admin API (default: 127.0.0.1)
    #[serde(default = "default_admin_bind")]
    pub admin_bind: String,

    /// Port for the admin API
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// Authentication token for admin API (required for write operations)
    /// If not set, a random token is generated at startup and logged
    pub admin_token: Option<String>,

    /// Path to PID file (optional)
    pub pid_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            admin_bind: default_admin_bind(),
            admin_port: default_admin_port(),
            admin_token: None,
            pid_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CampaignsConfig {
    /// Root directory; each immediate subdirectory is one campaign
    #[serde(default = "default_campaigns_root")]
    pub root: PathBuf,

    /// Seconds between periodic scans (0 disables the periodic scanner;
    /// scans can still be triggered via the admin API or SIGHUP)
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

impl CampaignsConfig {
    pub fn scan_interval(&self) -> Option<Duration> {
        if self.scan_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.scan_interval_secs))
        }
    }
}

impl Default for CampaignsConfig {
    fn default() -> Self {
        Self {
            root: default_campaigns_root(),
            scan_interval_secs: default_scan_interval(),
        }
    }
}

/// How the generated config reaches nginx and how nginx is reloaded.
///
/// # Security Warning
///
/// `validate_command` and `reload_command` are executed directly.
/// Configuration files must be protected with appropriate file permissions
/// (e.g., readable only by the service user). Malicious configuration files
/// could execute arbitrary code with the permissions of the daemon process.
#[derive(Debug, Deserialize, Clone)]
pub struct NginxConfig {
    /// Path the assembled config file is written to (included by nginx)
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Offline syntax validation command. `{config}` is replaced with the
    /// path of the candidate config file.
    #[serde(default = "default_validate_command")]
    pub validate_command: String,

    /// Graceful reload command, run after the live config is replaced
    #[serde(default = "default_reload_command")]
    pub reload_command: String,

    /// nginx master PID file; when set, a bounded liveness probe confirms
    /// the process survived the reload. When unset the probe is skipped.
    pub pid_file: Option<PathBuf>,

    /// Bounded wait for the post-reload liveness probe
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_secs: u64,
}

impl NginxConfig {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }
}

impl Default for NginxConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            validate_command: default_validate_command(),
            reload_command: default_reload_command(),
            pid_file: None,
            liveness_timeout_secs: default_liveness_timeout(),
        }
    }
}

/// Marker file and directory names used by structure classification.
/// These are a configuration surface so new framework signatures can be
/// recognized without a code change.
#[derive(Debug, Deserialize, Clone)]
pub struct MarkerConfig {
    /// Entry-point script filenames, in lookup order
    #[serde(default = "default_entry_points")]
    pub entry_points: Vec<String>,

    /// Name of the framework public directory
    #[serde(default = "default_public_dir")]
    pub public_dir: String,

    /// Directory names that indicate a framework application
    #[serde(default = "default_framework_dirs")]
    pub framework_dirs: Vec<String>,

    /// Dependency-manifest filenames that indicate a framework application
    #[serde(default = "default_manifests")]
    pub manifests: Vec<String>,

    /// File extensions treated as server-side scripts
    #[serde(default = "default_dynamic_extensions")]
    pub dynamic_extensions: Vec<String>,

    /// FastCGI socket passed to the script handler for dynamic campaigns
    #[serde(default = "default_fastcgi_socket")]
    pub fastcgi_socket: String,
}

impl MarkerConfig {
    pub fn is_entry_point(&self, name: &str) -> bool {
        self.entry_points.iter().any(|e| e == name)
    }

    pub fn is_framework_dir(&self, name: &str) -> bool {
        self.framework_dirs.iter().any(|d| d == name)
    }

    pub fn is_manifest(&self, name: &str) -> bool {
        self.manifests.iter().any(|m| m == name)
    }

    pub fn is_dynamic_extension(&self, ext: &str) -> bool {
        self.dynamic_extensions.iter().any(|e| e == ext)
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            entry_points: default_entry_points(),
            public_dir: default_public_dir(),
            framework_dirs: default_framework_dirs(),
            manifests: default_manifests(),
            dynamic_extensions: default_dynamic_extensions(),
            fastcgi_socket: default_fastcgi_socket(),
        }
    }
}

// Default value functions

fn default_admin_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_admin_port() -> u16 {
    9920
}

fn default_campaigns_root() -> PathBuf {
    PathBuf::from("/var/www/campaigns")
}

fn default_scan_interval() -> u64 {
    30 // scan the campaigns root every 30 seconds
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/nginx/conf.d/campaigns.conf")
}

fn default_validate_command() -> String {
    "nginx -t -c {config}".to_string()
}

fn default_reload_command() -> String {
    "nginx -s reload".to_string()
}

fn default_liveness_timeout() -> u64 {
    5
}

fn default_entry_points() -> Vec<String> {
    vec!["index.php".to_string(), "index.html".to_string()]
}

fn default_public_dir() -> String {
    "public".to_string()
}

fn default_framework_dirs() -> Vec<String> {
    vec!["routes".to_string(), "app".to_string()]
}

fn default_manifests() -> Vec<String> {
    vec!["composer.json".to_string(), "artisan".to_string()]
}

fn default_dynamic_extensions() -> Vec<String> {
    vec!["php".to_string()]
}

fn default_fastcgi_socket() -> String {
    "/var/run/php/php8.4-fpm.sock".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.campaigns.root.as_os_str().is_empty() {
            errors.push("campaigns.root must not be empty".to_string());
        }

        if self.nginx.config_path.as_os_str().is_empty() {
            errors.push("nginx.config_path must not be empty".to_string());
        }

        if let Err(e) = shell_words::split(&self.nginx.validate_command) {
            errors.push(format!("nginx.validate_command is not parseable: {}", e));
        } else if self.nginx.validate_command.trim().is_empty() {
            errors.push("nginx.validate_command must not be empty".to_string());
        }

        if let Err(e) = shell_words::split(&self.nginx.reload_command) {
            errors.push(format!("nginx.reload_command is not parseable: {}", e));
        } else if self.nginx.reload_command.trim().is_empty() {
            errors.push("nginx.reload_command must not be empty".to_string());
        }

        if self.markers.entry_points.is_empty() {
            errors.push("markers.entry_points must list at least one filename".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
admin_port = 9000

[campaigns]
root = "/srv/campaigns"
scan_interval_secs = 10

[nginx]
config_path = "/etc/nginx/conf.d/generated.conf"
validate_command = "nginx -t -c {config}"
reload_command = "systemctl reload nginx"
pid_file = "/run/nginx.pid"
liveness_timeout_secs = 3

[markers]
entry_points = ["index.php"]
dynamic_extensions = ["php", "phtml"]
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.admin_port, 9000);
        assert_eq!(config.campaigns.root, PathBuf::from("/srv/campaigns"));
        assert_eq!(
            config.campaigns.scan_interval(),
            Some(Duration::from_secs(10))
        );
        assert_eq!(config.nginx.pid_file, Some(PathBuf::from("/run/nginx.pid")));
        assert_eq!(config.nginx.liveness_timeout(), Duration::from_secs(3));
        assert!(config.markers.is_dynamic_extension("phtml"));
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.admin_bind, "127.0.0.1");
        assert_eq!(config.server.admin_port, 9920);
        assert_eq!(config.campaigns.root, PathBuf::from("/var/www/campaigns"));
        assert_eq!(config.campaigns.scan_interval_secs, 30);
        assert_eq!(
            config.nginx.config_path,
            PathBuf::from("/etc/nginx/conf.d/campaigns.conf")
        );
        assert_eq!(config.nginx.validate_command, "nginx -t -c {config}");
        assert_eq!(config.nginx.reload_command, "nginx -s reload");
        assert!(config.nginx.pid_file.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_default_markers() {
        let markers = MarkerConfig::default();
        assert!(markers.is_entry_point("index.php"));
        assert!(markers.is_entry_point("index.html"));
        assert!(!markers.is_entry_point("main.py"));
        assert!(markers.is_framework_dir("routes"));
        assert!(markers.is_framework_dir("app"));
        assert!(markers.is_manifest("composer.json"));
        assert!(markers.is_manifest("artisan"));
        assert!(markers.is_dynamic_extension("php"));
        assert!(!markers.is_dynamic_extension("css"));
        assert_eq!(markers.public_dir, "public");
    }

    #[test]
    fn test_scan_interval_zero_disables() {
        let toml = r#"
[campaigns]
scan_interval_secs = 0
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.campaigns.scan_interval(), None);
    }

    #[test]
    fn test_validate_rejects_empty_commands() {
        let toml = r#"
[nginx]
validate_command = ""
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("validate_command"));
    }

    #[test]
    fn test_validate_rejects_unparseable_command() {
        let toml = r#"
[nginx]
reload_command = "nginx -s 'reload"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("reload_command"));
    }

    #[test]
    fn test_validate_requires_entry_points() {
        let toml = r#"
[markers]
entry_points = []
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("entry_points"));
    }
}
