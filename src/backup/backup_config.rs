use crate::backup::archive::exclude::ExcludePattern;
use crate::backup::command::{shell_quote, CommandSpec};
use crate::backup::compress::GzipConfig;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::retention::RetentionPolicy;
use crate::backup::validate::{
    validate_absolute_path, validate_absolute_paths, validate_file_name_component,
    validate_passphrase, validate_program_name,
};

use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::Validate;

use std::fs::File;
use std::path::{Path, PathBuf};

pub static DEFAULT_CONFIG_PATH: &str = "/etc/host-backup/config.yml";

/// Command line value parser: the config file must already exist.
pub fn existing_config_path(value: &str) -> std::result::Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("config file {:?} does not exist", path))
    }
}

/// Settings for one backup run, loaded once and never mutated.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupConfig {
    /// Overrides the machine hostname used to name artifacts.
    #[validate(custom(function = validate_file_name_component))]
    #[builder(into)]
    hostname: Option<String>,
    /// Where archives are built and where encrypted archives are kept.
    #[builder(into)]
    local_dir: PathBuf,
    /// Scratch space for the database dump.
    #[builder(into)]
    tmp_dir: PathBuf,
    #[builder(into)]
    log_file: PathBuf,
    #[validate(length(min = 1), custom(function = validate_absolute_paths))]
    #[builder(into)]
    backup_paths: Vec<PathBuf>,
    #[serde(default)]
    #[builder(default, into)]
    exclude: Vec<ExcludePattern>,
    #[serde(default)]
    #[validate(custom(function = validate_absolute_paths))]
    #[builder(default, into)]
    mirror_dirs: Vec<PathBuf>,
    #[validate(custom(function = validate_passphrase))]
    #[builder(into)]
    passphrase: RedactedString,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    compression: GzipConfig,
    #[validate(nested)]
    remote: RemoteConfig,
    database: Option<DatabaseConfig>,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    tools: ToolsConfig,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    retention: RetentionSettings,
}

impl BackupConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = File::open(path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader::<_, BackupConfig>(f).map_err(Error::from))
            .add_msg(format!("Parse YAML config failed: {:?}", path))?;
        config
            .validate()
            .map_err(Error::from)
            .add_msg(format!("Config validation failed: {:?}", path))?;
        Ok(config)
    }

    /// Configured hostname, or the machine's own.
    pub fn resolve_hostname(&self) -> Result<String> {
        let hostname = match &self.hostname {
            Some(h) => h.clone(),
            None => nix::unistd::gethostname()?
                .to_string_lossy()
                .into_owned(),
        };
        validate_file_name_component(&hostname)
            .map_err(|e| Error::invalid_archive_name(e.to_string()))?;
        Ok(hostname)
    }

    /// Database root credential, if one is configured.
    pub fn database_password(&self) -> Option<&RedactedString> {
        self.database
            .as_ref()
            .and_then(|db| db.root_password.as_ref())
            .filter(|p| !p.is_empty())
    }

    pub fn database_user(&self) -> &str {
        self.database
            .as_ref()
            .map(|db| db.user.as_str())
            .unwrap_or(DEFAULT_DATABASE_USER)
    }
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct RemoteConfig {
    #[validate(length(min = 1))]
    #[builder(into)]
    host: String,
    #[serde(default = "default_ssh_port")]
    #[validate(range(min = 1))]
    #[builder(default = default_ssh_port())]
    port: u16,
    #[validate(length(min = 1))]
    #[builder(into)]
    user: String,
    #[validate(custom(function = validate_absolute_path))]
    #[builder(into)]
    dir: PathBuf,
    /// kbit/s, 0 means unlimited.
    #[serde(default)]
    #[builder(default)]
    bandwidth_limit: u32,
}

impl RemoteConfig {
    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `user@host:dir/`, the target of scp and rsync.
    pub fn dir_target(&self) -> String {
        format!(
            "{}:{}/",
            self.destination(),
            self.dir.to_string_lossy().trim_end_matches('/')
        )
    }

    /// Non-interactive ssh invocation of `remote_command` on the remote host.
    pub fn ssh_command<S: AsRef<str>>(&self, ssh: &str, remote_command: S) -> CommandSpec {
        CommandSpec::new(ssh)
            .arg("-p")
            .arg(self.port.to_string())
            .args(["-o", "BatchMode=yes"])
            .arg(self.destination())
            .arg(remote_command.as_ref())
    }

    /// Remote shell for rsync's `-e`.
    pub fn rsync_transport(&self, ssh: &str) -> String {
        format!("{} -p {} -o BatchMode=yes", ssh, self.port)
    }

    /// Remote directory, quoted for the remote shell.
    pub fn quoted_dir(&self) -> String {
        shell_quote(self.dir.to_string_lossy())
    }

    pub fn quoted_path_in_dir(&self, name: &str) -> String {
        shell_quote(self.dir.join(name).to_string_lossy())
    }
}

pub static DEFAULT_DATABASE_USER: &str = "root";

fn default_database_user() -> String {
    DEFAULT_DATABASE_USER.to_string()
}

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct DatabaseConfig {
    #[builder(into)]
    root_password: Option<RedactedString>,
    #[serde(default = "default_database_user")]
    #[builder(default = default_database_user(), into)]
    user: String,
}

/// Program names of the external tools, resolved on `PATH` unless a path is given.
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
#[getset(get = "pub")]
pub struct ToolsConfig {
    #[validate(custom(function = validate_program_name))]
    #[builder(default = "ssh".to_string(), into)]
    ssh: String,
    #[validate(custom(function = validate_program_name))]
    #[builder(default = "scp".to_string(), into)]
    scp: String,
    #[validate(custom(function = validate_program_name))]
    #[builder(default = "rsync".to_string(), into)]
    rsync: String,
    #[validate(custom(function = validate_program_name))]
    #[builder(default = "mysqldump".to_string(), into)]
    mysqldump: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        ToolsConfig::builder().build()
    }
}

pub static DEFAULT_RETENTION_COMMAND: &str = "host-backup-prune";

#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters)]
#[serde(default, deny_unknown_fields)]
#[getset(get = "pub")]
pub struct RetentionSettings {
    /// The retention-deletion program, run once for local and once for remote.
    #[validate(custom(function = validate_program_name))]
    #[builder(default = DEFAULT_RETENTION_COMMAND.to_string(), into)]
    command: String,
    /// Consumed by the retention-deletion program.
    #[validate(nested)]
    policy: Option<RetentionPolicy>,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        RetentionSettings::builder().build()
    }
}
