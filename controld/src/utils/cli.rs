use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Listening host
    #[arg(long, env = "CONTROLD_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listening port
    #[arg(short, long, env = "CONTROLD_PORT", default_value_t = 8070)]
    pub port: u16,

    /// Runtime configuration file, created with defaults when missing
    #[arg(
        short,
        long,
        env = "CONTROLD_CONFIG",
        default_value = "/var/lib/controld/config.json"
    )]
    pub config: String,

    /// Operator credential file
    #[arg(
        long,
        env = "CONTROLD_PASSWD",
        default_value = "/var/lib/controld/passwd",
        global = true
    )]
    pub passwd: String,

    /// Directory served to browsers for any path without a route
    #[arg(long, env = "CONTROLD_WEB_ROOT")]
    pub web_root: Option<String>,

    /// Shell command that runs the managed service in the foreground
    #[arg(long, env = "CONTROLD_SERVICE_CMD", default_value = "")]
    pub service_cmd: String,

    /// Working directory for the service and update commands
    #[arg(long, env = "CONTROLD_SERVICE_WORKDIR", default_value = ".")]
    pub service_workdir: String,

    /// Shell command that builds the service from `PDB_BRANCH` and `PUI_BRANCH`
    #[arg(long, env = "CONTROLD_UPDATE_CMD", default_value = "")]
    pub update_cmd: String,

    /// File the build leaves the service version in
    #[arg(long, env = "CONTROLD_VERSION_FILE", default_value = "VERSION")]
    pub version_file: String,

    #[arg(long, env = "CONTROLD_START_TIMEOUT_SECS", default_value_t = 60)]
    pub start_timeout_secs: u64,

    #[arg(long, env = "CONTROLD_UPDATE_TIMEOUT_SECS", default_value_t = 600)]
    pub update_timeout_secs: u64,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the control API (default)
    Serve,
    /// Add an operator account
    AddUser {
        username: String,
        #[arg(long, env = "CONTROLD_NEW_PASSWORD")]
        password: String,
    },
    /// Remove an operator account
    RemoveUser { username: String },
    /// Print the operator accounts
    ListUsers,
}
