use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_PASSWORD_ENV: &str = "LDAP_AUTH_PASSWORD";

#[derive(Parser, Debug)]
#[command(
    name = "ldap-auth",
    about = "Check logins against an LDAP or Active Directory server",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (TOML, or YAML with a .yaml/.yml extension)
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Server name used to qualify account ids
    #[arg(long, default_value = "localhost")]
    pub server_name: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Validate the configuration and print a summary
    CheckConfig,

    /// Authenticate a username
    Login {
        #[arg(short, long)]
        username: String,

        /// Environment variable holding the password
        #[arg(long, default_value = DEFAULT_PASSWORD_ENV)]
        password_env: String,
    },

    /// Authenticate a third-party identifier such as an email address
    #[command(name = "login-3pid")]
    LoginThirdParty {
        #[arg(short, long, default_value = "email")]
        medium: String,

        #[arg(short, long)]
        address: String,

        /// Environment variable holding the password
        #[arg(long, default_value = DEFAULT_PASSWORD_ENV)]
        password_env: String,
    },
}
