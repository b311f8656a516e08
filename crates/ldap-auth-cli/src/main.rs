use anyhow::{Context, Result};
use clap::Parser;
use ldap_auth::{
    AuthOutcome, LdapAuthConfig, LdapAuthProvider, MemoryAccountDirectory,
    MemoryIdentityRecordStore,
};
use std::process;
use std::sync::Arc;
use tracing::debug;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

/// Returns whether the command succeeded
async fn run(cli: Cli) -> Result<bool> {
    let config = LdapAuthConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command.clone() {
        Commands::CheckConfig => {
            print_summary(&config);
            Ok(true)
        }
        Commands::Login {
            username,
            password_env,
        } => {
            let provider = build_provider(&cli, config)?;
            let password = read_password(&password_env)?;
            let outcome = provider
                .verifier()
                .verify_password(&username, &password)
                .await?;
            Ok(report(outcome))
        }
        Commands::LoginThirdParty {
            medium,
            address,
            password_env,
        } => {
            let provider = build_provider(&cli, config)?;
            let password = read_password(&password_env)?;
            let outcome = provider
                .verifier()
                .verify_third_party(&medium, &address, &password)
                .await?;
            Ok(report(outcome))
        }
    }
}

fn build_provider(cli: &Cli, config: LdapAuthConfig) -> Result<LdapAuthProvider> {
    Ok(LdapAuthProvider::new(
        config,
        Arc::new(MemoryAccountDirectory::new(cli.server_name.clone())),
        Arc::new(MemoryIdentityRecordStore::new()),
    )?)
}

fn report(outcome: AuthOutcome) -> bool {
    match outcome {
        AuthOutcome::Authenticated(account_id) => {
            println!("{}", account_id);
            true
        }
        AuthOutcome::Rejected => {
            println!("rejected");
            false
        }
    }
}

fn read_password(variable: &str) -> Result<String> {
    debug!("Reading password from ${}", variable);
    std::env::var(variable).with_context(|| format!("environment variable {} is not set", variable))
}

fn print_summary(config: &LdapAuthConfig) {
    println!("enabled:      {}", config.enabled);
    println!("mode:         {}", config.mode);
    println!("servers:      {}", config.uris.join(", "));
    println!("start_tls:    {}", config.start_tls);
    println!("verify certs: {}", config.tls.verify_certificates());
    println!("base:         {}", config.base);
    println!(
        "attributes:   uid={} name={} mail={}",
        config.attributes.uid, config.attributes.name, config.attributes.mail
    );
    if let Some(bind) = &config.bind {
        println!("bind dn:      {}", bind.dn);
    }
    if let Some(filter) = &config.filter {
        println!("filter:       {}", filter);
    }
    if config.active_directory.is_some() {
        println!(
            "active dir:   default domain {}",
            config.default_domain().unwrap_or("(none)")
        );
    }
    if config.user_mapping.is_some() {
        println!(
            "mapping:      template {}, provider {}",
            config
                .localpart_template()
                .map(|template| template.as_str())
                .unwrap_or("(none)"),
            config.external_id_provider()
        );
    }
}

fn setup_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "info,ldap_auth=debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
