use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use erp_gateway::audit::file_sink::{cleanup_dir, read_dir_events};
use erp_gateway::audit::{AuditLevel, AuditQuery, EventKind};
use erp_gateway::config::{load_config, load_from_env, GatewayConfig};
use erp_gateway::password::PasswordService;

#[derive(Parser)]
#[command(name = "erp-cli")]
#[command(about = "Operator tooling for the ERP security gateway", long_about = None)]
struct Cli {
    /// Gateway config for password policy and audit defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash a password (read from stdin when --password is omitted)
    HashPassword {
        #[arg(long)]
        password: Option<String>,
    },
    /// Check a password against a stored hash
    VerifyPassword {
        #[arg(long)]
        hash: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Generate a random password that satisfies the policy
    GeneratePassword {
        #[arg(short, long, default_value_t = 20)]
        length: usize,
    },
    /// Score a password and list policy violations
    Strength {
        #[arg(long)]
        password: Option<String>,
    },
    /// Generate a password reset token
    ResetToken,
    /// Delete rotated audit files past retention
    AuditCleanup {
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        retention_days: Option<u64>,
    },
    /// Print audit events as JSON lines
    AuditQuery {
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Event kind, e.g. AUTH_LOGIN_FAILED
        #[arg(long)]
        kind: Option<EventKind>,
        #[arg(long)]
        user: Option<String>,
        /// Only warnings and errors
        #[arg(long)]
        warnings: bool,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Load and validate a config file
    CheckConfig { path: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config;
    let load = move || match &config_path {
        Some(path) => load_config(path),
        None => load_from_env(),
    };

    match cli.command {
        Commands::HashPassword { password } => {
            let config = load()?;
            let service = password_service(&config)?;
            let password = password_or_stdin(password)?;
            println!("{}", service.hash(&password)?);
        }
        Commands::VerifyPassword { hash, password } => {
            let config = load()?;
            let service = password_service(&config)?;
            let password = password_or_stdin(password)?;
            if service.verify(&password, &hash)? {
                println!("match");
                if service.needs_rehash(&hash) {
                    println!("note: hash cost is below the configured cost ({})", service.cost());
                }
            } else {
                println!("no match");
                std::process::exit(1);
            }
        }
        Commands::GeneratePassword { length } => {
            let config = load()?;
            let service = password_service(&config)?;
            println!("{}", service.generate(length)?.as_str());
        }
        Commands::Strength { password } => {
            let config = load()?;
            let service = password_service(&config)?;
            let password = password_or_stdin(password)?;
            let strength = service.strength(&password);
            println!("score: {} ({:?})", strength.score, strength.label);
            for violation in service.policy().violations(&password) {
                println!("  - {violation}");
            }
        }
        Commands::ResetToken => {
            println!("{}", erp_gateway::password::generate_reset_token());
        }
        Commands::AuditCleanup {
            dir,
            retention_days,
        } => {
            let config = load()?;
            let dir = dir.unwrap_or_else(|| PathBuf::from(&config.audit.directory));
            let days = retention_days.unwrap_or(config.audit.retention_days);
            let removed = cleanup_dir(
                &dir,
                &config.audit.file_name,
                Duration::from_secs(days.saturating_mul(86_400)),
            )?;
            println!("removed {removed} file(s) from {}", dir.display());
        }
        Commands::AuditQuery {
            dir,
            kind,
            user,
            warnings,
            limit,
        } => {
            let config = load()?;
            let dir = dir.unwrap_or_else(|| PathBuf::from(&config.audit.directory));
            let events = read_dir_events(&dir, &config.audit.file_name)?;
            let query = AuditQuery {
                kind,
                user_id: user,
                min_level: warnings.then_some(AuditLevel::Warning),
                limit,
                ..AuditQuery::default()
            };
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for event in query.apply(&events) {
                writeln!(out, "{}", serde_json::to_string(&event)?)?;
            }
        }
        Commands::CheckConfig { path } => check_config(&path)?,
    }

    Ok(())
}

fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match load_config(path) {
        Ok(config) => {
            println!(
                "{}: ok (environment {:?}, bind {})",
                path.display(),
                config.security.environment,
                config.server.bind_address
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

fn password_service(config: &GatewayConfig) -> Result<PasswordService, Box<dyn std::error::Error>> {
    Ok(PasswordService::new(
        &config.password,
        config.password.pepper.as_bytes(),
    )?)
}

fn password_or_stdin(password: Option<String>) -> io::Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
