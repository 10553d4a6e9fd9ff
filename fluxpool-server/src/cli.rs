use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "fluxpool-server",
    about = "Fluxpool - account health workers for the gateway pool",
    version = env!("CARGO_PKG_VERSION"),
    author,
    propagate_version = true
)]
pub struct Cli {
    #[arg(short, long, env = "FLUXPOOL_CONFIG", help = "Path to a JSON config file")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "FLUXPOOL_DATABASE_URL", help = "PostgreSQL connection string")]
    pub database_url: Option<String>,

    #[arg(long, env = "FLUXPOOL_REDIS_URL", help = "Redis connection string")]
    pub redis_url: Option<String>,

    #[arg(short, long, env = "FLUXPOOL_BIND", help = "Address for /healthz and /readyz")]
    pub bind: Option<String>,

    #[arg(short, long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_optional() {
        let cli = Cli::try_parse_from(["fluxpool-server"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.bind.is_none());
    }

    #[test]
    fn test_flags_parse() {
        let cli = Cli::try_parse_from([
            "fluxpool-server",
            "--config",
            "/etc/fluxpool.json",
            "--database-url",
            "postgres://localhost/fluxpool",
            "--bind",
            "0.0.0.0:9000",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/fluxpool.json")));
        assert_eq!(cli.database_url.as_deref(), Some("postgres://localhost/fluxpool"));
        assert_eq!(cli.bind.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(cli.log_level, "debug");
    }
}
