use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::identity::DEFAULT_ANON_LIMIT;
use crate::model::DEFAULT_BASE_URL;

#[derive(Debug, Parser)]
#[command(name = "photo-restore", version, about = "AI photo restoration and editing service")]
pub struct Cli {
    /// SQLite database holding the cache, history and sessions.
    #[arg(long, env = "DATABASE_PATH", default_value = "photo-restore.db", global = true)]
    pub database: PathBuf,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub server: ServerConfig,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server (the default).
    Serve,
    /// Load `<name>-<id>-original.*` / `<name>-<id>-restored.*` pairs into the restore cache.
    SeedCache {
        #[arg(long, default_value = "img_cache")]
        dir: PathBuf,
    },
    /// Create a session for a user and print its bearer token.
    IssueToken {
        #[arg(long)]
        user: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000", global = true)]
    pub bind: SocketAddr,

    #[arg(long, env = "REPLICATE_API_TOKEN", hide_env_values = true, global = true)]
    pub replicate_api_token: Option<String>,

    #[arg(long, env = "REPLICATE_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    pub replicate_base_url: String,

    /// Lifetime operations per feature for anonymous visitors.
    #[arg(long, env = "ANON_LIMIT", default_value_t = DEFAULT_ANON_LIMIT, global = true)]
    pub anon_limit: u64,

    /// Largest accepted request body; images arrive base64-encoded in JSON.
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 25 * 1024 * 1024, global = true)]
    pub max_body_bytes: usize,

    /// Mark the anonymous cookie `Secure`.
    #[arg(long, env = "COOKIE_SECURE", global = true)]
    pub cookie_secure: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            replicate_api_token: None,
            replicate_base_url: DEFAULT_BASE_URL.to_owned(),
            anon_limit: DEFAULT_ANON_LIMIT,
            max_body_bytes: 25 * 1024 * 1024,
            cookie_secure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serving() {
        let cli = Cli::try_parse_from(["photo-restore"]).expect("parse");
        assert!(cli.command.is_none());
        assert_eq!(cli.server.anon_limit, 2);
        assert_eq!(cli.server.bind.port(), 3000);
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["photo-restore", "issue-token", "--user", "u1"])
            .expect("parse");
        assert!(matches!(cli.command, Some(Command::IssueToken { ref user }) if user == "u1"));

        let cli = Cli::try_parse_from(["photo-restore", "seed-cache", "--dir", "seeds"])
            .expect("parse");
        assert!(matches!(cli.command, Some(Command::SeedCache { ref dir }) if dir.ends_with("seeds")));
    }

    #[test]
    fn server_flags_follow_the_serve_subcommand() {
        let cli = Cli::try_parse_from([
            "photo-restore",
            "serve",
            "--bind",
            "127.0.0.1:8080",
            "--anon-limit",
            "3",
        ])
        .expect("parse");
        assert!(matches!(cli.command, Some(Command::Serve)));
        assert_eq!(cli.server.bind, "127.0.0.1:8080".parse::<SocketAddr>().expect("addr"));
        assert_eq!(cli.server.anon_limit, 3);
    }

    #[test]
    fn overrides_server_flags() {
        let cli = Cli::try_parse_from([
            "photo-restore",
            "--anon-limit",
            "5",
            "--cookie-secure",
            "--replicate-base-url",
            "http://localhost:9999",
        ])
        .expect("parse");
        assert_eq!(cli.server.anon_limit, 5);
        assert!(cli.server.cookie_secure);
        assert_eq!(cli.server.replicate_base_url, "http://localhost:9999");
    }
}
