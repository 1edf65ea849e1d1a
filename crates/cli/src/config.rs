//! Server configuration.  Every flag falls back to an environment
//! variable; `main` loads `.env` before parsing.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Args;

#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    #[arg(long, env = "BIND", default_value = "0.0.0.0:8090")]
    pub bind: SocketAddr,

    /// Postgres connection string.  Not needed with `--in-memory`.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    /// Runs processed at once; defaults to the number of CPUs.
    #[arg(long, env = "WORKFLOW_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Root for the local deployer and the http-01 webroot.
    #[arg(long, env = "CERTFLOW_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        config: ServerConfig,
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = Wrapper::try_parse_from([
            "certflow",
            "--bind",
            "127.0.0.1:9000",
            "--db-max-connections",
            "3",
            "--max-concurrency",
            "2",
        ])
        .unwrap()
        .config;

        assert_eq!(parsed.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(parsed.db_max_connections, 3);
        assert_eq!(parsed.max_concurrency, Some(2));
    }

    #[test]
    fn rejects_bad_bind_address() {
        assert!(Wrapper::try_parse_from(["certflow", "--bind", "nowhere"]).is_err());
    }
}
