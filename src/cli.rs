//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// OAuth2 proxy and session gateway for an MCP tool server
#[derive(Parser, Debug)]
#[command(name = "mcp-oauth-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_OAUTH_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MCP_OAUTH_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MCP_OAUTH_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Public origin used as OAuth issuer in discovery documents
    #[arg(long, env = "MCP_OAUTH_GATEWAY_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_OAUTH_GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_OAUTH_GATEWAY_LOG_FORMAT")]
    pub log_format: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let cli = Cli::parse_from(["mcp-oauth-gateway"]);
        assert!(cli.config.is_none());
        assert!(cli.port.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn overrides_parse() {
        let cli = Cli::parse_from([
            "mcp-oauth-gateway",
            "--port",
            "4001",
            "--host",
            "0.0.0.0",
            "--public-url",
            "https://gateway.example.com",
        ]);
        assert_eq!(cli.port, Some(4001));
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.public_url.as_deref(), Some("https://gateway.example.com"));
    }
}
