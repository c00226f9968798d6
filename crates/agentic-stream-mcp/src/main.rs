//! AgenticStream MCP Server entry point.

use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use agentic_stream_mcp::config::ServerConfig;
use agentic_stream_mcp::methods::MethodRegistry;
use agentic_stream_mcp::transport::StdioTransport;

#[derive(Parser)]
#[command(
    name = "agentic-stream-mcp",
    about = "MCP server for AgenticStream: resumable Streamable HTTP and stdio transports",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server over stdio (default).
    Serve {
        /// Seconds to wait for the client to answer a server request.
        #[arg(long, default_value_t = 60)]
        call_timeout: u64,
    },

    /// Start MCP server over Streamable HTTP.
    #[cfg(feature = "http")]
    ServeHttp {
        /// Listen address (host:port).
        #[arg(long, env = "AGENTIC_STREAM_ADDR", default_value = "127.0.0.1:3100")]
        addr: String,

        /// Path of the MCP endpoint.
        #[arg(long, default_value = "/mcp")]
        endpoint: String,

        /// Bearer token for authentication.
        /// Also reads from AGENTIC_TOKEN env var.
        #[arg(long)]
        token: Option<String>,

        /// Do not issue or require Mcp-Session-Id.
        #[arg(long)]
        stateless: bool,

        /// Answer every POST carrying requests over SSE instead of JSON.
        #[arg(long)]
        sse_responses: bool,

        /// Reject GET streams with 405.
        #[arg(long)]
        no_get_stream: bool,

        /// Events retained per stream for replay.
        #[arg(long, default_value_t = 256)]
        buffer: usize,

        /// Idle seconds before a session expires.
        #[arg(long, default_value_t = 1800)]
        session_ttl: u64,

        /// Seconds to wait for the client to answer a server request.
        #[arg(long, default_value_t = 60)]
        call_timeout: u64,

        /// Close GET streams after this many seconds without an event.
        #[arg(long)]
        idle_timeout: Option<u64>,

        /// Seconds between SSE keep-alive comments.
        #[arg(long, default_value_t = 15)]
        keep_alive: u64,

        /// Extra Origin allowed to call the endpoint (repeatable, `*` for any).
        #[arg(long = "allow-origin")]
        allowed_origins: Vec<String>,
    },

    /// Print server capabilities as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   agentic-stream-mcp completions bash > ~/.local/share/bash-completion/completions/agentic-stream-mcp
    ///   agentic-stream-mcp completions zsh > ~/.zfunc/_agentic-stream-mcp
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Serve { call_timeout: 60 }) {
        Commands::Serve { call_timeout } => {
            let dispatcher = MethodRegistry::dispatcher()?;
            let transport = StdioTransport::new(dispatcher)
                .with_call_timeout(Duration::from_secs(call_timeout));
            transport.run().await?;
        }

        #[cfg(feature = "http")]
        Commands::ServeHttp {
            addr,
            endpoint,
            token,
            stateless,
            sse_responses,
            no_get_stream,
            buffer,
            session_ttl,
            call_timeout,
            idle_timeout,
            keep_alive,
            allowed_origins,
        } => {
            use agentic_stream_mcp::config::resolve_token;
            use agentic_stream_mcp::transport::HttpTransport;
            use tokio_util::sync::CancellationToken;

            let config = ServerConfig {
                addr,
                endpoint,
                stateful: !stateless,
                json_response: !sse_responses,
                enable_get_stream: !no_get_stream,
                event_buffer_capacity: buffer,
                session_ttl: Duration::from_secs(session_ttl),
                pending_call_timeout: Duration::from_secs(call_timeout),
                stream_idle_timeout: idle_timeout.map(Duration::from_secs),
                keep_alive_interval: Duration::from_secs(keep_alive),
                allowed_origins,
                // CLI flag > env var
                token: resolve_token(token.as_deref()),
                ..ServerConfig::default()
            };
            config.validate()?;

            tracing::info!("AgenticStream MCP server");
            if config.token.is_some() {
                tracing::info!("Auth: bearer token required");
            }
            if !config.stateful {
                tracing::info!("Stateless mode: sessions disabled");
            }

            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received Ctrl-C");
                }
                signal.cancel();
            });

            let transport = HttpTransport::new(config, MethodRegistry::dispatcher()?);
            transport.run(shutdown).await?;
        }

        Commands::Info => {
            let dispatcher = MethodRegistry::dispatcher()?;
            let capabilities = agentic_stream_mcp::types::InitializeResult::new(
                agentic_stream_mcp::types::MCP_VERSION,
                &dispatcher.methods(),
                None,
            );
            let methods = MethodRegistry::list_methods();
            let info = serde_json::json!({
                "server": capabilities.server_info,
                "protocol_version": capabilities.protocol_version,
                "supported_versions": agentic_stream_mcp::types::SUPPORTED_VERSIONS,
                "capabilities": capabilities.capabilities,
                "methods": methods,
                "method_count": methods.len(),
                "defaults": ServerConfig::default(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(
                shell,
                &mut cmd,
                "agentic-stream-mcp",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}
