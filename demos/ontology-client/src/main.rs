use anyhow::{Context, Result};
use clap::Parser;
use ontomcp_client::{ClientBuilder, ProcessTransport};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Connect to an ontology server over stdio, print its capabilities, and
/// optionally call one method
#[derive(Parser, Debug)]
#[command(name = "ontology-client", version)]
struct Args {
    /// Run SERVER as a script through this program, e.g. `python3`
    #[arg(long)]
    interpreter: Option<String>,

    /// Path of the server executable or script
    server: String,

    /// Method to call after the handshake
    method: Option<String>,

    /// JSON params for METHOD
    params: Option<String>,
}

impl Args {
    fn params(&self) -> Result<Value> {
        match &self.params {
            Some(raw) => serde_json::from_str(raw).context("PARAMS is not valid JSON"),
            None => Ok(json!({})),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let params = args.params()?;

    let mut transport = ProcessTransport::new(&args.server)?;
    if let Some(interpreter) = &args.interpreter {
        transport = transport.with_interpreter(interpreter);
    }

    info!("Launching ontology server {}", args.server);
    transport.launch().await?;

    let mut client = ClientBuilder::new("ontology-client", env!("CARGO_PKG_VERSION"))
        .with_transport(transport)
        .build();

    let outcome = run(&mut client, args.method.as_deref(), params).await;
    client.exit().await;
    outcome
}

async fn run(
    client: &mut ontomcp_client::Client,
    method: Option<&str>,
    params: Value,
) -> Result<()> {
    client.initialize_connection().await?;
    if let Some(server) = client.server_info() {
        info!("Connected to: {} v{}", server.name, server.version);
    }
    println!("{}", serde_json::to_string_pretty(&client.server_capabilities().to_value())?);

    if let Some(method) = method {
        let result = client.dispatch(method, params).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    if !client.shutdown().await? {
        info!("Server did not acknowledge shutdown");
    }
    Ok(())
}
