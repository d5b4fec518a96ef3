use clap::{Parser, Subcommand};
use crm::config::Config;
use pipeline::handler::App;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod api;

#[derive(Parser)]
#[command(
    name = "switchboard",
    about = "Resolves CRM contacts, deals and owners for a phone number"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the resolver over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
    /// Run one resolution pass for a local event payload and print the
    /// response body
    Invoke {
        /// Path to a JSON event file; a built-in sample event is used
        /// when absent
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let default_level = if std::env::var("CRM_DEBUG").is_ok_and(|v| v == "1" || v == "true") {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let app = App::new(config);

    let result = match cli.command {
        Command::Serve { host, port } => api::serve(app, &host, port).await,
        Command::Invoke { file } => invoke(app, file).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn invoke(app: App, file: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let event: Value = match file {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => sample_event(),
    };

    let reply = app.handle(event).await;
    println!("{}", serde_json::to_string_pretty(&reply.body)?);

    if reply.status.is_success() {
        Ok(())
    } else {
        Err(format!("handler returned {}", reply.status).into())
    }
}

fn sample_event() -> Value {
    json!({"body": r#"{"contact":{"phone":"11984196634"}}"#})
}
