use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use blsh::control_plane::{self, ControlPlane, Credentials, Environment, build_auth_headers};
use blsh::mcp::TransportKind;
use blsh::sandbox::{SandboxClient, clean_terminal_output};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod theme;
mod tui;

use theme::Theme;

const DEFAULT_FILTER: &str = "blsh=info,reqwest=warn,tungstenite=warn";
const DEBUG_FILTER: &str = "blsh=debug,reqwest=warn,tungstenite=warn";

#[derive(Parser)]
#[command(name = "blsh")]
#[command(about = "An interactive shell for Blaxel sandboxes")]
#[command(version)]
struct Cli {
    /// Workspace used when a command does not name one
    #[arg(short = 'w', long = "workspace", env = "BL_WORKSPACE", global = true)]
    default_workspace: Option<String>,
    /// Platform environment (prod or dev)
    #[arg(long = "env", env = "BL_ENV", default_value = "prod", global = true)]
    environment: Environment,
    /// Override the control plane API base URL
    #[arg(long, env = "BL_API_URL", global = true)]
    api_url: Option<String>,
    /// Override the sandbox run base URL
    #[arg(long, env = "BL_RUN_URL", global = true)]
    run_url: Option<String>,
    /// Connect to this sandbox URL instead of asking the control plane
    #[arg(long, global = true)]
    url: Option<String>,
    /// Transport to the sandbox (auto, websocket or http-stream)
    #[arg(long, default_value = "auto", global = true)]
    transport: TransportKind,
    #[arg(long, env = "BL_API_KEY", hide = true, hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, env = "BL_ACCESS_TOKEN", hide = true, hide_env_values = true)]
    access_token: Option<String>,
    #[arg(long, env = "BL_CLIENT_CREDENTIALS", hide = true, hide_env_values = true)]
    client_credentials: Option<String>,
    /// Write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Workspace name
    #[arg(value_name = "WORKSPACE")]
    workspace: String,
    /// Sandbox name
    #[arg(value_name = "SANDBOX")]
    sandbox: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive shell in a sandbox
    Shell {
        #[command(flatten)]
        target: Target,
    },
    /// Connect to a resource in the configured workspace
    Connect {
        #[command(subcommand)]
        resource: ConnectCommands,
    },
    /// List the tools a sandbox exposes
    Tools {
        #[command(flatten)]
        target: Target,
    },
    /// Run one command in a sandbox and print its output
    Exec {
        #[command(flatten)]
        target: Target,
        /// Command to execute
        command: String,
        /// Working directory inside the sandbox
        #[arg(long, default_value = "/")]
        cwd: String,
    },
    /// List a directory in a sandbox
    Ls {
        #[command(flatten)]
        target: Target,
        /// Directory to list
        #[arg(default_value = "/")]
        path: String,
    },
}

#[derive(Subcommand)]
enum ConnectCommands {
    /// Open an interactive shell in a sandbox
    #[command(visible_alias = "sb")]
    Sandbox {
        /// Sandbox name
        name: String,
    },
}

impl Cli {
    fn credentials(&self) -> Credentials {
        Credentials {
            api_key: self.api_key.clone(),
            access_token: self.access_token.clone(),
            client_credentials: self.client_credentials.clone(),
        }
    }

    fn is_interactive(&self) -> bool {
        matches!(
            self.command,
            Commands::Shell { .. } | Commands::Connect { .. }
        )
    }

    fn control_plane(&self, workspace: &str) -> Result<ControlPlane> {
        let mut control_plane = ControlPlane::new(self.environment, workspace, &self.credentials())?;
        if let Some(url) = &self.api_url {
            control_plane = control_plane.with_api_url(url);
        }
        if let Some(url) = &self.run_url {
            control_plane = control_plane.with_run_url(url);
        }
        Ok(control_plane)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    match &cli.command {
        Commands::Shell { target } => shell_command(&cli, &target.workspace, &target.sandbox).await,
        Commands::Connect {
            resource: ConnectCommands::Sandbox { name },
        } => {
            let Some(workspace) = cli.default_workspace.clone() else {
                bail!("no workspace configured, pass --workspace or set BL_WORKSPACE");
            };
            shell_command(&cli, &workspace, name).await
        }
        Commands::Tools { target } => tools_command(&cli, target).await,
        Commands::Exec {
            target,
            command,
            cwd,
        } => exec_command(&cli, target, command, cwd).await,
        Commands::Ls { target, path } => ls_command(&cli, target, path).await,
    }
}

/// The shell owns the terminal, so it only logs when given a file.
fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            DEBUG_FILTER.into()
        } else {
            DEFAULT_FILTER.into()
        }
    });

    let (writer, ansi) = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None if cli.is_interactive() => (BoxMakeWriter::new(std::io::sink), false),
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .init();
    }
    Ok(())
}

/// Resolves the sandbox URL (unless `--url` is given) and opens the MCP
/// connection with the configured credentials.
async fn connect(cli: &Cli, workspace: &str, sandbox: &str) -> Result<SandboxClient> {
    let credentials = cli.credentials();
    let url = match &cli.url {
        Some(url) => url.clone(),
        None => {
            let control_plane = cli.control_plane(workspace)?;
            match control_plane.resolve_sandbox_url(sandbox).await {
                Ok(url) => url,
                Err(control_plane::Error::SandboxNotFound { name, available }) => {
                    eprintln!("✗ Sandbox '{}' not found in workspace '{}'", name, workspace);
                    if available.is_empty() {
                        eprintln!("  No sandboxes found in this workspace");
                    } else {
                        eprintln!("  Available sandboxes:");
                        for name in &available {
                            eprintln!("    - {}", name);
                        }
                    }
                    eprintln!("  Create one at: {}", control_plane.console_url());
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    info!(workspace, sandbox, %url, transport = %cli.transport, "connecting");
    let client = SandboxClient::connect(
        workspace,
        sandbox,
        &url,
        build_auth_headers(&credentials),
        cli.transport,
    )
    .await?;
    Ok(client)
}

async fn shell_command(cli: &Cli, workspace: &str, sandbox: &str) -> Result<()> {
    println!("Connecting to sandbox {}/{}...", workspace, sandbox);
    let client = Arc::new(connect(cli, workspace, sandbox).await?);
    let theme = if std::env::var_os("NO_COLOR").is_some() {
        Theme::plain()
    } else {
        Theme::default()
    };
    tui::run_shell(client, theme).await
}

async fn tools_command(cli: &Cli, target: &Target) -> Result<()> {
    let client = connect(cli, &target.workspace, &target.sandbox).await?;
    let tools = client.list_tools().await;
    close(&client).await;
    let tools = tools?;

    if tools.is_empty() {
        println!("No tools found");
        return Ok(());
    }
    println!("{:<28} {}", "NAME", "DESCRIPTION");
    println!("{}", "-".repeat(80));
    for tool in tools {
        let description = tool.description.unwrap_or_default();
        let description = description.lines().next().unwrap_or("");
        println!("{:<28} {}", tool.name, description);
    }
    Ok(())
}

async fn exec_command(cli: &Cli, target: &Target, command: &str, cwd: &str) -> Result<()> {
    let client = connect(cli, &target.workspace, &target.sandbox).await?;
    let name = format!("blsh-{}", &Uuid::new_v4().simple().to_string()[..8]);
    let response = client.execute_command(command, &name, cwd).await;
    close(&client).await;

    match response {
        Ok(response) => {
            let logs = clean_terminal_output(&response.logs);
            if !logs.is_empty() {
                println!("{}", logs);
            }
            if let Some(code) = response.exit_code.filter(|code| *code != 0) {
                eprintln!("Command failed with exit code: {}", code);
                std::process::exit(i32::try_from(code).unwrap_or(1));
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    }
}

async fn ls_command(cli: &Cli, target: &Target, path: &str) -> Result<()> {
    let client = connect(cli, &target.workspace, &target.sandbox).await?;
    let listing = client.list_directory(path).await;
    close(&client).await;
    let listing = listing?;

    println!("{}", listing.path);
    let mut subdirectories = listing.subdirectories;
    subdirectories.sort_by(|a, b| a.name.cmp(&b.name));
    for dir in subdirectories {
        println!("  {:>10}  {}/", "-", dir.name);
    }
    let mut files = listing.files;
    files.sort_by(|a, b| a.name.cmp(&b.name));
    for file in files {
        println!("  {:>10}  {}", file.size, file.name);
    }
    Ok(())
}

async fn close(client: &SandboxClient) {
    if let Err(e) = client.close().await {
        warn!(error = %e, "failed to close sandbox connection");
    }
}
