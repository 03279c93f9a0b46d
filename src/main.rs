// pg-elevate - Main Entry Point
//
// Command-line front end for the elevation engine:
// - exec: run one privileged command through the adaptive executor
// - detect: report the service's accepted authentication modes
// - enable-auth: reconfigure the service to accept a mode

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pg_elevate::auth::{AuthMode, AuthModeDetector, AuthReconfigurer, ReconfigureOutcome};
use pg_elevate::command::{Command, CommandClass};
use pg_elevate::config::Config;
use pg_elevate::elevation::{terminal_attached, AdaptiveExecutor, StrategyCatalog};
use pg_elevate::logging::LoggingConfig;
use pg_elevate::runner::{BoundedRunner, ExecutionPolicy, ProcessRunner, RunnerConfig};
use pg_elevate::target::ServiceTarget;
use pg_elevate::ElevateError;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// pg-elevate: privileged database administration without guesswork
#[derive(Parser, Debug)]
#[command(name = "pg-elevate")]
#[command(author = "pg-elevate Contributors")]
#[command(version = "0.1.0")]
#[command(
    about = "Run privileged database commands through the least invasive elevation that works",
    long_about = None
)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.config/pg-elevate/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command with adaptive privilege elevation
    Exec {
        /// Shell command to run
        command: String,

        /// Explicit command class for strategy caching
        #[arg(long)]
        class: Option<String>,

        /// Operation label used in error messages
        #[arg(long, default_value = "command")]
        label: String,

        /// Per-attempt timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Attempts per strategy
        #[arg(long)]
        retries: Option<u32>,

        /// Allow an interactive credential prompt as a last resort
        #[arg(long)]
        interactive: bool,
    },
    /// Detect which authentication modes the service accepts
    Detect {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reconfigure the service to accept an authentication mode
    EnableAuth {
        /// Mode to enable (implicit, trusted, password)
        mode: AuthMode,

        /// Apply without asking for confirmation
        #[arg(long)]
        yes: bool,
    },
}

/// Everything the subcommands share, built once from the loaded config
struct Engine {
    config: Config,
    target: ServiceTarget,
    runner: Arc<dyn ProcessRunner>,
    executor: AdaptiveExecutor,
}

impl Engine {
    fn new(config: Config) -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(BoundedRunner::with_config(
            RunnerConfig::with_max_output_size(config.execution.max_output_bytes),
        ));
        let target = ServiceTarget::from_config(&config.service);
        let catalog =
            StrategyCatalog::standard(runner.clone(), &target, config.execution.probe_timeout());
        let executor = AdaptiveExecutor::new(catalog, runner.clone())
            .with_retry_backoff(config.execution.retry_backoff());

        Self {
            config,
            target,
            runner,
            executor,
        }
    }

    fn detector(&self) -> AuthModeDetector {
        AuthModeDetector::new(self.runner.clone(), self.config.execution.probe_timeout())
    }

    fn policy(&self, label: &str, timeout: Option<u64>, retries: Option<u32>) -> Result<ExecutionPolicy> {
        let timeout = timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.execution.timeout());
        let retries = retries.unwrap_or(self.config.execution.max_retries);
        let policy = ExecutionPolicy::new(label, timeout, retries)?;
        Ok(policy.with_interactive_prompt(self.config.execution.allow_interactive))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        if let Some(manual) = e.downcast_ref::<ElevateError>().and_then(|e| e.remediation()) {
            eprintln!("To run it manually: {}", manual);
        }
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = match args.config {
        Some(ref path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    LoggingConfig::from_section(&config.logging, args.verbose).init()?;

    let mut engine = Engine::new(config);

    match args.command {
        Some(Commands::Exec {
            command,
            class,
            label,
            timeout,
            retries,
            interactive,
        }) => {
            let mut policy = engine.policy(&label, timeout, retries)?;
            if interactive {
                policy = policy.with_interactive_prompt(true);
            }
            exec(&mut engine, command, class, &policy).await?;
        }
        Some(Commands::Detect { json }) => {
            detect(&engine, json).await?;
        }
        Some(Commands::EnableAuth { mode, yes }) => {
            enable_auth(&mut engine, mode, yes).await?;
        }
        None => {
            info!("No command specified. Use \"pg-elevate --help\" for usage.");
        }
    }

    Ok(())
}

async fn exec(
    engine: &mut Engine,
    text: String,
    class: Option<String>,
    policy: &ExecutionPolicy,
) -> Result<()> {
    let command = match class {
        Some(class) => Command::with_class(text, CommandClass::new(class)),
        None => Command::new(text),
    };

    let result = engine.executor.execute(&command, policy).await?;
    info!("{}: {}", policy.operation_label(), result.summary());

    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    std::io::stdout().flush().context("Failed to flush stdout")?;
    Ok(())
}

async fn detect(engine: &Engine, json: bool) -> Result<()> {
    let snapshot = engine.detector().detect(&engine.target).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let yes_no = |b: bool| if b { "yes" } else { "no" };
    println!("Service account: {}", engine.target.account);
    match snapshot.config_path {
        Some(ref path) if snapshot.config_readable => println!("Access config:   {}", path.display()),
        Some(ref path) => println!("Access config:   {} (unreadable, probe only)", path.display()),
        None => println!("Access config:   not found (probe only)"),
    }
    println!("Implicit:        {}", yes_no(snapshot.supports_implicit));
    println!("Trusted:         {}", yes_no(snapshot.supports_trusted));
    println!("Password:        {}", yes_no(snapshot.supports_password));
    if snapshot.password_only() {
        println!(
            "\nOnly password access is available. Run `pg-elevate enable-auth implicit` to allow passwordless administration."
        );
    }
    Ok(())
}

async fn enable_auth(engine: &mut Engine, mode: AuthMode, yes: bool) -> Result<()> {
    let detector = engine.detector();
    let policy = engine.policy("reconfigure authentication", None, None)?;
    let reconfigurer = AuthReconfigurer::new(detector, policy);

    let plan = reconfigurer
        .plan(&mut engine.executor, &engine.target, mode)
        .await?;
    println!("{}", plan);

    let confirmed = yes || (terminal_attached() && confirm("Apply this change and restart the service?")?);
    match reconfigurer
        .apply(&mut engine.executor, &engine.target, &plan, confirmed)
        .await?
    {
        ReconfigureOutcome::AlreadyEnabled => {
            println!("The service already accepts {} access; nothing changed.", mode);
        }
        ReconfigureOutcome::Applied { backup } => {
            println!(
                "Enabled {} access. Previous file saved at {}",
                mode,
                backup.display()
            );
        }
    }
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
