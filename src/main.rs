//! Stratus CLI - declarative stack runner

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;

use stratus::engine::create_engine;
use stratus::error::{FixSuggestion, StratusError};
use stratus::{stack, Deployment, StackConfig};

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Stratus - declarative infrastructure stack runner")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the stack and print resolved exports
    Up {
        /// Path to a flat YAML config file
        #[arg(short, long)]
        config: Option<String>,

        /// Override a config entry (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Provisioning engine to use
        #[arg(short, long, default_value = "sim")]
        engine: String,

        /// Seconds to wait for exports to settle
        #[arg(short, long, default_value_t = 300)]
        timeout: u64,
    },

    /// Check required config keys without provisioning
    Validate {
        /// Path to a flat YAML config file
        #[arg(short, long)]
        config: Option<String>,

        /// Override a config entry (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Up {
            config,
            set,
            engine,
            timeout,
        } => up(config, &set, &engine, timeout).await,
        Commands::Validate { config, set } => validate(config, &set),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn load_config(path: Option<String>, overrides: &[String]) -> Result<StackConfig, StratusError> {
    let mut config = match path {
        Some(p) => StackConfig::from_file(p)?,
        None => StackConfig::new(),
    };
    config.apply_overrides(overrides)?;
    Ok(config)
}

async fn up(
    path: Option<String>,
    overrides: &[String],
    engine_name: &str,
    timeout_secs: u64,
) -> Result<(), StratusError> {
    let config = load_config(path, overrides)?;
    stack::validate_config(&config)?;

    let engine = create_engine(engine_name)?;
    println!(
        "{} Using engine: {} | stack: {}",
        "→".cyan(),
        engine.name().cyan().bold(),
        stack::STACK_NAME.cyan()
    );

    let deployment = Deployment::new(Arc::from(engine));
    stack::build_aks_stack(&deployment, &config)?;

    let outputs = deployment.finish(Duration::from_secs(timeout_secs)).await?;

    if !outputs.is_empty() {
        println!("{}", "Outputs:".cyan().bold());
        for (key, value) in outputs {
            println!("  {} = {}", key.bold(), value);
        }
    }

    Ok(())
}

fn validate(path: Option<String>, overrides: &[String]) -> Result<(), StratusError> {
    let config = load_config(path, overrides)?;
    stack::validate_config(&config)?;

    println!("{} Config is valid", "✓".green());
    for key in stack::REQUIRED_KEYS {
        println!("  {}: {}", key, config.get(key).unwrap_or("(unset)"));
    }

    Ok(())
}
