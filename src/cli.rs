// CLI interface for pyscout using clap
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bootstrap::{open_store, Discovery};
use crate::config::DiscoveryConfig;
use crate::environment::EnvSource;
use crate::error::{exit_codes, CliError, Result, ScoutError};
use crate::events::EnvChangeEvent;
use crate::legacy::{GetInterpretersOptions, PythonInterpreter};
use crate::locators::PythonLocatorQuery;

#[derive(Parser)]
#[command(
    name = "pyscout",
    about = "pyscout - Find and describe the Python environments on this machine",
    version = crate::VERSION,
    long_about = "pyscout discovers Python interpreters from conda, pyenv, virtual environment folders, \
                  workspace folders, PATH and the Windows registry, and resolves their version and prefix."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Control color output (auto, always, never)
    #[arg(long, global = true, value_name = "WHEN")]
    pub color: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List discovered interpreters
    List {
        /// Workspace folder to search for local environments
        #[arg(long = "root", value_name = "DIR")]
        roots: Vec<PathBuf>,

        /// Only report interpreters found by these locators
        #[arg(long = "source", value_name = "SOURCE")]
        sources: Vec<EnvSource>,

        /// Scope discovery to the workspace folder containing this path
        #[arg(long, value_name = "PATH")]
        resource: Option<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Resolve a single interpreter
    Resolve {
        /// Path to a Python executable
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print environment change events until interrupted
    Watch {
        /// Workspace folder to watch for local environments
        #[arg(long = "root", value_name = "DIR")]
        roots: Vec<PathBuf>,
    },

    /// Inspect or clear the interpreter cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Generate shell completion scripts
    GenerateCompletion {
        /// Shell to generate completion for
        shell: Shell,
    },
}

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheAction {
    /// Remove every cached entry
    Clear,
    /// Show where the cache lives and how many entries it holds
    Info,
}

impl Cli {
    pub fn run(&self) -> Result<i32> {
        self.init_logging();

        if self.verbose && self.quiet {
            return Err(ScoutError::Cli(Box::new(CliError::ConflictingArguments {
                first: "--verbose".to_string(),
                second: "--quiet".to_string(),
                suggestion: "Use either --verbose for more output or --quiet for less output, but not both".to_string(),
            })));
        }

        if let Commands::GenerateCompletion { shell } = &self.command {
            let mut cmd = Self::command();
            let name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, name, &mut std::io::stdout());
            return Ok(exit_codes::SUCCESS);
        }

        let config = DiscoveryConfig::load(self.config.as_deref())?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        match &self.command {
            Commands::List {
                roots,
                sources,
                resource,
                json,
            } => runtime.block_on(list(config, roots, sources, resource.as_deref(), *json)),
            Commands::Resolve { path, json } => runtime.block_on(resolve(config, path, *json)),
            Commands::Watch { roots } => runtime.block_on(watch(config, roots)),
            Commands::Cache { action } => cache(&config, *action),
            Commands::GenerateCompletion { .. } => Ok(exit_codes::SUCCESS),
        }
    }

    fn init_logging(&self) {
        use crate::logging::{init_logging, LogConfig};

        let log_config = LogConfig::from_cli(self.verbose, self.quiet, self.color.clone());

        if let Err(e) = init_logging(log_config) {
            eprintln!("Failed to initialize logging: {e}");
        }
    }
}

fn absolute_roots(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let cwd = std::env::current_dir()?;
    Ok(roots
        .iter()
        .map(|root| if root.is_absolute() { root.clone() } else { cwd.join(root) })
        .collect())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn print_interpreter(interpreter: &PythonInterpreter) {
    println!("{}", interpreter.display_name);
    println!("  path:    {}", interpreter.path.display());
    println!("  type:    {}", interpreter.env_type);
    if let Some(version) = &interpreter.version {
        println!("  version: {version}");
    }
    if let Some(prefix) = &interpreter.sys_prefix {
        println!("  prefix:  {}", prefix.display());
    }
}

async fn list(
    config: DiscoveryConfig,
    roots: &[PathBuf],
    sources: &[EnvSource],
    resource: Option<&Path>,
    json: bool,
) -> Result<i32> {
    let discovery = Discovery::new(config, absolute_roots(roots)?)?;
    let resource = match resource {
        Some(resource) => Some(absolute_roots(&[resource.to_path_buf()])?.remove(0)),
        None => None,
    };
    let source_filter = (!sources.is_empty()).then_some(sources);

    let interpreters = discovery
        .adapter()
        .get_interpreters(resource.as_deref(), GetInterpretersOptions::default(), source_filter)
        .await;
    discovery.dispose();

    if json {
        print_json(&interpreters)?;
    } else if interpreters.is_empty() {
        println!("No Python interpreters found");
    } else {
        for interpreter in &interpreters {
            print_interpreter(interpreter);
        }
    }
    Ok(exit_codes::SUCCESS)
}

async fn resolve(config: DiscoveryConfig, path: &Path, json: bool) -> Result<i32> {
    let path = absolute_roots(&[path.to_path_buf()])?.remove(0);
    let discovery = Discovery::new(config, Vec::new())?;
    let resolved = discovery.adapter().get_interpreter_details(&path).await;
    discovery.dispose();

    match resolved? {
        Some(interpreter) if json => {
            print_json(&interpreter)?;
            Ok(exit_codes::SUCCESS)
        }
        Some(interpreter) => {
            print_interpreter(&interpreter);
            Ok(exit_codes::SUCCESS)
        }
        None => {
            eprintln!("{} is not a usable Python interpreter", path.display());
            Ok(exit_codes::NOT_FOUND)
        }
    }
}

async fn watch(config: DiscoveryConfig, roots: &[PathBuf]) -> Result<i32> {
    let discovery = Discovery::new(config, absolute_roots(roots)?)?;

    // Populate the locators first so their watches cover what already exists
    let envs = discovery
        .composite()
        .get_envs(&PythonLocatorQuery::all())
        .await;
    eprintln!("Watching {} known environments, press Ctrl-C to stop", envs.len());

    let subscription = discovery.composite().on_changed(Arc::new(|event: &EnvChangeEvent| {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(_) => println!("{event}"),
        }
    }));

    tokio::signal::ctrl_c().await?;
    subscription.unsubscribe();
    discovery.dispose();
    Ok(exit_codes::SUCCESS)
}

fn cache(config: &DiscoveryConfig, action: CacheAction) -> Result<i32> {
    let store = open_store(config)?;
    let location = store
        .cache_directory()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|| "<memory>".to_string());

    match action {
        CacheAction::Clear => {
            let removed = store.clear()?;
            println!("Removed {removed} cached entries from {location}");
        }
        CacheAction::Info => {
            println!("Cache directory: {location}");
            println!("Schema version:  {}", store.schema_version()?);
            println!("Entries:         {}", store.len()?);
        }
    }
    Ok(exit_codes::SUCCESS)
}
