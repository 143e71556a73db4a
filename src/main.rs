use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use guildkit::application::dependency;
use guildkit::application::events::ListenerTable;
use guildkit::domain::entities::{MessageEvent, PlatformEvent, User};
use guildkit::infrastructure::adapters::console::{ConsoleCatalog, ConsoleParser, ConsoleResponder};
use guildkit::infrastructure::config::Config;
use guildkit::modules::CoreModule;
use guildkit::ModuleHost;

#[derive(Parser)]
#[command(name = "guildkit")]
#[command(about = "Module orchestration runtime for guild-based chat bots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Module directory (overrides config)
    #[arg(short, long)]
    modules: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load all modules and run the console bot
    Run {
        /// Guild the console user acts in
        #[arg(short, long, default_value = "console-guild")]
        guild: String,
    },
    /// Discover modules and print the load order without loading them
    Check,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { guild } => {
            let config = load_config(&cli.config, cli.modules);
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!("Failed to start runtime: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            rt.block_on(run_bot(config, guild))
        }
        Commands::Check => check_modules(load_config(&cli.config, cli.modules)),
        Commands::Version => {
            println!("guildkit v{}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Commands::InitConfig => init_config(),
    }
}

fn load_config(path: &Path, modules_override: Option<PathBuf>) -> Config {
    let mut config = if path.exists() {
        Config::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        Config::default()
    };

    if let Err(e) = config.apply_env(|key| std::env::var(key).ok()) {
        tracing::warn!("Ignoring environment overrides: {}", e);
    }
    if let Some(dir) = modules_override {
        config.modules.directory = dir;
    }
    config
}

fn build_host(config: Config, source: &ListenerTable) -> ModuleHost {
    ModuleHost::builder(config)
        .with_event_source(Arc::new(source.clone()))
        .with_catalog(Arc::new(ConsoleCatalog::new()))
        .with_builtin(CoreModule::default_metadata(), || Box::new(CoreModule::new()))
        .build()
}

async fn run_bot(config: Config, guild: String) -> ExitCode {
    tracing::info!("Starting {}", config.bot.name);

    let events = ListenerTable::new();
    let auto_load = config.modules.auto_load;
    let host = build_host(config, &events);

    if auto_load {
        if let Err(e) = host.load_all().await {
            tracing::error!("Cannot load modules: {}", e);
            return ExitCode::FAILURE;
        }
    }
    host.cron().start();
    events.dispatch(PlatformEvent::Ready).await;

    println!("Type /command key=value, ?command option=partial, or :help");
    let mut parser = ConsoleParser::new(User::new("console").with_username("console")).with_guild(guild);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read input: {}", e);
                break;
            }
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix(':') {
            if !run_console_command(&host, &events, &mut parser, command).await {
                break;
            }
            continue;
        }

        match parser.parse(input) {
            Some(interaction) => {
                let outcome = host
                    .handle_interaction(interaction, Arc::new(ConsoleResponder::printing()))
                    .await;
                tracing::debug!("Interaction finished: {:?}", outcome);
            }
            None => {
                // Plain text becomes a message in the current channel
                let mut message = MessageEvent::new("console", User::new("console"), input);
                message.guild_id = parser.guild_id().map(str::to_string);
                events.dispatch(PlatformEvent::MessageCreate(message)).await;
            }
        }
    }

    host.cron().stop();
    host.unload_all().await;
    tracing::info!("Bye");
    ExitCode::SUCCESS
}

/// Returns false when the loop should stop
async fn run_console_command(
    host: &ModuleHost,
    events: &ListenerTable,
    parser: &mut ConsoleParser,
    command: &str,
) -> bool {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or("");
    let arg = parts.next();
    let guild = parser.guild_id().map(str::to_string);

    let result = match (name, arg) {
        ("quit", _) | ("exit", _) => return false,
        ("help", _) => {
            println!(":modules | :jobs | :commands | :guild <id> | :dm | :ready");
            println!(":load <id> | :unload <id> | :reload <id> | :enable <id> | :disable <id> | :quit");
            Ok(())
        }
        ("modules", _) => {
            for module in host.loaded_modules().await {
                let core = if module.is_core { " (core)" } else { "" };
                println!("  {} v{}{}", module.id, module.version, core);
            }
            for module in host.discover().into_iter().filter(|m| !m.is_valid()) {
                println!("  {} (invalid: {})", module.id, module.error.unwrap_or_default());
            }
            Ok(())
        }
        ("jobs", _) => {
            for job in host.cron().list_jobs() {
                println!("  {} [{}] next {}", job.key, job.schedule, job.next_run.format("%Y-%m-%d %H:%M"));
            }
            Ok(())
        }
        ("commands", _) => {
            println!("  {}", host.commands().command_names().join(", "));
            Ok(())
        }
        ("guild", Some(id)) => {
            parser.set_guild(Some(id.to_string()));
            Ok(())
        }
        ("dm", _) => {
            parser.set_guild(None);
            Ok(())
        }
        ("ready", _) => {
            events.dispatch(PlatformEvent::Ready).await;
            Ok(())
        }
        ("load", Some(id)) => host.load_module(id).await,
        ("unload", Some(id)) => host.unload_module(id).await,
        ("reload", Some(id)) => host.reload_module(id).await,
        ("enable", Some(id)) | ("disable", Some(id)) => match guild {
            Some(guild) if name == "enable" => host.enable_module(id, &guild).await,
            Some(guild) => host.disable_module(id, &guild).await,
            None => {
                println!("Switch to a guild first with :guild <id>");
                Ok(())
            }
        },
        _ => {
            println!("Unknown console command, try :help");
            Ok(())
        }
    };

    if let Err(e) = result {
        println!("Error: {}", e);
    }
    true
}

fn check_modules(config: Config) -> ExitCode {
    let host = build_host(config, &ListenerTable::new());
    let discovered = host.discover();

    let mut valid = Vec::new();
    for module in &discovered {
        match (&module.error, module.metadata()) {
            (None, Some(metadata)) => valid.push(metadata.clone()),
            (error, _) => println!("invalid  {}: {}", module.id, error.as_deref().unwrap_or("unknown")),
        }
    }

    match dependency::resolve(&valid) {
        Ok(resolution) => {
            for (position, id) in resolution.load_order.iter().enumerate() {
                println!("{:>3}. {}", position + 1, id);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("error    {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_config() -> ExitCode {
    match Config::default().to_yaml() {
        Ok(yaml) => {
            println!("{}", yaml);
            println!("\nSave this to config.yaml and adjust as needed.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Failed to render config: {}", e);
            ExitCode::FAILURE
        }
    }
}
