//! FocusGate CLI
//!
//! CLI tool for inspecting and editing FocusGate configurations and for
//! replaying browser sessions against the decision engine.

mod config;
mod session;
mod watch;

use std::fs;

use clap::{Parser, Subcommand, ValueEnum};

use fg_core::url::format_url;
use fg_core::{AccessState, Category, Engine, EngineConfig, Mode};

use crate::config::{load_or_default, JsonFileSource};
use crate::session::{parse_scenario, run_scenario};
use crate::watch::{run_watch, WatchOptions};

#[derive(Parser)]
#[command(name = "fg-cli")]
#[command(about = "FocusGate configuration and simulation tools")]
struct Cli {
    /// Config file in the `chrome.storage.sync` layout
    #[arg(short, long, global = true, default_value = "focusgate.json")]
    config: String,

    /// Extension origin used for interstitial URLs
    #[arg(long, global = true, default_value = "chrome-extension://focusgate/")]
    origin: String,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum CategoryArg {
    Fun,
    FunAndWork,
    SocialMedia,
}

impl From<CategoryArg> for Category {
    fn from(value: CategoryArg) -> Self {
        match value {
            CategoryArg::Fun => Category::Fun,
            CategoryArg::FunAndWork => Category::FunAndWork,
            CategoryArg::SocialMedia => Category::SocialMedia,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Work,
    Fun,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Work => Mode::Work,
            ModeArg::Fun => Mode::Fun,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the category and decision for URLs
    Classify {
        /// URLs to classify
        #[arg(required = true)]
        urls: Vec<String>,

        /// Override the configured mode
        #[arg(short, long)]
        mode: Option<ModeArg>,
    },

    /// Check a config for malformed sites and overlapping lists
    Validate,

    /// Add a site to a category list
    Add {
        #[arg(value_enum)]
        category: CategoryArg,

        /// Site, with or without scheme
        site: String,
    },

    /// Remove a site from a category list
    Remove {
        #[arg(value_enum)]
        category: CategoryArg,

        site: String,
    },

    /// Replay a scenario of timed browser events
    Simulate {
        /// Scenario file (JSON array or one event per line)
        #[arg(short, long)]
        input: String,
    },

    /// Read browser events from stdin and run the timers live
    Watch,

    /// Write TypeScript bindings for the message protocol
    #[cfg(feature = "ts")]
    ExportTypes {
        /// Output directory
        #[arg(short, long, default_value = "bindings")]
        output: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let source = JsonFileSource::new(&cli.config);
    let result = match cli.command {
        Commands::Classify { urls, mode } => cmd_classify(&source, &cli.origin, &urls, mode.map(Into::into)),
        Commands::Validate => cmd_validate(&source),
        Commands::Add { category, site } => cmd_add(&source, category.into(), &site),
        Commands::Remove { category, site } => cmd_remove(&source, category.into(), &site),
        Commands::Simulate { input } => cmd_simulate(&source, &cli.origin, &input),
        Commands::Watch => cmd_watch(source, &cli.origin),
        #[cfg(feature = "ts")]
        Commands::ExportTypes { output } => cmd_export_types(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn build_engine(source: &JsonFileSource, origin: &str) -> Result<Engine, String> {
    let stored = load_or_default(source)?;
    Ok(Engine::new(EngineConfig::for_extension(origin), stored))
}

fn cmd_classify(source: &JsonFileSource, origin: &str, urls: &[String], mode: Option<Mode>) -> Result<(), String> {
    let mut engine = build_engine(source, origin)?;
    if let Some(mode) = mode {
        engine.set_mode(mode);
    }

    println!("Mode: {:?}", engine.mode());
    for url in urls {
        let (state, category) = engine.evaluate(url, 0);
        let decision = match state {
            AccessState::Unclassified => "pass",
            AccessState::Allowed => "allowed",
            AccessState::Blocked => "interstitial",
        };
        println!(
            "  {:<12} {:<13} {}",
            category.map(|c| c.as_str()).unwrap_or("-"),
            decision,
            url
        );
    }
    Ok(())
}

fn cmd_validate(source: &JsonFileSource) -> Result<(), String> {
    let config = source.load_config()?;
    let categories = &config.website_categories;
    let mut problems = 0usize;

    println!("Config '{}'", source.path().display());
    for category in Category::PRECEDENCE {
        let list = categories.list(category);
        println!("  {:<12} {} sites", category.as_str(), list.len());
        for site in list {
            if format_url(&site.url).is_none() {
                println!("    malformed: {}", site.url);
                problems += 1;
            }
        }
    }

    let overlaps = categories.overlaps();
    for (domain, lists) in &overlaps {
        let names: Vec<&str> = lists.iter().map(|c| c.as_str()).collect();
        println!("  overlap: {} in {} (first wins: {})", domain, names.join(", "), names[0]);
    }
    problems += overlaps.len();

    let settings = &config.category_settings;
    println!("Settings (wait s / access min / max videos):");
    for (name, profile) in [
        ("fun", &settings.fun),
        ("funAndWork.fun", &settings.fun_and_work.fun),
        ("funAndWork.work", &settings.fun_and_work.work),
        ("socialMedia", &settings.social_media),
    ] {
        println!(
            "  {:<16} {:>3} / {:>3} / {:>3} ({:?})",
            name, profile.wait_time, profile.access_duration, profile.max_video_changes, profile.default_limit_type
        );
    }

    if problems > 0 {
        return Err(format!("{} problem(s) found", problems));
    }
    println!("OK");
    Ok(())
}

fn cmd_add(source: &JsonFileSource, category: Category, site: &str) -> Result<(), String> {
    let mut config = load_or_default(source)?;
    let stored = config
        .website_categories
        .add(category, site)
        .map_err(|e| e.to_string())?;
    source.save(&config)?;
    println!("Added {} to {}", stored, category);
    Ok(())
}

fn cmd_remove(source: &JsonFileSource, category: Category, site: &str) -> Result<(), String> {
    let mut config = source.load_config()?;
    if !config.website_categories.remove(category, site) {
        return Err(format!("'{}' is not in {}", site, category));
    }
    source.save(&config)?;
    println!("Removed {} from {}", site, category);
    Ok(())
}

fn cmd_simulate(source: &JsonFileSource, origin: &str, input: &str) -> Result<(), String> {
    let text = fs::read_to_string(input).map_err(|e| format!("Failed to read '{}': {}", input, e))?;
    let events = parse_scenario(&text)?;
    let engine = build_engine(source, origin)?;

    println!("Replaying {} events", events.len());
    for line in run_scenario(engine, events, source) {
        println!("{}", line);
    }
    Ok(())
}

fn cmd_watch(source: JsonFileSource, origin: &str) -> Result<(), String> {
    let engine = build_engine(&source, origin)?;
    run_watch(WatchOptions { source, engine })
}

#[cfg(feature = "ts")]
fn cmd_export_types(output: &str) -> Result<(), String> {
    use fg_core::message::{AllowanceStatus, Message, Response};
    use fg_core::CategorySettings;
    use ts_rs::TS;

    fs::create_dir_all(output).map_err(|e| format!("Failed to create '{}': {}", output, e))?;
    Message::export_all_to(output).map_err(|e| e.to_string())?;
    Response::export_all_to(output).map_err(|e| e.to_string())?;
    AllowanceStatus::export_all_to(output).map_err(|e| e.to_string())?;
    CategorySettings::export_all_to(output).map_err(|e| e.to_string())?;
    println!("Wrote TypeScript bindings to '{}'", output);
    Ok(())
}
