use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand};
use wikimirror_core::config::load_config;
use wikimirror_core::mirror::{MirrorOptions, run_mirror};
use wikimirror_core::profile::SiteProfile;

#[derive(Debug, Parser)]
#[command(
    name = "wikimirror",
    version,
    about = "Mirror a MediaWiki site as browsable offline HTML"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        default_value = "wikimirror.toml"
    )]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Fetch changed pages and images into the output directory")]
    Sync(SyncArgs),
    #[command(about = "List the languages the wiki profile knows about")]
    Langs,
    #[command(about = "List the namespaces the wiki profile knows about")]
    Namespaces,
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(long, value_name = "PATH", help = "Where the mirror tree is written")]
    output_dir: Option<PathBuf>,
    #[arg(long, help = "Refetch every page regardless of local timestamps")]
    force: bool,
    #[arg(long, help = "Delete local files the remote no longer has")]
    clean: bool,
    #[arg(long, help = "Hash non-ASCII titles into ASCII filenames")]
    safe_filenames: bool,
    #[arg(
        long,
        value_name = "SUBTAGS",
        value_delimiter = ',',
        help = "Only mirror these language subtags (e.g. en,es)"
    )]
    langs: Vec<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Sync(args)) => run_sync(&cli.config, args),
        Some(Commands::Langs) => run_langs(&cli.config),
        Some(Commands::Namespaces) => run_namespaces(&cli.config),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_sync(config_path: &Path, args: SyncArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let profile = SiteProfile::from_config(&config);

    let mut options = MirrorOptions::from_config(&config, &profile);
    if let Some(output_dir) = args.output_dir {
        options.output_dir = output_dir;
    }
    if args.force {
        // a future epoch makes every local file look stale
        options.epoch = Utc::now();
    }
    if args.clean {
        options.clean = true;
    }
    if args.safe_filenames {
        options.safe_filenames = true;
    }
    if !args.langs.is_empty() {
        for subtag in &args.langs {
            if profile.language_by_subtag(subtag).is_none() {
                bail!("unknown language subtag: {subtag}");
            }
        }
        options.languages = Some(args.langs);
    }

    let report = run_mirror(&config, &profile, &options)?;

    println!("mirror sync complete");
    println!("output_dir: {}", options.output_dir.display());
    println!("pages_updated: {}", report.updated);
    println!("pages_up_to_date: {}", report.up_to_date);
    println!("pages_skipped: {}", report.skipped);
    println!("stylesheets_updated: {}", report.stylesheets_updated);
    println!("images_updated: {}", report.images_updated);
    println!("images_up_to_date: {}", report.images_up_to_date);
    println!("requests: {}", report.requests);
    if let Some(cleanup) = &report.cleanup {
        println!("removed_files: {}", cleanup.removed_files);
        println!("removed_dirs: {}", cleanup.removed_dirs);
    }
    if !report.failed.is_empty() {
        println!("failed: {}", report.failed.len());
        for title in &report.failed {
            println!("  - {title}");
        }
    }
    Ok(())
}

fn run_langs(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let profile = SiteProfile::from_config(&config);
    for language in &profile.languages {
        println!("{:<8} {} ({})", language.subtag, language.name, language.english);
    }
    Ok(())
}

fn run_namespaces(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let profile = SiteProfile::from_config(&config);
    for namespace in &profile.namespaces {
        println!("{namespace}");
    }
    Ok(())
}
