use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use swaggo_oas3::config::Config;
use swaggo_oas3::generator::Generator;
use swaggo_oas3::models::ParsedApiInfo;
use swaggo_oas3::parser::GoParser;

/// Generate OpenAPI 3 documents from Go handler comments and struct declarations
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate the OpenAPI document
    Init {
        /// Root of the Go module to scan
        #[arg(short = 'd', long, default_value = "./")]
        module_path: PathBuf,

        /// Only parse handlers below this path (absolute or relative to the module)
        #[arg(long)]
        handler_path: Option<PathBuf>,

        /// Go file path in which 'general API Info' is written
        #[arg(short = 'g', long)]
        main_file: Option<PathBuf>,

        /// Output file
        #[arg(short, long, default_value = "./oas.json")]
        output: PathBuf,

        /// Write YAML instead of JSON
        #[arg(long)]
        yaml: bool,

        /// Keep only operations carrying this tag
        #[arg(long)]
        filter_tag: Option<String>,

        /// Name schemas by type name only, without the package prefix
        #[arg(long)]
        schema_without_pkg: bool,

        /// Stop at the first invalid declaration instead of skipping it
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env = Env::default().filter_or("RUST_LOG", if cli.verbose { "debug" } else { "info" });
    env_logger::init_from_env(env);

    debug!("Starting swaggo-oas3...");

    match cli.command {
        Commands::Init {
            module_path,
            handler_path,
            main_file,
            output,
            yaml,
            filter_tag,
            schema_without_pkg,
            strict,
        } => {
            info!("Generating OpenAPI document for {:?}", module_path);

            let mut config = Config::new(&module_path)
                .with_schema_without_pkg(schema_without_pkg)
                .with_strict(strict);
            if let Some(handler_path) = handler_path {
                config = config.with_handler_path(handler_path);
            }
            if let Some(filter_tag) = filter_tag {
                config = config.with_filter_tag(filter_tag);
            }
            debug!("Config: {:?}", config);

            let parser = GoParser::new(config)?;

            let api_info = match main_file.or_else(|| find_general_api_info_file(&module_path)) {
                Some(path) => {
                    debug!("General info file: {:?}", path);
                    parser.parse_general_api_info(&path)?
                }
                None => {
                    warn!("No general API info file found, document info will be empty");
                    ParsedApiInfo::default()
                }
            };

            let openapi = parser.build(api_info)?;
            Generator::write(&openapi, &output, yaml)?;

            info!("OpenAPI document generated successfully");
        }
    }

    Ok(())
}

/// Finds a main.go below the module root
fn find_general_api_info_file(module_path: &Path) -> Option<PathBuf> {
    WalkDir::new(module_path)
        .max_depth(3)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == "main.go")
        .map(|e| {
            debug!("Found potential general API info file: {:?}", e.path());
            e.into_path()
        })
}
