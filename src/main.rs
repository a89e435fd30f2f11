use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use downlevel_native::{
    bundle_package, bundle_root, rewrite_tree, Config, Dialect, DEFAULT_EXTENSIONS,
};

#[derive(Parser)]
#[command(name = "downlevel")]
#[command(version)]
#[command(about = "Down-levels PHP 5.3 sources to PHP 5.2 and bundles them into one file", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite every source file under a directory in place
    Convert {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// JSON configuration file
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Keep namespaces and closures
        #[arg(long)]
        native: bool,

        /// Do not prefix flattened class names
        #[arg(long)]
        no_prefix: bool,

        /// File extensions to rewrite
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<String>,

        /// Directory names to skip
        #[arg(long = "exclude", value_name = "NAME")]
        excluded: Vec<String>,
    },

    /// Bundle everything reachable from one entry file
    Bundle {
        #[arg(value_name = "ROOT")]
        root: PathBuf,

        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Emit no namespace blocks
        #[arg(long)]
        legacy: bool,
    },

    /// Bundle a whole package around its loader
    Package {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        /// JSON array of files in load order
        #[arg(long, value_name = "LIST")]
        files: PathBuf,

        /// Files appended after the loader, relative to DIR
        #[arg(long, value_name = "FILE", default_value = "Diagnostics/shortcuts.php")]
        epilogue: Vec<PathBuf>,

        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        #[arg(long)]
        legacy: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None => Ok(Config::default()),
    }
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("cannot write {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            dir,
            config,
            native,
            no_prefix,
            extensions,
            excluded,
        } => {
            let mut config = load_config(config.as_deref())?;
            if native {
                config.rewrite.dialect = Dialect::Native;
            }
            if no_prefix {
                config.rewrite.prefixed = false;
            }
            let extensions = if extensions.is_empty() {
                DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
            } else {
                extensions
            };

            let report = rewrite_tree(&dir, &extensions, &excluded, &config.rewrite)?;
            println!(
                "{} written, {} deleted, {} unchanged",
                report.written.len(),
                report.deleted.len(),
                report.unchanged
            );
        }

        Commands::Bundle {
            root,
            output,
            config,
            legacy,
        } => {
            let mut config = load_config(config.as_deref())?;
            if legacy {
                config.bundle.use_namespaces = false;
            }
            let content = bundle_root(&root, &config.bundle)?;
            write_output(&output, &content)?;
            log::info!("[Downlevel] wrote {}", output.display());
        }

        Commands::Package {
            dir,
            output,
            files,
            epilogue,
            config,
            legacy,
        } => {
            let mut config = load_config(config.as_deref())?;
            if legacy {
                config.bundle.use_namespaces = false;
            }
            let list = fs::read_to_string(&files)
                .with_context(|| format!("cannot read {}", files.display()))?;
            let order: Vec<PathBuf> = serde_json::from_str(&list)
                .with_context(|| format!("{} is not a JSON array of paths", files.display()))?;
            if order.is_empty() {
                anyhow::bail!("{} lists no files", files.display());
            }
            let order: Vec<PathBuf> = order.into_iter().map(|f| dir.join(f)).collect();
            let epilogue: Vec<PathBuf> = epilogue.into_iter().map(|f| dir.join(f)).collect();

            let content = bundle_package(&dir.join("loader.php"), &order, &epilogue, &config.bundle)?;
            write_output(&output, &content)?;
            log::info!("[Downlevel] wrote {}", output.display());
        }
    }

    Ok(())
}
