mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tl_core::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "tvloom=trace,tl_server=trace,tl_session=trace,tl_hls=debug,tl_av=debug,tl_core=debug,tower_http=debug".to_string()
        } else {
            "tvloom=debug,tl_server=debug,tl_session=debug,tl_hls=info,tl_av=info,tl_core=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(env_filter))
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = Config::load_or_default(cli.config.as_deref());
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            tracing::info!("Starting tvloom");
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(tl_server::start(config))?;
            Ok(())
        }
        Commands::CheckTools => {
            let config = Config::load_or_default(cli.config.as_deref());
            check_tools(&config)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("tvloom {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = tl_av::ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Channels cannot play without ffmpeg and ffprobe.");
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read {}", p.display()))?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration parses");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Transcode root: {}", config.streaming.transcode_root.display());
    println!("  Work-ahead limit: {}", config.streaming.work_ahead_limit);
    println!("  Channels: {}", config.channels.len());
    for channel in &config.channels {
        println!("    {} {} ({} items)", channel.number, channel.name, channel.items.len());
    }

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ No warnings");
    } else {
        for warning in &warnings {
            println!("  ! {warning}");
        }
    }

    Ok(())
}
