mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use df_convert::{CommandConverter, ToolRegistry};
use df_core::config::Config;
use df_core::events::EventBus;
use df_core::DocumentFormat;
use df_jobs::{ConversionRequest, ConversionService};

struct ServeOverrides {
    host: Option<String>,
    port: Option<u16>,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    timeout: Option<u64>,
}

impl ServeOverrides {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(workers) = self.workers {
            config.pool.workers = workers;
        }
        if let Some(capacity) = self.queue_capacity {
            config.pool.queue_capacity = Some(capacity);
        }
        if let Some(timeout) = self.timeout {
            config.engine.timeout_secs = timeout;
        }
    }
}

async fn start_server(overrides: ServeOverrides, config_path: Option<&Path>) -> Result<()> {
    let mut config = Config::load_or_default(config_path);
    overrides.apply(&mut config);

    tracing::info!("Starting docforge");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    df_server::start(config).await?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "docforge=trace,df_core=trace,df_convert=trace,df_jobs=trace,df_server=trace,tower_http=debug".to_string()
        } else {
            "docforge=debug,df_core=debug,df_convert=debug,df_jobs=debug,df_server=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Start {
            host,
            port,
            workers,
            queue_capacity,
            timeout,
        } => {
            let overrides = ServeOverrides {
                host,
                port,
                workers,
                queue_capacity,
                timeout,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(overrides, cli.config.as_deref()))
        }
        Commands::Convert {
            input,
            to,
            from,
            output,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert_file(
                &input,
                &to,
                from.as_deref(),
                output,
                cli.config.as_deref(),
            ))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("docforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn convert_file(
    input: &Path,
    to: &str,
    from: Option<&str>,
    output: Option<PathBuf>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = Config::load_or_default(config_path);
    config.pool.workers = 1;
    config.pool.queue_capacity = Some(1);

    if !input.exists() {
        anyhow::bail!("Input file does not exist: {}", input.display());
    }

    let source = match from {
        Some(from) => from.to_string(),
        None => input
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .context("Cannot infer the source format; pass --from")?,
    };
    let target: DocumentFormat = to.parse()?;
    let output = output.unwrap_or_else(|| input.with_extension(target.extension()));

    let tools = ToolRegistry::discover(&config.engine);
    let converter = Arc::new(CommandConverter::from_config(&config.engine, &tools)?);

    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let service = ConversionService::start(&config, converter, Arc::new(EventBus::default()));
    let filename = input.file_name().map(|n| n.to_string_lossy().to_string());
    let request = ConversionRequest::new(bytes, source, to).with_filename(filename);
    let result = service.submit(request).await;
    service.shutdown().await;

    let doc = result?;
    tokio::fs::write(&output, &doc.bytes)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Converted {} -> {} ({} bytes, {} attempt(s), {:.2}s)",
        input.display(),
        output.display(),
        doc.bytes.len(),
        doc.attempts,
        doc.elapsed.as_secs_f64()
    );
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking conversion engine...\n");

    let config = Config::load_or_default(config_path);
    let registry = ToolRegistry::discover(&config.engine);
    let tools = registry.check_all();

    for tool in &tools {
        let status = if tool.available { "✓" } else { "✗" };
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
    match registry.engine() {
        Ok(engine) => println!("Using engine: {}", engine.path.display()),
        Err(_) => println!("No document engine found. Install LibreOffice or set engine.program."),
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let config = Config::load(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Workers: {}", config.pool.effective_workers());
    println!("  Queue capacity: {}", config.pool.effective_queue_capacity());
    println!("  Max attempts: {}", config.pool.effective_max_attempts());
    println!("  Engine timeout: {}s", config.engine.timeout_secs);
    println!("  Workspace root: {}", config.workspace.root.display());
    println!(
        "  Formats: {} source(s), {} target(s)",
        config.formats.sources.len(),
        config.formats.targets.len()
    );

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}
