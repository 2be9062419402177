use clap::Parser;
use console::{style, Term};
use nethelp::{
    catalog::Catalog,
    cli::{Cli, Commands, InitArgs, ListArgs, RunArgs, ValidateArgs},
    config::{validate_config, Config},
    error::ExitCode,
    logging,
    output::{get_formatter, write_output},
    proxy::{detect_env_proxies, ProxySpec, TransportSettings},
    runner::{Diagnostic, DiagnosticOptions},
    AppError,
};
use std::path::Path;
use std::process::ExitCode as StdExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> StdExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            e.exit_code()
        }
    };

    StdExitCode::from(exit_code as u8)
}

async fn run(cli: Cli) -> nethelp::Result<ExitCode> {
    let log_to_file = matches!(&cli.command, Some(Commands::Run(args)) if args.log);
    let log_file = log_to_file.then(|| Path::new(logging::DEFAULT_LOG_FILE));
    logging::init(logging::level_from_flags(cli.verbose), log_file)?;
    if log_to_file && !cli.verbose {
        eprintln!(
            "{} This log only captures output from the --verbose flag.",
            style("!").yellow()
        );
    }

    let mut config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else {
        Config::default_config()
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    match cli.command {
        None => run_probes(RunArgs::default(), &config, &cli.proxy, cli.quiet).await,
        Some(Commands::Run(args)) => run_probes(args, &config, &cli.proxy, cli.quiet).await,
        Some(Commands::Init(args)) => run_init(args),
        Some(Commands::Validate(args)) => run_validate(args),
        Some(Commands::List(args)) => run_list(args, &config, cli.quiet),
    }
}

/// `--proxy` wins over the config file.
fn effective_proxy(cli_proxy: &Option<String>, config: &Config) -> String {
    cli_proxy
        .clone()
        .or_else(|| config.proxy.url.clone())
        .unwrap_or_default()
}

fn warn_about_env_proxies() {
    for (name, value) in detect_env_proxies(|name| std::env::var(name).ok()) {
        let shown = ProxySpec::parse(&value)
            .map(|spec| spec.sanitized())
            .unwrap_or_else(|_| "<unparsable>".to_string());
        tracing::warn!(
            variable = %name,
            value = %shown,
            "Found a proxy environment variable. It is ignored; pass the proxy with --proxy to use it."
        );
    }
}

async fn run_probes(
    args: RunArgs,
    config: &Config,
    cli_proxy: &Option<String>,
    quiet: bool,
) -> nethelp::Result<ExitCode> {
    let proxy = effective_proxy(cli_proxy, config);
    if proxy.trim().is_empty() {
        warn_about_env_proxies();
    }

    let catalog = Catalog::from_config(config)?;
    let groups = catalog.build_groups(&args.selection.selection(), |profile| {
        config.profile_credentials(profile)
    });

    let options = DiagnosticOptions {
        proxy,
        settings: TransportSettings::from(&config.global),
        preflight_url: (!args.lucky).then(|| config.global.preflight_url.clone()),
        concurrency: args.concurrency.unwrap_or(config.global.concurrency),
        show_progress: !quiet && Term::stderr().is_term(),
    };

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received; stopping");
                cancel.cancel();
            }
        })
    };

    let mut diagnostic = Diagnostic::new(options).with_cancellation(cancel);
    let result = diagnostic.run(&groups).await;
    ctrl_c.abort();
    let report = result?;

    let output_format = args
        .output
        .map(Into::into)
        .unwrap_or(config.global.output_format);
    let use_colors = Term::stdout().is_term() && args.output_file.is_none();
    let formatter = get_formatter(output_format, use_colors);
    let output = formatter.format(&report);

    write_output(&output, args.output_file.as_deref())?;

    if report.interrupted {
        Ok(ExitCode::Interrupted)
    } else if args.strict && !report.all_reachable() {
        Ok(ExitCode::TargetsUnreachable)
    } else {
        Ok(ExitCode::Success)
    }
}

fn run_init(args: InitArgs) -> nethelp::Result<ExitCode> {
    let output_path = &args.output;

    // Check if file exists
    if output_path.exists() && !args.force {
        return Err(AppError::Config(format!(
            "File already exists: {}. Use --force to overwrite.",
            output_path.display()
        )));
    }

    let config = Config::default_config();
    let toml = config.to_toml()?;
    std::fs::write(output_path, toml)?;

    println!(
        "{} Configuration file created: {}",
        style("[+]").green(),
        output_path.display()
    );
    println!("Edit the file to add your credentials, proxy and settings.");

    Ok(ExitCode::Success)
}

fn run_validate(args: ValidateArgs) -> nethelp::Result<ExitCode> {
    let config_path = &args.config;

    if !config_path.exists() {
        return Err(AppError::FileNotFound(config_path.display().to_string()));
    }

    let config = Config::from_file(config_path)?;
    let warnings = validate_config(&config)?;

    println!(
        "{} Configuration file is valid: {}",
        style("[+]").green(),
        config_path.display()
    );

    if !warnings.is_empty() {
        println!("\n{}", style("Warnings:").yellow());
        for warning in &warnings {
            println!("  {} {}", style("!").yellow(), warning);
        }
    }

    let proxy = config
        .proxy
        .url
        .as_deref()
        .and_then(|raw| ProxySpec::parse(raw).ok())
        .map(|spec| spec.sanitized())
        .unwrap_or_else(|| "direct".to_string());

    println!("\n{}", style("Configuration Summary:").bold());
    println!("  Proxy: {}", proxy);
    println!("  Preflight URL: {}", config.global.preflight_url);
    println!(
        "  Timeouts: connect {}s, request {}s",
        config.global.connect_timeout_seconds, config.global.request_timeout_seconds
    );
    println!("  Concurrency: {}", config.global.concurrency);
    println!(
        "  Catalog: {}",
        if config.catalog.is_empty() {
            "built-in".to_string()
        } else {
            format!("{} custom entries", config.catalog.len())
        }
    );
    println!("  Credentials:");
    for (name, profile) in &config.credentials {
        let status = if profile.username.is_some() {
            style("(username set)").green()
        } else {
            style("(no username)").dim()
        };
        println!("    - {} {}", name, status);
    }

    if warnings.is_empty() {
        Ok(ExitCode::Success)
    } else {
        Ok(ExitCode::ConfigError)
    }
}

fn run_list(args: ListArgs, config: &Config, quiet: bool) -> nethelp::Result<ExitCode> {
    let catalog = Catalog::from_config(config)?;
    let groups = catalog.build_groups(&args.selection.selection(), |profile| {
        config.profile_credentials(profile)
    });

    if !quiet {
        println!("\nSelected endpoints\n==================\n");
    }
    for group in &groups {
        println!("{}", style(group.identity()).bold());
        for target in &group.targets {
            println!("  {} {}", style(target.kind).cyan(), target.address);
        }
        println!();
    }

    Ok(ExitCode::Success)
}
