//! plugpack CLI
//!
//! Entry point for the `plugpack` command-line tool.

use clap::{Args, Parser, Subcommand};
use plugpack::pipeline::ManifestSummary;
use plugpack::release::{publish, ChangeType, ChangelogEntry, MarkdownLogSink};
use plugpack::{
    resolve_spec, validate, BuildOptions, BuildPipeline, BuildReport, CascadeRequest, EffectiveConfig,
    Environment, ExitCode, PackError, Record, Report,
};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "plugpack")]
#[command(about = "Deterministic plugin archive builder and validator", version)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, validate and keep the archive
    Build(BuildArgs),

    /// Audit an existing archive without modifying it
    Validate {
        /// Archive to audit
        archive: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration with provenance
    Resolve {
        #[command(flatten)]
        config: ConfigArgs,

        /// Also write the effective configuration to this file
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ConfigArgs {
    /// Build root (default: current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Directory holding build.*.json (default: <root>/.build)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Explicit configuration document, applied after the local override
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Build environment (production, development)
    #[arg(long)]
    env: Option<Environment>,

    /// Version override
    #[arg(long)]
    version: Option<String>,

    /// Do not require the default template
    #[arg(long)]
    no_default: bool,
}

impl ConfigArgs {
    fn to_request(&self) -> CascadeRequest {
        let mut request = CascadeRequest::new(&self.root).with_require_default(!self.no_default);
        if let Some(dir) = &self.config_dir {
            request = request.with_config_dir(dir);
        }
        if let Some(path) = &self.config {
            request = request.with_explicit(path);
        }
        if let Some(env) = self.env {
            request = request.with_environment(env);
        }
        if let Some(version) = &self.version {
            request = request.with_version(version);
        }
        request
    }
}

#[derive(Args)]
struct BuildArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// List what would be packaged without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Output in JSON format
    #[arg(long)]
    json: bool,

    /// Record the release in the update log with this summary
    #[arg(long, value_name = "SUMMARY")]
    changelog: Option<String>,

    /// Change category for the update log
    #[arg(long, default_value = "fix")]
    change_type: ChangeType,

    /// Update log to modify
    #[arg(long, default_value = "Update-Log.md")]
    changelog_file: PathBuf,

    /// Repository URL used to link release tags
    #[arg(long)]
    repo_url: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Commands::Build(args) => run_build(args),
        Commands::Validate {
            archive,
            config,
            json,
        } => run_validate(archive, &config, json),
        Commands::Resolve { config, output } => run_resolve(&config, output),
    };
    process::exit(code.as_i32());
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run_build(args: BuildArgs) -> ExitCode {
    let request = args.config.to_request();
    let (effective, spec) = match resolve_spec(&request) {
        Ok(resolved) => resolved,
        Err(e) => return finish_failed(&e, None, Report::new(), args.json),
    };

    let options = BuildOptions {
        dry_run: args.dry_run,
    };
    let mut pipeline = BuildPipeline::new(&spec, options);
    let result = pipeline.run();
    let mut report = pipeline.into_report();

    if let (Ok(outcome), Some(summary)) = (&result, &args.changelog) {
        if !outcome.dry_run {
            let mut entry = ChangelogEntry::new(&spec.version, summary, args.change_type);
            if let Some(url) = &args.repo_url {
                entry = entry.with_repository(url);
            }
            let path = spec.root.join(&args.changelog_file);
            publish(&mut MarkdownLogSink::new(path), &entry, &mut report);
        }
    }

    if args.json {
        let build_report = BuildReport::new(&result, Some(effective.spec_digest.clone()), report.records);
        return match serde_json::to_string_pretty(&build_report) {
            Ok(json) => {
                println!("{}", json);
                exit_code_of(&result)
            }
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                ExitCode::Io
            }
        };
    }

    match result {
        Ok(outcome) => {
            print_summary(&outcome.summary);
            if outcome.dry_run {
                println!("Would write {}:", outcome.archive_path.display());
                for path in &outcome.planned {
                    println!("  {}", path);
                }
            } else if let Some(handle) = &outcome.archive {
                println!(
                    "Built {} ({} entries, {} bytes, sha256 {})",
                    handle.path.display(),
                    handle.entries.len(),
                    handle.size_bytes,
                    handle.sha256
                );
            }
            print_records(&report.records);
            ExitCode::Success
        }
        Err(e) => finish_failed(&e, Some(&effective), report, false),
    }
}

fn run_validate(archive: PathBuf, config: &ConfigArgs, json: bool) -> ExitCode {
    let (_, spec) = match resolve_spec(&config.to_request()) {
        Ok(resolved) => resolved,
        Err(e) => return finish_failed(&e, None, Report::new(), json),
    };

    let validation = match validate(&archive, &spec) {
        Ok(v) => v,
        Err(e) => return finish_failed(&e.into(), None, Report::new(), json),
    };
    let code = if validation.ok {
        ExitCode::Success
    } else {
        ExitCode::Validation
    };

    if json {
        match serde_json::to_string_pretty(&validation) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                return ExitCode::Io;
            }
        }
        return code;
    }

    println!(
        "{}: {} entries, {} bytes uncompressed",
        archive.display(),
        validation.entry_count,
        validation.total_size
    );
    for (ext, count) in &validation.file_types {
        println!("  {:<12} {}", ext, count);
    }
    print_records(&validation.to_records());
    if validation.ok {
        println!("Validation passed");
    } else {
        eprintln!(
            "Validation failed: {} hard error(s)",
            validation.hard_errors().count()
        );
    }
    code
}

fn run_resolve(config: &ConfigArgs, output: Option<PathBuf>) -> ExitCode {
    let request = config.to_request();
    let effective = match EffectiveConfig::resolve(&request) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::Config;
        }
    };
    tracing::debug!(
        plugin = effective.get_str("plugin_name"),
        version = effective.get_str("version"),
        layers = effective.sources.len(),
        "configuration resolved"
    );
    if let Err(e) = effective.to_build_spec(&request.root) {
        eprintln!("Warning: resolved configuration is not buildable: {}", e);
    }
    if let Some(path) = output {
        if let Err(e) = effective.write_to_file(&path) {
            eprintln!("Error writing {}: {}", path.display(), e);
            return ExitCode::Io;
        }
    }
    match effective.to_json() {
        Ok(json) => {
            println!("{}", json);
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            ExitCode::Io
        }
    }
}

fn exit_code_of<T>(result: &Result<T, PackError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::Success,
        Err(e) => e.exit_code(),
    }
}

fn finish_failed(
    error: &PackError,
    effective: Option<&EffectiveConfig>,
    report: Report,
    json: bool,
) -> ExitCode {
    if json {
        let build_report = BuildReport {
            ok: false,
            exit_code: error.exit_code().as_i32(),
            error: Some(error.to_string()),
            spec_digest: effective.map(|e| e.spec_digest.clone()),
            outcome: None,
            records: report.records,
        };
        match serde_json::to_string_pretty(&build_report) {
            Ok(out) => println!("{}", out),
            Err(e) => eprintln!("Error serializing output: {}", e),
        }
        return error.exit_code();
    }

    print_records(&report.records);
    eprintln!("Build failed: {}", error);
    if let PackError::ValidationFailure { issues, .. } = error {
        for issue in issues {
            eprintln!("  {}", issue);
        }
    }
    error.exit_code()
}

fn print_summary(summary: &ManifestSummary) {
    println!("{} files, {} bytes", summary.files, summary.total_size);
    for path in &summary.head {
        println!("  {}", path);
    }
    if !summary.tail.is_empty() {
        println!("  ...");
        for path in &summary.tail {
            println!("  {}", path);
        }
    }
    for (ext, count) in &summary.file_types {
        println!("  {:<12} {}", ext, count);
    }
}

/// Info first, then every warning, then errors
fn print_records(records: &[Record]) {
    for record in records.iter().filter(|r| !r.is_warning() && !r.is_error()) {
        println!("{}", record);
    }
    let warnings: Vec<_> = records.iter().filter(|r| r.is_warning()).collect();
    if !warnings.is_empty() {
        eprintln!("Warnings ({}):", warnings.len());
        for record in warnings {
            eprintln!("  {}", record);
        }
    }
    for record in records.iter().filter(|r| r.is_error()) {
        eprintln!("Error: {}", record);
    }
}
