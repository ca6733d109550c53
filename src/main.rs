//! dist-promote CLI
//!
//! Entry point for the `dist-promote` command-line tool.

use std::error::Error as _;
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};

use dist_promote::config::{CliOverrides, Config};
use dist_promote::github::GithubHost;
use dist_promote::pipeline::{Pipeline, PipelineError, PipelineOutcome};
use dist_promote::store::{FsStore, ObjectStore, S3Store, S3StoreConfig};
use dist_promote::CancelToken;

#[derive(Parser)]
#[command(name = "dist-promote")]
#[command(about = "Promote a toolchain release to the public distribution store", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full promotion pipeline for a channel
    Run(RunOptions),

    /// Resolve the release and report what a run would do, without writing
    Plan(RunOptions),

    /// Verify the published release against its manifest checksums
    Verify(RunOptions),
}

#[derive(Args)]
struct RunOptions {
    /// Release channel to promote (nightly, beta, stable, or a tool channel)
    channel: String,

    /// Path to the configuration file
    #[arg(long, short = 'c', default_value = "dist-promote.toml")]
    config: PathBuf,

    /// Promote this exact commit instead of the channel's branch tip
    #[arg(long)]
    commit: Option<String>,

    /// Working directory for staged artifacts
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Object-store endpoint override (an S3-compatible URL, or file:///path
    /// for a local stand-in)
    #[arg(long)]
    endpoint_url: Option<String>,

    /// Skip the release-marker idempotency check
    #[arg(long)]
    bypass_marker_check: bool,

    /// Skip CDN invalidations after publishing
    #[arg(long)]
    skip_invalidations: bool,

    /// Keep the staging directory after the run
    #[arg(long)]
    skip_cleanup: bool,
}

impl RunOptions {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            channel: Some(self.channel.clone()),
            override_commit: self.commit.clone(),
            work_dir: self.work_dir.clone(),
            endpoint_url: self.endpoint_url.clone(),
            bypass_marker_check: self.bypass_marker_check,
            skip_invalidations: self.skip_invalidations,
            skip_cleanup: self.skip_cleanup,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run(options) => run(&options),
        Commands::Plan(options) => plan(&options),
        Commands::Verify(options) => verify(&options),
    };
    process::exit(code);
}

/// Everything the subcommands need, wired from one loaded `Config`
struct Services {
    config: Config,
    host: GithubHost,
    upstream: Box<dyn ObjectStore>,
    public: Box<dyn ObjectStore>,
}

fn services(options: &RunOptions) -> Result<Services, i32> {
    let config = Config::load(&options.config, options.overrides()).map_err(|err| {
        eprintln!("error: {}", err);
        1
    })?;

    let host = GithubHost::new(
        &config.repository,
        config.github_token.as_deref(),
        config.http_timeout(),
        config.retry_policy(),
    )
    .map_err(|err| {
        eprintln!("error: {}", err);
        1
    })?;

    let upstream = make_store(&config.download_bucket, &config);
    let public = make_store(&config.upload_bucket, &config);

    Ok(Services {
        config,
        host,
        upstream,
        public,
    })
}

/// An endpoint of the form `file:///path` selects the directory-backed
/// stand-in store; anything else goes through the `aws` CLI.
fn make_store(bucket: &str, config: &Config) -> Box<dyn ObjectStore> {
    match &config.endpoint_url {
        Some(url) if url.starts_with("file://") => {
            let root = PathBuf::from(url.trim_start_matches("file://"));
            Box::new(FsStore::new(root.join(bucket)))
        }
        endpoint => Box::new(S3Store::new(S3StoreConfig {
            bucket: bucket.to_string(),
            endpoint_url: endpoint.clone(),
            connect_timeout_secs: config.http_timeout_secs,
            read_timeout_secs: config.http_timeout_secs,
        })),
    }
}

fn report(err: &PipelineError) -> i32 {
    eprintln!("error: {}", err);
    let mut cause = err.source();
    while let Some(inner) = cause {
        eprintln!("  caused by: {}", inner);
        cause = inner.source();
    }
    err.exit_code()
}

fn run(options: &RunOptions) -> i32 {
    let services = match services(options) {
        Ok(services) => services,
        Err(code) => return code,
    };

    if services.config.num_threads > 0 {
        if let Err(err) = rayon::ThreadPoolBuilder::new()
            .num_threads(services.config.num_threads)
            .build_global()
        {
            eprintln!("warning: could not size the thread pool: {}", err);
        }
    }

    let cancel = CancelToken::new();
    if let Err(err) = cancel.install_signal_handler() {
        eprintln!("warning: could not install the interrupt handler: {}", err);
    }

    let pipeline = Pipeline::new(
        &services.config,
        &services.host,
        services.upstream.as_ref(),
        services.public.as_ref(),
        cancel,
    );

    match pipeline.run() {
        Ok(PipelineOutcome::Published { .. }) | Ok(PipelineOutcome::ShortCircuit { .. }) => 0,
        Err(err) => report(&err),
    }
}

fn plan(options: &RunOptions) -> i32 {
    let services = match services(options) {
        Ok(services) => services,
        Err(code) => return code,
    };

    let pipeline = Pipeline::new(
        &services.config,
        &services.host,
        services.upstream.as_ref(),
        services.public.as_ref(),
        CancelToken::new(),
    );

    match pipeline.plan() {
        Ok(outcome) => {
            if outcome.already_published {
                println!(
                    "{} {} at {} is already published; a run would be a no-op",
                    services.config.channel, outcome.version, outcome.commit
                );
            } else {
                println!(
                    "a run would publish {} {} from commit {}",
                    services.config.channel, outcome.version, outcome.commit
                );
            }
            0
        }
        Err(err) => report(&err),
    }
}

fn verify(options: &RunOptions) -> i32 {
    let services = match services(options) {
        Ok(services) => services,
        Err(code) => return code,
    };

    let pipeline = Pipeline::new(
        &services.config,
        &services.host,
        services.upstream.as_ref(),
        services.public.as_ref(),
        CancelToken::new(),
    );

    match pipeline.verify() {
        Ok(problems) if problems.is_empty() => {
            println!(
                "published {} release matches its manifest",
                services.config.channel
            );
            0
        }
        Ok(problems) => {
            for problem in &problems {
                eprintln!("mismatch: {}", problem);
            }
            eprintln!("{} problems found", problems.len());
            dist_promote::ErrorClass::Data.exit_code()
        }
        Err(err) => report(&err),
    }
}
