//! `ixf-importer` command line entry point.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use ixf_common::{ImporterConfig, LogMailSink, MemoryTicketSink, DEFAULT_CONFIG_PATH};
use ixf_importer::import_log::log_status;
use ixf_importer::{
    rollback, BatchOptions, BatchRunner, FeedCache, HttpFeedClient, PostMortem, ProposalKey,
    Registry, ResetOptions,
};
use ixf_types::{Asn, ImportLogId, IxLanId, IxfId};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// IX-F member list importer
#[derive(Parser, Debug)]
#[command(name = "ixf-importer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Registry state file, overrides the configured path
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import IX-F member lists
    Import(ImportArgs),
    /// Print the import history of a network as JSON
    Postmortem {
        #[arg(long)]
        asn: Asn,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the open and dismissed proposals of a network as JSON
    Proposals {
        #[arg(long)]
        asn: Asn,
    },
    /// Show the rollback status of an import log and roll it back
    Rollback {
        #[arg(long)]
        log: ImportLogId,
        #[arg(long)]
        commit: bool,
    },
    /// Dismiss a proposed change
    Dismiss {
        #[arg(long)]
        ixlan: IxLanId,
        #[arg(long)]
        asn: Asn,
        #[arg(long)]
        ipv4: Option<Ipv4Addr>,
        #[arg(long)]
        ipv6: Option<Ipv6Addr>,
    },
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Persist changes, send notifications
    #[arg(long)]
    commit: bool,
    /// Print the combined run log as JSON without persisting anything
    #[arg(long)]
    preview: bool,
    /// Only import this network
    #[arg(long)]
    asn: Option<Asn>,
    /// Only import these exchange LANs
    #[arg(long = "ixlan", num_args = 1..)]
    ixlans: Vec<IxLanId>,
    /// Use cached member lists only
    #[arg(long)]
    cache: bool,
    /// Fetch and cache member lists without importing
    #[arg(long)]
    skip_import: bool,
    /// Apply every reset
    #[arg(long)]
    reset: bool,
    #[arg(long)]
    reset_hints: bool,
    #[arg(long)]
    reset_dismisses: bool,
    #[arg(long)]
    reset_tickets: bool,
    #[arg(long)]
    reset_email: bool,
}

impl ImportArgs {
    fn resets(&self) -> ResetOptions {
        if self.reset {
            return ResetOptions::all();
        }
        ResetOptions {
            hints: self.reset_hints,
            dismisses: self.reset_dismisses,
            tickets: self.reset_tickets,
            email: self.reset_email,
        }
    }

    fn options(&self) -> BatchOptions {
        BatchOptions {
            commit: self.commit,
            preview: self.preview,
            asn: self.asn,
            ixlans: self.ixlans.clone(),
            cache_only: self.cache,
            skip_import: self.skip_import,
            resets: self.resets(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "ixf-importer failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = ImporterConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;

    let state = cli.state.clone().unwrap_or_else(|| config.state.path.clone());
    let mut registry = Registry::load(&state).with_context(|| format!("loading {}", state.display()))?;

    match cli.command {
        Command::Import(args) => {
            let options = args.options();
            if options.commit && options.preview {
                bail!("--commit and --preview are mutually exclusive");
            }

            let cache = match &config.feed.cache_dir {
                Some(dir) => FeedCache::with_dir(dir),
                None => FeedCache::in_memory(),
            };
            let runner = BatchRunner::new(
                config.clone(),
                Arc::new(HttpFeedClient::new(cache)?),
                Arc::new(LogMailSink),
                Arc::new(MemoryTicketSink::time_seeded()),
            );

            let report = runner.run(&mut registry, &options, Utc::now()).await?;
            if options.commits() {
                registry.save(&state)?;
            }
            if options.preview {
                println!("{}", serde_json::to_string_pretty(&report.combined_log())?);
            }

            info!(
                lans = report.outcomes.len(),
                failed = report.failures.len(),
                tickets_failed = report.notify.tickets_failed,
                "IX-F import done"
            );
            for failure in &report.failures {
                eprintln!("{} ({}): {}", failure.name, failure.url, failure.error);
            }
            Ok(if report.failed() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Postmortem { asn, limit } => {
            let limit = limit.unwrap_or(config.postmortem.limit);
            let report = PostMortem::new(&config).generate(&registry, asn, limit)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Proposals { asn } => {
            let view = registry
                .proposals()
                .network_view(asn, |lan| registry.exchange_of(lan).map(|e| e.id));
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Rollback { log, commit } => {
            let statuses = log_status(&registry, log)?;
            for (index, status) in statuses.iter().enumerate() {
                println!("entry {}: {}", index, status);
            }
            if commit {
                rollback(&mut registry, log, Utc::now())?;
                registry.save(&state)?;
                println!("import log {} rolled back", log);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Dismiss {
            ixlan,
            asn,
            ipv4,
            ipv6,
        } => {
            let key = ProposalKey::new(ixlan, IxfId::new(asn, ipv4, ipv6));
            let id = registry.proposals_mut().dismiss(&key)?;
            registry.save(&state)?;
            println!("proposal {} dismissed", id);
            Ok(ExitCode::SUCCESS)
        }
    }
}
