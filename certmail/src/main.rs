//! certmail command line interface.
//!
//! Three subcommands: `send` runs the full roster-to-inbox pipeline with a
//! progress bar, `preview` renders one sample certificate without emailing
//! anything, and `credentials` stores the sender login in the config file.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use certmail::config::{Config, DEFAULT_CONFIG_PATH};
use certmail::mailer::{Mailer, MessageTemplate};
use certmail::orchestrator::{
    RecordOutcome, RecordUpdate, RunState, SendJob, DEFAULT_WORKERS,
};
use certmail::processor::CertificatePipeline;
use certmail::render::{Position, RenderSpec, Renderer, PREVIEW_NAME};

/// Subject used when `--subject` is not given.
const DEFAULT_SUBJECT: &str = "Seu Certificado Está Pronto!";

/// Body used when `--message-file` is not given.
const DEFAULT_MESSAGE: &str =
    "Prezado {name},\n\nSegue seu certificado em anexo.\n\nAtenciosamente,\nEquipe";

// ============================================================================
// CLI surface
// ============================================================================

#[derive(Parser)]
#[command(
    name = "certmail",
    version,
    about = "Renders personalized certificates and emails them to a recipient roster"
)]
struct Cli {
    /// Config file with sender credentials and SMTP settings
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a certificate for every roster row and email it out
    Send(SendArgs),
    /// Render one sample certificate to check the layout, without emailing
    Preview(PreviewArgs),
    /// Store sender credentials in the config file
    Credentials {
        /// Sender address, also used as the SMTP username
        #[arg(long)]
        email: String,
        /// SMTP password or app password
        #[arg(long)]
        password: String,
    },
}

#[derive(Args)]
struct SendArgs {
    /// Recipient roster (.csv, .xlsx, .xls or .ods)
    #[arg(long)]
    spreadsheet: PathBuf,

    #[command(flatten)]
    render: RenderArgs,

    /// Subject line; {name} is replaced with the recipient's name
    #[arg(long, default_value = DEFAULT_SUBJECT)]
    subject: String,

    /// File with the message body; {name} is replaced with the recipient's name
    #[arg(long)]
    message_file: Option<PathBuf>,

    /// Concurrent sender tasks
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
}

#[derive(Args)]
struct PreviewArgs {
    #[command(flatten)]
    render: RenderArgs,

    /// Where to write the sample; defaults into the output directory
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct RenderArgs {
    /// Certificate template image
    #[arg(long)]
    template: PathBuf,

    /// TrueType/OpenType font used for both overlays
    #[arg(long)]
    font: PathBuf,

    /// Name overlay height in pixels
    #[arg(long, default_value_t = 100.0)]
    name_size: f32,

    /// Certificate number overlay height in pixels
    #[arg(long, default_value_t = 60.0)]
    number_size: f32,

    /// Top-left corner of the name overlay
    #[arg(long, value_name = "X,Y", default_value = "200,1340")]
    name_pos: Position,

    /// Top-left corner of the certificate number overlay
    #[arg(long, value_name = "X,Y", default_value = "570,1930")]
    number_pos: Position,

    /// Output files are named {base}_{recipient name}
    #[arg(long, default_value = "certificado")]
    base_name: String,

    /// Directory for the rendered certificates
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

impl RenderArgs {
    fn to_spec(&self) -> RenderSpec {
        RenderSpec {
            template_path: self.template.clone(),
            font_path: self.font.clone(),
            name_size: self.name_size,
            number_size: self.number_size,
            name_position: self.name_pos,
            number_position: self.number_pos,
            base_name: self.base_name.clone(),
            output_dir: self.output_dir.clone(),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Send(args) => send(&cli.config, args).await.map_err(|error| {
            // Aborts here happen during setup, before any record is touched.
            warn!(state = ?RunState::Failed, "run_failed");
            error
        }),
        Commands::Preview(args) => preview(args),
        Commands::Credentials { email, password } => {
            save_credentials(&cli.config, email, password)
        }
    }
}

async fn send(config_path: &Path, args: SendArgs) -> Result<()> {
    let config = Config::load_or_create(config_path)
        .with_context(|| format!("could not load config {}", config_path.display()))?;
    info!(config = %config_path.display(), "config_loaded");
    if config.has_placeholder_credentials() {
        bail!(
            "no sender credentials configured; run `certmail credentials --email ... --password ...` or edit {}",
            config_path.display()
        );
    }

    let recipients = certmail::roster::load_recipients(&args.spreadsheet)
        .with_context(|| format!("could not load roster {}", args.spreadsheet.display()))?;
    info!(
        recipients = recipients.len(),
        spreadsheet = %args.spreadsheet.display(),
        "roster_loaded"
    );
    if recipients.is_empty() {
        println!("no recipients in {}", args.spreadsheet.display());
        return Ok(());
    }

    let renderer = Renderer::new(args.render.to_spec()).context("could not prepare the renderer")?;

    let body = match &args.message_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("could not read message file {}", path.display()))?,
        None => DEFAULT_MESSAGE.to_string(),
    };
    let template = MessageTemplate {
        subject: args.subject.clone(),
        body,
    };

    let mailer = Mailer::connect(&config, template)
        .await
        .context("SMTP connection check failed")?;

    let total = recipients.len();
    let job = SendJob::new(recipients, args.workers);

    // Ctrl+C / SIGTERM stop further dequeues; in-flight sends still finish.
    let stop = job.stop_flag();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("stop_requested");
        stop.store(true, Ordering::SeqCst);
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let bar = progress_bar(total);
    let ui = tokio::spawn(drive_progress(rx, bar.clone()));

    let pipeline = Arc::new(CertificatePipeline::new(renderer, mailer));
    let summary = job.run(pipeline, tx).await;
    ui.await.context("progress consumer failed")?;

    match summary.state {
        RunState::Stopped => bar.abandon_with_message("stopped, remaining records not sent"),
        _ => bar.finish_with_message("done"),
    }
    println!(
        "{} sent, {} failed out of {} recipients",
        summary.sent, summary.failed, summary.total
    );
    Ok(())
}

fn preview(args: PreviewArgs) -> Result<()> {
    let renderer = Renderer::new(args.render.to_spec()).context("could not prepare the renderer")?;
    let out = match args.out {
        Some(path) => path,
        None => renderer.output_path(PREVIEW_NAME),
    };
    renderer
        .render_preview(&out)
        .context("could not render the preview")?;
    println!("preview written to {}", out.display());
    Ok(())
}

fn save_credentials(config_path: &Path, email: String, password: String) -> Result<()> {
    let mut config = Config::load_or_create(config_path)
        .with_context(|| format!("could not load config {}", config_path.display()))?;
    config.credentials.email = email;
    config.credentials.password = password;
    config
        .save(config_path)
        .with_context(|| format!("could not write config {}", config_path.display()))?;
    println!("credentials saved to {}", config_path.display());
    Ok(())
}

// ============================================================================
// Progress and shutdown
// ============================================================================

fn progress_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .expect("Failed to create progress bar template")
            .progress_chars("#>-"),
    );
    bar
}

/// Single consumer of worker updates; only this task touches the bar.
async fn drive_progress(mut rx: mpsc::UnboundedReceiver<RecordUpdate>, bar: ProgressBar) {
    while let Some(update) = rx.recv().await {
        match &update.outcome {
            RecordOutcome::Sent(path) => {
                bar.println(format!(
                    "sent {} <{}> ({})",
                    update.name,
                    update.email,
                    path.display()
                ));
            }
            RecordOutcome::Failed(reason) => {
                bar.println(format!(
                    "FAILED {} <{}>: {}",
                    update.name, update.email, reason
                ));
            }
        }
        bar.set_message(format!("{}%", update.percent));
        bar.set_position(update.completed as u64);
    }
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

// ============================================================================
// Tests
// ============================================================================
