//! # alda
//!
//! AFD log data analyser binary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::info;

use afd_alda::cli::Mode;
use afd_alda::{AldaArgs, Analyzer, Filters, OutputFormat, OutputSink, Profile, INCORRECT};

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action).context("installing SIGINT handler")?;
        sigaction(Signal::SIGTERM, &action).context("installing SIGTERM handler")?;
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = AldaArgs::parse();
    match run(args) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("alda: {e:#}");
            std::process::exit(INCORRECT);
        }
    }
}

fn run(args: AldaArgs) -> Result<()> {
    let profile = args
        .profile
        .as_deref()
        .map(Profile::load)
        .transpose()
        .context("loading profile")?;
    let opts = args.resolve(profile.as_ref());
    let format = OutputFormat::compile(&opts.format).context("compiling format string")?;
    let filters = Filters::from_args(&args)?;

    let mut sink = match &args.output {
        Some(path) => OutputSink::file(
            path,
            args.rotate_output_interval.map(Duration::from_secs),
            args.header.clone(),
            args.footer.clone(),
        )?,
        None => OutputSink::stdout(args.header.clone(), args.footer.clone()),
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let start = args.start.unwrap_or(0);
    let end = args.end.unwrap_or(now);

    let mut analyzer = Analyzer::open(&args.work_dir, &opts, filters);

    let mut emit_err: Option<afd_alda::AldaError> = None;
    {
        let mut emit = |h: &afd_alda::FileHistory| {
            if emit_err.is_none() {
                if let Err(e) = sink.emit(&format.render(h)) {
                    emit_err = Some(e);
                }
            }
        };

        let stats = match args.mode {
            Mode::Forward => analyzer.run_forward(start, end, &mut emit)?,
            Mode::Backward => analyzer.run_backward(start, end, &mut emit)?,
            Mode::Continuous => {
                install_signal_handlers()?;
                let mut stats = analyzer.run_forward(start, now, &mut emit)?;
                let follow = analyzer.follow_after_scan(&STOP, &mut emit)?;
                stats.primaries += follow.primaries;
                stats.emitted += follow.emitted;
                stats
            }
            Mode::ContinuousDaemon => {
                install_signal_handlers()?;
                analyzer.follow(&STOP, &mut emit)?
            }
        };
        info!(
            primaries = stats.primaries,
            emitted = stats.emitted,
            stopped_early = stats.stopped_early,
            "run finished"
        );
    }
    if let Some(e) = emit_err {
        return Err(e.into());
    }
    sink.finish()?;
    Ok(())
}
