use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};

use glidein_frontend::common::cli::{DeadvertiseOpts, RootOptions, RunOpts, SubCommand};
use glidein_frontend::common::config::FrontendSettings;
use glidein_frontend::common::setup::setup_logging;
use glidein_frontend::directory::condor::CondorTransport;
use glidein_frontend::directory::pool_display;
use glidein_frontend::directory::transient::TransientFiles;
use glidein_frontend::request::batch::deadvertise;
use glidein_frontend::supervisor::monitor::{DirectoryCleaner, FileMonitorAggregator};
use glidein_frontend::supervisor::process::CommandSpawner;
use glidein_frontend::supervisor::{GroupSupervisor, SupervisorConfig};

async fn stop_signal() {
    let (Ok(mut term), Ok(mut quit)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    ) else {
        log::warn!("Cannot install signal handlers, only SIGINT will stop the frontend");
        let _ = tokio::signal::ctrl_c().await;
        return;
    };
    tokio::select! {
        _ = term.recv() => log::info!("Received SIGTERM, attempting to stop"),
        _ = quit.recv() => log::info!("Received SIGQUIT, attempting to stop"),
        _ = tokio::signal::ctrl_c() => log::info!("Received SIGINT, attempting to stop"),
    }
}

async fn command_run(opts: RunOpts) -> glidein_frontend::Result<()> {
    let settings = FrontendSettings::load(&opts.config)?;

    log::info!(
        "Starting frontend {} with groups: {}",
        glidein_frontend::FRONTEND_VERSION,
        settings.groups.join(", ")
    );
    let spawner = CommandSpawner::new(settings.worker_command.clone(), settings.work_dir.clone())
        .with_condor_config(settings.collector.condor_config.clone());
    let mut supervisor = GroupSupervisor::new(SupervisorConfig::from(&settings), Box::new(spawner));
    if let Some(monitor_dir) = &settings.monitor_dir {
        supervisor =
            supervisor.with_aggregator(Box::new(FileMonitorAggregator::new(monitor_dir.clone())));
    }
    if !settings.cleanup.dirs.is_empty() {
        supervisor = supervisor.with_cleaner(Box::new(DirectoryCleaner::new(
            settings.cleanup.dirs.clone(),
            settings.cleanup.max_age,
        )));
    }
    supervisor.run(stop_signal()).await
}

fn command_deadvertise(opts: DeadvertiseOpts) -> glidein_frontend::Result<()> {
    let settings = FrontendSettings::load(&opts.config)?;
    let pool = opts.pool.or(settings.collector.pool.clone());
    let transport = CondorTransport::new(
        settings.collector.bin_dir.clone(),
        settings.protocol.advertise_use_tcp,
    )
    .with_condor_config(settings.collector.condor_config.clone());
    let mut files = TransientFiles::new(settings.protocol.tmp_dir.clone(), "gfi_de");
    deadvertise(
        &transport,
        &settings.protocol,
        &mut files,
        pool.as_deref(),
        &opts.client_name,
        opts.request.as_deref(),
    )?;
    log::info!(
        "Requests of {} removed from {}",
        opts.client_name,
        pool_display(pool.as_deref())
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> glidein_frontend::Result<()> {
    let opts = RootOptions::parse();
    setup_logging(opts.common.debug);

    let result = match opts.subcmd {
        SubCommand::Run(opts) => command_run(opts).await,
        SubCommand::Deadvertise(opts) => command_deadvertise(opts),
    };
    if let Err(e) = result {
        log::error!("{e}");
        std::process::exit(1);
    }

    Ok(())
}
