use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use hud_service::actor::config_watcher::ConfigWatcher;
use hud_service::actor::reactor::Reactor;
use hud_service::actor;
use hud_service::app::DesktopFiles;
use hud_service::common::config::{Config, config_file};
use hud_service::common::log::init_logging;
use hud_service::common::usage::UsageStore;
use hud_service::context::HudContext;
use hud_service::ipc::{IpcServer, ServerState, default_socket_path};
use hud_service::query::voice::NoVoice;
use hud_service::remote::LocalBus;
use hud_service::service::HudService;
use hud_service::sys::main_loop::MainLoop;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Indexes application and indicator menus for the HUD")]
struct Cli {
    /// Config file. Defaults to the user config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Socket to listen on.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Check the config file and exit.
    #[arg(long)]
    validate: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    sigpipe::reset();
    let opt = Cli::parse();
    init_logging(opt.verbose);

    let config = Config::load(opt.config.as_deref())?;
    if opt.validate {
        println!("config ok: {} indicators", config.indicators.len());
        return Ok(());
    }

    let settings = &config.settings;
    let usage = if settings.usage.persist {
        Rc::new(UsageStore::load(&settings.usage.path())?)
    } else {
        Rc::new(UsageStore::in_memory())
    };

    let bus = LocalBus::new();
    let ctx = HudContext::new(&config, bus.clone(), usage.clone(), Rc::new(DesktopFiles::from_env()), Rc::new(NoVoice))?;
    let service = HudService::new(&ctx, &config.indicators);

    let (events_tx, events_rx) = actor::channel();
    let server_state = ServerState::shared();
    let socket = opt.socket.or_else(|| settings.ipc.socket.clone()).unwrap_or_else(default_socket_path);
    let server = IpcServer::bind(&socket, server_state.clone(), events_tx.clone())?;
    let io_thread = server.spawn().context("starting socket thread")?;

    let config_path = opt.config.unwrap_or_else(config_file);
    let _watcher = match ConfigWatcher::spawn(config_path, events_tx) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("config reload disabled: {e:#}");
            None
        }
    };

    let reactor = Reactor::new(service, bus, server_state);
    info!(socket = %socket.display(), "hud service running");
    MainLoop::run(async move { reactor.run(events_rx).await });

    if let Err(e) = usage.save() {
        warn!("usage data not saved: {e:#}");
    }
    if io_thread.join().is_err() {
        warn!("socket thread panicked");
    }
    Ok(())
}
