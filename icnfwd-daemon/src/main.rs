use anyhow::{bail, Context, Result};
use clap::Parser;
use icnfwd_common::metrics::ForwarderMetrics;
use icnfwd_common::DEFAULT_CS_CAPACITY;
use icnfwd_daemon::config::{self, Cli};
use icnfwd_daemon::control;
use icnfwd_daemon::dispatcher::Dispatcher;
use icnfwd_daemon::forwarder::Forwarder;
use icnfwd_daemon::io::spawn_listener;
use log::{debug, info};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.daemon && cli.log_file.is_none() {
        bail!("--daemon requires --log-file");
    }
    config::init_logging(&cli.log, cli.log_file.as_deref())?;

    if cli.daemon {
        daemonize()?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(run(cli)))
}

async fn run(cli: Cli) -> Result<()> {
    let mut dispatcher = Dispatcher::new(4_096);
    let metrics = Arc::new(ForwarderMetrics::new());
    let capacity = cli.capacity.unwrap_or(DEFAULT_CS_CAPACITY);
    let mut forwarder = Forwarder::new(dispatcher.events_sender(), capacity, metrics.clone());

    let wall_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    forwarder.set_wall_offset(wall_ms);

    let control_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), cli.control_port);
    let control_listener = control::bind_control(control_addr, dispatcher.events_sender())?;
    spawn_listener(Box::new(control_listener));

    if let Some(path) = &cli.config {
        // With a configuration file, only its `add listener` lines set up
        // listeners; the --port default is not used.
        for command in config::load_config_file(path)? {
            let line = command.to_string();
            match forwarder.apply_command(command) {
                control::ControlReply::Ack(_) => debug!("config: {}", line),
                control::ControlReply::Nack(reason) => {
                    bail!("config command '{}' failed: {}", line, reason)
                }
            }
        }
    } else {
        forwarder.setup_default_listeners(cli.port)?;
    }

    // Periodic metrics summary at debug level.
    let stats_metrics = metrics.clone();
    let stats_timer = dispatcher.timers_mut().create_timer(true, move |_fwd, _timers| {
        debug!("stats: {}", stats_metrics.summary());
    });
    dispatcher
        .timers_mut()
        .start_timer(stats_timer, Duration::from_secs(60));

    info!(
        "icnfwd running, packet port {} control port {}",
        cli.port, cli.control_port
    );
    dispatcher.run(&mut forwarder).await?;
    info!("icnfwd exiting; {}", metrics.summary());
    Ok(())
}

/// Detach from the controlling terminal: fork, let the parent exit, start
/// a new session, and point the standard descriptors at /dev/null.
fn daemonize() -> Result<()> {
    unsafe {
        match libc::fork() {
            -1 => bail!("fork failed: {}", std::io::Error::last_os_error()),
            0 => {}
            _ => std::process::exit(0),
        }
        if libc::setsid() == -1 {
            bail!("setsid failed: {}", std::io::Error::last_os_error());
        }
        let devnull = std::ffi::CString::new("/dev/null").expect("static path");
        let fd = libc::open(devnull.as_ptr(), libc::O_RDWR);
        if fd == -1 {
            bail!("opening /dev/null failed: {}", std::io::Error::last_os_error());
        }
        libc::dup2(fd, libc::STDIN_FILENO);
        libc::dup2(fd, libc::STDOUT_FILENO);
        libc::dup2(fd, libc::STDERR_FILENO);
        if fd > libc::STDERR_FILENO {
            libc::close(fd);
        }
    }
    Ok(())
}
