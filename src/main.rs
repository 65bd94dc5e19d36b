mod commands;
mod config;
mod listener;
mod logging;
mod reactor;
mod server;
mod shutdown;
mod status;
mod store;
mod utils;

use std::thread;
use std::time::{Duration, Instant};

use commands::console::{CommandConsole, ConsolePoll};
use config::{AppConfig, ConfigSource};
use listener::{ArmOutcome, ListenerConfig, ListenerReactor, SensorListener};
use logging::{LogLevel, Logger, LoggerConfig};
use serde_json::json;
use shutdown::ShutdownHooks;
use status::StatusReporter;
use utils::runtime::{ensure_posix_or_exit, exit_with_startup_error};
use utils::startup_banner::print_startup_banner;

const MAX_IDLE_SLEEP: Duration = Duration::from_millis(100);

fn main() {
    ensure_posix_or_exit();
    print_startup_banner();

    let (app_config, config_source) = load_config_or_exit();
    let log_level = LogLevel::from_config_value(&app_config.logging.level).unwrap_or_else(|| {
        exit_with_startup_error(&format!(
            "invalid logging.level '{}'. Allowed values: {}",
            app_config.logging.level,
            LogLevel::CONFIG_VALUES
        ))
    });
    let logger = Logger::new(LoggerConfig {
        min_level: log_level,
        human_friendly: app_config.logging.human_friendly,
    });
    logger.log(
        LogLevel::Info,
        Some("main::config"),
        "Configuration loaded",
        Some(json!({
            "source": config_source.to_string(),
            "log_level": app_config.logging.level,
            "console_enabled": app_config.console.enabled,
            "status_report_interval_ms": app_config.status.report_interval_ms,
        })),
    );

    let listener_config = ListenerConfig::from_app_config(&app_config).unwrap_or_else(|error| {
        exit_with_startup_error(&format!("listener configuration error: {error}"))
    });
    let mut listener = SensorListener::bind(listener_config, logger.clone())
        .unwrap_or_else(|error| exit_with_startup_error(&format!("listener startup error: {error}")));
    let mut status_reporter = StatusReporter::from_app_config(logger.clone(), &app_config)
        .unwrap_or_else(|error| exit_with_startup_error(&format!("status configuration error: {error}")));

    let mut reactor = ListenerReactor::new();
    if listener.start(&mut reactor) != ArmOutcome::Armed {
        exit_with_startup_error("listener startup error: acceptor could not be armed");
    }
    logger.log(
        LogLevel::Info,
        Some("main::listener"),
        &format!(
            "{} v{} waiting for a sensor connection",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
        Some(json!({
            "bind_address": listener.local_addr().map(|addr| addr.to_string()),
            "host": app_config.listener.host,
            "port": app_config.listener.port,
        })),
    );

    if let Err(error) = status_reporter.start(&mut reactor) {
        logger.warn(Some("main::status"), &error.to_string());
    } else if status_reporter.is_enabled() {
        logger.info(Some("main::status"), "Periodic status report enabled");
    } else {
        logger.debug(Some("main::status"), "Periodic status report disabled");
    }

    let mut console = app_config.console.enabled.then(CommandConsole::spawn_stdin);
    if console.is_some() {
        logger.info(
            Some("main::console"),
            &format!("Reading commands from stdin: {}", commands::Command::available()),
        );
    }

    let shutdown_hooks = ShutdownHooks::install().unwrap_or_else(|error| {
        exit_with_startup_error(&format!("failed to install shutdown hooks: {error}"))
    });
    logger.info(
        Some("main::shutdown"),
        "Shutdown hooks installed for SIGINT/SIGTERM",
    );

    while !shutdown_hooks.is_triggered() {
        if let Some(active) = console.as_mut() {
            drain_console(active, &mut listener, &mut reactor, &logger);
            if active.is_closed() {
                logger.info(Some("main::console"), "Console input closed; commands disabled");
                console = None;
            }
        }

        reactor.run_due(&mut listener, Instant::now());

        let idle = reactor
            .time_until_next(Instant::now())
            .map_or(MAX_IDLE_SLEEP, |wait| wait.min(MAX_IDLE_SLEEP));
        if !idle.is_zero() {
            thread::sleep(idle);
        }
    }

    logger.info(
        Some("main::shutdown"),
        "Shutdown signal received, closing listener",
    );
    status_reporter.stop(&mut reactor);
    listener.shutdown(&mut reactor);
    logger.log(
        LogLevel::Info,
        Some("main::shutdown"),
        "Listener stopped and shutdown completed",
        Some(json!({
            "stats": listener.stats().to_json(),
            "pending_timers": reactor.timer_count(),
        })),
    );
}

fn load_config_or_exit() -> (AppConfig, ConfigSource) {
    match AppConfig::load_with_discovery(std::env::args().skip(1)) {
        Ok(loaded) => loaded,
        Err(error) => exit_with_startup_error(&format!("configuration error: {error}")),
    }
}

fn drain_console(
    console: &mut CommandConsole,
    listener: &mut SensorListener,
    reactor: &mut ListenerReactor,
    logger: &Logger,
) {
    loop {
        match console.poll() {
            Ok(ConsolePoll::Line(line)) => {
                if let Some(response) = commands::handle_line(&line, listener, reactor) {
                    logger.debug(Some("main::console"), &format!("command '{}' handled", line.trim()));
                    println!("{response}");
                }
            }
            Ok(ConsolePoll::Empty) | Ok(ConsolePoll::Closed) => return,
            Err(error) => {
                logger.warn(
                    Some("main::console"),
                    &format!("failed to read console input: {error}"),
                );
                return;
            }
        }
    }
}
