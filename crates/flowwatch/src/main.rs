mod bootstrap;

use std::time::Duration;

use anyhow::{Context, Result};
use flowwatch_core::data_processors::RecordProcessor;
use flowwatch_core::formatting::{format_count, format_flow_line, format_stats};
use flowwatch_core::models::{MonitoringState, Phase};
use flowwatch_core::protocol::FlowInput;
use flowwatch_core::settings::Settings;
use flowwatch_data::filter::FlowFilter;
use flowwatch_runtime::control::InterfaceChange;
use flowwatch_runtime::orchestrator::{Dashboard, SessionConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load_with_last_used();
    settings.validate()?;

    bootstrap::ensure_directories()?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    tracing::info!("flowwatch v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("Server: {}, push: {}", settings.base_url(), settings.push_url());

    let config = SessionConfig::from(&settings);
    let dashboard = Dashboard::from_config(&config)?;

    match settings.command.as_str() {
        "watch" => run_watch(&dashboard, &settings).await?,

        "status" => {
            let state = dashboard.refresh_status().await?;
            print_status(&state);
        }

        "start" => {
            dashboard.refresh_status().await?;
            let message = dashboard.start().await?;
            println!("{message}");
        }

        "stop" => {
            dashboard.refresh_status().await?;
            let message = dashboard.stop().await?;
            println!("{message}");
        }

        "interface" => {
            // validate() guarantees the name is present.
            let name = settings.interface.as_deref().unwrap_or_default();
            dashboard.refresh_status().await?;
            match dashboard.change_interface(name).await? {
                InterfaceChange::Unchanged => println!("Already capturing on {name}"),
                InterfaceChange::Switched => println!("Interface set to {name}"),
                InterfaceChange::Restarted => println!("Capture restarted on {name}"),
            }
        }

        "history" => {
            let loaded = dashboard.reload_history().await?;
            let filter = FlowFilter::parse(&settings.filter);
            for event in dashboard.filtered(&filter) {
                println!("{}", format_flow_line(&event));
            }
            println!(
                "{} (loaded {} of at most {}, showing {} newest, filter {})",
                format_stats(&dashboard.stats()),
                format_count(loaded as u64),
                format_count(u64::from(dashboard.history_limit())),
                dashboard.view().len(),
                filter.label()
            );
        }

        "stats" => {
            let stats = dashboard.server_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        "predict" => {
            let raw = settings.flow.as_deref().unwrap_or_default();
            let input: FlowInput =
                serde_json::from_str(raw).context("--flow must be a JSON flow description")?;
            let prediction = dashboard.predict_flow(&input).await?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }

        unknown => {
            eprintln!("Unknown command: {}", unknown);
        }
    }

    Ok(())
}

/// Stream classified flows to stdout until Ctrl+C, with a periodic summary.
async fn run_watch(dashboard: &Dashboard, settings: &Settings) -> Result<()> {
    let filter = FlowFilter::parse(&settings.filter);
    tracing::info!(filter = filter.label(), "streaming flows");
    let printer = dashboard.subscribe(move |record| {
        let event = RecordProcessor::to_event(record.clone());
        if filter.matches(&event) {
            println!("{}", format_flow_line(&event));
        }
        Ok(())
    });
    tracing::debug!(subscriber = printer.id(), "flow printer registered");

    dashboard.init().await;
    print_summary(dashboard);

    let mut ticker = tokio::time::interval(Duration::from_secs(u64::from(settings.stats_interval)));
    // The first tick fires immediately; the summary was just printed.
    ticker.tick().await;

    let mut connection = dashboard.watch_connection();
    let mut monitoring = dashboard.watch_monitoring();
    let mut last_phase = dashboard.phase();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received; shutting down");
                break;
            }
            _ = ticker.tick() => print_summary(dashboard),
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                tracing::info!(%state, "push channel");
            }
            changed = monitoring.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = monitoring.borrow_and_update().clone();
                if state.phase != last_phase {
                    last_phase = state.phase;
                    match (&state.phase, &state.last_error) {
                        (Phase::Failed | Phase::Stopped, Some(error)) => {
                            tracing::warn!(phase = %state.phase, %error, "capture state changed");
                        }
                        _ => tracing::info!(phase = %state.phase, interface = %state.interface, "capture state changed"),
                    }
                }
            }
        }
    }

    printer.unsubscribe();
    dashboard.shutdown().await;
    Ok(())
}

fn print_summary(dashboard: &Dashboard) {
    let snapshot = dashboard.snapshot();
    let top = snapshot
        .summary
        .most_frequent
        .as_deref()
        .map(|label| format!(", top attack {label}"))
        .unwrap_or_default();
    let history = snapshot
        .history_age_secs
        .map(|secs| format!("{secs}s ago"))
        .unwrap_or_else(|| "never".to_string());
    println!(
        "-- {}{} | push {} | history {} | capture {} on {}",
        format_stats(&snapshot.stats),
        top,
        history,
        snapshot.connection,
        snapshot.monitoring.phase,
        if snapshot.monitoring.interface.is_empty() {
            "?"
        } else {
            snapshot.monitoring.interface.as_str()
        }
    );
}

fn print_status(state: &MonitoringState) {
    println!("capture:    {} on {}", state.phase, state.interface);
    let presence = match state.interface_exists {
        Some(true) => "present",
        Some(false) => "missing",
        None => "unknown",
    };
    println!(
        "interfaces: {} (selected {presence})",
        state.available_interfaces.join(", ")
    );
    println!(
        "flows:      {} active, {} packets captured, {} processed",
        format_count(state.active_flow_count),
        format_count(state.sniffer_stats.packet_count),
        format_count(state.sniffer_stats.processed_count)
    );
    if let Some(error) = state
        .sniffer_stats
        .last_error
        .as_deref()
        .or(state.last_error.as_deref())
    {
        println!("last error: {error}");
    }
}
