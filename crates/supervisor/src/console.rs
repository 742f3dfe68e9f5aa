//! Optional administrator-facing stdin command loop. A thin surface over
//! the same start/stop/restart operations the health loop uses, plus
//! `quit`, which drives the same shutdown ordering as a termination
//! signal.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use token_store::Severity;

use crate::process::{spawn_bot, spawn_hub, wait_for_hub_socket};
use crate::state::{Fleet, TrackedProcess};

pub async fn run(fleet: Arc<Fleet>, config_path: PathBuf) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        let line = tokio::select! {
            _ = fleet.shutdown.cancelled() => return,
            line = lines.next_line() => line,
        };
        let Ok(Some(line)) = line else { return };
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else { continue };
        let arg = parts.next().map(str::to_string);

        match command {
            "status" => print_status(&fleet).await,
            "start" => {
                if let Some(channel) = arg {
                    start_bot(&fleet, &config_path, &channel).await;
                } else {
                    println!("usage: start <channel>");
                }
            }
            "stop" => {
                if let Some(channel) = arg {
                    stop_bot(&fleet, &channel).await;
                } else {
                    println!("usage: stop <channel>");
                }
            }
            "restart" => {
                if let Some(channel) = arg {
                    stop_bot(&fleet, &channel).await;
                    start_bot(&fleet, &config_path, &channel).await;
                } else {
                    println!("usage: restart <channel>");
                }
            }
            "restart-hub" => restart_hub(&fleet, &config_path).await,
            "stop-all" => {
                let channels: Vec<String> = fleet.bots.lock().await.keys().cloned().collect();
                for channel in channels {
                    stop_bot(&fleet, &channel).await;
                }
            }
            "quit" => {
                fleet.shutdown.cancel();
                return;
            }
            "" => {}
            other => println!("unknown command: {other} (try: status, start, stop, restart, restart-hub, stop-all, quit)"),
        }
    }
}

async fn print_status(fleet: &Arc<Fleet>) {
    let hub_running = fleet.hub.lock().await.is_some();
    println!("hub: {}", if hub_running { "running" } else { "stopped" });
    for (channel, tracked) in fleet.bots.lock().await.iter() {
        let state = if tracked.is_held() { "held (crash budget exceeded)" } else { "running" };
        println!("bot[{channel}]: {state}, restarts={}", tracked.restart_count());
    }
}

async fn start_bot(fleet: &Arc<Fleet>, config_path: &PathBuf, channel: &str) {
    if fleet.bots.lock().await.contains_key(channel) {
        println!("{channel} is already tracked");
        return;
    }
    match spawn_bot(config_path, channel) {
        Ok(child) => {
            fleet.bots.lock().await.insert(channel.to_string(), TrackedProcess::new(child));
            let _ = fleet.db.audit(Severity::Info, Some(channel), "bot started from console");
        }
        Err(e) => println!("failed to start {channel}: {e}"),
    }
}

async fn stop_bot(fleet: &Arc<Fleet>, channel: &str) {
    let mut guard = fleet.bots.lock().await;
    if let Some(mut tracked) = guard.remove(channel) {
        let _ = tracked.child.kill().await;
        let _ = fleet.db.audit(Severity::Info, Some(channel), "bot stopped from console");
    } else {
        println!("{channel} is not tracked");
    }
}

async fn restart_hub(fleet: &Arc<Fleet>, config_path: &PathBuf) {
    {
        let mut guard = fleet.hub.lock().await;
        if let Some(mut tracked) = guard.take() {
            let _ = tracked.child.kill().await;
        }
    }
    match spawn_hub(config_path) {
        Ok(child) => {
            if !wait_for_hub_socket(&fleet.config.hub.socket_path).await {
                println!("hub restarted but its IPC socket did not come up in time");
            }
            *fleet.hub.lock().await = Some(TrackedProcess::new(child));
            let _ = fleet.db.audit(Severity::Info, None, "hub restarted from console");
        }
        Err(e) => println!("failed to restart hub: {e}"),
    }
}
