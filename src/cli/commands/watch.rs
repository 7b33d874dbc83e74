//! `watch` command: run one monitor in the foreground until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cli::args::WatchArgs;
use crate::config::Settings;
use crate::monitor::{FileEvent, MonitorConfig, MonitorType};
use crate::server::{ChannelSubscriber, MonitorServer, Notification};

const CHANNEL_CAPACITY: usize = 64;

impl WatchArgs {
    fn to_monitor_config(&self) -> MonitorConfig {
        let monitor_type = if self.poll {
            MonitorType::Polling
        } else {
            MonitorType::Native
        };
        MonitorConfig::new(&self.path)
            .monitor_type(monitor_type)
            .path_mode(self.mode)
            .whitelist(self.whitelist.iter().cloned())
            .blacklist(self.blacklist.iter().cloned())
            .timeout(Duration::from_millis(self.timeout_ms.unwrap_or(0)))
            .block_size(self.block_size)
            .ignore_sys_files(!self.include_sys_files)
            .ignore_dir_events(!self.include_dir_events)
    }
}

pub async fn run(args: WatchArgs, settings: Settings) -> Result<()> {
    let server = MonitorServer::new(settings);
    let (subscriber, mut rx) = ChannelSubscriber::new(CHANNEL_CAPACITY);

    let id = server
        .create_monitor(args.to_monitor_config(), Arc::new(subscriber))
        .context("cannot watch directory")?;
    server.start_monitor(&id).await?;

    eprintln!(
        "Watching {} ({}), press Ctrl-C to stop",
        server.monitor_root(&id)?.display(),
        args.mode
    );

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            _ = &mut interrupted => break,
            received = rx.recv() => match received {
                Some(notification) => print_notification(&server, &notification, args.json),
                None => break,
            },
        }
    }

    server.shutdown().await;
    Ok(())
}

fn print_notification(server: &MonitorServer, notification: &Notification, json: bool) {
    for FileEvent { path, event_type } in &notification.events {
        if json {
            let line = serde_json::json!({
                "monitor": notification.monitor_id,
                "event": event_type,
                "path": path,
                "reference": server.file_reference(path).to_string(),
            });
            println!("{line}");
        } else {
            println!("{event_type}\t{}", path.display());
        }
    }
}
