use crate::prelude::*;
use crate::datalog_writer;
use crate::provider::Schueco;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Clone, Debug)]
pub enum ChannelData {
    Shutdown,
}

/// Drives the work cycles of every enabled inverter, one task each.
pub struct Scheduler {
    config: ConfigWrapper,
    channels: Channels,
    inverters: Vec<(config::Inverter, broadcast::Receiver<ChannelData>)>,
}

impl Scheduler {
    /// Subscribes to shutdown right away, so a shutdown sent before `start`
    /// is still seen.
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        let inverters = config
            .enabled_inverters()
            .into_iter()
            .map(|inverter| (inverter, channels.to_scheduler.subscribe()))
            .collect();

        Self {
            config,
            channels,
            inverters,
        }
    }

    /// Runs until shutdown. A failing inverter is logged and left behind; the
    /// others keep polling.
    pub async fn start(self) -> Result<()> {
        let interval = Duration::from_secs(self.config.interval_secs());

        let (names, handles): (Vec<_>, Vec<_>) = self
            .inverters
            .into_iter()
            .map(|(inverter, shutdown)| {
                let name = inverter.name().to_string();
                let channels = self.channels.clone();
                let handle = tokio::spawn(Self::run_inverter(inverter, interval, channels, shutdown));
                (name, handle)
            })
            .unzip();
        let results = futures::future::join_all(handles).await;

        let mut failed = 0;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("{}: stopped polling: {:#}", name, e);
                    failed += 1;
                }
                Err(e) => {
                    error!("{}: polling task aborted: {}", name, e);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            bail!("{} inverter(s) stopped polling early", failed);
        }
        Ok(())
    }

    async fn run_inverter(
        inverter: config::Inverter,
        period: Duration,
        channels: Channels,
        mut shutdown: broadcast::Receiver<ChannelData>,
    ) -> Result<()> {
        let name = inverter.name().to_string();

        let provider = Arc::new(Mutex::new(Schueco::new(inverter)?));

        let first_run = provider.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut provider = Self::lock(&first_run);
            provider.do_on_first_run()
        })
        .await
        .unwrap_or_else(|e| Err(anyhow!("first run aborted: {}", e)));
        if let Err(e) = result {
            warn!("{}: first run failed, will retry during the next cycle: {:#}", name, e);
        }

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("{}: polling every {}s", name, period.as_secs());

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {}
            }

            let worker = provider.clone();
            let result = tokio::task::spawn_blocking(move || {
                let mut provider = Self::lock(&worker);
                provider.run_cycle()
            })
            .await
            .unwrap_or_else(|e| Err(anyhow!("work cycle aborted: {}", e)));

            match result {
                Ok(cycle) => {
                    info!("{}: {:?}", name, cycle.variables);
                    let _ = channels
                        .to_datalog
                        .send(datalog_writer::ChannelData::Cycle(Box::new(cycle)));
                }
                // the next tick is the retry
                Err(e) => error!("{}: work cycle failed: {:#}", name, e),
            }
        }

        Self::lock(&provider).stats().print_summary(&name);
        Ok(())
    }

    // a cycle that panicked leaves nothing half written behind the lock
    fn lock(provider: &Mutex<Schueco>) -> MutexGuard<'_, Schueco> {
        provider.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> ConfigWrapper {
        ConfigWrapper::from_config(Config::from_yaml(yaml).unwrap())
    }

    #[tokio::test]
    async fn broken_inverter_does_not_stop_the_others() -> Result<()> {
        let config = config(
            r#"
inverters:
  - name: broken
    fields_file: /nonexistent/fields.json
    transport: { type: simulated }
  - name: dry-run
    transport: { type: simulated }
"#,
        );
        let channels = Channels::new();
        let mut datalog = channels.to_datalog.subscribe();

        let scheduler = Scheduler::new(config, channels.clone());
        let handle = tokio::spawn(scheduler.start());

        let cycle = tokio::time::timeout(Duration::from_secs(10), datalog.recv()).await??;
        match cycle {
            datalog_writer::ChannelData::Cycle(cycle) => {
                assert_eq!(cycle.inverter, "dry-run");
                assert_eq!(cycle.variables["wattleistung"], 398.0);
            }
            other => panic!("unexpected {:?}", other),
        }

        channels.to_scheduler.send(ChannelData::Shutdown)?;
        let result = tokio::time::timeout(Duration::from_secs(10), handle).await??;
        assert!(result.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn shutdown_before_start_is_not_lost() -> Result<()> {
        let config = config(
            r#"
interval_secs: 3600
inverters:
  - name: dry-run
    transport: { type: simulated }
"#,
        );
        let channels = Channels::new();

        let scheduler = Scheduler::new(config, channels.clone());
        channels.to_scheduler.send(ChannelData::Shutdown)?;

        tokio::time::timeout(Duration::from_secs(10), scheduler.start()).await??;

        Ok(())
    }
}
