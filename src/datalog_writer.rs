use crate::prelude::*;
use crate::provider::CycleResult;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
pub enum ChannelData {
    Cycle(Box<CycleResult>),
    Shutdown,
}

/// Appends every published work cycle to a file, one JSON object per line.
#[derive(Debug, Clone)]
pub struct DatalogWriter {
    file: Arc<Mutex<std::fs::File>>,
    path: String,
    records_written: Arc<Mutex<u64>>,
}

impl DatalogWriter {
    pub fn new(path: &str) -> Result<Self> {
        info!("Opening datalog file at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| file_error_with_source!(e, "Failed to open datalog file {}", path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
                error!("Failed to set permissions on datalog file {}: {}", path, e);
                return Err(e.into());
            }
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_string(),
            records_written: Arc::new(Mutex::new(0)),
        })
    }

    /// Consumes cycles from `receiver` until shutdown. The receiver is taken
    /// from the caller so nothing sent before the task runs is missed.
    pub async fn start(&self, mut receiver: broadcast::Receiver<ChannelData>) -> Result<()> {
        debug!("datalog writer starting");

        loop {
            match receiver.recv().await {
                Ok(ChannelData::Cycle(cycle)) => {
                    if let Err(e) = self.write_cycle(&cycle) {
                        error!("datalog: {}", e);
                    }
                }
                Ok(ChannelData::Shutdown) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("datalog writer lagging, {} cycles dropped", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        Ok(())
    }

    pub fn write_cycle(&self, cycle: &CycleResult) -> Result<()> {
        let json_string = serde_json::to_string(cycle)?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("Failed to lock datalog file"))?;
        writeln!(file, "{}", json_string)
            .and_then(|_| file.flush())
            .map_err(|e| file_error_with_source!(e, "Failed to write to datalog file {}", self.path))?;

        let mut records_written = self
            .records_written
            .lock()
            .map_err(|_| anyhow!("Failed to lock records counter"))?;
        *records_written += 1;
        debug!("Total records stored in datalog file: {}", *records_written);

        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.lock().map(|n| *n).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn cycle() -> CycleResult {
        let mut variables = Variables::new();
        variables.insert("wattleistung".to_string(), 398.0);
        variables.insert("netzspannung".to_string(), 229.2);

        CycleResult {
            utc_timestamp: 1_700_000_000,
            inverter: "roof".to_string(),
            model: Some("SG3502".to_string()),
            variables,
        }
    }

    #[test]
    fn test_write_cycle() -> Result<()> {
        let temp_file = NamedTempFile::new()?;
        let writer = DatalogWriter::new(temp_file.path().to_str().unwrap())?;

        writer.write_cycle(&cycle())?;

        let contents = std::fs::read_to_string(temp_file.path())?;
        let json: serde_json::Value = serde_json::from_str(&contents)?;

        assert_eq!(json["utc_timestamp"], 1_700_000_000);
        assert_eq!(json["inverter"], "roof");
        assert_eq!(json["model"], "SG3502");
        assert_eq!(json["variables"]["wattleistung"], 398.0);
        assert_eq!(json["variables"]["netzspannung"], 229.2);
        assert_eq!(writer.records_written(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_start_sees_messages_sent_before_it_runs() -> Result<()> {
        let temp_file = NamedTempFile::new()?;
        let writer = DatalogWriter::new(temp_file.path().to_str().unwrap())?;
        let channels = Channels::new();
        let receiver = channels.to_datalog.subscribe();

        channels.to_datalog.send(ChannelData::Cycle(Box::new(cycle())))?;
        channels.to_datalog.send(ChannelData::Shutdown)?;

        tokio::time::timeout(std::time::Duration::from_secs(10), writer.start(receiver)).await??;

        assert_eq!(writer.records_written(), 1);
        Ok(())
    }

    #[test]
    fn test_appends_one_line_per_cycle() -> Result<()> {
        let temp_file = NamedTempFile::new()?;
        let writer = DatalogWriter::new(temp_file.path().to_str().unwrap())?;

        writer.write_cycle(&cycle())?;
        writer.write_cycle(&cycle())?;

        let contents = std::fs::read_to_string(temp_file.path())?;
        assert_eq!(contents.lines().count(), 2);
        for line in contents.lines() {
            let json: serde_json::Value = serde_json::from_str(line)?;
            assert_eq!(json["inverter"], "roof");
        }

        Ok(())
    }
}
