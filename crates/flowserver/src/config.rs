use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Runs executing at once from the queue
    pub workers: usize,
    /// Node fan-out ceiling per run
    pub max_parallel_nodes: usize,
    /// Queue journal and trigger state live here
    pub data_dir: PathBuf,
    pub scheduler_tick: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            workers: 4,
            max_parallel_nodes: 10,
            data_dir: PathBuf::from("./data"),
            scheduler_tick: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            workers: parse_var("FLOW_WORKERS")?.unwrap_or(defaults.workers),
            max_parallel_nodes: parse_var("FLOW_MAX_PARALLEL")?.unwrap_or(defaults.max_parallel_nodes),
            data_dir: std::env::var("FLOW_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            scheduler_tick: parse_var("FLOW_SCHEDULER_TICK_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.scheduler_tick),
        })
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queue.jsonl")
    }

    pub fn trigger_state_path(&self) -> PathBuf {
        self.data_dir.join("triggers.json")
    }
}

fn parse_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {}: '{}'", name, raw)),
        Err(_) => Ok(None),
    }
}
