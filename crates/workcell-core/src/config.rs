use serde::{Deserialize, Serialize};

/// Spawn-time configuration for the background thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Name given to the spawned OS thread.
    pub thread_name: String,
    /// Stack size in bytes; the platform default when absent.
    pub stack_size: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            thread_name: "workcell".to_string(),
            stack_size: None,
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
