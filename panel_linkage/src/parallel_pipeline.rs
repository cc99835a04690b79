// THEORY:
// Frames inside one session must be linked strictly in order, because identity
// decisions for frame N depend on every panel seen in frames before it. Separate
// videos share nothing, so the only safe place to parallelise is the session
// boundary. `InspectionBatch` runs each video as its own session on a blocking
// worker, bounded by the number of CPUs, and reports one result per video.

use crate::error::Error;
use crate::pipeline::{InspectionConfig, SessionSummary, run_video_session};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

/// One video's pair of detector label directories.
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub name: String,
    pub panel_dir: PathBuf,
    pub anomaly_dir: PathBuf,
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub name: String,
    pub result: crate::error::Result<SessionSummary>,
}

pub struct InspectionBatch {
    config: Arc<InspectionConfig>,
    max_concurrent_sessions: usize,
}

impl InspectionBatch {
    pub fn new(config: InspectionConfig) -> Self {
        Self {
            config: Arc::new(config),
            max_concurrent_sessions: num_cpus::get().max(1),
        }
    }

    pub fn with_max_concurrent_sessions(mut self, sessions: usize) -> Self {
        self.max_concurrent_sessions = sessions.max(1);
        self
    }

    /// Runs every job in its own session. Outcomes come back in job order and a
    /// failed video does not affect the others.
    pub async fn run(&self, jobs: Vec<VideoJob>) -> Vec<SessionOutcome> {
        info!(
            videos = jobs.len(),
            workers = self.max_concurrent_sessions,
            "starting inspection batch"
        );
        let permits = Arc::new(Semaphore::new(self.max_concurrent_sessions));

        let sessions = jobs.into_iter().map(|job| {
            let permits = Arc::clone(&permits);
            let config = Arc::clone(&self.config);
            async move {
                let name = job.name.clone();
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return SessionOutcome {
                            name,
                            result: Err(Error::Task(e.to_string())),
                        };
                    }
                };

                let worker = tokio::task::spawn_blocking(move || {
                    run_video_session(&config, &job.panel_dir, &job.anomaly_dir)
                });
                let result = match worker.await {
                    Ok(result) => result,
                    Err(e) => Err(Error::Task(e.to_string())),
                };
                if let Err(e) = &result {
                    error!(video = %name, "inspection session failed: {e}");
                }
                SessionOutcome { name, result }
            }
        });

        join_all(sessions).await
    }
}
