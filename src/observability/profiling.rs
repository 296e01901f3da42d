//! CPU profiling collector.
//!
//! `profile.mode = "cpu"` samples the process with `pprof` and writes a
//! flame graph to `<profile.path>/cpu.svg` when stopped. Requires the
//! `profiling` cargo feature.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ProfileConfig;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("unsupported profile mode {0:?}")]
    UnsupportedMode(String),

    #[error("cpu profiling needs the `profiling` feature")]
    FeatureDisabled,

    #[error("profiler: {0}")]
    Profiler(String),

    #[error("writing {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct Profiler {
    #[cfg(feature = "profiling")]
    dir: PathBuf,
    #[cfg(feature = "profiling")]
    guard: pprof::ProfilerGuard<'static>,
}

impl Profiler {
    /// Start the configured collector, if any.
    pub fn start(config: &ProfileConfig) -> Result<Option<Profiler>, ProfileError> {
        match config.mode.as_str() {
            "" => Ok(None),
            "cpu" => Self::start_cpu(PathBuf::from(&config.path)).map(Some),
            other => Err(ProfileError::UnsupportedMode(other.to_string())),
        }
    }

    #[cfg(feature = "profiling")]
    fn start_cpu(dir: PathBuf) -> Result<Self, ProfileError> {
        let guard = pprof::ProfilerGuardBuilder::default()
            .frequency(100)
            .blocklist(&["libc", "libgcc", "pthread", "vdso"])
            .build()
            .map_err(|e| ProfileError::Profiler(e.to_string()))?;
        tracing::info!(dir = ?dir, "cpu profiling started");
        Ok(Self { dir, guard })
    }

    #[cfg(not(feature = "profiling"))]
    fn start_cpu(_dir: PathBuf) -> Result<Self, ProfileError> {
        Err(ProfileError::FeatureDisabled)
    }

    /// Stop sampling and write the output. Returns the written file.
    #[cfg(feature = "profiling")]
    pub fn stop(self) -> Result<PathBuf, ProfileError> {
        let report = self
            .guard
            .report()
            .build()
            .map_err(|e| ProfileError::Profiler(e.to_string()))?;
        let out = self.dir.join("cpu.svg");
        let write_err = |source| ProfileError::Write {
            path: out.display().to_string(),
            source,
        };
        let file = std::fs::File::create(&out).map_err(write_err)?;
        report
            .flamegraph(file)
            .map_err(|e| ProfileError::Profiler(e.to_string()))?;
        tracing::info!(path = ?out, "cpu profile written");
        Ok(out)
    }

    #[cfg(not(feature = "profiling"))]
    pub fn stop(self) -> Result<PathBuf, ProfileError> {
        Err(ProfileError::FeatureDisabled)
    }
}
