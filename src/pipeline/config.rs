use std::time::Duration;

/// Per-run pipeline knobs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bound on the whole run, engine builds included
    pub timeout: Duration,
    /// Image tag; `None` derives `name:version` from the project
    pub tag: Option<String>,
    /// Stop after planning and simulation, never contact the engine
    pub simulate_only: bool,
    /// Inspect and verify the built image
    pub verify: bool,
    pub no_cache: bool,
    pub pull: bool,
    /// Dockerfile path inside the build context
    pub dockerfile_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(900),
            tag: None,
            simulate_only: false,
            verify: true,
            no_cache: false,
            pull: false,
            dockerfile_name: "Dockerfile".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_simulate_only(mut self, simulate_only: bool) -> Self {
        self.simulate_only = simulate_only;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn with_pull(mut self, pull: bool) -> Self {
        self.pull = pull;
        self
    }

    pub fn with_dockerfile_name(mut self, name: impl Into<String>) -> Self {
        self.dockerfile_name = name.into();
        self
    }
}
