use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use span_log::SeverityLevel;
use swarmsh_agents::BuiltinKind;
use swarmsh_autonomy::{DecisionThresholds, ExecutionPolicy};
use swarmsh_dispatch::{RetryPolicy, Route, RouteTable};
use swarmsh_window::{DetectorThresholds, WindowConfig};

/// Full coordinator configuration. Every section is optional.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Span log storage.
    pub log: LogSettings,
    /// Window sizing and cadence.
    pub window: WindowSettings,
    /// Pattern detector thresholds.
    pub detectors: DetectorThresholds,
    /// Decision engine rules and policy.
    pub decision: DecisionSettings,
    /// Remediation limits.
    pub remediation: RemediationSettings,
    /// Command dispatch.
    pub dispatch: DispatchSettings,
    /// Agents to run; one of each builtin kind when empty.
    pub agents: Vec<AgentSettings>,
    /// Component telemetry.
    pub telemetry: TelemetrySettings,
    source_dir: PathBuf,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from_document(ConfigDocument::default(), PathBuf::from("."))
    }
}

impl CoordinatorConfig {
    /// Loads and validates configuration from a TOML file. Relative paths
    /// resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading coordinator config {}", path.display()))?;
        let source_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&raw, source_dir).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and validates a TOML document.
    pub fn parse(raw: &str, source_dir: impl Into<PathBuf>) -> Result<Self> {
        let document: ConfigDocument = toml::from_str(raw)?;
        let config = Self::from_document(document, source_dir.into());
        config.validate()?;
        Ok(config)
    }

    fn from_document(document: ConfigDocument, source_dir: PathBuf) -> Self {
        let mut config = Self {
            log: document.log,
            window: document.window,
            detectors: document.detectors,
            decision: document.decision,
            remediation: document.remediation,
            dispatch: document.dispatch,
            agents: document.agents,
            telemetry: document.telemetry,
            source_dir,
        };
        if config.agents.is_empty() {
            config.agents = BuiltinKind::ALL
                .iter()
                .map(|kind| AgentSettings {
                    id: kind.label().to_owned(),
                    kind: *kind,
                })
                .collect();
        }
        let source_dir = &config.source_dir;
        let resolve = |path: Option<PathBuf>| path.map(|path| resolve_against(source_dir, path));
        config.log.path = resolve(config.log.path.take());
        config.log.snapshot_dir = resolve(config.log.snapshot_dir.take());
        config.dispatch.workspace_root = resolve(config.dispatch.workspace_root.take());
        config.telemetry.log_dir = resolve(config.telemetry.log_dir.take());
        config
    }

    fn validate(&self) -> Result<()> {
        if self.log.snapshot_dir.is_some() && self.log.path.is_none() {
            bail!("log.snapshot_dir requires log.path");
        }
        if self.window.horizon_secs == 0 {
            bail!("window.horizon_secs must be positive");
        }
        if self.window.capacity == 0 {
            bail!("window.capacity must be positive");
        }
        if self.window.tick_interval_secs == 0 {
            bail!("window.tick_interval_secs must be positive");
        }
        if !(self.detectors.error_rate > 0.0 && self.detectors.error_rate < 1.0) {
            bail!("detectors.error_rate must lie in (0, 1)");
        }
        let thresholds = &self.decision.thresholds;
        if thresholds.min_agents > thresholds.max_agents {
            bail!("decision.thresholds: min_agents > max_agents");
        }
        if thresholds.queue_busy > thresholds.max_queue_size {
            bail!("decision.thresholds: queue_busy > max_queue_size");
        }
        if thresholds.low_completion_rate > thresholds.high_completion_rate {
            bail!("decision.thresholds: low_completion_rate > high_completion_rate");
        }
        if !(0.0..=1.0).contains(&self.decision.policy.min_confidence) {
            bail!("decision.policy.min_confidence must lie in [0, 1]");
        }
        if self.decision.cycle_interval_secs == 0 {
            bail!("decision.cycle_interval_secs must be positive");
        }
        if self.decision.target.trim().is_empty() {
            bail!("decision.target must not be empty");
        }
        if self.remediation.max_concurrent == 0 {
            bail!("remediation.max_concurrent must be positive");
        }
        if self.remediation.min_agents > self.remediation.max_agents {
            bail!("remediation: min_agents > max_agents");
        }
        if self.dispatch.retry.max_attempts == 0 {
            bail!("dispatch.retry.max_attempts must be positive");
        }
        if self.dispatch.retry.multiplier < 1.0 {
            bail!("dispatch.retry.multiplier must be at least 1");
        }
        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                bail!("agent ids must not be empty");
            }
            if !seen.insert(agent.id.as_str()) {
                bail!("duplicate agent id `{}`", agent.id);
            }
        }
        for route in &self.dispatch.routes {
            if route.prefix.trim().is_empty() {
                bail!("dispatch route prefixes must not be empty");
            }
        }
        Ok(())
    }

    /// Resolves a path relative to the configuration file.
    #[must_use]
    pub fn resolve_path(&self, candidate: impl AsRef<Path>) -> PathBuf {
        resolve_against(&self.source_dir, candidate)
    }
}

fn resolve_against(dir: &Path, candidate: impl AsRef<Path>) -> PathBuf {
    let candidate = candidate.as_ref();
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        dir.join(candidate)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigDocument {
    #[serde(default)]
    log: LogSettings,
    #[serde(default)]
    window: WindowSettings,
    #[serde(default)]
    detectors: DetectorThresholds,
    #[serde(default)]
    decision: DecisionSettings,
    #[serde(default)]
    remediation: RemediationSettings,
    #[serde(default)]
    dispatch: DispatchSettings,
    #[serde(default)]
    agents: Vec<AgentSettings>,
    #[serde(default)]
    telemetry: TelemetrySettings,
}

/// Where spans live.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSettings {
    /// JSON-lines file backing the log; in-memory when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Directory for agent snapshots; agents replay from the start when absent.
    /// Only valid together with `path`.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

/// Window sizing in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowSettings {
    /// How far back the window reaches.
    #[serde(default = "default_horizon_secs")]
    pub horizon_secs: u64,
    /// Maximum buffered spans.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Period between ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            horizon_secs: default_horizon_secs(),
            capacity: default_capacity(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

impl WindowSettings {
    /// Processor configuration.
    #[must_use]
    pub const fn to_config(&self) -> WindowConfig {
        WindowConfig {
            horizon: Duration::from_secs(self.horizon_secs),
            capacity: self.capacity,
            tick_interval: Duration::from_secs(self.tick_interval_secs),
        }
    }
}

/// Decision engine settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionSettings {
    /// Rule thresholds.
    #[serde(default)]
    pub thresholds: DecisionThresholds,
    /// Per-cycle execution policy.
    #[serde(default)]
    pub policy: ExecutionPolicy,
    /// Seconds between cycles.
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    /// Seconds since last activity for a registered agent to count as active.
    #[serde(default = "default_active_within_secs")]
    pub active_within_secs: i64,
    /// Remediation target decisions act on.
    #[serde(default = "default_target")]
    pub target: String,
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            thresholds: DecisionThresholds::default(),
            policy: ExecutionPolicy::default(),
            cycle_interval_secs: default_cycle_interval_secs(),
            active_within_secs: default_active_within_secs(),
            target: default_target(),
        }
    }
}

/// Remediation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RemediationSettings {
    /// Actions allowed to run at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Record actions without applying them.
    #[serde(default)]
    pub dry_run: bool,
    /// Alerts at or above this level are remediated directly.
    #[serde(default = "default_alert_level")]
    pub alert_min_level: SeverityLevel,
    /// Starting agent count of the managed target.
    #[serde(default = "default_initial_agents")]
    pub initial_agents: u32,
    /// Lower bound enforced on scaling.
    #[serde(default = "default_min_agents")]
    pub min_agents: u32,
    /// Upper bound enforced on scaling.
    #[serde(default = "default_max_agents")]
    pub max_agents: u32,
}

impl Default for RemediationSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            dry_run: false,
            alert_min_level: default_alert_level(),
            initial_agents: default_initial_agents(),
            min_agents: default_min_agents(),
            max_agents: default_max_agents(),
        }
    }
}

/// Command dispatch settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSettings {
    /// Default per-call timeout for external programs.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub timeout_ms: u64,
    /// Root of per-agent workspaces for external programs.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Retry schedule.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Routes added on top of the `swarmsh` span route.
    #[serde(default)]
    pub routes: Vec<RouteSettings>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_dispatch_timeout_ms(),
            workspace_root: None,
            retry: RetrySettings::default(),
            routes: Vec::new(),
        }
    }
}

impl DispatchSettings {
    /// Route table: the `swarmsh` span route plus configured routes.
    #[must_use]
    pub fn route_table(&self) -> RouteTable {
        let mut table = RouteTable::swarmsh_default();
        for route in &self.routes {
            table.insert(route.prefix.clone(), route.route.clone());
        }
        table
    }
}

/// Retry schedule in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on any delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Growth factor between delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetrySettings {
    /// Dispatcher retry policy.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
        }
    }
}

/// One `[[dispatch.routes]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteSettings {
    /// Target prefix the route applies to.
    pub prefix: String,
    /// How matching targets are carried out.
    #[serde(flatten)]
    pub route: Route,
}

/// One `[[agents]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    /// Unique agent id.
    pub id: String,
    /// Builtin family.
    pub kind: BuiltinKind,
}

/// Component telemetry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    /// Directory of per-component JSON-lines logs; disabled when absent.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Append component spans (`swarmsh.window.*`, `swarmsh.decision.*`, ...) to the log.
    #[serde(default = "default_true")]
    pub emit_spans: bool,
    /// Alerts retained for status queries.
    #[serde(default = "default_alert_backlog")]
    pub alert_backlog: usize,
    /// Emit `tracing` output as JSON lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_dir: None,
            emit_spans: true,
            alert_backlog: default_alert_backlog(),
            json: false,
        }
    }
}

const fn default_horizon_secs() -> u64 {
    60
}

const fn default_capacity() -> usize {
    10_000
}

const fn default_tick_interval_secs() -> u64 {
    10
}

const fn default_cycle_interval_secs() -> u64 {
    30
}

const fn default_active_within_secs() -> i64 {
    300
}

fn default_target() -> String {
    "swarm".into()
}

const fn default_max_concurrent() -> usize {
    swarmsh_remediation::DEFAULT_MAX_CONCURRENT
}

const fn default_alert_level() -> SeverityLevel {
    SeverityLevel::Critical
}

const fn default_initial_agents() -> u32 {
    2
}

const fn default_min_agents() -> u32 {
    1
}

const fn default_max_agents() -> u32 {
    16
}

const fn default_dispatch_timeout_ms() -> u64 {
    30_000
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    100
}

const fn default_max_backoff_ms() -> u64 {
    5_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_true() -> bool {
    true
}

const fn default_alert_backlog() -> usize {
    256
}
