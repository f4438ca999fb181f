//! Busy gate: decides whether the machine is too busy to start a conversion.
//!
//! The system counts as busy when an exclusive foreground application (a game
//! or a presentation) is running, or when CPU utilization sampled over a short
//! window exceeds the configured threshold. Both probes fail open: a signal
//! that cannot be queried never blocks work.

use async_trait::async_trait;
use jxr_cleaner_config::BusyGateConfig;
use std::ffi::OsStr;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tokio::time::Instant;
use tracing::debug;

/// Measures global CPU utilization over a window.
#[async_trait]
pub trait CpuSampler: Send + Sync {
    /// Utilization in percent (0-100), or `None` if it cannot be measured.
    async fn sample(&mut self, window: Duration) -> Option<f32>;
}

/// Detects an exclusive foreground application.
pub trait ForegroundProbe: Send + Sync {
    /// `Some(true)` if an exclusive app is active, `None` if the query failed.
    fn exclusive_app_active(&mut self) -> Option<bool>;
}

/// CPU sampler backed by sysinfo.
///
/// sysinfo computes usage from the difference between two refreshes, so a
/// sample refreshes, waits out the window, then refreshes again.
pub struct SysinfoCpuSampler {
    system: System,
}

impl SysinfoCpuSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoCpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CpuSampler for SysinfoCpuSampler {
    async fn sample(&mut self, window: Duration) -> Option<f32> {
        self.system.refresh_cpu_usage();
        tokio::time::sleep(window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)).await;
        self.system.refresh_cpu_usage();

        let usage = self.system.global_cpu_usage();
        usage.is_finite().then_some(usage)
    }
}

/// Foreground probe that looks for configured process names among running processes.
///
/// Matching is case-insensitive and ignores a trailing `.exe`.
pub struct ProcessListProbe {
    exclusive_apps: Vec<String>,
}

impl ProcessListProbe {
    pub fn new(exclusive_apps: &[String]) -> Self {
        Self {
            exclusive_apps: exclusive_apps.iter().map(|name| normalize_process_name(name)).collect(),
        }
    }
}

fn normalize_process_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

impl ForegroundProbe for ProcessListProbe {
    fn exclusive_app_active(&mut self) -> Option<bool> {
        if self.exclusive_apps.is_empty() {
            return Some(false);
        }

        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );
        if system.processes().is_empty() {
            return None;
        }

        let active = system.processes().values().any(|process| {
            let name: &OsStr = process.name().as_ref();
            let name = normalize_process_name(&name.to_string_lossy());
            self.exclusive_apps.iter().any(|app| *app == name)
        });
        Some(active)
    }
}

/// Shell notification state, as reported by `SHQueryUserNotificationState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationState {
    /// A full-screen application is in the foreground.
    Busy,
    /// A Direct3D exclusive-mode game is running.
    RunningD3dFullScreen,
    PresentationMode,
    /// Anything else: normal desktop, quiet time, notifications accepted.
    AcceptsNotifications,
}

impl NotificationState {
    /// Whether this state means the user must not be disturbed.
    pub fn is_exclusive(self) -> bool {
        matches!(
            self,
            Self::Busy | Self::RunningD3dFullScreen | Self::PresentationMode
        )
    }
}

/// Foreground check backed by the Windows shell notification state.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellNotificationCheck;

#[cfg(windows)]
impl ShellNotificationCheck {
    fn query() -> Option<NotificationState> {
        use windows::Win32::UI::Shell::{
            SHQueryUserNotificationState, QUNS_BUSY, QUNS_PRESENTATION_MODE,
            QUNS_RUNNING_D3D_FULL_SCREEN,
        };

        // SAFETY: takes no arguments and only reads shell state.
        let state = match unsafe { SHQueryUserNotificationState() } {
            Ok(state) => state,
            Err(e) => {
                debug!(error = %e, "cannot query notification state");
                return None;
            }
        };
        Some(if state == QUNS_BUSY {
            NotificationState::Busy
        } else if state == QUNS_RUNNING_D3D_FULL_SCREEN {
            NotificationState::RunningD3dFullScreen
        } else if state == QUNS_PRESENTATION_MODE {
            NotificationState::PresentationMode
        } else {
            NotificationState::AcceptsNotifications
        })
    }
}

#[cfg(windows)]
impl ForegroundProbe for ShellNotificationCheck {
    fn exclusive_app_active(&mut self) -> Option<bool> {
        Self::query().map(NotificationState::is_exclusive)
    }
}

/// Reports an exclusive app if any inner check does.
///
/// `None` only when every inner check failed.
pub struct AnyForeground {
    checks: Vec<Box<dyn ForegroundProbe>>,
}

impl AnyForeground {
    pub fn new(checks: Vec<Box<dyn ForegroundProbe>>) -> Self {
        Self { checks }
    }
}

impl ForegroundProbe for AnyForeground {
    fn exclusive_app_active(&mut self) -> Option<bool> {
        let mut answered = false;
        for check in &mut self.checks {
            match check.exclusive_app_active() {
                Some(true) => return Some(true),
                Some(false) => answered = true,
                None => {}
            }
        }
        answered.then_some(false)
    }
}

/// Foreground check for this platform.
///
/// On Windows the shell notification state is checked first, then the
/// configured process names. Elsewhere only the process names are checked.
pub fn default_foreground_check(config: &BusyGateConfig) -> Box<dyn ForegroundProbe> {
    let process_list: Box<dyn ForegroundProbe> =
        Box::new(ProcessListProbe::new(&config.exclusive_apps));

    #[cfg(windows)]
    {
        let checks: Vec<Box<dyn ForegroundProbe>> =
            vec![Box::new(ShellNotificationCheck), process_list];
        Box::new(AnyForeground::new(checks))
    }
    #[cfg(not(windows))]
    {
        process_list
    }
}

/// Result of one busy-gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusySample {
    pub exclusive_app: bool,
    pub cpu_percent: Option<f32>,
    pub busy: bool,
}

/// Busy gate owned by the conversion worker.
pub struct BusyGate {
    cpu: Box<dyn CpuSampler>,
    foreground: Box<dyn ForegroundProbe>,
    threshold_percent: f32,
    window: Duration,
    cached_cpu: Option<(Instant, Option<f32>)>,
    last: Option<BusySample>,
}

impl BusyGate {
    pub fn new(
        cpu: Box<dyn CpuSampler>,
        foreground: Box<dyn ForegroundProbe>,
        threshold_percent: f32,
        window: Duration,
    ) -> Self {
        Self {
            cpu,
            foreground,
            threshold_percent,
            window,
            cached_cpu: None,
            last: None,
        }
    }

    /// Gate using sysinfo for CPU and [`default_foreground_check`].
    pub fn from_config(config: &BusyGateConfig) -> Self {
        Self::new(
            Box::new(SysinfoCpuSampler::new()),
            default_foreground_check(config),
            config.cpu_threshold_percent,
            Duration::from_millis(config.sample_window_ms),
        )
    }

    /// Evaluate the gate.
    ///
    /// The exclusive-app check short-circuits CPU sampling. A CPU sample is
    /// reused until it is older than the sampling window.
    pub async fn check(&mut self) -> BusySample {
        let exclusive_app = self.foreground.exclusive_app_active().unwrap_or(false);

        let sample = if exclusive_app {
            BusySample {
                exclusive_app,
                cpu_percent: self.cached_cpu.and_then(|(_, cpu)| cpu),
                busy: true,
            }
        } else {
            let cpu_percent = self.cpu_percent().await;
            BusySample {
                exclusive_app,
                cpu_percent,
                busy: cpu_percent.is_some_and(|cpu| cpu > self.threshold_percent),
            }
        };

        debug!(
            exclusive_app = sample.exclusive_app,
            cpu_percent = ?sample.cpu_percent,
            busy = sample.busy,
            "busy gate evaluated"
        );
        self.last = Some(sample);
        sample
    }

    pub async fn is_busy(&mut self) -> bool {
        self.check().await.busy
    }

    /// Most recent evaluation, if any.
    pub fn last_sample(&self) -> Option<BusySample> {
        self.last
    }

    async fn cpu_percent(&mut self) -> Option<f32> {
        if let Some((taken, cpu)) = self.cached_cpu {
            if taken.elapsed() < self.window {
                return cpu;
            }
        }

        let cpu = self.cpu.sample(self.window).await;
        self.cached_cpu = Some((Instant::now(), cpu));
        cpu
    }
}
