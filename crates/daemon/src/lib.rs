//! JXR Cleaner
//!
//! Background service that watches a capture folder for JPEG XR screenshots
//! and replaces each one with a JPEG (or an Ultra HDR JPEG for HDR captures)
//! while the machine is otherwise idle.

pub mod busy_gate;
pub mod context;
pub mod control_server;
pub mod convert;
pub mod daemon;
pub mod force_scan;
pub mod logging;
pub mod metrics;
pub mod queue;
pub mod readiness;
pub mod replace;
pub mod retry;
pub mod scan;
pub mod startup;
pub mod watcher;
pub mod worker;

pub use jxr_cleaner_config as config;
pub use jxr_cleaner_config::Config;
pub use busy_gate::{
    default_foreground_check, AnyForeground, BusyGate, BusySample, CpuSampler, ForegroundProbe,
    NotificationState,
};
pub use context::SchedulerContext;
pub use control_server::{create_control_router, run_control_server, ControlState, ServerError};
pub use convert::{
    ConvertError, ConvertReport, Converter, ImageKind, JxrCodec, JxrConverter, UltraHdrEncoder,
};
pub use daemon::{build_converter, convert_single, Daemon, DaemonError, RunOutcome};
pub use force_scan::force_scan;
pub use logging::init_logging;
pub use metrics::{ConversionStats, OutcomeCounters, StatusSnapshot};
pub use queue::WorkQueue;
pub use readiness::{wait_until_ready, ExclusiveOpenProbe, Readiness, ReadinessProbe};
pub use replace::{replace_with_output, ReplaceError, ReplaceOutcome};
pub use scan::{find_orphan_temps, scan_for_unconverted, ExtensionRule};
pub use startup::{run_startup_checks, StartupError};
pub use watcher::{watch_directory, DirectoryEventStream, NotifyEventStream, WatchError};
pub use worker::{ConversionOutcome, Worker, WorkerSettings};
