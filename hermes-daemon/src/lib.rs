//! Hermes daemon: lifecycle supervisor, both sync cadences, and the control
//! socket.

pub mod bus;
pub mod cadence;
pub mod critical;
mod error;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod service;
pub mod supervisor;

pub use bus::EventBus;
pub use cadence::CadenceController;
pub use critical::{
    CriticalScheduler, ScheduledTimer, SchedulingDenied, TimerMode, TokioWakeTimer, WakeTimer,
};
pub use error::DaemonError;
pub use protocol::{
    request_action, request_shutdown, request_status, send_request, subscribe, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{init_tracing, run, start_blocking, DaemonOptions, DaemonState};
pub use service::{
    generate_plist, generate_systemd_unit, install as install_service,
    uninstall as uninstall_service,
};
pub use supervisor::{LifecycleState, Supervisor, SupervisorStatus};
