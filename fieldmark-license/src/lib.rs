//! License runtime for Fieldmark.
//!
//! This crate decides whether a running installation is entitled to operate,
//! enforces concurrent-seat limits across a fleet of machines, and moves a
//! license safely between machines. It has three cooperating components,
//! driven independently by the host application:
//!
//! - [`GracePeriodTracker`] — bounded post-expiration grace window with
//!   escalating warnings before functionality is restricted
//! - [`SeatLeaseClient`] — acquire/heartbeat/release leasing of concurrent
//!   seats against the license server
//! - [`TransferCoordinator`] — single-use, time-boxed transfer tokens that
//!   move a license from one machine to another
//!
//! All three persist through [`SecureStateStore`] and talk to the server
//! through [`LicenseServerClient`]; none of them calls another. The host
//! subscribes to [`EventBus`] to render dialogs and status text — it never
//! mutates runtime state directly.
//!
//! # Design Principles
//!
//! - **Server-authoritative seats**: the client holds at most one session id
//!   and never second-guesses the server's seat accounting
//! - **Network failures are not verdicts**: a flaky network must never
//!   self-evict a legitimate user; only an explicit server rejection ends a
//!   lease
//! - **Corruption degrades, never crashes**: any unreadable local state loads
//!   as "not activated"

mod clock;
mod config;
mod error;
mod events;
mod grace;
mod identity;
mod seats;
mod server;
mod store;
mod transfer;

pub use clock::{ClockRatchet, DEFAULT_ROLLBACK_TOLERANCE_SECS};
pub use config::{
    GraceConfig, RuntimeConfig, SeatLeaseConfig, ServerConfig, StoreConfig, TransferConfig,
};
pub use error::{ErrorCode, ErrorSeverity, LicenseError, LicenseErrorInfo, LicenseResult};
pub use events::{EventBus, LicenseEvent};
pub use grace::{
    create_warning, GracePeriodRecord, GracePeriodTracker, GraceState, GraceWarning,
    WarningSeverity, DEFAULT_WARNING_THRESHOLDS,
};
pub use identity::{LicenseId, MachineIdentity};
pub use seats::{SeatAcquisition, SeatLeaseClient, SeatStatus, SeatUsageCache};
pub use server::{LicenseServerClient, SeatSessionInfo};
pub use store::{RecordKind, SecureStateStore};
pub use transfer::{CompletedTransfer, TransferCoordinator, TransferToken};
