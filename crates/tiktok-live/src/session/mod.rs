//! Monitoring session lifecycle.
//!
//! One session at most is Connecting or Active. The [`SessionController`]
//! serializes start/stop/reset through a command queue; each started session
//! gets a runner task that owns the live connection and feeds events through
//! the normalizer to the outbound channel.
//!
//! ```text
//! Idle ──start──▶ Connecting ──connect event──▶ Active
//!  ▲                  │                           │
//!  │             connect error          stop / stream end / feed loss
//!  └──────────────────┴──────── Stopping ◀────────┘
//! ```

mod controller;
mod runner;
mod state;

pub use controller::{Ack, SessionConfig, SessionController, SessionDeps, normalize_account_id};
pub use state::{Session, SessionState};
