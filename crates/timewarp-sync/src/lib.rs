//! # timewarp-sync: Synchronization core of Timewarp
//!
//! The sync core lets logical processes (LPs) execute events speculatively
//! while keeping the committed history causally consistent. It covers:
//!
//! - The LP execution/rollback state machine ([`lp`])
//! - Rendezvous-queue rollback and control antimessages ([`rollback`])
//! - The START/ACK/UNBLOCK/ROLLBACK rendezvous protocol ([`rendezvous`])
//! - Group synchronization with atomic vote counters ([`group`])
//!
//! ## Key Principles
//!
//! - **No IO**: transport and state saving are collaborators reached
//!   through [`Transport`] and [`CheckpointStore`]
//! - **No globals**: the "current LP / time" cursor lives in the
//!   [`ExecutionContext`] of the message being handled
//! - **Arenas, not pointers**: LPs and groups are addressed by id
//! - **Fail loudly**: protocol violations are [`SyncError`]s and halt the
//!   run; benign races become [`SyncEvent`] diagnostics
//!
//! ## Example
//!
//! ```ignore
//! use timewarp_sync::{ExecutionContext, FilterDecision, SyncConfig, SyncCore};
//!
//! let core = SyncCore::new(8, SyncConfig::default());
//! let mut ctx = ExecutionContext::new(&mut transport, &mut checkpoints);
//!
//! if core.receive_filter(&mut ctx, &msg)? == FilterDecision::Passthrough {
//!     // insert into the receiver's input queue
//! }
//! ```

pub mod context;
pub mod core;
pub mod error;
pub mod events;
pub mod group;
pub mod instrumentation;
pub mod lp;
pub mod message;
pub mod rendezvous;
pub mod rollback;


// Re-export commonly used items
pub use context::{CheckpointStore, Cursor, ExecutionContext, Transport};
pub use crate::core::{FilterDecision, SyncConfig, SyncCore};
pub use error::{Phase, Result, SyncError};
pub use events::SyncEvent;
pub use group::{Group, GroupState, GroupTable, SyncWindow};
pub use lp::{
    EcsTable, InputQueue, Insertion, LogicalProcess, LpState, LpTable, Removal, RendezvousQueue,
};
pub use message::{
    ControlType, MAX_CONTROL, MIN_CONTROL, MarkAllocator, Message, MessageKind, is_control,
};
