//! Cycle collection across a tracing GC heap and a reference-counted native
//! object graph.
//!
//! Native objects that own GC references register as holders. The GC engine
//! traces them as black or gray roots through a [`CollectorContext`], the
//! cycle collector reads the combined graph through the traversal entry
//! points, and native destruction that is unsafe inside GC callbacks is
//! deferred to a finalization queue.
//!
//! ```
//! use std::sync::Arc;
//! use ccbridge::test_utils::{MockEngine, RecordingTracer, TestHolder};
//! use ccbridge::{BridgeConfig, ChannelScheduler, CollectorContext, HolderId, SliceBudget};
//!
//! let scheduler = Arc::new(ChannelScheduler::new());
//! let mut cx = CollectorContext::new(BridgeConfig::default(), scheduler);
//! let engine = MockEngine::new();
//!
//! let holders = Arc::new(TestHolder::multi_zone("Node"));
//! cx.add_holder(HolderId(1), holders.clone(), None)?;
//!
//! let mut tracer = RecordingTracer::marking();
//! assert!(cx.trace_gray_roots(&engine, &mut tracer, &mut SliceBudget::unlimited()));
//! assert_eq!(holders.traced(), vec![HolderId(1)]);
//!
//! cx.remove_holder(HolderId(1));
//! cx.shutdown(&engine);
//! # Ok::<(), ccbridge::BridgeError>(())
//! ```

pub mod budget;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod finalization;
pub mod holders;
pub mod lifecycle;
pub mod roots;
pub mod test_utils;
pub mod traversal;
pub mod types;
pub mod weak_maps;

pub use budget::SliceBudget;
pub use config::{BridgeConfig, SingleZoneCheck};
pub use context::{CollectorContext, NoHooks, RuntimeHooks};
pub use engine::{
    FnTracer, GcEngine, GcReason, GcStatus, NativeSlot, ObjectDescription, Participant, Tracer, WeakMapEntry,
};
pub use error::{BridgeError, BridgeResult};
pub use finalization::{
    ChannelScheduler, DeferredFinalizationQueue, DeferredFinalizeType, DropBatch, FinalizeGroup, FinalizeTask,
    FinalizationStats, Progress, Scheduler,
};
pub use holders::{HolderKey, HolderRegistry, HolderTracer, TracerRef, WhichHolders};
pub use lifecycle::{OomKind, OomState};
pub use roots::{BlackRootSource, RootTracingDispatcher};
pub use traversal::{
    CcNode, GraphTraversal, NativeChildren, NoteRootCallback, TraversalCallback, TraversalFlags, TraverseSelect,
};
pub use types::{CellColor, CellId, GcCell, HolderId, NativeRef, TraceKind, ZoneId};
