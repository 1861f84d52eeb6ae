//! Resumable, checkpointed processing of keyed work items.
//!
//! Some elements describe more work than one invocation should do:
//! reading a large file, backfilling a range, draining a partition.
//! This crate executes such elements incrementally. Each element
//! carries a *restriction* describing its remaining work; an attempt
//! may stop partway, persist the residual restriction in keyed state,
//! and be re-driven later by a timer, while a watermark hold keeps
//! downstream consumers from treating the element as finished early.
//!
//! Architecture
//! ------------
//!
//! Execution is built around two traits and one engine:
//! [`SplitLogic`], [`ProcessElementInvoker`], and
//! [`ResumableProcessor`].
//!
//! Impl [`SplitLogic`] to describe the actual work: how to build a
//! [`RestrictionTracker`] for a restriction, and how to claim and
//! emit through one bounded attempt. The [`ProcessElementInvoker`]
//! (usually [`CheckpointInvoker`]) runs one attempt and reports
//! whether a residual restriction is left over.
//!
//! [`ResumableProcessor::handle`] consumes [`WorkItem`]s. A work item
//! carries either the first (element, restriction) pair for an
//! element (the seed call) or a timer firing for an element seen
//! earlier, whose element and residual restriction are reconstructed
//! from the [`StateStore`]. After each attempt the processor either
//! clears all state for that (key, namespace) or persists the
//! residual, extends the watermark hold, and schedules exactly one
//! wake-up through the [`TimerService`].
//!
//! The state store and timer service are substrate contracts: this
//! crate ships in-memory implementations ([`InMemStateStore`],
//! [`InMemTimerService`]) suitable for tests and single-process runs,
//! and [`Driver`] as the matching single-worker delivery loop. Real
//! deployments bring their own substrate and must guarantee per-key
//! mutual exclusion and write-before-wake ordering; see
//! [`processor`].

pub mod driver;
pub mod errors;
pub mod invoker;
pub mod logic;
pub mod processor;
pub mod state;
pub mod timers;
pub mod window;
pub mod work_item;

pub use driver::Driver;
pub use errors::WorkError;
pub use invoker::CheckpointInvoker;
pub use invoker::InvokeResult;
pub use invoker::ProcessElementInvoker;
pub use logic::FinishBundleContext;
pub use logic::ProcessContext;
pub use logic::ProcessContinuation;
pub use logic::RestrictionTracker;
pub use logic::SplitLogic;
pub use logic::StartBundleContext;
pub use processor::Handled;
pub use processor::ResumableProcessor;
pub use processor::WorkFate;
pub use state::in_mem::InMemStateStore;
pub use state::StateBytes;
pub use state::StateCell;
pub use state::StateNamespace;
pub use state::StateStore;
pub use timers::in_mem::InMemTimerService;
pub use timers::TimeDomain;
pub use timers::TimerData;
pub use timers::TimerService;
pub use window::WindowKey;
pub use work_item::Element;
pub use work_item::Seed;
pub use work_item::StateKey;
pub use work_item::WorkItem;
