//! Route-change propagation: the Event Subscriber (C13), Fallback
//! Scheduler (C14), and Registry Event Publisher (C15). Together these
//! carry a Registry mutation to every Gateway replica's Route Table (C11)
//! without requiring every replica to poll the Registry directly
//! (spec.md §2's "Registry mutation → C15 (debounce) → pub/sub → C13 →
//! C12 → C11 swap").

pub mod fallback;
pub mod publisher;
pub mod subscriber;

pub use fallback::FallbackScheduler;
pub use publisher::EventPublisher;
pub use subscriber::EventSubscriber;
