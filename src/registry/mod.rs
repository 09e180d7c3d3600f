//! The out-of-scope API Registry, modeled as a trait this crate consumes.
//!
//! The Registry's own persistence and business logic are not implemented
//! here — only the REST surface spec.md §6 names, as a client interface.

pub mod client;
pub mod model;

pub use client::{HttpRegistryClient, InMemoryRegistryClient, RegistryClient, RegistryClientError};
pub use model::{
    AccessRule, BucketState, ClientAccessConfig, ClientAccessSource, FilterSpec, KeyAuthType,
    KeyCredentials, KeyLocation, KeySourceType, PredicateSpec, PublicKeyRecord, PublicKeySource,
    RateLimitConfig, RouteChangeEvent, RouteChangeEventType, RouteDefinition,
};
