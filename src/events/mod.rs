pub mod gate;
pub mod policy;
pub mod publisher;
pub mod transport;

// Re-export key types for convenience
pub use gate::{GateStats, SubscriptionGate, SubscriptionValidation};
pub use policy::{
    CallerContext, PolicyHandler, RecordingPolicyHandler, Severity, SubscriberClass, Violation,
    ViolationKind,
};
pub use publisher::{EventPublisher, PublishedEvent};
pub use transport::{
    EventCallback, EventTransport, LocalEventBus, SubscriberError, SubscriptionId,
    TransportDebugInfo,
};
