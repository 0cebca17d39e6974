pub mod admission;
pub mod dedupe;
pub mod pairing;
pub mod policy;

pub use admission::{AdmissionContext, AdmissionController, AdmissionDecision};
pub use dedupe::DedupeSet;
pub use pairing::PairingOutcome;
pub use policy::{DmDecision, Denial};
