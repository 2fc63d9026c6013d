//! Remote classification of a single identifier.

pub mod backoff;
pub mod prober;
pub mod transport;
pub mod user_agents;

pub use backoff::RetryPolicy;
pub use prober::{Attempt, Outcome, ProbeError, Prober, ProberConfig, RetryableKind};
pub use transport::{ProbeRequest, ProbeResponse, ProbeTransport, ReqwestTransport, TransportError};
pub use user_agents::random_user_agent;
