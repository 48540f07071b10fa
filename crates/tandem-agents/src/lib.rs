//! Persona management for the Tandem voice platform.
//!
//! Holds the two persona records (Bob the intake planner, Alice the
//! technical specialist), detects explicit transfer requests in user
//! utterances, and assembles the message list sent to the language model,
//! including the one-turn handoff note that lets the incoming persona pick
//! up mid-conversation without the user repeating themselves.

mod manager;
mod personas;
mod router;

pub use manager::{AgentManager, HandoffNote};
pub use personas::Persona;
pub use router::TransferRouter;
