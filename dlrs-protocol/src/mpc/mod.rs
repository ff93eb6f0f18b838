//! Two-party computation between seed owners
//!
//! A compatibility or collaboration proof over seeds held by different
//! nodes is produced by a session in which neither owner learns the other's
//! opening. The result is the same proof object a single owner would produce.

mod dealer;
mod messages;
mod session;

pub use dealer::{share_digest, Dealer, InnerProductShare, Role, SessionRandomness, ShareEscrow};
pub use messages::SessionMessage;
pub use session::{initiate, respond, Canceller, Link, SessionOutcome};
