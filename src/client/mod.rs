//! Client-side prediction, interpolation and rollback
//!
//! Nothing here touches the network or a renderer; [`ClientSession`] is fed
//! local inputs, server messages and frame timestamps and hands back what to
//! send and what to draw.

pub mod interpolation;
pub mod prediction;
pub mod rollback;
pub mod session;

pub use interpolation::{DisplayState, Easing, InterpolationService};
pub use prediction::{PredictionEngine, PredictiveGameState};
pub use rollback::{RollbackEvent, RollbackManager, RollbackOutcome};
pub use session::ClientSession;
