pub mod replay;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use replay::ReplayEngine;

#[cfg(feature = "backend-tract")]
pub use tract::TractEngine;
