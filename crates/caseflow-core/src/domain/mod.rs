/// Process graph domain models
pub mod process;

/// Field and form domain models
pub mod fields;

/// Running request domain models
pub mod request;

/// Transition history
pub mod history;

/// Domain events
pub mod events;

/// Repository interfaces
pub mod repository;
