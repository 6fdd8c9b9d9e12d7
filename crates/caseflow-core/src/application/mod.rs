/// Process graph authoring service
pub mod definition_service;

/// Request execution service
pub mod execution_service;

/// Versioning and cloning service
pub mod versioning_service;

/// Import and export of process definitions
pub mod transfer;

/// Overdue action detection
pub mod timeout_sweep;
