// Data models module
// This module contains the quota kinds, state machines, events and DTOs
// shared across the accounting core

pub mod event; // Lifecycle events and usage projections
pub mod quota; // Quota kinds, families and overview DTOs
pub mod state; // Entity states, consume-sets and delta arithmetic
