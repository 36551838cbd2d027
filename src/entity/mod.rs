// Database entities
// Read-only SeaORM projections of the platform tables the accounting core
// aggregates over

pub mod organization;
pub mod sandbox;
pub mod snapshot;
pub mod volume;
