// Application layer - use cases and orchestration.
// Clients (the CLI today) talk to `FinanceService`; it owns every unit of
// work and maps storage failures onto `AppError`.

pub mod error;
pub mod service;

pub use error::*;
pub use service::*;
