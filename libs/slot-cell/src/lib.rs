pub mod handlers;
pub mod router;
pub mod models;
pub mod services;

// Re-export the engine surface for the binary and integration tests
pub use models::*;
pub use services::booking::SlotBookingService;
pub use services::engine::SlotEngine;
pub use services::generator::{plan_slots, SlotGeneratorService};
pub use services::reaper::StaleSlotReaper;
pub use services::store::{InMemorySlotStore, SlotStore};
