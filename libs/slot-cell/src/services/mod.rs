pub mod booking;
pub mod conflict;
pub mod engine;
pub mod generator;
pub mod ledger;
pub mod lifecycle;
pub mod notification;
pub mod reaper;
pub mod retry;
pub mod store;
pub mod supabase_store;
pub mod suspension;
