//! Application wiring and lifecycle

pub mod app;
pub mod retention;

pub use app::Application;
pub use retention::RetentionTask;
