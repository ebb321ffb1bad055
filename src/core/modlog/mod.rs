// Modlog subsystem - moderation cases with optional timed expiry.

pub mod modlog_models;
pub mod modlog_service;

pub use modlog_models::{CaseAction, CaseEvent, ModlogCase, ModlogConfig};
pub use modlog_service::{CaseStore, ModlogConfigStore, ModlogError, ModlogService, OpenCase};
