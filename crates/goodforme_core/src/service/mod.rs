//! Core use-case services.
//!
//! # Responsibility
//! - Cache and fan out observed changes to presentation subscribers.
//! - Keep presentation callers decoupled from storage details.

pub mod activity_service;
pub mod data_service;
pub mod presentation;
pub mod subscription;
