// src/jobs/mod.rs
//! Background work that runs outside the request path: the periodic chat
//! cleanup and fire-and-forget welcome emails.

pub mod cleanup;
pub mod email;

pub use cleanup::{delete_old_chats, start_cleanup_scheduler};
pub use email::run_email_background;
