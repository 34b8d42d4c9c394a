//! Self-care portal session
//!
//! `PortalSessionClient` is the only entry point: it logs in, scrapes the
//! dashboard, usage and billing pages, and reads the live speed feed. The
//! network sits behind the `Transport` trait so a session can run against
//! the real portal or an in-memory fake.

pub mod client;
pub mod speed;

#[cfg(test)]
pub(crate) mod fake;

pub use client::PortalSessionClient;
pub use speed::SampleWindow;
