//! Synchronous client for a CKAN-style open-data catalogue's action API.
//!
//! # Overview
//! Exposes one typed operation per remote action (show/create/delete/search
//! for datasets, resources, and groups, plus datastore create/upsert with a
//! caller-supplied retry budget). Every call POSTs to
//! `<host>:<port>/api/action/<name>`, decodes the `{success, result,
//! error}` envelope, and returns either the typed payload or a structured
//! [`CkanError`] carrying the action label and the server's per-field
//! messages.
//!
//! # Design
//! - `Client` is stateless between calls; the only session state is the
//!   connection config and its API key, owned by exactly one client.
//! - All I/O is blocking and synchronous; each call opens and tears down
//!   its own HTTP connection.
//! - The I/O seam is the `Transport` trait, so operations are testable
//!   against scripted responses; integration tests run against a live mock
//!   server over real HTTP.
//! - Failure responses come in two shapes (JSON envelope, bare HTML fault
//!   page) and are interpreted into one error type; see `error`.

pub mod client;
pub mod connection;
pub mod error;
pub mod types;

pub use client::Client;
pub use connection::{Connection, Transport};
pub use error::{ActionError, CkanError};
pub use types::{
    slugify, DataStore, Dataset, Field, Group, Record, Resource, SearchResults, WriteMethod,
};
