//! Listing queries and aggregation for Homebase Finder.
//!
//! Listings and their units are stored separately. A page of results is
//! built by running the cheap listing predicates in the database, joining
//! each listing with its units and then applying the unit and text
//! predicates in memory.

pub mod aggregate;
pub mod compose;
pub mod config;
pub mod context;
pub mod cursor;
pub mod db;
pub mod environment;
pub mod errors;
pub mod gateway;
pub mod legacy;
pub mod listing;
pub mod normalization;
pub mod reference;
pub mod store;

pub use compose::{FilterRequest, PriceRange};
pub use context::Failure;
pub use cursor::{fetch_page, Cursor, Page};
pub use environment::Environment;
pub use errors::{ListingError, Outcome, Warning};
