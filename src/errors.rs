use std::error::Error as StdError;
use std::fmt;

use rusoto_core::RusotoError;
use rusoto_s3::{DeleteObjectError, ListObjectsV2Error, PutObjectError};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Enumerates high-level errors returned by this library.
#[derive(Debug, Error)]
pub enum ListingError {
    /// Represents a malformed filter request or entity. Raised before
    /// any backend call is made.
    #[error("Invalid input: {reason}")]
    Validation { reason: String },

    /// Represents an update or deletion targeting a missing entity.
    #[error("{kind} {id} does not exist")]
    NotFound { kind: EntityKind, id: Uuid },

    /// Represents a caller-supplied ID that is already taken.
    #[error("{kind} {id} already exists")]
    IdAlreadyExists { kind: EntityKind, id: Uuid },

    /// Represents a listing deletion that removed some or all of its
    /// units but could not finish.
    #[error("Deleted {units_deleted} units of listing {listing_id} but could not finish deleting it")]
    PartialCascadeFailure {
        listing_id: Uuid,
        units_deleted: u64,
        source: Box<ListingError>,
    },

    /// Represents an SQL error.
    #[error("SQLx error")]
    Sqlx { source: sqlx::Error },

    /// Represents any other failure to reach the backend.
    #[error("Backend unavailable")]
    BackendUnavailable {
        source: Box<dyn StdError + Send + Sync>,
    },

    /// Represents an error in the blob store.
    #[error("Store error")]
    Store {
        #[from]
        source: StoreError,
    },
}

impl ListingError {
    pub fn validation(reason: impl Into<String>) -> Self {
        ListingError::Validation {
            reason: reason.into(),
        }
    }

    pub fn unavailable(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        ListingError::BackendUnavailable {
            source: source.into(),
        }
    }
}

/// The kinds of stored entity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum EntityKind {
    Listing,
    Unit,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Listing => write!(f, "Listing"),
            EntityKind::Unit => write!(f, "Unit"),
        }
    }
}

/// Enumerates errors returned by the store subsystem.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Represents an upload with an unusable content type.
    #[error("Unsupported content type {content_type:?}")]
    UnsupportedContentType { content_type: String },

    /// Represents an error returned by the remote server when uploading.
    #[error("Upload error")]
    UploadFailed { source: RusotoError<PutObjectError> },

    /// Represents an error returned by the remote server when listing
    /// objects.
    #[error("Listing error")]
    ListFailed {
        source: RusotoError<ListObjectsV2Error>,
    },

    /// Represents an error returned by the remote server when deleting.
    #[error("Failed to delete {key}")]
    DeleteFailed {
        key: String,
        source: RusotoError<DeleteObjectError>,
    },

    /// Represents a path under which nothing is stored.
    #[error("Nothing stored under {path}")]
    NotFound { path: String },

    /// Represents an error generating the public URL of an object.
    #[error("Failed to generate URL for {key}")]
    FailedToGenerateUrl {
        key: String,
        source: url::ParseError,
    },
}

/// A problem that did not prevent an operation from succeeding.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A photo blob could not be deleted.
    BlobDeletion { path: String, reason: String },

    /// A unit was written but its listing's unit count was not updated.
    StaleUnitCount { listing_id: Uuid, reason: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::BlobDeletion { path, reason } => {
                write!(f, "could not delete blobs under {}: {}", path, reason)
            }
            Warning::StaleUnitCount { listing_id, reason } => write!(
                f,
                "unit count of listing {} may be stale: {}",
                listing_id, reason
            ),
        }
    }
}

/// The result of an operation along with any warnings it produced.
#[derive(Clone, Debug, Serialize)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, warnings: Vec<Warning>) -> Self {
        Outcome { value, warnings }
    }
}
