use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::ListingError;

/// A gateway error together with the operation that produced it.
#[derive(Debug, Error)]
#[error("{context}: {error}")]
pub struct Failure {
    pub context: Context,
    #[source]
    pub error: ListingError,
}

impl Failure {
    pub fn new(context: Context, error: ListingError) -> Self {
        Failure { context, error }
    }

    pub fn flatten(&self) -> FlattenedFailure {
        FlattenedFailure {
            context: self.context.clone(),
            message: format!("{}", self.error),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlattenedFailure {
    #[serde(flatten)]
    pub context: Context,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Context {
    CreateListing { owner_id: String, id: Option<Uuid> },
    CreateUnit { listing_id: Uuid, id: Option<Uuid> },
    DeleteListing { id: Uuid },
    DeleteUnit { listing_id: Uuid, id: Uuid },
    Favorites { user_id: String },
    FetchPage,
    GetListing { id: Uuid },
    QueryListings,
    ToggleFavorite { user_id: String, listing_id: Uuid },
    UpdateListing { id: Uuid },
    UpdateUnit { listing_id: Uuid, id: Uuid },
    UploadPhoto { owner_id: String, listing_id: Uuid },
}

impl Context {
    pub fn create_listing(owner_id: impl Into<String>, id: Option<Uuid>) -> Context {
        Context::CreateListing {
            owner_id: owner_id.into(),
            id,
        }
    }

    pub fn create_unit(listing_id: Uuid, id: Option<Uuid>) -> Context {
        Context::CreateUnit { listing_id, id }
    }

    pub fn delete_listing(id: Uuid) -> Context {
        Context::DeleteListing { id }
    }

    pub fn delete_unit(listing_id: Uuid, id: Uuid) -> Context {
        Context::DeleteUnit { listing_id, id }
    }

    pub fn favorites(user_id: impl Into<String>) -> Context {
        Context::Favorites {
            user_id: user_id.into(),
        }
    }

    pub fn fetch_page() -> Context {
        Context::FetchPage
    }

    pub fn get_listing(id: Uuid) -> Context {
        Context::GetListing { id }
    }

    pub fn query_listings() -> Context {
        Context::QueryListings
    }

    pub fn toggle_favorite(user_id: impl Into<String>, listing_id: Uuid) -> Context {
        Context::ToggleFavorite {
            user_id: user_id.into(),
            listing_id,
        }
    }

    pub fn update_listing(id: Uuid) -> Context {
        Context::UpdateListing { id }
    }

    pub fn update_unit(listing_id: Uuid, id: Uuid) -> Context {
        Context::UpdateUnit { listing_id, id }
    }

    pub fn upload_photo(owner_id: impl Into<String>, listing_id: Uuid) -> Context {
        Context::UploadPhoto {
            owner_id: owner_id.into(),
            listing_id,
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Context::*;

        match self {
            CreateListing { owner_id, id } => match id {
                Some(id) => write!(f, "create listing {} for {}", id, owner_id),
                None => write!(f, "create listing for {}", owner_id),
            },
            CreateUnit { listing_id, id } => match id {
                Some(id) => write!(f, "create unit {} in listing {}", id, listing_id),
                None => write!(f, "create unit in listing {}", listing_id),
            },
            DeleteListing { id } => write!(f, "delete listing {}", id),
            DeleteUnit { listing_id, id } => {
                write!(f, "delete unit {} of listing {}", id, listing_id)
            }
            Favorites { user_id } => write!(f, "list favorites of {}", user_id),
            FetchPage => write!(f, "fetch page"),
            GetListing { id } => write!(f, "get listing {}", id),
            QueryListings => write!(f, "query listings"),
            ToggleFavorite {
                user_id,
                listing_id,
            } => write!(f, "toggle favorite {} for {}", listing_id, user_id),
            UpdateListing { id } => write!(f, "update listing {}", id),
            UpdateUnit { listing_id, id } => {
                write!(f, "update unit {} of listing {}", id, listing_id)
            }
            UploadPhoto {
                owner_id,
                listing_id,
            } => write!(f, "upload photo for listing {} of {}", listing_id, owner_id),
        }
    }
}
