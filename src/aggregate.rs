//! Joins listings with their units and applies the residual filter.

use crate::compose::ResidualFilter;
use crate::db::Db;
use crate::errors::ListingError;
use crate::listing::{Listing, ListingWithUnits, Unit};
use crate::normalization::fold;

/// Whether a listing's own text matches a folded search term.
pub fn matches_search(listing: &Listing, folded: &str) -> bool {
    fold(&listing.name).contains(folded) || fold(listing.formatted_address()).contains(folded)
}

/// Whether a listing with these units satisfies the unit predicates.
/// A listing without units never does when a unit predicate is active.
pub fn matches_units(units: &[Unit], residual: &ResidualFilter) -> bool {
    !residual.targets_units() || units.iter().any(|unit| residual.matches_unit(unit))
}

/// Fetches the units of one listing and keeps the composite if it passes
/// the residual filter. Kept composites carry every unit.
pub async fn aggregate_one(
    db: &(dyn Db + Send + Sync),
    listing: Listing,
    residual: &ResidualFilter,
) -> Result<Option<ListingWithUnits>, ListingError> {
    if let Some(search) = &residual.search {
        if !matches_search(&listing, search) {
            return Ok(None);
        }
    }

    let units = db.units(&listing.id).await?;

    if !matches_units(&units, residual) {
        return Ok(None);
    }

    Ok(Some(ListingWithUnits::new(listing, units)))
}

/// Aggregates a whole batch, preserving its order. Units are fetched one
/// listing at a time.
pub async fn aggregate(
    db: &(dyn Db + Send + Sync),
    listings: Vec<Listing>,
    residual: &ResidualFilter,
) -> Result<Vec<ListingWithUnits>, ListingError> {
    let mut kept = Vec::with_capacity(listings.len());

    for listing in listings {
        if let Some(composite) = aggregate_one(db, listing, residual).await? {
            kept.push(composite);
        }
    }

    Ok(kept)
}
