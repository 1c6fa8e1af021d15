//! An in-memory `Db` for tests and local experiments.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Mutex, RwLock};

use futures::future::{self, BoxFuture, FutureExt};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::compose::NativeQuery;
use crate::cursor::{Cursor, SortKey};
use crate::errors::{EntityKind, ListingError};
use crate::listing::{Listing, Unit};

/// The calls a `MemoryDb` records and can be told to fail.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    InsertListing,
    RetrieveListing,
    ReplaceListing,
    DeleteListing,
    QueryListings,
    Units,
    RetrieveUnit,
    UnitIds,
    DeleteUnits,
    InsertUnit,
    ReplaceUnit,
    DeleteUnit,
    AdjustUnitCount,
    Favorites,
    AddFavorite,
    RemoveFavorite,
}

#[derive(Default)]
struct State {
    listings: HashMap<Uuid, Listing>,
    units: HashMap<Uuid, Vec<Unit>>,
    favorites: HashMap<String, Vec<(Uuid, OffsetDateTime)>>,
}

#[derive(Default)]
pub struct MemoryDb {
    state: RwLock<State>,
    journal: Mutex<Vec<Operation>>,
    failures: Mutex<HashSet<Operation>>,
    allowances: Mutex<HashMap<Operation, usize>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        MemoryDb::default()
    }

    /// Makes every later call of `operation` fail as if the backend
    /// were down.
    pub fn fail(&self, operation: Operation) {
        self.failures.lock().unwrap().insert(operation);
    }

    /// Lets `operation` succeed `successes` more times, then fails it
    /// like `fail`.
    pub fn fail_after(&self, operation: Operation, successes: usize) {
        self.allowances.lock().unwrap().insert(operation, successes);
    }

    /// Undoes `fail` and `fail_after`.
    pub fn recover(&self, operation: Operation) {
        self.failures.lock().unwrap().remove(&operation);
        self.allowances.lock().unwrap().remove(&operation);
    }

    /// Returns every call made so far, in order.
    pub fn journal(&self) -> Vec<Operation> {
        self.journal.lock().unwrap().clone()
    }

    /// Returns how many times `operation` has been called.
    pub fn calls(&self, operation: Operation) -> usize {
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter(|&&o| o == operation)
            .count()
    }

    fn run<T, F>(&self, operation: Operation, f: F) -> BoxFuture<Result<T, ListingError>>
    where
        T: Send + 'static,
        F: FnOnce(&RwLock<State>) -> Result<T, ListingError>,
    {
        self.journal.lock().unwrap().push(operation);

        let exhausted = match self.allowances.lock().unwrap().get_mut(&operation) {
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        };

        let result = if exhausted || self.failures.lock().unwrap().contains(&operation) {
            Err(ListingError::unavailable(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{:?} is failing", operation),
            )))
        } else {
            f(&self.state)
        };

        future::ready(result).boxed()
    }
}

fn not_found(kind: EntityKind, id: Uuid) -> ListingError {
    ListingError::NotFound { kind, id }
}

fn matches_native(listing: &Listing, query: &NativeQuery) -> bool {
    let location = &listing.location;

    query
        .owner_id
        .as_ref()
        .map_or(true, |owner_id| &listing.owner_id == owner_id)
        && query.region.as_ref().map_or(true, |m| {
            m.matches(location.region_code.as_deref(), &location.region)
        })
        && query.province.as_ref().map_or(true, |m| {
            m.matches(location.province_code.as_deref(), &location.province)
        })
        && query
            .city
            .as_ref()
            .map_or(true, |m| m.matches(location.city_code.as_deref(), &location.city))
}

impl super::Db for MemoryDb {
    fn insert_listing(&self, listing: &Listing) -> BoxFuture<Result<(), ListingError>> {
        self.run(Operation::InsertListing, |state| {
            let mut state = state.write().unwrap();

            if state.listings.contains_key(&listing.id) {
                return Err(ListingError::IdAlreadyExists {
                    kind: EntityKind::Listing,
                    id: listing.id,
                });
            }

            state.listings.insert(listing.id, listing.clone());

            Ok(())
        })
    }

    fn retrieve_listing(&self, id: &Uuid) -> BoxFuture<Result<Option<Listing>, ListingError>> {
        self.run(Operation::RetrieveListing, |state| {
            Ok(state.read().unwrap().listings.get(id).cloned())
        })
    }

    fn replace_listing(&self, listing: &Listing) -> BoxFuture<Result<(), ListingError>> {
        self.run(Operation::ReplaceListing, |state| {
            let mut state = state.write().unwrap();

            let stored = state
                .listings
                .get_mut(&listing.id)
                .ok_or_else(|| not_found(EntityKind::Listing, listing.id))?;

            *stored = Listing {
                owner_id: stored.owner_id.clone(),
                unit_count: stored.unit_count,
                times: crate::listing::Times {
                    created_at: stored.times.created_at,
                    updated_at: listing.times.updated_at,
                },
                ..listing.clone()
            };

            Ok(())
        })
    }

    fn delete_listing(&self, id: &Uuid) -> BoxFuture<Result<(), ListingError>> {
        self.run(Operation::DeleteListing, |state| {
            let mut state = state.write().unwrap();

            if state.units.get(id).map_or(false, |units| !units.is_empty()) {
                return Err(ListingError::validation(format!(
                    "listing {} still has units",
                    id
                )));
            }

            state
                .listings
                .remove(id)
                .ok_or_else(|| not_found(EntityKind::Listing, *id))?;
            state.units.remove(id);

            for favorites in state.favorites.values_mut() {
                favorites.retain(|(listing_id, _)| listing_id != id);
            }

            Ok(())
        })
    }

    fn query_listings(
        &self,
        query: &NativeQuery,
        cursor: Option<&Cursor>,
    ) -> BoxFuture<Result<Vec<Listing>, ListingError>> {
        self.run(Operation::QueryListings, |state| {
            let state = state.read().unwrap();

            let mut listings: Vec<&Listing> = state
                .listings
                .values()
                .filter(|listing| matches_native(listing, query))
                .filter(|listing| cursor.map_or(true, |c| SortKey::of(listing) < *c.key()))
                .collect();

            listings.sort_by(|a, b| SortKey::of(b).cmp(&SortKey::of(a)));

            Ok(listings
                .into_iter()
                .take(query.limit as usize)
                .cloned()
                .collect())
        })
    }

    fn units(&self, listing_id: &Uuid) -> BoxFuture<Result<Vec<Unit>, ListingError>> {
        self.run(Operation::Units, |state| {
            let state = state.read().unwrap();

            let mut units = state.units.get(listing_id).cloned().unwrap_or_default();
            units.sort_by(|a, b| {
                a.times
                    .created_at
                    .cmp(&b.times.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            });

            Ok(units)
        })
    }

    fn retrieve_unit(
        &self,
        listing_id: &Uuid,
        id: &Uuid,
    ) -> BoxFuture<Result<Option<Unit>, ListingError>> {
        self.run(Operation::RetrieveUnit, |state| {
            let state = state.read().unwrap();

            Ok(state
                .units
                .get(listing_id)
                .and_then(|units| units.iter().find(|unit| &unit.id == id))
                .cloned())
        })
    }

    fn unit_ids(&self, listing_id: &Uuid, limit: u16) -> BoxFuture<Result<Vec<Uuid>, ListingError>> {
        self.run(Operation::UnitIds, |state| {
            let state = state.read().unwrap();

            Ok(state
                .units
                .get(listing_id)
                .map(|units| {
                    units
                        .iter()
                        .take(usize::from(limit))
                        .map(|unit| unit.id)
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn delete_units(&self, listing_id: &Uuid, ids: &[Uuid]) -> BoxFuture<Result<u64, ListingError>> {
        self.run(Operation::DeleteUnits, |state| {
            let mut state = state.write().unwrap();

            let units = match state.units.get_mut(listing_id) {
                Some(units) => units,
                None => return Ok(0),
            };

            let before = units.len();
            units.retain(|unit| !ids.contains(&unit.id));

            Ok((before - units.len()) as u64)
        })
    }

    fn insert_unit(&self, unit: &Unit) -> BoxFuture<Result<(), ListingError>> {
        self.run(Operation::InsertUnit, |state| {
            let mut state = state.write().unwrap();

            if !state.listings.contains_key(&unit.listing_id) {
                return Err(not_found(EntityKind::Listing, unit.listing_id));
            }

            let units = state.units.entry(unit.listing_id).or_default();

            if units.iter().any(|u| u.id == unit.id) {
                return Err(ListingError::IdAlreadyExists {
                    kind: EntityKind::Unit,
                    id: unit.id,
                });
            }

            units.push(unit.clone());

            Ok(())
        })
    }

    fn replace_unit(&self, unit: &Unit) -> BoxFuture<Result<(), ListingError>> {
        self.run(Operation::ReplaceUnit, |state| {
            let mut state = state.write().unwrap();

            let stored = state
                .units
                .get_mut(&unit.listing_id)
                .and_then(|units| units.iter_mut().find(|u| u.id == unit.id))
                .ok_or_else(|| not_found(EntityKind::Unit, unit.id))?;

            *stored = unit.clone();

            Ok(())
        })
    }

    fn delete_unit(&self, listing_id: &Uuid, id: &Uuid) -> BoxFuture<Result<(), ListingError>> {
        self.run(Operation::DeleteUnit, |state| {
            let mut state = state.write().unwrap();

            let units = state
                .units
                .get_mut(listing_id)
                .ok_or_else(|| not_found(EntityKind::Unit, *id))?;

            let position = units
                .iter()
                .position(|unit| &unit.id == id)
                .ok_or_else(|| not_found(EntityKind::Unit, *id))?;

            units.remove(position);

            Ok(())
        })
    }

    fn adjust_unit_count(
        &self,
        listing_id: &Uuid,
        delta: i32,
        at: OffsetDateTime,
    ) -> BoxFuture<Result<(), ListingError>> {
        self.run(Operation::AdjustUnitCount, |state| {
            let mut state = state.write().unwrap();

            let listing = state
                .listings
                .get_mut(listing_id)
                .ok_or_else(|| not_found(EntityKind::Listing, *listing_id))?;

            let count = i64::from(listing.unit_count) + i64::from(delta);
            listing.unit_count = count.max(0) as u32;
            listing.times.updated_at = at;

            Ok(())
        })
    }

    fn favorites(&self, user_id: &str) -> BoxFuture<Result<Vec<Uuid>, ListingError>> {
        self.run(Operation::Favorites, |state| {
            let state = state.read().unwrap();

            let mut favorites = state.favorites.get(user_id).cloned().unwrap_or_default();
            favorites.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

            Ok(favorites.into_iter().map(|(id, _)| id).collect())
        })
    }

    fn add_favorite(
        &self,
        user_id: &str,
        listing_id: &Uuid,
        at: OffsetDateTime,
    ) -> BoxFuture<Result<(), ListingError>> {
        self.run(Operation::AddFavorite, |state| {
            let mut state = state.write().unwrap();

            if !state.listings.contains_key(listing_id) {
                return Err(not_found(EntityKind::Listing, *listing_id));
            }

            let favorites = state.favorites.entry(user_id.to_owned()).or_default();

            if !favorites.iter().any(|(id, _)| id == listing_id) {
                favorites.push((*listing_id, at));
            }

            Ok(())
        })
    }

    fn remove_favorite(
        &self,
        user_id: &str,
        listing_id: &Uuid,
    ) -> BoxFuture<Result<bool, ListingError>> {
        self.run(Operation::RemoveFavorite, |state| {
            let mut state = state.write().unwrap();

            let favorites = match state.favorites.get_mut(user_id) {
                Some(favorites) => favorites,
                None => return Ok(false),
            };

            let before = favorites.len();
            favorites.retain(|(id, _)| id != listing_id);

            Ok(favorites.len() < before)
        })
    }
}
