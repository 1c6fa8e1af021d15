//! Reads and writes listings, units, favorites and photos.
//!
//! Every operation takes the `Environment` explicitly and wraps errors in
//! a `Failure` naming what it was doing.

use bytes::Bytes;
use log::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::compose::NativeQuery;
use crate::context::{Context, Failure};
use crate::cursor::Cursor;
use crate::environment::Environment;
use crate::errors::{EntityKind, ListingError, Outcome, StoreError, Warning};
use crate::listing::{
    now, storage_prefix, Listing, ListingUpdate, ListingWithUnits, NewListing, NewUnit, Unit,
    UnitUpdate,
};
use crate::normalization::non_blank;
use crate::store::build_storage_path;

/// A batch of listings as the native query returned them.
#[derive(Debug)]
pub struct NativeBatch {
    pub records: Vec<Listing>,

    /// A handle to the last record, or `None` if the batch came back
    /// short and there is nothing after it.
    pub last: Option<Cursor>,
}

pub async fn create_listing(
    environment: &Environment,
    owner_id: &str,
    new: NewListing,
) -> Result<Listing, Failure> {
    let requested_id = new.id;
    let error_handler =
        |e: ListingError| Failure::new(Context::create_listing(owner_id, requested_id), e);

    let owner_id = non_blank(Some(owner_id))
        .ok_or_else(|| error_handler(ListingError::validation("owner ID must not be empty")))?;
    let id = requested_id.unwrap_or_else(Uuid::new_v4);
    let listing = Listing::from_new(id, owner_id, new, now());

    listing.validate().map_err(error_handler)?;

    debug!(environment.logger, "Creating listing..."; "listing_id" => %id, "owner_id" => &listing.owner_id);
    environment
        .db
        .insert_listing(&listing)
        .await
        .map_err(error_handler)?;

    Ok(listing)
}

pub async fn get_listing(
    environment: &Environment,
    id: &Uuid,
) -> Result<Option<ListingWithUnits>, Failure> {
    let error_handler = |e: ListingError| Failure::new(Context::get_listing(*id), e);

    let listing = match environment
        .db
        .retrieve_listing(id)
        .await
        .map_err(error_handler)?
    {
        Some(listing) => listing,
        None => return Ok(None),
    };

    let units = environment.db.units(id).await.map_err(error_handler)?;

    Ok(Some(ListingWithUnits::new(listing, units)))
}

pub async fn update_listing(
    environment: &Environment,
    id: &Uuid,
    update: ListingUpdate,
) -> Result<Listing, Failure> {
    let error_handler = |e: ListingError| Failure::new(Context::update_listing(*id), e);

    let mut listing = environment
        .db
        .retrieve_listing(id)
        .await
        .map_err(error_handler)?
        .ok_or_else(|| {
            error_handler(ListingError::NotFound {
                kind: EntityKind::Listing,
                id: *id,
            })
        })?;

    listing.apply(update, now());
    listing.validate().map_err(error_handler)?;

    debug!(environment.logger, "Updating listing..."; "listing_id" => %id);
    environment
        .db
        .replace_listing(&listing)
        .await
        .map_err(error_handler)?;

    Ok(listing)
}

/// Deletes a listing, its units in batches and then its photos.
/// Returns the number of units deleted.
pub async fn delete_listing(environment: &Environment, id: &Uuid) -> Result<Outcome<u64>, Failure> {
    let error_handler = |e: ListingError| Failure::new(Context::delete_listing(*id), e);
    let db = environment.db.as_ref();
    let batch_size = environment.config.unit_batch_size;

    let listing = db
        .retrieve_listing(id)
        .await
        .map_err(error_handler)?
        .ok_or_else(|| {
            error_handler(ListingError::NotFound {
                kind: EntityKind::Listing,
                id: *id,
            })
        })?;

    let mut units_deleted: u64 = 0;
    let mut batches = 0;

    let partial = |units_deleted: u64, e: ListingError| {
        if units_deleted == 0 {
            error_handler(e)
        } else {
            error_handler(ListingError::PartialCascadeFailure {
                listing_id: *id,
                units_deleted,
                source: Box::new(e),
            })
        }
    };

    loop {
        let ids = db
            .unit_ids(id, batch_size)
            .await
            .map_err(|e| partial(units_deleted, e))?;

        if ids.is_empty() {
            break;
        }

        batches += 1;
        debug!(environment.logger, "Deleting units..."; "listing_id" => %id, "batch" => batches, "units" => ids.len());

        let deleted = db
            .delete_units(id, &ids)
            .await
            .map_err(|e| partial(units_deleted, e))?;
        units_deleted += deleted;
    }

    debug!(environment.logger, "Deleting listing..."; "listing_id" => %id, "units_deleted" => units_deleted);
    db.delete_listing(id)
        .await
        .map_err(|e| partial(units_deleted, e))?;

    let warnings = delete_photos(environment, &listing).await;

    Ok(Outcome::new(units_deleted, warnings))
}

async fn delete_photos(environment: &Environment, listing: &Listing) -> Vec<Warning> {
    let prefix = listing.storage_prefix();

    let warnings = match environment.store.delete_tree(&prefix).await {
        Ok(deletion) => {
            debug!(environment.logger, "Deleted photos"; "listing_id" => %listing.id, "deleted" => deletion.deleted.len(), "failed" => deletion.failed.len());

            deletion
                .failed
                .into_iter()
                .map(|(path, error)| Warning::BlobDeletion {
                    path,
                    reason: error.to_string(),
                })
                .collect()
        }
        Err(error) => vec![Warning::BlobDeletion {
            path: prefix,
            reason: error.to_string(),
        }],
    };

    for warning in &warnings {
        warn!(environment.logger, "Could not delete photos"; "listing_id" => %listing.id, "warning" => %warning);
    }

    warnings
}

pub async fn create_unit(
    environment: &Environment,
    listing_id: &Uuid,
    new: NewUnit,
) -> Result<Outcome<Unit>, Failure> {
    let requested_id = new.id;
    let error_handler =
        |e: ListingError| Failure::new(Context::create_unit(*listing_id, requested_id), e);

    let stamp = now();
    let id = requested_id.unwrap_or_else(Uuid::new_v4);
    let unit = Unit::from_new(id, *listing_id, new, stamp);

    unit.validate().map_err(error_handler)?;

    debug!(environment.logger, "Creating unit..."; "listing_id" => %listing_id, "unit_id" => %id);
    environment
        .db
        .insert_unit(&unit)
        .await
        .map_err(error_handler)?;

    let warnings = adjust_unit_count(environment, listing_id, 1, stamp).await;

    Ok(Outcome::new(unit, warnings))
}

pub async fn update_unit(
    environment: &Environment,
    listing_id: &Uuid,
    id: &Uuid,
    update: UnitUpdate,
) -> Result<Unit, Failure> {
    let error_handler = |e: ListingError| Failure::new(Context::update_unit(*listing_id, *id), e);

    let mut unit = environment
        .db
        .retrieve_unit(listing_id, id)
        .await
        .map_err(error_handler)?
        .ok_or_else(|| {
            error_handler(ListingError::NotFound {
                kind: EntityKind::Unit,
                id: *id,
            })
        })?;

    unit.apply(update, now());
    unit.validate().map_err(error_handler)?;

    debug!(environment.logger, "Updating unit..."; "listing_id" => %listing_id, "unit_id" => %id);
    environment
        .db
        .replace_unit(&unit)
        .await
        .map_err(error_handler)?;

    Ok(unit)
}

pub async fn delete_unit(
    environment: &Environment,
    listing_id: &Uuid,
    id: &Uuid,
) -> Result<Outcome<()>, Failure> {
    let error_handler = |e: ListingError| Failure::new(Context::delete_unit(*listing_id, *id), e);

    debug!(environment.logger, "Deleting unit..."; "listing_id" => %listing_id, "unit_id" => %id);
    environment
        .db
        .delete_unit(listing_id, id)
        .await
        .map_err(error_handler)?;

    let warnings = adjust_unit_count(environment, listing_id, -1, now()).await;

    Ok(Outcome::new((), warnings))
}

/// Applies a unit count change that follows a unit write. The write has
/// already happened, so failures only produce a warning.
async fn adjust_unit_count(
    environment: &Environment,
    listing_id: &Uuid,
    delta: i32,
    at: time::OffsetDateTime,
) -> Vec<Warning> {
    match environment
        .db
        .adjust_unit_count(listing_id, delta, at)
        .await
    {
        Ok(()) => vec![],
        Err(e) => {
            warn!(environment.logger, "Could not update unit count"; "listing_id" => %listing_id, "delta" => delta, "error" => %e);

            vec![Warning::StaleUnitCount {
                listing_id: *listing_id,
                reason: e.to_string(),
            }]
        }
    }
}

/// Runs one native query.
pub async fn query_listings(
    environment: &Environment,
    native: &NativeQuery,
    cursor: Option<&Cursor>,
) -> Result<NativeBatch, Failure> {
    let records = environment
        .db
        .query_listings(native, cursor)
        .await
        .map_err(|e| Failure::new(Context::query_listings(), e))?;

    let last = if records.len() < native.limit as usize {
        None
    } else {
        records.last().map(Cursor::after)
    };

    Ok(NativeBatch { records, last })
}

/// Stores a photo for a listing and returns its public URL. The listing
/// itself is left alone.
pub async fn upload_photo(
    environment: &Environment,
    owner_id: &str,
    listing_id: &Uuid,
    file_name: &str,
    raw: Bytes,
    content_type: &str,
) -> Result<Url, Failure> {
    let error_handler = |e: ListingError| Failure::new(Context::upload_photo(owner_id, *listing_id), e);

    let owner_id = non_blank(Some(owner_id))
        .ok_or_else(|| error_handler(ListingError::validation("owner ID must not be empty")))?;
    let content_type = image_content_type(content_type).map_err(|e| error_handler(e.into()))?;

    let key = build_storage_path(&storage_prefix(&owner_id, listing_id), file_name);

    debug!(environment.logger, "Uploading photo..."; "listing_id" => %listing_id, "key" => &key, "bytes" => raw.len());
    let url = environment
        .store
        .save(&key, content_type.to_string(), raw)
        .await
        .map_err(|e| error_handler(e.into()))?;

    Ok(url)
}

fn image_content_type(content_type: &str) -> Result<mime::Mime, StoreError> {
    let content_type = content_type.trim();

    if content_type.is_empty() {
        return Ok(mime::IMAGE_JPEG);
    }

    match content_type.parse::<mime::Mime>() {
        Ok(parsed) if parsed.type_() == mime::IMAGE => Ok(parsed),
        _ => Err(StoreError::UnsupportedContentType {
            content_type: content_type.to_owned(),
        }),
    }
}

/// Adds or removes a favorite. Returns whether the listing is now a
/// favorite.
pub async fn toggle_favorite(
    environment: &Environment,
    user_id: &str,
    listing_id: &Uuid,
) -> Result<bool, Failure> {
    let error_handler = |e: ListingError| Failure::new(Context::toggle_favorite(user_id, *listing_id), e);

    if user_id.trim().is_empty() {
        return Err(error_handler(ListingError::validation("user ID must not be empty")));
    }

    let removed = environment
        .db
        .remove_favorite(user_id, listing_id)
        .await
        .map_err(error_handler)?;

    if removed {
        debug!(environment.logger, "Removed favorite"; "user_id" => user_id, "listing_id" => %listing_id);
        return Ok(false);
    }

    environment
        .db
        .add_favorite(user_id, listing_id, now())
        .await
        .map_err(error_handler)?;

    debug!(environment.logger, "Added favorite"; "user_id" => user_id, "listing_id" => %listing_id);

    Ok(true)
}

/// Returns the user's favorite listings that still exist, most recently
/// favorited first.
pub async fn favorite_listings(
    environment: &Environment,
    user_id: &str,
) -> Result<Vec<ListingWithUnits>, Failure> {
    let error_handler = |e: ListingError| Failure::new(Context::favorites(user_id), e);

    let ids = environment
        .db
        .favorites(user_id)
        .await
        .map_err(error_handler)?;

    let mut listings = Vec::with_capacity(ids.len());

    for id in ids {
        let listing = environment
            .db
            .retrieve_listing(&id)
            .await
            .map_err(error_handler)?;

        if let Some(listing) = listing {
            let units = environment.db.units(&id).await.map_err(error_handler)?;
            listings.push(ListingWithUnits::new(listing, units));
        }
    }

    Ok(listings)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::db::memory::{MemoryDb, Operation};
    use crate::db::Db;
    use crate::listing::{Gender, Location, UnitStatus};
    use crate::store::mock::MockStore;
    use crate::store::Store;

    struct Fixture {
        environment: Environment,
        db: Arc<MemoryDb>,
        store: Arc<MockStore>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(MemoryDb::new());
        let store = Arc::new(MockStore::new("https://photos.example.com/"));
        let environment = Environment::new(
            Arc::new(log::discard()),
            db.clone(),
            store.clone(),
            Config::default(),
        );

        Fixture {
            environment,
            db,
            store,
        }
    }

    fn new_listing(name: &str) -> NewListing {
        NewListing {
            name: name.to_owned(),
            location: Location {
                region: "Region IV-A".to_owned(),
                region_code: Some("04".to_owned()),
                ..Location::default()
            },
            ..NewListing::default()
        }
    }

    fn new_unit(label: &str) -> NewUnit {
        NewUnit {
            id: None,
            label: label.to_owned(),
            capacity: 2,
            available: 1,
            gender: Gender::Any,
            private_washroom: false,
            cooking_allowed: true,
            price: 1500.0,
            status: UnitStatus::Available,
            inclusions: vec!["wifi".to_owned()],
        }
    }

    #[tokio::test]
    async fn creation_stamps_both_times_alike() {
        let f = fixture();

        let listing = create_listing(&f.environment, "owner-1", new_listing("Casa"))
            .await
            .unwrap();

        assert_eq!(listing.times.created_at, listing.times.updated_at);
        assert_eq!(listing.unit_count, 0);
        assert_eq!(
            f.db.retrieve_listing(&listing.id).await.unwrap(),
            Some(listing)
        );
    }

    #[tokio::test]
    async fn invalid_entities_are_rejected_before_writing() {
        let f = fixture();

        let blank_owner = create_listing(&f.environment, "  ", new_listing("Casa")).await;
        let blank_name = create_listing(&f.environment, "owner-1", new_listing("")).await;
        let whitespace_name = create_listing(&f.environment, "owner-1", new_listing(" \t ")).await;

        for result in vec![blank_owner, blank_name, whitespace_name] {
            let failure = result.unwrap_err();
            assert!(matches!(failure.error, ListingError::Validation { .. }));
        }

        assert_eq!(f.db.calls(Operation::InsertListing), 0);

        let listing = create_listing(&f.environment, "owner-1", new_listing("Casa"))
            .await
            .unwrap();
        let mut unit = new_unit("A");
        unit.available = 3;

        let failure = create_unit(&f.environment, &listing.id, unit).await.unwrap_err();
        assert!(matches!(failure.error, ListingError::Validation { .. }));

        let mut unit = new_unit("B");
        unit.price = -1.0;

        let failure = create_unit(&f.environment, &listing.id, unit).await.unwrap_err();
        assert!(matches!(failure.error, ListingError::Validation { .. }));
        assert_eq!(f.db.calls(Operation::InsertUnit), 0);
    }

    #[tokio::test]
    async fn caller_ids_must_be_unique() {
        let f = fixture();
        let id = Uuid::new_v4();
        let new = NewListing {
            id: Some(id),
            ..new_listing("Casa")
        };

        create_listing(&f.environment, "owner-1", new.clone()).await.unwrap();
        let failure = create_listing(&f.environment, "owner-1", new).await.unwrap_err();

        assert!(matches!(
            failure.error,
            ListingError::IdAlreadyExists {
                kind: EntityKind::Listing,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn updates_keep_the_owner_and_stamp_updated_at() {
        let f = fixture();
        let listing = create_listing(&f.environment, "owner-1", new_listing("Casa"))
            .await
            .unwrap();

        let updated = update_listing(
            &f.environment,
            &listing.id,
            ListingUpdate {
                name: Some("Casa Azul".to_owned()),
                ..ListingUpdate::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.name, "Casa Azul");
        assert_eq!(updated.owner_id, "owner-1");
        assert_eq!(updated.times.created_at, listing.times.created_at);
        assert!(updated.times.updated_at >= listing.times.updated_at);
    }

    #[tokio::test]
    async fn missing_entities_are_not_found() {
        let f = fixture();
        let missing = Uuid::new_v4();

        assert!(get_listing(&f.environment, &missing).await.unwrap().is_none());

        let failures = vec![
            update_listing(&f.environment, &missing, ListingUpdate::default())
                .await
                .unwrap_err(),
            delete_listing(&f.environment, &missing).await.unwrap_err(),
            update_unit(&f.environment, &missing, &missing, UnitUpdate::default())
                .await
                .unwrap_err(),
            delete_unit(&f.environment, &missing, &missing).await.unwrap_err(),
            create_unit(&f.environment, &missing, new_unit("A")).await.unwrap_err(),
        ];

        for failure in failures {
            assert!(
                matches!(failure.error, ListingError::NotFound { .. }),
                "{}",
                failure
            );
        }
    }

    #[tokio::test]
    async fn unit_writes_maintain_the_count() {
        let f = fixture();
        let listing = create_listing(&f.environment, "owner-1", new_listing("Casa"))
            .await
            .unwrap();

        let mut units = vec![];
        for label in &["A", "B", "C"] {
            let outcome = create_unit(&f.environment, &listing.id, new_unit(label))
                .await
                .unwrap();
            assert!(outcome.warnings.is_empty());
            units.push(outcome.value);
        }

        let stored = get_listing(&f.environment, &listing.id).await.unwrap().unwrap();
        assert_eq!(stored.listing.unit_count, 3);
        assert_eq!(stored.units.len(), 3);

        delete_unit(&f.environment, &listing.id, &units[1].id)
            .await
            .unwrap();

        let stored = get_listing(&f.environment, &listing.id).await.unwrap().unwrap();
        assert_eq!(stored.listing.unit_count, 2);
        assert!(stored.listing.times.updated_at >= listing.times.updated_at);
    }

    #[tokio::test]
    async fn count_failures_become_warnings() {
        let f = fixture();
        let listing = create_listing(&f.environment, "owner-1", new_listing("Casa"))
            .await
            .unwrap();
        f.db.fail(Operation::AdjustUnitCount);

        let outcome = create_unit(&f.environment, &listing.id, new_unit("A"))
            .await
            .unwrap();

        assert!(matches!(
            outcome.warnings.as_slice(),
            [Warning::StaleUnitCount { .. }]
        ));
        assert_eq!(f.db.units(&listing.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unit_updates_keep_status_independent() {
        let f = fixture();
        let listing = create_listing(&f.environment, "owner-1", new_listing("Casa"))
            .await
            .unwrap();
        let unit = create_unit(&f.environment, &listing.id, new_unit("A"))
            .await
            .unwrap()
            .value;

        let updated = update_unit(
            &f.environment,
            &listing.id,
            &unit.id,
            UnitUpdate {
                available: Some(0),
                ..UnitUpdate::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.available, 0);
        assert_eq!(updated.status, UnitStatus::Available);

        let failure = update_unit(
            &f.environment,
            &listing.id,
            &unit.id,
            UnitUpdate {
                capacity: Some(0),
                available: Some(1),
                ..UnitUpdate::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(failure.error, ListingError::Validation { .. }));
    }

    async fn listing_with_units(f: &Fixture, count: usize) -> Listing {
        let listing = create_listing(&f.environment, "owner-1", new_listing("Big House"))
            .await
            .unwrap();

        for i in 0..count {
            let unit = Unit::from_new(Uuid::new_v4(), listing.id, new_unit(&format!("U{}", i)), now());
            f.db.insert_unit(&unit).await.unwrap();
        }

        listing
    }

    #[tokio::test]
    async fn deleting_a_listing_removes_units_in_batches() {
        let f = fixture();
        let listing = listing_with_units(&f, 1200).await;
        let photo = format!("{}/front.jpg", listing.storage_prefix());
        f.store
            .save(&photo, "image/jpeg".to_owned(), Bytes::from_static(b"jpeg"))
            .await
            .unwrap();

        let outcome = delete_listing(&f.environment, &listing.id).await.unwrap();

        assert_eq!(outcome.value, 1200);
        assert!(outcome.warnings.is_empty());
        assert_eq!(f.db.calls(Operation::DeleteUnits), 3);
        assert_eq!(f.db.calls(Operation::UnitIds), 4);

        let journal = f.db.journal();
        assert_eq!(journal.last(), Some(&Operation::DeleteListing));
        assert!(f.store.keys().is_empty());
        assert!(f.db.retrieve_listing(&listing.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_parent_deletion_is_a_partial_cascade() {
        let f = fixture();
        let listing = listing_with_units(&f, 1200).await;
        f.db.fail(Operation::DeleteListing);

        let failure = delete_listing(&f.environment, &listing.id).await.unwrap_err();

        match failure.error {
            ListingError::PartialCascadeFailure {
                listing_id,
                units_deleted,
                ..
            } => {
                assert_eq!(listing_id, listing.id);
                assert_eq!(units_deleted, 1200);
            }
            e => panic!("unexpected error {:?}", e),
        }
    }

    #[tokio::test]
    async fn failing_a_later_unit_batch_is_a_partial_cascade() {
        let f = fixture();
        let listing = listing_with_units(&f, 1200).await;
        f.db.fail_after(Operation::DeleteUnits, 1);

        let failure = delete_listing(&f.environment, &listing.id).await.unwrap_err();

        match failure.error {
            ListingError::PartialCascadeFailure {
                listing_id,
                units_deleted,
                ..
            } => {
                assert_eq!(listing_id, listing.id);
                assert_eq!(units_deleted, 500);
            }
            e => panic!("unexpected error {:?}", e),
        }
        assert_eq!(f.db.units(&listing.id).await.unwrap().len(), 700);
        assert!(f.db.retrieve_listing(&listing.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failing_to_list_later_unit_ids_is_a_partial_cascade() {
        let f = fixture();
        let listing = listing_with_units(&f, 1200).await;
        f.db.fail_after(Operation::UnitIds, 2);

        let failure = delete_listing(&f.environment, &listing.id).await.unwrap_err();

        assert!(matches!(
            failure.error,
            ListingError::PartialCascadeFailure {
                units_deleted: 1000,
                ..
            }
        ));
        assert_eq!(f.db.calls(Operation::DeleteListing), 0);
    }

    #[tokio::test]
    async fn failing_before_any_batch_is_not_partial() {
        let f = fixture();
        let listing = listing_with_units(&f, 10).await;
        f.db.fail(Operation::DeleteUnits);

        let failure = delete_listing(&f.environment, &listing.id).await.unwrap_err();

        assert!(matches!(
            failure.error,
            ListingError::BackendUnavailable { .. }
        ));
        assert_eq!(f.db.units(&listing.id).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn missing_photos_are_only_a_warning() {
        let f = fixture();
        let listing = create_listing(&f.environment, "owner-1", new_listing("Casa"))
            .await
            .unwrap();

        let outcome = delete_listing(&f.environment, &listing.id).await.unwrap();

        assert_eq!(outcome.value, 0);
        assert!(matches!(
            outcome.warnings.as_slice(),
            [Warning::BlobDeletion { .. }]
        ));
    }

    #[tokio::test]
    async fn stuck_photos_are_reported_individually() {
        let f = fixture();
        let listing = create_listing(&f.environment, "owner-1", new_listing("Casa"))
            .await
            .unwrap();

        let mut keys = vec![];
        for name in &["a.jpg", "b.jpg"] {
            let key = format!("{}/{}", listing.storage_prefix(), name);
            f.store
                .save(&key, "image/jpeg".to_owned(), Bytes::from_static(b"jpeg"))
                .await
                .unwrap();
            keys.push(key);
        }
        f.store.stick(keys[1].clone());

        let outcome = delete_listing(&f.environment, &listing.id).await.unwrap();

        assert_eq!(
            outcome.warnings,
            vec![Warning::BlobDeletion {
                path: keys[1].clone(),
                reason: format!("Nothing stored under {}", keys[1]),
            }]
        );
        assert_eq!(f.store.keys(), vec![keys[1].clone()]);
    }

    #[tokio::test]
    async fn native_batches_report_their_last_record() {
        let f = fixture();

        for i in 0..3 {
            create_listing(&f.environment, "owner-1", new_listing(&format!("L{}", i)))
                .await
                .unwrap();
        }

        let native = NativeQuery {
            owner_id: Some("owner-1".to_owned()),
            region: None,
            province: None,
            city: None,
            limit: 2,
        };

        let batch = query_listings(&f.environment, &native, None).await.unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.last, Some(Cursor::after(&batch.records[1])));

        let rest = query_listings(&f.environment, &native, batch.last.as_ref())
            .await
            .unwrap();
        assert_eq!(rest.records.len(), 1);
        assert_eq!(rest.last, None);
    }

    #[tokio::test]
    async fn photos_are_stored_under_the_listing() {
        let f = fixture();
        let listing_id = Uuid::new_v4();

        let url = upload_photo(
            &f.environment,
            "owner-1",
            &listing_id,
            "front.png",
            Bytes::from_static(b"png"),
            "image/png",
        )
        .await
        .unwrap();

        let prefix = format!("owners/owner-1/listings/{}/", listing_id);
        assert!(url.as_str().starts_with(&format!("https://photos.example.com/{}", prefix)));
        assert!(url.as_str().ends_with(".png"));

        let map = f.store.map.read().unwrap();
        let (content_type, _) = map.values().next().unwrap();
        assert_eq!(content_type, "image/png");
    }

    #[tokio::test]
    async fn only_images_may_be_uploaded() {
        let f = fixture();
        let listing_id = Uuid::new_v4();

        let failure = upload_photo(
            &f.environment,
            "owner-1",
            &listing_id,
            "notes.txt",
            Bytes::from_static(b"text"),
            "text/plain",
        )
        .await
        .unwrap_err();

        assert!(matches!(
            failure.error,
            ListingError::Store {
                source: StoreError::UnsupportedContentType { .. }
            }
        ));

        upload_photo(
            &f.environment,
            "owner-1",
            &listing_id,
            "photo",
            Bytes::from_static(b"jpeg"),
            "",
        )
        .await
        .unwrap();

        let map = f.store.map.read().unwrap();
        let (key, (content_type, _)) = map.iter().next().unwrap();
        assert!(key.ends_with(".jpg"));
        assert_eq!(content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn favorites_toggle_and_follow_deletions() {
        let f = fixture();
        let first = create_listing(&f.environment, "owner-1", new_listing("First"))
            .await
            .unwrap();
        let second = create_listing(&f.environment, "owner-1", new_listing("Second"))
            .await
            .unwrap();

        assert!(toggle_favorite(&f.environment, "user-1", &first.id).await.unwrap());
        assert!(toggle_favorite(&f.environment, "user-1", &second.id).await.unwrap());

        let names: Vec<String> = favorite_listings(&f.environment, "user-1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.listing.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"First".to_owned()));

        assert!(!toggle_favorite(&f.environment, "user-1", &first.id).await.unwrap());
        delete_listing(&f.environment, &second.id).await.unwrap();

        assert!(favorite_listings(&f.environment, "user-1")
            .await
            .unwrap()
            .is_empty());

        let failure = toggle_favorite(&f.environment, "user-1", &second.id)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ListingError::NotFound { .. }));
    }
}
