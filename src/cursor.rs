//! Opaque pagination cursors and page assembly.
//!
//! A cursor names the last native record a page examined. The next page
//! starts strictly after it in native order (`created_at` descending,
//! then `id` descending), whether or not that record survived the
//! residual filter.

use std::cmp::Ordering;
use std::fmt;

use base64::Engine;
use log::{debug, trace};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::aggregate::{aggregate, aggregate_one};
use crate::compose::{compose, FilterRequest};
use crate::context::{Context, Failure};
use crate::environment::Environment;
use crate::errors::ListingError;
use crate::gateway::query_listings;
use crate::listing::{Listing, ListingWithUnits};

/// The position of a listing in native order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SortKey {
    /// `created_at` in microseconds since the Unix epoch.
    #[serde(rename = "t")]
    pub created_at: i64,

    #[serde(rename = "i")]
    pub id: Uuid,
}

impl SortKey {
    pub fn of(listing: &Listing) -> Self {
        SortKey {
            created_at: micros(listing.times.created_at),
            id: listing.id,
        }
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Returns the number of whole microseconds since the Unix epoch.
pub fn micros(time: OffsetDateTime) -> i64 {
    (time.unix_timestamp_nanos() / 1_000) as i64
}

/// An opaque handle to the last native record of a page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cursor(SortKey);

impl Cursor {
    /// A cursor that resumes after the given listing.
    pub fn after(listing: &Listing) -> Self {
        Cursor(SortKey::of(listing))
    }

    pub fn key(&self) -> &SortKey {
        &self.0
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(&self.0).expect("serialize sort key");

        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str) -> Result<Self, ListingError> {
        let invalid = || ListingError::validation(format!("malformed cursor {:?}", raw));

        let json = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|_| invalid())?;
        let key: SortKey = serde_json::from_slice(&json).map_err(|_| invalid())?;

        Ok(Cursor(key))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: String = Deserialize::deserialize(deserializer)?;

        Cursor::decode(&raw).map_err(serde::de::Error::custom)
    }
}

/// One page of composite listings.
#[derive(Clone, Debug, Serialize)]
pub struct Page {
    /// Kept listings in native order, each with all of its units.
    pub listings: Vec<ListingWithUnits>,

    /// Where the next page starts; `None` once the listings run out.
    pub next_cursor: Option<Cursor>,
}

/// Fetches one page of listings matching the request.
///
/// Pages can come back shorter than requested while more listings
/// exist, because the residual filter runs after the native query.
/// Callers that need full pages keep following `next_cursor`.
///
/// With a single batch per page the page holds every kept listing of the
/// native batch and the cursor is the batch's last record. With more
/// batches allowed, fetching stops as soon as the page is full and the
/// cursor is the record that produced the last kept listing.
pub async fn fetch_page(environment: &Environment, request: &FilterRequest) -> Result<Page, Failure> {
    let error_handler = |e: ListingError| Failure::new(Context::fetch_page(), e);

    let composed = compose(request, &environment.config).map_err(error_handler)?;
    let page_size = usize::from(composed.page_size);
    let native_size = composed.native.limit as usize;

    debug!(environment.logger, "Fetching page..."; "page_size" => page_size, "native_size" => native_size, "residual" => ?composed.residual);

    if environment.config.fill_batches <= 1 {
        let batch = query_listings(environment, &composed.native, composed.cursor.as_ref()).await?;
        trace!(environment.logger, "Fetched native batch"; "records" => batch.records.len());

        let listings = aggregate(environment.db.as_ref(), batch.records, &composed.residual)
            .await
            .map_err(error_handler)?;

        debug!(environment.logger, "Fetched page"; "listings" => listings.len(), "exhausted" => batch.last.is_none());

        return Ok(Page {
            listings,
            next_cursor: batch.last,
        });
    }

    let mut cursor = composed.cursor;
    let mut listings: Vec<ListingWithUnits> = Vec::with_capacity(page_size);
    let mut batches: u8 = 0;

    let next_cursor = loop {
        batches += 1;

        let batch = query_listings(environment, &composed.native, cursor.as_ref()).await?;
        let fetched = batch.records.len();
        let exhausted = batch.last.is_none();

        trace!(environment.logger, "Fetched native batch"; "batch" => batches, "records" => fetched);

        let mut examined = 0;

        for listing in batch.records {
            examined += 1;
            cursor = Some(Cursor::after(&listing));

            let composite = aggregate_one(environment.db.as_ref(), listing, &composed.residual)
                .await
                .map_err(error_handler)?;

            if let Some(composite) = composite {
                listings.push(composite);
            }

            if listings.len() >= page_size {
                break;
            }
        }

        if listings.len() >= page_size {
            let consumed_batch = examined == fetched;

            break if exhausted && consumed_batch { None } else { cursor };
        }

        if exhausted {
            break None;
        }

        if batches >= environment.config.fill_batches {
            break cursor;
        }
    };

    debug!(environment.logger, "Fetched page"; "listings" => listings.len(), "batches" => batches, "exhausted" => next_cursor.is_none());

    Ok(Page {
        listings,
        next_cursor,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::Duration;

    use super::*;
    use crate::compose::PriceRange;
    use crate::config::Config;
    use crate::db::memory::MemoryDb;
    use crate::db::Db;
    use crate::listing::{now, Gender, NewListing, NewUnit, Unit, UnitStatus};
    use crate::store::mock::MockStore;

    fn environment(db: Arc<MemoryDb>, config: Config) -> Environment {
        let store = Arc::new(MockStore::new("https://photos.example.com/"));

        Environment::new(Arc::new(log::discard()), db, store, config)
    }

    fn listing(name: &str, region_code: &str, age: i64) -> Listing {
        let mut new = NewListing {
            name: name.to_owned(),
            ..NewListing::default()
        };
        new.location.region_code = Some(region_code.to_owned());

        let created = now() - Duration::seconds(age);
        Listing::from_new(Uuid::new_v4(), "owner-1".to_owned(), new, created)
    }

    fn unit(listing: &Listing, price: f64, gender: Gender) -> Unit {
        let new = NewUnit {
            id: None,
            label: format!("{}", price),
            capacity: 2,
            available: 1,
            gender,
            private_washroom: false,
            cooking_allowed: false,
            price,
            status: UnitStatus::Available,
            inclusions: vec![],
        };

        Unit::from_new(Uuid::new_v4(), listing.id, new, listing.times.created_at)
    }

    async fn seed(db: &MemoryDb, listing: &Listing, units: &[Unit]) {
        db.insert_listing(listing).await.expect("insert listing");

        for unit in units {
            db.insert_unit(unit).await.expect("insert unit");
        }
    }

    #[test]
    fn cursors_survive_encoding() {
        let listing = listing("A", "R1", 0);
        let cursor = Cursor::after(&listing);

        assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
        assert!(cursor.encode().chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn garbage_cursors_are_validation_errors() {
        assert!(matches!(
            Cursor::decode("not a cursor"),
            Err(ListingError::Validation { .. })
        ));
        assert!(matches!(
            Cursor::decode("e30"),
            Err(ListingError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn cursor_advances_over_the_native_batch() {
        let db = Arc::new(MemoryDb::new());

        // newest first: index 0 is native record #1
        let mut native = vec![];
        for i in 0..12 {
            let listing = listing(&format!("L{}", i), "R1", i);
            let price = if i % 4 == 0 { 800.0 } else { 200.0 };
            let units = vec![unit(&listing, price, Gender::Any)];
            seed(&db, &listing, &units).await;
            native.push(listing);
        }

        let environment = environment(db.clone(), Config::default());
        let request = FilterRequest {
            limit: Some(5),
            price_range: Some(PriceRange::new(Some(500.0), None)),
            ..FilterRequest::default()
        };

        let page = fetch_page(&environment, &request).await.expect("fetch page");

        // 5 + 5 native records examined, records 0, 4 and 8 kept
        let names: Vec<_> = page.listings.iter().map(|l| l.listing.name.clone()).collect();
        assert_eq!(names, vec!["L0", "L4", "L8"]);
        assert_eq!(page.next_cursor, Some(Cursor::after(&native[9])));

        let request = FilterRequest {
            cursor: page.next_cursor.map(|c| c.encode()),
            ..request
        };
        let page = fetch_page(&environment, &request).await.expect("fetch second page");

        assert!(page.listings.is_empty());
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn single_batch_pages_keep_the_whole_batch() {
        let db = Arc::new(MemoryDb::new());

        let mut native = vec![];
        for i in 0..20 {
            let listing = listing(&format!("L{}", i), "R1", i);
            seed(&db, &listing, &[]).await;
            native.push(listing);
        }

        let environment = environment(db, Config::default());
        let request = FilterRequest {
            limit: Some(2),
            ..FilterRequest::default()
        };

        // a batch is 2 + 5 native records
        let first = fetch_page(&environment, &request).await.expect("fetch page");
        let names: Vec<_> = first.listings.iter().map(|l| l.listing.name.as_str()).collect();
        assert_eq!(names, vec!["L0", "L1", "L2", "L3", "L4", "L5", "L6"]);
        assert_eq!(first.next_cursor, Some(Cursor::after(&native[6])));

        let second = fetch_page(
            &environment,
            &FilterRequest {
                cursor: first.next_cursor.map(|c| c.encode()),
                ..request.clone()
            },
        )
        .await
        .expect("fetch second page");
        assert_eq!(second.listings.len(), 7);
        assert_eq!(second.listings[0].listing.id, native[7].id);
        assert_eq!(second.next_cursor, Some(Cursor::after(&native[13])));

        let third = fetch_page(
            &environment,
            &FilterRequest {
                cursor: second.next_cursor.map(|c| c.encode()),
                ..request
            },
        )
        .await
        .expect("fetch third page");
        assert_eq!(third.listings.len(), 6);
        assert_eq!(third.next_cursor, None);
    }

    #[tokio::test]
    async fn full_pages_stop_at_the_producing_record_when_filling() {
        let db = Arc::new(MemoryDb::new());

        let mut native = vec![];
        for i in 0..8 {
            let listing = listing(&format!("L{}", i), "R1", i);
            seed(&db, &listing, &[]).await;
            native.push(listing);
        }

        let config = Config {
            fill_batches: 2,
            ..Config::default()
        };
        let environment = environment(db, config);
        let request = FilterRequest {
            limit: Some(3),
            ..FilterRequest::default()
        };

        let first = fetch_page(&environment, &request).await.expect("fetch page");
        assert_eq!(first.listings.len(), 3);
        assert_eq!(first.next_cursor, Some(Cursor::after(&native[2])));

        let second = fetch_page(
            &environment,
            &FilterRequest {
                cursor: first.next_cursor.map(|c| c.encode()),
                ..request.clone()
            },
        )
        .await
        .expect("fetch second page");
        let names: Vec<_> = second.listings.iter().map(|l| l.listing.name.as_str()).collect();
        assert_eq!(names, vec!["L3", "L4", "L5"]);

        let third = fetch_page(
            &environment,
            &FilterRequest {
                cursor: second.next_cursor.map(|c| c.encode()),
                ..request
            },
        )
        .await
        .expect("fetch third page");
        let names: Vec<_> = third.listings.iter().map(|l| l.listing.name.as_str()).collect();
        assert_eq!(names, vec!["L6", "L7"]);
        assert_eq!(third.next_cursor, None);
    }

    #[tokio::test]
    async fn filling_consumes_more_batches() {
        let db = Arc::new(MemoryDb::new());

        for i in 0..30 {
            let listing = listing(&format!("L{}", i), "R1", i);
            let gender = if i % 10 == 9 { Gender::Female } else { Gender::Male };
            let units = vec![unit(&listing, 1000.0, gender)];
            seed(&db, &listing, &units).await;
        }

        let config = Config {
            fill_batches: 4,
            ..Config::default()
        };
        let environment = environment(db, config);
        let request = FilterRequest {
            limit: Some(2),
            gender: Some(Gender::Female),
            ..FilterRequest::default()
        };

        let page = fetch_page(&environment, &request).await.expect("fetch page");
        let names: Vec<_> = page.listings.iter().map(|l| l.listing.name.as_str()).collect();

        assert_eq!(names, vec!["L9", "L19"]);
        assert!(page.next_cursor.is_some());
    }

    #[tokio::test]
    async fn scenario_region_and_price() {
        let db = Arc::new(MemoryDb::new());

        let a = listing("A", "R1", 2);
        let a_units = vec![unit(&a, 400.0, Gender::Any), unit(&a, 800.0, Gender::Any)];
        seed(&db, &a, &a_units).await;

        let b = listing("B", "R2", 1);
        let b_units = vec![unit(&b, 600.0, Gender::Any)];
        seed(&db, &b, &b_units).await;

        let environment = environment(db, Config::default());
        let request = FilterRequest {
            region_code: Some("R1".to_owned()),
            price_range: Some(PriceRange::new(Some(500.0), Some(1000.0))),
            ..FilterRequest::default()
        };

        let page = fetch_page(&environment, &request).await.expect("fetch page");

        assert_eq!(page.listings.len(), 1);
        assert_eq!(page.listings[0].listing.id, a.id);
        assert_eq!(page.listings[0].units.len(), 2);
        assert_eq!(page.next_cursor, None);
    }
}
