//! Runs the gateway against a real database. Skipped unless
//! `HOMEBASE_DB_CONNECTION_STRING` points at a database that `initdb`
//! has prepared.

use std::env;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use homebase::config::Config;
use homebase::db::{Db, PgDb};
use homebase::errors::{ListingError, Warning};
use homebase::gateway;
use homebase::listing::{Gender, Location, NewListing, NewUnit, UnitStatus};
use homebase::store::mock::MockStore;
use homebase::{fetch_page, Environment, FilterRequest, PriceRange};

async fn environment(config: Config) -> Option<Environment> {
    dotenv::dotenv().ok();

    let connection_string = match env::var("HOMEBASE_DB_CONNECTION_STRING") {
        Ok(s) => s,
        Err(_) => {
            eprintln!("HOMEBASE_DB_CONNECTION_STRING is not set; skipping");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&connection_string)
        .await
        .expect("connect to database");

    Some(Environment::new(
        Arc::new(log::discard()),
        Arc::new(PgDb::new(pool)),
        Arc::new(MockStore::new("https://photos.example.com/")),
        config,
    ))
}

fn owner() -> String {
    format!("test-owner-{}", Uuid::new_v4())
}

fn new_listing(name: &str, region_code: &str) -> NewListing {
    NewListing {
        name: name.to_owned(),
        location: Location {
            region: format!("Region {}", region_code),
            region_code: Some(region_code.to_owned()),
            province: "Cavite".to_owned(),
            city: "Imus".to_owned(),
            ..Location::default()
        },
        street: "1 Rizal Ave.".to_owned(),
        ..NewListing::default()
    }
}

fn new_unit(price: f64) -> NewUnit {
    NewUnit {
        id: None,
        label: format!("Room {}", price),
        capacity: 4,
        available: 4,
        gender: Gender::Any,
        private_washroom: true,
        cooking_allowed: false,
        price,
        status: UnitStatus::Available,
        inclusions: vec!["water".to_owned(), "wifi".to_owned()],
    }
}

#[tokio::test]
async fn listings_round_trip_through_postgres() {
    let environment = match environment(Config::default()).await {
        Some(e) => e,
        None => return,
    };
    let owner = owner();

    let listing = gateway::create_listing(&environment, &owner, new_listing("Casa", "04"))
        .await
        .expect("create listing");
    let unit = gateway::create_unit(&environment, &listing.id, new_unit(900.0))
        .await
        .expect("create unit")
        .value;

    let stored = gateway::get_listing(&environment, &listing.id)
        .await
        .expect("get listing")
        .expect("listing exists");

    assert_eq!(stored.listing.name, "Casa");
    assert_eq!(stored.listing.unit_count, 1);
    assert_eq!(stored.listing.times.created_at, listing.times.created_at);
    assert_eq!(stored.units, vec![unit]);

    let duplicate = NewListing {
        id: Some(listing.id),
        ..new_listing("Casa Again", "04")
    };
    let failure = gateway::create_listing(&environment, &owner, duplicate)
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ListingError::IdAlreadyExists { .. }));

    gateway::delete_listing(&environment, &listing.id)
        .await
        .expect("delete listing");
}

#[tokio::test]
async fn pages_follow_native_order() {
    let environment = match environment(Config::default()).await {
        Some(e) => e,
        None => return,
    };
    let owner = owner();

    let a = gateway::create_listing(&environment, &owner, new_listing("A", "R1"))
        .await
        .unwrap();
    for price in &[800.0, 3000.0] {
        gateway::create_unit(&environment, &a.id, new_unit(*price))
            .await
            .unwrap();
    }

    let b = gateway::create_listing(&environment, &owner, new_listing("B", "R2"))
        .await
        .unwrap();
    gateway::create_unit(&environment, &b.id, new_unit(700.0))
        .await
        .unwrap();

    let c = gateway::create_listing(&environment, &owner, new_listing("C", "R1"))
        .await
        .unwrap();
    gateway::create_unit(&environment, &c.id, new_unit(5000.0))
        .await
        .unwrap();

    let request = FilterRequest {
        owner_id: Some(owner.clone()),
        region_code: Some("R1".to_owned()),
        price_range: Some(PriceRange::new(Some(500.0), Some(1000.0))),
        ..FilterRequest::default()
    };

    let page = fetch_page(&environment, &request).await.unwrap();
    let names: Vec<_> = page.listings.iter().map(|c| c.listing.name.as_str()).collect();
    assert_eq!(names, vec!["A"]);
    assert_eq!(page.listings[0].units.len(), 2);
    assert!(page.next_cursor.is_none());

    let request = FilterRequest {
        owner_id: Some(owner.clone()),
        limit: Some(1),
        ..FilterRequest::default()
    };

    let mut names = vec![];
    let mut cursor = None;

    loop {
        let page = fetch_page(
            &environment,
            &FilterRequest {
                cursor: cursor.map(|c: homebase::Cursor| c.encode()),
                ..request.clone()
            },
        )
        .await
        .unwrap();

        names.extend(page.listings.into_iter().map(|c| c.listing.name));

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(names, vec!["C", "B", "A"]);

    for listing in &[a, b, c] {
        gateway::delete_listing(&environment, &listing.id)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn deletion_cascades_in_batches() {
    let config = Config {
        unit_batch_size: 2,
        ..Config::default()
    };
    let environment = match environment(config).await {
        Some(e) => e,
        None => return,
    };
    let owner = owner();

    let listing = gateway::create_listing(&environment, &owner, new_listing("Big", "04"))
        .await
        .unwrap();
    for i in 0..5 {
        gateway::create_unit(&environment, &listing.id, new_unit(f64::from(i) * 100.0))
            .await
            .unwrap();
    }

    assert!(gateway::toggle_favorite(&environment, &owner, &listing.id)
        .await
        .unwrap());

    let outcome = gateway::delete_listing(&environment, &listing.id)
        .await
        .unwrap();

    assert_eq!(outcome.value, 5);
    assert!(matches!(
        outcome.warnings.as_slice(),
        [Warning::BlobDeletion { .. }]
    ));
    assert!(environment
        .db
        .retrieve_listing(&listing.id)
        .await
        .unwrap()
        .is_none());
    assert!(gateway::favorite_listings(&environment, &owner)
        .await
        .unwrap()
        .is_empty());
}
