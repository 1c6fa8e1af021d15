use futures::future::BoxFuture;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::compose::NativeQuery;
use crate::cursor::Cursor;
use crate::errors::ListingError;
use crate::listing::{Listing, Unit};

pub mod memory;

/// The record store. Listings and their units live in separate
/// collections, so a listing and its units are never written together.
pub trait Db {
    /// Stores a new listing. Fails with `IdAlreadyExists` if the ID is
    /// taken.
    fn insert_listing(&self, listing: &Listing) -> BoxFuture<Result<(), ListingError>>;

    fn retrieve_listing(&self, id: &Uuid) -> BoxFuture<Result<Option<Listing>, ListingError>>;

    /// Overwrites the mutable fields of an existing listing. Leaves the
    /// owner, the creation time and the unit count alone.
    fn replace_listing(&self, listing: &Listing) -> BoxFuture<Result<(), ListingError>>;

    /// Deletes a listing that has no units left, along with any
    /// favorites that point at it.
    fn delete_listing(&self, id: &Uuid) -> BoxFuture<Result<(), ListingError>>;

    /// Runs a native query, returning at most `query.limit` listings in
    /// native order, strictly after `cursor` when one is given.
    fn query_listings(
        &self,
        query: &NativeQuery,
        cursor: Option<&Cursor>,
    ) -> BoxFuture<Result<Vec<Listing>, ListingError>>;

    /// Returns every unit of a listing, oldest first.
    fn units(&self, listing_id: &Uuid) -> BoxFuture<Result<Vec<Unit>, ListingError>>;

    fn retrieve_unit(
        &self,
        listing_id: &Uuid,
        id: &Uuid,
    ) -> BoxFuture<Result<Option<Unit>, ListingError>>;

    /// Returns up to `limit` IDs of the units of a listing.
    fn unit_ids(&self, listing_id: &Uuid, limit: u16) -> BoxFuture<Result<Vec<Uuid>, ListingError>>;

    /// Deletes the given units atomically, returning how many existed.
    fn delete_units(&self, listing_id: &Uuid, ids: &[Uuid]) -> BoxFuture<Result<u64, ListingError>>;

    /// Stores a new unit. Fails with `NotFound` if the listing is
    /// missing.
    fn insert_unit(&self, unit: &Unit) -> BoxFuture<Result<(), ListingError>>;

    fn replace_unit(&self, unit: &Unit) -> BoxFuture<Result<(), ListingError>>;

    fn delete_unit(&self, listing_id: &Uuid, id: &Uuid) -> BoxFuture<Result<(), ListingError>>;

    /// Adds `delta` to the unit count of a listing, never going below
    /// zero.
    fn adjust_unit_count(
        &self,
        listing_id: &Uuid,
        delta: i32,
        at: OffsetDateTime,
    ) -> BoxFuture<Result<(), ListingError>>;

    /// Returns the IDs of the listings a user has favorited, most
    /// recent first.
    fn favorites(&self, user_id: &str) -> BoxFuture<Result<Vec<Uuid>, ListingError>>;

    fn add_favorite(
        &self,
        user_id: &str,
        listing_id: &Uuid,
        at: OffsetDateTime,
    ) -> BoxFuture<Result<(), ListingError>>;

    /// Returns whether there was a favorite to remove.
    fn remove_favorite(&self, user_id: &str, listing_id: &Uuid)
        -> BoxFuture<Result<bool, ListingError>>;
}

pub use self::postgres::*;

mod postgres {
    use std::convert::TryFrom;

    use futures::future::BoxFuture;
    use futures::FutureExt;
    use sqlx::{
        self,
        postgres::{PgPool, PgRow},
    };
    use time::OffsetDateTime;
    use uuid::Uuid;

    use crate::compose::{LocationMatch, NativeQuery};
    use crate::cursor::Cursor;
    use crate::errors::{EntityKind, ListingError};
    use crate::listing::{Contact, Listing, Location, Times, Unit};

    const LISTINGS_ID_CONSTRAINT: &str = "listings_primary_key";
    const UNITS_ID_CONSTRAINT: &str = "units_primary_key";
    const UNITS_LISTING_CONSTRAINT: &str = "units_listing_fkey";
    const FAVORITES_LISTING_CONSTRAINT: &str = "favorites_listing_fkey";

    pub struct PgDb {
        pool: PgPool,
    }

    impl PgDb {
        pub fn new(pool: PgPool) -> Self {
            PgDb { pool }
        }
    }

    // these can be simplified once async functions in traits are stabilized
    impl super::Db for PgDb {
        fn insert_listing(&self, listing: &Listing) -> BoxFuture<Result<(), ListingError>> {
            let listing = listing.clone();

            async move {
                let query = sqlx::query(include_str!("queries/insert_listing.sql"));

                let _ = query
                    .bind(listing.id)
                    .bind(&listing.owner_id)
                    .bind(&listing.name)
                    .bind(&listing.location.region)
                    .bind(&listing.location.region_code)
                    .bind(&listing.location.province)
                    .bind(&listing.location.province_code)
                    .bind(&listing.location.city)
                    .bind(&listing.location.city_code)
                    .bind(&listing.location.barangay)
                    .bind(&listing.location.barangay_code)
                    .bind(&listing.street)
                    .bind(&listing.zipcode)
                    .bind(&listing.description)
                    .bind(&listing.photos)
                    .bind(&listing.contact.owner_name)
                    .bind(&listing.contact.contact)
                    .bind(&listing.contact.facebook)
                    .bind(count_column(listing.unit_count))
                    .bind(listing.times.created_at)
                    .bind(listing.times.updated_at)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(e, EntityKind::Listing, listing.id))?;

                Ok(())
            }
            .boxed()
        }

        fn retrieve_listing(&self, id: &Uuid) -> BoxFuture<Result<Option<Listing>, ListingError>> {
            let id = *id;

            async move {
                let query = sqlx::query(include_str!("queries/retrieve_listing.sql"));

                let listing = query
                    .bind(id)
                    .try_map(|row: PgRow| listing_from_row(&row))
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(e, EntityKind::Listing, id))?;

                Ok(listing)
            }
            .boxed()
        }

        fn replace_listing(&self, listing: &Listing) -> BoxFuture<Result<(), ListingError>> {
            let listing = listing.clone();

            async move {
                let query = sqlx::query(include_str!("queries/replace_listing.sql"));

                let count = query
                    .bind(listing.id)
                    .bind(&listing.name)
                    .bind(&listing.location.region)
                    .bind(&listing.location.region_code)
                    .bind(&listing.location.province)
                    .bind(&listing.location.province_code)
                    .bind(&listing.location.city)
                    .bind(&listing.location.city_code)
                    .bind(&listing.location.barangay)
                    .bind(&listing.location.barangay_code)
                    .bind(&listing.street)
                    .bind(&listing.zipcode)
                    .bind(&listing.description)
                    .bind(&listing.photos)
                    .bind(&listing.contact.owner_name)
                    .bind(&listing.contact.contact)
                    .bind(&listing.contact.facebook)
                    .bind(listing.times.updated_at)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(e, EntityKind::Listing, listing.id))?
                    .rows_affected();

                if count == 0 {
                    Err(not_found(EntityKind::Listing, listing.id))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }

        fn delete_listing(&self, id: &Uuid) -> BoxFuture<Result<(), ListingError>> {
            let id = *id;

            async move {
                let query = sqlx::query(include_str!("queries/delete_listing.sql"));

                let count = query
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(e, EntityKind::Listing, id))?
                    .rows_affected();

                if count == 0 {
                    Err(not_found(EntityKind::Listing, id))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }

        fn query_listings(
            &self,
            native: &NativeQuery,
            cursor: Option<&Cursor>,
        ) -> BoxFuture<Result<Vec<Listing>, ListingError>> {
            let native = native.clone();
            let cursor = cursor.copied();

            async move {
                let query = sqlx::query(include_str!("queries/query_listings.sql"));

                let (region_code, region) = LocationMatch::as_parts(native.region.as_ref());
                let (province_code, province) = LocationMatch::as_parts(native.province.as_ref());
                let (city_code, city) = LocationMatch::as_parts(native.city.as_ref());
                let after = cursor.map(|c| *c.key());

                let listings = query
                    .bind(native.owner_id.as_deref())
                    .bind(region_code)
                    .bind(region)
                    .bind(province_code)
                    .bind(province)
                    .bind(city_code)
                    .bind(city)
                    .bind(after.map(|key| key.created_at))
                    .bind(after.map(|key| key.id))
                    .bind(i64::from(native.limit))
                    .try_map(|row: PgRow| listing_from_row(&row))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|source| ListingError::Sqlx { source })?;

                Ok(listings)
            }
            .boxed()
        }

        fn units(&self, listing_id: &Uuid) -> BoxFuture<Result<Vec<Unit>, ListingError>> {
            let listing_id = *listing_id;

            async move {
                let query = sqlx::query(include_str!("queries/retrieve_units.sql"));

                let units = query
                    .bind(listing_id)
                    .try_map(|row: PgRow| unit_from_row(&row))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|source| ListingError::Sqlx { source })?;

                Ok(units)
            }
            .boxed()
        }

        fn retrieve_unit(
            &self,
            listing_id: &Uuid,
            id: &Uuid,
        ) -> BoxFuture<Result<Option<Unit>, ListingError>> {
            let listing_id = *listing_id;
            let id = *id;

            async move {
                let query = sqlx::query(include_str!("queries/retrieve_unit.sql"));

                let unit = query
                    .bind(listing_id)
                    .bind(id)
                    .try_map(|row: PgRow| unit_from_row(&row))
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(e, EntityKind::Unit, id))?;

                Ok(unit)
            }
            .boxed()
        }

        fn unit_ids(&self, listing_id: &Uuid, limit: u16) -> BoxFuture<Result<Vec<Uuid>, ListingError>> {
            let listing_id = *listing_id;

            async move {
                let query = sqlx::query_as::<_, (Uuid,)>(include_str!("queries/retrieve_unit_ids.sql"));

                let ids = query
                    .bind(listing_id)
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|source| ListingError::Sqlx { source })?;

                Ok(ids.into_iter().map(|(id,)| id).collect())
            }
            .boxed()
        }

        fn delete_units(&self, listing_id: &Uuid, ids: &[Uuid]) -> BoxFuture<Result<u64, ListingError>> {
            let listing_id = *listing_id;
            let ids = ids.to_vec();

            async move {
                let query = sqlx::query(include_str!("queries/delete_units.sql"));

                let count = query
                    .bind(listing_id)
                    .bind(ids)
                    .execute(&self.pool)
                    .await
                    .map_err(|source| ListingError::Sqlx { source })?
                    .rows_affected();

                Ok(count)
            }
            .boxed()
        }

        fn insert_unit(&self, unit: &Unit) -> BoxFuture<Result<(), ListingError>> {
            let unit = unit.clone();

            async move {
                let query = sqlx::query(include_str!("queries/insert_unit.sql"));

                let _ = query
                    .bind(unit.listing_id)
                    .bind(unit.id)
                    .bind(&unit.label)
                    .bind(count_column(unit.capacity))
                    .bind(count_column(unit.available))
                    .bind(unit.gender.as_str())
                    .bind(unit.private_washroom)
                    .bind(unit.cooking_allowed)
                    .bind(unit.price)
                    .bind(unit.status.as_str())
                    .bind(&unit.inclusions)
                    .bind(unit.times.created_at)
                    .bind(unit.times.updated_at)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| match e {
                        sqlx::Error::Database(ref d)
                            if d.constraint() == Some(UNITS_LISTING_CONSTRAINT) =>
                        {
                            not_found(EntityKind::Listing, unit.listing_id)
                        }
                        e => map_sqlx_error(e, EntityKind::Unit, unit.id),
                    })?;

                Ok(())
            }
            .boxed()
        }

        fn replace_unit(&self, unit: &Unit) -> BoxFuture<Result<(), ListingError>> {
            let unit = unit.clone();

            async move {
                let query = sqlx::query(include_str!("queries/replace_unit.sql"));

                let count = query
                    .bind(unit.listing_id)
                    .bind(unit.id)
                    .bind(&unit.label)
                    .bind(count_column(unit.capacity))
                    .bind(count_column(unit.available))
                    .bind(unit.gender.as_str())
                    .bind(unit.private_washroom)
                    .bind(unit.cooking_allowed)
                    .bind(unit.price)
                    .bind(unit.status.as_str())
                    .bind(&unit.inclusions)
                    .bind(unit.times.updated_at)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(e, EntityKind::Unit, unit.id))?
                    .rows_affected();

                if count == 0 {
                    Err(not_found(EntityKind::Unit, unit.id))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }

        fn delete_unit(&self, listing_id: &Uuid, id: &Uuid) -> BoxFuture<Result<(), ListingError>> {
            let listing_id = *listing_id;
            let id = *id;

            async move {
                let query = sqlx::query(include_str!("queries/delete_unit.sql"));

                let count = query
                    .bind(listing_id)
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(e, EntityKind::Unit, id))?
                    .rows_affected();

                if count == 0 {
                    Err(not_found(EntityKind::Unit, id))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }

        fn adjust_unit_count(
            &self,
            listing_id: &Uuid,
            delta: i32,
            at: OffsetDateTime,
        ) -> BoxFuture<Result<(), ListingError>> {
            let listing_id = *listing_id;

            async move {
                let query = sqlx::query(include_str!("queries/adjust_unit_count.sql"));

                let count = query
                    .bind(listing_id)
                    .bind(delta)
                    .bind(at)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(e, EntityKind::Listing, listing_id))?
                    .rows_affected();

                if count == 0 {
                    Err(not_found(EntityKind::Listing, listing_id))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }

        fn favorites(&self, user_id: &str) -> BoxFuture<Result<Vec<Uuid>, ListingError>> {
            let user_id = user_id.to_owned();

            async move {
                let query = sqlx::query_as::<_, (Uuid,)>(include_str!("queries/retrieve_favorites.sql"));

                let ids = query
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|source| ListingError::Sqlx { source })?;

                Ok(ids.into_iter().map(|(id,)| id).collect())
            }
            .boxed()
        }

        fn add_favorite(
            &self,
            user_id: &str,
            listing_id: &Uuid,
            at: OffsetDateTime,
        ) -> BoxFuture<Result<(), ListingError>> {
            let user_id = user_id.to_owned();
            let listing_id = *listing_id;

            async move {
                let query = sqlx::query(include_str!("queries/add_favorite.sql"));

                let _ = query
                    .bind(user_id)
                    .bind(listing_id)
                    .bind(at)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| match e {
                        sqlx::Error::Database(ref d)
                            if d.constraint() == Some(FAVORITES_LISTING_CONSTRAINT) =>
                        {
                            not_found(EntityKind::Listing, listing_id)
                        }
                        e => ListingError::Sqlx { source: e },
                    })?;

                Ok(())
            }
            .boxed()
        }

        fn remove_favorite(
            &self,
            user_id: &str,
            listing_id: &Uuid,
        ) -> BoxFuture<Result<bool, ListingError>> {
            let user_id = user_id.to_owned();
            let listing_id = *listing_id;

            async move {
                let query = sqlx::query(include_str!("queries/remove_favorite.sql"));

                let count = query
                    .bind(user_id)
                    .bind(listing_id)
                    .execute(&self.pool)
                    .await
                    .map_err(|source| ListingError::Sqlx { source })?
                    .rows_affected();

                Ok(count > 0)
            }
            .boxed()
        }
    }

    fn listing_from_row(row: &PgRow) -> Result<Listing, sqlx::Error> {
        let location = Location {
            region: try_get(row, "region")?,
            region_code: try_get(row, "region_code")?,
            province: try_get(row, "province")?,
            province_code: try_get(row, "province_code")?,
            city: try_get(row, "city")?,
            city_code: try_get(row, "city_code")?,
            barangay: try_get(row, "barangay")?,
            barangay_code: try_get(row, "barangay_code")?,
        };

        let contact = Contact {
            owner_name: try_get(row, "owner_name")?,
            contact: try_get(row, "contact")?,
            facebook: try_get(row, "facebook")?,
        };

        Ok(Listing {
            id: try_get(row, "id")?,
            owner_id: try_get(row, "owner_id")?,
            name: try_get(row, "name")?,
            location,
            street: try_get(row, "street")?,
            zipcode: try_get(row, "zipcode")?,
            description: try_get(row, "description")?,
            photos: try_get(row, "photos")?,
            contact,
            unit_count: try_get_count(row, "unit_count")?,
            times: times_from_row(row)?,
        })
    }

    fn unit_from_row(row: &PgRow) -> Result<Unit, sqlx::Error> {
        let gender: String = try_get(row, "gender")?;
        let status: String = try_get(row, "status")?;

        Ok(Unit {
            id: try_get(row, "id")?,
            listing_id: try_get(row, "listing_id")?,
            label: try_get(row, "label")?,
            capacity: try_get_count(row, "capacity")?,
            available: try_get_count(row, "available")?,
            gender: gender
                .parse()
                .map_err(|_| sqlx::Error::Decode(format!("unknown gender {:?}", gender).into()))?,
            private_washroom: try_get(row, "private_washroom")?,
            cooking_allowed: try_get(row, "cooking_allowed")?,
            price: try_get(row, "price")?,
            status: status
                .parse()
                .map_err(|_| sqlx::Error::Decode(format!("unknown status {:?}", status).into()))?,
            inclusions: try_get(row, "inclusions")?,
            times: times_from_row(row)?,
        })
    }

    fn times_from_row(row: &PgRow) -> Result<Times, sqlx::Error> {
        Ok(Times {
            created_at: try_get(row, "created_at")?,
            updated_at: try_get(row, "updated_at")?,
        })
    }

    fn count_column(count: u32) -> i32 {
        // saturates at the largest INTEGER
        i32::try_from(count).unwrap_or(i32::MAX)
    }

    fn try_get_count(row: &PgRow, column: &str) -> Result<u32, sqlx::Error> {
        let count: i32 = try_get(row, column)?;

        u32::try_from(count).map_err(|e| sqlx::Error::Decode(Box::new(e)))
    }

    fn try_get<'a, T: sqlx::Type<sqlx::Postgres> + sqlx::decode::Decode<'a, sqlx::Postgres>>(
        row: &'a PgRow,
        column: &str,
    ) -> Result<T, sqlx::Error> {
        use sqlx::prelude::*;

        row.try_get(column)
    }

    fn not_found(kind: EntityKind, id: Uuid) -> ListingError {
        ListingError::NotFound { kind, id }
    }

    fn map_sqlx_error(error: sqlx::Error, kind: EntityKind, id: Uuid) -> ListingError {
        use sqlx::Error;

        match error {
            Error::Database(ref e)
                if e.constraint() == Some(LISTINGS_ID_CONSTRAINT)
                    || e.constraint() == Some(UNITS_ID_CONSTRAINT) =>
            {
                ListingError::IdAlreadyExists { kind, id }
            }
            _ => ListingError::Sqlx { source: error },
        }
    }
}
