use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::errors::ListingError;
use crate::normalization;

/// A boardinghouse listed by its owner.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Listing {
    /// The ID of the listing.
    pub id: Uuid,

    /// The ID of the owner, as issued by the auth provider. Never
    /// changes after creation.
    pub owner_id: String,

    /// The display name.
    pub name: String,

    /// Where the boardinghouse is.
    #[serde(flatten)]
    pub location: Location,

    /// The street address line.
    pub street: String,

    /// The postal code.
    pub zipcode: String,

    pub description: String,

    /// URLs of the photos, in display order.
    pub photos: Vec<String>,

    #[serde(flatten)]
    pub contact: Contact,

    /// The number of units in the listing. Maintained incrementally.
    pub unit_count: u32,

    /// The times it was created and updated.
    #[serde(flatten)]
    pub times: Times,
}

impl Listing {
    pub fn from_new(id: Uuid, owner_id: String, new: NewListing, now: OffsetDateTime) -> Self {
        Listing {
            id,
            owner_id,
            name: new.name,
            location: new.location,
            street: new.street,
            zipcode: new.zipcode,
            description: new.description,
            photos: new.photos,
            contact: new.contact,
            unit_count: 0,
            times: Times::at(now),
        }
    }

    /// Joins the non-empty address parts the way listings display them.
    pub fn formatted_address(&self) -> String {
        [
            self.street.as_str(),
            self.location.barangay.as_str(),
            self.location.city.as_str(),
            self.location.province.as_str(),
            self.zipcode.as_str(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
    }

    /// Applies a partial update and stamps `updated_at`.
    pub fn apply(&mut self, update: ListingUpdate, now: OffsetDateTime) {
        let ListingUpdate {
            name,
            location,
            street,
            zipcode,
            description,
            photos,
            owner_name,
            contact,
            facebook,
        } = update;

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(location) = location {
            self.location = location;
        }
        if let Some(street) = street {
            self.street = street;
        }
        if let Some(zipcode) = zipcode {
            self.zipcode = zipcode;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(photos) = photos {
            self.photos = photos;
        }
        if let Some(owner_name) = owner_name {
            self.contact.owner_name = Some(owner_name);
        }
        if let Some(contact) = contact {
            self.contact.contact = Some(contact);
        }
        if let Some(facebook) = facebook {
            self.contact.facebook = Some(facebook);
        }

        self.times.updated_at = now;
    }

    pub fn validate(&self) -> Result<(), ListingError> {
        if self.owner_id.trim().is_empty() {
            return Err(ListingError::validation("owner ID must not be empty"));
        }

        if self.name.trim().is_empty() {
            return Err(ListingError::validation("name must not be empty"));
        }

        Ok(())
    }

    /// The prefix under which the listing's photos are stored.
    pub fn storage_prefix(&self) -> String {
        storage_prefix(&self.owner_id, &self.id)
    }
}

/// Returns the blob path prefix for the photos of a listing.
pub fn storage_prefix(owner_id: &str, listing_id: &Uuid) -> String {
    format!("owners/{}/listings/{}", owner_id, listing_id)
}

/// The hierarchical location of a listing. Codes refer to the
/// reference data; names are what gets displayed.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Location {
    pub region: String,
    #[serde(default)]
    pub region_code: Option<String>,
    pub province: String,
    #[serde(default)]
    pub province_code: Option<String>,
    pub city: String,
    #[serde(default)]
    pub city_code: Option<String>,
    pub barangay: String,
    #[serde(default)]
    pub barangay_code: Option<String>,
}

/// Optional ways to reach the owner.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Contact {
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub facebook: Option<String>,
}

/// A listing as submitted by its owner.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewListing {
    /// An ID to use instead of a generated one.
    #[serde(default)]
    pub id: Option<Uuid>,

    #[serde(deserialize_with = "normalization::deserialize")]
    pub name: String,

    #[serde(flatten)]
    pub location: Location,

    #[serde(default, deserialize_with = "normalization::deserialize")]
    pub street: String,

    #[serde(default, deserialize_with = "normalization::deserialize")]
    pub zipcode: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub photos: Vec<String>,

    #[serde(flatten)]
    pub contact: Contact,
}

/// A partial update of a listing. The owner cannot be changed.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListingUpdate {
    #[serde(default, deserialize_with = "normalization::deserialize_option")]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub zipcode: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photos: Option<Vec<String>>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub facebook: Option<String>,
}

/// A rentable room or bed space in a listing.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Unit {
    /// The ID of the unit, unique within its listing.
    pub id: Uuid,

    /// The ID of the listing it belongs to.
    pub listing_id: Uuid,

    /// The room number or name.
    pub label: String,

    /// The total number of beds.
    pub capacity: u32,

    /// The number of free beds. Never more than `capacity`.
    pub available: u32,

    /// Who may occupy the unit.
    pub gender: Gender,

    pub private_washroom: bool,

    pub cooking_allowed: bool,

    /// The monthly price.
    pub price: f64,

    /// Display status; set independently of `available`.
    pub status: UnitStatus,

    /// What the price includes (water, wifi...).
    pub inclusions: Vec<String>,

    #[serde(flatten)]
    pub times: Times,
}

impl Unit {
    pub fn from_new(id: Uuid, listing_id: Uuid, new: NewUnit, now: OffsetDateTime) -> Self {
        Unit {
            id,
            listing_id,
            label: new.label,
            capacity: new.capacity,
            available: new.available,
            gender: new.gender,
            private_washroom: new.private_washroom,
            cooking_allowed: new.cooking_allowed,
            price: new.price,
            status: new.status,
            inclusions: new.inclusions,
            times: Times::at(now),
        }
    }

    /// Applies a partial update and stamps `updated_at`.
    pub fn apply(&mut self, update: UnitUpdate, now: OffsetDateTime) {
        let UnitUpdate {
            label,
            capacity,
            available,
            gender,
            private_washroom,
            cooking_allowed,
            price,
            status,
            inclusions,
        } = update;

        if let Some(label) = label {
            self.label = label;
        }
        if let Some(capacity) = capacity {
            self.capacity = capacity;
        }
        if let Some(available) = available {
            self.available = available;
        }
        if let Some(gender) = gender {
            self.gender = gender;
        }
        if let Some(private_washroom) = private_washroom {
            self.private_washroom = private_washroom;
        }
        if let Some(cooking_allowed) = cooking_allowed {
            self.cooking_allowed = cooking_allowed;
        }
        if let Some(price) = price {
            self.price = price;
        }
        if let Some(status) = status {
            self.status = status;
        }
        if let Some(inclusions) = inclusions {
            self.inclusions = inclusions;
        }

        self.times.updated_at = now;
    }

    pub fn validate(&self) -> Result<(), ListingError> {
        if self.available > self.capacity {
            return Err(ListingError::validation(format!(
                "available beds ({}) exceed capacity ({})",
                self.available, self.capacity
            )));
        }

        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ListingError::validation(format!(
                "price must be a non-negative number, not {}",
                self.price
            )));
        }

        Ok(())
    }
}

/// A unit as submitted by the owner.
#[derive(Clone, Debug, Deserialize)]
pub struct NewUnit {
    /// An ID to use instead of a generated one.
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(deserialize_with = "normalization::deserialize")]
    pub label: String,
    pub capacity: u32,
    pub available: u32,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub private_washroom: bool,
    #[serde(default)]
    pub cooking_allowed: bool,
    pub price: f64,
    #[serde(default)]
    pub status: UnitStatus,
    #[serde(default)]
    pub inclusions: Vec<String>,
}

/// A partial update of a unit.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UnitUpdate {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub available: Option<u32>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub private_washroom: Option<bool>,
    #[serde(default)]
    pub cooking_allowed: Option<bool>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub status: Option<UnitStatus>,
    #[serde(default)]
    pub inclusions: Option<Vec<String>>,
}

/// A listing together with all of its units.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ListingWithUnits {
    #[serde(flatten)]
    pub listing: Listing,
    pub units: Vec<Unit>,
}

impl ListingWithUnits {
    pub fn new(listing: Listing, units: Vec<Unit>) -> Self {
        ListingWithUnits { listing, units }
    }
}

/// Who may occupy a unit.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Gender {
    Male,
    Female,
    Any,
}

impl Default for Gender {
    fn default() -> Self {
        Gender::Any
    }
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Any => "Any",
        }
    }

    /// Interprets loosely formatted input, falling back to `Any`.
    pub fn lenient(value: &str) -> Self {
        value.parse().unwrap_or(Gender::Any)
    }
}

impl FromStr for Gender {
    type Err = ListingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "any" => Ok(Gender::Any),
            _ => Err(ListingError::validation(format!("unknown gender {:?}", s))),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The display status of a unit.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum UnitStatus {
    Available,
    Occupied,
    Inactive,
}

impl Default for UnitStatus {
    fn default() -> Self {
        UnitStatus::Available
    }
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Available => "Available",
            UnitStatus::Occupied => "Occupied",
            UnitStatus::Inactive => "Inactive",
        }
    }

    /// Interprets loosely formatted input, falling back to `Available`.
    pub fn lenient(value: &str) -> Self {
        value.parse().unwrap_or(UnitStatus::Available)
    }
}

impl FromStr for UnitStatus {
    type Err = ListingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "available" => Ok(UnitStatus::Available),
            "occupied" => Ok(UnitStatus::Occupied),
            "inactive" => Ok(UnitStatus::Inactive),
            _ => Err(ListingError::validation(format!("unknown status {:?}", s))),
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a record was created and last modified.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Times {
    /// The date and time it was created.
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,

    /// The date and time it was last modified.
    #[serde(with = "time::serde::timestamp")]
    pub updated_at: OffsetDateTime,
}

impl Times {
    /// Both timestamps set to the same instant.
    pub fn at(now: OffsetDateTime) -> Self {
        Times {
            created_at: now,
            updated_at: now,
        }
    }
}

/// Returns the current time, truncated to the microseconds the database
/// keeps. Every stamp is taken through here.
pub fn now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now - time::Duration::nanoseconds(i64::from(now.nanosecond() % 1_000))
}
