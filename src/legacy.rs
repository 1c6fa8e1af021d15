//! Imports listings exported from the old browser-only version of the
//! app, whose records used several spellings for the same fields.

use std::collections::HashMap;

use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::environment::Environment;
use crate::gateway::{create_listing, create_unit};
use crate::listing::{Contact, Gender, Location, NewListing, NewUnit, UnitStatus};

const UNTITLED_LISTING: &str = "Untitled Boardinghouse";
const UNTITLED_UNIT: &str = "Room";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyOwner {
    pub uid: Option<String>,
    pub email: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyListing {
    #[serde(deserialize_with = "lenient_text")]
    pub id: Option<String>,
    pub owner_id: Option<String>,
    pub owner_email: Option<String>,
    pub owner: Option<LegacyOwner>,
    pub name: Option<String>,
    pub region: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub barangay: Option<String>,
    pub street: Option<String>,
    pub zipcode: Option<String>,
    pub description: Option<String>,
    pub photos: Vec<String>,
    pub rooms: Vec<LegacyUnit>,
}

impl LegacyListing {
    /// Finds the owner's user ID, directly or through their email.
    fn owner_uid(&self, email_to_uid: &HashMap<String, String>) -> Option<String> {
        let direct = self
            .owner_id
            .clone()
            .or_else(|| self.owner.as_ref().and_then(|o| o.uid.clone()))
            .filter(|uid| !uid.trim().is_empty());

        direct.or_else(|| {
            let email = self
                .owner_email
                .as_ref()
                .or_else(|| self.owner.as_ref().and_then(|o| o.email.as_ref()))?
                .trim()
                .to_lowercase();

            email_to_uid.get(&email).cloned()
        })
    }

    fn to_new_listing(&self) -> NewListing {
        let text = |value: &Option<String>| value.as_deref().unwrap_or_default().trim().to_owned();

        NewListing {
            id: self.id.as_deref().and_then(|id| Uuid::parse_str(id).ok()),
            name: self
                .name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(UNTITLED_LISTING)
                .to_owned(),
            location: Location {
                region: text(&self.region),
                province: text(&self.province),
                city: text(&self.city),
                barangay: text(&self.barangay),
                ..Location::default()
            },
            street: text(&self.street),
            zipcode: text(&self.zipcode),
            description: text(&self.description),
            photos: self.photos.clone(),
            contact: Contact::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LegacyUnit {
    #[serde(deserialize_with = "lenient_text")]
    pub id: Option<String>,
    #[serde(alias = "roomName")]
    pub number: Option<String>,
    #[serde(alias = "totalBeds", deserialize_with = "lenient_number")]
    pub beds: Option<f64>,
    #[serde(
        rename = "bedsAvailable",
        alias = "availableBeds",
        deserialize_with = "lenient_number"
    )]
    pub beds_available: Option<f64>,
    pub gender: Option<String>,
    #[serde(rename = "withCR")]
    pub with_cr: Option<bool>,
    #[serde(alias = "cookingAllowed")]
    pub cooking: Option<bool>,
    #[serde(alias = "rentPrice", deserialize_with = "lenient_number")]
    pub price: Option<f64>,
    pub status: Option<String>,
    pub inclusions: Vec<String>,
}

impl LegacyUnit {
    fn to_new_unit(&self) -> NewUnit {
        let count = |value: Option<f64>| value.unwrap_or(0.0).max(0.0).round() as u32;

        NewUnit {
            id: self.id.as_deref().and_then(|id| Uuid::parse_str(id).ok()),
            label: self
                .number
                .as_deref()
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .unwrap_or(UNTITLED_UNIT)
                .to_owned(),
            capacity: count(self.beds),
            available: count(self.beds_available),
            gender: self.gender.as_deref().map_or(Gender::Any, Gender::lenient),
            private_washroom: self.with_cr.unwrap_or(false),
            cooking_allowed: self.cooking.unwrap_or(false),
            price: self.price.unwrap_or(0.0),
            status: self
                .status
                .as_deref()
                .map_or(UnitStatus::Available, UnitStatus::lenient),
            inclusions: self.inclusions.clone(),
        }
    }
}

/// Accepts strings and numbers.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts numbers and numeric strings; anything else counts as missing.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Clone, Debug, Default)]
pub struct ImportOptions {
    /// Maps owner emails to user IDs for records that only name the
    /// owner by email. Keys are matched case-insensitively.
    pub email_to_uid: HashMap<String, String>,

    /// Logs what would be written without writing anything.
    pub dry_run: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct SkippedRecord {
    pub id: Option<String>,
    pub reason: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ImportReport {
    pub listings_processed: usize,
    pub listings_created: usize,
    pub units_created: usize,
    pub skipped_listings: Vec<SkippedRecord>,
    pub skipped_units: Vec<SkippedRecord>,
    pub dry_run: bool,
}

/// Imports legacy listing records one at a time. A record that cannot be
/// imported is skipped and reported; it never stops the import.
pub async fn import_legacy(
    environment: &Environment,
    records: Vec<Value>,
    options: &ImportOptions,
) -> ImportReport {
    let logger = &environment.logger;
    let email_to_uid: HashMap<String, String> = options
        .email_to_uid
        .iter()
        .map(|(email, uid)| (email.trim().to_lowercase(), uid.clone()))
        .collect();

    let mut report = ImportReport {
        dry_run: options.dry_run,
        ..ImportReport::default()
    };

    for record in records {
        report.listings_processed += 1;

        let legacy: LegacyListing = match serde_json::from_value(record) {
            Ok(legacy) => legacy,
            Err(e) => {
                report.skipped_listings.push(SkippedRecord {
                    id: None,
                    reason: format!("Malformed record: {}", e),
                });
                continue;
            }
        };

        let owner_uid = match legacy.owner_uid(&email_to_uid) {
            Some(uid) => uid,
            None => {
                warn!(logger, "Skipping listing without owner"; "legacy_id" => ?legacy.id);
                report.skipped_listings.push(SkippedRecord {
                    id: legacy.id.clone(),
                    reason: "Owner uid not found".to_owned(),
                });
                continue;
            }
        };

        let new = legacy.to_new_listing();

        if options.dry_run {
            debug!(logger, "Would create listing"; "legacy_id" => ?legacy.id, "owner_id" => &owner_uid, "name" => &new.name, "units" => legacy.rooms.len());
            continue;
        }

        let listing = match create_listing(environment, &owner_uid, new).await {
            Ok(listing) => listing,
            Err(failure) => {
                warn!(logger, "Failed to create listing"; "legacy_id" => ?legacy.id, "error" => %failure);
                report.skipped_listings.push(SkippedRecord {
                    id: legacy.id.clone(),
                    reason: failure.error.to_string(),
                });
                continue;
            }
        };
        report.listings_created += 1;

        for room in &legacy.rooms {
            match create_unit(environment, &listing.id, room.to_new_unit()).await {
                Ok(_) => report.units_created += 1,
                Err(failure) => {
                    warn!(logger, "Failed to create unit"; "listing_id" => %listing.id, "legacy_id" => ?room.id, "error" => %failure);
                    report.skipped_units.push(SkippedRecord {
                        id: room.id.clone(),
                        reason: failure.error.to_string(),
                    });
                }
            }
        }
    }

    info!(logger, "Import finished"; "processed" => report.listings_processed, "created" => report.listings_created, "units" => report.units_created, "skipped" => report.skipped_listings.len(), "dry_run" => report.dry_run);

    report
}
