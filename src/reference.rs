//! Philippine location reference data: regions, provinces, cities and
//! barangays, as published in the usual JSON dumps.
//!
//! The barangay dumps disagree about key names, so barangays are read
//! from loose JSON objects.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::errors::ListingError;
use crate::listing::Location;

const BARANGAY_CODE_KEYS: &[&str] = &["brgy_code", "barangay_code", "brgyCode", "barangayCode"];
const BARANGAY_NAME_KEYS: &[&str] = &[
    "brgy_name",
    "barangay_name",
    "brgyName",
    "barangayName",
    "name",
];
const BARANGAY_CITY_KEYS: &[&str] = &["city_code", "mun_code", "citymunCode", "citymun_code"];

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Region {
    #[serde(deserialize_with = "code")]
    pub region_code: String,
    pub region_name: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Province {
    #[serde(deserialize_with = "code")]
    pub province_code: String,
    pub province_name: String,
    #[serde(deserialize_with = "code")]
    pub region_code: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct City {
    #[serde(deserialize_with = "code")]
    pub city_code: String,
    pub city_name: String,
    #[serde(deserialize_with = "code")]
    pub province_code: String,
}

/// A barangay record, kept whole so its parent can be found even when
/// none of the usual keys are present.
#[derive(Clone, Debug, PartialEq)]
pub struct Barangay {
    pub code: String,
    pub name: String,
    record: Map<String, Value>,
}

impl Barangay {
    /// Reads a raw record. Returns `None` if it has no recognizable code.
    pub fn from_record(record: Map<String, Value>) -> Option<Self> {
        let code = resolve_child_code(&record)?;
        let name = first_text(&record, BARANGAY_NAME_KEYS).unwrap_or_default();

        Some(Barangay { code, name, record })
    }

    /// Whether the barangay lies in the given city. Records without any
    /// parent key match if any of their values equals the city code.
    pub fn belongs_to(&self, city_code: &str) -> bool {
        let parents: Vec<String> = BARANGAY_CITY_KEYS
            .iter()
            .filter_map(|key| self.record.get(*key).and_then(text))
            .collect();

        if parents.is_empty() {
            self.record
                .values()
                .filter_map(text)
                .any(|value| value == city_code)
        } else {
            parents.iter().any(|parent| parent == city_code)
        }
    }
}

/// Returns the code of a barangay record under whichever key it uses.
pub fn resolve_child_code(record: &Map<String, Value>) -> Option<String> {
    first_text(record, BARANGAY_CODE_KEYS)
}

fn first_text(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| record.get(*key).and_then(text))
}

/// Renders strings and numbers as text; everything else is ignored.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn code<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;

    text(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid code {}", value)))
}

/// The codes picked in a cascading location selector.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LocationCodes {
    pub region_code: Option<String>,
    pub province_code: Option<String>,
    pub city_code: Option<String>,
    pub barangay_code: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ReferenceData {
    regions: Vec<Region>,
    provinces: Vec<Province>,
    cities: Vec<City>,
    barangays: Vec<Barangay>,
}

impl ReferenceData {
    pub fn new(
        regions: Vec<Region>,
        provinces: Vec<Province>,
        cities: Vec<City>,
        barangays: Vec<Barangay>,
    ) -> Self {
        ReferenceData {
            regions,
            provinces,
            cities,
            barangays,
        }
    }

    /// Parses the four JSON arrays. Barangays without a code are dropped.
    pub fn from_json(
        regions: &str,
        provinces: &str,
        cities: &str,
        barangays: &str,
    ) -> Result<Self, serde_json::Error> {
        let barangays: Vec<Map<String, Value>> = serde_json::from_str(barangays)?;

        Ok(ReferenceData::new(
            serde_json::from_str(regions)?,
            serde_json::from_str(provinces)?,
            serde_json::from_str(cities)?,
            barangays.into_iter().filter_map(Barangay::from_record).collect(),
        ))
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn provinces<'a>(&'a self, region_code: &'a str) -> impl Iterator<Item = &'a Province> + 'a {
        self.provinces
            .iter()
            .filter(move |p| p.region_code == region_code)
    }

    pub fn cities<'a>(&'a self, province_code: &'a str) -> impl Iterator<Item = &'a City> + 'a {
        self.cities
            .iter()
            .filter(move |c| c.province_code == province_code)
    }

    pub fn barangays<'a>(&'a self, city_code: &'a str) -> impl Iterator<Item = &'a Barangay> + 'a {
        self.barangays
            .iter()
            .filter(move |b| b.belongs_to(city_code))
    }

    /// Turns selected codes into a `Location` with display names. Every
    /// level must belong to the level above it, and a level can only be
    /// given along with its parent.
    pub fn resolve_location(&self, codes: &LocationCodes) -> Result<Location, ListingError> {
        let mut location = Location::default();

        let region_code = match codes.region_code.as_deref() {
            Some(code) => code,
            None if codes.province_code.is_some()
                || codes.city_code.is_some()
                || codes.barangay_code.is_some() =>
            {
                return Err(ListingError::validation("a region must be selected first"))
            }
            None => return Ok(location),
        };

        let region = self
            .regions
            .iter()
            .find(|r| r.region_code == region_code)
            .ok_or_else(|| unknown("region", region_code))?;
        location.region = region.region_name.clone();
        location.region_code = Some(region.region_code.clone());

        let province_code = match codes.province_code.as_deref() {
            Some(code) => code,
            None if codes.city_code.is_some() || codes.barangay_code.is_some() => {
                return Err(ListingError::validation("a province must be selected first"))
            }
            None => return Ok(location),
        };

        let province = self
            .provinces(region_code)
            .find(|p| p.province_code == province_code)
            .ok_or_else(|| unknown("province", province_code))?;
        location.province = province.province_name.clone();
        location.province_code = Some(province.province_code.clone());

        let city_code = match codes.city_code.as_deref() {
            Some(code) => code,
            None if codes.barangay_code.is_some() => {
                return Err(ListingError::validation("a city must be selected first"))
            }
            None => return Ok(location),
        };

        let city = self
            .cities(province_code)
            .find(|c| c.city_code == city_code)
            .ok_or_else(|| unknown("city", city_code))?;
        location.city = city.city_name.clone();
        location.city_code = Some(city.city_code.clone());

        if let Some(barangay_code) = codes.barangay_code.as_deref() {
            let barangay = self
                .barangays(city_code)
                .find(|b| b.code == barangay_code)
                .ok_or_else(|| unknown("barangay", barangay_code))?;
            location.barangay = barangay.name.clone();
            location.barangay_code = Some(barangay.code.clone());
        }

        Ok(location)
    }
}

fn unknown(level: &str, code: &str) -> ListingError {
    ListingError::validation(format!("unknown {} {:?} for the selected parent", level, code))
}
