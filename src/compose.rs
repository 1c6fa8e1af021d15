use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::cursor::Cursor;
use crate::errors::ListingError;
use crate::listing::{Gender, Unit};
use crate::normalization::{fold, non_blank};

/// What a caller asks for when browsing listings.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterRequest {
    pub owner_id: Option<String>,
    pub region_code: Option<String>,
    pub region: Option<String>,
    pub province_code: Option<String>,
    pub province: Option<String>,
    pub city_code: Option<String>,
    pub city: Option<String>,
    pub price_range: Option<PriceRange>,
    pub gender: Option<Gender>,
    /// Free text matched against listing names and addresses.
    pub search: Option<String>,
    /// Page size. Defaults to the configured page size.
    pub limit: Option<u16>,
    /// The `next_cursor` of the previous page.
    pub cursor: Option<String>,
}

/// An inclusive price range; either end may be open.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PriceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PriceRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        PriceRange { min, max }
    }

    pub fn contains(&self, price: f64) -> bool {
        self.min.map_or(true, |min| price >= min) && self.max.map_or(true, |max| price <= max)
    }

    fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    fn check(&self) -> Result<(), ListingError> {
        for bound in self.min.iter().chain(self.max.iter()) {
            if !bound.is_finite() || *bound < 0.0 {
                return Err(ListingError::validation(format!(
                    "price bounds must be non-negative numbers, not {}",
                    bound
                )));
            }
        }

        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(ListingError::validation(format!(
                    "minimum price {} exceeds maximum price {}",
                    min, max
                )));
            }
        }

        Ok(())
    }
}

/// Matches one level of a listing's location, by code or by name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LocationMatch {
    Code(String),
    Name(String),
}

impl LocationMatch {
    /// Prefers the code; the name is only used when no code is given.
    fn pick(code: Option<&str>, name: Option<&str>) -> Option<Self> {
        non_blank(code)
            .map(LocationMatch::Code)
            .or_else(|| non_blank(name).map(LocationMatch::Name))
    }

    pub fn matches(&self, code: Option<&str>, name: &str) -> bool {
        match self {
            LocationMatch::Code(expected) => code == Some(expected.as_str()),
            LocationMatch::Name(expected) => name == expected.as_str(),
        }
    }

    /// Splits into (code, name) for backends that bind them separately.
    pub fn as_parts(this: Option<&Self>) -> (Option<&str>, Option<&str>) {
        match this {
            Some(LocationMatch::Code(code)) => (Some(code.as_str()), None),
            Some(LocationMatch::Name(name)) => (None, Some(name.as_str())),
            None => (None, None),
        }
    }
}

/// The predicates the backend evaluates itself, all on listing
/// attributes. Results are always ordered newest first.
#[derive(Clone, Debug, PartialEq)]
pub struct NativeQuery {
    pub owner_id: Option<String>,
    pub region: Option<LocationMatch>,
    pub province: Option<LocationMatch>,
    pub city: Option<LocationMatch>,
    /// How many records to fetch per batch.
    pub limit: u32,
}

/// The predicates applied after fetching, because they look at units or
/// at unindexed text.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResidualFilter {
    pub price_range: Option<PriceRange>,
    pub gender: Option<Gender>,
    /// Already folded with `normalization::fold`.
    pub search: Option<String>,
}

impl ResidualFilter {
    pub fn is_empty(&self) -> bool {
        !self.targets_units() && self.search.is_none()
    }

    /// Whether a listing needs a matching unit to be kept.
    pub fn targets_units(&self) -> bool {
        self.price_range.is_some() || self.gender.is_some()
    }

    /// Whether a single unit satisfies every unit predicate.
    pub fn matches_unit(&self, unit: &Unit) -> bool {
        let price_ok = self.price_range.map_or(true, |range| range.contains(unit.price));
        let gender_ok = self.gender.map_or(true, |gender| unit.gender == gender);

        price_ok && gender_ok
    }
}

/// A filter request split into its native and residual halves.
#[derive(Clone, Debug)]
pub struct Composed {
    pub native: NativeQuery,
    pub residual: ResidualFilter,
    pub page_size: u16,
    pub cursor: Option<Cursor>,
}

/// Splits a filter request into what the backend can evaluate and what
/// has to be evaluated afterwards. Rejects malformed requests.
pub fn compose(request: &FilterRequest, config: &Config) -> Result<Composed, ListingError> {
    let page_size = match request.limit {
        None => config.default_page_size,
        Some(0) => return Err(ListingError::validation("limit must be at least 1")),
        Some(limit) if limit > config.max_page_size => {
            return Err(ListingError::validation(format!(
                "limit must be at most {}, not {}",
                config.max_page_size, limit
            )))
        }
        Some(limit) => limit,
    };

    let price_range = match request.price_range {
        Some(range) => {
            range.check()?;
            Some(range).filter(|range| !range.is_unbounded())
        }
        None => None,
    };

    let cursor = match non_blank(request.cursor.as_deref()) {
        Some(raw) => Some(Cursor::decode(&raw)?),
        None => None,
    };

    let native = NativeQuery {
        owner_id: non_blank(request.owner_id.as_deref()),
        region: LocationMatch::pick(request.region_code.as_deref(), request.region.as_deref()),
        province: LocationMatch::pick(
            request.province_code.as_deref(),
            request.province.as_deref(),
        ),
        city: LocationMatch::pick(request.city_code.as_deref(), request.city.as_deref()),
        limit: u32::from(page_size) + u32::from(config.over_fetch),
    };

    let residual = ResidualFilter {
        price_range,
        gender: request.gender,
        search: non_blank(request.search.as_deref()).map(fold),
    };

    Ok(Composed {
        native,
        residual,
        page_size,
        cursor,
    })
}
