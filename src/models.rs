use std::collections::HashMap;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// Canonical cache-key format for per-day records, e.g. "07-03-2026".
pub const DATE_KEY_FORMAT: &str = "%d-%m-%Y";

/// Format a date as its canonical `dd-MM-yyyy` cache key.
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

/// Parse a canonical `dd-MM-yyyy` cache key back into a date.
pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, DATE_KEY_FORMAT).ok()
}

/// Today's date in the device-local timezone.
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// A single day's nutrition summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStatistics {
    pub date: NaiveDate,
    /// Calories (kcal)
    pub total_calories: u32,
    /// Total logged food weight in grams
    pub total_food_weight: u32,
    /// Body weight in kg, 0 = not recorded that day
    pub person_weight: f64,
    /// Protein (g)
    pub proteins: f64,
    /// Fat (g)
    pub fats: f64,
    /// Carbohydrates (g)
    pub carbohydrates: f64,
    /// Sugar (g)
    pub sugar: f64,
    /// Fiber (g)
    pub fiber: f64,
    pub number_of_meals: u32,
    /// False for stand-in records synthesized when a day could not be
    /// fetched; true for confirmed data, including real zero-activity days.
    pub has_data: bool,
}

impl DailyStatistics {
    /// The canonical cache key for this record's date.
    pub fn date_key(&self) -> String {
        date_key(self.date)
    }

    /// An all-zero stand-in for a day whose data could not be obtained.
    pub fn placeholder(date: NaiveDate) -> Self {
        Self {
            date,
            total_calories: 0,
            total_food_weight: 0,
            person_weight: 0.0,
            proteins: 0.0,
            fats: 0.0,
            carbohydrates: 0.0,
            sugar: 0.0,
            fiber: 0.0,
            number_of_meals: 0,
            has_data: false,
        }
    }
}

/// A single logged food item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Server-assigned creation time in ms since epoch. Unique within a
    /// day's list and used as the item's identifier. Temporary items not
    /// yet confirmed by the backend carry a locally generated time.
    pub time: i64,
    pub name: String,
    /// Calories (kcal)
    pub calories: u32,
    /// Weight in grams
    pub weight: u32,
    pub ingredients: Vec<String>,
    /// 0-100
    pub health_rating: u8,
    /// Remote photo reference
    pub image_id: Option<String>,
    /// Added sugar in teaspoons. Not part of the backend record; merged
    /// in from a local store when the item is read.
    #[serde(default)]
    pub added_sugar_tsp: f64,
    /// Extra-portion counts keyed by extra name. Locally merged, like
    /// `added_sugar_tsp`.
    #[serde(default)]
    pub extras: HashMap<String, u32>,
}

/// One day's product list with its precomputed totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaySnapshot {
    pub products: Vec<Product>,
    pub total_calories: u32,
    /// Total food weight in grams
    pub total_weight: f64,
}

/// Derived health annotation for a single product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthLevel {
    pub title: String,
    pub description: String,
    pub summary: String,
}

/// Statistics window ending today, as selectable in the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsPeriod {
    Week,
    TwoWeeks,
    Month,
    ThreeMonths,
}

impl StatsPeriod {
    /// Number of calendar days in the window, today included.
    pub fn days(self) -> u32 {
        match self {
            StatsPeriod::Week => 7,
            StatsPeriod::TwoWeeks => 14,
            StatsPeriod::Month => 30,
            StatsPeriod::ThreeMonths => 90,
        }
    }
}
