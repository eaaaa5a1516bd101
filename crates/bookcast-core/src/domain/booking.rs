use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// One booking joined with its cost breakdown, as exported from the source store.
///
/// Field order is the export column order. `status` and `payment_status` are
/// carried as the source store spells them; the warehouse statements match on
/// `Canceled` and `Completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub booking_id: i64,
    pub destination: String,
    pub pickup_point: String,
    pub date_of_tour: NaiveDate,
    pub end_of_tour: Option<NaiveDate>,
    pub number_of_days: i64,
    pub number_of_buses: i64,
    pub balance: f64,
    pub status: String,
    pub payment_status: Option<String>,
    pub user_id: Option<i64>,
    #[serde(with = "warehouse_timestamp")]
    pub booked_at: NaiveDateTime,
    pub pickup_time: Option<NaiveTime>,
    #[serde(with = "warehouse_timestamp::option")]
    pub confirmed_at: Option<NaiveDateTime>,
    #[serde(with = "warehouse_timestamp::option")]
    pub payment_deadline: Option<NaiveDateTime>,
    #[serde(with = "warehouse_timestamp::option")]
    pub completed_at: Option<NaiveDateTime>,
    pub created_by: Option<String>,
    pub total_cost: f64,
    pub base_rate: f64,
    pub total_distance: f64,
    pub diesel_price: f64,
    pub diesel_cost: f64,
    pub base_cost: f64,
    pub discount: f64,
    pub discount_type: String,
    pub discount_amount: f64,
    pub gross_price: f64,
}

/// `YYYY-MM-DD HH:MM:SS`, which both BigQuery CSV loads and `DuckDB` casts accept.
/// Reading also tolerates a `T` separator and fractional seconds.
pub mod warehouse_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn parse(value: &str) -> Option<NaiveDateTime> {
        let value = value.trim().trim_end_matches('Z');
        ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
    }

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    pub mod option {
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<NaiveDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) if raw.trim().is_empty() => Ok(None),
                Some(raw) => super::parse(&raw).map(Some).ok_or_else(|| {
                    serde::de::Error::custom(format!("invalid timestamp '{raw}'"))
                }),
            }
        }
    }
}
