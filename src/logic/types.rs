use crate::utils::numeric;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};

/// Candle bucket width. The string form is the backend/replica interval name.
#[derive(
    Copy, Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, EnumIter, IntoStaticStr, VariantNames, Serialize, Deserialize,
)]
pub enum Resolution {
    #[strum(serialize = "1m")]
    #[serde(rename = "1m")]
    OneMinute,
    #[strum(serialize = "5m")]
    #[serde(rename = "5m")]
    FiveMinutes,
    #[strum(serialize = "1h")]
    #[serde(rename = "1h")]
    OneHour,
    #[strum(serialize = "1d")]
    #[serde(rename = "1d")]
    OneDay,
    #[strum(serialize = "1w")]
    #[serde(rename = "1w")]
    OneWeek,
    #[strum(serialize = "1mo")]
    #[serde(rename = "1mo")]
    OneMonth,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Per-resolution fetch limits with a shared default.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandleLimits {
    default: u32,
    overrides: HashMap<Resolution, u32>,
}

impl CandleLimits {
    pub fn new(default: u32) -> Self {
        Self { default, overrides: HashMap::new() }
    }

    pub fn with_limit(mut self, resolution: Resolution, limit: u32) -> Self {
        self.overrides.insert(resolution, limit);
        self
    }

    /// Builds limits from interval-name keys (`"1m"`, `"1d"`, ...).
    pub fn from_named(default: u32, named: &HashMap<String, u32>) -> Result<Self, strum::ParseError> {
        let mut limits = Self::new(default);
        for (name, limit) in named {
            limits.overrides.insert(Resolution::from_str(name)?, *limit);
        }
        Ok(limits)
    }

    pub fn limit(&self, resolution: Resolution) -> u32 {
        self.overrides.get(&resolution).copied().unwrap_or(self.default)
    }
}

/// One OHLC aggregate. Prices are kept as the decimal strings the backend produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(deserialize_with = "numeric::timestamp")]
    pub t: i64,
    #[serde(deserialize_with = "numeric::numeric_string")]
    pub o: String,
    #[serde(deserialize_with = "numeric::numeric_string")]
    pub h: String,
    #[serde(deserialize_with = "numeric::numeric_string")]
    pub l: String,
    #[serde(deserialize_with = "numeric::numeric_string")]
    pub c: String,
}

impl Candle {
    pub fn new(t: i64, o: impl Into<String>, h: impl Into<String>, l: impl Into<String>, c: impl Into<String>) -> Self {
        Self { t, o: o.into(), h: h.into(), l: l.into(), c: c.into() }
    }

    pub fn same_prices(&self, other: &Candle) -> bool {
        self.o == other.o && self.h == other.h && self.l == other.l && self.c == other.c
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDescriptor {
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub token_contract: Option<String>,
    pub decimals: Option<u8>,
    pub interface_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_decimals: Option<u8>,
}

/// Realized APY windows. Accepts both `{1m,3m,6m}` and `{realAPY1m,...}` keys.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RealApy {
    #[serde(rename = "realAPY1m", alias = "1m", default, deserialize_with = "numeric::optional_f64")]
    pub one_month: Option<f64>,
    #[serde(rename = "realAPY3m", alias = "3m", default, deserialize_with = "numeric::optional_f64")]
    pub three_months: Option<f64>,
    #[serde(rename = "realAPY6m", alias = "6m", default, deserialize_with = "numeric::optional_f64")]
    pub six_months: Option<f64>,
}

/// A tokenized asset as mirrored into the replica's `xAssets` collection.
/// Always written whole; there is no partial merge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedAsset {
    pub id: String,
    pub address: Address,
    pub name: Option<String>,
    pub platform: Option<String>,
    pub chain: Option<String>,
    #[serde(default)]
    pub is_test_net: bool,
    pub price: Option<String>,
    pub change: Option<f64>,
    pub safety_score: Option<f64>,
    #[serde(rename = "realAPY")]
    pub real_apy: Option<RealApy>,
    pub icon: Option<String>,
    pub price_token: Option<TokenDescriptor>,
    pub share_token: Option<TokenDescriptor>,
    /// Most recent daily candles.
    pub chart: Option<Vec<Candle>>,
}

impl TrackedAsset {
    pub fn new(id: impl Into<String>, address: Address) -> Self {
        Self {
            id: id.into(),
            address,
            name: None,
            platform: None,
            chain: None,
            is_test_net: false,
            price: None,
            change: None,
            safety_score: None,
            real_apy: None,
            icon: None,
            price_token: None,
            share_token: None,
            chart: None,
        }
    }

    pub fn with_chart(mut self, chart: Option<Vec<Candle>>) -> Self {
        self.chart = chart;
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strum::IntoEnumIterator;

    #[test]
    fn test_resolution_names() {
        let names: Vec<&str> = Resolution::iter().map(|r| r.as_str()).collect();
        assert_eq!(names, vec!["1m", "5m", "1h", "1d", "1w", "1mo"]);
        assert_eq!(Resolution::from_str("1mo").unwrap(), Resolution::OneMonth);
        assert_eq!(Resolution::OneDay.to_string(), "1d");
        assert!(Resolution::from_str("2h").is_err());
    }

    #[test]
    fn test_candle_limits() {
        let mut named = HashMap::new();
        named.insert("1m".to_string(), 60);
        let limits = CandleLimits::from_named(20, &named).unwrap();
        assert_eq!(limits.limit(Resolution::OneMinute), 60);
        assert_eq!(limits.limit(Resolution::OneWeek), 20);

        named.insert("7m".to_string(), 1);
        assert!(CandleLimits::from_named(20, &named).is_err());
    }

    #[test]
    fn test_candle_accepts_numeric_prices() {
        let candle: Candle = serde_json::from_value(json!({"t": 1667174400, "o": 1, "h": "2", "l": 0, "c": 1.5})).unwrap();
        assert_eq!(candle, Candle::new(1_667_174_400, "1", "2", "0", "1.5"));
    }

    #[test]
    fn test_same_prices_ignores_nothing_but_bucket() {
        let a = Candle::new(1, "1", "2", "0", "1.5");
        let mut b = a.clone();
        b.t = 2;
        assert!(a.same_prices(&b));
        b.l = "0.1".into();
        assert!(!a.same_prices(&b));
    }

    #[test]
    fn test_tracked_asset_document_shape() {
        let mut asset = TrackedAsset::new("x1", Address::repeat_byte(0x11));
        asset.real_apy = Some(RealApy { one_month: Some(1.0), three_months: None, six_months: Some(6.0) });
        asset.is_test_net = true;
        let doc = serde_json::to_value(&asset).unwrap();
        assert_eq!(doc["id"], "x1");
        assert_eq!(doc["isTestNet"], true);
        assert_eq!(doc["realAPY"]["realAPY1m"], 1.0);
        assert_eq!(doc["realAPY"]["realAPY6m"], 6.0);

        let back: TrackedAsset = serde_json::from_value(doc).unwrap();
        assert_eq!(back, asset);
    }
}
