//! Cache categories, key prefixes and default TTLs

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of cached data; decides key prefix and time to live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    /// Monthly bill details per line and month
    BillData,
    /// Customer profile attached to a line
    CustomerInfo,
    /// Months with a bill available for a line
    AvailableMonths,
    /// Single product definition
    ProductInfo,
    /// Product currently subscribed on a line
    CustomerProduct,
    /// Catalogue of products open for sale
    AvailableProducts,
    /// Sale status of a product
    ProductStatus,
    /// Service status of a line
    LineStatus,
    /// Menu data for a customer
    MenuInfo,
    /// Outcome of a completed product change
    ProductChangeResult,
    /// System-wide configuration values
    SystemConfig,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 11] = [
        Self::BillData,
        Self::CustomerInfo,
        Self::AvailableMonths,
        Self::ProductInfo,
        Self::CustomerProduct,
        Self::AvailableProducts,
        Self::ProductStatus,
        Self::LineStatus,
        Self::MenuInfo,
        Self::ProductChangeResult,
        Self::SystemConfig,
    ];

    /// Key prefix, including the trailing separator
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::BillData => "bill:data:",
            Self::CustomerInfo => "bill:customer:",
            Self::AvailableMonths => "bill:months:",
            Self::ProductInfo => "product:info:",
            Self::CustomerProduct => "product:customer:",
            Self::AvailableProducts => "product:available:",
            Self::ProductStatus => "product:status:",
            Self::LineStatus => "line:status:",
            Self::MenuInfo => "menu:info:",
            Self::ProductChangeResult => "product:change:",
            Self::SystemConfig => "system:config:",
        }
    }

    pub fn default_ttl(&self) -> Duration {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        Duration::from_secs(match self {
            Self::BillData => HOUR,
            Self::CustomerInfo => 4 * HOUR,
            Self::AvailableMonths => 24 * HOUR,
            Self::ProductInfo => 2 * HOUR,
            Self::CustomerProduct => 4 * HOUR,
            Self::AvailableProducts => 24 * HOUR,
            Self::ProductStatus => HOUR,
            Self::LineStatus => 30 * MINUTE,
            Self::MenuInfo => 6 * HOUR,
            Self::ProductChangeResult => HOUR,
            Self::SystemConfig => 12 * HOUR,
        })
    }
}

impl std::fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix().trim_end_matches(':'))
    }
}

/// Fully qualified cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    category: CacheCategory,
    key: String,
}

impl CacheKey {
    /// Build a key from its category and `:`-joined parts
    ///
    /// ```
    /// use phonebill_resilience::cache::{CacheCategory, CacheKey};
    ///
    /// let key = CacheKey::new(CacheCategory::BillData, ["01012345678", "2025-01"]);
    /// assert_eq!(key.as_str(), "bill:data:01012345678:2025-01");
    /// ```
    pub fn new<I, S>(category: CacheCategory, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = category.prefix().to_string();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                key.push(':');
            }
            key.push_str(part.as_ref());
        }
        Self { category, key }
    }

    pub fn category(&self) -> CacheCategory {
        self.category
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttls() {
        assert_eq!(CacheCategory::BillData.default_ttl(), Duration::from_secs(3600));
        assert_eq!(
            CacheCategory::CustomerInfo.default_ttl(),
            Duration::from_secs(4 * 3600)
        );
        assert_eq!(
            CacheCategory::AvailableMonths.default_ttl(),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(
            CacheCategory::ProductInfo.default_ttl(),
            Duration::from_secs(2 * 3600)
        );
        assert_eq!(CacheCategory::LineStatus.default_ttl(), Duration::from_secs(1800));
        assert_eq!(
            CacheCategory::SystemConfig.default_ttl(),
            Duration::from_secs(12 * 3600)
        );
    }

    #[test]
    fn test_prefixes_are_distinct() {
        let mut prefixes: Vec<_> = CacheCategory::ALL.iter().map(|c| c.prefix()).collect();
        prefixes.sort();
        prefixes.dedup();
        assert_eq!(prefixes.len(), CacheCategory::ALL.len());
    }

    #[test]
    fn test_key_display() {
        let key = CacheKey::new(CacheCategory::LineStatus, ["01012345678"]);
        assert_eq!(key.to_string(), "line:status:01012345678");
        assert_eq!(key.category(), CacheCategory::LineStatus);
        assert_eq!(CacheCategory::AvailableProducts.to_string(), "product:available");
    }
}
