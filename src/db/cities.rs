use std::str::FromStr;

use rusqlite::{params, Row};

use super::*;
use crate::types::Vendor;

fn city_from_row(row: &Row<'_>) -> rusqlite::Result<City> {
    let vendor: String = row.get(3)?;
    let status: String = row.get(5)?;
    Ok(City {
        banana: row.get(0)?,
        name: row.get(1)?,
        state: row.get(2)?,
        vendor: Vendor::from_str(&vendor).map_err(|_| rusqlite::Error::InvalidQuery)?,
        slug: row.get(4)?,
        status: CityStatus::from_str(&status).unwrap_or(CityStatus::Inactive),
    })
}

impl Store {
    // =========================================================================
    // Cities
    // =========================================================================

    /// Insert or update a city, keyed by banana. `(vendor, slug)` stays
    /// unique across cities.
    pub fn upsert_city(&self, city: &City) -> Result<(), DbError> {
        let now = now_str();
        self.conn.execute(
            "INSERT INTO cities (banana, name, state, vendor, slug, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(banana) DO UPDATE SET
                name = excluded.name,
                state = excluded.state,
                vendor = excluded.vendor,
                slug = excluded.slug,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                city.banana,
                city.name,
                city.state,
                city.vendor.as_str(),
                city.slug,
                city.status.as_str(),
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_city(&self, banana: &str) -> Result<Option<City>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT banana, name, state, vendor, slug, status FROM cities WHERE banana = ?1",
        )?;
        let mut rows = stmt.query_map(params![banana], city_from_row)?;
        match rows.next() {
            Some(Ok(city)) => Ok(Some(city)),
            Some(Err(e)) => Err(DbError::Sqlite(e)),
            None => Ok(None),
        }
    }

    pub fn list_cities(&self, filter: &CityFilter) -> Result<Vec<City>, DbError> {
        let mut sql = String::from(
            "SELECT banana, name, state, vendor, slug, status FROM cities WHERE 1=1",
        );
        let mut params_vec: Vec<String> = Vec::new();
        if let Some(vendor) = filter.vendor {
            sql.push_str(" AND vendor = ?");
            params_vec.push(vendor.as_str().to_string());
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            params_vec.push(status.as_str().to_string());
        }
        sql.push_str(" ORDER BY banana");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params_vec.iter()), city_from_row)?;

        let mut cities = Vec::new();
        for row in rows {
            cities.push(row?);
        }
        Ok(cities)
    }

    /// Cities currently being polled.
    pub fn list_active_cities(&self) -> Result<Vec<City>, DbError> {
        self.list_cities(&CityFilter {
            vendor: None,
            status: Some(CityStatus::Active),
        })
    }

    /// Stop polling a city without deleting its history.
    pub fn deactivate_city(&self, banana: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE cities SET status = 'inactive', updated_at = ?2 WHERE banana = ?1",
            params![banana, now_str()],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_city() -> City {
        City {
            banana: "paloaltoCA".to_string(),
            name: "Palo Alto".to_string(),
            state: "CA".to_string(),
            vendor: Vendor::PrimeGov,
            slug: "cityofpaloalto".to_string(),
            status: CityStatus::Active,
        }
    }

    #[test]
    fn test_upsert_and_get_city() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_city(&sample_city()).unwrap();

        let city = store.get_city("paloaltoCA").unwrap().expect("city exists");
        assert_eq!(city.slug, "cityofpaloalto");
        assert_eq!(city.vendor, Vendor::PrimeGov);
        assert_eq!(city.status, CityStatus::Active);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_city(&sample_city()).unwrap();
        store.upsert_city(&sample_city()).unwrap();

        let cities = store.list_cities(&CityFilter::default()).unwrap();
        assert_eq!(cities.len(), 1);
    }

    #[test]
    fn test_vendor_slug_unique() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_city(&sample_city()).unwrap();

        let mut dup = sample_city();
        dup.banana = "otherCA".to_string();
        // Same (vendor, slug) under a different banana → rejected
        assert!(store.upsert_city(&dup).is_err());
    }

    #[test]
    fn test_deactivate_city() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_city(&sample_city()).unwrap();
        assert!(store.deactivate_city("paloaltoCA").unwrap());
        assert!(store.list_active_cities().unwrap().is_empty());
        assert!(!store.deactivate_city("missingTX").unwrap());
    }

    #[test]
    fn test_list_cities_filters_by_vendor() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_city(&sample_city()).unwrap();
        store
            .upsert_city(&City {
                banana: "santamariaCA".to_string(),
                name: "Santa Maria".to_string(),
                state: "CA".to_string(),
                vendor: Vendor::Granicus,
                slug: "santamaria".to_string(),
                status: CityStatus::Active,
            })
            .unwrap();

        let granicus = store
            .list_cities(&CityFilter {
                vendor: Some(Vendor::Granicus),
                status: None,
            })
            .unwrap();
        assert_eq!(granicus.len(), 1);
        assert_eq!(granicus[0].banana, "santamariaCA");
    }
}
