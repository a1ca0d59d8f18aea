//! MaxMind GeoLite2/GeoIP2 City database provider, memory-mapped.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use crate::geo::GeoProvider;
use crate::models::GeoMark;

pub struct MaxMindGeo {
    reader: Arc<Reader<Mmap>>,
}

impl MaxMindGeo {
    pub fn open(path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(path) }
            .with_context(|| format!("failed to open GeoIP City database at {path}"))?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }
}

impl GeoProvider for MaxMindGeo {
    fn lookup(&self, source_address: &str) -> GeoMark {
        let ip: IpAddr = match source_address.parse() {
            Ok(ip) => ip,
            Err(_) => {
                debug!(source_address, "not an IP address, geo unknown");
                return GeoMark::unknown();
            }
        };

        let mut mark = GeoMark::unknown();

        if let Ok(result) = self.reader.lookup(ip) {
            if let Ok(Some(city)) = result.decode::<geoip2::City>() {
                mark.country_code = city.country.iso_code.map(|s| s.to_string());
                if let Some(subdivision) = city.subdivisions.first() {
                    mark.region_code = subdivision.iso_code.map(|s| s.to_string());
                }
            }
        }

        if mark.is_unknown() {
            debug!(source_address, "no geo data for address");
        }

        mark
    }
}

impl Clone for MaxMindGeo {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_fails_on_missing_database() {
        assert!(MaxMindGeo::open("/nonexistent/path.mmdb").is_err());
    }
}
