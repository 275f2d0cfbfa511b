use crate::geo::Waypoint;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
}

impl Port {
    pub fn new(name: &str, latitude: f64, longitude: f64, country: &str) -> Self {
        Self {
            name: name.to_string(),
            latitude,
            longitude,
            country: country.to_string(),
        }
    }

    pub fn location(&self) -> Waypoint {
        Waypoint::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PortCatalogError {
    #[error("failed to read port catalog: {0}")]
    Csv(#[from] csv::Error),
    #[error("port catalog is empty")]
    Empty,
}

/// Row layout of the port reference CSV.
#[derive(Debug, Deserialize)]
struct PortRow {
    #[allow(dead_code)]
    port_id: Option<u32>,
    port_name: String,
    latitude: f64,
    longitude: f64,
    country: String,
}

#[derive(Debug, Clone)]
pub struct PortCatalog {
    ports: Vec<Port>,
}

impl PortCatalog {
    pub fn new(ports: Vec<Port>) -> Self {
        Self { ports }
    }

    /// Loads ports from a CSV file with a `port_id,port_name,latitude,longitude,country` header.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, PortCatalogError> {
        let reader = csv::Reader::from_path(path)?;
        Self::from_csv_reader(reader)
    }

    pub fn from_csv_reader<R: std::io::Read>(
        mut reader: csv::Reader<R>,
    ) -> Result<Self, PortCatalogError> {
        let ports = reader
            .deserialize::<PortRow>()
            .map(|row| {
                row.map(|r| Port {
                    name: r.port_name,
                    latitude: r.latitude,
                    longitude: r.longitude,
                    country: r.country,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if ports.is_empty() {
            return Err(PortCatalogError::Empty);
        }

        Ok(Self { ports })
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Samples two distinct catalog entries. `None` when fewer than two ports exist.
    pub fn select_pair<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(Port, Port)> {
        let mut picked = self.ports.choose_multiple(rng, 2);
        match (picked.next(), picked.next()) {
            (Some(start), Some(end)) => Some((start.clone(), end.clone())),
            _ => None,
        }
    }
}

impl Default for PortCatalog {
    fn default() -> Self {
        Self::new(vec![
            Port::new("Shanghai", 31.2304, 121.4737, "China"),
            Port::new("Singapore", 1.2833, 103.8333, "Singapore"),
            Port::new("Rotterdam", 51.9225, 4.4792, "Netherlands"),
            Port::new("Busan", 35.1795, 129.0756, "South Korea"),
            Port::new("Los Angeles", 33.7395, -118.2618, "USA"),
            Port::new("Dubai", 25.2697, 55.2868, "UAE"),
            Port::new("Hamburg", 53.5511, 9.9937, "Germany"),
            Port::new("Antwerp", 51.2229, 4.4003, "Belgium"),
            Port::new("Tokyo", 35.6545, 139.8344, "Japan"),
            Port::new("Hong Kong", 22.2855, 114.1577, "China"),
            Port::new("New York", 40.7128, -74.0060, "USA"),
            Port::new("Sydney", -33.8688, 151.2093, "Australia"),
            Port::new("Mumbai", 18.9750, 72.8258, "India"),
            Port::new("Cape Town", -33.9249, 18.4241, "South Africa"),
            Port::new("Rio de Janeiro", -22.9068, -43.1729, "Brazil"),
        ])
    }
}
