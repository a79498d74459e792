use std::cmp::Ordering;
use std::net::IpAddr;

/// Source of a [`DeviceLocation`] approximation, ordered by accuracy
/// (§3, §4.A: "higher is better").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LocationSource {
    Timezone,
    Other,
    Traceroute,
    Upnp,
    Peer,
    Interface,
}

impl LocationSource {
    pub fn accuracy(&self) -> u8 {
        match self {
            LocationSource::Interface => 6,
            LocationSource::Peer => 5,
            LocationSource::Upnp => 4,
            LocationSource::Traceroute => 3,
            LocationSource::Other => 2,
            LocationSource::Timezone => 1,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct GeoData {
    pub country: Option<String>,
    pub asn: Option<u32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Smaller is more accurate.
    pub accuracy_radius_km: Option<u32>,
}

/// An approximation of the host's public internet location (§3, §4.A).
#[derive(Debug, Clone)]
pub struct DeviceLocation {
    pub ip: IpAddr,
    pub geo: GeoData,
    pub source: LocationSource,
}

impl DeviceLocation {
    /// Ordering key implementing §4.A's dedup rule: "(source-accuracy) >
    /// (has-IP) > (has-ASN) > (has-country) > (has-coords) > (smaller
    /// coord-accuracy-radius)". Larger key compares as "more accurate".
    fn rank(&self) -> (u8, bool, bool, bool, std::cmp::Reverse<u32>) {
        (
            self.source.accuracy(),
            true, // every `DeviceLocation` here carries an IP by construction
            self.geo.asn.is_some(),
            self.geo.country.is_some(),
            std::cmp::Reverse(self.geo.accuracy_radius_km.unwrap_or(u32::MAX)),
        )
    }

    pub fn is_more_accurate_than(&self, other: &DeviceLocation) -> bool {
        self.rank() > other.rank()
    }
}

/// Deduplicates by IP equality, keeping the strictly more accurate entry on
/// duplicates, then sorts by accuracy (best first) per §4.A.
pub fn dedup_and_sort(mut locations: Vec<DeviceLocation>) -> Vec<DeviceLocation> {
    let mut by_ip: Vec<DeviceLocation> = Vec::with_capacity(locations.len());

    locations.drain(..).for_each(|loc| {
        if let Some(existing) = by_ip.iter_mut().find(|l| l.ip == loc.ip) {
            if loc.is_more_accurate_than(existing) {
                *existing = loc;
            }
        } else {
            by_ip.push(loc);
        }
    });

    by_ip.sort_by(|a, b| b.rank().cmp(&a.rank()));
    by_ip
}

/// `Best()`: the head of the sorted, deduplicated location set.
pub fn best(locations: &[DeviceLocation]) -> Option<&DeviceLocation> {
    locations.first()
}

impl PartialEq for DeviceLocation {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip
    }
}
impl Eq for DeviceLocation {}

impl PartialOrd for DeviceLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.rank().cmp(&other.rank()))
    }
}
impl Ord for DeviceLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(ip: &str, source: LocationSource) -> DeviceLocation {
        DeviceLocation {
            ip: ip.parse().unwrap(),
            geo: GeoData::default(),
            source,
        }
    }

    #[test]
    fn dedup_keeps_more_accurate_source() {
        let locations = vec![
            loc("1.1.1.1", LocationSource::Timezone),
            loc("1.1.1.1", LocationSource::Interface),
        ];
        let result = dedup_and_sort(locations);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].source, LocationSource::Interface);
    }

    #[test]
    fn best_is_head_of_sorted_set() {
        let locations = vec![
            loc("1.1.1.1", LocationSource::Timezone),
            loc("2.2.2.2", LocationSource::Interface),
        ];
        let result = dedup_and_sort(locations);
        assert_eq!(best(&result).unwrap().ip, "2.2.2.2".parse::<IpAddr>().unwrap());
    }
}
