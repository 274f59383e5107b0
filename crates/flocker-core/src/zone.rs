use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

/// Named target regions on the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneId {
    North,
    South,
    East,
    West,
}

impl ZoneId {
    pub const ALL: [ZoneId; 4] = [ZoneId::North, ZoneId::South, ZoneId::East, ZoneId::West];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::North => "north",
            Self::South => "south",
            Self::East => "east",
            Self::West => "west",
        }
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A circular region of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub center_x: f64,
    pub center_y: f64,
    pub radius: f64,
}

impl Zone {
    pub fn new(id: ZoneId, center_x: f64, center_y: f64, radius: f64) -> Self {
        Self {
            id,
            center_x,
            center_y,
            radius,
        }
    }

    /// Inclusive containment test. Compares squared distances.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let dx = x - self.center_x;
        let dy = y - self.center_y;
        dx * dx + dy * dy <= self.radius * self.radius
    }
}

/// Default zone layout for an 800x600 arena: one zone near each edge midpoint.
pub fn default_zones() -> Vec<Zone> {
    vec![
        Zone::new(ZoneId::North, 400.0, 100.0, 80.0),
        Zone::new(ZoneId::South, 400.0, 500.0, 80.0),
        Zone::new(ZoneId::East, 700.0, 300.0, 80.0),
        Zone::new(ZoneId::West, 100.0, 300.0, 80.0),
    ]
}

/// Immutable set of zones for one room, fixed at room startup.
#[derive(Debug, Clone)]
pub struct ZoneRegistry {
    zones: Vec<Zone>,
}

impl Default for ZoneRegistry {
    fn default() -> Self {
        Self::new(default_zones())
    }
}

impl ZoneRegistry {
    /// Build a registry. Later duplicates of an id are dropped.
    pub fn new(zones: Vec<Zone>) -> Self {
        let mut unique: Vec<Zone> = Vec::with_capacity(zones.len());
        for zone in zones {
            if !unique.iter().any(|z| z.id == zone.id) {
                unique.push(zone);
            }
        }
        Self { zones: unique }
    }

    pub fn list_zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn get(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == id)
    }

    /// Returns false for zones this registry does not define.
    pub fn contains_point(&self, id: ZoneId, x: f64, y: f64) -> bool {
        self.get(id).is_some_and(|z| z.contains(x, y))
    }

    /// First zone (in registry order) containing the point.
    pub fn zone_at(&self, x: f64, y: f64) -> Option<ZoneId> {
        self.zones.iter().find(|z| z.contains(x, y)).map(|z| z.id)
    }

    /// Uniformly pick one zone id.
    pub fn random_zone<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ZoneId> {
        self.zones.choose(rng).map(|z| z.id)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
