//! Good types traded on the exchange.
//!
//! Represented as u8 on the wire (Rose = 0, Sunflower = 1, Tulip = 2) and as
//! an index into the per-good arrays of every seller and buyer record.

use serde::{Deserialize, Serialize};

/// Number of tradeable good types
pub const GOOD_COUNT: usize = 3;

/// One category of tradeable item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoodType {
    #[default]
    Rose,
    Sunflower,
    Tulip,
}

impl GoodType {
    /// All goods in allocation order
    pub const ALL: [GoodType; GOOD_COUNT] = [GoodType::Rose, GoodType::Sunflower, GoodType::Tulip];

    /// Convert to u8 for serialization
    pub fn to_u8(self) -> u8 {
        match self {
            GoodType::Rose => 0,
            GoodType::Sunflower => 1,
            GoodType::Tulip => 2,
        }
    }

    /// Convert from u8 for deserialization
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(GoodType::Rose),
            1 => Some(GoodType::Sunflower),
            2 => Some(GoodType::Tulip),
            _ => None,
        }
    }

    /// Index into per-good arrays
    #[inline]
    pub fn index(self) -> usize {
        self.to_u8() as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            GoodType::Rose => "Rose",
            GoodType::Sunflower => "Sunflower",
            GoodType::Tulip => "Tulip",
        }
    }
}

impl std::fmt::Display for GoodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_good_conversion() {
        for good in GoodType::ALL {
            assert_eq!(GoodType::from_u8(good.to_u8()), Some(good));
        }
        assert_eq!(GoodType::from_u8(3), None);
    }

    #[test]
    fn test_good_index_matches_order() {
        let indices: Vec<usize> = GoodType::ALL.iter().map(|g| g.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(GoodType::Rose < GoodType::Tulip);
    }

    #[test]
    fn test_good_serde_names() {
        let json = serde_json::to_string(&GoodType::Sunflower).unwrap();
        assert_eq!(json, "\"sunflower\"");
    }
}
