/// Channel registry for the polder flood-control service.
///
/// Defines the canonical list of sensor channels feeding the decision model,
/// in the exact column order the classifier was trained on, together with the
/// store node each channel is read from. This is the single source of truth
/// for channel names: all other modules should reference channels from here
/// rather than hardcoding store paths.

// ---------------------------------------------------------------------------
// Channel metadata
// ---------------------------------------------------------------------------

/// Physical quantity a channel measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Rainfall (mm), fed by the forecast cycle.
    Rainfall,
    /// River or outlet discharge (m³/s).
    Discharge,
    /// Water level (TMA, tinggi muka air).
    WaterLevel,
}

/// Metadata for a single feature channel.
pub struct Channel {
    /// Canonical channel name, also the node name under the store root.
    pub name: &'static str,
    pub kind: ChannelKind,
    /// Human-readable description.
    pub description: &'static str,
}

/// All feature channels, in classifier column order.
///
/// Reordering this table silently corrupts every prediction.
pub static CHANNEL_REGISTRY: &[Channel] = &[
    Channel {
        name: "bojongsoang",
        kind: ChannelKind::Rainfall,
        description: "Forecast rainfall at Bojongsoang (BMKG).",
    },
    Channel {
        name: "dayeuhkolot",
        kind: ChannelKind::Rainfall,
        description: "Forecast rainfall at Dayeuhkolot (BMKG).",
    },
    Channel {
        name: "Debit_Cipalasari",
        kind: ChannelKind::Discharge,
        description: "Discharge of the Cipalasari river into the polder.",
    },
    Channel {
        name: "Debit_Citarum",
        kind: ChannelKind::Discharge,
        description: "Discharge of the Citarum main stem.",
    },
    Channel {
        name: "Debit_Hilir",
        kind: ChannelKind::Discharge,
        description: "Downstream outlet discharge.",
    },
    Channel {
        name: "TMA_Hilir",
        kind: ChannelKind::WaterLevel,
        description: "Downstream water level.",
    },
    Channel {
        name: "TMA_Kolam",
        kind: ChannelKind::WaterLevel,
        description: "Retention pond water level.",
    },
    Channel {
        name: "TMA_Sungai",
        kind: ChannelKind::WaterLevel,
        description: "River water level at the pump house.",
    },
];

/// Returns the channel names in classifier column order.
pub fn channel_names() -> Vec<&'static str> {
    CHANNEL_REGISTRY.iter().map(|c| c.name).collect()
}

/// Looks up a channel by name, ignoring ASCII case.
///
/// Store nodes use `TMA_Hilir` while older API clients send `TMA_hilir`;
/// both resolve to the same channel here so nothing downstream has to care.
pub fn find_channel(name: &str) -> Option<(usize, &'static Channel)> {
    CHANNEL_REGISTRY
        .iter()
        .enumerate()
        .find(|(_, c)| c.name.eq_ignore_ascii_case(name))
}

/// Store path of a channel's series below `root`.
pub fn channel_path(root: &str, channel: &Channel) -> String {
    join_path(root, channel.name)
}

/// Joins two slash-separated store path segments.
pub fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

// ---------------------------------------------------------------------------
// Forecast locations
// ---------------------------------------------------------------------------

/// A BMKG forecast location: the store node name and its `adm4` area code.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ForecastLocation {
    pub name: String,
    pub code: String,
}

/// Default forecast locations. Each name is also a rainfall channel, so the
/// forecast cycle feeds the prediction cycle through the store.
pub fn default_locations() -> Vec<ForecastLocation> {
    vec![
        ForecastLocation {
            name: "bojongsoang".to_string(),
            code: "32.04.12.2002".to_string(),
        },
        ForecastLocation {
            name: "dayeuhkolot".to_string(),
            code: "32.04.12.2003".to_string(),
        },
    ]
}

/// BMKG `adm4` codes are four dot-separated numeric groups (`32.04.12.2002`).
pub fn is_valid_adm4_code(code: &str) -> bool {
    let groups: Vec<&str> = code.split('.').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|g| !g.is_empty() && g.chars().all(|c| c.is_ascii_digit()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FEATURE_COUNT;

    #[test]
    fn test_registry_matches_feature_count() {
        assert_eq!(CHANNEL_REGISTRY.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_registry_order_is_the_trained_column_order() {
        // rainfall x2, discharge x3, water level x3
        let expected = [
            "bojongsoang",
            "dayeuhkolot",
            "Debit_Cipalasari",
            "Debit_Citarum",
            "Debit_Hilir",
            "TMA_Hilir",
            "TMA_Kolam",
            "TMA_Sungai",
        ];
        assert_eq!(channel_names(), expected);

        let kinds: Vec<_> = CHANNEL_REGISTRY.iter().map(|c| c.kind).collect();
        assert_eq!(&kinds[0..2], &[ChannelKind::Rainfall; 2]);
        assert_eq!(&kinds[2..5], &[ChannelKind::Discharge; 3]);
        assert_eq!(&kinds[5..8], &[ChannelKind::WaterLevel; 3]);
    }

    #[test]
    fn test_no_duplicate_channel_names_ignoring_case() {
        let mut seen = std::collections::HashSet::new();
        for channel in CHANNEL_REGISTRY {
            assert!(
                seen.insert(channel.name.to_ascii_lowercase()),
                "duplicate channel '{}' found in CHANNEL_REGISTRY",
                channel.name
            );
        }
    }

    #[test]
    fn test_find_channel_normalizes_case() {
        let (idx, channel) = find_channel("TMA_hilir").expect("lowercase alias should resolve");
        assert_eq!(idx, 5);
        assert_eq!(channel.name, "TMA_Hilir");
        assert_eq!(find_channel("tma_sungai").map(|(i, _)| i), Some(7));
    }

    #[test]
    fn test_find_channel_returns_none_for_unknown_name() {
        assert!(find_channel("Debit_Cikapundung").is_none());
    }

    #[test]
    fn test_channel_path_joins_under_root() {
        let (_, channel) = find_channel("bojongsoang").unwrap();
        assert_eq!(channel_path("Polder", channel), "Polder/bojongsoang");
        assert_eq!(channel_path("/Polder/", channel), "/Polder/bojongsoang");
        assert_eq!(join_path("", "pump_on"), "pump_on");
    }

    #[test]
    fn test_default_locations_are_rainfall_channels_with_valid_codes() {
        for location in default_locations() {
            let (_, channel) = find_channel(&location.name)
                .unwrap_or_else(|| panic!("location '{}' should be a channel", location.name));
            assert_eq!(channel.kind, ChannelKind::Rainfall);
            assert!(
                is_valid_adm4_code(&location.code),
                "adm4 code for '{}' malformed: '{}'",
                location.name,
                location.code
            );
        }
    }

    #[test]
    fn test_adm4_code_format() {
        assert!(is_valid_adm4_code("32.04.08.2002"));
        assert!(!is_valid_adm4_code("32.04.08"));
        assert!(!is_valid_adm4_code("32.04.08.20a2"));
        assert!(!is_valid_adm4_code("32..08.2002"));
    }
}
