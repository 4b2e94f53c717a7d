/// Coarse mode of a route, used to filter departures by service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    Tram,
    Subway,
    Rail,
    Bus,
    Ferry,
    CableTram,
    AerialLift,
    Funicular,
    Trolleybus,
    Monorail,
}

impl ServiceType {
    /// Maps a `routes.txt` `route_type`, including the extended
    /// (100-1700) codes, onto its basic mode.
    pub fn from_route_type(code: i32) -> Option<Self> {
        let mode = match code {
            0 => ServiceType::Tram,
            1 => ServiceType::Subway,
            2 => ServiceType::Rail,
            3 => ServiceType::Bus,
            4 => ServiceType::Ferry,
            5 => ServiceType::CableTram,
            6 => ServiceType::AerialLift,
            7 => ServiceType::Funicular,
            11 => ServiceType::Trolleybus,
            12 => ServiceType::Monorail,
            100..=199 => ServiceType::Rail,
            200..=299 => ServiceType::Bus,
            405 => ServiceType::Monorail,
            400..=499 => ServiceType::Subway,
            700..=799 => ServiceType::Bus,
            800..=899 => ServiceType::Trolleybus,
            900..=999 => ServiceType::Tram,
            1000..=1099 | 1200..=1299 => ServiceType::Ferry,
            1300..=1399 => ServiceType::AerialLift,
            1400..=1499 => ServiceType::Funicular,
            _ => return None,
        };
        Some(mode)
    }

    /// Parses a configured service type: either a numeric route type or a
    /// mode name. Returns `None` for free-form display labels.
    pub fn parse_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if let Ok(code) = label.parse::<i32>() {
            return Self::from_route_type(code);
        }

        let mode = match label.to_ascii_lowercase().as_str() {
            "tram" | "streetcar" | "light rail" => ServiceType::Tram,
            "subway" | "metro" => ServiceType::Subway,
            "rail" | "train" => ServiceType::Rail,
            "bus" => ServiceType::Bus,
            "ferry" => ServiceType::Ferry,
            "cable tram" | "cable car" => ServiceType::CableTram,
            "aerial lift" | "gondola" => ServiceType::AerialLift,
            "funicular" => ServiceType::Funicular,
            "trolleybus" => ServiceType::Trolleybus,
            "monorail" => ServiceType::Monorail,
            _ => return None,
        };
        Some(mode)
    }
}
