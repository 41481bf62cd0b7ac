//! Place-name resolution against a static gazetteer.
//!
//! Names are matched exactly, then by prefix, then by substring; the first
//! entry in table order wins within each tier. Keys are compared as-is,
//! without case or whitespace normalization.

use std::fmt;

use crate::models::Coordinate;

/// A gazetteer row: place name and its approximate location.
pub type Entry = (&'static str, Coordinate);

/// How a name was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Prefix,
    Substring,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exact => "exact",
            Self::Prefix => "prefix",
            Self::Substring => "substring",
        })
    }
}

/// A successful lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    pub key: &'static str,
    pub coordinate: Coordinate,
    pub kind: MatchKind,
}

/// Read-only name → coordinate table.
#[derive(Debug, Clone, Copy)]
pub struct Gazetteer {
    entries: &'static [Entry],
}

impl Gazetteer {
    /// The built-in table of Japanese prefectures and seismic regions.
    #[must_use]
    pub const fn builtin() -> Self {
        Self::from_entries(BUILTIN)
    }

    #[must_use]
    pub const fn from_entries(entries: &'static [Entry]) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a name to a coordinate, or `None` when nothing matches.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Coordinate> {
        self.lookup(name).map(|r| r.coordinate)
    }

    /// Resolve a name, reporting which entry matched and how.
    ///
    /// Prefix means either string starts with the other (a region name
    /// such as `石川県能登地方` hits the `石川県` row, and a short name hits a
    /// longer row). Substring likewise checks containment both ways.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Resolved> {
        if name.is_empty() || self.is_empty() {
            return None;
        }

        let hit = |kind: MatchKind, pred: &dyn Fn(&str) -> bool| {
            self.entries
                .iter()
                .find(|(key, _)| pred(key))
                .map(|&(key, coordinate)| Resolved {
                    key,
                    coordinate,
                    kind,
                })
        };

        hit(MatchKind::Exact, &|key: &str| key == name)
            .or_else(|| {
                hit(MatchKind::Prefix, &|key: &str| {
                    name.starts_with(key) || key.starts_with(name)
                })
            })
            .or_else(|| {
                hit(MatchKind::Substring, &|key: &str| {
                    name.contains(key) || key.contains(name)
                })
            })
    }

    /// Resolve every name, silently skipping the ones that do not match.
    pub fn resolve_all<'a, I>(&self, names: I) -> Vec<Coordinate>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter_map(|name| {
                let resolved = self.resolve(name);
                if resolved.is_none() {
                    tracing::debug!(name, "place name not in gazetteer");
                }
                resolved
            })
            .collect()
    }
}

const fn at(lat: f64, lon: f64) -> Coordinate {
    Coordinate::new(lat, lon)
}

/// Specific seismic regions come before prefectures so exact and prefix
/// matches prefer them.
static BUILTIN: &[Entry] = &[
    // Hokkaido
    ("石狩地方南部", at(42.9, 141.6)),
    ("胆振地方中東部", at(42.7, 142.0)),
    ("浦河沖", at(41.9, 142.6)),
    ("十勝沖", at(42.0, 143.7)),
    ("釧路沖", at(42.5, 144.6)),
    ("根室半島南東沖", at(43.0, 146.0)),
    ("渡島半島東方沖", at(41.9, 141.3)),
    ("北海道東方沖", at(43.5, 147.5)),
    ("国後島付近", at(44.1, 145.8)),
    ("択捉島南東沖", at(44.5, 148.5)),
    // Tohoku
    ("青森県東方沖", at(41.0, 142.5)),
    ("岩手県沖", at(39.7, 142.3)),
    ("三陸沖", at(39.0, 143.5)),
    ("宮城県沖", at(38.3, 141.9)),
    ("福島県沖", at(37.4, 141.4)),
    ("福島県中通り", at(37.4, 140.4)),
    ("福島県浜通り", at(37.1, 140.9)),
    // Kanto / Chubu
    ("茨城県沖", at(36.3, 141.1)),
    ("茨城県南部", at(36.1, 140.1)),
    ("茨城県北部", at(36.6, 140.6)),
    ("千葉県東方沖", at(35.4, 140.9)),
    ("千葉県北西部", at(35.6, 140.1)),
    ("埼玉県南部", at(35.9, 139.6)),
    ("東京都２３区", at(35.7, 139.7)),
    ("神奈川県東部", at(35.4, 139.6)),
    ("伊豆大島近海", at(34.7, 139.4)),
    ("静岡県中部", at(35.0, 138.4)),
    ("長野県中部", at(36.2, 138.0)),
    ("岐阜県飛騨地方", at(36.2, 137.3)),
    ("新潟県中越地方", at(37.3, 138.9)),
    ("石川県能登地方", at(37.3, 136.9)),
    ("能登半島沖", at(37.5, 137.2)),
    // Kinki / Chugoku / Shikoku
    ("京都府南部", at(34.9, 135.7)),
    ("大阪府北部", at(34.8, 135.6)),
    ("兵庫県南東部", at(34.7, 135.2)),
    ("和歌山県北部", at(34.1, 135.3)),
    ("紀伊水道", at(33.9, 134.9)),
    ("鳥取県中部", at(35.4, 133.8)),
    ("島根県東部", at(35.3, 133.0)),
    ("安芸灘", at(34.1, 132.5)),
    ("愛媛県南予", at(33.3, 132.6)),
    ("高知県中部", at(33.6, 133.5)),
    // Kyushu / Okinawa
    ("熊本県熊本地方", at(32.8, 130.8)),
    ("大分県中部", at(33.2, 131.5)),
    ("日向灘", at(32.0, 131.9)),
    ("宮崎県南部平野部", at(31.9, 131.4)),
    ("鹿児島湾", at(31.5, 130.6)),
    ("トカラ列島近海", at(29.5, 129.6)),
    ("奄美大島近海", at(28.3, 129.5)),
    ("沖縄本島近海", at(26.4, 127.9)),
    ("宮古島近海", at(24.8, 125.3)),
    ("与那国島近海", at(24.4, 123.0)),
    // Prefectures (approximate centroids)
    ("北海道", at(43.06, 141.35)),
    ("青森県", at(40.82, 140.74)),
    ("岩手県", at(39.70, 141.15)),
    ("宮城県", at(38.27, 140.87)),
    ("秋田県", at(39.72, 140.10)),
    ("山形県", at(38.24, 140.36)),
    ("福島県", at(37.75, 140.47)),
    ("茨城県", at(36.34, 140.45)),
    ("栃木県", at(36.57, 139.88)),
    ("群馬県", at(36.39, 139.06)),
    ("埼玉県", at(35.86, 139.65)),
    ("千葉県", at(35.61, 140.12)),
    ("東京都", at(35.69, 139.69)),
    ("神奈川県", at(35.45, 139.64)),
    ("新潟県", at(37.90, 139.02)),
    ("富山県", at(36.70, 137.21)),
    ("石川県", at(36.59, 136.63)),
    ("福井県", at(36.07, 136.22)),
    ("山梨県", at(35.66, 138.57)),
    ("長野県", at(36.65, 138.18)),
    ("岐阜県", at(35.39, 136.72)),
    ("静岡県", at(34.98, 138.38)),
    ("愛知県", at(35.18, 136.91)),
    ("三重県", at(34.73, 136.51)),
    ("滋賀県", at(35.00, 135.87)),
    ("京都府", at(35.02, 135.76)),
    ("大阪府", at(34.69, 135.52)),
    ("兵庫県", at(34.69, 135.18)),
    ("奈良県", at(34.69, 135.83)),
    ("和歌山県", at(34.23, 135.17)),
    ("鳥取県", at(35.50, 134.24)),
    ("島根県", at(35.47, 133.05)),
    ("岡山県", at(34.66, 133.93)),
    ("広島県", at(34.40, 132.46)),
    ("山口県", at(34.19, 131.47)),
    ("徳島県", at(34.07, 134.56)),
    ("香川県", at(34.34, 134.04)),
    ("愛媛県", at(33.84, 132.77)),
    ("高知県", at(33.56, 133.53)),
    ("福岡県", at(33.61, 130.42)),
    ("佐賀県", at(33.25, 130.30)),
    ("長崎県", at(32.74, 129.87)),
    ("熊本県", at(32.79, 130.74)),
    ("大分県", at(33.24, 131.61)),
    ("宮崎県", at(31.91, 131.42)),
    ("鹿児島県", at(31.56, 130.56)),
    ("沖縄県", at(26.21, 127.68)),
];
