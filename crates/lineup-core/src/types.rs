use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default maximum Euclidean distance for a gallery match.
///
/// For L2-normalised descriptors `d = sqrt(2 - 2 * cos)`, so 1.10 sits at a
/// cosine similarity of roughly 0.40.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.10;

/// Label of an enrolled person.
///
/// The on-disk and wire form is the canonical decimal rendering. Leading
/// zeros, signs and whitespace are rejected so that one directory maps to
/// exactly one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(u32);

impl Identity {
    pub const fn new(label: u32) -> Self {
        Self(label)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for Identity {
    fn from(label: u32) -> Self {
        Self(label)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let canonical = !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && (s == "0" || !s.starts_with('0'));
        if !canonical {
            return Err(format!("not an identity label: {s:?}"));
        }
        s.parse::<u32>()
            .map(Self)
            .map_err(|e| format!("not an identity label: {s:?} ({e})"))
    }
}

/// Detection strategy. `Fast` trades recall on small faces for latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    #[default]
    #[serde(alias = "hog")]
    Fast,
    #[serde(alias = "cnn")]
    Accurate,
}

impl DetectionMode {
    /// Square detector input resolution used for this mode.
    pub fn input_size(self) -> usize {
        match self {
            Self::Fast => 320,
            Self::Accurate => 640,
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fast => "fast",
            Self::Accurate => "accurate",
        })
    }
}

impl FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" | "hog" => Ok(Self::Fast),
            "accurate" | "cnn" => Ok(Self::Accurate),
            other => Err(format!("unknown detection mode: {other:?} (expected fast or accurate)")),
        }
    }
}

/// Which training samples of an identity end up in the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplePolicy {
    /// Only the first sample per identity that yields a descriptor.
    First,
    /// Every sample that yields a descriptor.
    #[default]
    All,
}

impl fmt::Display for SamplePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::First => "first",
            Self::All => "all",
        })
    }
}

impl FromStr for SamplePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "all" => Ok(Self::All),
            other => Err(format!("unknown sample policy: {other:?} (expected first or all)")),
        }
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Numeric description of one detected face (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two descriptors.
    ///
    /// Descriptors of different length never match: the distance is infinite.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One `(descriptor, identity)` pair of a gallery.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity: Identity,
    pub descriptor: Descriptor,
}

/// Immutable classifier state. A rebuild produces a new `Gallery`; an
/// existing one is never modified.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    version: u64,
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new(version: u64, entries: Vec<GalleryEntry>) -> Self {
        Self { version, entries }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct identities present.
    pub fn identity_count(&self) -> usize {
        let mut ids: Vec<Identity> = self.entries.iter().map(|e| e.identity).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Classify `probe` against this gallery with the nearest-neighbour matcher.
    pub fn classify(&self, probe: &Descriptor, threshold: f32) -> Classification {
        NearestNeighborMatcher.compare(probe, &self.entries, threshold)
    }
}

/// Outcome of classifying one descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Match { identity: Identity, distance: f32 },
    /// Nearest entry was farther than the threshold, or the gallery was empty.
    Unknown { nearest: Option<f32> },
}

impl Classification {
    pub fn identity(&self) -> Option<Identity> {
        match self {
            Self::Match { identity, .. } => Some(*identity),
            Self::Unknown { .. } => None,
        }
    }

    pub fn distance(&self) -> Option<f32> {
        match self {
            Self::Match { distance, .. } => Some(*distance),
            Self::Unknown { nearest } => *nearest,
        }
    }
}

/// Strategy for comparing a probe descriptor against gallery entries.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, gallery: &[GalleryEntry], threshold: f32)
        -> Classification;
}

/// Euclidean nearest-neighbour matcher.
///
/// Visits every entry. On equal distances the earliest entry wins. A match
/// requires `distance <= threshold`.
pub struct NearestNeighborMatcher;

impl Matcher for NearestNeighborMatcher {
    fn compare(
        &self,
        probe: &Descriptor,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> Classification {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let dist = probe.distance(&entry.descriptor);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= threshold => Classification::Match {
                identity: gallery[idx].identity,
                distance: best_dist,
            },
            Some(_) => Classification::Unknown {
                nearest: Some(best_dist),
            },
            None => Classification::Unknown { nearest: None },
        }
    }
}
