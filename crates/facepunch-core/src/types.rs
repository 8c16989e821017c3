use serde::{Deserialize, Serialize};

/// A 2-D image coordinate in pixels.
pub type Point = (f32, f32);

/// Six canonical eye contour points: outer corner, two upper-lid points,
/// inner corner, two lower-lid points (p1..p6 in the EAR formula).
pub type EyeContour = [Point; 6];

/// Face bounding box reported by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

impl FaceRegion {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }

    /// Bounding-box area; negative extents count as empty.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> Point {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Facial landmarks for one frame.
///
/// `points` is the full landmark set used for motion analysis. The eye
/// contours are only present when the extractor produces a dense landmark
/// model; five-point detectors leave them empty and blink detection
/// degrades to "not detected".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmarks {
    pub points: Vec<Point>,
    pub left_eye: Option<EyeContour>,
    pub right_eye: Option<EyeContour>,
}

impl Landmarks {
    pub fn from_points(points: Vec<Point>) -> Self {
        Self {
            points,
            left_eye: None,
            right_eye: None,
        }
    }

    pub fn with_eyes(mut self, left: EyeContour, right: EyeContour) -> Self {
        self.left_eye = Some(left);
        self.right_eye = Some(right);
        self
    }

    /// Both eye contours, when the extractor supplied them.
    pub fn eyes(&self) -> Option<(&EyeContour, &EyeContour)> {
        Some((self.left_eye.as_ref()?, self.right_eye.as_ref()?))
    }
}

/// Face embedding vector (dimensionality fixed by the extractor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Returns `None` when the dimensions differ: embeddings from different
    /// models are not comparable.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Some(sum.sqrt())
    }
}

/// An enrolled person.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Unique external identifier (employee id).
    pub id: String,
    pub name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One identity together with its stored embeddings.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity: Identity,
    pub embeddings: Vec<Embedding>,
}

/// Active identities and their embeddings, in registration order.
///
/// Order matters: the matcher breaks distance ties in favour of the entry
/// registered first.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, identity: Identity, embeddings: Vec<Embedding>) {
        self.entries.push(GalleryEntry {
            identity,
            embeddings,
        });
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there is no identity with at least one embedding.
    pub fn is_empty(&self) -> bool {
        self.embedding_count() == 0
    }

    pub fn embedding_count(&self) -> usize {
        self.entries.iter().map(|e| e.embeddings.len()).sum()
    }

    pub fn get(&self, identity_id: &str) -> Option<&GalleryEntry> {
        self.entries.iter().find(|e| e.identity.id == identity_id)
    }
}

impl FromIterator<GalleryEntry> for Gallery {
    fn from_iter<I: IntoIterator<Item = GalleryEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
