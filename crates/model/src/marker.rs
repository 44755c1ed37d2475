use crate::{MarkerId, ModelError, Result, Rgba, Transform};
use serde::Serialize;

/// Radius used whenever a stored radius is missing or out of range.
pub const DEFAULT_RADIUS: f32 = 0.025;
pub const MAX_RADIUS: f32 = 1.0;

/// Maps any radius outside `(0, MAX_RADIUS]` (or non-finite) to [`DEFAULT_RADIUS`].
#[must_use]
pub fn sanitize_radius(radius: f32) -> f32 {
    if radius.is_finite() && radius > 0.0 && radius <= MAX_RADIUS {
        radius
    } else {
        DEFAULT_RADIUS
    }
}

/// A user-placed point of interest. Equality is by identity only.
#[derive(Debug, Clone, Serialize)]
pub struct Marker {
    id: MarkerId,
    transform: Transform,
    radius: f32,
    color: Rgba,
}

impl Marker {
    /// Creates a marker with a fresh identity. The pose must be rigid and the
    /// radius within `(0, MAX_RADIUS]`.
    pub fn new(transform: Transform, radius: f32, color: Rgba) -> Result<Self> {
        transform.validate()?;
        if sanitize_radius(radius) != radius {
            return Err(ModelError::InvalidRadius(radius));
        }
        Ok(Self {
            id: MarkerId::new(),
            transform,
            radius,
            color: Rgba::new(color.r, color.g, color.b, color.a),
        })
    }

    /// Marker at `transform` with default radius and color.
    pub fn at(transform: Transform) -> Result<Self> {
        Self::new(transform, DEFAULT_RADIUS, Rgba::default())
    }

    /// Rebuilds a persisted marker. Radius and color are sanitized rather
    /// than rejected so one damaged record never poisons a whole list.
    pub fn restore(id: MarkerId, transform: Transform, radius: f32, color: Rgba) -> Result<Self> {
        transform.validate()?;
        Ok(Self {
            id,
            transform,
            radius: sanitize_radius(radius),
            color: Rgba::new(color.r, color.g, color.b, color.a),
        })
    }

    #[must_use]
    pub const fn id(&self) -> MarkerId {
        self.id
    }

    #[must_use]
    pub const fn transform(&self) -> &Transform {
        &self.transform
    }

    #[must_use]
    pub const fn radius(&self) -> f32 {
        self.radius
    }

    #[must_use]
    pub const fn color(&self) -> Rgba {
        self.color
    }

    #[must_use]
    pub fn position(&self) -> [f32; 3] {
        self.transform.translation()
    }
}

impl PartialEq for Marker {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Marker {}
