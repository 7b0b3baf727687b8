// src/region.rs
use geo::{
    coord, Area, BoundingRect, Contains, Coord, Intersects, LineString, MultiPolygon, Polygon,
    Rect,
};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::{geotransform::crs_eq, SpatialRef};

/// Rule deciding whether a pixel belongs to a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PixelInclusion {
    /// Pixel center lies inside the region or on its boundary
    #[default]
    Centroid,
    /// Pixel footprint overlaps the region interior with non-zero area
    Footprint,
}

/// Area of interest
///
/// A (multi)polygon in a named CRS. Reduction and export only
/// ever ask one question of it: which pixels of a grid does it cover. Two
/// rules are available, see [`PixelInclusion`].
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    geometry: MultiPolygon<f64>,
    crs: String,
    bounds: Rect<f64>,
}

impl Region {
    /// Fails with [`Error::EmptyRegion`] when the geometry has no area.
    pub fn new(geometry: MultiPolygon<f64>, crs: impl Into<String>) -> Result<Self> {
        if geometry.0.is_empty() || geometry.unsigned_area() <= 0.0 {
            return Err(Error::EmptyRegion);
        }
        let bounds = geometry.bounding_rect().ok_or(Error::EmptyRegion)?;
        Ok(Self {
            geometry,
            crs: crs.into(),
            bounds,
        })
    }

    pub fn from_polygon(polygon: Polygon<f64>, crs: impl Into<String>) -> Result<Self> {
        Self::new(MultiPolygon::new(vec![polygon]), crs)
    }

    pub fn from_rect(rect: Rect<f64>, crs: impl Into<String>) -> Result<Self> {
        Self::from_polygon(rect.to_polygon(), crs)
    }

    /// Polygons given as rings of `[x, y]` pairs; the first ring of each
    /// polygon is the exterior, the rest are holes.
    pub fn from_rings(polygons: &[Vec<Vec<[f64; 2]>>], crs: impl Into<String>) -> Result<Self> {
        let polygons = polygons
            .iter()
            .filter_map(|rings| {
                let mut rings = rings.iter().map(|ring| {
                    LineString::from(
                        ring.iter()
                            .map(|[x, y]| coord! { x: *x, y: *y })
                            .collect::<Vec<_>>(),
                    )
                });
                let exterior = rings.next()?;
                Some(Polygon::new(exterior, rings.collect()))
            })
            .collect::<Vec<_>>();
        Self::new(MultiPolygon::new(polygons), crs)
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }

    pub fn intersects_rect(&self, rect: &Rect<f64>) -> bool {
        self.bounds.intersects(rect) && self.geometry.0.iter().any(|p| p.intersects(rect))
    }

    /// Boolean coverage of a `rows x cols` grid.
    ///
    /// The region CRS must match the grid CRS; no reprojection happens here.
    pub fn coverage(
        &self,
        spatial: &SpatialRef,
        shape: (usize, usize),
        rule: PixelInclusion,
    ) -> Result<Array2<bool>> {
        if !crs_eq(&self.crs, &spatial.crs) {
            return Err(Error::CrsMismatch(self.crs.clone(), spatial.crs.clone()));
        }
        let transform = spatial.transform;
        let pixel_area = (transform.pixel_width * transform.pixel_height).abs();
        let mut covered = Array2::from_elem(shape, false);

        Zip::indexed(&mut covered).par_for_each(|(row, col), inside| {
            let footprint = transform.pixel_footprint(row, col);
            if !self.bounds.intersects(&footprint) {
                return;
            }
            *inside = match rule {
                PixelInclusion::Centroid => {
                    let center = transform.pixel_center(row, col);
                    self.geometry.0.iter().any(|p| p.intersects(&center.0))
                }
                PixelInclusion::Footprint => self
                    .geometry
                    .0
                    .iter()
                    .any(|p| overlaps_with_area(p, &footprint, pixel_area)),
            };
        });

        Ok(covered)
    }
}

fn overlaps_with_area(polygon: &Polygon<f64>, rect: &Rect<f64>, pixel_area: f64) -> bool {
    match polygon.bounding_rect() {
        Some(b) if b.intersects(rect) => {}
        _ => return false,
    }
    if polygon.contains(&rect.center()) {
        return true;
    }
    let exterior = clipped_area(polygon.exterior(), rect);
    let holes: f64 = polygon
        .interiors()
        .iter()
        .map(|ring| clipped_area(ring, rect))
        .sum();
    exterior - holes > pixel_area * 1e-9
}

/// Area of `ring` clipped to `rect` (Sutherland-Hodgman)
fn clipped_area(ring: &LineString<f64>, rect: &Rect<f64>) -> f64 {
    let mut points: Vec<Coord<f64>> = ring.0.clone();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }

    for edge in [Edge::Left, Edge::Right, Edge::Bottom, Edge::Top] {
        if points.is_empty() {
            break;
        }
        let input = std::mem::take(&mut points);
        let mut prev = input[input.len() - 1];
        for &cur in &input {
            let cur_in = edge.is_inside(&cur, rect);
            let prev_in = edge.is_inside(&prev, rect);
            if cur_in {
                if !prev_in {
                    points.push(edge.intersect(&prev, &cur, rect));
                }
                points.push(cur);
            } else if prev_in {
                points.push(edge.intersect(&prev, &cur, rect));
            }
            prev = cur;
        }
    }

    if points.len() < 3 {
        return 0.0;
    }
    Polygon::new(LineString::from(points), vec![]).unsigned_area()
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Left,
    Right,
    Bottom,
    Top,
}

impl Edge {
    fn is_inside(&self, p: &Coord<f64>, rect: &Rect<f64>) -> bool {
        match self {
            Edge::Left => p.x >= rect.min().x,
            Edge::Right => p.x <= rect.max().x,
            Edge::Bottom => p.y >= rect.min().y,
            Edge::Top => p.y <= rect.max().y,
        }
    }

    fn intersect(&self, p: &Coord<f64>, q: &Coord<f64>, rect: &Rect<f64>) -> Coord<f64> {
        let dx = q.x - p.x;
        let dy = q.y - p.y;
        match self {
            Edge::Left | Edge::Right => {
                let x = if matches!(self, Edge::Left) {
                    rect.min().x
                } else {
                    rect.max().x
                };
                let t = (x - p.x) / dx;
                coord! { x: x, y: p.y + t * dy }
            }
            Edge::Bottom | Edge::Top => {
                let y = if matches!(self, Edge::Bottom) {
                    rect.min().y
                } else {
                    rect.max().y
                };
                let t = (y - p.y) / dy;
                coord! { x: p.x + t * dx, y: y }
            }
        }
    }
}
