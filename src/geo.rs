//! Boundary and sector geometry.
//!
//! Loads the outer boundary polygon and the named sector polygons once at
//! startup and answers containment queries for the filter pipeline and the
//! sector tracker. Sectors number in the tens, so a linear scan behind a
//! per-polygon bounding-box prefilter is fast enough; no spatial index.

use anyhow::{Context, Result, bail};
use geo::{BoundingRect, Coord, Intersects, LineString, Point, Polygon, Rect, Validation};
use serde_json::Value;
use std::path::Path;

/// Altitude ceiling applied when a sector file omits one.
const UNLIMITED_CEILING_FT: i32 = 99_999;

/// A named sector volume: polygon footprint plus an altitude band.
#[derive(Debug, Clone)]
pub struct Sector {
    pub name: String,
    pub floor_ft: i32,
    pub ceiling_ft: i32,
    pub frequency: Option<String>,
    polygon: Polygon<f64>,
    bbox: Rect<f64>,
}

impl Sector {
    /// Altitude band check, both bounds inclusive.
    pub fn contains_altitude(&self, altitude_ft: i32) -> bool {
        altitude_ft >= self.floor_ft && altitude_ft <= self.ceiling_ft
    }

    /// Footprint check, boundary points treated as inside.
    pub fn contains_point(&self, lat: f64, lon: f64) -> bool {
        let p = Point::new(lon, lat);
        self.bbox.intersects(&p) && self.polygon.intersects(&p)
    }
}

/// The loaded boundary polygon and sector set.
#[derive(Debug, Clone)]
pub struct GeoIndex {
    boundary: Polygon<f64>,
    boundary_bbox: Rect<f64>,
    // Sorted by name so membership queries come back in deterministic order.
    sectors: Vec<Sector>,
}

impl GeoIndex {
    /// Load boundary and sectors from their geometry files. Any validation
    /// failure here is fatal to startup.
    pub fn load(boundary_path: &Path, sectors_path: &Path) -> Result<Self> {
        let boundary_doc: Value = read_json(boundary_path)?;
        let ring = boundary_ring(&boundary_doc)
            .with_context(|| format!("invalid boundary file {}", boundary_path.display()))?;
        let boundary = build_polygon("boundary", &ring)?;
        let boundary_bbox = boundary
            .bounding_rect()
            .context("boundary polygon has no bounding box")?;

        let sectors_doc: Value = read_json(sectors_path)?;
        let mut sectors = parse_sectors(&sectors_doc)
            .with_context(|| format!("invalid sector file {}", sectors_path.display()))?;
        sectors.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in sectors.windows(2) {
            if pair[0].name == pair[1].name {
                bail!("duplicate sector name {:?}", pair[0].name);
            }
        }

        Ok(Self {
            boundary,
            boundary_bbox,
            sectors,
        })
    }

    /// Build an index directly from rings, used by tests and tools.
    pub fn from_rings(
        boundary: &[(f64, f64)],
        sectors: Vec<(String, i32, i32, Vec<(f64, f64)>)>,
    ) -> Result<Self> {
        let boundary = build_polygon("boundary", boundary)?;
        let boundary_bbox = boundary
            .bounding_rect()
            .context("boundary polygon has no bounding box")?;
        let mut built = Vec::with_capacity(sectors.len());
        for (name, floor_ft, ceiling_ft, ring) in sectors {
            let polygon = build_polygon(&name, &ring)?;
            let bbox = polygon
                .bounding_rect()
                .with_context(|| format!("sector {name} has no bounding box"))?;
            built.push(Sector {
                name,
                floor_ft,
                ceiling_ft,
                frequency: None,
                polygon,
                bbox,
            });
        }
        built.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self {
            boundary,
            boundary_bbox,
            sectors: built,
        })
    }

    /// Is the point inside the outer boundary? Boundary points count as in.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        let p = Point::new(lon, lat);
        self.boundary_bbox.intersects(&p) && self.boundary.intersects(&p)
    }

    /// Names of sectors whose footprint contains the point and whose
    /// altitude band includes `altitude_ft`, ascending by name.
    pub fn sectors_at(&self, lat: f64, lon: f64, altitude_ft: i32) -> Vec<&str> {
        self.sectors
            .iter()
            .filter(|s| s.contains_altitude(altitude_ft) && s.contains_point(lat, lon))
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Names of sectors whose footprint contains the point, ignoring the
    /// altitude band. Used for exit detection: altitude drift inside a
    /// sector must not close it.
    pub fn sectors_containing(&self, lat: f64, lon: f64) -> Vec<&str> {
        self.sectors
            .iter()
            .filter(|s| s.contains_point(lat, lon))
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn sector(&self, name: &str) -> Option<&Sector> {
        self.sectors.iter().find(|s| s.name == name)
    }

    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

/// Validate a (lat, lon) ring and build the internal polygon.
fn build_polygon(name: &str, ring: &[(f64, f64)]) -> Result<Polygon<f64>> {
    // Tolerate an explicitly closed ring.
    let ring = if ring.len() > 1 && ring.first() == ring.last() {
        &ring[..ring.len() - 1]
    } else {
        ring
    };
    if ring.len() < 3 {
        bail!("polygon {name:?} has {} vertices, need at least 3", ring.len());
    }
    for &(lat, lon) in ring {
        if !(-90.0..=90.0).contains(&lat) {
            bail!("polygon {name:?} has latitude {lat} outside [-90, 90]");
        }
        if !(-180.0..=180.0).contains(&lon) {
            bail!("polygon {name:?} has longitude {lon} outside [-180, 180]");
        }
    }
    // Antimeridian-crossing polygons are not supported.
    for i in 0..ring.len() {
        let a = ring[i].1;
        let b = ring[(i + 1) % ring.len()].1;
        if (a - b).abs() > 180.0 {
            bail!("polygon {name:?} crosses the antimeridian between {a} and {b}");
        }
    }

    let exterior = LineString::from(
        ring.iter()
            .map(|&(lat, lon)| Coord { x: lon, y: lat })
            .collect::<Vec<_>>(),
    );
    let polygon = Polygon::new(exterior, vec![]);
    if !polygon.is_valid() {
        bail!("polygon {name:?} is not valid (self-intersecting or degenerate)");
    }
    Ok(polygon)
}

/// Extract the boundary ring from either a GeoJSON-like document or a plain
/// coordinate-list layout.
fn boundary_ring(doc: &Value) -> Result<Vec<(f64, f64)>> {
    if let Some(ring) = geojson_polygon_ring(doc) {
        return Ok(ring);
    }
    if let Some(list) = doc.get("points").or_else(|| doc.get("coordinates")) {
        return latlon_list(list);
    }
    if doc.is_array() {
        return latlon_list(doc);
    }
    bail!("unrecognized boundary layout");
}

/// GeoJSON rings are [lon, lat]; convert to (lat, lon). Accepts a bare
/// Polygon geometry, a Feature, or the first feature of a collection.
fn geojson_polygon_ring(doc: &Value) -> Option<Vec<(f64, f64)>> {
    let geometry = match doc.get("type").and_then(Value::as_str) {
        Some("Polygon") => doc,
        Some("Feature") => doc.get("geometry")?,
        Some("FeatureCollection") => doc.get("features")?.as_array()?.first()?.get("geometry")?,
        _ => return None,
    };
    if geometry.get("type").and_then(Value::as_str) != Some("Polygon") {
        return None;
    }
    let exterior = geometry.get("coordinates")?.as_array()?.first()?.as_array()?;
    let mut ring = Vec::with_capacity(exterior.len());
    for pair in exterior {
        let pair = pair.as_array()?;
        let lon = pair.first()?.as_f64()?;
        let lat = pair.get(1)?.as_f64()?;
        ring.push((lat, lon));
    }
    Some(ring)
}

/// Parse a plain [[lat, lon], ...] list.
fn latlon_list(list: &Value) -> Result<Vec<(f64, f64)>> {
    let arr = list.as_array().context("coordinate list is not an array")?;
    let mut ring = Vec::with_capacity(arr.len());
    for pair in arr {
        let pair = pair.as_array().context("coordinate pair is not an array")?;
        if pair.len() < 2 {
            bail!("coordinate pair has fewer than two elements");
        }
        let lat = pair[0].as_f64().context("latitude is not a number")?;
        let lon = pair[1].as_f64().context("longitude is not a number")?;
        ring.push((lat, lon));
    }
    Ok(ring)
}

fn parse_sectors(doc: &Value) -> Result<Vec<Sector>> {
    // GeoJSON-like feature collection.
    if doc.get("type").and_then(Value::as_str) == Some("FeatureCollection") {
        let features = doc
            .get("features")
            .and_then(Value::as_array)
            .context("feature collection has no features array")?;
        return features.iter().map(sector_from_feature).collect();
    }
    // Plain layout: {"sectors": [{name, floor_ft, ceiling_ft, points}]}.
    if let Some(list) = doc.get("sectors").and_then(Value::as_array) {
        return list.iter().map(sector_from_plain).collect();
    }
    bail!("unrecognized sector file layout");
}

fn sector_from_feature(feature: &Value) -> Result<Sector> {
    let props = feature
        .get("properties")
        .context("sector feature has no properties")?;
    let name = props
        .get("name")
        .and_then(Value::as_str)
        .context("sector feature has no name")?
        .to_string();
    let floor_ft = int_prop(props, &["floor_ft", "floor", "lower_ft"]).unwrap_or(0);
    let ceiling_ft =
        int_prop(props, &["ceiling_ft", "ceiling", "upper_ft"]).unwrap_or(UNLIMITED_CEILING_FT);
    let frequency = props
        .get("frequency")
        .and_then(Value::as_str)
        .map(str::to_string);
    let ring = geojson_polygon_ring(feature)
        .with_context(|| format!("sector {name:?} has no polygon geometry"))?;
    build_sector(name, floor_ft, ceiling_ft, frequency, &ring)
}

fn sector_from_plain(entry: &Value) -> Result<Sector> {
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .context("sector entry has no name")?
        .to_string();
    let floor_ft = int_prop(entry, &["floor_ft", "floor"]).unwrap_or(0);
    let ceiling_ft = int_prop(entry, &["ceiling_ft", "ceiling"]).unwrap_or(UNLIMITED_CEILING_FT);
    let frequency = entry
        .get("frequency")
        .and_then(Value::as_str)
        .map(str::to_string);
    let points = entry
        .get("points")
        .with_context(|| format!("sector {name:?} has no points"))?;
    let ring = latlon_list(points)?;
    build_sector(name, floor_ft, ceiling_ft, frequency, &ring)
}

fn build_sector(
    name: String,
    floor_ft: i32,
    ceiling_ft: i32,
    frequency: Option<String>,
    ring: &[(f64, f64)],
) -> Result<Sector> {
    if ceiling_ft < floor_ft {
        bail!("sector {name:?} has ceiling {ceiling_ft} below floor {floor_ft}");
    }
    let polygon = build_polygon(&name, ring)?;
    let bbox = polygon
        .bounding_rect()
        .with_context(|| format!("sector {name:?} has no bounding box"))?;
    Ok(Sector {
        name,
        floor_ft,
        ceiling_ft,
        frequency,
        polygon,
        bbox,
    })
}

fn int_prop(props: &Value, keys: &[&str]) -> Option<i32> {
    keys.iter()
        .find_map(|k| props.get(k))
        .and_then(Value::as_i64)
        .map(|v| v as i32)
}
