//! Finite patches of the Penrose P3 rhombus tiling.
//!
//! A patch is grown by recursively subdividing four kinds of oriented
//! Robinson triangles against a bounding polygon, pairing mirror-image
//! triangles into rhombi across their shared long side, and classifying
//! every rhombus against the finite family of canonical unit shapes.
//! Adjacency between tiles is resolved purely from hierarchical
//! addresses; no geometric search is involved.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use tracing::{debug, warn};

use rand::Rng;

//////////////////////////////////////////////////////////////////////
// use error chain so we can use Result<> everywhere
// for error handling

#[macro_use]
extern crate error_chain;

pub mod errors {

    error_chain! {

        errors {

            NoNeighbor(coord: String, side: usize) {
                description("side borders the tiling boundary")
                display("no neighbor for '{}' on side {}", coord, side)
            }

            UnknownAdjacencyPrefix(prefix: String) {
                description("address prefix missing from the adjacency table")
                display("unknown adjacency prefix '{}'", prefix)
            }

            PlacementNotFound(radius: f64) {
                description("no bounding polygon fits the start tile")
                display("could not place a polygon of radius {} inside the start tile", radius)
            }

        }

    }

}

use errors::*;

//////////////////////////////////////////////////////////////////////
// define some statically allocated maps for
// lookups during parsing

use phf::phf_map;

//////////////////////////////////////////////////////////////////////
// constants for Penrose tile geometry

/// Reciprocal golden ratio; every subdivision splits an edge at this
/// fraction of its length.
pub const GOLDEN_RATIO: f64 = 0.6180339887498948482;

const PI: f64 = std::f64::consts::PI;
const TAU: f64 = 2.0 * PI;

// sin(36 deg) / sin(54 deg), the base:leg proportion of the start tiles
const ROBINSON_RATIO: f64 = 0.7265425280053609;

// coordinates are rounded to this many decimals when keyed
const KEY_PRECISION: usize = 10;

// allowed disagreement between the two diagonal midpoints of a rhombus,
// in unit-edge-length space
const DIAGONAL_TOLERANCE: f64 = 1e-6;

//////////////////////////////////////////////////////////////////////
// pull in some types from nalgebra

pub type Vec2d = nalgebra::Vector2<f64>;
pub type Point2d = nalgebra::geometry::Point2<f64>;

//////////////////////////////////////////////////////////////////////
// small point helpers shared by the engine and exposed for renderers

// centroid of a set of points
pub fn average_points(pts: &[Point2d]) -> Point2d {

    let mut sum = Vec2d::zeros();

    for p in pts {
        sum += p.coords;
    }

    Point2d::from(sum / (pts.len() as f64))

}

// a + (b - a) * t
pub fn interpolate_points(a: &Point2d, b: &Point2d, t: f64) -> Point2d {
    a + (b - a) * t
}

// signed area of the triangle (p, a, b), up to a factor of two
fn orient_sign(p: &Point2d, a: &Point2d, b: &Point2d) -> f64 {
    (p.x - b.x) * (a.y - b.y) - (a.x - b.x) * (p.y - b.y)
}

// p is inside (or on the edge of) the triangle when the three
// orientation signs agree
pub fn point_in_triangle(p: &Point2d,
                         v1: &Point2d,
                         v2: &Point2d,
                         v3: &Point2d) -> bool {

    let d1 = orient_sign(p, v1, v2);
    let d2 = orient_sign(p, v2, v3);
    let d3 = orient_sign(p, v3, v1);

    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;

    !(has_neg && has_pos)

}

//////////////////////////////////////////////////////////////////////
// triangle-triangle overlap via barycentric sign tests: map the three
// vertices of a into the frame of b and check whether they all land
// strictly outside one of b's edges (and vice versa)

fn all_outside_one_side(a: &[Point2d; 3], b: &[Point2d; 3]) -> bool {

    let dxa = a[0].x - b[2].x;
    let dya = a[0].y - b[2].y;
    let dxb = a[1].x - b[2].x;
    let dyb = a[1].y - b[2].y;
    let dxc = a[2].x - b[2].x;
    let dyc = a[2].y - b[2].y;

    let dx21 = b[2].x - b[1].x;
    let dy12 = b[1].y - b[2].y;

    let d = dy12 * (b[0].x - b[2].x) + dx21 * (b[0].y - b[2].y);

    let sa = dy12 * dxa + dx21 * dya;
    let sb = dy12 * dxb + dx21 * dyb;
    let sc = dy12 * dxc + dx21 * dyc;

    let ta = (b[2].y - b[0].y) * dxa + (b[0].x - b[2].x) * dya;
    let tb = (b[2].y - b[0].y) * dxb + (b[0].x - b[2].x) * dyb;
    let tc = (b[2].y - b[0].y) * dxc + (b[0].x - b[2].x) * dyc;

    if d < 0.0 {
        (sa >= 0.0 && sb >= 0.0 && sc >= 0.0) ||
            (ta >= 0.0 && tb >= 0.0 && tc >= 0.0) ||
            (sa + ta <= d && sb + tb <= d && sc + tc <= d)
    } else {
        (sa <= 0.0 && sb <= 0.0 && sc <= 0.0) ||
            (ta <= 0.0 && tb <= 0.0 && tc <= 0.0) ||
            (sa + ta >= d && sb + tb >= d && sc + tc >= d)
    }

}

pub fn triangles_intersect(a: &[Point2d; 3], b: &[Point2d; 3]) -> bool {
    !(all_outside_one_side(a, b) || all_outside_one_side(b, a))
}

pub fn triangle_lists_intersect(a: &[Triangle], b: &[Triangle]) -> bool {

    for ta in a {
        for tb in b {
            if triangles_intersect(&ta.points(), &tb.points()) {
                return true;
            }
        }
    }

    false

}

//////////////////////////////////////////////////////////////////////
// Rect2d type has lower-left p0 and upper-right p1

#[derive(Debug, Clone, Copy)]
pub struct Rect2d {

    pub p0: Point2d,
    pub p1: Point2d

}

impl Rect2d {

    // empty rectangle has p0 > p1
    pub fn empty() -> Self {

        let p0 = Point2d::new(f64::MAX, f64::MAX);
        let p1 = -p0;

        Rect2d { p0: p0, p1: p1 }

    }

    // expand this rect to include the given point
    pub fn expand(&mut self, p: &Point2d) {
        self.p0 = self.p0.inf(p);
        self.p1 = self.p1.sup(p);
    }

    // dimensions of this rect
    pub fn dims(&self) -> Vec2d {
        self.p1 - self.p0
    }

    // center of this rect
    pub fn center(&self) -> Point2d {
        self.p0 + 0.5 * (self.p1 - self.p0)
    }

}

/// Axis-aligned bounds over the vertices of a triangle list.
pub fn bounds_of_triangles(tris: &[Triangle]) -> Rect2d {

    let mut rect = Rect2d::empty();

    for tri in tris {
        for p in &tri.points() {
            rect.expand(p);
        }
    }

    rect

}

/// Axis-aligned bounds over the vertices of a rhombus collection.
pub fn bounds_of_rhombuses<'a, I>(rhombs: I) -> Rect2d
    where I: IntoIterator<Item = &'a Rhombus>
{

    let mut rect = Rect2d::empty();

    for rh in rhombs {
        for p in &rh.points() {
            rect.expand(p);
        }
    }

    rect

}

//////////////////////////////////////////////////////////////////////
// fill colors are rendering metadata only; Invisible marks tiles that
// were discarded or culled but kept around for diagnostics

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub enum Fill {
    Blue,
    Red,
    LightBlue,
    Pink,
    Invisible
}

impl Fill {

    // lighter shade of the two base colors, used to mark rhombi whose
    // missing half was synthesized by fill regrowth
    pub fn lighten(self) -> Fill {
        match self {
            Fill::Blue => Fill::LightBlue,
            Fill::Red => Fill::Pink,
            other => {
                warn!("no lighter shade of {:?}", other);
                other
            }
        }
    }

}

//////////////////////////////////////////////////////////////////////
// the four oriented Robinson triangle kinds

#[derive(Debug, PartialEq, PartialOrd, Eq, Ord, Clone, Copy, Hash)]
pub enum TriangleKind {
    C,
    D,
    X,
    Y
}

static KIND_LOOKUP: phf::Map<&'static str, TriangleKind> = phf_map! {
    "C" => TriangleKind::C,
    "D" => TriangleKind::D,
    "X" => TriangleKind::X,
    "Y" => TriangleKind::Y,
};

impl TriangleKind {

    pub fn letter(self) -> char {
        match self {
            TriangleKind::C => 'C',
            TriangleKind::D => 'D',
            TriangleKind::X => 'X',
            TriangleKind::Y => 'Y'
        }
    }

    // C and D halves make the thin rhombus, X and Y the thick one
    pub fn base_fill(self) -> Fill {
        match self {
            TriangleKind::C | TriangleKind::D => Fill::Blue,
            TriangleKind::X | TriangleKind::Y => Fill::Red
        }
    }

    fn from_letter(c: char) -> Option<TriangleKind> {
        match c {
            'C' => Some(TriangleKind::C),
            'D' => Some(TriangleKind::D),
            'X' => Some(TriangleKind::X),
            'Y' => Some(TriangleKind::Y),
            _ => None
        }
    }

}

impl fmt::Display for TriangleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for TriangleKind {

    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        KIND_LOOKUP.get(s).copied().ok_or_else(
            || format!("unknown triangle kind \"{}\"", s).into())
    }

}

//////////////////////////////////////////////////////////////////////
// hierarchical tile addresses
//
// a tile's address is its kind followed by the kinds of all its
// ancestors, most recent first, ending at the root.  internally the
// tags are stored root-first so that the recursive neighbor walk can
// peel ancestors off the end with plain subslices; the leaf-first
// string form only exists at the boundary.

/// Address of a tile in the subdivision tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileCoord {
    tags: Vec<TriangleKind>
}

impl TileCoord {

    pub fn root(kind: TriangleKind) -> Self {
        TileCoord { tags: vec![kind] }
    }

    // kind of the tile itself (the first letter of the string form)
    pub fn kind(&self) -> TriangleKind {
        debug_assert!(!self.tags.is_empty());
        *self.tags.last().unwrap()
    }

    // number of tags, i.e. one more than the generation count
    pub fn depth(&self) -> usize {
        self.tags.len()
    }

    pub fn is_root(&self) -> bool {
        self.tags.len() == 1
    }

    // address of a child produced by one more subdivision
    pub fn child(&self, kind: TriangleKind) -> TileCoord {

        let mut tags = Vec::with_capacity(self.tags.len() + 1);
        tags.extend_from_slice(&self.tags);
        tags.push(kind);

        TileCoord { tags: tags }

    }

    // true when the string form of self is a suffix of other's, i.e.
    // self lies on other's ancestor path
    pub fn is_suffix_of(&self, other: &TileCoord) -> bool {
        other.tags.starts_with(&self.tags)
    }

    fn as_slice(&self) -> &[TriangleKind] {
        &self.tags
    }

}

impl fmt::Display for TileCoord {

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {

        for tag in self.tags.iter().rev() {
            write!(f, "{}", tag.letter())?;
        }

        Ok(())

    }

}

impl FromStr for TileCoord {

    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {

        if s.is_empty() {
            bail!("empty tile address");
        }

        let mut tags = Vec::with_capacity(s.len());

        for c in s.chars().rev() {
            match TriangleKind::from_letter(c) {
                Some(kind) => tags.push(kind),
                None => bail!("invalid tag '{}' in tile address \"{}\"", c, s)
            }
        }

        Ok(TileCoord { tags: tags })

    }

}

fn tags_to_string(tags: &[TriangleKind]) -> String {
    tags.iter().rev().map(|t| t.letter()).collect()
}

//////////////////////////////////////////////////////////////////////
// half-tiles: triangles in generation vertex order
//
// the vertex order here is the one the split rules and the neighbor
// algorithm's side numbering assume.  side 0 is (v2, v3), the long
// side shared with the mirror half of the same rhombus; side 1 is
// (v1, v2) and side 2 is (v3, v1).

#[derive(Debug, Clone)]
pub struct HalfTile {

    pub kind: TriangleKind,

    pub v1: Point2d,
    pub v2: Point2d,
    pub v3: Point2d,

    pub coord: TileCoord,
    pub fill: Fill

}

// start vertices for the C/D root: vertical base on the right,
// apex pointing left, sized to fit the width x height box
fn cd_start_vertices(width: f64, height: f64) -> [Point2d; 3] {

    let hei = (width * ROBINSON_RATIO).min(height);
    let half_base = hei / (2.0 * ROBINSON_RATIO);

    [Point2d::new(width / 2.0 + half_base, hei),
     Point2d::new(width / 2.0 + half_base, 0.0),
     Point2d::new(width / 2.0 - half_base, hei / 2.0)]

}

// start vertices for the X/Y root: horizontal base on top,
// apex pointing down
fn xy_start_vertices(width: f64, height: f64) -> [Point2d; 3] {

    let hei = (width / 2.0 * ROBINSON_RATIO).min(height);
    let offset = hei / ROBINSON_RATIO;

    [Point2d::new(width / 2.0 - offset, hei),
     Point2d::new(width / 2.0 + offset, hei),
     Point2d::new(width / 2.0, 0.0)]

}

impl HalfTile {

    fn new(kind: TriangleKind,
           v1: Point2d,
           v2: Point2d,
           v3: Point2d,
           coord: TileCoord) -> Self {

        let fill = kind.base_fill();

        HalfTile {
            kind: kind,
            v1: v1,
            v2: v2,
            v3: v3,
            coord: coord,
            fill: fill
        }

    }

    /// The single root tile of the given kind, sized to fit a
    /// width x height bounding box.
    pub fn start_tile(kind: TriangleKind, width: f64, height: f64) -> Self {

        let vs = match kind {
            TriangleKind::C | TriangleKind::D => cd_start_vertices(width, height),
            TriangleKind::X | TriangleKind::Y => xy_start_vertices(width, height)
        };

        HalfTile::new(kind, vs[0], vs[1], vs[2], TileCoord::root(kind))

    }

    /// Golden-ratio subdivision: two children for C and D, three for
    /// X and Y.  Children cover the parent exactly.
    pub fn split(&self) -> Vec<HalfTile> {

        let gr = GOLDEN_RATIO;

        match self.kind {

            TriangleKind::C => {

                let s = interpolate_points(&self.v3, &self.v2, gr);

                vec![
                    HalfTile::new(TriangleKind::C, self.v2, s, self.v1,
                                  self.coord.child(TriangleKind::C)),
                    HalfTile::new(TriangleKind::Y, self.v3, self.v1, s,
                                  self.coord.child(TriangleKind::Y)),
                ]

            }

            TriangleKind::D => {

                let s = interpolate_points(&self.v3, &self.v1, gr);

                vec![
                    HalfTile::new(TriangleKind::D, s, self.v1, self.v2,
                                  self.coord.child(TriangleKind::D)),
                    HalfTile::new(TriangleKind::X, self.v2, self.v3, s,
                                  self.coord.child(TriangleKind::X)),
                ]

            }

            TriangleKind::X => {

                let s0 = interpolate_points(&self.v1, &self.v2, gr);
                let s2 = interpolate_points(&self.v1, &self.v3, gr);

                vec![
                    HalfTile::new(TriangleKind::Y, self.v1, s0, s2,
                                  self.coord.child(TriangleKind::Y)),
                    HalfTile::new(TriangleKind::C, self.v3, s2, s0,
                                  self.coord.child(TriangleKind::C)),
                    HalfTile::new(TriangleKind::X, self.v2, self.v3, s0,
                                  self.coord.child(TriangleKind::X)),
                ]

            }

            TriangleKind::Y => {

                let s0 = interpolate_points(&self.v2, &self.v1, gr);
                let s1 = interpolate_points(&self.v2, &self.v3, gr);

                vec![
                    HalfTile::new(TriangleKind::Y, self.v3, self.v1, s0,
                                  self.coord.child(TriangleKind::Y)),
                    HalfTile::new(TriangleKind::D, s1, self.v3, s0,
                                  self.coord.child(TriangleKind::D)),
                    HalfTile::new(TriangleKind::X, s0, self.v2, s1,
                                  self.coord.child(TriangleKind::X)),
                ]

            }

        }

    }

    pub fn points(&self) -> [Point2d; 3] {
        [self.v1, self.v2, self.v3]
    }

    pub fn side(&self, i: usize) -> (Point2d, Point2d) {
        debug_assert!(i < 3);
        match i {
            0 => (self.v2, self.v3),
            1 => (self.v1, self.v2),
            _ => (self.v3, self.v1)
        }
    }

    pub fn point_inside(&self, p: &Point2d) -> bool {
        point_in_triangle(p, &self.v1, &self.v2, &self.v3)
    }

    pub fn center(&self) -> Point2d {
        average_points(&self.points())
    }

    // fixed relabeling into the canonical order renderers expect
    pub fn to_triangle(&self) -> Triangle {
        Triangle {
            kind: self.kind,
            v1: self.v3,
            v2: self.v2,
            v3: self.v1,
            coord: self.coord.clone(),
            fill: self.fill
        }
    }

}

//////////////////////////////////////////////////////////////////////
// triangles in canonical (output) vertex order

#[derive(Debug, Clone)]
pub struct Triangle {

    pub kind: TriangleKind,

    pub v1: Point2d,
    pub v2: Point2d,
    pub v3: Point2d,

    pub coord: TileCoord,
    pub fill: Fill

}

impl Triangle {

    pub fn points(&self) -> [Point2d; 3] {
        [self.v1, self.v2, self.v3]
    }

    pub fn side(&self, i: usize) -> (Point2d, Point2d) {
        debug_assert!(i < 3);
        match i {
            0 => (self.v2, self.v3),
            1 => (self.v1, self.v2),
            _ => (self.v3, self.v1)
        }
    }

    pub fn point_inside(&self, p: &Point2d) -> bool {
        point_in_triangle(p, &self.v1, &self.v2, &self.v3)
    }

    pub fn center(&self) -> Point2d {
        average_points(&self.points())
    }

    fn rescaled(&self, scale: &UnitScale) -> Triangle {
        Triangle {
            kind: self.kind,
            v1: scale.apply(&self.v1),
            v2: scale.apply(&self.v2),
            v3: scale.apply(&self.v3),
            coord: self.coord.clone(),
            fill: self.fill
        }
    }

}

//////////////////////////////////////////////////////////////////////
// a rhombus is two mirror-image half-tiles joined along side 0;
// v1..v4 run around the perimeter, so (v1, v3) and (v2, v4) are the
// diagonals and must share a midpoint

#[derive(Debug, Clone)]
pub struct Rhombus {

    pub v1: Point2d,
    pub v2: Point2d,
    pub v3: Point2d,
    pub v4: Point2d,

    pub coord: String,
    pub fill: Fill

}

impl Rhombus {

    pub fn points(&self) -> [Point2d; 4] {
        [self.v1, self.v2, self.v3, self.v4]
    }

    pub fn side(&self, i: usize) -> (Point2d, Point2d) {
        debug_assert!(i < 4);
        let pts = self.points();
        (pts[i], pts[(i + 1) % 4])
    }

}

// key of the rhombus made of the two given half-tile addresses
fn rhomb_coord(a: &TileCoord, b: &TileCoord) -> String {

    let sa = a.to_string();
    let sb = b.to_string();

    if sa <= sb {
        format!("{},{}", sa, sb)
    } else {
        format!("{},{}", sb, sa)
    }

}

//////////////////////////////////////////////////////////////////////
// adjacency rule tables
//
// the tables below encode the topology of Robinson-triangle
// subdivision: which child of which parent borders what.  keys are
// the (kind, parent kind) pairs reachable through the split rules;
// each entry has one rule per side.  an Internal rule stays inside
// the same parent; an External rule crosses into the neighbor of the
// parent on the given parent side, and the entry table then says
// which child of that neighbor is adjacent, and on which side.  when
// the rule carries a hand, the entry's opposite hand applies.
//
// any deviation here silently corrupts adjacency, so the tables must
// match the published subdivision combinatorics exactly.

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Hand {
    Left,
    Right
}

#[derive(Debug, Clone, Copy)]
enum NeighborRule {
    Internal { prefix: TriangleKind, enter: usize },
    External { side: usize, hand: Option<Hand> }
}

#[derive(Debug, Clone, Copy)]
enum EntryRule {
    Whole { part: TriangleKind, side: usize },
    Split { left: (TriangleKind, usize), right: (TriangleKind, usize) }
}

static ADJ_CC: [NeighborRule; 3] = [
    NeighborRule::External { side: 1, hand: Some(Hand::Right) },
    NeighborRule::Internal { prefix: TriangleKind::Y, enter: 1 },
    NeighborRule::External { side: 0, hand: None },
];

static ADJ_YC: [NeighborRule; 3] = [
    NeighborRule::External { side: 2, hand: None },
    NeighborRule::Internal { prefix: TriangleKind::C, enter: 1 },
    NeighborRule::External { side: 1, hand: Some(Hand::Left) },
];

static ADJ_XD: [NeighborRule; 3] = [
    NeighborRule::External { side: 1, hand: None },
    NeighborRule::External { side: 2, hand: Some(Hand::Right) },
    NeighborRule::Internal { prefix: TriangleKind::D, enter: 2 },
];

static ADJ_DD: [NeighborRule; 3] = [
    NeighborRule::External { side: 2, hand: Some(Hand::Left) },
    NeighborRule::External { side: 0, hand: None },
    NeighborRule::Internal { prefix: TriangleKind::X, enter: 2 },
];

static ADJ_YX: [NeighborRule; 3] = [
    NeighborRule::External { side: 0, hand: Some(Hand::Right) },
    NeighborRule::Internal { prefix: TriangleKind::C, enter: 1 },
    NeighborRule::External { side: 2, hand: Some(Hand::Left) },
];

static ADJ_CX: [NeighborRule; 3] = [
    NeighborRule::External { side: 2, hand: Some(Hand::Right) },
    NeighborRule::Internal { prefix: TriangleKind::Y, enter: 1 },
    NeighborRule::Internal { prefix: TriangleKind::X, enter: 1 },
];

static ADJ_XX: [NeighborRule; 3] = [
    NeighborRule::External { side: 1, hand: None },
    NeighborRule::Internal { prefix: TriangleKind::C, enter: 2 },
    NeighborRule::External { side: 0, hand: Some(Hand::Left) },
];

static ADJ_YY: [NeighborRule; 3] = [
    NeighborRule::External { side: 2, hand: None },
    NeighborRule::External { side: 0, hand: Some(Hand::Right) },
    NeighborRule::Internal { prefix: TriangleKind::D, enter: 1 },
];

static ADJ_DY: [NeighborRule; 3] = [
    NeighborRule::External { side: 1, hand: Some(Hand::Left) },
    NeighborRule::Internal { prefix: TriangleKind::Y, enter: 2 },
    NeighborRule::Internal { prefix: TriangleKind::X, enter: 2 },
];

static ADJ_XY: [NeighborRule; 3] = [
    NeighborRule::External { side: 0, hand: Some(Hand::Left) },
    NeighborRule::External { side: 1, hand: Some(Hand::Right) },
    NeighborRule::Internal { prefix: TriangleKind::D, enter: 2 },
];

fn adjacency_rules(kind: TriangleKind,
                   parent: TriangleKind) -> Option<&'static [NeighborRule; 3]> {

    use TriangleKind::{C, D, X, Y};

    match (kind, parent) {
        (C, C) => Some(&ADJ_CC),
        (Y, C) => Some(&ADJ_YC),
        (X, D) => Some(&ADJ_XD),
        (D, D) => Some(&ADJ_DD),
        (Y, X) => Some(&ADJ_YX),
        (C, X) => Some(&ADJ_CX),
        (X, X) => Some(&ADJ_XX),
        (Y, Y) => Some(&ADJ_YY),
        (D, Y) => Some(&ADJ_DY),
        (X, Y) => Some(&ADJ_XY),
        _ => None
    }

}

static ENTRY_C: [EntryRule; 3] = [
    EntryRule::Whole { part: TriangleKind::C, side: 2 },
    EntryRule::Split { left: (TriangleKind::Y, 2), right: (TriangleKind::C, 0) },
    EntryRule::Whole { part: TriangleKind::Y, side: 0 },
];

static ENTRY_D: [EntryRule; 3] = [
    EntryRule::Whole { part: TriangleKind::D, side: 1 },
    EntryRule::Whole { part: TriangleKind::X, side: 0 },
    EntryRule::Split { left: (TriangleKind::D, 0), right: (TriangleKind::X, 1) },
];

static ENTRY_X: [EntryRule; 3] = [
    EntryRule::Split { left: (TriangleKind::X, 2), right: (TriangleKind::Y, 0) },
    EntryRule::Whole { part: TriangleKind::X, side: 0 },
    EntryRule::Split { left: (TriangleKind::Y, 2), right: (TriangleKind::C, 0) },
];

static ENTRY_Y: [EntryRule; 3] = [
    EntryRule::Split { left: (TriangleKind::X, 0), right: (TriangleKind::Y, 1) },
    EntryRule::Split { left: (TriangleKind::D, 0), right: (TriangleKind::X, 1) },
    EntryRule::Whole { part: TriangleKind::Y, side: 0 },
];

fn entry_rules(kind: TriangleKind) -> &'static [EntryRule; 3] {
    match kind {
        TriangleKind::C => &ENTRY_C,
        TriangleKind::D => &ENTRY_D,
        TriangleKind::X => &ENTRY_X,
        TriangleKind::Y => &ENTRY_Y
    }
}

//////////////////////////////////////////////////////////////////////
// neighbor resolution: pure address arithmetic, no geometry
//
// recursion peels one generation off the address at a time; an
// Internal rule terminates immediately, an External rule resolves
// the parent's neighbor first and then enters the appropriate child
// through the entry table

fn neighbor_tags(tags: &[TriangleKind],
                 side: usize) -> Result<(Vec<TriangleKind>, usize)> {

    debug_assert!(side < 3);

    let n = tags.len();

    if n < 2 {
        bail!(ErrorKind::NoNeighbor(tags_to_string(tags), side));
    }

    let kind = tags[n - 1];
    let parent = tags[n - 2];

    let rules = adjacency_rules(kind, parent).ok_or_else(|| {
        Error::from(ErrorKind::UnknownAdjacencyPrefix(
            format!("{}{}", kind.letter(), parent.letter())))
    })?;

    match rules[side] {

        NeighborRule::Internal { prefix, enter } => {

            let mut out = tags[..n - 1].to_vec();
            out.push(prefix);

            Ok((out, enter))

        }

        NeighborRule::External { side: parent_side, hand } => {

            let (mut out, entered) = neighbor_tags(&tags[..n - 1], parent_side)?;

            debug_assert!(!out.is_empty());

            let entry_kind = out[out.len() - 1];

            // a handed rule always meets a split entry (and takes the
            // opposite hand); an unhanded rule always meets a whole
            // one.  anything else means the tables disagree
            let (part, enter) = match (hand, &entry_rules(entry_kind)[entered]) {
                (Some(Hand::Left), EntryRule::Split { right, .. }) => *right,
                (Some(Hand::Right), EntryRule::Split { left, .. }) => *left,
                (None, EntryRule::Whole { part, side }) => (*part, *side),
                _ => bail!("adjacency and entry tables disagree at {}{} side {}",
                           kind.letter(), parent.letter(), side)
            };

            out.push(part);

            Ok((out, enter))

        }

    }

}

/// Address of the tile across `side`, plus the side of that tile the
/// boundary is entered on.  Fails with `NoNeighbor` when the side
/// borders unresolved territory beyond the root.
pub fn neighbor(coord: &TileCoord, side: usize) -> Result<(TileCoord, usize)> {

    let (tags, enter) = neighbor_tags(coord.as_slice(), side)?;

    Ok((TileCoord { tags: tags }, enter))

}

/// Like [`neighbor`], but maps the expected boundary failure to `None`
/// for callers that tolerate ragged edges.
pub fn neighbor_or_null(coord: &TileCoord, side: usize) -> Option<TileCoord> {

    match neighbor(coord, side) {

        Ok((nei, _)) => Some(nei),

        Err(err) => {
            match err.kind() {
                ErrorKind::NoNeighbor(..) => {
                    debug!("no neighbor for {} on side {}", coord, side)
                }
                _ => warn!("neighbor lookup failed for {} on side {}: {}",
                           coord, side, err)
            }
            None
        }

    }

}

//////////////////////////////////////////////////////////////////////
// canonical rhombus shapes
//
// twenty unit rhombi: the two base shapes (72/108 and 36/144 degree
// interior angles) at the ten tenth-turn rotations, plus the same ten
// rotated a half turn.  pairing order is not fixed, so a generated
// rhombus may come out in either antipodal orientation

// round a coordinate for keying, clamping tiny magnitudes so that a
// negative zero never leaks into the key
fn key_coord(x: f64, prec: usize) -> String {

    if x.abs() < 10f64.powi(-(prec as i32)) {
        format!("{:.*}", prec, 0.0)
    } else {
        format!("{:.*}", prec, x)
    }

}

/// Rounded-coordinate key of a normalized rhombus vertex quad.
pub fn rhomb_key(vs: &[Point2d; 4]) -> String {

    let mut parts = Vec::with_capacity(8);

    for v in vs {
        parts.push(key_coord(v.x, KEY_PRECISION));
        parts.push(key_coord(v.y, KEY_PRECISION));
    }

    parts.join(",")

}

// normalize a rhombus to its own frame: unit mean edge length,
// centered on the midpoint of the v1-v3 diagonal
fn unit_vectors(rh: &Rhombus) -> [Point2d; 4] {

    let pts = rh.points();

    let mut total = 0.0;

    for i in 0..4 {
        let edge = pts[(i + 1) % 4] - pts[i];
        total += edge.x.hypot(edge.y);
    }

    let mean = total / 4.0;

    if mean == 0.0 {
        return pts;
    }

    let factor = 1.0 / mean;

    let scaled = [
        Point2d::new(pts[0].x * factor, pts[0].y * factor),
        Point2d::new(pts[1].x * factor, pts[1].y * factor),
        Point2d::new(pts[2].x * factor, pts[2].y * factor),
        Point2d::new(pts[3].x * factor, pts[3].y * factor),
    ];

    let cx = (scaled[0].x + scaled[2].x) / 2.0;
    let cy = (scaled[0].y + scaled[2].y) / 2.0;

    [
        Point2d::new(scaled[0].x - cx, scaled[0].y - cy),
        Point2d::new(scaled[1].x - cx, scaled[1].y - cy),
        Point2d::new(scaled[2].x - cx, scaled[2].y - cy),
        Point2d::new(scaled[3].x - cx, scaled[3].y - cy),
    ]

}

fn calculate_base_rhombuses() -> Vec<[Point2d; 4]> {

    let cos36_2 = (TAU / 10.0).cos() / 2.0;
    let sin36_2 = (TAU / 10.0).sin() / 2.0;
    let cos72_2 = (TAU / 5.0).cos() / 2.0;
    let sin72_2 = (TAU / 5.0).sin() / 2.0;

    // thick rhombus, long diagonal horizontal
    let thick = [
        Point2d::new(0.5 - cos72_2, -sin72_2),
        Point2d::new(0.5 + cos72_2, sin72_2),
        Point2d::new(cos72_2 - 0.5, sin72_2),
        Point2d::new(-0.5 - cos72_2, -sin72_2),
    ];

    // thin rhombus
    let thin = [
        Point2d::new(0.5 + cos36_2, sin36_2),
        Point2d::new(cos36_2 - 0.5, sin36_2),
        Point2d::new(-0.5 - cos36_2, -sin36_2),
        Point2d::new(0.5 - cos36_2, -sin36_2),
    ];

    let rots = [
        0.0,
        TAU / 5.0,
        TAU * 2.0 / 5.0,
        TAU * 3.0 / 5.0,
        TAU * 4.0 / 5.0,
        TAU * 2.0 / 10.0,
        -TAU / 10.0,
        -TAU * 4.0 / 10.0,
        TAU * 3.0 / 10.0,
        0.0,
    ];

    let mut shapes = Vec::with_capacity(20);

    for i in 0..20 {

        let rhomb = if i % 10 < 5 { &thick } else { &thin };

        let rot = if i < 10 {
            rots[i]
        } else {
            rots[i - 10] + TAU / 2.0
        };

        let (s, c) = (rot.sin(), rot.cos());

        let mut rv = [Point2d::origin(); 4];

        for (j, p) in rhomb.iter().enumerate() {
            // the y axis flips into screen coordinates here
            rv[j] = Point2d::new(p.x * c - p.y * s, -(p.x * s + p.y * c));
        }

        shapes.push([rv[0], rv[3], rv[2], rv[1]]);

    }

    shapes

}

struct BaseTable {
    shapes: Vec<[Point2d; 4]>,
    key_to_base: HashMap<String, usize>,
    base_to_key: Vec<String>
}

static BASE_TABLE: LazyLock<BaseTable> = LazyLock::new(|| {

    let shapes = calculate_base_rhombuses();

    let mut key_to_base = HashMap::new();
    let mut base_to_key = Vec::with_capacity(shapes.len());

    for (i, rh) in shapes.iter().enumerate() {
        let key = rhomb_key(rh);
        key_to_base.insert(key.clone(), i);
        base_to_key.push(key);
    }

    BaseTable {
        shapes: shapes,
        key_to_base: key_to_base,
        base_to_key: base_to_key
    }

});

/// The twenty canonical unit rhombi, indexed by base class.
pub fn base_rhombuses() -> &'static [[Point2d; 4]] {
    &BASE_TABLE.shapes
}

//////////////////////////////////////////////////////////////////////
// bounding polygon shapes

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub enum BoundsShape {
    Square,
    Pentagon,
    Hexagon
}

static SHAPE_LOOKUP: phf::Map<&'static str, BoundsShape> = phf_map! {
    "square" => BoundsShape::Square,
    "pentagon" => BoundsShape::Pentagon,
    "hexagon" => BoundsShape::Hexagon,
};

impl BoundsShape {

    fn sides(self) -> usize {
        match self {
            BoundsShape::Square => 4,
            BoundsShape::Pentagon => 5,
            BoundsShape::Hexagon => 6
        }
    }

    // per-shape angular offset, in turns
    fn offset(self) -> f64 {
        match self {
            BoundsShape::Square => 0.5,
            BoundsShape::Pentagon => -0.25,
            BoundsShape::Hexagon => 0.0
        }
    }

}

impl FromStr for BoundsShape {

    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SHAPE_LOOKUP.get(s).copied().ok_or_else(
            || format!("unknown bounds shape \"{}\"", s).into())
    }

}

// vertex fan for the bounding shape.  a fractional offset that does
// not divide evenly into the side count emits one extra closing
// vertex on top of the first (the pentagon case); the fan
// triangulation just gains a degenerate sliver there
fn regular_polygon(center: &Point2d, r: f64, shape: BoundsShape) -> Vec<Point2d> {

    let sides = shape.sides();

    let mut pts = Vec::with_capacity(sides);
    let mut v = shape.offset();

    while v < sides as f64 {

        let theta = v * TAU / (sides as f64);

        pts.push(Point2d::new(theta.cos() * r + center.x,
                              theta.sin() * r + center.y));

        v += 1.0;

    }

    pts

}

// fan triangulation anchored at the first vertex
fn triangulate(polygon: &[Point2d]) -> Vec<[Point2d; 3]> {

    let mut tris = Vec::new();

    for i in 2..polygon.len() {
        tris.push([polygon[0], polygon[i - 1], polygon[i]]);
    }

    tris

}

//////////////////////////////////////////////////////////////////////
// ragged-boundary resolution modes

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub enum ResolveRagged {
    None,
    Cull,
    Fill
}

static RESOLVE_LOOKUP: phf::Map<&'static str, ResolveRagged> = phf_map! {
    "none" => ResolveRagged::None,
    "cull" => ResolveRagged::Cull,
    "fill" => ResolveRagged::Fill,
};

impl FromStr for ResolveRagged {

    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RESOLVE_LOOKUP.get(s).copied().ok_or_else(
            || format!("unknown ragged-resolution mode \"{}\"", s).into())
    }

}

//////////////////////////////////////////////////////////////////////
// subdivision driver shared by the main growth and fill regrowth:
// replace every tile with its children each round, keep only the
// children that pass the filter, stop once the survivors satisfy the
// stopping test (or nothing survives)

fn generate_triangles<K, E>(seed: Vec<HalfTile>,
                            mut keep: K,
                            mut enough: E) -> (Vec<HalfTile>, Vec<HalfTile>)
    where K: FnMut(&HalfTile) -> bool,
          E: FnMut(&[HalfTile]) -> bool
{

    let mut triangles = seed;
    let mut discarded = Vec::new();

    loop {

        let mut children = Vec::new();

        for tri in &triangles {
            children.extend(tri.split());
        }

        triangles = Vec::with_capacity(children.len());

        for tri in children {
            if keep(&tri) {
                triangles.push(tri);
            } else {
                discarded.push(tri);
            }
        }

        if triangles.is_empty() || enough(&triangles) {
            break;
        }

    }

    (triangles, discarded)

}

//////////////////////////////////////////////////////////////////////
// random placement of the bounding polygon inside the start tile:
// bounded retries, halving the radius after each failed round

fn place_polygon(start: &HalfTile,
                 width: f64,
                 shape: BoundsShape) -> Result<(Point2d, f64, Vec<Point2d>)> {

    let pts = start.points();

    let xmin = pts.iter().map(|p| p.x).fold(f64::MAX, f64::min);
    let xmax = pts.iter().map(|p| p.x).fold(f64::MIN, f64::max);
    let ymin = pts.iter().map(|p| p.y).fold(f64::MAX, f64::min);
    let ymax = pts.iter().map(|p| p.y).fold(f64::MIN, f64::max);

    let mut rng = rand::rng();

    let mut radius = rng.random_range(width / 1000.0..width / 8.0);

    for _ in 0..5 {

        let xlo = xmin + radius;
        let xhi = xmax - radius;
        let ylo = ymin + radius;
        let yhi = ymax - radius;

        if xlo < xhi && ylo < yhi {

            for _ in 0..10 {

                let candidate = Point2d::new(rng.random_range(xlo..xhi),
                                             rng.random_range(ylo..yhi));

                let polygon = regular_polygon(&candidate, radius, shape);

                if polygon.iter().all(|p| start.point_inside(p)) {
                    return Ok((candidate, radius, polygon));
                }

            }

        }

        radius /= 2.0;

    }

    Err(ErrorKind::PlacementNotFound(radius).into())

}

//////////////////////////////////////////////////////////////////////
// uniform map from raw coordinates into unit-edge-length space

/// `p -> (p - origin) * factor`, where origin is the top-left corner
/// of the rhombus bounds and factor the reciprocal mean edge length.
#[derive(Debug, Clone, Copy)]
pub struct UnitScale {
    origin: Point2d,
    factor: f64
}

impl UnitScale {

    fn new(origin: Point2d, factor: f64) -> Self {
        UnitScale { origin: origin, factor: factor }
    }

    pub fn apply(&self, p: &Point2d) -> Point2d {
        Point2d::from((p - self.origin) * self.factor)
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn origin(&self) -> Point2d {
        self.origin
    }

}

//////////////////////////////////////////////////////////////////////
// result aggregates

/// One rhombus of the finished patch together with its half-tiles,
/// adjacency and canonical classification.
#[derive(Debug, Clone)]
pub struct RhombEntry {

    pub rhombus: Rhombus,

    pub tri1: Triangle,
    pub tri2: Triangle,

    // unit-scaled copies of the half-tiles, for renderers that draw them
    pub tri1_scaled: Option<Triangle>,
    pub tri2_scaled: Option<Triangle>,

    // rhombus coordinates across the four sides, None at the boundary
    pub neighbors: [Option<String>; 4],

    // index into the canonical shape table, None when unmatched
    pub base: Option<usize>,

    pub center: Option<Point2d>,
    pub key: Option<String>

}

/// Everything one `generate` call produces.
#[derive(Debug, Clone)]
pub struct PenroseTiling {

    pub center: Point2d,
    pub r: f64,
    pub polygon: Vec<Point2d>,

    pub triangles: Vec<Triangle>,
    pub discarded_triangles: Vec<Triangle>,
    pub culled_triangles: Vec<Triangle>,

    pub rhombuses: BTreeMap<String, RhombEntry>,
    pub culled_rhombuses: Vec<Rhombus>,

    pub fills_sought: Vec<String>,
    pub fills_found: Vec<Triangle>,

    pub scale: UnitScale

}

//////////////////////////////////////////////////////////////////////
// iterative boundary culling: repeatedly remove rhombi with fewer
// than two neighbors, clearing the back references, until nothing
// removable remains.  driven by a worklist seeded with the initial
// low-degree set so that each key is revisited only when one of its
// neighbors goes away.

fn degree(neighbors: &[Option<String>; 4]) -> usize {
    neighbors.iter().filter(|n| n.is_some()).count()
}

fn cull_low_degree(rhombhash: &mut BTreeMap<String, RhombEntry>) -> Vec<Rhombus> {

    let mut culled = Vec::new();

    let mut queue: VecDeque<String> = rhombhash
        .iter()
        .filter(|(_, entry)| degree(&entry.neighbors) < 2)
        .map(|(coord, _)| coord.clone())
        .collect();

    while let Some(coord) = queue.pop_front() {

        // the entry may be gone already; degree only ever drops, so
        // a stale queue item just gets re-checked here
        let low = match rhombhash.get(&coord) {
            Some(entry) => degree(&entry.neighbors) < 2,
            None => false
        };

        if !low {
            continue;
        }

        if let Some(entry) = rhombhash.remove(&coord) {

            for nei in entry.neighbors.iter().flatten() {

                if let Some(other) = rhombhash.get_mut(nei) {

                    for slot in other.neighbors.iter_mut() {
                        if slot.as_deref() == Some(coord.as_str()) {
                            *slot = None;
                        }
                    }

                    queue.push_back(nei.clone());

                }

            }

            culled.push(entry.rhombus);

        }

    }

    culled

}

//////////////////////////////////////////////////////////////////////
// the generate call: grow, resolve the ragged boundary, pair into
// rhombi, wire adjacency, classify, cull, normalize

/// Generate a Penrose P3 patch of at least `min_tiles` rhombi inside a
/// regular polygon of the given shape.
///
/// When `center` and `radius` are both supplied the polygon is placed
/// there directly and the computation is fully deterministic;
/// otherwise a bounded random search looks for a placement inside the
/// start tile and fails with `PlacementNotFound` when none exists.
pub fn generate(min_tiles: usize,
                width: f64,
                height: f64,
                bounds_shape: BoundsShape,
                start_kind: TriangleKind,
                resolve_ragged: ResolveRagged,
                center: Option<Point2d>,
                radius: Option<f64>) -> Result<PenroseTiling> {

    let start = HalfTile::start_tile(start_kind, width, height);

    let (tiling_center, r, polygon) = match (center, radius) {
        (Some(c), Some(r)) => (c, r, regular_polygon(&c, r, bounds_shape)),
        _ => place_polygon(&start, width, bounds_shape)?
    };

    let poly_tris = triangulate(&polygon);

    // grow: keep every child that still touches the polygon, until
    // half the surviving count exceeds the requested tile count
    let (mut triangles, mut discarded) = generate_triangles(
        vec![start.clone()],
        |tri| {
            let pts = tri.points();
            poly_tris.iter().any(|ptri| triangles_intersect(ptri, &pts))
        },
        |tris| tris.len() > 2 * min_tiles);

    let by_coord: HashMap<TileCoord, usize> = triangles
        .iter()
        .enumerate()
        .map(|(i, tri)| (tri.coord.clone(), i))
        .collect();

    // ragged-edge detection: a tile whose long-side partner fell
    // outside the surviving set cannot form a rhombus
    let mut removal: Vec<usize> = Vec::new();
    let mut sought: Vec<TileCoord> = Vec::new();

    for (i, tri) in triangles.iter().enumerate() {

        let partner = neighbor_or_null(&tri.coord, 0);

        let present = match &partner {
            Some(coord) => by_coord.contains_key(coord),
            None => false
        };

        if present {
            continue;
        }

        match resolve_ragged {

            ResolveRagged::Cull => removal.push(i),

            ResolveRagged::Fill => {

                // only worth regrowing when both flank neighbors
                // survived; otherwise the tile goes the way of cull
                let flanked = [1, 2].iter().all(|&side| {
                    match neighbor_or_null(&tri.coord, side) {
                        Some(coord) => by_coord.contains_key(&coord),
                        None => false
                    }
                });

                match (partner, flanked) {
                    (Some(coord), true) => sought.push(coord),
                    _ => removal.push(i)
                }

            }

            ResolveRagged::None => {}

        }

    }

    // fill regrowth: rerun the subdivision from the root, keeping
    // only ancestors of a sought address, down to the sought depth
    let mut found: Vec<HalfTile> = Vec::new();

    if !sought.is_empty() {

        let target_depth = sought[0].depth();

        let (matches, _) = generate_triangles(
            vec![start],
            |tri| sought.iter().any(|s| tri.coord.is_suffix_of(s)),
            |tris| match tris.first() {
                Some(tri) => tri.coord.depth() == target_depth,
                None => true
            });

        found = matches;

        if found.len() < sought.len() {
            warn!("found {} of {} sought fill tiles", found.len(), sought.len());
            for coord in &sought {
                debug!("sought {}", coord);
            }
            for tri in &found {
                debug!("found {}", tri.coord);
            }
        }

        triangles.extend(found.iter().cloned());

    }

    let by_coord: HashMap<TileCoord, usize> = triangles
        .iter()
        .enumerate()
        .map(|(i, tri)| (tri.coord.clone(), i))
        .collect();

    // pair each tile with its long-side partner into a rhombus; each
    // pair is keyed once by the sorted coordinate join
    let mut rhombhash: BTreeMap<String, RhombEntry> = BTreeMap::new();
    let mut tri_to_rhomb: HashMap<TileCoord, String> = HashMap::new();

    for tri in &triangles {

        let partner_coord = match neighbor_or_null(&tri.coord, 0) {
            Some(coord) => coord,
            None => continue
        };

        let partner = match by_coord.get(&partner_coord) {
            Some(&j) => &triangles[j],
            None => continue
        };

        let coord = rhomb_coord(&tri.coord, &partner_coord);

        if rhombhash.contains_key(&coord) {
            continue;
        }

        tri_to_rhomb.insert(tri.coord.clone(), coord.clone());
        tri_to_rhomb.insert(partner_coord.clone(), coord.clone());

        let fill = if sought.contains(&tri.coord) || sought.contains(&partner_coord) {
            tri.fill.lighten()
        } else {
            tri.fill
        };

        let rhombus = Rhombus {
            v1: tri.v3,
            v2: tri.v2,
            v3: partner.v3,
            v4: partner.v2,
            coord: coord.clone(),
            fill: fill
        };

        rhombhash.insert(coord, RhombEntry {
            rhombus: rhombus,
            tri1: tri.to_triangle(),
            tri2: partner.to_triangle(),
            tri1_scaled: None,
            tri2_scaled: None,
            neighbors: [None, None, None, None],
            base: None,
            center: None,
            key: None
        });

    }

    // splice out the tiles marked for removal, highest index first
    let mut culled_tiles: Vec<HalfTile> = Vec::new();

    for &index in removal.iter().rev() {
        if index < triangles.len() {
            culled_tiles.push(triangles.remove(index));
        }
    }

    // rhombus adjacency: sides 1 and 2 of each constituent half-tile,
    // mapped back to the owning rhombus
    let mut neighbor_sets: Vec<(String, [Option<String>; 4])> = Vec::new();

    for (coord, entry) in rhombhash.iter() {

        let mut slots: [Option<String>; 4] = [None, None, None, None];
        let mut slot = 0;

        for tri in &[&entry.tri1, &entry.tri2] {
            for &side in &[1usize, 2] {
                slots[slot] = neighbor_or_null(&tri.coord, side)
                    .and_then(|nei| tri_to_rhomb.get(&nei).cloned());
                slot += 1;
            }
        }

        neighbor_sets.push((coord.clone(), slots));

    }

    for (coord, slots) in neighbor_sets {
        if let Some(entry) = rhombhash.get_mut(&coord) {
            entry.neighbors = slots;
        }
    }

    // canonical classification: key every rhombus in its own unit
    // frame and look it up in the base table
    for entry in rhombhash.values_mut() {

        let vs = unit_vectors(&entry.rhombus);
        let key = rhomb_key(&vs);

        entry.base = BASE_TABLE.key_to_base.get(&key).copied();
        entry.key = Some(key);

    }

    let culled_rhombs = if resolve_ragged == ResolveRagged::Cull {
        cull_low_degree(&mut rhombhash)
    } else {
        Vec::new()
    };

    // everything discarded or culled stays around for diagnostics but
    // is marked invisible
    for tri in discarded.iter_mut().chain(culled_tiles.iter_mut()) {
        tri.fill = Fill::Invisible;
    }

    if rhombhash.is_empty() {
        bail!("no rhombuses generated");
    }

    // normalization: uniform scale so the mean rhombus edge length
    // is one, anchored at the top-left corner of the patch
    let mut total = 0.0;
    let mut count = 0usize;

    for entry in rhombhash.values() {
        let pts = entry.rhombus.points();
        for i in 0..4 {
            let edge = pts[(i + 1) % 4] - pts[i];
            total += edge.x.hypot(edge.y);
            count += 1;
        }
    }

    let mean_edge = total / (count as f64);

    let bounds = bounds_of_rhombuses(rhombhash.values().map(|e| &e.rhombus));

    let scale = UnitScale::new(bounds.p0, 1.0 / mean_edge);

    for entry in rhombhash.values_mut() {

        let rh = &mut entry.rhombus;

        rh.v1 = scale.apply(&rh.v1);
        rh.v2 = scale.apply(&rh.v2);
        rh.v3 = scale.apply(&rh.v3);
        rh.v4 = scale.apply(&rh.v4);

        entry.tri1_scaled = Some(entry.tri1.rescaled(&scale));
        entry.tri2_scaled = Some(entry.tri2.rescaled(&scale));

    }

    // rhombus centers from the diagonal midpoints, which must agree
    for (coord, entry) in rhombhash.iter_mut() {

        let rh = &entry.rhombus;

        let c1 = Point2d::from((rh.v1.coords + rh.v3.coords) / 2.0);
        let c2 = Point2d::from((rh.v2.coords + rh.v4.coords) / 2.0);

        if (c1 - c2).norm() > DIAGONAL_TOLERANCE {
            warn!("diagonal midpoints of {} disagree: {:?} vs {:?}", coord, c1, c2);
        }

        entry.center = Some(c1);

    }

    // report classification gaps: unmatched keys point at a geometry
    // or precision bug, unused bases are merely informational
    let mut bases_found: HashSet<usize> = HashSet::new();

    for entry in rhombhash.values() {
        match entry.base {
            Some(base) => {
                bases_found.insert(base);
            }
            None => {
                if let Some(key) = &entry.key {
                    warn!("no canonical shape for key {}", key);
                }
            }
        }
    }

    for base in 0..10 {
        if !bases_found.contains(&base) {
            debug!("base class {} ({}) unused", base, BASE_TABLE.base_to_key[base]);
        }
    }

    Ok(PenroseTiling {
        center: tiling_center,
        r: r,
        polygon: polygon,
        triangles: triangles.iter().map(HalfTile::to_triangle).collect(),
        discarded_triangles: discarded.iter().map(HalfTile::to_triangle).collect(),
        culled_triangles: culled_tiles.iter().map(HalfTile::to_triangle).collect(),
        rhombuses: rhombhash,
        culled_rhombuses: culled_rhombs,
        fills_sought: sought.iter().map(|coord| coord.to_string()).collect(),
        fills_found: found.iter().map(HalfTile::to_triangle).collect(),
        scale: scale
    })

}

//////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {

    use super::*;
    use approx::assert_relative_eq;

    fn pt(x: f64, y: f64) -> Point2d {
        Point2d::new(x, y)
    }

    fn area(v1: &Point2d, v2: &Point2d, v3: &Point2d) -> f64 {
        ((v2.x - v1.x) * (v3.y - v1.y) - (v3.x - v1.x) * (v2.y - v1.y)).abs() / 2.0
    }

    fn assert_points_eq(a: &Point2d, b: &Point2d) {
        assert_relative_eq!(a.x, b.x, max_relative = 1e-12);
        assert_relative_eq!(a.y, b.y, max_relative = 1e-12);
    }

    #[test]
    fn coord_roundtrips_through_string_form() {

        for s in &["C", "Y", "CXY", "XYXYYCCCCC", "DDDDDDDYCX"] {
            let coord: TileCoord = s.parse().unwrap();
            assert_eq!(coord.to_string(), *s);
            assert_eq!(coord.depth(), s.len());
            assert_eq!(coord.kind().letter(), s.chars().next().unwrap());
        }

        assert!("".parse::<TileCoord>().is_err());
        assert!("CQ".parse::<TileCoord>().is_err());

    }

    #[test]
    fn coord_suffix_matches_ancestor_paths() {

        let long: TileCoord = "CXDDD".parse().unwrap();

        assert!("DDD".parse::<TileCoord>().unwrap().is_suffix_of(&long));
        assert!("XDDD".parse::<TileCoord>().unwrap().is_suffix_of(&long));
        assert!(long.is_suffix_of(&long));
        assert!(!"XDD".parse::<TileCoord>().unwrap().is_suffix_of(&long));
        assert!(!"CXD".parse::<TileCoord>().unwrap().is_suffix_of(&long));

    }

    #[test]
    fn split_c_keeps_generation_ordering() {

        let parent = HalfTile::start_tile(TriangleKind::C, 100.0, 200.0);
        let children = parent.split();

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].kind, TriangleKind::C);
        assert_eq!(children[1].kind, TriangleKind::Y);
        assert_eq!(children[0].coord.to_string(), "CC");
        assert_eq!(children[1].coord.to_string(), "YC");

        let s = interpolate_points(&parent.v3, &parent.v2, GOLDEN_RATIO);

        assert_points_eq(&children[0].v1, &parent.v2);
        assert_points_eq(&children[0].v2, &s);
        assert_points_eq(&children[0].v3, &parent.v1);

        assert_points_eq(&children[1].v1, &parent.v3);
        assert_points_eq(&children[1].v2, &parent.v1);
        assert_points_eq(&children[1].v3, &s);

    }

    #[test]
    fn split_d_keeps_generation_ordering() {

        let parent = HalfTile::start_tile(TriangleKind::D, 100.0, 200.0);
        let children = parent.split();

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].coord.to_string(), "DD");
        assert_eq!(children[1].coord.to_string(), "XD");

        let s = interpolate_points(&parent.v3, &parent.v1, GOLDEN_RATIO);

        assert_points_eq(&children[0].v1, &s);
        assert_points_eq(&children[0].v2, &parent.v1);
        assert_points_eq(&children[0].v3, &parent.v2);

        assert_points_eq(&children[1].v1, &parent.v2);
        assert_points_eq(&children[1].v2, &parent.v3);
        assert_points_eq(&children[1].v3, &s);

    }

    #[test]
    fn split_x_keeps_generation_ordering() {

        let parent = HalfTile::new(TriangleKind::X,
                                   pt(0.0, 0.0),
                                   pt(10.0, 10.0),
                                   pt(-10.0, 10.0),
                                   TileCoord::root(TriangleKind::X));
        let children = parent.split();

        assert_eq!(children.len(), 3);
        assert_eq!(children[0].coord.to_string(), "YX");
        assert_eq!(children[1].coord.to_string(), "CX");
        assert_eq!(children[2].coord.to_string(), "XX");

        let s0 = interpolate_points(&parent.v1, &parent.v2, GOLDEN_RATIO);
        let s2 = interpolate_points(&parent.v1, &parent.v3, GOLDEN_RATIO);

        assert_points_eq(&children[0].v1, &parent.v1);
        assert_points_eq(&children[0].v2, &s0);
        assert_points_eq(&children[0].v3, &s2);

        assert_points_eq(&children[1].v1, &parent.v3);
        assert_points_eq(&children[1].v2, &s2);
        assert_points_eq(&children[1].v3, &s0);

        assert_points_eq(&children[2].v1, &parent.v2);
        assert_points_eq(&children[2].v2, &parent.v3);
        assert_points_eq(&children[2].v3, &s0);

    }

    #[test]
    fn split_y_keeps_generation_ordering() {

        let parent = HalfTile::start_tile(TriangleKind::Y, 300.0, 300.0);
        let children = parent.split();

        assert_eq!(children.len(), 3);
        assert_eq!(children[0].coord.to_string(), "YY");
        assert_eq!(children[1].coord.to_string(), "DY");
        assert_eq!(children[2].coord.to_string(), "XY");

        let s0 = interpolate_points(&parent.v2, &parent.v1, GOLDEN_RATIO);
        let s1 = interpolate_points(&parent.v2, &parent.v3, GOLDEN_RATIO);

        assert_points_eq(&children[0].v1, &parent.v3);
        assert_points_eq(&children[0].v2, &parent.v1);
        assert_points_eq(&children[0].v3, &s0);

        assert_points_eq(&children[1].v1, &s1);
        assert_points_eq(&children[1].v2, &parent.v3);
        assert_points_eq(&children[1].v3, &s0);

        assert_points_eq(&children[2].v1, &s0);
        assert_points_eq(&children[2].v2, &parent.v2);
        assert_points_eq(&children[2].v3, &s1);

    }

    #[test]
    fn split_conserves_area_for_every_kind() {

        for &kind in &[TriangleKind::C, TriangleKind::D,
                       TriangleKind::X, TriangleKind::Y] {

            let parent = HalfTile::start_tile(kind, 1000.0, 1000.0);
            let children = parent.split();

            let parent_area = area(&parent.v1, &parent.v2, &parent.v3);
            let child_area: f64 = children
                .iter()
                .map(|c| area(&c.v1, &c.v2, &c.v3))
                .sum();

            assert_relative_eq!(parent_area, child_area, max_relative = 1e-12);

        }

    }

    #[test]
    fn canonical_conversion_reverses_vertices() {

        let tile = HalfTile::start_tile(TriangleKind::X, 500.0, 500.0);
        let tri = tile.to_triangle();

        assert_points_eq(&tri.v1, &tile.v3);
        assert_points_eq(&tri.v2, &tile.v2);
        assert_points_eq(&tri.v3, &tile.v1);
        assert_eq!(tri.coord, tile.coord);
        assert_eq!(tri.fill, Fill::Red);

    }

    #[test]
    fn neighbor_matches_known_adjacencies() {

        let cases: &[(&str, usize, &str, usize)] = &[
            ("CC", 1, "YC", 1),
            ("XX", 1, "CX", 2),
            ("DY", 2, "XY", 2),
            ("CXY", 0, "DDY", 0),
            ("YXY", 2, "XDY", 1),
            ("XYXYY", 1, "YCXYY", 2),
            ("DDDDD", 0, "CXDDD", 0),
            ("CCXYY", 2, "DDDYY", 1),
        ];

        for &(coord, side, expected, entered) in cases {
            let coord: TileCoord = coord.parse().unwrap();
            let (nei, enter) = neighbor(&coord, side).unwrap();
            assert_eq!(nei.to_string(), expected);
            assert_eq!(enter, entered);
        }

    }

    #[test]
    fn neighbor_fails_at_the_root_boundary() {

        let root = TileCoord::root(TriangleKind::C);

        for side in 0..3 {
            match neighbor(&root, side) {
                Err(err) => match err.kind() {
                    ErrorKind::NoNeighbor(coord, s) => {
                        assert_eq!(coord, "C");
                        assert_eq!(*s, side);
                    }
                    other => panic!("unexpected error kind {:?}", other)
                },
                Ok(_) => panic!("root must have no neighbors")
            }
            assert!(neighbor_or_null(&root, side).is_none());
        }

        // sides that recurse all the way past the root also fail
        assert!(neighbor(&"CC".parse().unwrap(), 0).is_err());
        assert!(neighbor(&"XX".parse().unwrap(), 2).is_err());

    }

    #[test]
    fn neighbor_rejects_foreign_ancestry() {

        // parseable, but no split ever makes a C child of a D
        let coord: TileCoord = "CD".parse().unwrap();

        match neighbor(&coord, 0) {
            Err(err) => match err.kind() {
                ErrorKind::UnknownAdjacencyPrefix(prefix) => {
                    assert_eq!(prefix, "CD");
                }
                other => panic!("unexpected error kind {:?}", other)
            },
            Ok(_) => panic!("foreign ancestry must not resolve")
        }

        assert!(neighbor_or_null(&coord, 0).is_none());

    }

    #[test]
    fn neighbor_is_symmetric() {

        // every child coordinate reachable in a few generations, for
        // all four roots
        for &kind in &[TriangleKind::C, TriangleKind::D,
                       TriangleKind::X, TriangleKind::Y] {

            let mut coords = vec![TileCoord::root(kind)];

            for _ in 0..5 {

                let mut next = Vec::new();

                for coord in &coords {
                    let children = match coord.kind() {
                        TriangleKind::C => vec![TriangleKind::C, TriangleKind::Y],
                        TriangleKind::D => vec![TriangleKind::D, TriangleKind::X],
                        TriangleKind::X => vec![TriangleKind::Y, TriangleKind::C,
                                                TriangleKind::X],
                        TriangleKind::Y => vec![TriangleKind::Y, TriangleKind::D,
                                                TriangleKind::X]
                    };
                    for child in children {
                        next.push(coord.child(child));
                    }
                }

                for coord in &next {
                    for side in 0..3 {
                        if let Ok((nei, enter)) = neighbor(coord, side) {
                            let (back, back_side) = neighbor(&nei, enter).unwrap();
                            assert_eq!(&back, coord,
                                       "asymmetric at {} side {}", coord, side);
                            assert_eq!(back_side, side);
                        }
                    }
                }

                coords = next;

            }

        }

    }

    #[test]
    fn base_table_has_twenty_distinct_unit_shapes() {

        let shapes = base_rhombuses();
        assert_eq!(shapes.len(), 20);

        let keys: HashSet<String> = shapes.iter().map(rhomb_key).collect();
        assert_eq!(keys.len(), 20);

        // mean edge length of every canonical shape is one
        for shape in shapes {
            let mut total = 0.0;
            for i in 0..4 {
                total += (shape[(i + 1) % 4] - shape[i]).norm();
            }
            assert_relative_eq!(total / 4.0, 1.0, max_relative = 1e-12);
        }

    }

    #[test]
    fn base_table_contains_both_antipodal_orientations() {

        let shapes = base_rhombuses();

        // relabeling the cyclic vertex list by two positions is a half
        // turn, which lands on the entry ten places over
        for (i, shape) in shapes.iter().enumerate() {

            let rotated = [shape[2], shape[3], shape[0], shape[1]];
            let antipode = &shapes[(i + 10) % 20];

            for j in 0..4 {
                assert_relative_eq!(rotated[j].x, antipode[j].x,
                                    epsilon = 1e-9);
                assert_relative_eq!(rotated[j].y, antipode[j].y,
                                    epsilon = 1e-9);
            }

        }

    }

    #[test]
    fn key_coord_never_emits_negative_zero() {

        assert_eq!(key_coord(-1e-13, 10), "0.0000000000");
        assert_eq!(key_coord(0.0, 10), "0.0000000000");
        assert_eq!(key_coord(-0.25, 10), "-0.2500000000");
        assert_eq!(key_coord(0.5, 2), "0.50");

    }

    #[test]
    fn regular_polygons_follow_the_shape_offsets() {

        let center = pt(0.0, 0.0);

        let square = regular_polygon(&center, 1.0, BoundsShape::Square);
        assert_eq!(square.len(), 4);
        // first square vertex sits at an eighth turn
        assert_relative_eq!(square[0].x, (PI / 4.0).cos(), max_relative = 1e-12);
        assert_relative_eq!(square[0].y, (PI / 4.0).sin(), max_relative = 1e-12);

        // the pentagon's quarter-turn offset closes the ring with a
        // sixth vertex on top of the first
        let pentagon = regular_polygon(&center, 2.0, BoundsShape::Pentagon);
        assert_eq!(pentagon.len(), 6);
        assert_relative_eq!(pentagon[0].x, 2.0 * (-PI / 10.0).cos(),
                            max_relative = 1e-12);
        assert_relative_eq!(pentagon[0].y, 2.0 * (-PI / 10.0).sin(),
                            max_relative = 1e-12);
        assert_relative_eq!(pentagon[5].x, pentagon[0].x, epsilon = 1e-9);
        assert_relative_eq!(pentagon[5].y, pentagon[0].y, epsilon = 1e-9);

        let hexagon = regular_polygon(&center, 1.0, BoundsShape::Hexagon);
        assert_eq!(hexagon.len(), 6);
        assert_relative_eq!(hexagon[0].x, 1.0, max_relative = 1e-12);

    }

    #[test]
    fn point_in_triangle_accepts_interior_and_edges() {

        let v1 = pt(0.0, 0.0);
        let v2 = pt(10.0, 0.0);
        let v3 = pt(0.0, 10.0);

        assert!(point_in_triangle(&pt(2.0, 2.0), &v1, &v2, &v3));
        assert!(point_in_triangle(&pt(5.0, 0.0), &v1, &v2, &v3));
        assert!(!point_in_triangle(&pt(6.0, 6.0), &v1, &v2, &v3));
        assert!(!point_in_triangle(&pt(-1.0, 0.0), &v1, &v2, &v3));

    }

    #[test]
    fn triangle_intersection_detects_overlap_and_separation() {

        let a = [pt(0.0, 0.0), pt(4.0, 0.0), pt(0.0, 4.0)];
        let b = [pt(1.0, 1.0), pt(5.0, 1.0), pt(1.0, 5.0)];
        let c = [pt(10.0, 10.0), pt(12.0, 10.0), pt(10.0, 12.0)];

        assert!(triangles_intersect(&a, &b));
        assert!(!triangles_intersect(&a, &c));
        assert!(triangles_intersect(&a, &a));

    }

    #[test]
    fn enum_parsing_uses_the_lookup_tables() {

        assert_eq!("X".parse::<TriangleKind>().unwrap(), TriangleKind::X);
        assert!("Z".parse::<TriangleKind>().is_err());

        assert_eq!("pentagon".parse::<BoundsShape>().unwrap(),
                   BoundsShape::Pentagon);
        assert!("octagon".parse::<BoundsShape>().is_err());

        assert_eq!("fill".parse::<ResolveRagged>().unwrap(),
                   ResolveRagged::Fill);
        assert!("prune".parse::<ResolveRagged>().is_err());

    }

    // minimal entry for exercising the cull fixed point
    fn dummy_entry(coord: &str, neighbors: [Option<&str>; 4]) -> RhombEntry {

        let tile = HalfTile::start_tile(TriangleKind::C, 10.0, 10.0);
        let tri = tile.to_triangle();

        let rhombus = Rhombus {
            v1: pt(0.0, 0.0),
            v2: pt(1.0, 1.0),
            v3: pt(2.0, 0.0),
            v4: pt(1.0, -1.0),
            coord: coord.to_string(),
            fill: Fill::Blue
        };

        RhombEntry {
            rhombus: rhombus,
            tri1: tri.clone(),
            tri2: tri,
            tri1_scaled: None,
            tri2_scaled: None,
            neighbors: [
                neighbors[0].map(str::to_string),
                neighbors[1].map(str::to_string),
                neighbors[2].map(str::to_string),
                neighbors[3].map(str::to_string),
            ],
            base: None,
            center: None,
            key: None
        }

    }

    #[test]
    fn cull_cascades_and_reaches_a_fixed_point() {

        // a -- b -- c chain hanging off a well-connected core d/e/f/g:
        // a starts below two neighbors, removing it drops b below two,
        // which then drops c; the core keeps degree >= 2 throughout
        let mut map = BTreeMap::new();

        map.insert("a".to_string(),
                   dummy_entry("a", [Some("b"), None, None, None]));
        map.insert("b".to_string(),
                   dummy_entry("b", [Some("a"), Some("c"), None, None]));
        map.insert("c".to_string(),
                   dummy_entry("c", [Some("b"), Some("d"), None, None]));
        map.insert("d".to_string(),
                   dummy_entry("d", [Some("c"), Some("e"), Some("f"), Some("g")]));
        map.insert("e".to_string(),
                   dummy_entry("e", [Some("d"), Some("g"), None, None]));
        map.insert("f".to_string(),
                   dummy_entry("f", [Some("d"), Some("g"), None, None]));
        map.insert("g".to_string(),
                   dummy_entry("g", [Some("d"), Some("e"), Some("f"), None]));

        let culled = cull_low_degree(&mut map);

        let mut gone: Vec<String> = culled.iter().map(|rh| rh.coord.clone()).collect();
        gone.sort();

        assert_eq!(gone, vec!["a", "b", "c"]);
        assert_eq!(map.len(), 4);

        // no dangling references to removed rhombi
        for entry in map.values() {
            for nei in entry.neighbors.iter().flatten() {
                assert!(map.contains_key(nei));
            }
        }

        // culling is idempotent on its own output
        assert!(cull_low_degree(&mut map).is_empty());
        assert_eq!(map.len(), 4);

    }

    #[test]
    fn unit_scale_maps_origin_and_preserves_ratios() {

        let scale = UnitScale::new(pt(10.0, 20.0), 0.5);

        let mapped = scale.apply(&pt(10.0, 20.0));
        assert_relative_eq!(mapped.x, 0.0);
        assert_relative_eq!(mapped.y, 0.0);

        let mapped = scale.apply(&pt(14.0, 28.0));
        assert_relative_eq!(mapped.x, 2.0);
        assert_relative_eq!(mapped.y, 4.0);

    }

}
