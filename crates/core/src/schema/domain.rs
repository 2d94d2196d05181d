//! Domains, subarrays, and minimum bounding rectangles.

use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::layout::ArrayType;
use crate::schema::dimension::Dimension;
use smallvec::SmallVec;

/// Per-dimension scratch tuple; most arrays have few dimensions.
pub type Coords = SmallVec<[u64; 4]>;

/// A hyper-rectangle as inclusive per-dimension intervals (canonical bits).
///
/// Used both for caller subarrays and for tile MBRs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subarray {
    /// One `(lo, hi)` pair per dimension.
    pub ranges: Vec<(u64, u64)>,
}

impl Subarray {
    /// Build from explicit ranges.
    pub fn new(ranges: Vec<(u64, u64)>) -> Self {
        Subarray { ranges }
    }

    /// Number of dimensions.
    pub fn dim_count(&self) -> usize {
        self.ranges.len()
    }

    /// Whether `coords` lies inside this rectangle.
    pub fn contains(&self, datatype: Datatype, coords: &[u64]) -> bool {
        coords
            .iter()
            .zip(&self.ranges)
            .all(|(&c, &(lo, hi))| datatype.in_range(c, lo, hi))
    }

    /// Whether this rectangle intersects `other`.
    pub fn intersects(&self, datatype: Datatype, other: &Subarray) -> bool {
        self.ranges.iter().zip(&other.ranges).all(|(&(alo, ahi), &(blo, bhi))| {
            datatype.cmp_bits(alo, bhi) != std::cmp::Ordering::Greater
                && datatype.cmp_bits(blo, ahi) != std::cmp::Ordering::Greater
        })
    }

    /// Whether this rectangle is fully contained in `other`.
    pub fn within(&self, datatype: Datatype, other: &Subarray) -> bool {
        self.ranges.iter().zip(&other.ranges).all(|(&(alo, ahi), &(blo, bhi))| {
            datatype.in_range(alo, blo, bhi) && datatype.in_range(ahi, blo, bhi)
        })
    }

    /// Total cell count for integer datatypes, if it fits in `u64`.
    pub fn cell_count(&self, datatype: Datatype) -> Option<u64> {
        let mut total: u64 = 1;
        for &(lo, hi) in &self.ranges {
            total = total.checked_mul(datatype.range_len(lo, hi)?)?;
        }
        Some(total)
    }
}

/// An empty, growable MBR accumulated while writing a tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mbr {
    ranges: Option<Vec<(u64, u64)>>,
    dim_count: usize,
}

impl Mbr {
    /// An MBR covering nothing.
    pub fn empty(dim_count: usize) -> Self {
        Mbr {
            ranges: None,
            dim_count,
        }
    }

    /// Expand to cover `coords`.
    pub fn expand(&mut self, datatype: Datatype, coords: &[u64]) {
        debug_assert_eq!(coords.len(), self.dim_count);
        match &mut self.ranges {
            None => {
                self.ranges = Some(coords.iter().map(|&c| (c, c)).collect());
            }
            Some(ranges) => {
                for (range, &c) in ranges.iter_mut().zip(coords) {
                    if datatype.cmp_bits(c, range.0) == std::cmp::Ordering::Less {
                        range.0 = c;
                    }
                    if datatype.cmp_bits(c, range.1) == std::cmp::Ordering::Greater {
                        range.1 = c;
                    }
                }
            }
        }
    }

    /// Expand to cover another rectangle.
    pub fn expand_rect(&mut self, datatype: Datatype, rect: &Subarray) {
        match &mut self.ranges {
            None => self.ranges = Some(rect.ranges.clone()),
            Some(ranges) => {
                for (range, &(lo, hi)) in ranges.iter_mut().zip(&rect.ranges) {
                    if datatype.cmp_bits(lo, range.0) == std::cmp::Ordering::Less {
                        range.0 = lo;
                    }
                    if datatype.cmp_bits(hi, range.1) == std::cmp::Ordering::Greater {
                        range.1 = hi;
                    }
                }
            }
        }
    }

    /// Whether anything has been covered.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_none()
    }

    /// The covered rectangle, if any.
    pub fn rect(&self) -> Option<Subarray> {
        self.ranges.clone().map(Subarray::new)
    }
}

/// The Cartesian product of dimension ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    /// Shared coordinate datatype of every dimension.
    pub datatype: Datatype,
    /// Ordered dimensions; the index is the stable dimension id.
    pub dims: Vec<Dimension>,
}

impl Domain {
    /// Build a domain.
    pub fn new(datatype: Datatype, dims: Vec<Dimension>) -> Self {
        Domain { datatype, dims }
    }

    /// Number of dimensions.
    pub fn dim_count(&self) -> usize {
        self.dims.len()
    }

    /// Validate the domain for the given array type.
    pub fn validate(&self, array_type: ArrayType) -> Result<()> {
        if self.dims.is_empty() {
            return Err(Error::schema("domain must have at least one dimension"));
        }
        if array_type == ArrayType::Dense && !self.datatype.is_integer() {
            return Err(Error::schema(
                "dense domains require an integer coordinate datatype",
            ));
        }
        for (i, dim) in self.dims.iter().enumerate() {
            if dim.name.is_empty() {
                return Err(Error::schema(format!("dimension {i} has an empty name")));
            }
            if dim.name.starts_with("__") {
                return Err(Error::schema(format!(
                    "dimension name `{}` uses the reserved `__` prefix",
                    dim.name
                )));
            }
            if !self.datatype.bits_in_type_range(dim.lo)
                || !self.datatype.bits_in_type_range(dim.hi)
            {
                return Err(Error::schema(format!(
                    "dimension `{}` bounds exceed the {} range",
                    dim.name,
                    self.datatype.name()
                )));
            }
            if self.datatype.cmp_bits(dim.lo, dim.hi) == std::cmp::Ordering::Greater {
                return Err(Error::schema(format!(
                    "dimension `{}` has lo > hi",
                    dim.name
                )));
            }
            match (array_type, dim.tile_extent) {
                (ArrayType::Dense, None) => {
                    return Err(Error::schema(format!(
                        "dense dimension `{}` requires a tile extent",
                        dim.name
                    )));
                }
                (ArrayType::Dense, Some(extent)) => {
                    if extent == 0 {
                        return Err(Error::schema(format!(
                            "dimension `{}` has a zero tile extent",
                            dim.name
                        )));
                    }
                    let len = dim.len(self.datatype).ok_or_else(|| {
                        Error::schema(format!(
                            "dense dimension `{}` spans more cells than addressable",
                            dim.name
                        ))
                    })?;
                    if len % extent != 0 {
                        return Err(Error::schema(format!(
                            "tile extent {extent} does not evenly divide dimension `{}` of length {len}",
                            dim.name
                        )));
                    }
                }
                (ArrayType::Sparse, Some(extent)) => {
                    if self.datatype.is_float() {
                        if f64::from_bits(extent) <= 0.0 {
                            return Err(Error::schema(format!(
                                "dimension `{}` has a non-positive tile extent",
                                dim.name
                            )));
                        }
                    } else if extent == 0 {
                        return Err(Error::schema(format!(
                            "dimension `{}` has a zero tile extent",
                            dim.name
                        )));
                    }
                }
                (ArrayType::Sparse, None) => {}
            }
        }
        let mut names: Vec<&str> = self.dims.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::schema("duplicate dimension names"));
        }
        Ok(())
    }

    /// The domain as a subarray.
    pub fn whole(&self) -> Subarray {
        Subarray::new(self.dims.iter().map(|d| (d.lo, d.hi)).collect())
    }

    /// Whether `coords` lies inside the domain.
    pub fn contains(&self, coords: &[u64]) -> bool {
        coords.len() == self.dims.len()
            && coords
                .iter()
                .zip(&self.dims)
                .all(|(&c, d)| self.datatype.in_range(c, d.lo, d.hi))
    }

    /// Validate a caller subarray against the domain.
    pub fn check_subarray(&self, subarray: &Subarray) -> Result<()> {
        if subarray.dim_count() != self.dim_count() {
            return Err(Error::domain(format!(
                "subarray has {} ranges, domain has {} dimensions",
                subarray.dim_count(),
                self.dim_count()
            )));
        }
        for (dim, &(lo, hi)) in self.dims.iter().zip(&subarray.ranges) {
            if self.datatype.cmp_bits(lo, hi) == std::cmp::Ordering::Greater {
                return Err(Error::domain(format!(
                    "subarray range on `{}` has lo > hi",
                    dim.name
                )));
            }
            if !self.datatype.in_range(lo, dim.lo, dim.hi)
                || !self.datatype.in_range(hi, dim.lo, dim.hi)
            {
                return Err(Error::domain(format!(
                    "subarray range [{}, {}] exceeds dimension `{}` [{}, {}]",
                    self.datatype.format_bits(lo),
                    self.datatype.format_bits(hi),
                    dim.name,
                    self.datatype.format_bits(dim.lo),
                    self.datatype.format_bits(dim.hi),
                )));
            }
        }
        Ok(())
    }

    /// Effective space-tile extents (declared, or whole-dimension).
    pub fn effective_extents(&self) -> Result<Coords> {
        self.dims
            .iter()
            .map(|d| {
                d.effective_extent(self.datatype).ok_or_else(|| {
                    Error::schema(format!(
                        "dimension `{}` spans more cells than addressable",
                        d.name
                    ))
                })
            })
            .collect()
    }

    /// Space-tile grid shape (tiles per dimension).
    pub fn tile_grid(&self) -> Result<Coords> {
        self.dims
            .iter()
            .map(|d| {
                d.tile_count(self.datatype).ok_or_else(|| {
                    Error::schema(format!(
                        "dimension `{}` has an unrepresentable tile count",
                        d.name
                    ))
                })
            })
            .collect()
    }

    /// Space-tile coordinates of a cell.
    pub fn tile_coords(&self, coords: &[u64], extents: &[u64]) -> Coords {
        coords
            .iter()
            .zip(&self.dims)
            .zip(extents)
            .map(|((&c, d), &e)| self.datatype.tile_of(c, d.lo, e))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_2d() -> Domain {
        Domain::new(
            Datatype::Int64,
            vec![Dimension::new("r", 1, 4, 2), Dimension::new("c", 1, 4, 2)],
        )
    }

    #[test]
    fn validate_dense_ok() {
        assert!(dense_2d().validate(ArrayType::Dense).is_ok());
    }

    #[test]
    fn dense_requires_even_extents() {
        let dom = Domain::new(Datatype::Int64, vec![Dimension::new("r", 1, 5, 2)]);
        let err = dom.validate(ArrayType::Dense).unwrap_err();
        assert!(err.to_string().contains("evenly divide"));
    }

    #[test]
    fn dense_rejects_floats() {
        let dom = Domain::new(
            Datatype::Float64,
            vec![Dimension::new("x", 0.0f64.to_bits(), 1.0f64.to_bits(), 1.0f64.to_bits())],
        );
        assert!(dom.validate(ArrayType::Dense).is_err());
    }

    #[test]
    fn duplicate_dimension_names() {
        let dom = Domain::new(
            Datatype::Int32,
            vec![Dimension::new("d", 0, 3, 2), Dimension::new("d", 0, 3, 2)],
        );
        assert!(dom.validate(ArrayType::Dense).is_err());
    }

    #[test]
    fn contains_and_subarray_checks() {
        let dom = dense_2d();
        assert!(dom.contains(&[1, 4]));
        assert!(!dom.contains(&[0, 4]));
        assert!(dom.check_subarray(&Subarray::new(vec![(2, 4), (2, 4)])).is_ok());
        assert!(dom.check_subarray(&Subarray::new(vec![(2, 5), (2, 4)])).is_err());
        assert!(dom.check_subarray(&Subarray::new(vec![(3, 2), (2, 4)])).is_err());
    }

    #[test]
    fn subarray_geometry() {
        let dt = Datatype::Int64;
        let a = Subarray::new(vec![(1, 4), (1, 4)]);
        let b = Subarray::new(vec![(3, 6), (4, 9)]);
        assert!(a.intersects(dt, &b));
        assert!(Subarray::new(vec![(3, 4), (4, 4)]).within(dt, &a));
        assert!(!b.within(dt, &a));
        assert_eq!(a.cell_count(dt), Some(16));
    }

    #[test]
    fn mbr_expansion() {
        let dt = Datatype::Int64;
        let mut mbr = Mbr::empty(2);
        assert!(mbr.is_empty());
        mbr.expand(dt, &[3, 7]);
        mbr.expand(dt, &[5, 2]);
        let rect = mbr.rect().unwrap();
        assert_eq!(rect.ranges, vec![(3, 5), (2, 7)]);
    }

    #[test]
    fn tile_coords() {
        let dom = dense_2d();
        let extents = dom.effective_extents().unwrap();
        let tc = dom.tile_coords(&[3, 2], &extents);
        assert_eq!(tc.as_slice(), &[1, 0]);
    }
}
