/// A single (x, y) measurement with errors
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GraphPoint {
    pub x: f64,
    pub y: f64,
    pub x_err: f64,
    pub y_err: f64,
}

impl GraphPoint {
    pub fn new(x: f64, y: f64, x_err: f64, y_err: f64) -> Self {
        Self { x, y, x_err, y_err }
    }
}

/// Compute the point of a summary graph which belongs to a given slice.
///
/// `phi_rank` is the zero-based rank of the phi sector within its eta sector (by key
/// order) and `slice` is the one-based slice index.
pub fn point_index(phi_rank: usize, slice: usize, granularity: usize) -> usize {
    (slice - 1) + granularity * phi_rank
}

/// SummaryGraph is a fixed size graph with one slot per (phi, slice) of an eta sector.
///
/// Slots which never received a point stay empty, which is how a slice shows up as
/// "not in this graph" (i.e. a failed fit is absent from the peak position graph).
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryGraph {
    name: String,
    points: Vec<Option<GraphPoint>>,
}

impl SummaryGraph {
    pub fn new(name: &str, n_points: usize) -> Self {
        Self {
            name: String::from(name),
            points: vec![None; n_points],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of slots
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    /// Number of slots which hold a point
    pub fn n_set(&self) -> usize {
        self.points.iter().filter(|p| p.is_some()).count()
    }

    /// Store a point. Returns false if the index is outside of the graph.
    pub fn set_point(&mut self, index: usize, point: GraphPoint) -> bool {
        match self.points.get_mut(index) {
            Some(slot) => {
                *slot = Some(point);
                true
            }
            None => false,
        }
    }

    pub fn point(&self, index: usize) -> Option<&GraphPoint> {
        self.points.get(index).and_then(|p| p.as_ref())
    }

    pub fn points(&self) -> &[Option<GraphPoint>] {
        &self.points
    }

    /// Iterate over the (index, point) pairs which hold a point
    pub fn iter_set(&self) -> impl Iterator<Item = (usize, &GraphPoint)> {
        self.points
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| p.as_ref().map(|p| (idx, p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_index_bounds() {
        let granularity = 4;
        let n_phi = 3;
        assert_eq!(point_index(0, 1, granularity), 0);
        assert_eq!(
            point_index(n_phi - 1, granularity, granularity),
            n_phi * granularity - 1
        );
        assert_eq!(point_index(1, 1, granularity), 4);
    }

    #[test]
    fn test_set_point() {
        let mut graph = SummaryGraph::new("g", 6);
        assert!(graph.set_point(5, GraphPoint::new(1.0, 2.0, 0.5, 0.1)));
        assert!(!graph.set_point(6, GraphPoint::default()));
        assert_eq!(graph.n_points(), 6);
        assert_eq!(graph.n_set(), 1);
        assert!(graph.point(0).is_none());
        assert_eq!(graph.point(5).unwrap().y, 2.0);
        assert_eq!(graph.iter_set().next().unwrap().0, 5);
    }
}
