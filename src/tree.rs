//! Binary space trees over point sets.
//!
//! A [Tree](crate::tree::Tree) recursively bisects a point slice along the
//! widest dimension of its bounding box until leaves hold at most
//! `leaf_size` points. Nodes are identified by their `(begin, count)` range
//! into the owning table, which is the identity used when subtrees are
//! shipped between processes.

use std::collections::VecDeque;

use crate::geometry::{BoundingBox, Point};

/// Index handle to a node within a [Tree].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(usize);

struct TreeNode {
    begin: usize,
    count: usize,
    bound: BoundingBox,
    children: Option<(NodeId, NodeId)>,
}

/// A binary space tree over a contiguous range of points.
pub struct Tree {
    nodes: Vec<TreeNode>,
}

impl Tree {
    /// The root node of any tree.
    pub const ROOT: NodeId = NodeId(0);

    /// Build a tree over the given points, reordering them in place.
    ///
    /// Node ranges are indexed from zero.
    pub fn build(points: &mut [Point], leaf_size: usize) -> Self {
        Self::build_with_offset(points, leaf_size, 0)
    }

    /// Build a tree whose node ranges start at `offset`.
    ///
    /// Used for shipped tree fragments, so that a fragment's nodes keep the
    /// `(begin, count)` identity they have in the originating table.
    pub fn build_with_offset(points: &mut [Point], leaf_size: usize, offset: usize) -> Self {
        assert!(!points.is_empty());
        assert!(leaf_size > 0);

        let mut nodes = Vec::new();
        build_recursive(&mut nodes, points, offset, leaf_size);
        Self { nodes }
    }

    /// Return the number of nodes in the tree.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the first point index covered by a node.
    pub fn begin(&self, node: NodeId) -> usize {
        self.nodes[node.0].begin
    }

    /// Return the number of points covered by a node.
    pub fn count(&self, node: NodeId) -> usize {
        self.nodes[node.0].count
    }

    /// Return the bounding box of a node.
    pub fn bound(&self, node: NodeId) -> BoundingBox {
        self.nodes[node.0].bound
    }

    /// Return true if the node has no children.
    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.nodes[node.0].children.is_none()
    }

    /// Return the children of a node, or `None` for a leaf.
    pub fn children(&self, node: NodeId) -> Option<(NodeId, NodeId)> {
        self.nodes[node.0].children
    }

    /// Find the node with exactly the given `(begin, count)` range.
    ///
    /// Descends from the root through the child whose range contains
    /// `begin`. Returns `None` if no node carries the requested range.
    pub fn find_by_begin_count(&self, begin: usize, count: usize) -> Option<NodeId> {
        let mut current = Self::ROOT;

        loop {
            let node = &self.nodes[current.0];
            if node.begin == begin && node.count == count {
                return Some(current);
            }

            let (left, right) = node.children?;
            let left_end = self.begin(left) + self.count(left);
            current = if begin < left_end { left } else { right };

            let node = &self.nodes[current.0];
            if begin < node.begin || begin + count > node.begin + node.count {
                return None;
            }
        }
    }

    /// Return a frontier of at most roughly `max_subtrees` disjoint
    /// subtrees that together cover the whole tree.
    ///
    /// Starting from the root, the widest frontier node is expanded into
    /// its children until the bound is reached or only leaves remain.
    pub fn frontier(&self, max_subtrees: usize) -> Vec<NodeId> {
        assert!(max_subtrees > 0);

        let mut frontier = VecDeque::from([Self::ROOT]);

        while frontier.len() < max_subtrees {
            // Expand the frontier node with the most points.
            let widest = frontier
                .iter()
                .enumerate()
                .filter(|(_, &node)| !self.is_leaf(node))
                .max_by_key(|(_, &node)| self.count(node))
                .map(|(position, _)| position);

            let Some(position) = widest else {
                break;
            };

            let node = frontier.remove(position).unwrap();
            let (left, right) = self.children(node).unwrap();
            frontier.push_back(left);
            frontier.push_back(right);
        }

        frontier.into()
    }
}

fn build_recursive(
    nodes: &mut Vec<TreeNode>,
    points: &mut [Point],
    begin: usize,
    leaf_size: usize,
) -> NodeId {
    let bound = BoundingBox::from_points(points);
    let id = NodeId(nodes.len());
    nodes.push(TreeNode {
        begin,
        count: points.len(),
        bound,
        children: None,
    });

    if points.len() > leaf_size {
        // Median split along the widest dimension of the bound.
        let dim = bound.widest_dimension();
        let mid = points.len() / 2;
        points.select_nth_unstable_by(mid, |first, second| {
            first.coords()[dim].total_cmp(&second.coords()[dim])
        });

        let (lower, upper) = points.split_at_mut(mid);
        let left = build_recursive(nodes, lower, begin, leaf_size);
        let right = build_recursive(nodes, upper, begin + mid, leaf_size);
        nodes[id.0].children = Some((left, right));
    }

    id
}

/// A point set together with the tree built over it.
pub struct Table {
    rank: usize,
    offset: usize,
    points: Vec<Point>,
    tree: Tree,
}

impl Table {
    /// Build a table from a point set owned by the given rank.
    pub fn new(rank: usize, points: Vec<Point>, leaf_size: usize) -> Self {
        Self::with_offset(rank, points, leaf_size, 0)
    }

    /// Build a table whose tree ranges start at `offset`.
    pub fn with_offset(rank: usize, mut points: Vec<Point>, leaf_size: usize, offset: usize) -> Self {
        let tree = Tree::build_with_offset(&mut points, leaf_size, offset);
        Self {
            rank,
            offset,
            points,
            tree,
        }
    }

    /// Return the owning rank of the table.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Return the number of points in the table.
    pub fn n_entries(&self) -> usize {
        self.points.len()
    }

    /// Return all points of the table.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Return the tree over the table's points.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Return the points covered by a tree node.
    pub fn points_of(&self, node: NodeId) -> &[Point] {
        let begin = self.tree.begin(node) - self.offset;
        &self.points[begin..begin + self.tree.count(node)]
    }

    /// Extract the subtree rooted at `node` as a standalone table fragment.
    ///
    /// The fragment keeps the source table's rank and the node's
    /// `(begin, count)` identity.
    pub fn extract_subtable(&self, node: NodeId, leaf_size: usize) -> SubTable {
        let begin = self.tree.begin(node);
        let count = self.tree.count(node);
        let table = Table::with_offset(self.rank, self.points_of(node).to_vec(), leaf_size, begin);

        SubTable {
            begin,
            count,
            table,
        }
    }
}

/// A tree fragment shipped between processes.
pub struct SubTable {
    begin: usize,
    count: usize,
    table: Table,
}

impl SubTable {
    /// Return the first point index the fragment covers in the source table.
    pub fn begin(&self) -> usize {
        self.begin
    }

    /// Return the number of points the fragment covers.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Return the rank of the originating table.
    pub fn rank(&self) -> usize {
        self.table.rank()
    }

    /// Return the fragment's own table.
    pub fn table(&self) -> &Table {
        &self.table
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::prelude::*;

    fn random_points(npoints: usize) -> Vec<Point> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);

        let mut points = Vec::<Point>::with_capacity(npoints);
        for index in 0..npoints {
            points.push(Point::new([rng.gen(), rng.gen(), rng.gen()], index));
        }

        points
    }

    fn check_node(tree: &Tree, points: &[Point], node: NodeId, leaf_size: usize) {
        let begin = tree.begin(node);
        let count = tree.count(node);

        // Every point of the node lies inside the node's bound.
        let bound = tree.bound(node);
        for point in &points[begin..begin + count] {
            for dim in 0..3 {
                assert!(bound.min(dim) <= point.coords()[dim]);
                assert!(point.coords()[dim] <= bound.max(dim));
            }
        }

        if let Some((left, right)) = tree.children(node) {
            // Children partition the parent range.
            assert_eq!(tree.begin(left), begin);
            assert_eq!(tree.begin(right), begin + tree.count(left));
            assert_eq!(tree.count(left) + tree.count(right), count);

            check_node(tree, points, left, leaf_size);
            check_node(tree, points, right, leaf_size);
        } else {
            assert!(count <= leaf_size);
        }
    }

    fn points_on_sphere(npoints: usize) -> Vec<Point> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let normal = rand_distr::Normal::new(0.0, 1.0).unwrap();

        let mut points = Vec::<Point>::with_capacity(npoints);
        for index in 0..npoints {
            let x: f64 = normal.sample(&mut rng);
            let y: f64 = normal.sample(&mut rng);
            let z: f64 = normal.sample(&mut rng);

            let norm = (x * x + y * y + z * z).sqrt();

            points.push(Point::new([x / norm, y / norm, z / norm], index));
        }

        points
    }

    #[test]
    fn test_tree_structure() {
        let leaf_size = 16;
        let mut points = random_points(300);
        let tree = Tree::build(&mut points, leaf_size);

        assert_eq!(tree.begin(Tree::ROOT), 0);
        assert_eq!(tree.count(Tree::ROOT), 300);
        check_node(&tree, &points, Tree::ROOT, leaf_size);
    }

    #[test]
    fn test_tree_over_sphere_surface() {
        // Points on a sphere surface leave the interior empty, so child
        // bounds shrink well below the parent's in every split.
        let leaf_size = 25;
        let mut points = points_on_sphere(1000);
        let tree = Tree::build(&mut points, leaf_size);

        check_node(&tree, &points, Tree::ROOT, leaf_size);
    }

    #[test]
    fn test_find_by_begin_count() {
        let mut points = random_points(200);
        let tree = Tree::build(&mut points, 10);

        // Every node can be found by its own range.
        fn visit(tree: &Tree, node: NodeId) {
            let found = tree.find_by_begin_count(tree.begin(node), tree.count(node));
            assert_eq!(found, Some(node));

            if let Some((left, right)) = tree.children(node) {
                visit(tree, left);
                visit(tree, right);
            }
        }
        visit(&tree, Tree::ROOT);

        // A range no node carries is not found.
        assert_eq!(tree.find_by_begin_count(1, 7), None);
        assert_eq!(tree.find_by_begin_count(0, 500), None);
    }

    #[test]
    fn test_frontier_covers_tree() {
        let mut points = random_points(400);
        let tree = Tree::build(&mut points, 8);

        for max_subtrees in [1, 2, 3, 7, 16] {
            let frontier = tree.frontier(max_subtrees);
            assert!(!frontier.is_empty());

            // The frontier nodes are disjoint and cover all points.
            let mut covered = vec![false; 400];
            for &node in &frontier {
                for index in tree.begin(node)..tree.begin(node) + tree.count(node) {
                    assert!(!covered[index]);
                    covered[index] = true;
                }
            }
            assert!(covered.iter().all(|&flag| flag));
        }
    }

    #[test]
    fn test_frontier_of_small_tree() {
        // Fewer points than the leaf size gives a single-node tree, so the
        // frontier is just the root no matter what bound is requested.
        let mut points = random_points(5);
        let tree = Tree::build(&mut points, 8);

        assert_eq!(tree.frontier(4), vec![Tree::ROOT]);
    }

    #[test]
    fn test_extract_subtable() {
        let points = random_points(128);
        let table = Table::new(2, points, 8);

        let (_, right) = table.tree().children(Tree::ROOT).unwrap();
        let subtable = table.extract_subtable(right, 8);

        assert_eq!(subtable.rank(), 2);
        assert_eq!(subtable.begin(), table.tree().begin(right));
        assert_eq!(subtable.count(), table.tree().count(right));

        // The fragment's root carries the same range identity as the source
        // node, and its points are the same set.
        let root = subtable.table().tree();
        assert_eq!(root.begin(Tree::ROOT), subtable.begin());
        assert_eq!(root.count(Tree::ROOT), subtable.count());

        let mut source_ids: Vec<usize> = table
            .points_of(right)
            .iter()
            .map(|point| point.global_id())
            .collect();
        let mut fragment_ids: Vec<usize> = subtable
            .table()
            .points()
            .iter()
            .map(|point| point.global_id())
            .collect();
        source_ids.sort_unstable();
        fragment_ids.sort_unstable();
        assert_eq!(source_ids, fragment_ids);
    }

    #[test]
    fn test_points_of_fragment_node() {
        let points = random_points(64);
        let table = Table::new(0, points, 8);

        let (left, _) = table.tree().children(Tree::ROOT).unwrap();
        let subtable = table.extract_subtable(left, 8);

        // Ranges of fragment nodes are offset by the fragment's begin, and
        // points_of resolves them against the fragment's own storage.
        let fragment = subtable.table();
        let (inner_left, _) = fragment.tree().children(Tree::ROOT).unwrap();
        let slice = fragment.points_of(inner_left);
        assert_eq!(slice.len(), fragment.tree().count(inner_left));
    }
}
