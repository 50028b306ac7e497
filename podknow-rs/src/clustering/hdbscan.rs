//! HDBSCAN over a precomputed distance matrix.
//!
//! Steps: core distances, mutual-reachability minimum spanning tree (Prim),
//! single-linkage hierarchy, condensed tree, excess-of-mass selection with
//! an optional selection epsilon, then point labelling. Every tie is broken
//! by index so the result depends only on the input order.

use ndarray::{Array2, ArrayView2};

use super::DistanceMetric;

/// Smallest distance used when converting to λ = 1 / distance.
const MIN_DISTANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HdbscanParams {
    pub min_cluster_size: usize,
    pub min_samples: usize,
    /// Selected clusters born below this distance are replaced by the
    /// nearest ancestor born at or above it.
    pub cluster_selection_epsilon: f64,
}

/// Per-point assignment. Cluster labels are dense, `0..cluster_count`.
#[derive(Debug, Clone, PartialEq)]
pub struct HdbscanFit {
    pub labels: Vec<Option<usize>>,
    /// Membership strength in `[0, 1]`; `0` for noise.
    pub probabilities: Vec<f64>,
    pub cluster_count: usize,
}

impl HdbscanFit {
    fn noise(n: usize) -> Self {
        Self {
            labels: vec![None; n],
            probabilities: vec![0.0; n],
            cluster_count: 0,
        }
    }
}

/// Dense pairwise distances between the rows of `data`.
pub fn pairwise_distances(data: ArrayView2<f64>, metric: DistanceMetric) -> Array2<f64> {
    let n = data.nrows();
    let mut out = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let d = metric.distance(data.row(i), data.row(j));
            out[[i, j]] = d;
            out[[j, i]] = d;
        }
    }
    out
}

/// Cluster the points described by the square matrix `distances`.
pub fn fit(distances: &Array2<f64>, params: &HdbscanParams) -> HdbscanFit {
    let n = distances.nrows();
    let min_cluster_size = params.min_cluster_size.max(2);
    if n < min_cluster_size {
        return HdbscanFit::noise(n);
    }

    let core = core_distances(distances, params.min_samples);
    let mst = minimum_spanning_tree(distances, &core);
    let hierarchy = single_linkage(n, &mst);
    let tree = condense(n, &hierarchy, min_cluster_size);
    let selected = select_clusters(&tree, params.cluster_selection_epsilon);
    label_points(n, &tree, &selected)
}

fn lambda_of(distance: f64) -> f64 {
    1.0 / distance.max(MIN_DISTANCE)
}

/// Distance to the `min_samples`-th nearest point, the point itself included.
fn core_distances(distances: &Array2<f64>, min_samples: usize) -> Vec<f64> {
    let n = distances.nrows();
    let k = min_samples.clamp(1, n);
    distances
        .rows()
        .into_iter()
        .map(|row| {
            let mut sorted: Vec<f64> = row.to_vec();
            sorted.sort_by(f64::total_cmp);
            sorted[k - 1]
        })
        .collect()
}

/// Prim's algorithm over the implicit mutual-reachability graph, returned
/// sorted by weight (stable, so equal weights keep discovery order).
fn minimum_spanning_tree(distances: &Array2<f64>, core: &[f64]) -> Vec<(usize, usize, f64)> {
    let n = distances.nrows();
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n.saturating_sub(1));

    let mut current = 0;
    for _ in 1..n {
        in_tree[current] = true;
        let mut next: Option<usize> = None;
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let reach = distances[[current, j]].max(core[current]).max(core[j]);
            if reach < best[j] {
                best[j] = reach;
                from[j] = current;
            }
            if next.map_or(true, |m| best[j] < best[m]) {
                next = Some(j);
            }
        }
        let Some(j) = next else { break };
        edges.push((from[j], j, best[j]));
        current = j;
    }

    edges.sort_by(|a, b| a.2.total_cmp(&b.2));
    edges
}

/// Internal node `n + k` of the single-linkage dendrogram.
#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

struct Hierarchy {
    points: usize,
    merges: Vec<Merge>,
}

impl Hierarchy {
    fn size(&self, node: usize) -> usize {
        if node < self.points {
            1
        } else {
            self.merges[node - self.points].size
        }
    }

    fn root(&self) -> usize {
        self.points + self.merges.len() - 1
    }

    /// `node` and everything below it, breadth first.
    fn descendants(&self, node: usize) -> Vec<usize> {
        let mut out = vec![node];
        let mut i = 0;
        while i < out.len() {
            let x = out[i];
            if x >= self.points {
                let m = &self.merges[x - self.points];
                out.push(m.left);
                out.push(m.right);
            }
            i += 1;
        }
        out
    }
}

fn single_linkage(n: usize, mst: &[(usize, usize, f64)]) -> Hierarchy {
    let total = n + mst.len();
    let mut parent: Vec<usize> = (0..total).collect();
    let mut size = vec![1usize; total];
    let mut merges = Vec::with_capacity(mst.len());

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for (k, &(a, b, distance)) in mst.iter().enumerate() {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        let node = n + k;
        parent[ra] = node;
        parent[rb] = node;
        size[node] = size[ra] + size[rb];
        merges.push(Merge {
            left: ra,
            right: rb,
            distance,
            size: size[node],
        });
    }

    Hierarchy { points: n, merges }
}

/// One edge of the condensed tree. Cluster ids are `0..cluster_count` with
/// 0 the root; `child` is a point index when `child_is_point`.
#[derive(Debug, Clone, Copy)]
struct CondensedEdge {
    parent: usize,
    child: usize,
    child_is_point: bool,
    lambda: f64,
    size: usize,
}

struct CondensedTree {
    edges: Vec<CondensedEdge>,
    cluster_count: usize,
}

fn condense(n: usize, hierarchy: &Hierarchy, min_cluster_size: usize) -> CondensedTree {
    let nodes = n + hierarchy.merges.len();
    let root = hierarchy.root();
    let mut relabel = vec![0usize; nodes];
    let mut ignore = vec![false; nodes];
    let mut next_cluster = 1;
    let mut edges = Vec::new();

    for node in hierarchy.descendants(root) {
        if node < n || ignore[node] {
            continue;
        }
        let m = hierarchy.merges[node - n];
        let lambda = lambda_of(m.distance);
        let cluster = relabel[node];
        let left_size = hierarchy.size(m.left);
        let right_size = hierarchy.size(m.right);

        if left_size >= min_cluster_size && right_size >= min_cluster_size {
            for (child, size) in [(m.left, left_size), (m.right, right_size)] {
                relabel[child] = next_cluster;
                edges.push(CondensedEdge {
                    parent: cluster,
                    child: next_cluster,
                    child_is_point: false,
                    lambda,
                    size,
                });
                next_cluster += 1;
            }
            continue;
        }

        for (child, size) in [(m.left, left_size), (m.right, right_size)] {
            if size >= min_cluster_size {
                relabel[child] = cluster;
                continue;
            }
            for sub in hierarchy.descendants(child) {
                if sub < n {
                    edges.push(CondensedEdge {
                        parent: cluster,
                        child: sub,
                        child_is_point: true,
                        lambda,
                        size: 1,
                    });
                }
                ignore[sub] = true;
            }
        }
    }

    CondensedTree {
        edges,
        cluster_count: next_cluster,
    }
}

/// Parent, birth λ and child clusters of every condensed-tree cluster.
struct ClusterLinks {
    parent: Vec<usize>,
    birth: Vec<f64>,
    children: Vec<Vec<usize>>,
}

impl ClusterLinks {
    fn new(tree: &CondensedTree) -> Self {
        let count = tree.cluster_count;
        let mut links = Self {
            parent: vec![0; count],
            birth: vec![0.0; count],
            children: vec![Vec::new(); count],
        };
        for e in tree.edges.iter().filter(|e| !e.child_is_point) {
            links.parent[e.child] = e.parent;
            links.birth[e.child] = e.lambda;
            links.children[e.parent].push(e.child);
        }
        links
    }

    fn subtree(&self, cluster: usize) -> Vec<usize> {
        let mut out = vec![cluster];
        let mut i = 0;
        while i < out.len() {
            out.extend(self.children[out[i]].iter().copied());
            i += 1;
        }
        out
    }
}

/// Excess-of-mass selection. The root is never selected.
fn select_clusters(tree: &CondensedTree, epsilon: f64) -> Vec<bool> {
    let count = tree.cluster_count;
    let links = ClusterLinks::new(tree);

    let mut stability = vec![0.0f64; count];
    for e in &tree.edges {
        stability[e.parent] += (e.lambda - links.birth[e.parent]) * e.size as f64;
    }

    let mut selected = vec![false; count];
    // Children always carry larger ids than their parent.
    for cluster in (1..count).rev() {
        let children_stability: f64 = links.children[cluster].iter().map(|&c| stability[c]).sum();
        if children_stability > stability[cluster] {
            stability[cluster] = children_stability;
        } else {
            for sub in links.subtree(cluster) {
                selected[sub] = false;
            }
            selected[cluster] = true;
        }
    }

    if epsilon > 0.0 {
        selected = apply_epsilon(&links, &selected, epsilon);
    }
    selected
}

fn apply_epsilon(links: &ClusterLinks, selected: &[bool], epsilon: f64) -> Vec<bool> {
    let count = selected.len();
    let birth_distance = |c: usize| 1.0 / links.birth[c];
    let mut processed = vec![false; count];
    let mut out = vec![false; count];

    for cluster in (1..count).filter(|&c| selected[c]) {
        if processed[cluster] {
            continue;
        }
        if birth_distance(cluster) >= epsilon {
            out[cluster] = true;
            continue;
        }
        let mut target = cluster;
        loop {
            let parent = links.parent[target];
            if parent == 0 || birth_distance(parent) > epsilon {
                if parent != 0 {
                    target = parent;
                }
                break;
            }
            target = parent;
        }
        out[target] = true;
        for sub in links.subtree(target) {
            processed[sub] = true;
        }
    }

    // An ancestor chosen later wins over clusters kept beneath it.
    for cluster in 1..count {
        if !out[cluster] {
            continue;
        }
        let mut up = links.parent[cluster];
        while up != 0 {
            if out[up] {
                out[cluster] = false;
                break;
            }
            up = links.parent[up];
        }
    }
    out
}

fn label_points(n: usize, tree: &CondensedTree, selected: &[bool]) -> HdbscanFit {
    let links = ClusterLinks::new(tree);

    let mut dense = vec![None; tree.cluster_count];
    let mut cluster_count = 0;
    for (cluster, slot) in dense.iter_mut().enumerate() {
        if selected[cluster] {
            *slot = Some(cluster_count);
            cluster_count += 1;
        }
    }

    let mut max_lambda = vec![0.0f64; tree.cluster_count];
    let mut point_parent = vec![0usize; n];
    let mut point_lambda = vec![0.0f64; n];
    for e in &tree.edges {
        max_lambda[e.parent] = max_lambda[e.parent].max(e.lambda);
        if e.child_is_point {
            point_parent[e.child] = e.parent;
            point_lambda[e.child] = e.lambda;
        }
    }

    let mut fit = HdbscanFit::noise(n);
    fit.cluster_count = cluster_count;
    for point in 0..n {
        let mut cluster = point_parent[point];
        let owner = loop {
            if selected[cluster] {
                break Some(cluster);
            }
            if cluster == 0 {
                break None;
            }
            cluster = links.parent[cluster];
        };
        let Some(owner) = owner else { continue };

        fit.labels[point] = dense[owner];
        let death = max_lambda[owner];
        fit.probabilities[point] = if death > 0.0 && death.is_finite() {
            point_lambda[point].min(death) / death
        } else {
            1.0
        };
    }
    fit
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// `rows x cols` integer grid offset by `(dx, dy)`.
    fn grid(rows: usize, cols: usize, dx: f64, dy: f64) -> Vec<[f64; 2]> {
        (0..rows)
            .flat_map(|r| (0..cols).map(move |c| [dx + c as f64, dy + r as f64]))
            .collect()
    }

    fn matrix(points: &[[f64; 2]]) -> Array2<f64> {
        let flat: Vec<f64> = points.iter().flat_map(|p| p.iter().copied()).collect();
        let data = Array2::from_shape_vec((points.len(), 2), flat).unwrap();
        pairwise_distances(data.view(), DistanceMetric::Euclidean)
    }

    fn params(epsilon: f64) -> HdbscanParams {
        HdbscanParams {
            min_cluster_size: 5,
            min_samples: 3,
            cluster_selection_epsilon: epsilon,
        }
    }

    #[test]
    fn separated_blobs_and_outliers() {
        let mut points = grid(4, 5, 0.0, 0.0);
        points.extend(grid(4, 5, 100.0, 100.0));
        points.push([300.0, -300.0]);
        points.push([-250.0, 400.0]);

        let fit = fit(&matrix(&points), &params(0.0));
        assert_eq!(fit.cluster_count, 2);

        let first = fit.labels[0].unwrap();
        let second = fit.labels[20].unwrap();
        assert_ne!(first, second);
        assert!(fit.labels[..20].iter().all(|l| *l == Some(first)));
        assert!(fit.labels[20..40].iter().all(|l| *l == Some(second)));
        assert_eq!(fit.labels[40], None);
        assert_eq!(fit.labels[41], None);
        assert_eq!(fit.probabilities[40], 0.0);
        assert!(fit.probabilities[..40].iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn result_is_deterministic() {
        let mut points = grid(3, 4, 0.0, 0.0);
        points.extend(grid(3, 4, 40.0, 0.0));
        points.extend(grid(2, 3, 0.0, 60.0));
        let m = matrix(&points);
        assert_eq!(fit(&m, &params(0.0)), fit(&m, &params(0.0)));
    }

    #[test]
    fn epsilon_merges_close_siblings() {
        let mut points = grid(4, 5, 0.0, 0.0);
        points.extend(grid(4, 5, 20.0, 0.0));
        points.extend(grid(4, 5, 200.0, 0.0));
        let m = matrix(&points);

        assert_eq!(fit(&m, &params(0.0)).cluster_count, 3);

        let merged = fit(&m, &params(50.0));
        assert_eq!(merged.cluster_count, 2);
        assert_eq!(merged.labels[0], merged.labels[20]);
        assert_ne!(merged.labels[0], merged.labels[40]);
    }

    #[test]
    fn too_few_points_is_all_noise() {
        let fit = fit(&matrix(&grid(1, 4, 0.0, 0.0)), &params(0.0));
        assert_eq!(fit.cluster_count, 0);
        assert!(fit.labels.iter().all(Option::is_none));
    }

    #[test]
    fn one_dense_group_yields_no_cluster() {
        // The root itself is never selected.
        let fit = fit(&matrix(&grid(3, 3, 0.0, 0.0)), &params(0.0));
        assert_eq!(fit.cluster_count, 0);
    }
}
