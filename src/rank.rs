/*
 * SPDX-FileCopyrightText: 2026 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Parallel power-iteration PageRank.
//!
//! This implementation keeps two vectors of doubles (the current and the next
//! approximation) and runs the classical power iteration with uniform
//! redistribution of the rank of dangling nodes, renormalizing at every
//! iteration. The per-iteration kernel is data-parallel over a fixed-width
//! thread pool, and its reductions happen in a fixed order, so the parallel
//! computation returns the same ranks as the sequential one.
//!
//! # The formula
//!
//! Let *N* be the number of nodes, *d* the damping factor, *D* the set of
//! dangling nodes (nodes without outgoing edges) and *t* = (1 − *d*)/*N* the
//! teleport mass. Given the current approximation **p**, one iteration
//! computes for every node *i*
//!
//! > *vᵢ* = *d* · ( ∑_(*j* → *i*) *pⱼ* / outdegree(*j*)  +  ∑_(*k* ∈ *D*) *pₖ* / *N* )  +  *t*
//!
//! and then renormalizes, **p′** = **v** / ‖**v**‖₁, so that the rank vector
//! remains a probability distribution. The iteration stops when the 𝓁₁
//! change ‖**p** − **p′**‖₁ falls below the caller's tolerance.
//!
//! # Parallelism
//!
//! Every iteration runs three fork-join passes: the inner product over the
//! dangling set, the combined update and partial-sum pass over [0, *N*), and
//! the in-place normalization of **v**. Each pass splits its workload into
//! [static chunks](crate::partition), one per worker; workloads below the
//! [parallelization threshold](crate::partition::PARALLELIZATION_THRESHOLD)
//! fall through to a sequential loop instead.
//!
//! Workers write disjoint sub-slices of the output vector and return their
//! partial sums by position, and the cross-worker reduction folds the partial
//! sums in ascending worker id on the calling thread. Since accumulation
//! within a chunk is plain left-to-right addition in ascending index order,
//! the result is reproducible and independent of scheduling: for every worker
//! count the ranks agree with the sequential ones to within 10⁻¹⁰ per entry.
//! A table of reciprocal out-degrees is recomputed at the start of every
//! iteration and replaces division with multiplication in both code paths.

use dsi_progress_logger::{ProgressLog, no_logging};
use rayon::iter::{
    IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator, ParallelIterator,
};
use std::num::NonZeroUsize;
use std::ops::Range;

use crate::graph::GraphIndex;
use crate::partition::work_chunks;

/// Splits a vector into the disjoint mutable sub-slices described by a set of
/// contiguous chunks covering it.
fn split_chunks_mut<'a>(v: &'a mut [f64], chunks: &[Range<usize>]) -> Vec<&'a mut [f64]> {
    let mut slices = Vec::with_capacity(chunks.len());
    let mut rest = v;
    let mut offset = 0;
    for chunk in chunks {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(chunk.end - offset);
        slices.push(head);
        rest = tail;
        offset = chunk.end;
    }
    slices
}

/// The 𝓁₁ distance between two slices, accumulated left to right.
fn l1_distance(p: &[f64], next_p: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (&old, &new) in p.iter().zip(next_p) {
        // Sign test; agrees with f64::abs for every finite input
        let mut diff = old - new;
        if diff < 0.0 {
            diff = -diff;
        }
        sum += diff;
    }
    sum
}

/// One power-iteration step over a borrowed graph.
///
/// All passes partition their workload with the same policy and reduce
/// partial results in ascending worker id.
struct Kernel<'a> {
    graph: &'a GraphIndex,
    pool: &'a rayon::ThreadPool,
    num_workers: usize,
}

impl Kernel<'_> {
    /// Sums the rank of the dangling nodes.
    fn dangling_rank(&self, p: &[f64], dangling_nodes: &[usize]) -> f64 {
        if dangling_nodes.is_empty() {
            return 0.0;
        }

        let (chunks, num_workers) = work_chunks(dangling_nodes.len(), self.num_workers);

        if num_workers == 1 {
            let mut sum = 0.0;
            for &node in dangling_nodes {
                sum += p[node];
            }
            return sum;
        }

        let partial_sums: Vec<f64> = self.pool.install(|| {
            chunks
                .par_iter()
                .map(|chunk| {
                    let mut sum = 0.0;
                    for &node in &dangling_nodes[chunk.clone()] {
                        sum += p[node];
                    }
                    sum
                })
                .collect()
        });

        partial_sums.iter().sum()
    }

    /// Computes the next approximation from `p`.
    ///
    /// The result is normalized so that its entries sum to 1.
    fn step(&self, damping: f64, teleport: f64, p: &[f64], dangling_nodes: &[usize]) -> Vec<f64> {
        let num_nodes = p.len();
        let dangling_share = self.dangling_rank(p, dangling_nodes) / num_nodes as f64;
        let inv_out_degrees = self.graph.inverse_out_degrees();

        let mut next_p = vec![0.0; num_nodes];
        let (chunks, num_workers) = work_chunks(num_nodes, self.num_workers);

        if num_workers == 1 {
            let mut sum = 0.0;
            for (node, slot) in next_p.iter_mut().enumerate() {
                let mut in_link_sum = 0.0;
                for &pred in self.graph.in_links(node) {
                    in_link_sum += p[pred] * inv_out_degrees[pred];
                }
                *slot = damping * (in_link_sum + dangling_share) + teleport;
                sum += *slot;
            }
            let scale = 1.0 / sum;
            for slot in &mut next_p {
                *slot *= scale;
            }
            return next_p;
        }

        // Combined update + partial-sum pass; each worker fills a disjoint
        // sub-slice of the output vector.
        let partial_sums: Vec<f64> = self.pool.install(|| {
            split_chunks_mut(&mut next_p, &chunks)
                .into_par_iter()
                .zip(&chunks)
                .map(|(slice, chunk)| {
                    let mut sum = 0.0;
                    for (slot, node) in slice.iter_mut().zip(chunk.clone()) {
                        let mut in_link_sum = 0.0;
                        for &pred in self.graph.in_links(node) {
                            in_link_sum += p[pred] * inv_out_degrees[pred];
                        }
                        *slot = damping * (in_link_sum + dangling_share) + teleport;
                        sum += *slot;
                    }
                    sum
                })
                .collect()
        });

        // Cross-worker reduction in ascending worker id
        let scale = 1.0 / partial_sums.iter().sum::<f64>();

        // Normalization pass over the same chunks
        self.pool.install(|| {
            split_chunks_mut(&mut next_p, &chunks)
                .into_par_iter()
                .for_each(|slice| {
                    for slot in slice {
                        *slot *= scale;
                    }
                })
        });

        next_p
    }

    /// The 𝓁₁ change between successive approximations.
    fn change(&self, p: &[f64], next_p: &[f64]) -> f64 {
        let (chunks, num_workers) = work_chunks(p.len(), self.num_workers);

        if num_workers == 1 {
            return l1_distance(p, next_p);
        }

        let partial_sums: Vec<f64> = self.pool.install(|| {
            chunks
                .par_iter()
                .map(|chunk| l1_distance(&p[chunk.clone()], &next_p[chunk.clone()]))
                .collect()
        });

        partial_sums.iter().sum()
    }
}

/// Computes PageRank over edges inserted under arbitrary integer labels.
///
/// The degree of parallelism is fixed at construction time: the instance owns
/// a [thread pool](rayon::ThreadPool) with exactly that many workers, and
/// every ranking partitions its workload among them. A single worker (or a
/// workload below the [parallelization
/// threshold](crate::partition::PARALLELIZATION_THRESHOLD)) selects the
/// sequential code path; there is no separate sequential type.
///
/// Edges are accumulated with [`link`](Self::link), possibly interleaved with
/// calls to [`rank`](Self::rank), and discarded with [`clear`](Self::clear).
/// Ranks are emitted through a callback, labelled with the caller's original
/// labels, in first-seen label order.
///
/// # Examples
///
/// ```
/// use parank::PageRank;
///
/// let mut pr = PageRank::new();
/// pr.link(0, 2);
/// pr.link(1, 2);
/// pr.link(2, 2);
///
/// let mut ranks = Vec::new();
/// pr.rank(0.85, 1E-9, |label, rank| ranks.push((label, rank)));
///
/// // Emission follows first-seen label order: 0, 2, 1
/// assert_eq!(ranks[0].0, 0);
/// assert_eq!(ranks[1].0, 2);
/// assert_eq!(ranks[2].0, 1);
/// // The sink dominates
/// assert!(ranks[1].1 > ranks[0].1);
/// let total: f64 = ranks.iter().map(|&(_, rank)| rank).sum();
/// assert!((total - 1.0).abs() < 1E-9);
/// ```
///
/// A fixed worker count with an iteration cap:
///
/// ```
/// use parank::PageRank;
///
/// let mut pr = PageRank::with_workers(2);
/// pr.max_iterations(50);
/// pr.link(0, 1);
/// pr.link(1, 0);
///
/// let mut total = 0.0;
/// pr.rank(0.85, 1E-12, |_, rank| total += rank);
///
/// assert!((total - 1.0).abs() < 1E-12);
/// assert!(pr.iterations() <= 50);
/// assert!(pr.change() <= 1E-12);
/// ```
pub struct PageRank {
    graph: GraphIndex,
    pool: rayon::ThreadPool,
    num_workers: usize,
    max_iterations: usize,
    iterations: usize,
    change: f64,
}

impl std::fmt::Debug for PageRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRank")
            .field("num_workers", &self.num_workers)
            .field("num_nodes", &self.graph.num_nodes())
            .field("num_arcs", &self.graph.num_arcs())
            .field("max_iterations", &self.max_iterations)
            .field("iterations", &self.iterations)
            .field("change", &self.change)
            .finish_non_exhaustive()
    }
}

impl Default for PageRank {
    fn default() -> Self {
        Self::new()
    }
}

impl PageRank {
    /// Creates a ranker with one worker per available hardware thread.
    pub fn new() -> Self {
        Self::with_workers(
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        )
    }

    /// Creates a ranker with the given number of workers.
    ///
    /// # Panics
    ///
    /// Panics if `num_workers` is zero.
    pub fn with_workers(num_workers: usize) -> Self {
        assert!(num_workers >= 1, "The number of workers must be at least 1");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .build()
            .unwrap_or_else(|_| {
                panic!("Cannot build a ThreadPool with {num_workers} threads")
            });
        Self {
            graph: GraphIndex::new(),
            pool,
            num_workers,
            max_iterations: usize::MAX,
            iterations: 0,
            change: f64::INFINITY,
        }
    }

    /// Sets an upper bound on the number of iterations per ranking.
    ///
    /// The default is [`usize::MAX`], that is, the iteration runs until the
    /// tolerance is met.
    pub fn max_iterations(&mut self, max_iterations: usize) -> &mut Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Returns the number of workers.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Returns the number of nodes seen so far.
    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes()
    }

    /// Returns the number of edges inserted so far, counting duplicates.
    pub fn num_arcs(&self) -> u64 {
        self.graph.num_arcs()
    }

    /// Returns the number of iterations performed by the last call to
    /// [`rank`](Self::rank).
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Returns the 𝓁₁ change after the last iteration of the last call to
    /// [`rank`](Self::rank).
    pub fn change(&self) -> f64 {
        self.change
    }

    /// Records a directed edge between two labels.
    ///
    /// See [`GraphIndex::link`] for the indexing contract; in particular,
    /// repeated edges count with multiplicity.
    pub fn link(&mut self, from_label: i64, to_label: i64) {
        self.graph.link(from_label, to_label);
    }

    /// Drops all nodes and edges.
    ///
    /// After this call the instance is indistinguishable from a freshly
    /// constructed one with the same worker count.
    pub fn clear(&mut self) {
        self.graph.clear();
    }

    /// Runs the power iteration until the 𝓁₁ change between successive
    /// approximations does not exceed `tolerance`, then invokes `emit` with
    /// every (label, rank) pair in first-seen label order.
    ///
    /// At least one iteration is performed regardless of the tolerance. On an
    /// empty graph the callback is never invoked.
    ///
    /// Debug builds assert `0 < damping < 1` and `tolerance > 0`; release
    /// builds perform no validation, and the iteration may fail to terminate
    /// outside these ranges.
    pub fn rank(&mut self, damping: f64, tolerance: f64, emit: impl FnMut(i64, f64)) {
        self.rank_with_logging(damping, tolerance, emit, no_logging![]);
    }

    /// Runs the power iteration as [`rank`](Self::rank), logging progress.
    ///
    /// `pl` receives one update per iteration; pass
    /// [`no_logging![]`](dsi_progress_logger::no_logging) to disable
    /// progress reporting.
    pub fn rank_with_logging(
        &mut self,
        damping: f64,
        tolerance: f64,
        mut emit: impl FnMut(i64, f64),
        pl: &mut impl ProgressLog,
    ) {
        debug_assert!(
            0.0 < damping && damping < 1.0,
            "The damping factor must be in (0 . . 1), got {damping}"
        );
        debug_assert!(tolerance > 0.0, "The tolerance must be positive, got {tolerance}");

        let num_nodes = self.graph.num_nodes();
        if num_nodes == 0 {
            return;
        }

        log::info!("Damping factor: {damping}");
        log::info!("Tolerance: {tolerance}");

        let teleport = (1.0 - damping) / num_nodes as f64;
        let dangling_nodes = self.graph.dangling_nodes();
        log::info!("{} dangling nodes", dangling_nodes.len());

        let kernel = Kernel {
            graph: &self.graph,
            pool: &self.pool,
            num_workers: self.num_workers,
        };

        let mut p = vec![1.0 / num_nodes as f64; num_nodes];
        // Exceeds the 𝓁₁ diameter of the probability simplex, so the first
        // iteration always runs
        let mut change = 2.0;
        let mut iterations = 0;

        pl.item_name("iteration");
        pl.expected_updates(None);
        pl.start(format!(
            "Computing PageRank (damping={damping}, {} workers)...",
            self.num_workers
        ));

        while change > tolerance && iterations < self.max_iterations {
            let next_p = kernel.step(damping, teleport, &p, &dangling_nodes);
            change = kernel.change(&p, &next_p);
            p = next_p;
            iterations += 1;
            log::info!("Iteration {iterations}: l1 change = {change}");
            pl.update();
        }

        pl.done();

        self.iterations = iterations;
        self.change = change;

        for (node, &rank) in p.iter().enumerate() {
            emit(self.graph.label(node), rank);
        }
    }
}
