/*
 * SPDX-FileCopyrightText: 2026 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Static partitioning of scalar workloads into per-worker chunks.
//!
//! The [kernel](crate::rank) applies this policy independently to each of
//! its parallel passes. Chunks are contiguous, disjoint, and cover the whole
//! workload, and their number equals the effective worker count, so a value
//! computed per chunk can be indexed by worker id.

use std::ops::Range;

/// Minimum workload size that justifies forking worker tasks.
///
/// Below this threshold the fork-join overhead exceeds the benefit and the
/// kernel falls through to its sequential code path.
pub const PARALLELIZATION_THRESHOLD: usize = 5000;

/// Splits `[0, total_size)` into contiguous chunks for `num_workers` workers,
/// returning the chunks and the effective worker count.
///
/// Workloads below [`PARALLELIZATION_THRESHOLD`] produce a single chunk and
/// an effective worker count of 1. Otherwise each worker gets
/// `total_size / num_workers` elements, with the last chunk extended to cover
/// the remainder; if there are more workers than elements, each chunk holds
/// one element and the effective worker count drops to `total_size`.
///
/// # Examples
///
/// ```
/// use parank::partition::work_chunks;
///
/// let (chunks, workers) = work_chunks(10, 4);
/// assert_eq!(workers, 1);
/// assert_eq!(chunks, vec![0..10]);
///
/// let (chunks, workers) = work_chunks(10000, 4);
/// assert_eq!(workers, 4);
/// assert_eq!(chunks, vec![0..2500, 2500..5000, 5000..7500, 7500..10000]);
/// ```
pub fn work_chunks(total_size: usize, num_workers: usize) -> (Vec<Range<usize>>, usize) {
    if total_size < PARALLELIZATION_THRESHOLD {
        return (vec![0..total_size], 1);
    }

    let mut num_workers = num_workers;
    let mut chunk_size = total_size / num_workers;

    if chunk_size == 0 {
        // More workers than elements
        chunk_size = 1;
        num_workers = total_size;
    }

    let mut chunks = Vec::with_capacity(num_workers);
    for worker in 0..num_workers {
        let start = worker * chunk_size;
        let end = if worker == num_workers - 1 {
            // The last worker takes the remainder
            total_size
        } else {
            start + chunk_size
        };
        chunks.push(start..end);
    }

    (chunks, num_workers)
}
