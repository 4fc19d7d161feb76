//! Benchmarks for the Parley relay live under `benches/`.
//!
//! ```bash
//! cargo bench -p parley-bench
//! ```
