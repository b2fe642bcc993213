mod bindings;

use crate::core::GPT2_PATTERN;
pub use bindings::{load_token_array, PyTokenizer};

use pyo3::prelude::*;

/// bpepack - streaming BPE corpus encoder with Python bindings
///
/// - Rank-ordered byte-pair merges over a fixed vocabulary
/// - Aho-Corasick special token matching
/// - Boundary-safe chunked reading of large corpora
/// - Rayon parallelism for batch and corpus encoding
/// - uint16 `.npy` output readable with `numpy.load`
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyTokenizer>()?;
    m.add_function(wrap_pyfunction!(load_token_array, m)?)?;
    m.add("GPT2_PATTERN", GPT2_PATTERN)?;
    Ok(())
}
