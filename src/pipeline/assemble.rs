//! Ordered assembly of pool results.
//!
//! Completion order is arbitrary; output order is the original job order.
//! A request either yields a complete artifact or an error; when several jobs
//! failed the lowest index is reported, independent of which failed first.

use crate::config::OutputFormat;
use crate::error::{ConvertError, PageError};
use crate::output::{EncodedPage, OutputArtifact, PageResult};

/// Place every result by index and return pages in ascending order.
///
/// `expected` is the number of jobs submitted. A missing, duplicate, or
/// out-of-range index is an internal fault.
pub fn collect_ordered(
    results: Vec<PageResult>,
    expected: usize,
) -> Result<Vec<EncodedPage>, ConvertError> {
    if results.len() != expected {
        return Err(ConvertError::Internal(format!(
            "expected {} page results, got {}",
            expected,
            results.len()
        )));
    }

    let mut slots: Vec<Option<EncodedPage>> = vec![None; expected];
    let mut seen = vec![false; expected];
    let mut first_failure: Option<(usize, PageError)> = None;

    for result in results {
        let index = result.index();
        if index >= expected {
            return Err(ConvertError::Internal(format!(
                "page result index {} outside 0..{}",
                index, expected
            )));
        }
        if std::mem::replace(&mut seen[index], true) {
            return Err(ConvertError::Internal(format!(
                "duplicate page result for index {}",
                index
            )));
        }
        match result {
            PageResult::Ok(page) => slots[index] = Some(page),
            PageResult::Failed { index, cause } => {
                if first_failure.as_ref().is_none_or(|(lowest, _)| index < *lowest) {
                    first_failure = Some((index, cause));
                }
            }
        }
    }

    if let Some((index, cause)) = first_failure {
        return Err(ConvertError::PageFailed { index, cause });
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                ConvertError::Internal(format!("missing page result for index {}", index))
            })
        })
        .collect()
}

/// Assemble rasterised pages into the request's artifact.
pub fn assemble(
    results: Vec<PageResult>,
    expected: usize,
    format: OutputFormat,
) -> Result<OutputArtifact, ConvertError> {
    let pages = collect_ordered(results, expected)?;
    Ok(OutputArtifact::from_pages(pages, format))
}
