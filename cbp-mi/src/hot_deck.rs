//! Deterministic hot-deck back-end
//!
//! Each missing cell draws a donor with replacement from the observed rows of
//! its own column. Columns are visited in frame order and cells in row order,
//! so a given RNG stream always yields the same completion.

use crate::engine::Imputer;
use crate::frame::{identity_donors, Donors, Frame, FrameColumn};
use cbp_common::config::ImputationBackend;
use cbp_common::Result;
use rand::rngs::StdRng;
use rand::Rng;

/// Draw donors for the missing cells of one column
pub fn draw_donors(column: &FrameColumn, donors: &mut [usize], rng: &mut StdRng) {
    let observed = column.observed_rows();
    if observed.is_empty() {
        return;
    }
    for row in column.missing_rows() {
        donors[row] = observed[rng.gen_range(0..observed.len())];
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HotDeck;

impl Imputer for HotDeck {
    fn backend(&self) -> ImputationBackend {
        ImputationBackend::HotDeck
    }

    fn complete(&self, frame: &Frame, rng: &mut StdRng) -> Result<Donors> {
        let mut donors = identity_donors(frame);
        for (column, column_donors) in frame.columns.iter().zip(donors.iter_mut()) {
            draw_donors(column, column_donors, rng);
        }
        Ok(donors)
    }
}
